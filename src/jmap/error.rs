//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Crymap.
//
// Crymap is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Crymap is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Crymap. If not, see <http://www.gnu.org/licenses/>.

//! The three strata of JMAP errors.
//!
//! - `RequestError`: the request as a whole is rejected with HTTP 400 and no
//!   method is run (RFC 8620 §3.6.1).
//!
//! - `MethodError`: a single invocation failed; it takes the place of that
//!   invocation's response and the batch carries on (RFC 8620 §3.6.2).
//!
//! - `SetError`: a single object within a `set` or `copy` could not be
//!   processed; it lands in `notCreated` et al (RFC 8620 §5.3).

use std::fmt;

use serde::Serialize;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RequestErrorType {
    #[serde(rename = "urn:ietf:params:jmap:error:unknownCapability")]
    UnknownCapability,
    #[serde(rename = "urn:ietf:params:jmap:error:notJSON")]
    NotJson,
    #[serde(rename = "urn:ietf:params:jmap:error:notRequest")]
    NotRequest,
    #[serde(rename = "urn:ietf:params:jmap:error:limit")]
    Limit,
}

/// The limit named by a `urn:ietf:params:jmap:error:limit` error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Limit {
    MaxSizeRequest,
    MaxSizeUpload,
    MaxConcurrentUpload,
    MaxConcurrentRequests,
    MaxCallsInRequest,
    MaxObjectsInSet,
}

/// A request-level error, serialised as an RFC 7807 problem document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Error)]
#[error("{kind:?}: {detail}")]
pub struct RequestError {
    #[serde(rename = "type")]
    pub kind: RequestErrorType,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<Limit>,
}

impl RequestError {
    fn new(kind: RequestErrorType, detail: impl Into<String>) -> Self {
        Self {
            kind,
            status: 400,
            detail: detail.into(),
            limit: None,
        }
    }

    pub fn not_json_content_type() -> Self {
        Self::new(
            RequestErrorType::NotJson,
            "the content type of the request is not application/json",
        )
    }

    pub fn not_json(detail: impl fmt::Display) -> Self {
        Self::new(
            RequestErrorType::NotJson,
            format!("the request is not valid JSON: {detail}"),
        )
    }

    pub fn not_request(detail: impl fmt::Display) -> Self {
        Self::new(
            RequestErrorType::NotRequest,
            format!("the request is not a valid JMAP request: {detail}"),
        )
    }

    pub fn unknown_capability(urn: &str) -> Self {
        Self::new(
            RequestErrorType::UnknownCapability,
            format!("the capability '{urn}' is not supported by this server"),
        )
    }

    pub fn limit(limit: Limit, detail: impl Into<String>) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new(RequestErrorType::Limit, detail)
        }
    }
}

/// The `type` of a `MethodError`; `Display` gives the wire name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Error)]
#[serde(rename_all = "camelCase")]
pub enum MethodErrorType {
    #[error("serverFail")]
    ServerFail,
    #[error("serverPartialFail")]
    ServerPartialFail,
    #[error("unknownMethod")]
    UnknownMethod,
    #[error("invalidArguments")]
    InvalidArguments,
    #[error("invalidResultReference")]
    InvalidResultReference,
    #[error("forbidden")]
    Forbidden,
    #[error("accountNotFound")]
    AccountNotFound,
    #[error("accountNotSupportedByMethod")]
    AccountNotSupportedByMethod,
    #[error("accountReadOnly")]
    AccountReadOnly,
    #[error("requestTooLarge")]
    RequestTooLarge,
    #[error("cannotCalculateChanges")]
    CannotCalculateChanges,
    #[error("stateMismatch")]
    StateMismatch,
    #[error("unsupportedFilter")]
    UnsupportedFilter,
    #[error("unsupportedSort")]
    UnsupportedSort,
    #[error("anchorNotFound")]
    AnchorNotFound,
    #[error("fromAccountNotFound")]
    FromAccountNotFound,
}

/// A method-level error, which replaces the response of the invocation that
/// caused it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Error)]
#[error("{kind}{}", describe(.description))]
pub struct MethodError {
    #[serde(rename = "type")]
    pub kind: MethodErrorType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

macro_rules! method_error_ctors {
    ($($name:ident => $kind:ident,)*) => {
        impl MethodError {
            $(pub fn $name() -> Self {
                MethodError {
                    kind: MethodErrorType::$kind,
                    description: None,
                }
            })*
        }
    };
}

method_error_ctors! {
    server_fail => ServerFail,
    server_partial_fail => ServerPartialFail,
    unknown_method => UnknownMethod,
    forbidden => Forbidden,
    account_not_found => AccountNotFound,
    account_not_supported_by_method => AccountNotSupportedByMethod,
    account_read_only => AccountReadOnly,
    request_too_large => RequestTooLarge,
    cannot_calculate_changes => CannotCalculateChanges,
    state_mismatch => StateMismatch,
    unsupported_filter => UnsupportedFilter,
    unsupported_sort => UnsupportedSort,
    anchor_not_found => AnchorNotFound,
    from_account_not_found => FromAccountNotFound,
}

impl MethodError {
    pub fn invalid_arguments(description: impl Into<String>) -> Self {
        MethodError {
            kind: MethodErrorType::InvalidArguments,
            description: Some(description.into()),
        }
    }

    pub fn invalid_result_reference(description: impl Into<String>) -> Self {
        MethodError {
            kind: MethodErrorType::InvalidResultReference,
            description: Some(description.into()),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

fn describe(description: &Option<String>) -> String {
    description
        .as_ref()
        .map_or_else(String::new, |d| format!(": {d}"))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SetErrorType {
    Forbidden,
    OverQuota,
    TooLarge,
    RateLimit,
    NotFound,
    InvalidPatch,
    WillDestroy,
    InvalidProperties,
    Singleton,
    AlreadyExists,
    MailboxHasChild,
    MailboxHasEmail,
}

/// An error for a single object within a `set` or `copy`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SetError {
    #[serde(rename = "type")]
    pub kind: SetErrorType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// For `invalidProperties`, the properties which were at fault.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Vec<String>>,
}

impl SetError {
    pub fn new(kind: SetErrorType) -> Self {
        SetError {
            kind,
            description: None,
            properties: None,
        }
    }

    pub fn not_found() -> Self {
        SetError::new(SetErrorType::NotFound)
    }

    pub fn invalid_properties(
        properties: impl IntoIterator<Item = impl Into<String>>,
        description: impl Into<String>,
    ) -> Self {
        SetError {
            kind: SetErrorType::InvalidProperties,
            description: Some(description.into()),
            properties: Some(properties.into_iter().map(Into::into).collect()),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
