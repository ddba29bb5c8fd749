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

//! The standard methods of RFC 8620 §5, as traits a datatype can implement,
//! along with their (already validated) arguments and their results.
//!
//! The dispatcher does all the wire-level work: decoding, result references,
//! creation id substitution, limits, and account lookup. Implementations
//! receive typed requests and only need to worry about their own semantics.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use super::error::{MethodError, SetError};
use super::filter::{Comparator, Filter};
use super::types::{Id, Int, PatchObject, UnsignedInt};

/// The method part of a `Datatype/method` invocation name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MethodKind {
    Echo,
    Get,
    Changes,
    Set,
    Copy,
    Query,
    QueryChanges,
}

impl MethodKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "echo" => Some(MethodKind::Echo),
            "get" => Some(MethodKind::Get),
            "changes" => Some(MethodKind::Changes),
            "set" => Some(MethodKind::Set),
            "copy" => Some(MethodKind::Copy),
            "query" => Some(MethodKind::Query),
            "queryChanges" => Some(MethodKind::QueryChanges),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MethodKind::Echo => "echo",
            MethodKind::Get => "get",
            MethodKind::Changes => "changes",
            MethodKind::Set => "set",
            MethodKind::Copy => "copy",
            MethodKind::Query => "query",
            MethodKind::QueryChanges => "queryChanges",
        }
    }

    /// The standard arguments of this method.
    ///
    /// `None` means the method takes arbitrary arguments.
    pub fn arguments(self) -> Option<&'static [&'static str]> {
        match self {
            MethodKind::Echo => None,
            MethodKind::Get => Some(&["accountId", "ids", "properties"]),
            MethodKind::Changes => {
                Some(&["accountId", "sinceState", "maxChanges"])
            }
            MethodKind::Set => Some(&[
                "accountId",
                "ifInState",
                "create",
                "update",
                "destroy",
            ]),
            MethodKind::Copy => Some(&[
                "fromAccountId",
                "ifFromState",
                "accountId",
                "ifInState",
                "create",
                "onSuccessDestroyOriginal",
                "destroyFromIfInState",
            ]),
            MethodKind::Query => Some(&[
                "accountId",
                "filter",
                "sort",
                "position",
                "anchor",
                "anchorOffset",
                "limit",
                "calculateTotal",
            ]),
            MethodKind::QueryChanges => Some(&[
                "accountId",
                "filter",
                "sort",
                "sinceQueryState",
                "maxChanges",
                "upToId",
                "calculateTotal",
            ]),
        }
    }
}

/// A named class of objects, such as `Mailbox`, which implements some subset
/// of the standard methods.
///
/// `A` is the account handle type handed out by the account resolver.
pub trait Datatype<A>: Send + Sync {
    fn name(&self) -> &str;

    /// Non-standard arguments this datatype accepts for `method`, which are
    /// passed through in the `extra` field of the request.
    fn extra_arguments(&self, _method: MethodKind) -> &[&'static str] {
        &[]
    }

    fn echo(&self) -> Option<&dyn EchoMethod> {
        None
    }

    fn get(&self) -> Option<&dyn GetMethod<A>> {
        None
    }

    fn changes(&self) -> Option<&dyn ChangesMethod<A>> {
        None
    }

    fn set(&self) -> Option<&dyn SetMethod<A>> {
        None
    }

    fn copy(&self) -> Option<&dyn CopyMethod<A>> {
        None
    }

    fn query(&self) -> Option<&dyn QueryMethod<A>> {
        None
    }

    fn query_changes(&self) -> Option<&dyn QueryChangesMethod<A>> {
        None
    }

    fn implements(&self, method: MethodKind) -> bool {
        match method {
            MethodKind::Echo => self.echo().is_some(),
            MethodKind::Get => self.get().is_some(),
            MethodKind::Changes => self.changes().is_some(),
            MethodKind::Set => self.set().is_some(),
            MethodKind::Copy => self.copy().is_some(),
            MethodKind::Query => self.query().is_some(),
            MethodKind::QueryChanges => self.query_changes().is_some(),
        }
    }
}

pub trait EchoMethod: Send + Sync {
    fn echo(
        &self,
        arguments: Map<String, Value>,
    ) -> Result<Map<String, Value>, MethodError> {
        Ok(arguments)
    }
}

pub trait GetMethod<A>: Send + Sync {
    fn get(
        &self,
        account: &A,
        request: GetRequest,
    ) -> Result<GetResponse, MethodError>;
}

pub trait ChangesMethod<A>: Send + Sync {
    fn changes(
        &self,
        account: &A,
        request: ChangesRequest,
    ) -> Result<ChangesResponse, MethodError>;
}

pub trait SetMethod<A>: Send + Sync {
    fn set(
        &self,
        account: &A,
        request: SetRequest,
    ) -> Result<SetResponse, MethodError>;
}

pub trait CopyMethod<A>: Send + Sync {
    fn copy(
        &self,
        from_account: &A,
        account: &A,
        request: CopyRequest,
    ) -> Result<CopyResponse, MethodError>;
}

pub trait QueryMethod<A>: Send + Sync {
    fn query(
        &self,
        account: &A,
        request: QueryRequest,
    ) -> Result<QueryResponse, MethodError>;
}

pub trait QueryChangesMethod<A>: Send + Sync {
    fn query_changes(
        &self,
        account: &A,
        request: QueryChangesRequest,
    ) -> Result<QueryChangesResponse, MethodError>;
}

/// Objects to create, keyed by client-chosen creation id.
pub type CreateMap = BTreeMap<Id, Map<String, Value>>;

#[derive(Clone, Debug, PartialEq)]
pub struct GetRequest {
    pub account_id: Id,
    /// `None` means "all objects".
    pub ids: Option<Vec<Id>>,
    /// `None` means "all properties". An empty list is passed through as-is.
    pub properties: Option<Vec<String>>,
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetResponse {
    pub account_id: Option<Id>,
    pub state: String,
    pub list: Vec<Value>,
    pub not_found: Vec<Id>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChangesRequest {
    pub account_id: Id,
    pub since_state: String,
    pub max_changes: Option<UnsignedInt>,
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesResponse {
    pub account_id: Option<Id>,
    pub old_state: String,
    pub new_state: String,
    pub has_more_changes: bool,
    pub created: Vec<Id>,
    pub updated: Vec<Id>,
    pub destroyed: Vec<Id>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SetRequest {
    pub account_id: Id,
    pub if_in_state: Option<String>,
    pub create: CreateMap,
    pub update: BTreeMap<Id, PatchObject>,
    pub destroy: Vec<Id>,
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetResponse {
    pub account_id: Option<Id>,
    pub old_state: Option<String>,
    pub new_state: String,
    /// For each successfully created object, the properties the server set
    /// or changed, which must include `id`.
    #[serde(serialize_with = "null_if_empty")]
    pub created: BTreeMap<Id, Map<String, Value>>,
    /// For each successfully updated object, the properties which changed
    /// in a way the client could not predict, or `null`.
    #[serde(serialize_with = "null_if_empty")]
    pub updated: BTreeMap<Id, Option<Map<String, Value>>>,
    #[serde(serialize_with = "null_if_empty")]
    pub destroyed: Vec<Id>,
    #[serde(serialize_with = "null_if_empty")]
    pub not_created: BTreeMap<Id, SetError>,
    #[serde(serialize_with = "null_if_empty")]
    pub not_updated: BTreeMap<Id, SetError>,
    #[serde(serialize_with = "null_if_empty")]
    pub not_destroyed: BTreeMap<Id, SetError>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CopyRequest {
    pub from_account_id: Id,
    pub if_from_state: Option<String>,
    pub account_id: Id,
    pub if_in_state: Option<String>,
    /// Keyed by creation id; each object must contain the `id` of the
    /// object in the source account.
    pub create: CreateMap,
    pub on_success_destroy_original: bool,
    pub destroy_from_if_in_state: Option<String>,
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyResponse {
    pub from_account_id: Option<Id>,
    pub account_id: Option<Id>,
    pub old_state: Option<String>,
    pub new_state: String,
    #[serde(serialize_with = "null_if_empty")]
    pub created: BTreeMap<Id, Map<String, Value>>,
    #[serde(serialize_with = "null_if_empty")]
    pub not_created: BTreeMap<Id, SetError>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryRequest {
    pub account_id: Id,
    pub filter: Option<Filter>,
    pub sort: Option<Vec<Comparator>>,
    pub position: Int,
    pub anchor: Option<Id>,
    pub anchor_offset: Int,
    pub limit: Option<UnsignedInt>,
    pub calculate_total: bool,
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub account_id: Option<Id>,
    pub query_state: String,
    pub can_calculate_changes: bool,
    pub position: UnsignedInt,
    pub ids: Vec<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<UnsignedInt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<UnsignedInt>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryChangesRequest {
    pub account_id: Id,
    pub filter: Option<Filter>,
    pub sort: Option<Vec<Comparator>>,
    pub since_query_state: String,
    pub max_changes: Option<UnsignedInt>,
    pub up_to_id: Option<Id>,
    pub calculate_total: bool,
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AddedItem {
    pub id: Id,
    pub index: UnsignedInt,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryChangesResponse {
    pub account_id: Option<Id>,
    pub old_query_state: String,
    pub new_query_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<UnsignedInt>,
    pub removed: Vec<Id>,
    pub added: Vec<AddedItem>,
}

/// Serialise an empty collection as `null`, per the `Foo|null` result types
/// of `set` and `copy`.
fn null_if_empty<S, C>(collection: &C, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    C: Serialize,
    for<'a> &'a C: IntoIterator,
{
    if collection.into_iter().next().is_none() {
        s.serialize_none()
    } else {
        collection.serialize(s)
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn method_names() {
        for &name in &[
            "echo",
            "get",
            "changes",
            "set",
            "copy",
            "query",
            "queryChanges",
        ] {
            assert_eq!(name, MethodKind::from_name(name).unwrap().as_str());
        }
        assert_eq!(None, MethodKind::from_name("Get"));
        assert_eq!(None, MethodKind::from_name("unknown"));
    }

    #[test]
    fn set_response_nulls() {
        let response = SetResponse {
            account_id: Some(Id::of("a1")),
            old_state: Some("1".to_owned()),
            new_state: "2".to_owned(),
            destroyed: vec![Id::of("m1")],
            ..SetResponse::default()
        };

        assert_eq!(
            json!({
                "accountId": "a1",
                "oldState": "1",
                "newState": "2",
                "created": null,
                "updated": null,
                "destroyed": ["m1"],
                "notCreated": null,
                "notUpdated": null,
                "notDestroyed": null,
            }),
            serde_json::to_value(&response).unwrap()
        );
    }

    #[test]
    fn query_changes_response_shape() {
        let response = QueryChangesResponse {
            account_id: Some(Id::of("a1")),
            old_query_state: "1".to_owned(),
            new_query_state: "2".to_owned(),
            total: None,
            removed: vec![Id::of("x")],
            added: vec![AddedItem {
                id: Id::of("y"),
                index: UnsignedInt(3),
            }],
        };

        assert_eq!(
            json!({
                "accountId": "a1",
                "oldQueryState": "1",
                "newQueryState": "2",
                "removed": ["x"],
                "added": [{"id": "y", "index": 3}],
            }),
            serde_json::to_value(&response).unwrap()
        );
    }
}
