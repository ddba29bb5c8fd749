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

//! The request and response envelopes of RFC 8620 §3.3 and §3.4.

use std::collections::BTreeMap;

use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::Serialize;
use serde_json::Value;

use super::error::{MethodError, RequestError};
use super::types::Id;

/// One `[name, arguments, methodCallId]` tuple.
///
/// The arguments are kept as raw JSON: whether they are even an object is
/// a per-invocation concern, not a request-level one.
#[derive(Clone, Debug, PartialEq)]
pub struct Invocation {
    pub name: String,
    pub arguments: Value,
    pub method_call_id: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub using: Vec<String>,
    pub method_calls: Vec<Invocation>,
    pub created_ids: Option<BTreeMap<Id, Id>>,
}

impl Request {
    /// Decode the request envelope, slot by slot.
    ///
    /// Any structural problem is a `notRequest` error. Unknown top-level
    /// properties are ignored.
    pub fn from_value(value: Value) -> Result<Self, RequestError> {
        let mut object = match value {
            Value::Object(object) => object,
            _ => {
                return Err(RequestError::not_request(
                    "the request must be a JSON object",
                ))
            }
        };

        let using = match object.remove("using") {
            Some(Value::Array(using)) => using
                .into_iter()
                .enumerate()
                .map(|(ix, urn)| match urn {
                    Value::String(urn) => Ok(urn),
                    _ => Err(RequestError::not_request(format!(
                        "using[{ix}] is not a string"
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => {
                return Err(RequestError::not_request(
                    "'using' must be an array",
                ))
            }
            None => {
                return Err(RequestError::not_request("'using' is missing"))
            }
        };

        let method_calls = match object.remove("methodCalls") {
            Some(Value::Array(calls)) => calls
                .into_iter()
                .enumerate()
                .map(|(ix, call)| Invocation::from_value(ix, call))
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => {
                return Err(RequestError::not_request(
                    "'methodCalls' must be an array",
                ))
            }
            None => {
                return Err(RequestError::not_request(
                    "'methodCalls' is missing",
                ))
            }
        };

        let created_ids = match object.remove("createdIds") {
            None => None,
            Some(created_ids) => {
                Some(serde_json::from_value(created_ids).map_err(|e| {
                    RequestError::not_request(format!(
                        "invalid 'createdIds': {e}"
                    ))
                })?)
            }
        };

        if using.is_empty() {
            return Err(RequestError::not_request("'using' is empty"));
        }

        if method_calls.is_empty() {
            return Err(RequestError::not_request("'methodCalls' is empty"));
        }

        Ok(Request {
            using,
            method_calls,
            created_ids,
        })
    }
}

impl Invocation {
    fn from_value(ix: usize, value: Value) -> Result<Self, RequestError> {
        let mut slots = match value {
            Value::Array(slots) if 3 == slots.len() => slots.into_iter(),
            _ => {
                return Err(RequestError::not_request(format!(
                    "methodCalls[{ix}] is not a 3-element array"
                )))
            }
        };

        let name = match slots.next() {
            Some(Value::String(name)) => name,
            _ => {
                return Err(RequestError::not_request(format!(
                    "the method name of methodCalls[{ix}] is not a string"
                )))
            }
        };
        let arguments = slots.next().unwrap_or(Value::Null);
        let method_call_id = match slots.next() {
            Some(Value::String(id)) => id,
            _ => {
                return Err(RequestError::not_request(format!(
                    "the method call id of methodCalls[{ix}] is not a string"
                )))
            }
        };

        Ok(Invocation {
            name,
            arguments,
            method_call_id,
        })
    }
}

/// The response to one invocation.
#[derive(Clone, Debug, PartialEq)]
pub enum InvocationResponse {
    /// Serialised as `[name, arguments, methodCallId]`.
    Success {
        name: String,
        arguments: Value,
        method_call_id: String,
    },
    /// Serialised as `[{"error": {...}}, methodCallId]`.
    Error {
        error: MethodError,
        method_call_id: String,
    },
}

impl InvocationResponse {
    pub fn success(
        name: impl Into<String>,
        arguments: Value,
        method_call_id: impl Into<String>,
    ) -> Self {
        InvocationResponse::Success {
            name: name.into(),
            arguments,
            method_call_id: method_call_id.into(),
        }
    }

    pub fn error(error: MethodError, method_call_id: impl Into<String>) -> Self {
        InvocationResponse::Error {
            error,
            method_call_id: method_call_id.into(),
        }
    }

    pub fn method_call_id(&self) -> &str {
        match *self {
            InvocationResponse::Success {
                ref method_call_id, ..
            }
            | InvocationResponse::Error {
                ref method_call_id, ..
            } => method_call_id,
        }
    }

    /// The name and arguments, if this is a successful response.
    pub fn as_success(&self) -> Option<(&str, &Value)> {
        match *self {
            InvocationResponse::Success {
                ref name,
                ref arguments,
                ..
            } => Some((name.as_str(), arguments)),
            InvocationResponse::Error { .. } => None,
        }
    }
}

struct ErrorSlot<'a>(&'a MethodError);

impl Serialize for ErrorSlot<'_> {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(1))?;
        map.serialize_entry("error", self.0)?;
        map.end()
    }
}

impl Serialize for InvocationResponse {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match *self {
            InvocationResponse::Success {
                ref name,
                ref arguments,
                ref method_call_id,
            } => {
                let mut seq = s.serialize_seq(Some(3))?;
                seq.serialize_element(name)?;
                seq.serialize_element(arguments)?;
                seq.serialize_element(method_call_id)?;
                seq.end()
            }
            InvocationResponse::Error {
                ref error,
                ref method_call_id,
            } => {
                let mut seq = s.serialize_seq(Some(2))?;
                seq.serialize_element(&ErrorSlot(error))?;
                seq.serialize_element(method_call_id)?;
                seq.end()
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub method_responses: Vec<InvocationResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_ids: Option<BTreeMap<Id, Id>>,
    pub session_state: String,
}
