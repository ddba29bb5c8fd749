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

//! Binding of the arguments object of an invocation.
//!
//! Arguments go through two passes. First, every `#K` key is replaced with
//! the value of the result reference it holds. Second, each method pulls its
//! documented arguments out of the map one field at a time, so that type
//! errors can name the field at fault. Whatever remains afterwards is
//! unknown and rejected.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::error::MethodError;
use super::pointer;
use super::request::InvocationResponse;
use super::types::Id;

/// The value of a `#K` argument.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResultReference {
    pub result_of: String,
    pub name: String,
    pub path: String,
}

/// Whether an argument counts as "given" when deciding if `K` and `#K`
/// conflict.
fn is_given(value: &Value) -> bool {
    match *value {
        Value::Null => false,
        Value::String(ref s) => !s.is_empty(),
        Value::Array(ref a) => !a.is_empty(),
        Value::Object(ref o) => !o.is_empty(),
        _ => true,
    }
}

/// Replace every `#K` key in `arguments` with the value its result reference
/// points to.
///
/// `documented` lists the names `K` may take; `None` allows any name.
/// `responses` are the responses produced so far in the batch.
pub fn expand_references(
    arguments: &mut Map<String, Value>,
    documented: Option<&[&str]>,
    responses: &[InvocationResponse],
) -> Result<(), MethodError> {
    let references = arguments
        .keys()
        .filter(|k| k.starts_with('#'))
        .cloned()
        .collect::<Vec<_>>();

    for key in references {
        let name = &key[1..];
        if let Some(documented) = documented {
            if !documented.contains(&name) {
                return Err(MethodError::invalid_arguments(format!(
                    "'{key}' does not refer to a known argument"
                )));
            }
        }

        if arguments.get(name).map_or(false, is_given) {
            return Err(MethodError::invalid_arguments(format!(
                "cannot use '{name}' and '{key}' together"
            )));
        }

        let reference = arguments.remove(&key).unwrap_or(Value::Null);
        let reference = serde_json::from_value::<ResultReference>(reference)
            .map_err(|e| {
                MethodError::invalid_result_reference(format!(
                    "'{key}' is not a valid result reference: {e}"
                ))
            })?;
        let value = resolve(&reference, responses)?;
        arguments.insert(name.to_owned(), value);
    }

    Ok(())
}

fn resolve(
    reference: &ResultReference,
    responses: &[InvocationResponse],
) -> Result<Value, MethodError> {
    let response = responses
        .iter()
        .find(|r| r.method_call_id() == reference.result_of)
        .ok_or_else(|| {
            MethodError::invalid_result_reference(format!(
                "no response for method call '{}'",
                reference.result_of
            ))
        })?;

    let arguments = match response.as_success() {
        Some((name, arguments)) if name == reference.name => arguments,
        _ => {
            return Err(MethodError::invalid_result_reference(format!(
                "method call '{}' did not produce a '{}' response",
                reference.result_of, reference.name
            )))
        }
    };

    pointer::resolve(arguments, &reference.path)
        .map_err(|e| MethodError::invalid_result_reference(e.to_string()))
}

/// The arguments of one invocation, consumed field by field.
#[derive(Debug)]
pub struct Arguments {
    map: Map<String, Value>,
}

impl Arguments {
    pub fn new(map: Map<String, Value>) -> Self {
        Arguments { map }
    }

    /// Remove and decode `field`. Absence and `null` both yield `None`.
    pub fn take<T: DeserializeOwned>(
        &mut self,
        field: &str,
    ) -> Result<Option<T>, MethodError> {
        match self.map.remove(field) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value).map(Some).map_err(
                |e| {
                    MethodError::invalid_arguments(format!(
                        "invalid value for '{field}': {e}"
                    ))
                },
            ),
        }
    }

    pub fn take_or_default<T: DeserializeOwned + Default>(
        &mut self,
        field: &str,
    ) -> Result<T, MethodError> {
        self.take(field).map(Option::unwrap_or_default)
    }

    pub fn require<T: DeserializeOwned>(
        &mut self,
        field: &str,
    ) -> Result<T, MethodError> {
        self.take(field)?.ok_or_else(|| {
            MethodError::invalid_arguments(format!(
                "missing required argument '{field}'"
            ))
        })
    }

    /// Remove the datatype-specific arguments named in `names`, untouched.
    pub fn take_extra(&mut self, names: &[&str]) -> Map<String, Value> {
        names
            .iter()
            .filter_map(|&name| {
                self.map.remove(name).map(|v| (name.to_owned(), v))
            })
            .collect()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.map
    }

    /// Fail if any argument was not consumed.
    pub fn finish(self) -> Result<(), MethodError> {
        match self.map.keys().next() {
            None => Ok(()),
            Some(key) => Err(MethodError::invalid_arguments(format!(
                "unknown argument '{key}'"
            ))),
        }
    }
}

/// Resolve an id which may be a `#creationId` reference to an object created
/// earlier in the batch.
pub fn resolve_id(
    raw: &str,
    created_ids: &BTreeMap<Id, Id>,
) -> Result<Id, MethodError> {
    if let Some(creation_id) = raw.strip_prefix('#') {
        return created_ids.get(creation_id).cloned().ok_or_else(|| {
            MethodError::invalid_arguments(format!(
                "unknown creation id '{creation_id}'"
            ))
        });
    }

    Id::new(raw).map_err(|e| MethodError::invalid_arguments(e.to_string()))
}

pub fn resolve_ids(
    raw: Vec<String>,
    created_ids: &BTreeMap<Id, Id>,
) -> Result<Vec<Id>, MethodError> {
    raw.iter().map(|id| resolve_id(id, created_ids)).collect()
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::jmap::error::MethodErrorType;

    fn object(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(o) => o,
            _ => panic!("not an object"),
        }
    }

    fn responses() -> Vec<InvocationResponse> {
        vec![
            InvocationResponse::success(
                "Test/query",
                json!({"ids": ["a", "b"], "accountId": "acc"}),
                "c0",
            ),
            InvocationResponse::error(MethodError::server_fail(), "c1"),
            InvocationResponse::success(
                "Test/get",
                json!({"list": [{"id": "a", "emailIds": ["1"]}]}),
                "c2",
            ),
        ]
    }

    fn expand(
        v: Value,
        documented: Option<&[&str]>,
    ) -> Result<Map<String, Value>, MethodError> {
        let mut args = object(v);
        expand_references(&mut args, documented, &responses()).map(|_| args)
    }

    const GET: &[&str] = &["accountId", "ids", "properties"];

    #[test]
    fn expands_references() {
        let args = expand(
            json!({
                "accountId": "acc",
                "#ids": {"resultOf": "c0", "name": "Test/query", "path": "/ids"},
            }),
            Some(GET),
        )
        .unwrap();
        assert_eq!(json!({"accountId": "acc", "ids": ["a", "b"]}), json!(args));

        let args = expand(
            json!({
                "#ids": {
                    "resultOf": "c2",
                    "name": "Test/get",
                    "path": "/list/*/emailIds",
                },
            }),
            Some(GET),
        )
        .unwrap();
        assert_eq!(json!({"ids": ["1"]}), json!(args));
    }

    #[test]
    fn both_forms_conflict() {
        let err = expand(
            json!({
                "accountId": "abc",
                "#accountId": {
                    "resultOf": "c1",
                    "name": "Test/get",
                    "path": "/ids",
                },
                "ids": ["id1"],
            }),
            Some(GET),
        )
        .unwrap_err();
        assert_eq!(MethodErrorType::InvalidArguments, err.kind);
        assert_eq!(
            Some("cannot use 'accountId' and '#accountId' together"),
            err.description.as_deref()
        );

        // An empty or null plain value does not count
        for empty in &[json!(""), json!(null), json!([])] {
            assert!(expand(
                json!({
                    "ids": empty,
                    "#ids": {
                        "resultOf": "c0",
                        "name": "Test/query",
                        "path": "/ids",
                    },
                }),
                Some(GET),
            )
            .is_ok());
        }
    }

    #[test]
    fn bad_references() {
        let cases = vec![
            json!({"resultOf": "nope", "name": "Test/query", "path": "/ids"}),
            json!({"resultOf": "c0", "name": "Test/get", "path": "/ids"}),
            json!({"resultOf": "c1", "name": "Test/get", "path": "/ids"}),
            json!({"resultOf": "c0", "name": "Test/query", "path": "/nope"}),
            json!({"resultOf": "c0", "name": "Test/query", "path": "ids"}),
            json!({"resultOf": "c0", "name": "Test/query"}),
            json!("c0"),
        ];

        for case in cases {
            let err = expand(json!({ "#ids": case }), Some(GET)).unwrap_err();
            assert_eq!(MethodErrorType::InvalidResultReference, err.kind);
        }
    }

    #[test]
    fn undocumented_reference_rejected() {
        let reference =
            json!({"resultOf": "c0", "name": "Test/query", "path": "/ids"});
        let err = expand(json!({ "#bogus": reference }), Some(GET)).unwrap_err();
        assert_eq!(MethodErrorType::InvalidArguments, err.kind);

        let args = expand(json!({ "#bogus": reference }), None).unwrap();
        assert_eq!(json!({"bogus": ["a", "b"]}), json!(args));
    }

    #[test]
    fn field_binding() {
        let mut args = Arguments::new(object(json!({
            "accountId": "a1",
            "ids": null,
            "maxChanges": -1,
            "keyword": "$seen",
            "junk": 1,
        })));

        assert_eq!("a1", args.require::<String>("accountId").unwrap());
        assert_eq!(None, args.take::<Vec<Id>>("ids").unwrap());
        assert!(!args.take_or_default::<bool>("calculateTotal").unwrap());

        let err = args
            .take::<crate::jmap::types::UnsignedInt>("maxChanges")
            .unwrap_err();
        assert_eq!(MethodErrorType::InvalidArguments, err.kind);
        assert!(err.description.unwrap().contains("'maxChanges'"));

        assert!(args.require::<String>("sinceState").is_err());
        assert_eq!(
            json!({"keyword": "$seen"}),
            json!(args.take_extra(&["keyword"]))
        );

        let err = args.finish().unwrap_err();
        assert_eq!(Some("unknown argument 'junk'"), err.description.as_deref());
    }

    #[test]
    fn creation_ids() {
        let mut created = BTreeMap::new();
        created.insert(Id::of("k1"), Id::of("m42"));

        assert_eq!(Id::of("m42"), resolve_id("#k1", &created).unwrap());
        assert_eq!(Id::of("m1"), resolve_id("m1", &created).unwrap());
        assert_eq!(
            MethodErrorType::InvalidArguments,
            resolve_id("#k2", &created).unwrap_err().kind
        );
        assert_eq!(
            MethodErrorType::InvalidArguments,
            resolve_id("", &created).unwrap_err().kind
        );
    }
}
