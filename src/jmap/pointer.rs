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

//! JSON Pointer (RFC 6901) evaluation, with the `*` extension of RFC 8620
//! §3.7.
//!
//! The extension lets a result reference collect one property from every
//! element of an array, e.g. `/list/*/id` to get the ids of everything a
//! `Foo/get` returned. When the collected property is itself an array, its
//! elements are spliced into the output instead of nesting, so that
//! `/list/*/emailIds` yields one flat list of email ids.

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PointerError {
    #[error("pointer '{0}' does not start with '/'")]
    NotAbsolute(String),
    #[error("no property at '{0}'")]
    NoSuchProperty(String),
    #[error("'{0}' is not a valid array index")]
    BadIndex(String),
    #[error("array index at '{0}' is out of range")]
    IndexOutOfRange(String),
    #[error("value at '{0}' is neither an object nor an array")]
    NotAContainer(String),
    #[error("'*' at '{0}' must be followed by exactly one property name")]
    BadWildcard(String),
    #[error("element {1} of the array at '{0}' is not an object")]
    WildcardNotObject(String, usize),
}

/// Split `pointer` into its unescaped reference tokens.
///
/// The empty pointer yields no tokens (i.e., refers to the whole document).
pub fn parse(pointer: &str) -> Result<Vec<String>, PointerError> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }

    if !pointer.starts_with('/') {
        return Err(PointerError::NotAbsolute(pointer.to_owned()));
    }

    Ok(pointer[1..].split('/').map(unescape).collect())
}

/// Decode `~1` and `~0`, in that order, so that `~01` becomes `~1` rather
/// than `/`.
pub fn unescape(token: &str) -> String {
    if !token.contains('~') {
        return token.to_owned();
    }

    token.replace("~1", "/").replace("~0", "~")
}

pub fn escape(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn format(tokens: &[String]) -> String {
    let mut out = String::new();
    for token in tokens {
        out.push('/');
        out.push_str(&escape(token));
    }
    out
}

/// Parse an RFC 6901 array index, which forbids leading zeroes and signs.
fn parse_index(token: &str) -> Option<usize> {
    if token.is_empty()
        || (token.len() > 1 && token.starts_with('0'))
        || !token.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    token.parse().ok()
}

/// Evaluate `pointer` against `root`.
///
/// A `*` token applied to an empty array produces `null`.
pub fn resolve(root: &Value, pointer: &str) -> Result<Value, PointerError> {
    let tokens = parse(pointer)?;
    let mut current = root;

    for (ix, token) in tokens.iter().enumerate() {
        let traversed = &tokens[..=ix];
        current = match *current {
            Value::Object(ref object) => object
                .get(token.as_str())
                .ok_or_else(|| PointerError::NoSuchProperty(format(traversed)))?,

            Value::Array(ref array) if "*" == token.as_str() => {
                return match tokens[ix + 1..] {
                    [ref property] => collect(array, property, traversed),
                    _ => Err(PointerError::BadWildcard(format(traversed))),
                };
            }

            Value::Array(ref array) => {
                let index = parse_index(token)
                    .ok_or_else(|| PointerError::BadIndex(format(traversed)))?;
                array.get(index).ok_or_else(|| {
                    PointerError::IndexOutOfRange(format(traversed))
                })?
            }

            _ => {
                return Err(PointerError::NotAContainer(format(
                    &tokens[..ix],
                )))
            }
        };
    }

    Ok(current.clone())
}

fn collect(
    array: &[Value],
    property: &str,
    traversed: &[String],
) -> Result<Value, PointerError> {
    if array.is_empty() {
        return Ok(Value::Null);
    }

    let mut out = Vec::with_capacity(array.len());
    for (ix, element) in array.iter().enumerate() {
        let object = element.as_object().ok_or_else(|| {
            PointerError::WildcardNotObject(format(traversed), ix)
        })?;
        match object.get(property) {
            Some(Value::Array(values)) => out.extend(values.iter().cloned()),
            Some(value) => out.push(value.clone()),
            None => {
                let mut path = traversed.to_vec();
                path.push(property.to_owned());
                return Err(PointerError::NoSuchProperty(format(&path)));
            }
        }
    }

    Ok(Value::Array(out))
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn rfc6901_document() -> Value {
        json!({
            "foo": ["bar", "baz"],
            "": 0,
            "a/b": 1,
            "c%d": 2,
            "e^f": 3,
            "g|h": 4,
            "i\\j": 5,
            "k\"l": 6,
            " ": 7,
            "m~n": 8,
        })
    }

    #[test]
    fn rfc6901_examples() {
        let doc = rfc6901_document();
        assert_eq!(doc, resolve(&doc, "").unwrap());
        assert_eq!(json!(["bar", "baz"]), resolve(&doc, "/foo").unwrap());
        assert_eq!(json!("bar"), resolve(&doc, "/foo/0").unwrap());
        assert_eq!(json!(0), resolve(&doc, "/").unwrap());
        assert_eq!(json!(1), resolve(&doc, "/a~1b").unwrap());
        assert_eq!(json!(2), resolve(&doc, "/c%d").unwrap());
        assert_eq!(json!(3), resolve(&doc, "/e^f").unwrap());
        assert_eq!(json!(4), resolve(&doc, "/g|h").unwrap());
        assert_eq!(json!(5), resolve(&doc, "/i\\j").unwrap());
        assert_eq!(json!(6), resolve(&doc, "/k\"l").unwrap());
        assert_eq!(json!(7), resolve(&doc, "/ ").unwrap());
        assert_eq!(json!(8), resolve(&doc, "/m~0n").unwrap());
    }

    #[test]
    fn unescape_order() {
        assert_eq!("~1", unescape("~01"));
        assert_eq!("/", unescape("~1"));
        assert_eq!("a~b/c", unescape("a~0b~1c"));
        assert_eq!("~01", escape("~1"));
    }

    #[test]
    fn errors() {
        let doc = rfc6901_document();
        assert_matches!(
            Err(PointerError::NotAbsolute(_)),
            resolve(&doc, "foo")
        );
        assert_eq!(
            Err(PointerError::NoSuchProperty("/nope".to_owned())),
            resolve(&doc, "/nope")
        );
        assert_matches!(
            Err(PointerError::IndexOutOfRange(_)),
            resolve(&doc, "/foo/2")
        );
        assert_matches!(Err(PointerError::BadIndex(_)), resolve(&doc, "/foo/01"));
        assert_matches!(Err(PointerError::BadIndex(_)), resolve(&doc, "/foo/-"));
        assert_matches!(
            Err(PointerError::NotAContainer(_)),
            resolve(&doc, "/foo/0/x")
        );
    }

    #[test]
    fn null_is_not_absent() {
        let doc = json!({"a": null});
        assert_eq!(Value::Null, resolve(&doc, "/a").unwrap());
        assert!(resolve(&doc, "/b").is_err());
    }

    #[test]
    fn wildcard_flattens() {
        let doc = json!({
            "list": [{"emailIds": ["2"]}, {"emailIds": ["1"]}],
        });
        assert_eq!(json!(["2", "1"]), resolve(&doc, "/list/*/emailIds").unwrap());

        let doc = json!({
            "list": [{"id": "a", "n": [1, [2]]}, {"id": "b", "n": 3}],
        });
        assert_eq!(json!(["a", "b"]), resolve(&doc, "/list/*/id").unwrap());
        // Only one level is flattened
        assert_eq!(json!([1, [2], 3]), resolve(&doc, "/list/*/n").unwrap());
    }

    #[test]
    fn wildcard_on_empty_array_is_null() {
        let doc = json!({"list": []});
        assert_eq!(Value::Null, resolve(&doc, "/list/*/emailIds").unwrap());
    }

    #[test]
    fn wildcard_errors() {
        let doc = json!({"list": [{"id": "a"}, {"other": "b"}, 3]});
        assert_eq!(
            Err(PointerError::NoSuchProperty("/list/*/id".to_owned())),
            resolve(&doc, "/list/*/id")
        );
        assert_matches!(
            Err(PointerError::BadWildcard(_)),
            resolve(&doc, "/list/*")
        );
        assert_matches!(
            Err(PointerError::BadWildcard(_)),
            resolve(&doc, "/list/*/id/x")
        );

        let doc = json!({"list": [{"id": "a"}, 3]});
        assert_matches!(
            Err(PointerError::WildcardNotObject(_, 1)),
            resolve(&doc, "/list/*/id")
        );
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i32>().prop_map(Value::from),
            "[a-z]{0,4}".prop_map(Value::from),
        ];
        leaf.prop_recursive(4, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
                prop::collection::btree_map("[a-c*]", inner, 0..4).prop_map(
                    |m| Value::Object(m.into_iter().collect())
                ),
            ]
        })
    }

    proptest! {
        #[test]
        fn empty_pointer_is_identity(
            v in arb_json(),
            tokens in prop::collection::vec("[a-c0-2*]", 0..4),
        ) {
            prop_assert_eq!(&v, &resolve(&v, "").unwrap());

            let pointer = format(&tokens);
            if let Ok(resolved) = resolve(&v, &pointer) {
                prop_assert_eq!(&resolved, &resolve(&resolved, "").unwrap());
            }
        }
    }
}
