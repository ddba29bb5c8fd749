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

//! The `Filter` and `Comparator` arguments of `Foo/query` and
//! `Foo/queryChanges`.

use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operator {
    And,
    Or,
    Not,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FilterOperator {
    pub operator: Operator,
    pub conditions: Vec<Filter>,
}

/// A single `property: value` test. What the test means is up to the
/// datatype.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterCondition {
    pub property: String,
    pub value: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Operator(FilterOperator),
    Condition(FilterCondition),
}

impl Filter {
    /// Decode a filter from its JSON form.
    ///
    /// An object with an `operator` key is a `FilterOperator` and must have
    /// exactly the keys `operator` and `conditions`. Anything else must be an
    /// object with exactly one key, which is a `FilterCondition`.
    pub fn from_value(value: Value) -> Result<Self, String> {
        let mut object = match value {
            Value::Object(object) => object,
            other => {
                return Err(format!("filter must be an object, got {other}"))
            }
        };

        if object.contains_key("operator") {
            if object.len() != 2 || !object.contains_key("conditions") {
                return Err(
                    "filter operator must have exactly 'operator' and \
                     'conditions'"
                        .to_owned(),
                );
            }

            let operator = serde_json::from_value::<Operator>(
                object.remove("operator").unwrap_or(Value::Null),
            )
            .map_err(|e| format!("bad filter operator: {e}"))?;
            let conditions = match object.remove("conditions") {
                Some(Value::Array(conditions)) => conditions
                    .into_iter()
                    .map(Filter::from_value)
                    .collect::<Result<Vec<_>, _>>()?,
                _ => {
                    return Err(
                        "filter operator conditions must be an array"
                            .to_owned(),
                    )
                }
            };

            match (operator, conditions.len()) {
                (Operator::Not, 1) => (),
                (Operator::Not, n) => {
                    return Err(format!(
                        "NOT takes exactly one condition, got {n}"
                    ))
                }
                (_, n) if n < 2 => {
                    return Err(format!(
                        "{operator:?} takes at least two conditions, got {n}"
                    ))
                }
                _ => (),
            }

            return Ok(Filter::Operator(FilterOperator {
                operator,
                conditions,
            }));
        }

        if object.len() != 1 {
            return Err(format!(
                "filter condition must have exactly one property, got {}",
                object.len()
            ));
        }

        match object.into_iter().next() {
            Some((property, value)) => {
                Ok(Filter::Condition(FilterCondition { property, value }))
            }
            None => Err("filter condition is empty".to_owned()),
        }
    }

    /// Evaluate the filter, delegating each condition to `test`.
    pub fn evaluate(
        &self,
        test: &mut impl FnMut(&FilterCondition) -> bool,
    ) -> bool {
        match *self {
            Filter::Condition(ref c) => test(c),
            Filter::Operator(FilterOperator {
                operator: Operator::And,
                ref conditions,
            }) => conditions.iter().all(|c| c.evaluate(test)),
            Filter::Operator(FilterOperator {
                operator: Operator::Or,
                ref conditions,
            }) => conditions.iter().any(|c| c.evaluate(test)),
            Filter::Operator(FilterOperator {
                operator: Operator::Not,
                ref conditions,
            }) => !conditions.iter().any(|c| c.evaluate(test)),
        }
    }

    /// Iterate over every condition in the filter, depth first.
    pub fn conditions(&self) -> Vec<&FilterCondition> {
        let mut out = Vec::new();
        self.collect_conditions(&mut out);
        out
    }

    fn collect_conditions<'a>(&'a self, out: &mut Vec<&'a FilterCondition>) {
        match *self {
            Filter::Condition(ref c) => out.push(c),
            Filter::Operator(ref o) => {
                for c in &o.conditions {
                    c.collect_conditions(out);
                }
            }
        }
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Filter::from_value(Value::deserialize(d)?).map_err(de::Error::custom)
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match *self {
            Filter::Operator(ref o) => {
                let mut map = s.serialize_map(Some(2))?;
                map.serialize_entry("operator", &o.operator)?;
                map.serialize_entry("conditions", &o.conditions)?;
                map.end()
            }
            Filter::Condition(ref c) => {
                let mut map = s.serialize_map(Some(1))?;
                map.serialize_entry(&c.property, &c.value)?;
                map.end()
            }
        }
    }
}

/// A sort criterion.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparator {
    pub property: String,
    #[serde(default = "default_ascending")]
    pub is_ascending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collation: Option<String>,
    /// Datatype-specific extra arguments, such as `keyword` for `Email`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_ascending() -> bool {
    true
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.property,
            if self.is_ascending { "asc" } else { "desc" }
        )
    }
}
