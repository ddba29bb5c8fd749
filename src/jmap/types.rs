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

//! The base value types of RFC 8620 §1.2 to §1.4.

use std::borrow::Borrow;
use std::convert::TryFrom;
use std::fmt;

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

use super::pointer;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid Id '{0}'")]
    InvalidId(String),
    #[error("{0} is out of range for UnsignedInt")]
    UnsignedOutOfRange(String),
    #[error("invalid date-time '{0}'")]
    InvalidDate(String),
    #[error("patch path '{0}' does not start with '/'")]
    InvalidPatchPath(String),
}

/// A JMAP `Id`: 1 to 255 characters from the URL-safe base64 alphabet.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Id(String);

impl Id {
    pub const MAX_LEN: usize = 255;

    pub fn new(raw: impl Into<String>) -> Result<Self, TypeError> {
        let raw = raw.into();
        if raw.is_empty()
            || raw.len() > Id::MAX_LEN
            || !raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(TypeError::InvalidId(raw));
        }

        Ok(Id(raw))
    }

    /// An id made of an ASCII letter and a number, which is always valid.
    pub fn numbered(prefix: char, n: u64) -> Self {
        debug_assert!(prefix.is_ascii_alphabetic());
        Id(format!("{prefix}{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[cfg(test)]
    pub fn of(raw: &str) -> Self {
        Id::new(raw).unwrap()
    }
}

impl TryFrom<String> for Id {
    type Error = TypeError;

    fn try_from(raw: String) -> Result<Self, TypeError> {
        Id::new(raw)
    }
}

impl From<Id> for String {
    fn from(id: Id) -> String {
        id.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Id {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A JMAP `UnsignedInt`, restricted to `0..=2^53-1` so that it survives a
/// trip through an IEEE 754 double.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnsignedInt(pub u64);

impl UnsignedInt {
    pub const MAX: Self = UnsignedInt((1u64 << 53) - 1);

    pub fn new(value: u64) -> Result<Self, TypeError> {
        if value > UnsignedInt::MAX.0 {
            Err(TypeError::UnsignedOutOfRange(value.to_string()))
        } else {
            Ok(UnsignedInt(value))
        }
    }

    /// Convert to `usize`, saturating on (exotic) platforms where `usize` is
    /// narrower than 53 bits.
    pub fn as_usize(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

impl From<u32> for UnsignedInt {
    fn from(v: u32) -> Self {
        UnsignedInt(v.into())
    }
}

impl fmt::Display for UnsignedInt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for UnsignedInt {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for UnsignedInt {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct UnsignedIntVisitor;

        impl<'de> Visitor<'de> for UnsignedIntVisitor {
            type Value = UnsignedInt;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "an integer between 0 and 2^53-1")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<UnsignedInt, E> {
                UnsignedInt::new(v).map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<UnsignedInt, E> {
                u64::try_from(v)
                    .map_err(|_| {
                        E::custom(TypeError::UnsignedOutOfRange(v.to_string()))
                    })
                    .and_then(|v| self.visit_u64(v))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<UnsignedInt, E> {
                if v.fract() != 0.0 || v < 0.0 || v > UnsignedInt::MAX.0 as f64
                {
                    Err(E::custom(TypeError::UnsignedOutOfRange(v.to_string())))
                } else {
                    self.visit_u64(v as u64)
                }
            }
        }

        d.deserialize_u64(UnsignedIntVisitor)
    }
}

/// A JMAP `Int`.
pub type Int = i64;

/// A JMAP `Date`: an RFC 3339 date-time which keeps its original offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Date(pub DateTime<FixedOffset>);

impl TryFrom<String> for Date {
    type Error = TypeError;

    fn try_from(raw: String) -> Result<Self, TypeError> {
        DateTime::parse_from_rfc3339(&raw)
            .map(Date)
            .map_err(|_| TypeError::InvalidDate(raw))
    }
}

impl From<Date> for String {
    fn from(date: Date) -> String {
        date.0.to_rfc3339_opts(SecondsFormat::AutoSi, false)
    }
}

/// A JMAP `UTCDate`: an RFC 3339 date-time normalised to UTC, always
/// serialised with a `Z` suffix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct UtcDate(pub DateTime<Utc>);

impl TryFrom<String> for UtcDate {
    type Error = TypeError;

    fn try_from(raw: String) -> Result<Self, TypeError> {
        DateTime::parse_from_rfc3339(&raw)
            .map(|d| UtcDate(d.with_timezone(&Utc)))
            .map_err(|_| TypeError::InvalidDate(raw))
    }
}

impl From<UtcDate> for String {
    fn from(date: UtcDate) -> String {
        date.0.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }
}

/// A `PatchObject` of RFC 8620 §5.3: JSON Pointer paths mapped to the new
/// value at that path, or `null` to remove it.
#[derive(Clone, Debug, Default, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct PatchObject(Map<String, Value>);

impl TryFrom<Map<String, Value>> for PatchObject {
    type Error = TypeError;

    fn try_from(map: Map<String, Value>) -> Result<Self, TypeError> {
        if let Some(bad) = map.keys().find(|k| !k.starts_with('/')) {
            return Err(TypeError::InvalidPatchPath(bad.clone()));
        }

        Ok(PatchObject(map))
    }
}

impl From<PatchObject> for Map<String, Value> {
    fn from(patch: PatchObject) -> Self {
        patch.0
    }
}

impl PatchObject {
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> + '_ {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Apply this patch to `target`.
    ///
    /// The parent of every patched path must already exist and be an object.
    /// On error, `target` may have been partially modified; callers wanting
    /// atomicity should patch a copy.
    pub fn apply(&self, target: &mut Value) -> Result<(), String> {
        for (path, value) in &self.0 {
            let tokens = pointer::parse(path).map_err(|e| e.to_string())?;
            let (last, parents) = match tokens.split_last() {
                Some(split) => split,
                None => return Err("cannot patch the whole object".to_owned()),
            };

            let mut cursor = &mut *target;
            for token in parents {
                cursor = cursor
                    .as_object_mut()
                    .and_then(|o| o.get_mut(token.as_str()))
                    .ok_or_else(|| format!("{path}: no such property"))?;
            }

            let object = cursor
                .as_object_mut()
                .ok_or_else(|| format!("{path}: parent is not an object"))?;
            if value.is_null() {
                object.remove(last.as_str());
            } else {
                object.insert(last.clone(), value.clone());
            }
        }

        Ok(())
    }
}
