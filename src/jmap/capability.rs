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

//! The registry of capabilities and the datatypes they provide.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::method::{Datatype, EchoMethod};
use super::types::UnsignedInt;
use crate::support::error::Error;

pub const CORE: &str = "urn:ietf:params:jmap:core";
pub const MAIL: &str = "urn:ietf:params:jmap:mail";

/// The limits and collations of `urn:ietf:params:jmap:core`.
///
/// The configuration file spells the fields in snake case; the session
/// document uses the camel case names of RFC 8620 §2.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(
    rename_all(serialize = "camelCase", deserialize = "snake_case"),
    default
)]
pub struct CoreCapability {
    pub max_size_upload: UnsignedInt,
    pub max_concurrent_upload: UnsignedInt,
    pub max_size_request: UnsignedInt,
    pub max_concurrent_requests: UnsignedInt,
    pub max_calls_in_request: UnsignedInt,
    pub max_objects_in_get: UnsignedInt,
    pub max_objects_in_set: UnsignedInt,
    pub collation_algorithms: Vec<String>,
}

impl Default for CoreCapability {
    fn default() -> Self {
        CoreCapability {
            max_size_upload: UnsignedInt(50_000_000),
            max_concurrent_upload: UnsignedInt(4),
            max_size_request: UnsignedInt(10_000_000),
            max_concurrent_requests: UnsignedInt(4),
            max_calls_in_request: UnsignedInt(16),
            max_objects_in_get: UnsignedInt(500),
            max_objects_in_set: UnsignedInt(500),
            collation_algorithms: vec![
                "i;ascii-numeric".to_owned(),
                "i;ascii-casemap".to_owned(),
                "i;unicode-casemap".to_owned(),
            ],
        }
    }
}

/// A capability: a URN, the value it contributes to the session document,
/// and the datatypes it makes available.
pub struct Capability<A> {
    pub urn: String,
    pub info: Value,
    /// The value listed under `accountCapabilities` of every account, if the
    /// capability applies to accounts at all.
    pub account_info: Option<Value>,
    pub datatypes: Vec<Box<dyn Datatype<A>>>,
}

impl<A> Capability<A> {
    pub fn new(
        urn: impl Into<String>,
        info: Value,
        datatypes: Vec<Box<dyn Datatype<A>>>,
    ) -> Self {
        Capability {
            urn: urn.into(),
            info,
            account_info: None,
            datatypes,
        }
    }

    pub fn with_account_info(mut self, account_info: Value) -> Self {
        self.account_info = Some(account_info);
        self
    }
}

/// The `Core` datatype, whose only method is `Core/echo`.
pub struct CoreType;

impl EchoMethod for CoreType {}

impl<A> Datatype<A> for CoreType {
    fn name(&self) -> &str {
        "Core"
    }

    fn echo(&self) -> Option<&dyn EchoMethod> {
        Some(self)
    }
}

/// The set of all capabilities known to the server.
///
/// This is built once at startup and never modified.
pub struct Registry<A> {
    core: CoreCapability,
    capabilities: Vec<Capability<A>>,
}

#[cfg(test)]
impl<A> std::fmt::Debug for Registry<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<A: 'static> Registry<A> {
    /// Build a registry from the core limits and the other capabilities.
    ///
    /// The core capability (and its `Core` datatype) is added implicitly.
    /// Fails if a capability is listed twice or a datatype name is used more
    /// than once.
    pub fn new(
        core: CoreCapability,
        others: Vec<Capability<A>>,
    ) -> Result<Self, Error> {
        let core_info = serde_json::to_value(&core)?;
        let mut capabilities = vec![Capability::new(
            CORE,
            core_info,
            vec![Box::new(CoreType) as Box<dyn Datatype<A>>],
        )];
        capabilities.extend(others);

        let mut urns = HashSet::new();
        let mut datatypes = HashSet::new();
        for capability in &capabilities {
            if !urns.insert(capability.urn.clone()) {
                return Err(Error::DuplicateCapability(capability.urn.clone()));
            }

            for datatype in &capability.datatypes {
                if !datatypes.insert(datatype.name().to_owned()) {
                    return Err(Error::DuplicateDatatype(
                        datatype.name().to_owned(),
                    ));
                }
            }
        }

        if !urns.contains(CORE) {
            return Err(Error::MissingCoreCapability);
        }

        Ok(Registry { core, capabilities })
    }
}

impl<A> Registry<A> {
    pub fn core(&self) -> &CoreCapability {
        &self.core
    }

    pub fn has_capability(&self, urn: &str) -> bool {
        self.capabilities.iter().any(|c| c.urn == urn)
    }

    pub fn capabilities(&self) -> impl Iterator<Item = &Capability<A>> + '_ {
        self.capabilities.iter()
    }

    /// Find the datatype called `name`, considering only capabilities the
    /// client listed in `using`.
    pub fn datatype(
        &self,
        name: &str,
        using: &[String],
    ) -> Option<&dyn Datatype<A>> {
        self.capabilities
            .iter()
            .filter(|c| using.iter().any(|u| *u == c.urn))
            .flat_map(|c| c.datatypes.iter())
            .find(|d| d.name() == name)
            .map(|d| &**d)
    }

    /// The `capabilities` object of the session document.
    pub fn session_capabilities(&self) -> BTreeMap<String, Value> {
        self.capabilities
            .iter()
            .map(|c| (c.urn.clone(), c.info.clone()))
            .collect()
    }
}
