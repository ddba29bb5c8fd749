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

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::Error;
use crate::jmap::capability::CoreCapability;
use crate::jmap::types::Id;

/// The system-wide configuration for the JMAP server.
///
/// This is stored in a file named `jmapd.toml` under the system root, which
/// is typically `/usr/local/etc/crymap-jmap` or `/etc/crymap-jmap`.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct SystemConfig {
    /// Configuration for the HTTP listener and the URLs advertised in the
    /// session document.
    #[serde(default)]
    pub http: HttpConfig,

    /// The limits advertised through `urn:ietf:params:jmap:core` and
    /// enforced on every API request.
    #[serde(default)]
    pub core: CoreCapability,

    /// Users permitted to log in, keyed by login name.
    #[serde(default)]
    pub users: BTreeMap<String, UserConfig>,

    /// Mail accounts, keyed by JMAP account id.
    #[serde(default)]
    pub accounts: BTreeMap<String, AccountConfig>,

    #[serde(default)]
    pub diagnostic: DiagnosticConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// The address to listen on.
    pub bind: SocketAddr,
    /// The origin clients use to reach the server, without a trailing slash.
    ///
    /// This is only used to build the URLs in the session document; it is
    /// the job of whatever reverse proxy sits in front of the server to make
    /// it true.
    pub base_url: String,
    /// The path of the API endpoint.
    pub api_path: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            base_url: "http://localhost:8080".to_owned(),
            api_path: "/jmap/api".to_owned(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct UserConfig {
    /// The user's password in argon2 "encoded" form, as produced by
    /// `crymap-jmap server hash-password`.
    pub password_hash: String,

    /// Accounts not owned by this user which the user may nonetheless open
    /// read-write.
    #[serde(default)]
    pub accounts: Vec<String>,

    /// Accounts not owned by this user which the user may open, but not
    /// modify.
    #[serde(default)]
    pub read_only_accounts: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct AccountConfig {
    /// The human-readable name shown in the session document.
    pub name: String,
    /// The user who owns this account. Accounts without an owner can only be
    /// reached through `accounts` or `read_only_accounts`.
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct DiagnosticConfig {
    /// If set, redirect standard error to this file on startup.
    pub stderr: Option<PathBuf>,
}

impl SystemConfig {
    /// Read and parse the configuration at `path`.
    ///
    /// This does not call `validate()`.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let data = fs::read(path)?;
        Ok(toml::from_slice(&data)?)
    }

    /// Check the cross-references between users and accounts.
    pub fn validate(&self) -> Result<(), Error> {
        for id in self.accounts.keys() {
            if Id::new(id.clone()).is_err() {
                return Err(Error::BadAccountId(id.clone()));
            }
        }

        for user in self.users.values() {
            for id in user.accounts.iter().chain(&user.read_only_accounts) {
                if !self.accounts.contains_key(id) {
                    return Err(Error::UnknownAccount(id.clone()));
                }
            }
        }

        Ok(())
    }
}
