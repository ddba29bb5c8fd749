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

//! The session resource (RFC 8620 §2) and the session state derived from it.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tiny_keccak::{Hasher, Sha3};

use super::capability::Registry;
use super::types::Id;
use crate::account::resolver::AccountSummary;
use crate::support::system_config::HttpConfig;

/// The URLs advertised in the session document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionUrls {
    pub api_url: String,
    pub download_url: String,
    pub upload_url: String,
    pub event_source_url: String,
}

impl SessionUrls {
    pub fn from_config(config: &HttpConfig) -> Self {
        let base = config.base_url.trim_end_matches('/');
        SessionUrls {
            api_url: format!("{}{}", base, config.api_path),
            download_url: format!(
                "{base}/jmap/download/{{accountId}}/{{blobId}}/{{name}}\
                 ?accept={{type}}"
            ),
            upload_url: format!("{base}/jmap/upload/{{accountId}}/"),
            event_source_url: format!(
                "{base}/jmap/eventsource/?types={{types}}\
                 &closeafter={{closeafter}}&ping={{ping}}"
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub name: String,
    pub is_personal: bool,
    pub is_read_only: bool,
    pub account_capabilities: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDocument {
    pub capabilities: BTreeMap<String, Value>,
    pub accounts: BTreeMap<Id, AccountInfo>,
    pub primary_accounts: BTreeMap<String, Id>,
    pub username: String,
    pub api_url: String,
    pub download_url: String,
    pub upload_url: String,
    pub event_source_url: String,
    pub state: String,
}

impl SessionDocument {
    /// Build the session document for a user and compute its state.
    pub fn new<A>(
        registry: &Registry<A>,
        username: &str,
        accounts: Vec<AccountSummary>,
        primary_account: Option<Id>,
        urls: &SessionUrls,
    ) -> Result<Self, serde_json::Error> {
        let account_capabilities = registry
            .capabilities()
            .filter_map(|c| {
                c.account_info
                    .as_ref()
                    .map(|info| (c.urn.clone(), info.clone()))
            })
            .collect::<BTreeMap<_, _>>();

        let primary_accounts = match primary_account {
            Some(primary) => account_capabilities
                .keys()
                .map(|urn| (urn.clone(), primary.clone()))
                .collect(),
            None => BTreeMap::new(),
        };

        let accounts = accounts
            .into_iter()
            .map(|summary| {
                (
                    summary.id,
                    AccountInfo {
                        name: summary.name,
                        is_personal: summary.is_personal,
                        is_read_only: summary.is_read_only,
                        account_capabilities: account_capabilities.clone(),
                    },
                )
            })
            .collect();

        let mut document = SessionDocument {
            capabilities: registry.session_capabilities(),
            accounts,
            primary_accounts,
            username: username.to_owned(),
            api_url: urls.api_url.clone(),
            download_url: urls.download_url.clone(),
            upload_url: urls.upload_url.clone(),
            event_source_url: urls.event_source_url.clone(),
            state: String::new(),
        };
        document.state = document.compute_state()?;
        Ok(document)
    }

    /// The state is a SHA3-256 over the JSON form of the document with an
    /// empty `state`, in unpadded URL-safe base64.
    fn compute_state(&self) -> Result<String, serde_json::Error> {
        debug_assert!(self.state.is_empty());
        let serialised = serde_json::to_vec(self)?;

        let mut hasher = Sha3::v256();
        hasher.update(&serialised);
        let mut hash = [0u8; 32];
        hasher.finalize(&mut hash);

        Ok(base64::encode_config(&hash, base64::URL_SAFE_NO_PAD))
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::jmap::capability::{Capability, CoreCapability, MAIL};

    fn registry() -> Registry<()> {
        Registry::new(
            CoreCapability::default(),
            vec![Capability::new(MAIL, json!({}), vec![])
                .with_account_info(json!({"maxMailboxDepth": 10}))],
        )
        .unwrap()
    }

    fn summary(id: &str) -> AccountSummary {
        AccountSummary {
            id: Id::of(id),
            name: format!("{id}@example.com"),
            is_personal: true,
            is_read_only: false,
        }
    }

    fn urls() -> SessionUrls {
        SessionUrls::from_config(&HttpConfig {
            base_url: "https://mail.example.com/".to_owned(),
            ..HttpConfig::default()
        })
    }

    #[test]
    fn document_shape() {
        let document = SessionDocument::new(
            &registry(),
            "azure",
            vec![summary("a1")],
            Some(Id::of("a1")),
            &urls(),
        )
        .unwrap();

        let value = serde_json::to_value(&document).unwrap();
        assert_eq!("azure", value["username"]);
        assert_eq!("https://mail.example.com/jmap/api", value["apiUrl"]);
        assert_eq!(
            "https://mail.example.com/jmap/upload/{accountId}/",
            value["uploadUrl"]
        );
        assert_eq!(json!({MAIL: "a1"}), value["primaryAccounts"]);
        assert_eq!(
            json!({
                "name": "a1@example.com",
                "isPersonal": true,
                "isReadOnly": false,
                "accountCapabilities": {MAIL: {"maxMailboxDepth": 10}},
            }),
            value["accounts"]["a1"]
        );
        assert!(value["capabilities"]
            .as_object()
            .unwrap()
            .contains_key("urn:ietf:params:jmap:core"));
        // 32 bytes in unpadded base64
        assert_eq!(43, document.state.len());
    }

    #[test]
    fn state_tracks_content() {
        let registry = registry();
        let make = |accounts: Vec<AccountSummary>| {
            SessionDocument::new(&registry, "azure", accounts, None, &urls())
                .unwrap()
                .state
        };

        assert_eq!(make(vec![summary("a1")]), make(vec![summary("a1")]));
        assert_ne!(
            make(vec![summary("a1")]),
            make(vec![summary("a1"), summary("a2")])
        );
    }
}
