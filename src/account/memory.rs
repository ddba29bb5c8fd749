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

//! The bundled account store, which keeps every account in memory for the
//! lifetime of the process.
//!
//! Which accounts exist and who may open them comes from the `users` and
//! `accounts` tables of the system configuration.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::trace;

use super::mailbox::Mailboxes;
use super::resolver::{AccountResolver, AccountSummary, Principal};
use crate::jmap::error::MethodError;
use crate::jmap::types::Id;
use crate::support::error::Error;
use crate::support::system_config::{SystemConfig, UserConfig};

/// The mutable content of one account.
#[derive(Debug, Default)]
pub struct AccountData {
    pub mailboxes: Mailboxes,
}

/// An account opened by one principal.
///
/// Handles to the same account share its data.
#[derive(Clone, Debug)]
pub struct AccountHandle {
    id: Id,
    data: Arc<Mutex<AccountData>>,
    read_only: bool,
}

impl AccountHandle {
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Whether the principal that opened this handle may only read it.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Lock the account data.
    ///
    /// A method that panicked while holding the lock has already been
    /// reported as `serverFail`; the data stays usable afterwards.
    pub fn lock(&self) -> MutexGuard<'_, AccountData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub fn for_test(id: &str, read_only: bool) -> Self {
        AccountHandle {
            id: Id::of(id),
            data: Arc::new(Mutex::new(AccountData::default())),
            read_only,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Access {
    ReadOnly,
    ReadWrite,
    Owner,
}

#[derive(Debug)]
struct StoredAccount {
    name: String,
    owner: Option<String>,
    data: Arc<Mutex<AccountData>>,
}

#[derive(Debug)]
pub struct MemoryDirectory {
    users: BTreeMap<String, UserConfig>,
    accounts: BTreeMap<Id, StoredAccount>,
}

impl MemoryDirectory {
    pub fn new(config: &SystemConfig) -> Result<Self, Error> {
        config.validate()?;

        let mut accounts = BTreeMap::new();
        for (raw_id, account) in &config.accounts {
            let id = Id::new(raw_id.clone())
                .map_err(|_| Error::BadAccountId(raw_id.clone()))?;
            accounts.insert(
                id,
                StoredAccount {
                    name: account.name.clone(),
                    owner: account.owner.clone(),
                    data: Arc::new(Mutex::new(AccountData::default())),
                },
            );
        }

        Ok(MemoryDirectory {
            users: config.users.clone(),
            accounts,
        })
    }

    fn access(&self, username: &str, id: &Id) -> Option<Access> {
        let account = self.accounts.get(id)?;
        if Some(username) == account.owner.as_deref() {
            return Some(Access::Owner);
        }

        let user = self.users.get(username)?;
        if user.accounts.iter().any(|a| a == id.as_str()) {
            Some(Access::ReadWrite)
        } else if user.read_only_accounts.iter().any(|a| a == id.as_str()) {
            Some(Access::ReadOnly)
        } else {
            None
        }
    }
}

impl AccountResolver for MemoryDirectory {
    type Account = AccountHandle;

    fn open(
        &self,
        principal: &Principal,
        account_id: &Id,
    ) -> Result<AccountHandle, MethodError> {
        let access = self
            .access(&principal.username, account_id)
            .ok_or_else(MethodError::account_not_found)?;
        let account = self
            .accounts
            .get(account_id)
            .ok_or_else(MethodError::account_not_found)?;

        Ok(AccountHandle {
            id: account_id.clone(),
            data: Arc::clone(&account.data),
            read_only: Access::ReadOnly == access,
        })
    }

    fn close(&self, account: AccountHandle) {
        trace!("Released handle on account {}", account.id);
    }

    fn accounts(&self, principal: &Principal) -> Vec<AccountSummary> {
        self.accounts
            .iter()
            .filter_map(|(id, account)| {
                self.access(&principal.username, id).map(|access| {
                    AccountSummary {
                        id: id.clone(),
                        name: account.name.clone(),
                        is_personal: Access::Owner == access,
                        is_read_only: Access::ReadOnly == access,
                    }
                })
            })
            .collect()
    }

    fn primary_account(&self, principal: &Principal) -> Option<Id> {
        self.accounts
            .iter()
            .find(|(_, account)| {
                Some(principal.username.as_str()) == account.owner.as_deref()
            })
            .map(|(id, _)| id.clone())
    }
}
