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

//! Mapping of authenticated principals to account handles.

use std::collections::HashMap;

use log::{trace, warn};

use crate::jmap::error::MethodError;
use crate::jmap::types::Id;

/// The identity an authenticated request runs as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
}

impl Principal {
    pub fn new(username: impl Into<String>) -> Self {
        Principal {
            username: username.into(),
        }
    }
}

/// What the session document says about an account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountSummary {
    pub id: Id,
    pub name: String,
    pub is_personal: bool,
    pub is_read_only: bool,
}

/// Opens and closes accounts on behalf of principals.
pub trait AccountResolver: Send + Sync + 'static {
    type Account: Send + 'static;

    /// Open `account_id` for `principal`.
    ///
    /// An account which does not exist or which the principal may not access
    /// is `accountNotFound`.
    fn open(
        &self,
        principal: &Principal,
        account_id: &Id,
    ) -> Result<Self::Account, MethodError>;

    fn close(&self, account: Self::Account);

    /// All accounts `principal` can access, in a stable order.
    fn accounts(&self, principal: &Principal) -> Vec<AccountSummary>;

    fn primary_account(&self, principal: &Principal) -> Option<Id>;
}

/// The accounts opened over the course of one request.
///
/// Each account is opened at most once; every handle is returned to the
/// resolver by `close_all` or, failing that, on drop.
pub struct AccountCache<'a, R: AccountResolver> {
    resolver: &'a R,
    principal: &'a Principal,
    open: HashMap<Id, R::Account>,
}

impl<'a, R: AccountResolver> AccountCache<'a, R> {
    pub fn new(resolver: &'a R, principal: &'a Principal) -> Self {
        AccountCache {
            resolver,
            principal,
            open: HashMap::new(),
        }
    }

    /// Make sure `account_id` is open.
    pub fn ensure(&mut self, account_id: &Id) -> Result<(), MethodError> {
        if !self.open.contains_key(account_id) {
            let account = self.resolver.open(self.principal, account_id)?;
            trace!(
                "Opened account {} for {}",
                account_id,
                self.principal.username
            );
            self.open.insert(account_id.clone(), account);
        }

        Ok(())
    }

    /// Return an account which has already been opened with `ensure`.
    pub fn handle(&self, account_id: &Id) -> Option<&R::Account> {
        self.open.get(account_id)
    }

    pub fn open(
        &mut self,
        account_id: &Id,
    ) -> Result<&R::Account, MethodError> {
        self.ensure(account_id)?;
        self.handle(account_id)
            .ok_or_else(MethodError::account_not_found)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn close_all(&mut self) {
        for (id, account) in self.open.drain() {
            trace!("Closing account {} for {}", id, self.principal.username);
            self.resolver.close(account);
        }
    }
}

impl<R: AccountResolver> Drop for AccountCache<'_, R> {
    fn drop(&mut self) {
        if !self.open.is_empty() {
            warn!(
                "{} account(s) of {} still open at end of request",
                self.open.len(),
                self.principal.username
            );
            self.close_all();
        }
    }
}
