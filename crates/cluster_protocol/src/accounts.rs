//! Account storage seam.
//!
//! Persistent account storage lives outside this workspace. Servers only
//! need to read an account's authority and, on the registry console, change
//! authority or password; [`AccountStore`] is that contract and
//! [`MemoryAccountStore`] the in-process implementation used by default and
//! in tests.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Well-known authority levels.
pub mod authority {
    pub const PLAYER: i32 = 0;
    pub const VIP: i32 = 1;
    pub const GM: i32 = 50;
    pub const ADMIN: i32 = 99;
}

/// One account as the servers see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub name: String,
    #[serde(default)]
    pub authority: i32,
    /// Hex SHA-256 of the password, if one was ever set
    #[serde(default)]
    pub password_hash: Option<String>,
}

/// Account lookups and updates shared by the registry and channel consoles.
pub trait AccountStore: Send + Sync {
    /// Authority level of `account`, `None` if the account does not exist.
    fn authority(&self, account: &str) -> Option<i32>;

    /// Whether `account` exists.
    fn account_exists(&self, account: &str) -> bool {
        self.authority(account).is_some()
    }

    /// Returns `false` when the account does not exist.
    fn change_auth(&self, account: &str, level: i32) -> bool;

    /// Returns `false` when the account does not exist.
    fn set_password(&self, account: &str, password_hash: &str) -> bool;
}

/// Accounts held in memory, keyed case-insensitively by name.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: RwLock<HashMap<String, AccountRecord>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled with `records`; later records win on duplicate names.
    pub fn with_accounts(records: impl IntoIterator<Item = AccountRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }

    /// Adds or replaces one account.
    pub fn insert(&self, record: AccountRecord) {
        self.accounts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.name.to_ascii_lowercase(), record);
    }

    /// Copy of one account record, looked up case-insensitively.
    pub fn get(&self, account: &str) -> Option<AccountRecord> {
        self.accounts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&account.to_ascii_lowercase())
            .cloned()
    }
}

impl AccountStore for MemoryAccountStore {
    fn authority(&self, account: &str) -> Option<i32> {
        self.get(account).map(|record| record.authority)
    }

    fn change_auth(&self, account: &str, level: i32) -> bool {
        let mut accounts = self.accounts.write().unwrap_or_else(|e| e.into_inner());
        match accounts.get_mut(&account.to_ascii_lowercase()) {
            Some(record) => {
                record.authority = level;
                true
            }
            None => false,
        }
    }

    fn set_password(&self, account: &str, password_hash: &str) -> bool {
        let mut accounts = self.accounts.write().unwrap_or_else(|e| e.into_inner());
        match accounts.get_mut(&account.to_ascii_lowercase()) {
            Some(record) => {
                record.password_hash = Some(password_hash.to_string());
                true
            }
            None => false,
        }
    }
}
