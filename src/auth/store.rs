//! Credential lookup

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Deserialize;

/// A viewer account
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
    /// Disabled accounts are refused even with the right password
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            active: true,
        }
    }
}

/// Source of viewer accounts, keyed by user name and realm
pub trait CredentialStore: Send + Sync + 'static {
    fn lookup(&self, username: &str, realm: &str) -> Option<Credential>;
}

/// Accounts kept in memory
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    users: RwLock<HashMap<(String, String), Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding `users`, all under `realm`
    pub fn with_users<'a>(realm: &str, users: impl IntoIterator<Item = &'a Credential>) -> Self {
        let store = Self::new();
        for user in users {
            store.insert(realm, user.clone());
        }
        store
    }

    /// Add or replace an account
    pub fn insert(&self, realm: &str, credential: Credential) {
        let key = (credential.username.clone(), realm.to_string());
        self.users.write().insert(key, credential);
    }

    pub fn remove(&self, username: &str, realm: &str) -> bool {
        self.users
            .write()
            .remove(&(username.to_string(), realm.to_string()))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn lookup(&self, username: &str, realm: &str) -> Option<Credential> {
        self.users
            .read()
            .get(&(username.to_string(), realm.to_string()))
            .cloned()
    }
}
