//! The JSON-backed user store (`spec.md` §6).
//!
//! The web UI and its session handling are out of scope (`spec.md` §1); this
//! module only carries the on-disk shape and hash the original implements,
//! since §6 specifies both at the interface level.

use std::collections::BTreeMap;

use sha2::{Digest, Sha512};

use crate::error::FwError;
use crate::model::validate_name_chars;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub role: String,
    pub password_hash: String,
    pub email: Option<String>,
}

/// `{ username: [role, sha512_hex, email_or_null] }`, matching the
/// original's `Users` JSON shape byte-for-byte.
#[derive(Debug, Clone, Default)]
pub struct UserStore {
    users: BTreeMap<String, User>,
}

impl UserStore {
    pub fn new() -> Self {
        UserStore { users: BTreeMap::new() }
    }

    pub fn from_json(text: &str) -> Result<Self, FwError> {
        let raw: BTreeMap<String, (String, String, Option<String>)> =
            serde_json::from_str(text).map_err(|e| FwError::bad_data("users", format!("malformed user store: {e}")))?;

        let users = raw
            .into_iter()
            .map(|(username, (role, password_hash, email))| (username, User { role, password_hash, email }))
            .collect();

        Ok(UserStore { users })
    }

    pub fn to_json(&self) -> Result<String, FwError> {
        let raw: BTreeMap<&String, (&String, &String, &Option<String>)> = self
            .users
            .iter()
            .map(|(username, u)| (username, (&u.role, &u.password_hash, &u.email)))
            .collect();
        serde_json::to_string_pretty(&raw).map_err(|e| FwError::bad_data("users", format!("failed to serialize user store: {e}")))
    }

    pub fn get(&self, username: &str) -> Option<&User> {
        self.users.get(username)
    }

    pub fn create(&mut self, username: &str, role: &str, password: &str, email: Option<String>) -> Result<(), FwError> {
        validate_name_chars(username, username)?;
        if self.users.contains_key(username) {
            return Err(FwError::bad_data(username, "user already exists"));
        }
        self.users.insert(
            username.to_string(),
            User { role: role.to_string(), password_hash: hash_password(username, password), email },
        );
        Ok(())
    }

    pub fn update(&mut self, username: &str, role: Option<&str>, password: Option<&str>) -> Result<(), FwError> {
        let user = self.users.get_mut(username).ok_or_else(|| FwError::bad_data(username, "no such user"))?;
        if let Some(role) = role {
            user.role = role.to_string();
        }
        if let Some(password) = password {
            user.password_hash = hash_password(username, password);
        }
        Ok(())
    }

    pub fn delete(&mut self, username: &str) -> Result<(), FwError> {
        self.users.remove(username).ok_or_else(|| FwError::bad_data(username, "no such user"))?;
        Ok(())
    }

    pub fn validate(&self, username: &str, password: &str) -> bool {
        match self.users.get(username) {
            Some(user) => user.password_hash == hash_password(username, password),
            None => false,
        }
    }

    /// Always `true`: this store only ever writes the legacy unsalted hash.
    /// A real rollout would add a salted variant, accept both here during a
    /// transition window, and flip this to `false` once every stored hash
    /// has been rewritten — left undone since the user store itself is an
    /// external collaborator (`spec.md` §1), not core scope.
    pub fn needs_migration(&self) -> bool {
        true
    }
}

/// `sha512("user:::password")`, matching the original's unsalted scheme
/// byte-for-byte.
fn hash_password(username: &str, password: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(username.as_bytes());
    hasher.update(b":::");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_validate_round_trips() {
        let mut store = UserStore::new();
        store.create("alice", "admin", "hunter2", Some("alice@example.com".to_string())).unwrap();

        assert!(store.validate("alice", "hunter2"));
        assert!(!store.validate("alice", "wrong"));
        assert!(!store.validate("nobody", "hunter2"));
    }

    #[test]
    fn duplicate_create_fails() {
        let mut store = UserStore::new();
        store.create("alice", "admin", "hunter2", None).unwrap();
        assert!(store.create("alice", "viewer", "other", None).is_err());
    }

    #[test]
    fn update_password_changes_hash() {
        let mut store = UserStore::new();
        store.create("alice", "admin", "hunter2", None).unwrap();
        store.update("alice", None, Some("newpass")).unwrap();

        assert!(!store.validate("alice", "hunter2"));
        assert!(store.validate("alice", "newpass"));
    }

    #[test]
    fn json_round_trip_preserves_users() {
        let mut store = UserStore::new();
        store.create("alice", "admin", "hunter2", Some("a@example.com".to_string())).unwrap();

        let json = store.to_json().unwrap();
        let reloaded = UserStore::from_json(&json).unwrap();

        assert!(reloaded.validate("alice", "hunter2"));
        assert_eq!(reloaded.get("alice").unwrap().role, "admin");
    }

    #[test]
    fn needs_migration_is_always_true() {
        assert!(UserStore::new().needs_migration());
    }
}
