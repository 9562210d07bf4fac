//! Secret Vault
//!
//! Account passwords never travel inside a tunnel configuration. They
//! are written to the vault under a key derived from the profile id and
//! account name, and the configuration carries an opaque reference.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use uuid::Uuid;

/// Vault key of a profile password
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretKey {
    pub profile_id: Uuid,
    pub account: String,
}

impl SecretKey {
    pub fn new(profile_id: Uuid, account: impl Into<String>) -> Self {
        Self {
            profile_id,
            account: account.into(),
        }
    }
}

impl fmt::Display for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.profile_id, self.account)
    }
}

/// Opaque handle to a stored secret
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SecretRef(String);

impl SecretRef {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretRef([redacted])")
    }
}

/// Credential storage
pub trait SecretVault: Send + Sync {
    /// Store `secret` under `key`, replacing any previous value
    fn set(&self, secret: &str, key: &SecretKey, label: &str) -> Result<(), VaultError>;

    /// Reference to the secret stored under `key`
    fn reference(&self, key: &SecretKey) -> Result<SecretRef, VaultError>;

    /// Remove the secret stored under `key`, if any
    fn remove(&self, key: &SecretKey);

    /// Remove every secret of a profile
    fn remove_all(&self, profile_id: Uuid);

    /// Resolve a reference back to the secret
    fn resolve(&self, reference: &SecretRef) -> Result<String, VaultError>;
}

struct StoredSecret {
    secret: String,
    label: String,
    reference: SecretRef,
}

/// In-process vault
#[derive(Default)]
pub struct MemoryVault {
    entries: Mutex<HashMap<SecretKey, StoredSecret>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Label of the secret stored under `key`
    pub fn label(&self, key: &SecretKey) -> Option<String> {
        let entries = self.entries.lock().ok()?;
        entries.get(key).map(|stored| stored.label.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SecretVault for MemoryVault {
    fn set(&self, secret: &str, key: &SecretKey, label: &str) -> Result<(), VaultError> {
        let mut entries = self.entries.lock().map_err(|_| VaultError::Unavailable)?;
        entries.insert(
            key.clone(),
            StoredSecret {
                secret: secret.to_string(),
                label: label.to_string(),
                reference: SecretRef::new(key.to_string()),
            },
        );
        Ok(())
    }

    fn reference(&self, key: &SecretKey) -> Result<SecretRef, VaultError> {
        let entries = self.entries.lock().map_err(|_| VaultError::Unavailable)?;
        entries
            .get(key)
            .map(|stored| stored.reference.clone())
            .ok_or_else(|| VaultError::NotFound(key.to_string()))
    }

    fn remove(&self, key: &SecretKey) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }

    fn remove_all(&self, profile_id: Uuid) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|key, _| key.profile_id != profile_id);
        }
    }

    fn resolve(&self, reference: &SecretRef) -> Result<String, VaultError> {
        let entries = self.entries.lock().map_err(|_| VaultError::Unavailable)?;
        entries
            .values()
            .find(|stored| &stored.reference == reference)
            .map(|stored| stored.secret.clone())
            .ok_or_else(|| VaultError::NotFound(reference.as_str().to_string()))
    }
}

/// Vault errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VaultError {
    #[error("Secret not found: {0}")]
    NotFound(String),

    #[error("Vault unavailable")]
    Unavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_reference_resolve() {
        let vault = MemoryVault::new();
        let key = SecretKey::new(Uuid::new_v4(), "alice");

        vault.set("hunter2", &key, "Home").unwrap();
        let reference = vault.reference(&key).unwrap();

        assert_eq!(vault.resolve(&reference).unwrap(), "hunter2");
        assert_eq!(vault.label(&key).as_deref(), Some("Home"));
    }

    #[test]
    fn test_last_writer_wins() {
        let vault = MemoryVault::new();
        let key = SecretKey::new(Uuid::new_v4(), "alice");

        vault.set("first", &key, "Home").unwrap();
        vault.set("second", &key, "Home").unwrap();

        let reference = vault.reference(&key).unwrap();
        assert_eq!(vault.resolve(&reference).unwrap(), "second");
        assert_eq!(vault.len(), 1);
    }

    #[test]
    fn test_remove_all_for_profile() {
        let vault = MemoryVault::new();
        let id = Uuid::new_v4();
        let other = SecretKey::new(Uuid::new_v4(), "bob");

        vault.set("a", &SecretKey::new(id, "alice"), "").unwrap();
        vault.set("b", &SecretKey::new(id, "carol"), "").unwrap();
        vault.set("c", &other, "").unwrap();

        vault.remove_all(id);

        assert_eq!(vault.len(), 1);
        assert!(vault.reference(&other).is_ok());
    }

    #[test]
    fn test_missing_reference() {
        let vault = MemoryVault::new();
        let key = SecretKey::new(Uuid::new_v4(), "alice");
        assert!(matches!(vault.reference(&key), Err(VaultError::NotFound(_))));
    }

    #[test]
    fn test_reference_debug_is_redacted() {
        let reference = SecretRef::new("secret-handle");
        assert_eq!(format!("{reference:?}"), "SecretRef([redacted])");
    }
}
