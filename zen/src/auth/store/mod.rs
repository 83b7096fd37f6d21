//! Credential storage backends
//!
//! One secret per provider, behind the [`CredentialStore`] capability set.
//! The backend is chosen from configuration when the auth manager is
//! built; an unusable backend is a hard `StorageUnavailable` error and
//! never silently downgrades to another backend.

mod file;
mod keychain;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use file::EncryptedFileStore;
pub use keychain::KeychainStore;
pub use memory::MemoryStore;

use super::credential::Credential;
use super::provider::ProviderId;
use crate::config::AuthSettings;
use crate::error::{Result, ZenError};

/// Backend identifiers accepted by `auth.storage_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Host credential vault
    Keychain,
    /// Encrypted JSON file
    File,
    /// Process memory
    Memory,
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Keychain => "keychain",
            Self::File => "file",
            Self::Memory => "memory",
        })
    }
}

/// Persistence for provider credentials
#[async_trait]
pub trait CredentialStore: Send + Sync + std::fmt::Debug {
    /// Which backend this is
    fn storage_type(&self) -> StorageType;

    /// Store `credential`, replacing any credential for the same provider
    ///
    /// # Errors
    ///
    /// `StorageUnavailable` when the backend cannot be written,
    /// `EncryptionError` when the secret cannot be sealed.
    async fn put(&self, credential: &Credential) -> Result<()>;

    /// Fetch the credential for `provider`
    ///
    /// # Errors
    ///
    /// `NotFound` when nothing is stored, `StorageUnavailable` when the
    /// backend cannot be read.
    async fn get(&self, provider: ProviderId) -> Result<Credential>;

    /// Remove the credential for `provider`; removing nothing succeeds
    ///
    /// # Errors
    ///
    /// `StorageUnavailable` when the backend cannot be written.
    async fn delete(&self, provider: ProviderId) -> Result<()>;

    /// Providers that currently hold a credential, sorted
    ///
    /// # Errors
    ///
    /// `StorageUnavailable` when the backend cannot be read.
    async fn list(&self) -> Result<Vec<ProviderId>>;
}

/// Open the backend named by `settings`
///
/// # Errors
///
/// Returns `StorageUnavailable` when the backend cannot be used on this
/// host, or when the file backend has no encryption key.
pub fn open_store(settings: &AuthSettings) -> Result<Arc<dyn CredentialStore>> {
    match settings.storage_type {
        StorageType::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageType::Keychain => {
            let store = KeychainStore::new(&settings.keychain_service);
            store.probe()?;
            Ok(Arc::new(store))
        }
        StorageType::File => {
            let key = settings
                .encryption_key
                .as_deref()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| {
                    ZenError::StorageUnavailable(
                        "file credential storage requires auth.encryption_key".into(),
                    )
                })?;
            Ok(Arc::new(EncryptedFileStore::open(
                &settings.storage_path,
                key,
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_memory_store() {
        let settings = AuthSettings {
            storage_type: StorageType::Memory,
            ..AuthSettings::default()
        };
        let store = open_store(&settings).unwrap();
        assert_eq!(store.storage_type(), StorageType::Memory);
    }

    #[test]
    fn test_file_store_requires_key() {
        let dir = TempDir::new().unwrap();
        let settings = AuthSettings {
            storage_type: StorageType::File,
            storage_path: dir.path().join("credentials.json"),
            encryption_key: None,
            ..AuthSettings::default()
        };
        let err = open_store(&settings).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::StorageUnavailable);
    }

    #[test]
    fn test_storage_type_serde_names() {
        let parsed: StorageType = serde_json::from_str("\"keychain\"").unwrap();
        assert_eq!(parsed, StorageType::Keychain);
        assert_eq!(StorageType::File.to_string(), "file");
    }
}
