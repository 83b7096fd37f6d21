//! In-memory credential store

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{CredentialStore, StorageType};
use crate::auth::credential::Credential;
use crate::auth::provider::ProviderId;
use crate::error::{Result, ZenError};

/// Credentials held in process memory; lost at exit
#[derive(Debug, Default)]
pub struct MemoryStore {
    credentials: RwLock<BTreeMap<ProviderId, Credential>>,
}

impl MemoryStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    fn storage_type(&self) -> StorageType {
        StorageType::Memory
    }

    async fn put(&self, credential: &Credential) -> Result<()> {
        self.credentials
            .write()
            .insert(credential.provider, credential.clone());
        Ok(())
    }

    async fn get(&self, provider: ProviderId) -> Result<Credential> {
        self.credentials
            .read()
            .get(&provider)
            .cloned()
            .ok_or_else(|| ZenError::NotFound(format!("credential for {provider}")))
    }

    async fn delete(&self, provider: ProviderId) -> Result<()> {
        self.credentials.write().remove(&provider);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ProviderId>> {
        Ok(self.credentials.read().keys().copied().collect())
    }
}
