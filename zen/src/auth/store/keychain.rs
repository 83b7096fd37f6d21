//! OS keychain credential store
//!
//! Secrets live in the host vault under the service name (default
//! `zen-cli`) with the provider id as the account. The vault cannot
//! enumerate entries, so the set of stored providers is kept in one extra
//! entry.

use async_trait::async_trait;

use super::{CredentialStore, StorageType};
use crate::auth::credential::{Credential, CredentialRecord};
use crate::auth::provider::ProviderId;
use crate::error::{Result, ZenError};

const INDEX_ACCOUNT: &str = "__zen_providers__";
const PROBE_ACCOUNT: &str = "__zen_probe__";

/// Credential store backed by the OS keyring
#[derive(Debug, Clone)]
pub struct KeychainStore {
    service: String,
}

impl KeychainStore {
    /// Store using `service` as the vault service name
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Check that the vault can be reached
    ///
    /// # Errors
    ///
    /// `StorageUnavailable` when the platform has no usable vault.
    pub fn probe(&self) -> Result<()> {
        let entry = entry(&self.service, PROBE_ACCOUNT)?;
        match entry.get_password() {
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(unavailable(&e)),
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(String) -> Result<T> + Send + 'static,
    {
        let service = self.service.clone();
        tokio::task::spawn_blocking(move || f(service))
            .await
            .map_err(|e| ZenError::StorageUnavailable(format!("keychain task failed: {e}")))?
    }
}

fn entry(service: &str, account: &str) -> Result<keyring::Entry> {
    keyring::Entry::new(service, account).map_err(|e| unavailable(&e))
}

fn unavailable(err: &keyring::Error) -> ZenError {
    ZenError::StorageUnavailable(format!("OS keychain: {err}"))
}

fn read_index(service: &str) -> Result<Vec<ProviderId>> {
    match entry(service, INDEX_ACCOUNT)?.get_password() {
        Ok(raw) => parse_index(&raw),
        Err(keyring::Error::NoEntry) => Ok(Vec::new()),
        Err(e) => Err(unavailable(&e)),
    }
}

fn parse_index(raw: &str) -> Result<Vec<ProviderId>> {
    serde_json::from_str(raw).map_err(|e| {
        ZenError::StorageUnavailable(format!("OS keychain provider index is corrupt: {e}"))
    })
}

fn write_index(service: &str, providers: &[ProviderId]) -> Result<()> {
    let index = entry(service, INDEX_ACCOUNT)?;
    if providers.is_empty() {
        return match index.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(unavailable(&e)),
        };
    }
    let raw = serde_json::to_string(providers)?;
    index.set_password(&raw).map_err(|e| unavailable(&e))
}

#[async_trait]
impl CredentialStore for KeychainStore {
    fn storage_type(&self) -> StorageType {
        StorageType::Keychain
    }

    async fn put(&self, credential: &Credential) -> Result<()> {
        let provider = credential.provider;
        let payload = serde_json::to_string(&credential.to_record())?;
        self.blocking(move |service| {
            entry(&service, provider.as_str())?
                .set_password(&payload)
                .map_err(|e| unavailable(&e))?;

            let mut providers = read_index(&service)?;
            if !providers.contains(&provider) {
                providers.push(provider);
                providers.sort();
                write_index(&service, &providers)?;
            }
            Ok(())
        })
        .await
    }

    async fn get(&self, provider: ProviderId) -> Result<Credential> {
        self.blocking(move |service| {
            let raw = match entry(&service, provider.as_str())?.get_password() {
                Ok(raw) => raw,
                Err(keyring::Error::NoEntry) => {
                    return Err(ZenError::NotFound(format!("credential for {provider}")))
                }
                Err(e) => return Err(unavailable(&e)),
            };

            // Entries written by other tools hold only the bare token.
            let credential = serde_json::from_str::<CredentialRecord>(&raw).map_or_else(
                |_| {
                    Credential::new(provider, secrecy::SecretString::from(raw.clone()), chrono::Utc::now())
                },
                Credential::from,
            );
            Ok(credential)
        })
        .await
    }

    async fn delete(&self, provider: ProviderId) -> Result<()> {
        self.blocking(move |service| {
            match entry(&service, provider.as_str())?.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(e) => return Err(unavailable(&e)),
            }
            let mut providers = read_index(&service)?;
            let before = providers.len();
            providers.retain(|p| *p != provider);
            if providers.len() != before {
                write_index(&service, &providers)?;
            }
            Ok(())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<ProviderId>> {
        self.blocking(|service| {
            let mut providers = read_index(&service)?;
            providers.sort();
            providers.dedup();
            Ok(providers)
        })
        .await
    }
}
