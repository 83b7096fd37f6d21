//! Encrypted file credential store
//!
//! Layout of the file at `auth.storage_path`:
//!
//! ```json
//! {
//!   "version": 1,
//!   "kdf": "argon2id",
//!   "salt": "<base64>",
//!   "credentials": {
//!     "github": { "ciphertext": "<base64>", "nonce": "<base64>" }
//!   }
//! }
//! ```
//!
//! Each secret is sealed with AES-256-GCM under a key derived from the
//! configured passphrase with Argon2id. The provider id is bound as
//! associated data so ciphertexts cannot be swapped between providers.
//! The file is written with mode `0600` under a `0700` parent.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{CredentialStore, StorageType};
use crate::auth::credential::{Credential, CredentialRecord};
use crate::auth::provider::ProviderId;
use crate::error::{Result, ZenError};
use crate::fsutil;

const FILE_VERSION: u32 = 1;
const KDF_NAME: &str = "argon2id";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

#[derive(Debug, Serialize, Deserialize)]
struct CredentialFile {
    version: u32,
    kdf: String,
    salt: String,
    #[serde(default)]
    credentials: BTreeMap<String, SealedSecret>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedSecret {
    ciphertext: String,
    nonce: String,
}

/// Credentials sealed into a single JSON file
pub struct EncryptedFileStore {
    path: PathBuf,
    salt: Vec<u8>,
    cipher: Aes256Gcm,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for EncryptedFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl EncryptedFileStore {
    /// Open (or prepare to create) the credential file at `path`
    ///
    /// When the file already holds credentials, the passphrase is checked
    /// against one of them.
    ///
    /// # Errors
    ///
    /// `StorageUnavailable` if the file exists but is unreadable or
    /// malformed, `EncryptionError` if the passphrase does not open it.
    pub fn open(path: impl AsRef<Path>, passphrase: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let existing = read_file(&path)?;

        let salt = match &existing {
            Some(file) => B64
                .decode(&file.salt)
                .map_err(|e| ZenError::StorageUnavailable(format!("corrupt salt in {}: {e}", path.display())))?,
            None => {
                let mut salt = vec![0_u8; SALT_LEN];
                rand::rngs::OsRng.fill_bytes(&mut salt);
                salt
            }
        };

        let cipher = derive_cipher(passphrase, &salt)?;
        let store = Self {
            path,
            salt,
            cipher,
            write_lock: Mutex::new(()),
        };

        if let Some((provider, sealed)) = existing.as_ref().and_then(|f| f.credentials.iter().next()) {
            store.unseal(provider, sealed).map_err(|_| {
                ZenError::EncryptionError(format!(
                    "the configured key does not open {}",
                    store.path.display()
                ))
            })?;
        }

        Ok(store)
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn seal(&self, provider: &str, plaintext: &[u8]) -> Result<SealedSecret> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: provider.as_bytes(),
                },
            )
            .map_err(|_| ZenError::EncryptionError(format!("cannot encrypt secret for {provider}")))?;
        Ok(SealedSecret {
            ciphertext: B64.encode(ciphertext),
            nonce: B64.encode(nonce),
        })
    }

    fn unseal(&self, provider: &str, sealed: &SealedSecret) -> Result<Vec<u8>> {
        let nonce = B64
            .decode(&sealed.nonce)
            .map_err(|e| ZenError::EncryptionError(format!("bad nonce for {provider}: {e}")))?;
        if nonce.len() != NONCE_LEN {
            return Err(ZenError::EncryptionError(format!(
                "bad nonce length for {provider}"
            )));
        }
        let ciphertext = B64
            .decode(&sealed.ciphertext)
            .map_err(|e| ZenError::EncryptionError(format!("bad ciphertext for {provider}: {e}")))?;

        self.cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: provider.as_bytes(),
                },
            )
            .map_err(|_| ZenError::EncryptionError(format!("cannot decrypt secret for {provider}")))
    }

    fn empty_file(&self) -> CredentialFile {
        CredentialFile {
            version: FILE_VERSION,
            kdf: KDF_NAME.to_string(),
            salt: B64.encode(&self.salt),
            credentials: BTreeMap::new(),
        }
    }

    async fn load(&self) -> Result<CredentialFile> {
        let path = self.path.clone();
        let existing = tokio::task::spawn_blocking(move || read_file(&path))
            .await
            .map_err(|e| ZenError::StorageUnavailable(format!("credential read task failed: {e}")))??;
        Ok(existing.unwrap_or_else(|| self.empty_file()))
    }

    async fn save(&self, file: &CredentialFile) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(file)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || fsutil::write_atomic(&path, &bytes, 0o600, 0o700))
            .await
            .map_err(|e| ZenError::StorageUnavailable(format!("credential write task failed: {e}")))?
            .map_err(|e| ZenError::StorageUnavailable(e.to_string()))
    }
}

fn read_file(path: &Path) -> Result<Option<CredentialFile>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ZenError::StorageUnavailable(format!(
                "cannot read {}: {e}",
                path.display()
            )))
        }
    };
    let file: CredentialFile = serde_json::from_slice(&bytes).map_err(|e| {
        ZenError::StorageUnavailable(format!("malformed credential file {}: {e}", path.display()))
    })?;
    if file.version != FILE_VERSION || file.kdf != KDF_NAME {
        return Err(ZenError::StorageUnavailable(format!(
            "unsupported credential file format in {} (version {}, kdf {})",
            path.display(),
            file.version,
            file.kdf
        )));
    }
    Ok(Some(file))
}

fn derive_cipher(passphrase: &str, salt: &[u8]) -> Result<Aes256Gcm> {
    let params = Params::new(
        Params::DEFAULT_M_COST,
        Params::DEFAULT_T_COST,
        Params::DEFAULT_P_COST,
        Some(32),
    )
    .map_err(|e| ZenError::EncryptionError(format!("invalid key derivation parameters: {e}")))?;

    let mut key = [0_u8; 32];
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| ZenError::EncryptionError(format!("key derivation failed: {e}")))?;

    Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)))
}

#[async_trait]
impl CredentialStore for EncryptedFileStore {
    fn storage_type(&self) -> StorageType {
        StorageType::File
    }

    async fn put(&self, credential: &Credential) -> Result<()> {
        let provider = credential.provider.as_str();
        let plaintext = serde_json::to_vec(&credential.to_record())?;
        let sealed = self.seal(provider, &plaintext)?;

        let _guard = self.write_lock.lock().await;
        let mut file = self.load().await?;
        file.credentials.insert(provider.to_string(), sealed);
        self.save(&file).await?;
        tracing::debug!(provider, path = %self.path.display(), "stored credential");
        Ok(())
    }

    async fn get(&self, provider: ProviderId) -> Result<Credential> {
        let file = self.load().await?;
        let sealed = file
            .credentials
            .get(provider.as_str())
            .ok_or_else(|| ZenError::NotFound(format!("credential for {provider}")))?;
        let plaintext = self.unseal(provider.as_str(), sealed)?;
        let record: CredentialRecord = serde_json::from_slice(&plaintext)
            .map_err(|e| ZenError::EncryptionError(format!("decrypted credential is malformed: {e}")))?;
        Ok(record.into())
    }

    async fn delete(&self, provider: ProviderId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.load().await?;
        if file.credentials.remove(provider.as_str()).is_some() {
            self.save(&file).await?;
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ProviderId>> {
        let file = self.load().await?;
        let mut providers: Vec<ProviderId> = file
            .credentials
            .keys()
            .filter_map(|k| k.parse().ok())
            .collect();
        providers.sort();
        Ok(providers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use secrecy::{ExposeSecret, SecretString};
    use tempfile::TempDir;

    fn github(secret: &str) -> Credential {
        Credential::new(ProviderId::Github, SecretString::from(secret), Utc::now())
    }

    #[tokio::test]
    async fn test_round_trip_and_file_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("zen/credentials.json");
        let store = EncryptedFileStore::open(&path, "passphrase").unwrap();

        store.put(&github("ghp_plaintext_token")).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("ghp_plaintext_token"));
        assert!(raw.contains("\"github\""));
        assert!(raw.contains("\"nonce\""));

        let back = store.get(ProviderId::Github).await.unwrap();
        assert_eq!(back.secret.expose_secret(), "ghp_plaintext_token");
        assert_eq!(store.list().await.unwrap(), vec![ProviderId::Github]);
    }

    #[tokio::test]
    async fn test_reopen_with_same_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        EncryptedFileStore::open(&path, "k1")
            .unwrap()
            .put(&github("abc"))
            .await
            .unwrap();

        let reopened = EncryptedFileStore::open(&path, "k1").unwrap();
        let back = reopened.get(ProviderId::Github).await.unwrap();
        assert_eq!(back.secret.expose_secret(), "abc");
    }

    #[tokio::test]
    async fn test_wrong_key_is_encryption_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        EncryptedFileStore::open(&path, "right")
            .unwrap()
            .put(&github("abc"))
            .await
            .unwrap();

        let err = EncryptedFileStore::open(&path, "wrong").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::EncryptionError);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = EncryptedFileStore::open(dir.path().join("c.json"), "k").unwrap();
        store.put(&github("abc")).await.unwrap();

        store.delete(ProviderId::Github).await.unwrap();
        store.delete(ProviderId::Github).await.unwrap();

        let err = store.get(ProviderId::Github).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("private/credentials.json");
        let store = EncryptedFileStore::open(&path, "k").unwrap();
        store.put(&github("abc")).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        let parent = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(parent, 0o700);
    }

    #[tokio::test]
    async fn test_malformed_file_is_storage_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, b"not json").unwrap();
        let err = EncryptedFileStore::open(&path, "k").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::StorageUnavailable);
    }
}
