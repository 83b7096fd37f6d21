//! Provider credentials
//!
//! - [`provider`] - the closed set of providers and how each is authenticated
//! - [`credential`] - the stored secret and its metadata
//! - [`store`] - keychain, encrypted-file and in-memory backends
//! - [`manager`] - resolution order, validation, refresh and revocation
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use zen::auth::{AuthManager, AuthenticateOptions, MemoryStore, ProviderId};
//! use zen::http::ReqwestTransport;
//!
//! # async fn example() -> zen::Result<()> {
//! let auth = AuthManager::new(Arc::new(MemoryStore::new()), Arc::new(ReqwestTransport::new()?));
//! auth.authenticate(ProviderId::Github, AuthenticateOptions::default()).await?;
//! let identity = auth.validate(ProviderId::Github).await?;
//! println!("signed in as {:?}", identity.login);
//! # Ok(())
//! # }
//! ```

pub mod credential;
pub mod manager;
pub mod prompt;
pub mod provider;
pub mod store;

pub use credential::{Credential, CredentialSource};
pub use manager::{AuthManager, AuthenticateOptions, EnvLookup, ProviderInfo};
pub use prompt::Prompter;
pub use provider::{AuthKind, Identity, ProviderDescriptor, ProviderId};
pub use store::{
    open_store, CredentialStore, EncryptedFileStore, KeychainStore, MemoryStore, StorageType,
};
