//! zen: asset acquisition, caching and rendering for the zen workflow CLI
//!
//! The library fetches content assets (templates, prompts, schemas) from a
//! Git-hosted repository over its HTTP API, keeps them in a bounded,
//! integrity-checked on-disk cache, authenticates to Git providers, and
//! renders templates into task directories.
//!
//! # Design Principles
//!
//! 1. **One façade per concern**: commands talk to [`assets::AssetClient`],
//!    [`auth::AuthManager`], [`template::TemplateEngine`] and
//!    [`task::TaskRenderer`] only
//! 2. **Never serve wrong bytes**: cached bodies are verified against their
//!    recorded digest and dropped on mismatch
//! 3. **Deterministic under test**: time and entropy are injected through
//!    [`clock::Clock`] and [`template::FunctionContext`]
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use zen::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ZenConfig::load()?;
//!     let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new()?);
//!     let client = AssetClient::open(&config.assets, transport, None, zen::clock::system()).await?;
//!
//!     let page = client.list(&AssetFilter::all().with_type(AssetType::Template)).await?;
//!     for asset in page.results {
//!         println!("{} - {}", asset.name, asset.description);
//!     }
//!     client.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`auth`] - credential storage and provider authentication
//! - [`assets`] - manifest, cache, fetcher and the asset client
//! - [`template`] - the template engine and its function library
//! - [`task`] - task manifests, external snapshots and the renderer
//! - [`config`] - layered configuration
//! - [`observability`] - logging setup
//! - [`testing`] - deterministic collaborators for tests

// Lint configuration is handled at the workspace level in Cargo.toml
// Additional crate-specific allows:
#![allow(clippy::missing_errors_doc)]

pub mod assets;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod http;
pub mod observability;
pub mod task;
pub mod template;
pub mod testing;

pub use error::{ErrorKind, Result, ZenError};

pub mod prelude {
    //! Convenience re-exports for common types and traits
    //!
    //! # Examples
    //!
    //! ```rust
    //! use zen::prelude::*;
    //! ```

    pub use crate::assets::{
        AssetClient, AssetContent, AssetFilter, AssetMetadata, AssetType, CacheInfo, GetOptions,
        ListPage, SyncRequest, SyncResult, SyncStatus, TagMatch,
    };
    pub use crate::auth::{
        AuthManager, AuthenticateOptions, Credential, CredentialStore, Prompter, ProviderId,
        StorageType,
    };
    pub use crate::clock::{Clock, SharedClock};
    pub use crate::config::ZenConfig;
    pub use crate::error::{ErrorKind, Result, ZenError};
    pub use crate::http::{HttpTransport, ReqwestTransport};
    pub use crate::task::{RenderOutcome, RenderRequest, TaskManifest, TaskRenderer};
    pub use crate::template::{TemplateEngine, TemplateSource, Variables};
}
