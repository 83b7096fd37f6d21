//! Wiring of library façades for one command invocation

use std::path::Path;
use std::sync::Arc;

use zen::assets::AssetClient;
use zen::auth::AuthManager;
use zen::clock::{self, SharedClock};
use zen::config::ZenConfig;
use zen::http::{HttpTransport, ReqwestTransport};
use zen::task::TaskRenderer;
use zen::template::{FunctionContext, TemplateEngine};
use zen::Result;

use crate::prompt::DialoguerPrompter;

/// Configuration and shared collaborators
#[derive(Debug, Clone)]
pub struct AppContext {
    /// Effective configuration
    pub config: ZenConfig,
    transport: Arc<dyn HttpTransport>,
    clock: SharedClock,
}

impl AppContext {
    /// Load configuration from `config_path` or the standard locations
    ///
    /// # Errors
    ///
    /// Configuration and transport setup failures.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => ZenConfig::load_from(path)?,
            None => ZenConfig::load()?,
        };
        Ok(Self::new(config, Arc::new(ReqwestTransport::new()?), clock::system()))
    }

    /// Context over explicit collaborators
    #[must_use]
    pub fn new(config: ZenConfig, transport: Arc<dyn HttpTransport>, clock: SharedClock) -> Self {
        Self {
            config,
            transport,
            clock,
        }
    }

    /// Auth manager over the configured credential backend
    ///
    /// # Errors
    ///
    /// `StorageUnavailable` when the backend cannot be opened.
    pub fn auth(&self) -> Result<Arc<AuthManager>> {
        let manager = AuthManager::from_config(&self.config, self.transport.clone())?
            .with_clock(self.clock.clone())
            .with_prompter(Arc::new(DialoguerPrompter));
        Ok(Arc::new(manager))
    }

    /// Asset client, authenticated when a credential backend is available
    ///
    /// # Errors
    ///
    /// Cache initialisation failures.
    pub async fn assets(&self) -> Result<Arc<AssetClient>> {
        let auth = match self.auth() {
            Ok(auth) => Some(auth),
            Err(e) => {
                tracing::warn!(error = %e, "credential store unavailable; fetching anonymously");
                None
            }
        };
        let client = AssetClient::open(
            &self.config.assets,
            self.transport.clone(),
            auth,
            self.clock.clone(),
        )
        .await?;
        Ok(Arc::new(client))
    }

    /// Task renderer backed by `client`
    #[must_use]
    pub fn renderer(&self, client: &Arc<AssetClient>) -> TaskRenderer {
        let functions = FunctionContext::new(
            self.clock.clone(),
            self.config.templates.workspace_root.clone(),
        );
        let engine = Arc::new(TemplateEngine::with_context(
            self.config.templates.clone(),
            client.clone(),
            functions,
            self.clock.clone(),
        ));
        TaskRenderer::new(client.clone(), engine, self.clock.clone())
    }
}
