//! Configuration management for zen
//!
//! Configuration is loaded from multiple sources with clear precedence:
//!
//! 1. Specific environment overrides (`ZEN_REPOSITORY_URL`, `ZEN_BRANCH`,
//!    `ZEN_AUTH_PROVIDER`) and the flags `PROMPT_DISABLED` and `NO_COLOR`
//! 2. Environment variables (`ZEN_` prefix, `__` for nesting)
//! 3. `./.zen/config.toml` (workspace)
//! 4. `~/.config/zen/config.toml` (user config, XDG)
//! 5. `/etc/zen/config.toml` (system config)
//! 6. Hardcoded defaults (fallback)
//!
//! Environment variable format: `ZEN_SECTION__FIELD_NAME`
//! - Use `__` (double underscore) to separate nested sections
//! - Use `_` (single underscore) within field names
//! - Example: `ZEN_ASSETS__CACHE_SIZE_MB=50`
//!
//! # Example Configuration
//!
//! ```toml
//! [assets]
//! repository_url = "https://api.github.com/repos/acme/zen-library"
//! branch = "main"
//! auth_provider = "github"
//! cache_path = "~/.zen/library"
//! cache_size_mb = 100
//! default_ttl_seconds = 86400
//!
//! [auth]
//! storage_type = "file"
//! storage_path = "~/.zen/credentials.json"
//!
//! [templates]
//! strict_mode = true
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::assets::manifest::TagMatch;
use crate::auth::provider::ProviderId;
use crate::auth::store::StorageType;
use crate::error::{Result, ZenError};

/// Asset library settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetSettings {
    /// Base URL of the repository's file-reading API
    pub repository_url: String,

    /// Branch or ref used for manifest and asset paths
    pub branch: String,

    /// Provider whose credential authenticates asset fetches
    pub auth_provider: ProviderId,

    /// Path of the manifest inside the repository
    pub manifest_path: String,

    /// Cache root directory (`~` is expanded)
    pub cache_path: PathBuf,

    /// Total on-disk cap for the cache in MB
    pub cache_size_mb: u64,

    /// Default entry TTL in seconds
    pub default_ttl_seconds: u64,

    /// Verify entry digests on every cache read
    pub integrity_checks_enabled: bool,

    /// Prefetch assets during a non-shallow sync
    pub prefetch_enabled: bool,

    /// Explicit prefetch set; empty means "everything added or updated"
    pub prefetch_assets: Vec<String>,

    /// Skip prefetching when fewer requests than this remain in the rate-limit window
    pub prefetch_min_rate_limit: u64,

    /// Total deadline for a sync
    pub sync_timeout_seconds: u64,

    /// Total deadline for a single request, retries included
    pub request_timeout_seconds: u64,

    /// Maximum attempts for transient failures
    pub max_retries: u32,

    /// Concurrent HTTP requests allowed at once
    pub max_concurrent_requests: usize,

    /// Tag filter semantics used by list queries
    pub tag_match: TagMatch,
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            repository_url: "https://api.github.com/repos/zen-dev/zen-library".to_string(),
            branch: "main".to_string(),
            auth_provider: ProviderId::Github,
            manifest_path: "manifest.yaml".to_string(),
            cache_path: PathBuf::from("~/.zen/library"),
            cache_size_mb: 100,
            default_ttl_seconds: 86_400, // 24 hours
            integrity_checks_enabled: true,
            prefetch_enabled: true,
            prefetch_assets: Vec::new(),
            prefetch_min_rate_limit: 10,
            sync_timeout_seconds: 30,
            request_timeout_seconds: 15,
            max_retries: 3,
            max_concurrent_requests: 4,
            tag_match: TagMatch::Any,
        }
    }
}

impl AssetSettings {
    /// Cache cap in bytes
    #[must_use]
    pub const fn cache_size_bytes(&self) -> u64 {
        self.cache_size_mb * 1_048_576
    }

    /// Default TTL as a Duration
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    /// Sync deadline as a Duration
    #[must_use]
    pub const fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_seconds)
    }

    /// Request deadline as a Duration
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Credential settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Backend holding credentials
    pub storage_type: StorageType,

    /// Credential file when the backend is file-based
    pub storage_path: PathBuf,

    /// Passphrase or key for the encrypted file backend
    pub encryption_key: Option<String>,

    /// Never fall back to an interactive prompt
    pub prompt_disabled: bool,

    /// Per-provider files holding a secret (`github = "~/.config/zen/github-token"`)
    pub token_files: HashMap<String, PathBuf>,

    /// Base URL of the Jira site, used for identity probes
    pub jira_base_url: Option<String>,

    /// Keychain service name
    pub keychain_service: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Keychain,
            storage_path: PathBuf::from("~/.zen/credentials.json"),
            encryption_key: None,
            prompt_disabled: false,
            token_files: HashMap::new(),
            jira_base_url: None,
            keychain_service: "zen-cli".to_string(),
        }
    }
}

/// Template engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateSettings {
    /// Cache compiled templates
    pub cache_enabled: bool,

    /// Compiled template lifetime in seconds
    pub cache_ttl: u64,

    /// Maximum number of compiled templates kept
    pub cache_size: usize,

    /// Fail renders that reference missing variables
    pub strict_mode: bool,

    /// Opening variable delimiter
    pub left_delim: String,

    /// Closing variable delimiter
    pub right_delim: String,

    /// Root used by the `workspacePath` template function
    pub workspace_root: PathBuf,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl: 1_800,
            cache_size: 100,
            strict_mode: false,
            left_delim: "{{".to_string(),
            right_delim: "}}".to_string(),
            workspace_root: PathBuf::from("."),
        }
    }
}

impl TemplateSettings {
    /// Compiled template lifetime as a Duration
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }
}

/// Terminal output settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UiSettings {
    /// Disable colored output
    pub no_color: bool,
}

/// Complete zen configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ZenConfig {
    /// Asset library settings
    #[serde(default)]
    pub assets: AssetSettings,

    /// Credential settings
    #[serde(default)]
    pub auth: AuthSettings,

    /// Template engine settings
    #[serde(default)]
    pub templates: TemplateSettings,

    /// Terminal output settings
    #[serde(default)]
    pub ui: UiSettings,
}

/// Environment variables that map onto a single configuration key
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("ZEN_REPOSITORY_URL", "assets.repository_url"),
    ("ZEN_ASSETS_REPOSITORY_URL", "assets.repository_url"),
    ("ZEN_AUTH_PROVIDER", "assets.auth_provider"),
    ("ZEN_ASSETS_AUTH_PROVIDER", "assets.auth_provider"),
    ("ZEN_BRANCH", "assets.branch"),
    ("ZEN_ASSETS_BRANCH", "assets.branch"),
];

/// Whether a flag-style environment variable is set to a truthy value
#[must_use]
pub fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| {
        matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

impl ZenConfig {
    /// Load configuration from the standard locations
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file cannot be parsed or a value
    /// fails validation.
    pub fn load() -> Result<Self> {
        let mut figment = Self::defaults_figment()?;

        let system_config = PathBuf::from("/etc/zen/config.toml");
        if system_config.exists() {
            figment = figment.merge(Toml::file(&system_config));
        }

        let user_config = Self::recommended_path();
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }

        let workspace_config = PathBuf::from(".zen").join("config.toml");
        if workspace_config.exists() {
            figment = figment.merge(Toml::file(&workspace_config));
        }

        Self::finish(figment)
    }

    /// Load configuration from a specific file layered over defaults
    ///
    /// A missing file yields the defaults (plus environment overrides).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or a value fails validation.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Self::defaults_figment()?.merge(Toml::file(path.as_ref()));
        Self::finish(figment)
    }

    fn defaults_figment() -> Result<Figment> {
        let defaults = toml::to_string(&Self::default())
            .map_err(|e| ZenError::InvalidArgument(format!("cannot serialize defaults: {e}")))?;
        Ok(Figment::new().merge(Toml::string(&defaults)))
    }

    fn finish(figment: Figment) -> Result<Self> {
        let figment = figment
            .merge(Env::prefixed("ZEN_").split("__").lowercase(true))
            .merge(Env::raw().filter_map(|key| {
                ENV_OVERRIDES
                    .iter()
                    .find(|(name, _)| key.as_str().eq_ignore_ascii_case(name))
                    .map(|(_, target)| (*target).into())
            }));

        let mut config: Self = figment
            .extract()
            .map_err(|e| ZenError::InvalidArgument(format!("invalid configuration: {e}")))?;
        if env_flag("PROMPT_DISABLED") {
            config.auth.prompt_disabled = true;
        }
        if std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty()) {
            config.ui.no_color = true;
        }
        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    /// Expand `~` in every configured path
    pub fn expand_paths(&mut self) {
        self.assets.cache_path = expand_tilde(&self.assets.cache_path);
        self.auth.storage_path = expand_tilde(&self.auth.storage_path);
        self.templates.workspace_root = expand_tilde(&self.templates.workspace_root);
        for path in self.auth.token_files.values_mut() {
            *path = expand_tilde(path);
        }
    }

    /// Reject values the components cannot work with
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` naming the offending option.
    pub fn validate(&self) -> Result<()> {
        if self.assets.cache_size_mb == 0 {
            return Err(ZenError::InvalidArgument(
                "assets.cache_size_mb must be greater than zero".into(),
            ));
        }
        let repository = url::Url::parse(self.assets.repository_url.trim()).map_err(|e| {
            ZenError::InvalidArgument(format!(
                "assets.repository_url '{}' is not a URL: {e}",
                self.assets.repository_url
            ))
        })?;
        if !matches!(repository.scheme(), "http" | "https") {
            return Err(ZenError::InvalidArgument(format!(
                "assets.repository_url must use http or https, got {}",
                repository.scheme()
            )));
        }
        if self.assets.max_concurrent_requests == 0 {
            return Err(ZenError::InvalidArgument(
                "assets.max_concurrent_requests must be greater than zero".into(),
            ));
        }
        if self.templates.left_delim.is_empty() || self.templates.right_delim.is_empty() {
            return Err(ZenError::InvalidArgument(
                "templates.left_delim and templates.right_delim must not be empty".into(),
            ));
        }
        if self.templates.left_delim == self.templates.right_delim {
            return Err(ZenError::InvalidArgument(
                "templates.left_delim and templates.right_delim must differ".into(),
            ));
        }
        Ok(())
    }

    /// Get the recommended XDG config path
    #[must_use]
    pub fn recommended_path() -> PathBuf {
        dirs::config_dir().map_or_else(
            || PathBuf::from(".zen").join("config.toml"),
            |config_dir| config_dir.join("zen").join("config.toml"),
        )
    }
}

/// Expand a leading `~` to the home directory
#[must_use]
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    dirs::home_dir().map_or_else(|| path.to_path_buf(), |home| home.join(rest))
}
