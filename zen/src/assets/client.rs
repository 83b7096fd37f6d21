//! Asset client
//!
//! The façade commands use. It owns the manifest registry and the cache,
//! loads the manifest on first use (refreshing it when its cache entry goes
//! stale), and serves asset bodies through the cache's single-flight fetch.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::cache::{sha256_hex, CacheConfig, CacheInfo, CacheStore, Fetched};
use super::fetcher::{AssetFetcher, FetcherConfig};
use super::manifest::{
    asset_cache_key, AssetFilter, AssetMetadata, Catalog, ListPage, ManifestDiff,
    ManifestRegistry,
};
use crate::auth::AuthManager;
use crate::clock::SharedClock;
use crate::config::AssetSettings;
use crate::error::{Result, ZenError};
use crate::http::HttpTransport;
use crate::template::{TemplateAsset, TemplateSource};

/// Cache key of the manifest
pub const MANIFEST_KEY: &str = "manifest";

/// Options for [`AssetClient::get`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOptions {
    /// Return the asset's metadata alongside the body
    pub include_metadata: bool,
    /// Check the body against the manifest checksum; `None` follows config
    pub verify_integrity: Option<bool>,
    /// Serve from the cache when fresh
    pub use_cache: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            include_metadata: true,
            verify_integrity: None,
            use_cache: true,
        }
    }
}

impl GetOptions {
    /// Force or skip integrity verification
    #[must_use]
    pub const fn verify(mut self, verify: bool) -> Self {
        self.verify_integrity = Some(verify);
        self
    }

    /// Skip the cache and download afresh
    #[must_use]
    pub const fn bypass_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }
}

/// An asset body and where it came from
#[derive(Debug, Clone, Serialize)]
pub struct AssetContent {
    /// Asset name
    pub name: String,
    /// Manifest entry, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AssetMetadata>,
    /// Body bytes
    #[serde(skip)]
    pub body: Bytes,
    /// Served without network access
    pub cached: bool,
    /// Seconds since the body was stored
    pub cache_age_seconds: u64,
    /// Digest that was checked against the manifest
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_hash: Option<String>,
}

impl AssetContent {
    /// Body as UTF-8 text
    ///
    /// # Errors
    ///
    /// `SchemaError` when the body is not valid UTF-8.
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.body)
            .map_err(|e| ZenError::SchemaError(format!("asset {} is not UTF-8: {e}", self.name)))
    }
}

/// Parameters of [`AssetClient::sync`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRequest {
    /// Refresh even if the cached manifest is fresh
    pub force: bool,
    /// Refresh only the manifest, no prefetch
    pub shallow: bool,
    /// Switch to this branch
    pub branch: Option<String>,
}

/// Overall outcome of a sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Everything requested was done
    Success,
    /// Manifest refreshed but some prefetches failed
    Partial,
    /// Nothing was refreshed
    Error,
}

/// Report of [`AssetClient::sync`]
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    /// Overall outcome
    pub status: SyncStatus,
    /// Assets new in this manifest
    pub added: usize,
    /// Assets whose content changed
    pub updated: usize,
    /// Assets no longer listed
    pub removed: usize,
    /// Per-name changes
    pub diff: ManifestDiff,
    /// Manifest was downloaded during this sync
    pub refreshed: bool,
    /// Assets downloaded by prefetch
    pub prefetched: usize,
    /// Prefetch skipped because the rate-limit budget was low
    pub prefetch_deferred: bool,
    /// Wall time of the sync
    #[serde(serialize_with = "duration_ms")]
    pub duration: Duration,
    /// Cache size after the sync
    pub cache_size_mb: f64,
    /// Completion time
    pub last_sync: Option<DateTime<Utc>>,
    /// Branch the manifest came from
    pub branch: String,
    /// What went wrong, for partial or failed syncs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncResult {
    /// Report for a sync that failed before refreshing anything
    #[must_use]
    pub fn failed(error: &ZenError, branch: impl Into<String>, duration: Duration) -> Self {
        Self {
            status: SyncStatus::Error,
            added: 0,
            updated: 0,
            removed: 0,
            diff: ManifestDiff::default(),
            refreshed: false,
            prefetched: 0,
            prefetch_deferred: false,
            duration,
            cache_size_mb: 0.0,
            last_sync: None,
            branch: branch.into(),
            error: Some(error.to_string()),
        }
    }
}

fn duration_ms<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Asset catalogue and content access
#[derive(Debug)]
pub struct AssetClient {
    settings: AssetSettings,
    registry: ManifestRegistry,
    cache: CacheStore,
    fetcher: AssetFetcher,
    clock: SharedClock,
    branch: RwLock<String>,
    generation: AtomicU64,
    closed: AtomicBool,
}

impl AssetClient {
    /// Open the cache and build a fetcher from `settings`
    ///
    /// # Errors
    ///
    /// Cache errors from [`CacheStore::open`].
    pub async fn open(
        settings: &AssetSettings,
        transport: Arc<dyn HttpTransport>,
        auth: Option<Arc<AuthManager>>,
        clock: SharedClock,
    ) -> Result<Self> {
        let cache = CacheStore::open(CacheConfig::from_settings(settings), Arc::clone(&clock)).await?;
        let mut fetcher = AssetFetcher::new(FetcherConfig::from_settings(settings), transport)
            .with_clock(Arc::clone(&clock));
        if let Some(auth) = auth {
            fetcher = fetcher.with_auth(auth);
        }
        Ok(Self::from_parts(settings, cache, fetcher, clock))
    }

    /// Assemble a client from already-built parts
    #[must_use]
    pub fn from_parts(
        settings: &AssetSettings,
        cache: CacheStore,
        fetcher: AssetFetcher,
        clock: SharedClock,
    ) -> Self {
        Self {
            registry: ManifestRegistry::new(settings.tag_match),
            branch: RwLock::new(settings.branch.clone()),
            settings: settings.clone(),
            cache,
            fetcher,
            clock,
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// The cache store
    #[must_use]
    pub const fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// The HTTP fetcher
    #[must_use]
    pub const fn fetcher(&self) -> &AssetFetcher {
        &self.fetcher
    }

    /// Branch assets are currently read from
    #[must_use]
    pub fn branch(&self) -> String {
        self.branch.read().clone()
    }

    /// Filtered, paginated listing, loading the manifest if needed
    ///
    /// # Errors
    ///
    /// Manifest download or parse failures.
    pub async fn list(&self, filter: &AssetFilter) -> Result<ListPage> {
        self.ensure_open()?;
        let catalog = self
            .ensure_manifest()
            .await
            .map_err(|e| e.with_context("list", MANIFEST_KEY))?;
        Ok(catalog.list(filter, self.registry.tag_match()))
    }

    /// Metadata for `name`
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown names, plus manifest failures.
    pub async fn metadata(&self, name: &str) -> Result<AssetMetadata> {
        self.ensure_open()?;
        let catalog = self
            .ensure_manifest()
            .await
            .map_err(|e| e.with_context("get", name))?;
        catalog
            .get(name)
            .cloned()
            .ok_or_else(|| ZenError::NotFound(format!("asset '{name}'")).with_context("get", name))
    }

    /// Asset whose command is `command`
    ///
    /// # Errors
    ///
    /// Manifest failures.
    pub async fn find_by_command(&self, command: &str) -> Result<Option<AssetMetadata>> {
        self.ensure_open()?;
        Ok(self.ensure_manifest().await?.by_command(command).cloned())
    }

    /// All command names, sorted
    ///
    /// # Errors
    ///
    /// Manifest failures.
    pub async fn commands(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        Ok(self.ensure_manifest().await?.commands())
    }

    /// Body of asset `name`
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown names, `ChecksumMismatch` when the body does
    /// not match the manifest (the cache entry is removed), plus fetch and
    /// cache failures. Errors carry the operation and asset name.
    pub async fn get(&self, name: &str, options: GetOptions) -> Result<AssetContent> {
        self.ensure_open()?;
        self.get_inner(name, options)
            .await
            .map_err(|e| e.with_context("get", name))
    }

    async fn get_inner(&self, name: &str, options: GetOptions) -> Result<AssetContent> {
        let catalog = self.ensure_manifest().await?;
        let metadata = catalog
            .get(name)
            .cloned()
            .ok_or_else(|| ZenError::NotFound(format!("asset '{name}'")))?;

        let key = metadata.cache_key();
        let verify = options
            .verify_integrity
            .unwrap_or(self.settings.integrity_checks_enabled);
        let declared = metadata.checksum_hex();
        let branch = self.branch();

        let fetcher = &self.fetcher;
        let (path, branch_ref, key_ref) = (metadata.path.as_str(), branch.as_str(), key.as_str());
        let declared_ref = declared.as_deref();
        let fetch = move || async move {
            let body = fetcher.fetch_asset(path, Some(branch_ref)).await?;
            if !verify {
                return Ok(Fetched {
                    body,
                    declared_hash: declared_ref.map(ToString::to_string),
                });
            }
            if let Some(expected) = declared_ref {
                let actual = sha256_hex(&body);
                if actual != expected {
                    warn!(asset = name, "downloaded body does not match manifest checksum");
                    return Err(ZenError::ChecksumMismatch {
                        key: key_ref.to_string(),
                        expected: expected.to_string(),
                        actual,
                    });
                }
            }
            Ok(Fetched::from(body))
        };

        let outcome = if options.use_cache {
            let outcome = self
                .cache
                .get_or_fetch_verified(&key, None, verify, fetch)
                .await?;
            match declared_ref {
                Some(expected) if verify && outcome.cached && outcome.entry.hash != expected => {
                    debug!(asset = name, "cached body predates the manifest checksum");
                    self.cache.delete(&key).await?;
                    self.cache.fetch_through(&key, None, fetch).await?
                }
                _ => outcome,
            }
        } else {
            self.cache.fetch_through(&key, None, fetch).await?
        };

        let entry = outcome.entry;
        Ok(AssetContent {
            name: name.to_string(),
            metadata: options.include_metadata.then_some(metadata),
            cached: outcome.cached,
            cache_age_seconds: entry.age.as_secs(),
            verified_hash: verify.then(|| entry.hash.clone()),
            body: entry.body,
        })
    }

    /// Refresh the manifest and report what changed
    ///
    /// # Errors
    ///
    /// `Timeout` when the sync deadline passes, and any manifest download
    /// or parse failure. Prefetch failures only downgrade the status to
    /// partial.
    pub async fn sync(&self, request: SyncRequest) -> Result<SyncResult> {
        self.ensure_open()?;
        let deadline = self.settings.sync_timeout();
        match tokio::time::timeout(deadline, self.sync_inner(request)).await {
            Ok(result) => result.map_err(|e| e.with_context("sync", MANIFEST_KEY)),
            Err(_) => Err(ZenError::Timeout(format!(
                "sync did not finish within {}s",
                deadline.as_secs()
            ))),
        }
    }

    async fn sync_inner(&self, request: SyncRequest) -> Result<SyncResult> {
        let started = Instant::now();
        let current_branch = self.branch();
        let branch = request
            .branch
            .clone()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| current_branch.clone());
        let switching = branch != current_branch;

        let previous = match self.registry.snapshot() {
            Some(catalog) => Some(catalog),
            None => self.cached_catalog().await,
        };

        let must_refresh = request.force
            || switching
            || previous.is_none()
            || !self.cache.is_fresh(MANIFEST_KEY).await;

        let (diff, refreshed) = if must_refresh {
            let (fetcher, branch_ref) = (&self.fetcher, branch.as_str());
            let fetched = self
                .cache
                .fetch_through(MANIFEST_KEY, None, move || async move {
                    Ok(Fetched::from(fetcher.fetch_manifest(Some(branch_ref)).await?))
                })
                .await?;
            let (_, diff) = self
                .install_manifest(&fetched.entry.body, previous.as_deref())
                .await?;
            *self.branch.write() = branch.clone();
            if switching || !diff.added.is_empty() || !diff.updated.is_empty() || !diff.removed.is_empty() {
                self.generation.fetch_add(1, Ordering::SeqCst);
            }
            (diff, true)
        } else {
            debug!("manifest is fresh; nothing to refresh");
            if let (Some(previous), false) = (&previous, self.registry.is_loaded()) {
                self.registry.install(previous.manifest().clone());
            }
            (ManifestDiff::default(), false)
        };

        let mut status = SyncStatus::Success;
        let mut error = None;
        let mut prefetched = 0;
        let mut prefetch_deferred = false;

        let targets: Vec<String> = if self.settings.prefetch_assets.is_empty() {
            diff.added.iter().chain(&diff.updated).cloned().collect()
        } else {
            self.settings.prefetch_assets.clone()
        };
        if !request.shallow && self.settings.prefetch_enabled && !targets.is_empty() {
            if self.fetcher.rate_limit_below(self.settings.prefetch_min_rate_limit) {
                warn!(
                    min_remaining = self.settings.prefetch_min_rate_limit,
                    "rate-limit budget is low; deferring prefetch"
                );
                prefetch_deferred = true;
            } else {
                let (ok, failures) = self.prefetch(&targets).await;
                prefetched = ok;
                if !failures.is_empty() {
                    status = SyncStatus::Partial;
                    error = Some(failures.join("; "));
                }
            }
        }

        let now = self.clock.now();
        self.cache.record_sync(now).await?;
        let info = self.cache.info().await;

        let result = SyncResult {
            status,
            added: diff.added.len(),
            updated: diff.updated.len(),
            removed: diff.removed.len(),
            diff,
            refreshed,
            prefetched,
            prefetch_deferred,
            duration: started.elapsed(),
            cache_size_mb: info.total_size_mb(),
            last_sync: Some(now),
            branch,
            error,
        };
        info!(
            status = ?result.status,
            added = result.added,
            updated = result.updated,
            removed = result.removed,
            prefetched = result.prefetched,
            "sync finished"
        );
        Ok(result)
    }

    async fn prefetch(&self, names: &[String]) -> (usize, Vec<String>) {
        let gets = names
            .iter()
            .map(|name| async move { (name, self.get_inner(name, GetOptions::default()).await) });

        let mut ok = 0;
        let mut failures = Vec::new();
        for (name, result) in join_all(gets).await {
            match result {
                Ok(_) => ok += 1,
                Err(e) => {
                    warn!(asset = %name, error = %e, "prefetch failed");
                    failures.push(format!("{name}: {e}"));
                }
            }
        }
        (ok, failures)
    }

    /// Cache statistics
    pub async fn get_cache_info(&self) -> CacheInfo {
        self.cache.info().await
    }

    /// Remove every cached entry; the in-memory manifest stays loaded
    ///
    /// # Errors
    ///
    /// Cache I/O failures.
    pub async fn clear_cache(&self) -> Result<()> {
        self.ensure_open()?;
        self.cache.clear().await?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Flush the cache index and stop accepting requests
    ///
    /// # Errors
    ///
    /// Failure writing the index.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.fetcher.close();
        self.cache.persist().await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(ZenError::Cancelled("asset client is closed".into()))
        } else {
            Ok(())
        }
    }

    /// Current catalogue, refreshing it when its cache entry is stale
    ///
    /// A network-class refresh failure falls back to the stale manifest on
    /// disk or in memory.
    async fn ensure_manifest(&self) -> Result<Arc<Catalog>> {
        if let Some(catalog) = self.registry.snapshot() {
            if self.cache.is_fresh(MANIFEST_KEY).await {
                return Ok(catalog);
            }
        }

        let branch = self.branch();
        let (fetcher, branch_ref) = (&self.fetcher, branch.as_str());
        let fetched = self
            .cache
            .get_or_fetch(MANIFEST_KEY, None, move || async move {
                Ok(Fetched::from(fetcher.fetch_manifest(Some(branch_ref)).await?))
            })
            .await;

        match fetched {
            Ok(outcome) => {
                let previous = self.registry.snapshot();
                let unchanged = previous.is_some() && outcome.cached;
                if unchanged {
                    if let Some(catalog) = previous {
                        return Ok(catalog);
                    }
                }
                let (catalog, _) = self
                    .install_manifest(&outcome.entry.body, previous.as_deref())
                    .await?;
                Ok(catalog)
            }
            Err(e) if e.is_network_class() => self.stale_manifest(e).await,
            Err(e) => Err(e),
        }
    }

    async fn stale_manifest(&self, error: ZenError) -> Result<Arc<Catalog>> {
        if let Ok(Some(stale)) = self.cache.peek(MANIFEST_KEY).await {
            if let Ok(manifest) = super::manifest::Manifest::parse(&stale.body) {
                warn!(
                    error = %error,
                    age_secs = stale.age.as_secs(),
                    "manifest refresh failed; using stale cached manifest"
                );
                return Ok(self.registry.install(manifest));
            }
        }
        if let Some(catalog) = self.registry.snapshot() {
            warn!(error = %error, "manifest refresh failed; keeping the loaded manifest");
            return Ok(catalog);
        }
        Err(error)
    }

    /// Parse and install `raw`, dropping cached bodies of changed assets
    async fn install_manifest(
        &self,
        raw: &[u8],
        previous: Option<&Catalog>,
    ) -> Result<(Arc<Catalog>, ManifestDiff)> {
        let catalog = match self.registry.load(raw) {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(error = %e, "manifest failed to parse; dropping cached copy");
                self.cache.delete(MANIFEST_KEY).await?;
                return Err(e);
            }
        };

        let diff = catalog.diff_from(previous);
        if previous.is_some() {
            for name in diff.updated.iter().chain(&diff.removed) {
                self.cache.delete(&asset_cache_key(name)).await?;
            }
        }
        debug!(
            assets = catalog.len(),
            added = diff.added.len(),
            updated = diff.updated.len(),
            removed = diff.removed.len(),
            "installed manifest"
        );
        Ok((catalog, diff))
    }

    /// Catalogue parsed from the cached manifest, fresh or not
    async fn cached_catalog(&self) -> Option<Arc<Catalog>> {
        let cached = self.cache.peek(MANIFEST_KEY).await.ok()??;
        let manifest = super::manifest::Manifest::parse(&cached.body).ok()?;
        Some(Arc::new(Catalog::new(manifest)))
    }
}

#[async_trait]
impl TemplateSource for AssetClient {
    async fn fetch_template(&self, name: &str) -> Result<TemplateAsset> {
        let content = self.get(name, GetOptions::default()).await?;
        let source = content
            .text()
            .map_err(|e| ZenError::CompileError {
                name: name.to_string(),
                line: None,
                message: e.to_string(),
            })?
            .to_string();
        Ok(TemplateAsset {
            name: name.to_string(),
            metadata: content.metadata,
            source,
        })
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}
