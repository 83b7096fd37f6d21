//! On-disk asset cache
//!
//! Layout under the cache root:
//!
//! ```text
//! ~/.zen/library/
//! ├── index.json          key -> {file, size, stored_at, ttl, hash, accessed_at}
//! ├── 9f86d081....entry   one JSON header line, then the body bytes
//! └── 2c26b46b....entry
//! ```
//!
//! Entry files are named by the SHA-256 of their key. The header line makes
//! each entry self-describing, so a damaged index is rebuilt from the
//! entries. Both the index and the entries are replaced by rename, never
//! written in place.
//!
//! Readers take the index lock only to copy an entry out. A body whose
//! header no longer matches that copy was replaced by a concurrent write
//! and reads as a miss. Entry files are written and removed under a
//! separate file lock, never under the index lock.
//!
//! Entries are fresh while `now - stored_at < ttl`. The total body size
//! never exceeds the configured cap: a `put` that would overflow evicts the
//! least recently accessed entries (oldest `stored_at` first on ties), and
//! an entry larger than the cap is refused outright.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::singleflight::{Role, SingleFlight};
use crate::clock::SharedClock;
use crate::error::{Result, ZenError};
use crate::fsutil;

const INDEX_FILE: &str = "index.json";
const ENTRY_EXT: &str = "entry";
const INDEX_VERSION: u32 = 1;

/// Hex SHA-256 of `data`
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Cache settings
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Cache root directory
    pub root: PathBuf,
    /// Cap on the sum of entry sizes, in bytes
    pub max_bytes: u64,
    /// TTL used when a caller does not pass one
    pub default_ttl: Duration,
    /// Verify digests on every read
    pub integrity_checks: bool,
}

impl CacheConfig {
    /// Settings derived from the asset configuration
    #[must_use]
    pub fn from_settings(settings: &crate::config::AssetSettings) -> Self {
        Self {
            root: settings.cache_path.clone(),
            max_bytes: settings.cache_size_bytes(),
            default_ttl: settings.default_ttl(),
            integrity_checks: settings.integrity_checks_enabled,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    file: String,
    size: u64,
    stored_at: DateTime<Utc>,
    ttl_secs: u64,
    hash: String,
    accessed_at: DateTime<Utc>,
}

impl IndexEntry {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.stored_at) < ttl_delta(self.ttl_secs)
    }

    fn same_version(&self, stored_at: DateTime<Utc>, hash: &str) -> bool {
        self.stored_at == stored_at && self.hash.eq_ignore_ascii_case(hash)
    }

    fn describes(&self, header: &EntryHeader) -> bool {
        self.same_version(header.stored_at, &header.hash)
    }
}

fn ttl_delta(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1_000))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheIndex {
    version: u32,
    #[serde(default)]
    last_sync: Option<DateTime<Utc>>,
    #[serde(default)]
    entries: BTreeMap<String, IndexEntry>,
}

impl Default for CacheIndex {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            last_sync: None,
            entries: BTreeMap::new(),
        }
    }
}

impl CacheIndex {
    fn total_size(&self) -> u64 {
        self.entries.values().map(|e| e.size).sum()
    }

    /// Drop least recently used entries (never `keep`) until the total fits
    fn evict_to_fit(&mut self, max_bytes: u64, keep: Option<&str>) -> Vec<(String, IndexEntry)> {
        let mut total = self.total_size();
        if total <= max_bytes {
            return Vec::new();
        }

        let mut candidates: Vec<(String, DateTime<Utc>, DateTime<Utc>)> = self
            .entries
            .iter()
            .filter(|(k, _)| Some(k.as_str()) != keep)
            .map(|(k, e)| (k.clone(), e.accessed_at, e.stored_at))
            .collect();
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)));

        let mut evicted = Vec::new();
        for (key, _, _) in candidates {
            if total <= max_bytes {
                break;
            }
            if let Some(entry) = self.entries.remove(&key) {
                total -= entry.size;
                evicted.push((key, entry));
            }
        }
        evicted
    }
}

/// First line of every entry file
#[derive(Debug, Serialize, Deserialize)]
struct EntryHeader {
    key: String,
    stored_at: DateTime<Utc>,
    ttl_secs: u64,
    hash: String,
}

/// A body read from the cache
#[derive(Debug, Clone)]
pub struct CachedBody {
    /// Entry bytes
    pub body: Bytes,
    /// When the entry was written
    pub stored_at: DateTime<Utc>,
    /// Time since `stored_at`
    pub age: Duration,
    /// Stored digest
    pub hash: String,
    /// The digest was recomputed and matched on this read
    pub verified: bool,
}

/// What a fetch function hands to the cache
#[derive(Debug, Clone)]
pub struct Fetched {
    /// Bytes to store
    pub body: Bytes,
    /// Digest to record instead of the computed one
    pub declared_hash: Option<String>,
}

impl From<Bytes> for Fetched {
    fn from(body: Bytes) -> Self {
        Self {
            body,
            declared_hash: None,
        }
    }
}

/// Result of [`CacheStore::get_or_fetch`]
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// The entry
    pub entry: CachedBody,
    /// Served from disk without running the fetch function
    pub cached: bool,
    /// This caller waited on another caller's fetch
    pub coalesced: bool,
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheInfo {
    /// Cache root
    pub root: PathBuf,
    /// Sum of entry sizes
    pub total_size_bytes: u64,
    /// Configured cap
    pub max_size_bytes: u64,
    /// Entries in the index
    pub entry_count: usize,
    /// Reads served from disk
    pub hits: u64,
    /// Reads that found nothing fresh
    pub misses: u64,
    /// `hits / (hits + misses)`, 0 before any read
    pub hit_ratio: f64,
    /// Completion time of the last sync
    pub last_sync: Option<DateTime<Utc>>,
}

impl CacheInfo {
    /// Total size in megabytes
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn total_size_mb(&self) -> f64 {
        self.total_size_bytes as f64 / 1_048_576.0
    }
}

#[derive(Debug, Clone, Copy)]
struct ReadOptions {
    verify: bool,
    allow_stale: bool,
    count: bool,
}

/// Content-addressed, size-bounded, TTL-governed cache
#[derive(Debug)]
pub struct CacheStore {
    config: CacheConfig,
    clock: SharedClock,
    index: RwLock<CacheIndex>,
    files: Mutex<()>,
    persist_lock: Mutex<()>,
    flights: SingleFlight<(CachedBody, bool)>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStore {
    /// Open the cache at `config.root`, reconciling index and files
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero size cap, `StorageUnavailable` when the
    /// root cannot be created or listed.
    pub async fn open(config: CacheConfig, clock: SharedClock) -> Result<Self> {
        if config.max_bytes == 0 {
            return Err(ZenError::InvalidArgument(
                "cache size limit must be greater than zero".into(),
            ));
        }
        let root = config.root.clone();
        let index = tokio::task::spawn_blocking(move || reconcile(&root))
            .await
            .map_err(|e| ZenError::StorageUnavailable(format!("cache scan task failed: {e}")))??;

        let store = Self {
            config,
            clock,
            index: RwLock::new(index),
            files: Mutex::new(()),
            persist_lock: Mutex::new(()),
            flights: SingleFlight::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        };

        let evicted = store
            .index
            .write()
            .await
            .evict_to_fit(store.config.max_bytes, None);
        let evicted_files: Vec<&str> = evicted.iter().map(|(_, e)| e.file.as_str()).collect();
        store.remove_files(evicted_files).await?;
        if !evicted.is_empty() {
            info!(count = evicted.len(), "evicted entries over the size cap");
        }
        store.persist().await?;
        Ok(store)
    }

    /// Cache settings
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Fresh entry for `key`, verified when integrity checks are on
    ///
    /// # Errors
    ///
    /// `ChecksumMismatch` when the stored bytes no longer match their digest;
    /// the entry has been removed by the time this is returned.
    pub async fn get(&self, key: &str) -> Result<Option<CachedBody>> {
        self.read(
            key,
            ReadOptions {
                verify: self.config.integrity_checks,
                allow_stale: false,
                count: true,
            },
        )
        .await
    }

    /// Like [`CacheStore::get`] with an explicit verification choice
    ///
    /// # Errors
    ///
    /// As for [`CacheStore::get`].
    pub async fn get_verified(&self, key: &str, verify: bool) -> Result<Option<CachedBody>> {
        self.read(
            key,
            ReadOptions {
                verify,
                allow_stale: false,
                count: true,
            },
        )
        .await
    }

    /// Entry for `key` even if its TTL has passed
    ///
    /// # Errors
    ///
    /// As for [`CacheStore::get`].
    pub async fn peek(&self, key: &str) -> Result<Option<CachedBody>> {
        self.read(
            key,
            ReadOptions {
                verify: self.config.integrity_checks,
                allow_stale: true,
                count: true,
            },
        )
        .await
    }

    /// True when `key` has an index entry inside its TTL
    pub async fn is_fresh(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.index
            .read()
            .await
            .entries
            .get(key)
            .is_some_and(|e| e.is_fresh(now))
    }

    /// True when `key` has an index entry, fresh or not
    pub async fn contains(&self, key: &str) -> bool {
        self.index.read().await.entries.contains_key(key)
    }

    async fn read(&self, key: &str, options: ReadOptions) -> Result<Option<CachedBody>> {
        let now = self.clock.now();
        let entry = self.index.read().await.entries.get(key).cloned();

        let Some(entry) = entry else {
            self.count(options, false);
            debug!(key, "cache miss");
            return Ok(None);
        };
        if !options.allow_stale && !entry.is_fresh(now) {
            self.count(options, false);
            debug!(key, "cache entry expired");
            return Ok(None);
        }

        let path = self.config.root.join(&entry.file);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(key, "cache entry file vanished; dropping index entry");
                self.discard(key, Some(&entry)).await?;
                self.count(options, false);
                return Ok(None);
            }
            Err(e) => return Err(ZenError::io(&path, e)),
        };

        let Some((header, body)) = split_entry(&raw) else {
            warn!(key, "cache entry header is corrupt; removing entry");
            self.discard(key, Some(&entry)).await?;
            self.count(options, false);
            return Ok(None);
        };

        if header.key != key {
            warn!(key, found = %header.key, "cache entry belongs to another key; removing entry");
            self.discard(key, Some(&entry)).await?;
            self.count(options, false);
            return Ok(None);
        }

        let entry = if entry.describes(&header) {
            entry
        } else {
            let live = self.index.read().await.entries.get(key).cloned();
            match live {
                Some(live) if live.describes(&header) => live,
                _ => {
                    debug!(key, "cache entry rewritten during read");
                    self.count(options, false);
                    return Ok(None);
                }
            }
        };

        if options.verify {
            let actual = sha256_hex(body);
            if !actual.eq_ignore_ascii_case(&header.hash) {
                warn!(key, "cache entry failed integrity check; removing entry");
                self.discard(key, Some(&entry)).await?;
                return Err(ZenError::ChecksumMismatch {
                    key: key.to_string(),
                    expected: header.hash,
                    actual,
                });
            }
        }

        {
            let mut index = self.index.write().await;
            if let Some(live) = index.entries.get_mut(key) {
                if now > live.accessed_at {
                    live.accessed_at = now;
                }
            }
        }
        self.count(options, true);
        debug!(key, "cache hit");

        Ok(Some(CachedBody {
            body: Bytes::copy_from_slice(body),
            stored_at: entry.stored_at,
            age: now
                .signed_duration_since(entry.stored_at)
                .to_std()
                .unwrap_or_default(),
            hash: entry.hash,
            verified: options.verify,
        }))
    }

    fn count(&self, options: ReadOptions, hit: bool) {
        if !options.count {
            return;
        }
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Store `body` under `key` with `ttl` (the default TTL when `None`)
    ///
    /// # Errors
    ///
    /// `EntryTooLarge` when the body alone exceeds the cap, leaving existing
    /// entries untouched; I/O errors from writing the entry or index.
    pub async fn put(&self, key: &str, body: Bytes, ttl: Option<Duration>) -> Result<CachedBody> {
        self.put_fetched(key, Fetched::from(body), ttl).await
    }

    /// Store a fetched body, recording its declared digest when it has one
    ///
    /// # Errors
    ///
    /// As for [`CacheStore::put`].
    pub async fn put_fetched(
        &self,
        key: &str,
        fetched: Fetched,
        ttl: Option<Duration>,
    ) -> Result<CachedBody> {
        let size = fetched.body.len() as u64;
        if size > self.config.max_bytes {
            return Err(ZenError::EntryTooLarge {
                key: key.to_string(),
                size,
                limit: self.config.max_bytes,
            });
        }

        let now = self.clock.now();
        let ttl_secs = ttl.unwrap_or(self.config.default_ttl).as_secs();
        let hash = fetched
            .declared_hash
            .map(|h| h.to_ascii_lowercase())
            .unwrap_or_else(|| sha256_hex(&fetched.body));
        let file = entry_file_name(key);

        let header = EntryHeader {
            key: key.to_string(),
            stored_at: now,
            ttl_secs,
            hash: hash.clone(),
        };
        let mut contents = serde_json::to_vec(&header)?;
        contents.push(b'\n');
        contents.extend_from_slice(&fetched.body);

        let path = self.config.root.join(&file);
        let files = self.files.lock().await;
        tokio::task::spawn_blocking(move || fsutil::write_atomic(&path, &contents, 0o644, 0o755))
            .await
            .map_err(|e| ZenError::StorageUnavailable(format!("cache write task failed: {e}")))??;

        let evicted = {
            let mut index = self.index.write().await;
            index.entries.insert(
                key.to_string(),
                IndexEntry {
                    file,
                    size,
                    stored_at: now,
                    ttl_secs,
                    hash: hash.clone(),
                    accessed_at: now,
                },
            );
            index.evict_to_fit(self.config.max_bytes, Some(key))
        };
        let evicted_files: Vec<&str> = evicted.iter().map(|(_, e)| e.file.as_str()).collect();
        self.remove_files(evicted_files).await?;
        drop(files);
        for (victim, _) in &evicted {
            debug!(key = %victim, "evicted cache entry");
        }

        self.persist().await?;
        debug!(key, size, ttl_secs, "cached entry");

        Ok(CachedBody {
            body: fetched.body,
            stored_at: now,
            age: Duration::ZERO,
            hash,
            verified: false,
        })
    }

    /// Remove `key`; removing a missing key succeeds
    ///
    /// # Errors
    ///
    /// I/O errors removing the file or writing the index.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.discard(key, None).await
    }

    /// Remove every entry
    ///
    /// # Errors
    ///
    /// I/O errors removing files or writing the index.
    pub async fn clear(&self) -> Result<()> {
        let files = self.files.lock().await;
        let entries = std::mem::take(&mut self.index.write().await.entries);
        self.remove_files(entries.values().map(|e| e.file.as_str())).await?;
        drop(files);
        let removed = entries.len();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.persist().await?;
        info!(removed, "cleared cache");
        Ok(())
    }

    /// Size, count, hit ratio and last sync
    pub async fn info(&self) -> CacheInfo {
        let index = self.index.read().await;
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        #[allow(clippy::cast_precision_loss)]
        let hit_ratio = if hits + misses == 0 {
            0.0
        } else {
            hits as f64 / (hits + misses) as f64
        };

        CacheInfo {
            root: self.config.root.clone(),
            total_size_bytes: index.total_size(),
            max_size_bytes: self.config.max_bytes,
            entry_count: index.entries.len(),
            hits,
            misses,
            hit_ratio,
            last_sync: index.last_sync,
        }
    }

    /// Record a completed sync
    ///
    /// # Errors
    ///
    /// I/O errors writing the index.
    pub async fn record_sync(&self, at: DateTime<Utc>) -> Result<()> {
        self.index.write().await.last_sync = Some(at);
        self.persist().await
    }

    /// Cached body for `key`, running `fetch` at most once across
    /// concurrent callers when there is no fresh entry
    ///
    /// Fetch failures reach every waiting caller and are not cached.
    ///
    /// # Errors
    ///
    /// Errors from reading the cache, from `fetch`, or from storing its
    /// result.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<FetchOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Fetched>>,
    {
        self.get_or_fetch_verified(key, ttl, self.config.integrity_checks, fetch)
            .await
    }

    /// [`CacheStore::get_or_fetch`] with an explicit verification choice
    ///
    /// # Errors
    ///
    /// As for [`CacheStore::get_or_fetch`].
    pub async fn get_or_fetch_verified<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        verify: bool,
        fetch: F,
    ) -> Result<FetchOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Fetched>>,
    {
        if let Some(entry) = self.get_verified(key, verify).await? {
            return Ok(FetchOutcome {
                entry,
                cached: true,
                coalesced: false,
            });
        }
        self.coalesce(key, ttl, Some(verify), fetch).await
    }

    /// Run `fetch` (coalesced with concurrent callers) and store the result,
    /// ignoring any cached entry
    ///
    /// # Errors
    ///
    /// Errors from `fetch` or from storing its result.
    pub async fn fetch_through<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<FetchOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Fetched>>,
    {
        self.coalesce(key, ttl, None, fetch).await
    }

    /// The leader re-reads the cache first when `recheck` is set, so a
    /// caller that missed just as another flight finished does not fetch
    /// again.
    async fn coalesce<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        recheck: Option<bool>,
        fetch: F,
    ) -> Result<FetchOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Fetched>>,
    {
        let (result, role) = self
            .flights
            .run(key, || async {
                if let Some(verify) = recheck {
                    let options = ReadOptions {
                        verify,
                        allow_stale: false,
                        count: false,
                    };
                    if let Some(entry) = self.read(key, options).await? {
                        return Ok((entry, true));
                    }
                }
                let fetched = fetch().await?;
                Ok((self.put_fetched(key, fetched, ttl).await?, false))
            })
            .await;

        let (entry, cached) = result?;
        Ok(FetchOutcome {
            entry,
            cached,
            coalesced: role == Role::Follower,
        })
    }

    /// Remove `key`, but only while its index entry is still `expected`
    /// when one is given
    async fn discard(&self, key: &str, expected: Option<&IndexEntry>) -> Result<()> {
        let files = self.files.lock().await;
        let removed = {
            let mut index = self.index.write().await;
            let matches = index.entries.get(key).is_some_and(|live| {
                expected.is_none_or(|e| live.same_version(e.stored_at, &e.hash))
            });
            if matches {
                index.entries.remove(key)
            } else {
                None
            }
        };
        if let Some(entry) = &removed {
            self.remove_files(std::iter::once(entry.file.as_str())).await?;
        }
        drop(files);
        if removed.is_some() {
            self.persist().await?;
        }
        Ok(())
    }

    async fn remove_files<'a>(&self, files: impl IntoIterator<Item = &'a str>) -> Result<()> {
        for file in files {
            let path = self.config.root.join(file);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(ZenError::io(&path, e)),
            }
        }
        Ok(())
    }

    /// Write the index to disk
    ///
    /// # Errors
    ///
    /// I/O errors writing the index file.
    pub async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let contents = serde_json::to_vec_pretty(&*self.index.read().await)?;
        let path = self.config.root.join(INDEX_FILE);
        tokio::task::spawn_blocking(move || fsutil::write_atomic(&path, &contents, 0o644, 0o755))
            .await
            .map_err(|e| ZenError::StorageUnavailable(format!("index write task failed: {e}")))?
    }
}

fn entry_file_name(key: &str) -> String {
    format!("{}.{ENTRY_EXT}", sha256_hex(key.as_bytes()))
}

fn split_entry(raw: &[u8]) -> Option<(EntryHeader, &[u8])> {
    let newline = raw.iter().position(|&b| b == b'\n')?;
    let header: EntryHeader = serde_json::from_slice(&raw[..newline]).ok()?;
    Some((header, &raw[newline + 1..]))
}

/// Load the index and bring it in line with the files on disk
fn reconcile(root: &Path) -> Result<CacheIndex> {
    fsutil::create_dir_all_with_mode(root, 0o755)
        .map_err(|e| ZenError::StorageUnavailable(format!("cannot create cache root: {e}")))?;

    let index_path = root.join(INDEX_FILE);
    let loaded = match std::fs::read(&index_path) {
        Ok(raw) => match serde_json::from_slice::<CacheIndex>(&raw) {
            Ok(index) if index.version == INDEX_VERSION => Some(index),
            Ok(index) => {
                warn!(version = index.version, "unknown cache index version; rebuilding");
                None
            }
            Err(e) => {
                warn!(error = %e, "cache index is corrupt; rebuilding from entries");
                None
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Some(CacheIndex::default()),
        Err(e) => {
            warn!(error = %e, "cache index unreadable; rebuilding from entries");
            None
        }
    };
    let rebuilding = loaded.is_none();
    let mut index = loaded.unwrap_or_default();

    let listing = std::fs::read_dir(root)
        .map_err(|e| ZenError::StorageUnavailable(format!("cannot list {}: {e}", root.display())))?;

    let mut files = Vec::new();
    for dirent in listing {
        let dirent = dirent.map_err(|e| ZenError::io(root, e))?;
        let name = dirent.file_name().to_string_lossy().into_owned();
        if name == INDEX_FILE || !dirent.path().is_file() {
            continue;
        }
        if Path::new(&name).extension().and_then(|e| e.to_str()) == Some(ENTRY_EXT) {
            files.push(name);
        } else {
            // Leftover temporary files from interrupted writes
            fsutil::remove_if_exists(&dirent.path())?;
        }
    }

    if rebuilding {
        for name in &files {
            let path = root.join(name);
            let Ok(raw) = std::fs::read(&path) else { continue };
            match split_entry(&raw) {
                Some((header, body)) if entry_file_name(&header.key) == *name => {
                    index.entries.insert(
                        header.key,
                        IndexEntry {
                            file: name.clone(),
                            size: body.len() as u64,
                            stored_at: header.stored_at,
                            ttl_secs: header.ttl_secs,
                            hash: header.hash,
                            accessed_at: header.stored_at,
                        },
                    );
                }
                _ => {}
            }
        }
    }

    index
        .entries
        .retain(|key, entry| {
            let present = files.contains(&entry.file);
            if !present {
                debug!(key = %key, "dropping index entry without a file");
            }
            present
        });

    let referenced: std::collections::HashSet<&str> =
        index.entries.values().map(|e| e.file.as_str()).collect();
    let mut orphans = 0_usize;
    for name in &files {
        if !referenced.contains(name.as_str()) {
            fsutil::remove_if_exists(&root.join(name))?;
            orphans += 1;
        }
    }
    if orphans > 0 {
        info!(orphans, "removed orphaned cache files");
    }

    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    async fn open(dir: &TempDir, max_bytes: u64, clock: &ManualClock) -> CacheStore {
        CacheStore::open(
            CacheConfig {
                root: dir.path().join("cache"),
                max_bytes,
                default_ttl: Duration::from_secs(3_600),
                integrity_checks: true,
            },
            clock.shared(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(start());
        let cache = open(&dir, 1_024, &clock).await;

        let stored = cache
            .put("asset:demo", Bytes::from_static(b"hello"), None)
            .await
            .unwrap();
        assert_eq!(stored.hash, sha256_hex(b"hello"));

        clock.advance(chrono::Duration::seconds(30));
        let hit = cache.get("asset:demo").await.unwrap().unwrap();
        assert_eq!(&hit.body[..], b"hello");
        assert_eq!(hit.age, Duration::from_secs(30));
        assert!(hit.verified);

        let info = cache.info().await;
        assert_eq!(info.entry_count, 1);
        assert_eq!(info.total_size_bytes, 5);
        assert_eq!(info.hits, 1);
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(start());
        let cache = open(&dir, 1_024, &clock).await;
        cache
            .put("k", Bytes::from_static(b"v"), Some(Duration::from_secs(60)))
            .await
            .unwrap();

        clock.advance(chrono::Duration::seconds(59));
        assert!(cache.get("k").await.unwrap().is_some());
        clock.advance(chrono::Duration::seconds(1));
        assert!(cache.get("k").await.unwrap().is_none());

        // Stale entries stay readable through peek
        assert!(cache.peek("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_entry_too_large_leaves_existing_entries() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(start());
        let cache = open(&dir, 8, &clock).await;
        cache.put("small", Bytes::from_static(b"1234"), None).await.unwrap();

        let err = cache
            .put("big", Bytes::from_static(b"123456789"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EntryTooLarge);
        assert!(cache.get("small").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_lru_eviction_order() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(start());
        let cache = open(&dir, 10, &clock).await;

        cache.put("a", Bytes::from_static(b"aaaa"), None).await.unwrap();
        clock.advance(chrono::Duration::seconds(1));
        cache.put("b", Bytes::from_static(b"bbbb"), None).await.unwrap();
        clock.advance(chrono::Duration::seconds(1));
        // Touch "a" so "b" becomes least recently used
        cache.get("a").await.unwrap().unwrap();
        clock.advance(chrono::Duration::seconds(1));
        cache.put("c", Bytes::from_static(b"cccc"), None).await.unwrap();

        assert!(cache.contains("a").await);
        assert!(!cache.contains("b").await);
        assert!(cache.contains("c").await);
        assert!(cache.info().await.total_size_bytes <= 10);
    }

    #[tokio::test]
    async fn test_tampered_entry_is_removed() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(start());
        let cache = open(&dir, 1_024, &clock).await;
        cache.put("asset:x", Bytes::from_static(b"original"), None).await.unwrap();

        let path = dir.path().join("cache").join(entry_file_name("asset:x"));
        let mut raw = std::fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x20;
        std::fs::write(&path, raw).unwrap();

        let err = cache.get("asset:x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
        assert!(!path.exists());
        assert!(cache.get("asset:x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reopen_keeps_entries_and_removes_orphans() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(start());
        {
            let cache = open(&dir, 1_024, &clock).await;
            cache.put("manifest", Bytes::from_static(b"m"), None).await.unwrap();
        }
        let root = dir.path().join("cache");
        std::fs::write(root.join("deadbeef.entry"), b"junk").unwrap();
        std::fs::write(root.join(".tmpXYZ"), b"partial").unwrap();

        let cache = open(&dir, 1_024, &clock).await;
        assert!(cache.get("manifest").await.unwrap().is_some());
        assert!(!root.join("deadbeef.entry").exists());
        assert!(!root.join(".tmpXYZ").exists());
    }

    #[tokio::test]
    async fn test_corrupt_index_is_rebuilt_from_entries() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(start());
        {
            let cache = open(&dir, 1_024, &clock).await;
            cache.put("asset:a", Bytes::from_static(b"alpha"), None).await.unwrap();
            cache.put("asset:b", Bytes::from_static(b"beta"), None).await.unwrap();
        }
        std::fs::write(dir.path().join("cache").join(INDEX_FILE), b"{broken").unwrap();

        let cache = open(&dir, 1_024, &clock).await;
        assert_eq!(cache.info().await.entry_count, 2);
        let hit = cache.get("asset:b").await.unwrap().unwrap();
        assert_eq!(&hit.body[..], b"beta");
    }

    #[tokio::test]
    async fn test_get_or_fetch_single_flight() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(start());
        let cache = Arc::new(open(&dir, 1_024, &clock).await);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch("asset:story", None, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(Fetched::from(Bytes::from_static(b"story body")))
                    })
                    .await
            }));
        }
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert_eq!(&outcome.entry.body[..], b"story body");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let outcome = cache
            .get_or_fetch("asset:story", None, || async {
                Err(ZenError::NetworkError("should not be called".into()))
            })
            .await
            .unwrap();
        assert!(outcome.cached);
    }

    #[tokio::test]
    async fn test_fetch_errors_are_not_cached() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(start());
        let cache = open(&dir, 1_024, &clock).await;

        let err = cache
            .get_or_fetch("asset:x", None, || async {
                Err(ZenError::Timeout("slow".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(!cache.contains("asset:x").await);
    }

    #[tokio::test]
    async fn test_declared_hash_is_recorded() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(start());
        let cache = open(&dir, 1_024, &clock).await;
        let declared = sha256_hex(b"something else");

        cache
            .put_fetched(
                "asset:x",
                Fetched {
                    body: Bytes::from_static(b"served"),
                    declared_hash: Some(declared.clone()),
                },
                None,
            )
            .await
            .unwrap();

        // Unverified reads return the body; verified reads reject it
        assert!(cache.get_verified("asset:x", false).await.unwrap().is_some());
        let err = cache.get_verified("asset:x", true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rewrites_during_reads_are_never_reported_as_tampering() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(start());
        let cache = Arc::new(open(&dir, 1 << 20, &clock).await);
        cache.put("k", Bytes::from_static(b"initial"), None).await.unwrap();

        let writer = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                for i in 0..400 {
                    let body = Bytes::from(format!("version {i} {}", "x".repeat(i % 37)));
                    cache.put("k", body, None).await.unwrap();
                }
            })
        };

        for _ in 0..2_000 {
            match cache.get("k").await {
                Ok(Some(hit)) => assert_eq!(sha256_hex(&hit.body), hit.hash),
                Ok(None) => {}
                Err(e) => panic!("read failed while the entry was rewritten: {e}"),
            }
        }
        writer.await.unwrap();

        let last = cache.get("k").await.unwrap().unwrap();
        assert!(last.body.starts_with(b"version 399"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_eviction_keeps_index_and_files_in_step() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(start());
        let cache = Arc::new(open(&dir, 256, &clock).await);

        let mut handles = Vec::new();
        for task in 0..4 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    let key = format!("asset:{task}-{i}");
                    cache.put(&key, Bytes::from(vec![b'a'; 40]), None).await.unwrap();
                    cache.get(&format!("asset:{task}-{}", i / 2)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let root = dir.path().join("cache");
        let index = cache.index.read().await;
        assert!(index.total_size() <= 256);
        for entry in index.entries.values() {
            assert!(root.join(&entry.file).exists());
        }
        let on_disk = std::fs::read_dir(&root)
            .unwrap()
            .filter_map(|d| d.ok())
            .filter(|d| d.path().extension().is_some_and(|e| e == ENTRY_EXT))
            .count();
        assert_eq!(on_disk, index.entries.len());
    }

    #[tokio::test]
    async fn test_stale_copy_does_not_discard_newer_entry() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(start());
        let cache = open(&dir, 1_024, &clock).await;
        cache.put("k", Bytes::from_static(b"old"), None).await.unwrap();
        let stale = cache.index.read().await.entries["k"].clone();

        clock.advance(chrono::Duration::seconds(1));
        cache.put("k", Bytes::from_static(b"new"), None).await.unwrap();
        cache.discard("k", Some(&stale)).await.unwrap();

        let hit = cache.get("k").await.unwrap().unwrap();
        assert_eq!(&hit.body[..], b"new");
    }

    #[tokio::test]
    async fn test_clear_and_record_sync() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(start());
        let cache = open(&dir, 1_024, &clock).await;
        cache.put("a", Bytes::from_static(b"1"), None).await.unwrap();
        cache.record_sync(start()).await.unwrap();

        cache.clear().await.unwrap();
        let info = cache.info().await;
        assert_eq!(info.entry_count, 0);
        assert_eq!(info.total_size_bytes, 0);
        assert_eq!(info.last_sync, Some(start()));
    }
}
