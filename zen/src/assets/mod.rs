//! Asset acquisition
//!
//! - [`manifest`] - manifest parsing, the catalogue and list queries
//! - [`cache`] - the on-disk TTL + LRU cache with integrity checks
//! - [`fetcher`] - HTTP access to the asset repository
//! - [`client`] - the façade tying the three together
//!
//! Fetches for the same cache key are coalesced through [`singleflight`];
//! transient failures are retried on the schedule in [`retry`] and provider
//! budgets are tracked by [`ratelimit`].

pub mod cache;
pub mod client;
pub mod fetcher;
pub mod manifest;
pub mod ratelimit;
pub mod retry;
pub mod singleflight;

pub use cache::{CacheConfig, CacheInfo, CacheStore, CachedBody, FetchOutcome, Fetched};
pub use client::{
    AssetClient, AssetContent, GetOptions, SyncRequest, SyncResult, SyncStatus, MANIFEST_KEY,
};
pub use fetcher::{AssetFetcher, FetcherConfig};
pub use manifest::{
    AssetFilter, AssetMetadata, AssetType, Catalog, ListPage, Manifest, ManifestDiff,
    ManifestRegistry, TagMatch, VariableSpec, VariableType,
};
pub use ratelimit::{RateLimitInfo, RateLimitTracker};
pub use retry::RetryPolicy;
