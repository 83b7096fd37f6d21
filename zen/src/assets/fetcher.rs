//! Authenticated downloads from the asset repository
//!
//! Files are read through the hosting provider's file API:
//!
//! | Provider | URL |
//! |---|---|
//! | GitHub | `{repo}/contents/{path}?ref={branch}` (raw media type) |
//! | GitLab | `{repo}/repository/files/{encoded path}/raw?ref={branch}` |
//! | other | `{repo}/{path}?ref={branch}` |
//!
//! Transient failures (transport errors, 408, 502, 503, 504) are retried
//! with backoff, 429 honours `Retry-After`, and 401/403/404 fail at once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::ratelimit::{RateLimitInfo, RateLimitTracker};
use super::retry::{with_retry, AttemptError, RetryPolicy};
use crate::auth::{AuthManager, ProviderId};
use crate::clock::{self, SharedClock};
use crate::config::AssetSettings;
use crate::error::{Result, ZenError};
use crate::http::{HttpRequest, HttpResponse, HttpTransport};

const GITHUB_RAW: &str = "application/vnd.github.raw";

/// Fetcher settings
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Base URL of the repository API
    pub repository_url: String,
    /// Default branch or ref
    pub branch: String,
    /// Provider hosting the repository
    pub provider: ProviderId,
    /// Manifest path inside the repository
    pub manifest_path: String,
    /// Deadline for one HTTP exchange
    pub request_timeout: Duration,
    /// Retry schedule
    pub retry: RetryPolicy,
    /// Concurrent requests allowed
    pub max_concurrent_requests: usize,
}

impl FetcherConfig {
    /// Settings derived from the asset configuration
    #[must_use]
    pub fn from_settings(settings: &AssetSettings) -> Self {
        Self {
            repository_url: settings.repository_url.clone(),
            branch: settings.branch.clone(),
            provider: settings.auth_provider,
            manifest_path: settings.manifest_path.clone(),
            request_timeout: settings.request_timeout(),
            retry: RetryPolicy::with_max_retries(settings.max_retries),
            max_concurrent_requests: settings.max_concurrent_requests.max(1),
        }
    }
}

/// URL of `path` at `branch` in the repository at `repository_url`
///
/// # Errors
///
/// `InvalidArgument` for empty, absolute or escaping paths.
pub fn file_url(
    provider: ProviderId,
    repository_url: &str,
    path: &str,
    branch: &str,
) -> Result<String> {
    let path = path.trim_start_matches("./");
    if path.is_empty()
        || path.starts_with('/')
        || path.split('/').any(|seg| seg == ".." || seg.is_empty())
    {
        return Err(ZenError::InvalidArgument(format!(
            "invalid repository path '{path}'"
        )));
    }

    let base = repository_url.trim_end_matches('/');
    let reference = urlencoding::encode(branch);
    let segments = path
        .split('/')
        .map(|seg| urlencoding::encode(seg).into_owned())
        .collect::<Vec<_>>()
        .join("/");

    Ok(match provider {
        ProviderId::Github => format!("{base}/contents/{segments}?ref={reference}"),
        ProviderId::Gitlab => format!(
            "{base}/repository/files/{}/raw?ref={reference}",
            urlencoding::encode(path)
        ),
        ProviderId::Jira | ProviderId::Linear => format!("{base}/{segments}?ref={reference}"),
    })
}

/// Downloads manifest and asset files
#[derive(Debug)]
pub struct AssetFetcher {
    config: FetcherConfig,
    transport: Arc<dyn HttpTransport>,
    auth: Option<Arc<AuthManager>>,
    clock: SharedClock,
    permits: Semaphore,
    rate_limit: RateLimitTracker,
    requests: AtomicU64,
}

impl AssetFetcher {
    /// Fetcher that sends requests anonymously
    #[must_use]
    pub fn new(config: FetcherConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let permits = Semaphore::new(config.max_concurrent_requests.max(1));
        Self {
            config,
            transport,
            auth: None,
            clock: clock::system(),
            permits,
            rate_limit: RateLimitTracker::new(),
            requests: AtomicU64::new(0),
        }
    }

    /// Attach credentials from `auth`
    #[must_use]
    pub fn with_auth(mut self, auth: Arc<AuthManager>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Use `clock` for `Retry-After` dates
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Fetcher settings
    #[must_use]
    pub const fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// HTTP exchanges performed so far, retries included
    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Latest rate-limit state reported by the provider
    #[must_use]
    pub fn rate_limit(&self) -> Option<RateLimitInfo> {
        self.rate_limit.latest()
    }

    /// True when fewer than `min_remaining` requests are left in the window
    #[must_use]
    pub fn rate_limit_below(&self, min_remaining: u64) -> bool {
        self.rate_limit.below(min_remaining)
    }

    /// Raw manifest bytes at `branch` (the configured branch when `None`)
    ///
    /// # Errors
    ///
    /// See [`AssetFetcher::fetch_asset`].
    pub async fn fetch_manifest(&self, branch: Option<&str>) -> Result<Bytes> {
        let path = self.config.manifest_path.clone();
        self.fetch_asset(&path, branch).await
    }

    /// Raw bytes of `path` at `branch` (the configured branch when `None`)
    ///
    /// # Errors
    ///
    /// `NotAuthenticated`, `Forbidden`, `NotFound`, `RateLimited`,
    /// `Timeout` or `NetworkError`.
    pub async fn fetch_asset(&self, path: &str, branch: Option<&str>) -> Result<Bytes> {
        let branch = branch.unwrap_or(&self.config.branch);
        let url = file_url(
            self.config.provider,
            &self.config.repository_url,
            path,
            branch,
        )?;
        let request = self.build_request(&url).await?;

        let body = with_retry(&self.config.retry, &url, |attempt| {
            let request = request.clone();
            async move { self.attempt(request, attempt).await }
        })
        .await?;

        info!(url = %url, bytes = body.len(), "downloaded");
        Ok(body)
    }

    async fn build_request(&self, url: &str) -> Result<HttpRequest> {
        let mut request = HttpRequest::get(url);
        if self.config.provider == ProviderId::Github {
            request = request.header("Accept", GITHUB_RAW)?;
        }

        let Some(auth) = &self.auth else {
            return Ok(request);
        };
        match auth.credential_for_request(self.config.provider).await? {
            Some(credential) => self.config.provider.descriptor().authorize(request, &credential),
            None => {
                debug!(provider = %self.config.provider, "no credential; requesting anonymously");
                Ok(request)
            }
        }
    }

    async fn attempt(
        &self,
        request: HttpRequest,
        attempt: u32,
    ) -> std::result::Result<Bytes, AttemptError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| AttemptError::permanent(ZenError::Cancelled("fetcher closed".into())))?;

        debug!(url = %request.url, attempt, "GET");
        self.requests.fetch_add(1, Ordering::Relaxed);
        let url = request.url.clone();
        let response = self
            .transport
            .send(request, self.config.request_timeout)
            .await?;
        let limits = self.rate_limit.observe(&response, self.clock.now());

        classify(&url, response, limits.as_ref())
    }

    /// Stop handing out request slots
    pub fn close(&self) {
        self.permits.close();
    }
}

fn classify(
    url: &str,
    response: HttpResponse,
    limits: Option<&RateLimitInfo>,
) -> std::result::Result<Bytes, AttemptError> {
    let status = response.status;
    if status.is_success() {
        return Ok(response.body);
    }

    let retry_after = limits.and_then(|l| l.retry_after);
    let retry_after_secs = retry_after.map(|d| d.as_secs());
    match status {
        StatusCode::UNAUTHORIZED => Err(AttemptError::permanent(ZenError::NotAuthenticated(
            format!("{url} rejected the credential"),
        ))),
        StatusCode::FORBIDDEN if limits.is_some_and(RateLimitInfo::is_exhausted) => {
            Err(AttemptError::transient(ZenError::RateLimited { retry_after_secs })
                .with_retry_after(retry_after))
        }
        StatusCode::FORBIDDEN => Err(AttemptError::permanent(ZenError::Forbidden(format!(
            "access to {url} denied"
        )))),
        StatusCode::NOT_FOUND => Err(AttemptError::permanent(ZenError::NotFound(url.to_string()))),
        StatusCode::TOO_MANY_REQUESTS => {
            Err(AttemptError::transient(ZenError::RateLimited { retry_after_secs })
                .with_retry_after(retry_after))
        }
        StatusCode::REQUEST_TIMEOUT => Err(AttemptError::transient(ZenError::Timeout(format!(
            "{url} answered 408"
        )))),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            Err(AttemptError::transient(ZenError::NetworkError(format!(
                "{url} answered {status}"
            ))))
        }
        _ => Err(AttemptError::permanent(ZenError::NetworkError(format!(
            "{url} answered {status}"
        )))),
    }
}
