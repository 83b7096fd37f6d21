//! Provider rate-limit accounting
//!
//! GitHub reports `X-RateLimit-*` headers, GitLab the unprefixed
//! `RateLimit-*` form. Reset times are epoch seconds in both.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::http::HttpResponse;

/// Rate-limit state advertised by one response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    /// Requests allowed per window
    pub limit: Option<u64>,
    /// Requests left in the current window
    pub remaining: Option<u64>,
    /// When the window resets
    pub reset_at: Option<DateTime<Utc>>,
    /// How long the provider asked us to wait
    #[serde(skip)]
    pub retry_after: Option<Duration>,
}

impl RateLimitInfo {
    /// Read rate-limit headers from `response`
    ///
    /// Returns `None` when the response carries none of them.
    #[must_use]
    pub fn from_response(response: &HttpResponse, now: DateTime<Utc>) -> Option<Self> {
        let number = |names: &[&str]| {
            names
                .iter()
                .find_map(|n| response.header_str(n))
                .and_then(|v| v.trim().parse::<u64>().ok())
        };

        let info = Self {
            limit: number(&["x-ratelimit-limit", "ratelimit-limit"]),
            remaining: number(&["x-ratelimit-remaining", "ratelimit-remaining"]),
            reset_at: number(&["x-ratelimit-reset", "ratelimit-reset"])
                .and_then(|secs| i64::try_from(secs).ok())
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
            retry_after: response
                .header_str("retry-after")
                .and_then(|v| parse_retry_after(v, now)),
        };

        if info == Self::default() {
            None
        } else {
            Some(info)
        }
    }

    /// No requests left in the window
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Time until the window resets, if it is in the future
    #[must_use]
    pub fn reset_in(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.reset_at
            .and_then(|at| at.signed_duration_since(now).to_std().ok())
    }
}

/// Parse a `Retry-After` value: delay seconds or an HTTP date
#[must_use]
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    Some(
        at.with_timezone(&Utc)
            .signed_duration_since(now)
            .to_std()
            .unwrap_or_default(),
    )
}

/// Latest rate-limit state seen by a fetcher
#[derive(Debug, Default)]
pub struct RateLimitTracker {
    latest: Mutex<Option<RateLimitInfo>>,
}

impl RateLimitTracker {
    /// Empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the state advertised by `response`
    pub fn observe(&self, response: &HttpResponse, now: DateTime<Utc>) -> Option<RateLimitInfo> {
        let info = RateLimitInfo::from_response(response, now)?;
        if let Some(remaining) = info.remaining {
            tracing::debug!(remaining, limit = ?info.limit, "rate limit");
        }
        *self.latest.lock() = Some(info.clone());
        Some(info)
    }

    /// Most recent state, if any response carried one
    #[must_use]
    pub fn latest(&self) -> Option<RateLimitInfo> {
        self.latest.lock().clone()
    }

    /// True when fewer than `min_remaining` requests are left
    ///
    /// Unknown budgets never defer.
    #[must_use]
    pub fn below(&self, min_remaining: u64) -> bool {
        self.latest
            .lock()
            .as_ref()
            .and_then(|i| i.remaining)
            .is_some_and(|r| r < min_remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 10, 21, 7, 0, 0).unwrap()
    }

    #[test]
    fn test_github_headers() {
        let response = HttpResponse::new(200, "")
            .with_header("X-RateLimit-Limit", "5000")
            .with_header("X-RateLimit-Remaining", "4987")
            .with_header("X-RateLimit-Reset", "1445411400");
        let info = RateLimitInfo::from_response(&response, now()).unwrap();
        assert_eq!(info.limit, Some(5_000));
        assert_eq!(info.remaining, Some(4_987));
        assert_eq!(info.reset_in(now()), Some(Duration::from_secs(1_800)));
        assert!(!info.is_exhausted());
    }

    #[test]
    fn test_gitlab_headers() {
        let response = HttpResponse::new(200, "")
            .with_header("RateLimit-Limit", "600")
            .with_header("RateLimit-Remaining", "0");
        let info = RateLimitInfo::from_response(&response, now()).unwrap();
        assert!(info.is_exhausted());
    }

    #[test]
    fn test_no_headers() {
        assert!(RateLimitInfo::from_response(&HttpResponse::new(200, ""), now()).is_none());
    }

    #[test]
    fn test_retry_after_forms() {
        assert_eq!(parse_retry_after("30", now()), Some(Duration::from_secs(30)));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", now()),
            Some(Duration::from_secs(28 * 60))
        );
        assert_eq!(parse_retry_after("soon", now()), None);
    }

    #[test]
    fn test_tracker_threshold() {
        let tracker = RateLimitTracker::new();
        assert!(!tracker.below(10));
        tracker.observe(
            &HttpResponse::new(200, "").with_header("x-ratelimit-remaining", "3"),
            now(),
        );
        assert!(tracker.below(10));
        assert!(!tracker.below(3));
    }
}
