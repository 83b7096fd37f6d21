//! Scripted HTTP transport

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Result, ZenError};
use crate::http::{HttpRequest, HttpResponse, HttpTransport};

type Outcome = std::result::Result<HttpResponse, ZenError>;

#[derive(Debug, Default)]
struct Script {
    outcomes: Vec<Outcome>,
    served: usize,
}

/// In-memory [`HttpTransport`] that serves scripted outcomes by URL
///
/// Outcomes scripted for a URL are served in order; once they run out the
/// last one keeps being served. Unscripted URLs answer 404.
///
/// # Example
///
/// ```rust
/// use zen::http::HttpResponse;
/// use zen::testing::MockTransport;
///
/// let transport = MockTransport::new();
/// transport.respond("https://api.github.com/user", HttpResponse::new(503, ""));
/// transport.respond("https://api.github.com/user", HttpResponse::new(200, "{}"));
/// assert_eq!(transport.request_count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, Script>>,
    sent: Mutex<Vec<HttpRequest>>,
    latency: Mutex<Option<Duration>>,
}

impl MockTransport {
    /// Transport with no routes
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script `response` for `url`
    pub fn respond(&self, url: impl Into<String>, response: HttpResponse) {
        self.push(url.into(), Ok(response));
    }

    /// Script a transport failure for `url`
    pub fn fail(&self, url: impl Into<String>, error: ZenError) {
        self.push(url.into(), Err(error));
    }

    /// Drop everything scripted for `url`
    pub fn clear_route(&self, url: &str) {
        self.routes.lock().remove(url);
    }

    /// Delay every response by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Requests received so far, oldest first
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.sent.lock().clone()
    }

    /// Number of requests received
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Number of requests received for `url`
    #[must_use]
    pub fn count_for(&self, url: &str) -> usize {
        self.sent.lock().iter().filter(|r| r.url == url).count()
    }

    fn push(&self, url: String, outcome: Outcome) {
        self.routes.lock().entry(url).or_default().outcomes.push(outcome);
    }

    fn next_outcome(&self, url: &str) -> Outcome {
        let mut routes = self.routes.lock();
        let Some(script) = routes.get_mut(url) else {
            return Ok(HttpResponse::new(404, ""));
        };
        let index = script.served.min(script.outcomes.len().saturating_sub(1));
        script.served += 1;
        script
            .outcomes
            .get(index)
            .cloned()
            .unwrap_or_else(|| Ok(HttpResponse::new(404, "")))
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest, _timeout: Duration) -> Result<HttpResponse> {
        let url = request.url.clone();
        self.sent.lock().push(request);
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.next_outcome(&url)
    }
}
