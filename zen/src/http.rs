//! HTTP transport seam
//!
//! Provider identity probes and asset downloads go through [`HttpTransport`]
//! so that tests can script responses. The production implementation wraps
//! a shared `reqwest::Client`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};

use crate::error::{Result, ZenError};

/// Outgoing request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL
    pub url: String,
    /// Request headers
    pub headers: HeaderMap,
    /// Optional request body
    pub body: Option<Bytes>,
}

impl HttpRequest {
    /// A GET request for `url`
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// A POST request for `url` carrying a JSON body
    pub fn post_json(url: impl Into<String>, body: &serde_json::Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self {
            method: Method::POST,
            url: url.into(),
            headers,
            body: Some(Bytes::from(body.to_string())),
        }
    }

    /// Add a header, rejecting values that are not valid header text
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when the name or value is malformed.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ZenError::InvalidArgument(format!("header name {name}: {e}")))?;
        let mut value = HeaderValue::from_str(value)
            .map_err(|_| ZenError::InvalidArgument(format!("header value for {name} is not valid")))?;
        if name == http::header::AUTHORIZATION || name.as_str() == "private-token" {
            value.set_sensitive(true);
        }
        self.headers.insert(name, value);
        Ok(self)
    }
}

/// Buffered response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Full response body
    pub body: Bytes,
}

impl HttpResponse {
    /// Response with the given status and body and no headers
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Builder-style header insertion; invalid pairs are ignored
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Header value as text, if present and printable
    #[must_use]
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Something that can execute an HTTP request
#[async_trait]
pub trait HttpTransport: Send + Sync + std::fmt::Debug {
    /// Send `request`, giving up after `timeout`
    ///
    /// Any HTTP status is a successful return; only transport failures are
    /// errors (`Timeout` or `NetworkError`).
    async fn send(&self, request: HttpRequest, timeout: Duration) -> Result<HttpResponse>;
}

/// `reqwest`-backed transport
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport with a zen user agent
    ///
    /// # Errors
    ///
    /// Returns `NetworkError` if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("zen/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ZenError::NetworkError(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest, timeout: Duration) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .timeout(timeout);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(classify)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn classify(err: reqwest::Error) -> ZenError {
    if err.is_timeout() {
        ZenError::Timeout(err.to_string())
    } else {
        ZenError::NetworkError(err.to_string())
    }
}
