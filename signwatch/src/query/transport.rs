//! HTTP transport used by the query executor.
//!
//! [`HttpTransport`] wraps an async `reqwest` client with a fixed request
//! timeout. A timed-out request simply fails; there is no cancellation
//! signal beyond that.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

/// Errors produced by a single HTTP request.
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum TransportError {
    /// Connection, TLS, or timeout failure.
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
    /// The server answered with a non-success status.
    #[error("{url} returned HTTP status {status}")]
    Status { url: String, status: u16 },
    /// The response body could not be read.
    #[error("failed to read body from {url}: {message}")]
    Body { url: String, message: String },
}

/// Fetches raw response bodies.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<String, TransportError>;
}

/// `reqwest`-backed [`Transport`].
///
/// This client is thread-safe and cheap to clone; one instance can be
/// shared by every executor of a chain.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Builds a transport whose every request times out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request {
                url: String::new(),
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<String, TransportError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        resp.text().await.map_err(|e| TransportError::Body {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

/// Joins a base endpoint and a path without doubling slashes.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Host (and port, if any) of an endpoint, for logs and error reports.
pub fn endpoint_host(endpoint: &str) -> String {
    match reqwest::Url::parse(endpoint) {
        Ok(url) => match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => endpoint.to_string(),
        },
        Err(_) => endpoint.to_string(),
    }
}
