//! HTTP client for MISP instances
//!
//! Builds reqwest clients with a bounded timeout and an optional proxy, and
//! describes how to reach one instance.

use reqwest::{Client, Proxy, Url};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Transport settings shared by every instance
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Optional proxy (http://, https://, socks5h://)
    pub proxy: Option<String>,
    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            proxy: None,
            user_agent: format!("vigil/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Errors from feed transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Create an HTTP client for feed requests
pub fn create_client(config: &TransportConfig) -> Result<Client, TransportError> {
    let mut builder = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(config.user_agent.as_str());

    if let Some(proxy) = &config.proxy {
        let proxy = Proxy::all(proxy).map_err(|e| TransportError::ClientBuild(e.to_string()))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| TransportError::ClientBuild(e.to_string()))
}

/// Where and how to reach one MISP instance
#[derive(Clone)]
pub struct MispEndpoint {
    /// Instance key used in configuration and cursor state
    pub name: String,
    pub url: Url,
    /// API key sent as the Authorization header
    pub key: String,
}

impl MispEndpoint {
    pub fn new(name: &str, url: &str, key: &str) -> Result<Self, TransportError> {
        let url = Url::parse(url).map_err(|e| TransportError::InvalidUrl(format!("{}: {}", url, e)))?;
        if url.cannot_be_a_base() {
            return Err(TransportError::InvalidUrl(url.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            url,
            key: key.to_string(),
        })
    }

    /// Absolute URL for an API path such as `/events/restSearch`
    pub fn api_url(&self, path: &str) -> Result<Url, TransportError> {
        self.url
            .join(path)
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", path, e)))
    }

    /// Browser URL of an event
    pub fn event_url(&self, event_id: &str) -> String {
        match self.api_url(&format!("/events/{}", event_id)) {
            Ok(url) => url.to_string(),
            Err(_) => format!("{}/events/{}", self.url.as_str().trim_end_matches('/'), event_id),
        }
    }
}

// Keeps the API key out of logs
impl fmt::Debug for MispEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MispEndpoint")
            .field("name", &self.name)
            .field("url", &self.url.as_str())
            .field("key", &"<redacted>")
            .finish()
    }
}
