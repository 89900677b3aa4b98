//! Remote fetch capability.
//!
//! Every channel document and every package archive is retrieved through a
//! [`RemoteFetcher`]. The repository and installer only ever see this trait,
//! so tests can serve documents from memory and embedders can plug in their
//! own transport (authentication, proxies, caching).

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Failed to fetch {url}: {reason}")]
    Failed { url: String, reason: String },

    #[error("Not found: {url}")]
    NotFound { url: String },
}

impl FetchError {
    pub fn url(&self) -> &str {
        match self {
            Self::Failed { url, .. } | Self::NotFound { url } => url,
        }
    }
}

/// Fetches the raw bytes behind a URL.
///
/// `base_url` is the channel (or origin) the request belongs to, for
/// implementations that scope credentials per origin.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    async fn fetch(&self, base_url: &str, url: &str) -> Result<Vec<u8>, FetchError>;
}

#[async_trait]
impl<T: RemoteFetcher + ?Sized> RemoteFetcher for Arc<T> {
    async fn fetch(&self, base_url: &str, url: &str) -> Result<Vec<u8>, FetchError> {
        (**self).fetch(base_url, url).await
    }
}

/// Default fetcher over HTTP(S).
#[cfg(feature = "network")]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[cfg(feature = "network")]
impl HttpFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(crate::USER_AGENT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    /// Use a preconfigured client (proxies, timeouts, TLS roots).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "network")]
impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "network")]
#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn fetch(&self, base_url: &str, url: &str) -> Result<Vec<u8>, FetchError> {
        tracing::debug!(base_url, url, "fetching");

        let failed = |reason: String| FetchError::Failed {
            url: url.to_string(),
            reason,
        };

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(failed(format!("HTTP {status}")));
        }

        let bytes = resp.bytes().await.map_err(|e| failed(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
