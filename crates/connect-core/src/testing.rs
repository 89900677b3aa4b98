//! In-memory fetcher shared by unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::io::fetch::{FetchError, RemoteFetcher};

/// Serves canned bodies by URL; unknown URLs are `NotFound`.
#[derive(Debug, Default)]
pub(crate) struct MemoryFetcher {
    bodies: HashMap<String, Result<Vec<u8>, FetchError>>,
    requests: Mutex<Vec<String>>,
}

impl MemoryFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, url: &str, body: impl AsRef<[u8]>) -> Self {
        self.bodies
            .insert(url.to_string(), Ok(body.as_ref().to_vec()));
        self
    }

    pub(crate) fn failing(mut self, url: &str) -> Self {
        self.bodies.insert(
            url.to_string(),
            Err(FetchError::Failed {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            }),
        );
        self
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteFetcher for MemoryFetcher {
    async fn fetch(&self, _base_url: &str, url: &str) -> Result<Vec<u8>, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        self.bodies
            .get(url)
            .cloned()
            .unwrap_or_else(|| {
                Err(FetchError::NotFound {
                    url: url.to_string(),
                })
            })
    }
}
