use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use pipeline::{PacError, TaskFetcher};

use crate::http::HttpError;

/// Fetches remote task definitions with plain, unauthenticated GETs.
#[derive(Debug, Clone, Default)]
pub struct HttpTaskFetcher {
    client: Client,
}

impl HttpTaskFetcher {
    /// Creates a fetcher with a default client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fetcher with a custom client (timeouts, proxies, TLS).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TaskFetcher for HttpTaskFetcher {
    async fn fetch(&self, url: &str) -> Result<String, PacError> {
        debug!(url, "fetching remote task");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PacError::provider(format!("GET {url}: {}", HttpError::from(e))))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PacError::provider(format!(
                "GET {url} returned {}",
                status.as_u16()
            )));
        }
        response
            .text()
            .await
            .map_err(|e| PacError::provider(format!("GET {url}: {}", HttpError::from(e))))
    }
}
