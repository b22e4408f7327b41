//! Minimal Kubernetes API client.
//!
//! Speaks plain JSON over HTTPS to the API server: typed reads, creates,
//! JSON merge patches, and raw watch streams. Authentication is a bearer
//! token, either the pod's service account or one supplied explicitly.

use std::path::Path;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Certificate, Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use pipeline::PacError;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const MERGE_PATCH: &str = "application/merge-patch+json";

/// Errors raised while talking to the Kubernetes API server.
#[derive(Debug, Error)]
pub enum KubeError {
    /// The request never produced a response.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The API server answered with a non-success status.
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// `Status.message` from the body when present, otherwise the raw body.
        message: String,
    },

    /// The response body did not have the expected shape.
    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl KubeError {
    /// Create an API error from status code and message.
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ApiError { status: 404, .. })
    }

    /// Check if this error is an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ApiError { status: 409, .. })
    }
}

pub(crate) type Result<T> = std::result::Result<T, KubeError>;

/// Connection settings for [`KubeClient`].
#[derive(Clone, Default)]
pub struct KubeConfig {
    /// API server base URL, e.g. `https://10.0.0.1:443`.
    pub api_url: String,
    /// Bearer token. `None` sends unauthenticated requests.
    pub token: Option<String>,
    /// Extra PEM-encoded CA bundle to trust.
    pub ca_pem: Option<Vec<u8>>,
}

impl std::fmt::Debug for KubeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeConfig")
            .field("api_url", &self.api_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("ca_pem", &self.ca_pem.as_ref().map(Vec::len))
            .finish()
    }
}

impl KubeConfig {
    /// Reads the pod's service-account token and CA and the API server
    /// address from `KUBERNETES_SERVICE_HOST` / `KUBERNETES_SERVICE_PORT`.
    pub fn in_cluster() -> std::result::Result<Self, PacError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
            PacError::configuration(
                "KUBERNETES_SERVICE_HOST is not set; pass an explicit cluster API URL",
            )
        })?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".into());
        // IPv6 service hosts need brackets in the authority.
        let host = if host.contains(':') { format!("[{host}]") } else { host };

        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token = std::fs::read_to_string(dir.join("token")).map_err(|e| {
            PacError::configuration(format!("cannot read service account token: {e}"))
        })?;
        let ca_pem = std::fs::read(dir.join("ca.crt")).ok();

        Ok(Self {
            api_url: format!("https://{host}:{port}"),
            token: Some(token.trim().to_string()),
            ca_pem,
        })
    }
}

/// Thin REST client bound to one API server.
#[derive(Clone)]
pub struct KubeClient {
    base_url: String,
    client: Client,
    token: Option<String>,
}

impl std::fmt::Debug for KubeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl KubeClient {
    /// Builds a client from explicit settings.
    pub fn new(config: KubeConfig) -> std::result::Result<Self, PacError> {
        let mut builder = Client::builder()
            .user_agent(concat!("pipelines-as-code/", env!("CARGO_PKG_VERSION")));
        if let Some(pem) = &config.ca_pem {
            let certificate = Certificate::from_pem(pem)
                .map_err(|e| PacError::configuration(format!("invalid cluster CA: {e}")))?;
            builder = builder.add_root_certificate(certificate);
        }
        let client = builder
            .build()
            .map_err(|e| PacError::configuration(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            client,
            token: config.token.filter(|t| !t.is_empty()),
        })
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = self.url(path);
        debug!(%method, %url, "cluster API request");
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.request(Method::GET, path).send().await?;
        handle_response(response).await
    }

    /// GETs a resource; a 404 is `Ok(None)`.
    pub(crate) async fn get_optional_json<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>> {
        let response = self.request(Method::GET, path).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        handle_response(response).await.map(Some)
    }

    pub(crate) async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self.request(Method::POST, path).json(body).send().await?;
        handle_response(response).await
    }

    /// Sends an RFC 7386 merge patch. A `metadata.resourceVersion` in the
    /// patch makes the server reject stale writes with 409.
    pub(crate) async fn merge_patch<T: DeserializeOwned>(
        &self,
        path: &str,
        patch: &serde_json::Value,
    ) -> Result<T> {
        let body =
            serde_json::to_vec(patch).map_err(|e| KubeError::ParseError(e.to_string()))?;
        let response = self
            .request(Method::PATCH, path)
            .header(CONTENT_TYPE, MERGE_PATCH)
            .body(body)
            .send()
            .await?;
        handle_response(response).await
    }

    /// Opens a watch. The caller consumes the newline-delimited body.
    pub(crate) async fn watch(&self, path: &str, query: &[(&str, String)]) -> Result<Response> {
        let response = self
            .request(Method::GET, path)
            .query(&[("watch", "true")])
            .query(query)
            .send()
            .await?;
        check_status(response).await
    }
}

/// Pulls `message` out of a `Status` body, falling back to the raw text.
fn status_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(KubeError::api_error(status.as_u16(), status_message(&error_text)))
}

/// Handle an API response and deserialize JSON.
async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    let response = check_status(response).await?;
    response
        .json()
        .await
        .map_err(|e| KubeError::ParseError(format!("Failed to parse JSON response: {e}")))
}
