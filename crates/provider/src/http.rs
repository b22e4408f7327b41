//! Shared REST plumbing for the provider adapters.

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use pipeline::PacError;

/// Errors raised while talking to a provider API.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The request never produced a response.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Response body, or a placeholder when it could not be read.
        message: String,
    },

    /// The response body did not have the expected shape.
    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl HttpError {
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
}

impl From<HttpError> for PacError {
    fn from(err: HttpError) -> Self {
        PacError::provider(err.to_string())
    }
}

pub(crate) type Result<T> = std::result::Result<T, HttpError>;

/// How requests are authenticated.
#[derive(Clone, Default)]
pub(crate) enum Auth {
    #[default]
    Anonymous,
    Bearer(String),
    Basic {
        user: String,
        password: String,
    },
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Self::Basic { user, .. } => write!(f, "Basic({user}, <redacted>)"),
        }
    }
}

/// Thin REST client bound to one API base URL.
#[derive(Debug, Clone)]
pub(crate) struct ApiClient {
    base_url: String,
    client: Client,
    auth: Auth,
}

impl ApiClient {
    pub(crate) fn new(base_url: &str) -> std::result::Result<Self, PacError> {
        let client = Client::builder()
            .user_agent(concat!("pipelines-as-code/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PacError::configuration(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            auth: Auth::Anonymous,
        })
    }

    pub(crate) fn set_auth(&mut self, auth: Auth) {
        self.auth = auth;
    }

    pub(crate) fn is_authenticated(&self) -> bool {
        !matches!(self.auth, Auth::Anonymous)
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = self.url(path);
        debug!(%method, %url, "provider API request");
        let builder = self.client.request(method, url);
        match &self.auth {
            Auth::Anonymous => builder,
            Auth::Bearer(token) => builder.bearer_auth(token),
            Auth::Basic { user, password } => builder.basic_auth(user, Some(password)),
        }
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let response = self.request(Method::GET, path).query(query).send().await?;
        handle_response(response).await
    }

    /// GETs raw bytes; a 404 is `Ok(None)`.
    pub(crate) async fn get_optional_bytes(
        &self,
        path: &str,
        query: &[(&str, &str)],
        accept: Option<&str>,
    ) -> Result<Option<Vec<u8>>> {
        let mut builder = self.request(Method::GET, path).query(query);
        if let Some(accept) = accept {
            builder = builder.header(reqwest::header::ACCEPT, accept);
        }
        let response = builder.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;
        Ok(Some(response.bytes().await?.to_vec()))
    }

    pub(crate) async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self.request(method, path).json(body).send().await?;
        handle_response(response).await
    }

    pub(crate) async fn send_json_empty<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<()> {
        let response = self.request(method, path).json(body).send().await?;
        handle_empty_response(response).await
    }

    /// Returns the bare status code of a GET, for membership checks.
    pub(crate) async fn status_of(&self, path: &str) -> Result<StatusCode> {
        let response = self.request(Method::GET, path).send().await?;
        Ok(response.status())
    }
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
    Err(HttpError::api_error(status.as_u16(), error_text))
}

/// Handle an API response and deserialize JSON.
pub(crate) async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    let response = check_status(response).await?;
    response
        .json()
        .await
        .map_err(|e| HttpError::ParseError(format!("Failed to parse JSON response: {e}")))
}

/// Handle an API response that returns no content of interest.
pub(crate) async fn handle_empty_response(response: Response) -> Result<()> {
    check_status(response).await.map(|_| ())
}
