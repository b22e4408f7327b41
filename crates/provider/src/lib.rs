//! Git provider infrastructure adapters.
//!
//! Implements the [`pipeline::GitProvider`] port for GitHub, Bitbucket Cloud,
//! and Bitbucket Server over their REST APIs, plus the HTTP
//! [`pipeline::TaskFetcher`] used for remote tasks.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate must not contain domain rules. Webhook
//! payload shapes, authentication schemes, pagination, and status wire values
//! are handled here; the [`pipeline`] crate never sees them.
//!
//! ## Provider selection
//!
//! The provider is picked once at startup from its discriminator string via
//! [`select_provider`]; nothing downstream inspects which one it got.

pub mod bitbucket_cloud;
pub mod bitbucket_server;
mod fetcher;
pub mod github;
mod http;
mod status;

pub use bitbucket_cloud::BitbucketCloudProvider;
pub use bitbucket_server::BitbucketServerProvider;
pub use fetcher::HttpTaskFetcher;
pub use github::GitHubProvider;
pub use http::HttpError;

use pipeline::{GitProvider, PacError, PayloadHints, ProviderKind};

/// Name used for check runs and build statuses unless overridden.
pub const DEFAULT_APPLICATION_NAME: &str = "Pipelines as Code CI";

/// Provider construction settings shared by every variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    /// API base override. Required for Bitbucket Server.
    pub api_url: Option<String>,
    /// Name shown on check runs and build statuses.
    pub application_name: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_url: None,
            application_name: DEFAULT_APPLICATION_NAME.to_string(),
        }
    }
}

/// Builds the provider for `kind`. Credentials are applied afterwards via
/// [`GitProvider::authenticate`].
pub fn select_provider(
    kind: ProviderKind,
    settings: &ProviderSettings,
) -> Result<Box<dyn GitProvider>, PacError> {
    Ok(match kind {
        ProviderKind::GitHub => Box::new(GitHubProvider::new(settings)?),
        ProviderKind::BitbucketCloud => Box::new(BitbucketCloudProvider::new(settings)?),
        ProviderKind::BitbucketServer => Box::new(BitbucketServerProvider::new(settings)?),
    })
}

/// The normalised trigger: the hint when the caller supplied one, otherwise
/// what the payload shape says.
pub(crate) fn trigger_target(hints: &PayloadHints, detected: &str) -> String {
    if hints.trigger_target.is_empty() {
        detected.to_string()
    } else {
        hints.trigger_target.clone()
    }
}
