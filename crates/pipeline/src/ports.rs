//! Port traits implemented by infrastructure crates.
//!
//! The orchestrator only ever sees these traits. Concrete implementations live
//! in `provider` (Git providers, remote task fetching) and `cluster`
//! (registration store, execution engine).

use async_trait::async_trait;

use crate::{
    Event, FileHandle, Namespace, PacError, ProviderKind, Registration, RegistrationName,
    RunCandidate, StatusUpdate, SubmittedRun, TerminalRun,
};

// ---------------------------------------------------------------------------
// Git provider
// ---------------------------------------------------------------------------

/// Credentials handed to [`GitProvider::authenticate`].
#[derive(Clone, Default)]
pub struct ProviderCredentials {
    /// API token (GitHub token, Bitbucket app password or personal access token).
    pub token: Option<String>,
    /// Username for providers that use basic authentication.
    pub user: Option<String>,
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("user", &self.user)
            .finish()
    }
}

/// Out-of-band facts about the inbound request that are not part of the body
/// (e.g. the `X-GitHub-Event` header).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadHints {
    /// Provider event name as delivered in the request headers.
    pub event_type: String,
    /// Normalised trigger (`pull_request` / `push`), if already known.
    pub trigger_target: String,
}

/// Capability set of a Git provider.
///
/// Variants differ in transport and authentication only; callers must not
/// branch on [`GitProvider::kind`] for business decisions.
#[async_trait]
pub trait GitProvider: Send + Sync {
    /// Which provider this is.
    fn kind(&self) -> ProviderKind;

    /// Configures the API client with the given credentials.
    async fn authenticate(&mut self, credentials: &ProviderCredentials) -> Result<(), PacError>;

    /// Parses a raw webhook body into the canonical [`Event`].
    ///
    /// # Errors
    ///
    /// [`PacError::MalformedInput`] when the body is not a supported event.
    fn parse_payload(&self, hints: &PayloadHints, raw: &[u8]) -> Result<Event, PacError>;

    /// Reads a file from the repository's default branch.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    async fn fetch_default_branch_file(
        &self,
        event: &Event,
        path: &str,
    ) -> Result<Option<String>, PacError>;

    /// Lists the files directly under `path` at the event's commit.
    ///
    /// Returns an empty list when the directory does not exist.
    async fn fetch_directory_tree(
        &self,
        event: &Event,
        path: &str,
    ) -> Result<Vec<FileHandle>, PacError>;

    /// Reads one listed file at the event's commit.
    async fn fetch_file_content(&self, event: &Event, file: &FileHandle)
        -> Result<Vec<u8>, PacError>;

    /// Posts a status for the event's commit.
    async fn report_status(&self, event: &Event, update: &StatusUpdate) -> Result<(), PacError>;

    /// Asks the provider whether the event's sender belongs to the
    /// repository's owning organisation, workspace, or project.
    async fn is_sender_member(&self, event: &Event) -> Result<bool, PacError>;
}

/// Retrieves task definitions listed by URL in the configuration document.
#[async_trait]
pub trait TaskFetcher: Send + Sync {
    /// Returns the raw YAML text at `url`.
    async fn fetch(&self, url: &str) -> Result<String, PacError>;
}

// ---------------------------------------------------------------------------
// Cluster
// ---------------------------------------------------------------------------

/// External registry of [`Registration`] records.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Lists every registration across all namespaces.
    async fn list_all(&self) -> Result<Vec<Registration>, PacError>;

    /// Fetches one registration.
    async fn get(
        &self,
        namespace: &Namespace,
        name: &RegistrationName,
    ) -> Result<Registration, PacError>;

    /// Persists `registration.history`, guarded by `registration.resource_version`.
    ///
    /// # Errors
    ///
    /// [`PacError::LedgerConflict`] when the stored version no longer matches.
    async fn update(&self, registration: &Registration) -> Result<Registration, PacError>;
}

/// The black-box engine that executes a run.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Fails with [`PacError::NamespaceNotFound`] unless `namespace` exists.
    async fn check_namespace(&self, namespace: &Namespace) -> Result<(), PacError>;

    /// Creates the run from a fully resolved candidate.
    async fn submit(
        &self,
        namespace: &Namespace,
        candidate: &RunCandidate,
    ) -> Result<SubmittedRun, PacError>;

    /// Suspends until the run reaches a terminal state.
    async fn await_completion(&self, run: &SubmittedRun) -> Result<TerminalRun, PacError>;

    /// Best-effort link to a console page for the run.
    async fn observability_url(&self, run: &SubmittedRun) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_redacts_token() {
        let creds = ProviderCredentials {
            token: Some("ghp_secret".into()),
            user: Some("bot".into()),
        };
        let text = format!("{creds:?}");
        assert!(!text.contains("ghp_secret"));
        assert!(text.contains("<redacted>"));
    }

    #[test]
    fn test_ports_are_object_safe() {
        let _provider: Option<Box<dyn GitProvider>> = None;
        let _store: Option<Box<dyn RegistrationStore>> = None;
        let _engine: Option<Box<dyn ExecutionEngine>> = None;
        let _fetcher: Option<Box<dyn TaskFetcher>> = None;
    }
}
