//! GitHub (github.com and Enterprise) over the REST v3 API.
//!
//! Status reports are check runs: the first report of a pass creates one and
//! every later report updates it, so the pull request shows a single entry
//! that moves from `in_progress` to its conclusion.

use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use pipeline::{
    BranchName, CommitSha, Event, FileHandle, GitProvider, PacError, PayloadHints,
    ProviderCredentials, ProviderKind, RepositoryUrl, StatusPhase, StatusUpdate,
};

use crate::http::{ApiClient, Auth};
use crate::status::check_run_title;
use crate::{trigger_target, ProviderSettings};

/// Public GitHub API.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw";

// ---------------------------------------------------------------------------
// Webhook payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Account {
    login: String,
}

#[derive(Debug, Deserialize)]
struct Repository {
    name: String,
    html_url: String,
    owner: Account,
    #[serde(default)]
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitRef {
    #[serde(rename = "ref")]
    name: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    number: u64,
    base: GitRef,
    head: GitRef,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    pull_request: PullRequest,
    repository: Repository,
    sender: Account,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    after: String,
    repository: Repository,
    sender: Account,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    name: String,
    path: String,
    sha: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct CheckRun {
    id: u64,
}

const PAYLOAD: &str = "GitHub webhook payload";

fn malformed(err: impl std::fmt::Display) -> PacError {
    PacError::malformed(PAYLOAD, err)
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, PacError> {
    value.ok_or_else(|| malformed(format!("missing or empty {field}")))
}

/// Parses a `pull_request` or `push` delivery.
///
/// When the hints carry no event name the payload shape decides.
pub fn parse_github_payload(hints: &PayloadHints, raw: &[u8]) -> Result<Event, PacError> {
    let value: serde_json::Value = serde_json::from_slice(raw).map_err(malformed)?;
    let event_type = match hints.event_type.as_str() {
        "" if value.get("pull_request").is_some() => "pull_request",
        "" if value.get("pusher").is_some() || value.get("after").is_some() => "push",
        other => other,
    };

    match event_type {
        "pull_request" => {
            let payload: PullRequestPayload = serde_json::from_value(value).map_err(malformed)?;
            let repo = payload.repository;
            Ok(Event {
                provider: ProviderKind::GitHub,
                sender: payload.sender.login,
                url: required(RepositoryUrl::normalized(&repo.html_url), "repository.html_url")?,
                owner: repo.owner.login,
                repository: repo.name,
                base_branch: required(
                    BranchName::from_ref(&payload.pull_request.base.name),
                    "pull_request.base.ref",
                )?,
                head_branch: BranchName::from_ref(&payload.pull_request.head.name),
                default_branch: repo.default_branch.as_deref().and_then(BranchName::new),
                sha: required(
                    CommitSha::new(payload.pull_request.head.sha),
                    "pull_request.head.sha",
                )?,
                event_type: event_type.to_string(),
                trigger_target: trigger_target(hints, "pull_request"),
                pull_request_number: Some(payload.pull_request.number),
            })
        }
        "push" => {
            let payload: PushPayload = serde_json::from_value(value).map_err(malformed)?;
            let repo = payload.repository;
            Ok(Event {
                provider: ProviderKind::GitHub,
                sender: payload.sender.login,
                url: required(RepositoryUrl::normalized(&repo.html_url), "repository.html_url")?,
                owner: repo.owner.login,
                repository: repo.name,
                base_branch: required(BranchName::from_ref(&payload.git_ref), "ref")?,
                head_branch: None,
                default_branch: repo.default_branch.as_deref().and_then(BranchName::new),
                sha: required(CommitSha::new(payload.after), "after")?,
                event_type: event_type.to_string(),
                trigger_target: trigger_target(hints, "push"),
                pull_request_number: None,
            })
        }
        other => Err(malformed(format!("unsupported event type {other:?}"))),
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// GitHub implementation of [`GitProvider`].
#[derive(Debug)]
pub struct GitHubProvider {
    api: ApiClient,
    application_name: String,
    check_run_id: Mutex<Option<u64>>,
}

impl GitHubProvider {
    /// Creates an unauthenticated client for `settings.api_url` (or the public API).
    pub fn new(settings: &ProviderSettings) -> Result<Self, PacError> {
        let base = settings.api_url.as_deref().unwrap_or(DEFAULT_API_URL);
        Ok(Self {
            api: ApiClient::new(base)?,
            application_name: settings.application_name.clone(),
            check_run_id: Mutex::new(None),
        })
    }

    fn repo_path(event: &Event) -> String {
        format!("repos/{}/{}", event.owner, event.repository)
    }

    fn remembered_check_run(&self) -> Option<u64> {
        self.check_run_id.lock().ok().and_then(|id| *id)
    }

    fn remember_check_run(&self, id: u64) {
        if let Ok(mut slot) = self.check_run_id.lock() {
            *slot = Some(id);
        }
    }
}

#[async_trait]
impl GitProvider for GitHubProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitHub
    }

    async fn authenticate(&mut self, credentials: &ProviderCredentials) -> Result<(), PacError> {
        let token = credentials
            .token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PacError::configuration("GitHub requires a provider token"))?;
        self.api.set_auth(Auth::Bearer(token));
        Ok(())
    }

    fn parse_payload(&self, hints: &PayloadHints, raw: &[u8]) -> Result<Event, PacError> {
        parse_github_payload(hints, raw)
    }

    async fn fetch_default_branch_file(
        &self,
        event: &Event,
        path: &str,
    ) -> Result<Option<String>, PacError> {
        let url = format!("{}/contents/{path}", Self::repo_path(event));
        let query: Vec<(&str, &str)> = event
            .default_branch
            .as_ref()
            .map(|b| vec![("ref", b.as_str())])
            .unwrap_or_default();
        let bytes = self
            .api
            .get_optional_bytes(&url, &query, Some(RAW_MEDIA_TYPE))
            .await?;
        bytes
            .map(|b| String::from_utf8(b).map_err(|e| PacError::malformed(path, e)))
            .transpose()
    }

    async fn fetch_directory_tree(
        &self,
        event: &Event,
        path: &str,
    ) -> Result<Vec<FileHandle>, PacError> {
        let url = format!("{}/contents/{path}", Self::repo_path(event));
        let entries: Vec<ContentEntry> =
            match self.api.get_json(&url, &[("ref", event.sha.as_str())]).await {
                Ok(entries) => entries,
                Err(err) if err.is_not_found() => {
                    debug!(path, "definition directory not found");
                    return Ok(Vec::new());
                }
                Err(err) => return Err(err.into()),
            };
        Ok(entries
            .into_iter()
            .filter(|e| e.kind == "file")
            .map(|e| FileHandle {
                name: e.name,
                path: e.path,
                sha: Some(e.sha),
            })
            .collect())
    }

    async fn fetch_file_content(
        &self,
        event: &Event,
        file: &FileHandle,
    ) -> Result<Vec<u8>, PacError> {
        let url = format!("{}/contents/{}", Self::repo_path(event), file.path);
        self.api
            .get_optional_bytes(&url, &[("ref", event.sha.as_str())], Some(RAW_MEDIA_TYPE))
            .await?
            .ok_or_else(|| PacError::provider(format!("{} vanished at {}", file.path, event.sha)))
    }

    async fn report_status(&self, event: &Event, update: &StatusUpdate) -> Result<(), PacError> {
        let mut body = json!({
            "name": self.application_name,
            "status": update.phase.as_str(),
            "details_url": update.details_url,
            "output": {
                "title": check_run_title(update),
                "summary": update.message,
            },
        });
        if update.phase == StatusPhase::Completed {
            body["conclusion"] = json!(update.conclusion.as_str());
        }

        match self.remembered_check_run() {
            Some(id) => {
                let path = format!("{}/check-runs/{id}", Self::repo_path(event));
                self.api.send_json_empty(Method::PATCH, &path, &body).await?;
            }
            None => {
                body["head_sha"] = json!(event.sha.as_str());
                let path = format!("{}/check-runs", Self::repo_path(event));
                let created: CheckRun = self.api.send_json(Method::POST, &path, &body).await?;
                info!(check_run = created.id, "created check run");
                self.remember_check_run(created.id);
            }
        }
        Ok(())
    }

    async fn is_sender_member(&self, event: &Event) -> Result<bool, PacError> {
        let org = format!("orgs/{}/members/{}", event.owner, event.sender);
        if self.api.status_of(&org).await? == StatusCode::NO_CONTENT {
            return Ok(true);
        }
        let collaborator = format!("{}/collaborators/{}", Self::repo_path(event), event.sender);
        Ok(self.api.status_of(&collaborator).await? == StatusCode::NO_CONTENT)
    }
}
