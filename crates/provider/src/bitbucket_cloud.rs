//! Bitbucket Cloud (bitbucket.org) over the 2.0 REST API.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use pipeline::{
    BranchName, CommitSha, Event, FileHandle, GitProvider, PacError, PayloadHints,
    ProviderCredentials, ProviderKind, RepositoryUrl, StatusUpdate,
};

use crate::http::{ApiClient, Auth};
use crate::status::{bitbucket_state, plain_text, truncate};
use crate::{trigger_target, ProviderSettings};

/// Public Bitbucket Cloud API.
pub const DEFAULT_API_URL: &str = "https://api.bitbucket.org/2.0";

const PAYLOAD: &str = "Bitbucket Cloud webhook payload";

// ---------------------------------------------------------------------------
// Webhook payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
}

#[derive(Debug, Deserialize)]
struct Links {
    html: Link,
}

#[derive(Debug, Deserialize)]
struct Repository {
    full_name: String,
    links: Links,
    #[serde(default)]
    mainbranch: Option<Named>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Actor {
    #[serde(default)]
    nickname: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Commit {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct Endpoint {
    branch: Named,
    #[serde(default)]
    commit: Option<Commit>,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    id: u64,
    source: Endpoint,
    destination: Endpoint,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    pullrequest: PullRequest,
    repository: Repository,
    actor: Actor,
}

#[derive(Debug, Deserialize)]
struct PushTarget {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct PushHead {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    target: PushTarget,
}

#[derive(Debug, Deserialize)]
struct PushChange {
    #[serde(default)]
    new: Option<PushHead>,
}

#[derive(Debug, Deserialize)]
struct Push {
    changes: Vec<PushChange>,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    push: Push,
    repository: Repository,
    actor: Actor,
}

#[derive(Debug, Deserialize)]
struct SourceEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    values: Vec<T>,
    #[serde(default)]
    next: Option<String>,
}

fn malformed(err: impl std::fmt::Display) -> PacError {
    PacError::malformed(PAYLOAD, err)
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, PacError> {
    value.ok_or_else(|| malformed(format!("missing or empty {field}")))
}

fn split_full_name(full_name: &str) -> Result<(String, String), PacError> {
    full_name
        .split_once('/')
        .filter(|(ws, repo)| !ws.is_empty() && !repo.is_empty())
        .map(|(ws, repo)| (ws.to_string(), repo.to_string()))
        .ok_or_else(|| malformed(format!("repository.full_name {full_name:?} is not workspace/slug")))
}

fn sender(actor: Actor) -> Result<String, PacError> {
    required(
        actor.nickname.or(actor.display_name).filter(|s| !s.is_empty()),
        "actor.nickname",
    )
}

/// Builds the `q` filter for a permissions lookup. Quotes and backslashes
/// in the nickname are escaped so it stays a single string literal.
fn nickname_filter(nickname: &str) -> String {
    let mut escaped = String::with_capacity(nickname.len());
    for c in nickname.chars() {
        if matches!(c, '"' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    format!("user.nickname=\"{escaped}\"")
}

/// Parses a `pullrequest:*` or `repo:push` delivery (`X-Event-Key`).
pub fn parse_bitbucket_cloud_payload(
    hints: &PayloadHints,
    raw: &[u8],
) -> Result<Event, PacError> {
    let value: serde_json::Value = serde_json::from_slice(raw).map_err(malformed)?;
    let is_pull_request = hints.event_type.starts_with("pullrequest:")
        || (hints.event_type.is_empty() && value.get("pullrequest").is_some());
    let is_push = hints.event_type == "repo:push"
        || (hints.event_type.is_empty() && value.get("push").is_some());
    let event_type = if hints.event_type.is_empty() {
        if is_pull_request { "pullrequest:created" } else { "repo:push" }.to_string()
    } else {
        hints.event_type.clone()
    };

    if is_pull_request {
        let payload: PullRequestPayload = serde_json::from_value(value).map_err(malformed)?;
        let (owner, repository) = split_full_name(&payload.repository.full_name)?;
        let pr = payload.pullrequest;
        return Ok(Event {
            provider: ProviderKind::BitbucketCloud,
            sender: sender(payload.actor)?,
            url: required(
                RepositoryUrl::normalized(&payload.repository.links.html.href),
                "repository.links.html.href",
            )?,
            owner,
            repository,
            base_branch: required(
                BranchName::new(pr.destination.branch.name),
                "pullrequest.destination.branch.name",
            )?,
            head_branch: BranchName::new(pr.source.branch.name),
            default_branch: payload.repository.mainbranch.and_then(|b| BranchName::new(b.name)),
            sha: required(
                pr.source.commit.and_then(|c| CommitSha::new(c.hash)),
                "pullrequest.source.commit.hash",
            )?,
            event_type,
            trigger_target: trigger_target(hints, "pull_request"),
            pull_request_number: Some(pr.id),
        });
    }

    if is_push {
        let payload: PushPayload = serde_json::from_value(value).map_err(malformed)?;
        let (owner, repository) = split_full_name(&payload.repository.full_name)?;
        let head = required(
            payload
                .push
                .changes
                .into_iter()
                .filter_map(|c| c.new)
                .find(|n| n.kind == "branch"),
            "push.changes[].new branch",
        )?;
        return Ok(Event {
            provider: ProviderKind::BitbucketCloud,
            sender: sender(payload.actor)?,
            url: required(
                RepositoryUrl::normalized(&payload.repository.links.html.href),
                "repository.links.html.href",
            )?,
            owner,
            repository,
            base_branch: required(BranchName::new(head.name), "push.changes[].new.name")?,
            head_branch: None,
            default_branch: payload.repository.mainbranch.and_then(|b| BranchName::new(b.name)),
            sha: required(CommitSha::new(head.target.hash), "push.changes[].new.target.hash")?,
            event_type,
            trigger_target: trigger_target(hints, "push"),
            pull_request_number: None,
        });
    }

    Err(malformed(format!("unsupported event type {:?}", hints.event_type)))
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Bitbucket Cloud implementation of [`GitProvider`].
#[derive(Debug)]
pub struct BitbucketCloudProvider {
    api: ApiClient,
    application_name: String,
}

impl BitbucketCloudProvider {
    /// Creates an unauthenticated client for `settings.api_url` (or the public API).
    pub fn new(settings: &ProviderSettings) -> Result<Self, PacError> {
        let base = settings.api_url.as_deref().unwrap_or(DEFAULT_API_URL);
        Ok(Self {
            api: ApiClient::new(base)?,
            application_name: settings.application_name.clone(),
        })
    }

    fn repo_path(event: &Event) -> String {
        format!("repositories/{}/{}", event.owner, event.repository)
    }

    async fn main_branch(&self, event: &Event) -> Result<String, PacError> {
        if let Some(branch) = &event.default_branch {
            return Ok(branch.to_string());
        }
        #[derive(Deserialize)]
        struct RepositoryInfo {
            mainbranch: Named,
        }
        let info: RepositoryInfo = self.api.get_json(&Self::repo_path(event), &[]).await?;
        Ok(info.mainbranch.name)
    }
}

#[async_trait]
impl GitProvider for BitbucketCloudProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::BitbucketCloud
    }

    async fn authenticate(&mut self, credentials: &ProviderCredentials) -> Result<(), PacError> {
        match (&credentials.user, &credentials.token) {
            (Some(user), Some(token)) if !user.is_empty() && !token.is_empty() => {
                self.api.set_auth(Auth::Basic {
                    user: user.clone(),
                    password: token.clone(),
                });
                Ok(())
            }
            _ => Err(PacError::configuration(
                "Bitbucket Cloud requires a provider user and an app password",
            )),
        }
    }

    fn parse_payload(&self, hints: &PayloadHints, raw: &[u8]) -> Result<Event, PacError> {
        parse_bitbucket_cloud_payload(hints, raw)
    }

    async fn fetch_default_branch_file(
        &self,
        event: &Event,
        path: &str,
    ) -> Result<Option<String>, PacError> {
        let branch = self.main_branch(event).await?;
        let url = format!("{}/src/{branch}/{path}", Self::repo_path(event));
        let bytes = self.api.get_optional_bytes(&url, &[], None).await?;
        bytes
            .map(|b| String::from_utf8(b).map_err(|e| PacError::malformed(path, e)))
            .transpose()
    }

    async fn fetch_directory_tree(
        &self,
        event: &Event,
        path: &str,
    ) -> Result<Vec<FileHandle>, PacError> {
        let first = format!("{}/src/{}/{path}/", Self::repo_path(event), event.sha);
        let mut page: Page<SourceEntry> = match self.api.get_json(&first, &[]).await {
            Ok(page) => page,
            Err(err) if err.is_not_found() => {
                debug!(path, "definition directory not found");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };

        let mut files = Vec::new();
        loop {
            files.extend(
                page.values
                    .into_iter()
                    .filter(|e| e.kind == "commit_file")
                    .map(|e| FileHandle {
                        name: e.path.rsplit('/').next().unwrap_or(&e.path).to_string(),
                        path: e.path,
                        sha: None,
                    }),
            );
            let Some(next) = page.next else { break };
            // `next` is absolute; strip the base so the client can re-join it.
            let relative = next
                .strip_prefix(self.api.url("").as_str())
                .unwrap_or(next.as_str())
                .to_string();
            page = self.api.get_json(&relative, &[]).await?;
        }
        Ok(files)
    }

    async fn fetch_file_content(
        &self,
        event: &Event,
        file: &FileHandle,
    ) -> Result<Vec<u8>, PacError> {
        let url = format!("{}/src/{}/{}", Self::repo_path(event), event.sha, file.path);
        self.api
            .get_optional_bytes(&url, &[], None)
            .await?
            .ok_or_else(|| PacError::provider(format!("{} vanished at {}", file.path, event.sha)))
    }

    async fn report_status(&self, event: &Event, update: &StatusUpdate) -> Result<(), PacError> {
        let body = json!({
            "state": bitbucket_state(update),
            "key": self.application_name,
            "name": self.application_name,
            "url": update.details_url,
            "description": truncate(&plain_text(&update.message), 255),
        });
        let path = format!(
            "{}/commit/{}/statuses/build",
            Self::repo_path(event),
            event.sha
        );
        self.api.send_json_empty(Method::POST, &path, &body).await?;
        Ok(())
    }

    async fn is_sender_member(&self, event: &Event) -> Result<bool, PacError> {
        #[derive(Deserialize)]
        struct Permission {}

        let path = format!("workspaces/{}/permissions", event.owner);
        let filter = nickname_filter(&event.sender);
        let page: Page<Permission> = self.api.get_json(&path, &[("q", filter.as_str())]).await?;
        Ok(!page.values.is_empty())
    }
}
