//! Self-hosted Bitbucket Server / Data Center over REST 1.0.
//!
//! The API URL is the server root (e.g. `https://bitbucket.example.com`);
//! there is no public default.

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

const PAYLOAD: &str = "Bitbucket Server webhook payload";
const PAGE_LIMIT: &str = "1000";

// ---------------------------------------------------------------------------
// Webhook payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Project {
    key: String,
}

#[derive(Debug, Deserialize)]
struct SelfLink {
    href: String,
}

#[derive(Debug, Deserialize)]
struct RepoLinks {
    #[serde(rename = "self", default)]
    self_links: Vec<SelfLink>,
}

#[derive(Debug, Deserialize)]
struct Repository {
    slug: String,
    project: Project,
    links: RepoLinks,
}

#[derive(Debug, Deserialize)]
struct Actor {
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestRef {
    display_id: String,
    latest_commit: String,
    repository: Repository,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    id: u64,
    from_ref: PullRequestRef,
    to_ref: PullRequestRef,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestPayload {
    actor: Actor,
    pull_request: PullRequest,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangedRef {
    display_id: String,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Change {
    #[serde(rename = "ref")]
    changed_ref: ChangedRef,
    to_hash: String,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    actor: Actor,
    repository: Repository,
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    values: Vec<T>,
    #[serde(default = "last_page")]
    is_last_page: bool,
    #[serde(default)]
    next_page_start: Option<u64>,
}

fn last_page() -> bool {
    true
}

fn malformed(err: impl std::fmt::Display) -> PacError {
    PacError::malformed(PAYLOAD, err)
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, PacError> {
    value.ok_or_else(|| malformed(format!("missing or empty {field}")))
}

fn sender(actor: Actor) -> Result<String, PacError> {
    required(actor.slug.or(actor.name).filter(|s| !s.is_empty()), "actor.slug")
}

/// Browse URL of a repository: its first `self` link without the `/browse` suffix.
fn repository_url(repository: &Repository) -> Result<RepositoryUrl, PacError> {
    let href = required(
        repository.links.self_links.first().map(|l| l.href.as_str()),
        "repository.links.self",
    )?;
    let trimmed = href.trim_end_matches('/');
    required(
        RepositoryUrl::normalized(trimmed.strip_suffix("/browse").unwrap_or(trimmed)),
        "repository.links.self",
    )
}

/// Parses a `pr:*` or `repo:refs_changed` delivery (`X-Event-Key`).
pub fn parse_bitbucket_server_payload(
    hints: &PayloadHints,
    raw: &[u8],
) -> Result<Event, PacError> {
    let value: serde_json::Value = serde_json::from_slice(raw).map_err(malformed)?;
    let is_pull_request = hints.event_type.starts_with("pr:")
        || (hints.event_type.is_empty() && value.get("pullRequest").is_some());
    let is_push = hints.event_type == "repo:refs_changed"
        || (hints.event_type.is_empty() && value.get("changes").is_some());
    let event_type = if hints.event_type.is_empty() {
        if is_pull_request { "pr:opened" } else { "repo:refs_changed" }.to_string()
    } else {
        hints.event_type.clone()
    };

    if is_pull_request {
        let payload: PullRequestPayload = serde_json::from_value(value).map_err(malformed)?;
        let pr = payload.pull_request;
        let target = pr.to_ref.repository;
        return Ok(Event {
            provider: ProviderKind::BitbucketServer,
            sender: sender(payload.actor)?,
            url: repository_url(&target)?,
            owner: target.project.key,
            repository: target.slug,
            base_branch: required(
                BranchName::new(pr.to_ref.display_id),
                "pullRequest.toRef.displayId",
            )?,
            head_branch: BranchName::new(pr.from_ref.display_id),
            default_branch: None,
            sha: required(
                CommitSha::new(pr.from_ref.latest_commit),
                "pullRequest.fromRef.latestCommit",
            )?,
            event_type,
            trigger_target: trigger_target(hints, "pull_request"),
            pull_request_number: Some(pr.id),
        });
    }

    if is_push {
        let payload: PushPayload = serde_json::from_value(value).map_err(malformed)?;
        let change = required(
            payload
                .changes
                .into_iter()
                .find(|c| c.kind != "DELETE" && c.changed_ref.kind != "TAG"),
            "changes[] branch update",
        )?;
        return Ok(Event {
            provider: ProviderKind::BitbucketServer,
            sender: sender(payload.actor)?,
            url: repository_url(&payload.repository)?,
            owner: payload.repository.project.key,
            repository: payload.repository.slug,
            base_branch: required(
                BranchName::from_ref(&change.changed_ref.display_id),
                "changes[].ref.displayId",
            )?,
            head_branch: None,
            default_branch: None,
            sha: required(CommitSha::new(change.to_hash), "changes[].toHash")?,
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

/// Bitbucket Server implementation of [`GitProvider`].
#[derive(Debug)]
pub struct BitbucketServerProvider {
    api: ApiClient,
    application_name: String,
}

impl BitbucketServerProvider {
    /// Creates an unauthenticated client.
    ///
    /// # Errors
    ///
    /// [`PacError::Configuration`] when `settings.api_url` is unset.
    pub fn new(settings: &ProviderSettings) -> Result<Self, PacError> {
        let base = settings.api_url.as_deref().ok_or_else(|| {
            PacError::configuration("Bitbucket Server requires the provider API URL")
        })?;
        Ok(Self {
            api: ApiClient::new(base)?,
            application_name: settings.application_name.clone(),
        })
    }

    fn repo_path(event: &Event) -> String {
        format!(
            "rest/api/1.0/projects/{}/repos/{}",
            event.owner, event.repository
        )
    }

    async fn raw_file(
        &self,
        event: &Event,
        path: &str,
        at: Option<&str>,
    ) -> Result<Option<Vec<u8>>, PacError> {
        let url = format!("{}/raw/{path}", Self::repo_path(event));
        let query: Vec<(&str, &str)> = at.map(|r| vec![("at", r)]).unwrap_or_default();
        Ok(self.api.get_optional_bytes(&url, &query, None).await?)
    }
}

#[async_trait]
impl GitProvider for BitbucketServerProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::BitbucketServer
    }

    async fn authenticate(&mut self, credentials: &ProviderCredentials) -> Result<(), PacError> {
        let token = credentials
            .token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PacError::configuration("Bitbucket Server requires a provider token"))?;
        let auth = match credentials.user.clone().filter(|u| !u.is_empty()) {
            Some(user) => Auth::Basic {
                user,
                password: token,
            },
            None => Auth::Bearer(token),
        };
        self.api.set_auth(auth);
        Ok(())
    }

    fn parse_payload(&self, hints: &PayloadHints, raw: &[u8]) -> Result<Event, PacError> {
        parse_bitbucket_server_payload(hints, raw)
    }

    async fn fetch_default_branch_file(
        &self,
        event: &Event,
        path: &str,
    ) -> Result<Option<String>, PacError> {
        // Without `at` the server reads the repository's default branch.
        let at = event.default_branch.as_ref().map(BranchName::as_str);
        self.raw_file(event, path, at)
            .await?
            .map(|b| String::from_utf8(b).map_err(|e| PacError::malformed(path, e)))
            .transpose()
    }

    async fn fetch_directory_tree(
        &self,
        event: &Event,
        path: &str,
    ) -> Result<Vec<FileHandle>, PacError> {
        let url = format!("{}/files/{path}", Self::repo_path(event));
        let dir = path.trim_end_matches('/');
        let mut start = 0u64;
        let mut files = Vec::new();
        loop {
            let start_param = start.to_string();
            let query = [
                ("at", event.sha.as_str()),
                ("limit", PAGE_LIMIT),
                ("start", start_param.as_str()),
            ];
            let page: Page<String> = match self.api.get_json(&url, &query).await {
                Ok(page) => page,
                Err(err) if err.is_not_found() => {
                    debug!(path, "definition directory not found");
                    return Ok(Vec::new());
                }
                Err(err) => return Err(err.into()),
            };
            // The listing is recursive; only direct children are definitions.
            files.extend(page.values.into_iter().filter(|f| !f.contains('/')).map(|name| {
                FileHandle {
                    path: format!("{dir}/{name}"),
                    name,
                    sha: None,
                }
            }));
            match (page.is_last_page, page.next_page_start) {
                (false, Some(next)) => start = next,
                _ => break,
            }
        }
        Ok(files)
    }

    async fn fetch_file_content(
        &self,
        event: &Event,
        file: &FileHandle,
    ) -> Result<Vec<u8>, PacError> {
        self.raw_file(event, &file.path, Some(event.sha.as_str()))
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
        let path = format!("rest/build-status/1.0/commits/{}", event.sha);
        self.api.send_json_empty(Method::POST, &path, &body).await?;
        Ok(())
    }

    async fn is_sender_member(&self, event: &Event) -> Result<bool, PacError> {
        #[derive(Deserialize)]
        struct User {
            #[serde(default)]
            slug: String,
            #[serde(default)]
            name: String,
        }
        #[derive(Deserialize)]
        struct Grant {
            user: User,
        }

        let path = format!("rest/api/1.0/projects/{}/permissions/users", event.owner);
        let page: Page<Grant> = self
            .api
            .get_json(&path, &[("filter", event.sender.as_str()), ("limit", PAGE_LIMIT)])
            .await?;
        Ok(page
            .values
            .iter()
            .any(|g| g.user.slug == event.sender || g.user.name == event.sender))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hints(key: &str) -> PayloadHints {
        PayloadHints {
            event_type: key.into(),
            trigger_target: String::new(),
        }
    }

    fn repository() -> serde_json::Value {
        json!({
            "slug": "web-app",
            "project": { "key": "ACME" },
            "links": { "self": [ { "href": "https://bitbucket.example.com/projects/ACME/repos/web-app/browse" } ] }
        })
    }

    #[test]
    fn test_parse_pull_request_opened() {
        let raw = json!({
            "eventKey": "pr:opened",
            "actor": { "name": "alice", "slug": "alice" },
            "pullRequest": {
                "id": 12,
                "fromRef": { "displayId": "feature/x", "latestCommit": "aaa111", "repository": repository() },
                "toRef": { "displayId": "main", "latestCommit": "bbb222", "repository": repository() }
            }
        });
        let event =
            parse_bitbucket_server_payload(&hints("pr:opened"), raw.to_string().as_bytes()).unwrap();
        assert_eq!(
            event.url.as_str(),
            "https://bitbucket.example.com/projects/ACME/repos/web-app"
        );
        assert_eq!(event.owner, "ACME");
        assert_eq!(event.repository, "web-app");
        assert_eq!(event.base_branch.as_str(), "main");
        assert_eq!(event.sha.as_str(), "aaa111");
        assert_eq!(event.trigger_target, "pull_request");
    }

    #[test]
    fn test_parse_refs_changed_skips_deletes() {
        let raw = json!({
            "actor": { "slug": "bob" },
            "repository": repository(),
            "changes": [
                { "ref": { "displayId": "old", "type": "BRANCH" }, "toHash": "000", "type": "DELETE" },
                { "ref": { "displayId": "main", "type": "BRANCH" }, "toHash": "ccc333", "type": "UPDATE" }
            ]
        });
        let event =
            parse_bitbucket_server_payload(&hints("repo:refs_changed"), raw.to_string().as_bytes())
                .unwrap();
        assert_eq!(event.base_branch.as_str(), "main");
        assert_eq!(event.sha.as_str(), "ccc333");
        assert_eq!(event.sender, "bob");
        assert_eq!(event.trigger_target, "push");
    }

    #[test]
    fn test_missing_links_is_malformed() {
        let raw = json!({
            "actor": { "slug": "bob" },
            "repository": { "slug": "web-app", "project": { "key": "ACME" }, "links": {} },
            "changes": [ { "ref": { "displayId": "main" }, "toHash": "ccc333", "type": "UPDATE" } ]
        });
        let err =
            parse_bitbucket_server_payload(&hints("repo:refs_changed"), raw.to_string().as_bytes())
                .unwrap_err();
        assert!(matches!(err, PacError::MalformedInput { .. }));
    }

    #[test]
    fn test_api_url_is_required() {
        let err = BitbucketServerProvider::new(&ProviderSettings::default()).unwrap_err();
        assert!(matches!(err, PacError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_token_without_user_is_bearer() {
        let settings = ProviderSettings {
            api_url: Some("https://bitbucket.example.com".into()),
            ..ProviderSettings::default()
        };
        let mut provider = BitbucketServerProvider::new(&settings).unwrap();
        provider
            .authenticate(&ProviderCredentials {
                token: Some("pat".into()),
                user: None,
            })
            .await
            .unwrap();
        assert!(provider.api.is_authenticated());
    }
}
