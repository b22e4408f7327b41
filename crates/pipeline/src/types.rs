//! Shared value types for the pipelines-as-code domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! the records that flow between components: the canonical [`Event`], the
//! [`Registration`] with its bounded run history, and the status vocabulary
//! used when reporting back to a Git provider.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    BranchName, CommitSha, Namespace, PacError, RegistrationName, RepositoryUrl, RunName,
};

// ---------------------------------------------------------------------------
// Provider discriminator
// ---------------------------------------------------------------------------

/// The Git provider an event originated from.
///
/// Selected once at startup; business logic never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// github.com or GitHub Enterprise.
    #[serde(rename = "github")]
    GitHub,
    /// bitbucket.org.
    BitbucketCloud,
    /// Self-hosted Bitbucket Server / Data Center.
    BitbucketServer,
}

impl ProviderKind {
    /// Returns the discriminator string accepted by [`FromStr`].
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::BitbucketCloud => "bitbucket-cloud",
            Self::BitbucketServer => "bitbucket-server",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = PacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github" => Ok(Self::GitHub),
            "bitbucket-cloud" => Ok(Self::BitbucketCloud),
            "bitbucket-server" => Ok(Self::BitbucketServer),
            other => Err(PacError::configuration(format!(
                "no supported git provider is detected: {other:?}"
            ))),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// Canonical, provider-independent representation of a triggering action.
///
/// Produced by `GitProvider::parse_payload` and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Provider the event came from.
    pub provider: ProviderKind,
    /// Login / nickname of the actor that triggered the event.
    pub sender: String,
    /// Browsable URL of the target repository.
    pub url: RepositoryUrl,
    /// Owning account: GitHub owner, Bitbucket workspace, or Bitbucket Server project key.
    pub owner: String,
    /// Repository name (slug).
    pub repository: String,
    /// Branch the change targets (pull request base, or the pushed branch).
    pub base_branch: BranchName,
    /// Source branch of a pull request, when known.
    pub head_branch: Option<BranchName>,
    /// Repository default branch, when the payload carries it.
    pub default_branch: Option<BranchName>,
    /// Commit the run is for.
    pub sha: CommitSha,
    /// Raw provider event name (e.g. `pull_request`, `pr:opened`).
    pub event_type: String,
    /// Normalised trigger (`pull_request` or `push`).
    pub trigger_target: String,
    /// Pull request number, when the event is a pull request.
    pub pull_request_number: Option<u64>,
}

impl Event {
    /// One-line description used in log fields and selection errors.
    pub fn describe(&self) -> String {
        format!(
            "{} on {}/{} branch {} at {}",
            self.trigger_target, self.owner, self.repository, self.base_branch, self.sha
        )
    }
}

// ---------------------------------------------------------------------------
// Provider status vocabulary
// ---------------------------------------------------------------------------

/// Lifecycle phase of a status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusPhase {
    /// Accepted but not started.
    Queued,
    /// Work is underway.
    InProgress,
    /// Terminal; a [`Conclusion`] accompanies it.
    Completed,
}

impl StatusPhase {
    /// Returns the wire name (`queued`, `in_progress`, `completed`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

/// Outcome attached to a [`StatusPhase::Completed`] report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    /// No conclusion yet (non-terminal phases).
    None,
    /// The run succeeded.
    Success,
    /// The run, or the pass, failed.
    Failure,
    /// The pass decided not to run anything.
    Skipped,
}

impl Conclusion {
    /// Returns the wire name; empty for [`Conclusion::None`].
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Skipped => "skipped",
        }
    }
}

/// A single status report posted to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Lifecycle phase.
    pub phase: StatusPhase,
    /// Outcome; [`Conclusion::None`] unless `phase` is `Completed`.
    pub conclusion: Conclusion,
    /// Human-readable message (may contain light HTML for GitHub checks).
    pub message: String,
    /// Link shown next to the status.
    pub details_url: String,
}

impl StatusUpdate {
    /// A non-terminal `in_progress` report.
    pub fn in_progress(message: impl Into<String>, details_url: impl Into<String>) -> Self {
        Self {
            phase: StatusPhase::InProgress,
            conclusion: Conclusion::None,
            message: message.into(),
            details_url: details_url.into(),
        }
    }

    /// A terminal `completed` report with the given conclusion.
    pub fn completed(
        conclusion: Conclusion,
        message: impl Into<String>,
        details_url: impl Into<String>,
    ) -> Self {
        Self {
            phase: StatusPhase::Completed,
            conclusion,
            message: message.into(),
            details_url: details_url.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Repository files
// ---------------------------------------------------------------------------

/// A file inside the definition directory as listed by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileHandle {
    /// Base name (e.g. `pull-request.yaml`).
    pub name: String,
    /// Repository-relative path (e.g. `.tekton/pull-request.yaml`).
    pub path: String,
    /// Blob SHA, when the provider exposes one.
    pub sha: Option<String>,
}

impl FileHandle {
    /// Returns `true` when the file carries a YAML extension.
    pub fn is_yaml(&self) -> bool {
        self.name.ends_with(".yaml") || self.name.ends_with(".yml")
    }
}

// ---------------------------------------------------------------------------
// Registration and history
// ---------------------------------------------------------------------------

/// Terminal outcome of a submitted run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunConclusion {
    /// The run's `Succeeded` condition is `True`.
    Succeeded,
    /// The run's `Succeeded` condition is `False`.
    Failed,
}

impl RunConclusion {
    /// Maps the run outcome onto the provider status vocabulary.
    pub fn as_status_conclusion(self) -> Conclusion {
        match self {
            Self::Succeeded => Conclusion::Success,
            Self::Failed => Conclusion::Failure,
        }
    }
}

/// One entry of a registration's run history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatusRecord {
    /// Terminal outcome. `None` for entries written while the run was still
    /// going (e.g. by another controller); they are kept as-is.
    pub status: Option<RunConclusion>,
    /// Machine-readable reason reported by the engine (e.g. `Succeeded`, `Failed`).
    pub reason: String,
    /// Human-readable condition message.
    #[serde(default)]
    pub message: String,
    /// Name of the run this record describes.
    pub run_name: RunName,
    /// When the run started.
    pub start_time: Option<Timestamp>,
    /// When the run reached its terminal state.
    pub completion_time: Option<Timestamp>,
}

/// A repository registration as stored by cluster operators.
///
/// Keyed by `(namespace, name)`; matched against events by `(url, branch)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Record name within its namespace.
    pub name: RegistrationName,
    /// Namespace the record is physically stored in (the *owning* namespace).
    pub namespace: Namespace,
    /// Repository URL this record binds.
    pub url: RepositoryUrl,
    /// Branch this record binds.
    pub branch: BranchName,
    /// Namespace the record asks runs to execute in. `None` when unset.
    pub target_namespace: Option<Namespace>,
    /// Bounded run history, oldest first.
    pub history: Vec<RunStatusRecord>,
    /// Store version used for optimistic concurrency on update.
    pub resource_version: Option<String>,
}

// ---------------------------------------------------------------------------
// Execution engine results
// ---------------------------------------------------------------------------

/// A run accepted by the execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedRun {
    /// Name assigned by the engine.
    pub name: RunName,
    /// Namespace the run executes in.
    pub namespace: Namespace,
}

/// Outcome of one task within a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// Pipeline task name.
    pub name: String,
    /// `None` when the task never reached a terminal state (e.g. skipped).
    pub conclusion: Option<RunConclusion>,
    /// Engine-reported reason.
    pub reason: String,
}

/// A run that has reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalRun {
    /// Name of the run.
    pub name: RunName,
    /// Terminal outcome.
    pub conclusion: RunConclusion,
    /// Engine-reported reason.
    pub reason: String,
    /// Engine-reported message, possibly empty.
    pub message: String,
    /// When the run started.
    pub start_time: Option<Timestamp>,
    /// When the run reached its terminal state.
    pub completion_time: Option<Timestamp>,
    /// Per-task breakdown, in engine order.
    pub tasks: Vec<TaskOutcome>,
}

impl TerminalRun {
    /// Builds the history entry for this run.
    pub fn to_status_record(&self) -> RunStatusRecord {
        RunStatusRecord {
            status: Some(self.conclusion),
            reason: self.reason.clone(),
            message: self.message.clone(),
            run_name: self.name.clone(),
            start_time: self.start_time,
            completion_time: self.completion_time,
        }
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Parses an RFC 3339 timestamp as emitted by the cluster API.
    pub fn parse_rfc3339(value: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(value)
            .ok()
            .map(|dt| Self(dt.with_timezone(&Utc)))
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
    }
}
