//! Tekton `PipelineRun` execution engine.
//!
//! Runs are created through the `tekton.dev/v1beta1` API and followed with a
//! watch on the single run. The API server closes watches after
//! `timeoutSeconds`; the watch is then re-opened from the last seen
//! `resourceVersion` until the run's `Succeeded` condition turns terminal.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use pipeline::{
    ExecutionEngine, Namespace, PacError, RunCandidate, RunName, SubmittedRun, TaskOutcome,
    TerminalRun, Timestamp,
};

use crate::client::{KubeClient, KubeError};
use crate::console::ConsoleLocator;
use crate::objects::{succeeded, Condition, ObjectMeta};

const API_VERSION: &str = "tekton.dev/v1beta1";
const WATCH_TIMEOUT_SECS: u64 = 300;
const REWATCH_DELAY: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskRunStatus {
    #[serde(default)]
    conditions: Vec<Condition>,
    #[serde(default)]
    start_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskRunEntry {
    pipeline_task_name: String,
    #[serde(default)]
    status: Option<TaskRunStatus>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChildReference {
    #[serde(default)]
    pipeline_task_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PipelineRunStatus {
    #[serde(default)]
    conditions: Vec<Condition>,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    completion_time: Option<String>,
    #[serde(default)]
    task_runs: BTreeMap<String, TaskRunEntry>,
    #[serde(default)]
    child_references: Vec<ChildReference>,
}

#[derive(Debug, Clone, Deserialize)]
struct PipelineRunResource {
    metadata: ObjectMeta,
    #[serde(default)]
    status: PipelineRunStatus,
}

#[derive(Debug, Deserialize)]
struct WatchEvent {
    #[serde(rename = "type")]
    kind: String,
    object: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

// ---------------------------------------------------------------------------
// Status interpretation
// ---------------------------------------------------------------------------

/// Per-task breakdown in start order. Embedded `taskRuns` carry results;
/// minimal `childReferences` only carry names.
fn task_outcomes(status: &PipelineRunStatus) -> Vec<TaskOutcome> {
    if status.task_runs.is_empty() {
        return status
            .child_references
            .iter()
            .filter(|child| !child.pipeline_task_name.is_empty())
            .map(|child| TaskOutcome {
                name: child.pipeline_task_name.clone(),
                conclusion: None,
                reason: String::new(),
            })
            .collect();
    }

    let mut entries: Vec<&TaskRunEntry> = status.task_runs.values().collect();
    entries.sort_by(|a, b| {
        let start = |e: &TaskRunEntry| e.status.as_ref().and_then(|s| s.start_time.clone());
        start(a)
            .cmp(&start(b))
            .then_with(|| a.pipeline_task_name.cmp(&b.pipeline_task_name))
    });
    entries
        .into_iter()
        .map(|entry| {
            let condition = entry
                .status
                .as_ref()
                .and_then(|s| succeeded(&s.conditions));
            TaskOutcome {
                name: entry.pipeline_task_name.clone(),
                conclusion: condition.and_then(Condition::conclusion),
                reason: condition.map(|c| c.reason.clone()).unwrap_or_default(),
            }
        })
        .collect()
}

/// `Some` once the run's `Succeeded` condition is `True` or `False`.
fn terminal_run(resource: &PipelineRunResource) -> Option<TerminalRun> {
    let condition = succeeded(&resource.status.conditions)?;
    let conclusion = condition.conclusion()?;
    Some(TerminalRun {
        name: RunName::new(resource.metadata.name.clone())?,
        conclusion,
        reason: condition.reason.clone(),
        message: condition.message.clone(),
        start_time: resource
            .status
            .start_time
            .as_deref()
            .and_then(Timestamp::parse_rfc3339),
        completion_time: resource
            .status
            .completion_time
            .as_deref()
            .and_then(Timestamp::parse_rfc3339),
        tasks: task_outcomes(&resource.status),
    })
}

/// What one watch event means for the wait.
#[derive(Debug)]
enum WatchStep {
    /// Still running; resume from this version if the watch closes.
    Pending(Option<String>),
    Finished(TerminalRun),
    /// The resume version is too old; start over without one.
    Expired,
}

fn decode_watch_line(line: &[u8]) -> Result<WatchEvent, PacError> {
    serde_json::from_slice(line)
        .map_err(|e| PacError::engine(format!("undecodable watch event: {e}")))
}

fn interpret(event: WatchEvent, run: &RunName) -> Result<WatchStep, PacError> {
    match event.kind.as_str() {
        "ADDED" | "MODIFIED" => {
            let resource: PipelineRunResource = serde_json::from_value(event.object)
                .map_err(|e| PacError::engine(format!("undecodable PipelineRun: {e}")))?;
            Ok(match terminal_run(&resource) {
                Some(done) => WatchStep::Finished(done),
                None => WatchStep::Pending(resource.metadata.resource_version),
            })
        }
        "BOOKMARK" => {
            let version = event
                .object
                .pointer("/metadata/resourceVersion")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            Ok(WatchStep::Pending(version))
        }
        "DELETED" => Err(PacError::engine(format!(
            "PipelineRun {run} was deleted before it completed"
        ))),
        "ERROR" => {
            let status: ApiStatus = serde_json::from_value(event.object).unwrap_or_default();
            if status.code == 410 {
                Ok(WatchStep::Expired)
            } else {
                Err(PacError::engine(format!(
                    "watch on PipelineRun {run} failed ({}): {}",
                    status.code, status.message
                )))
            }
        }
        other => Err(PacError::engine(format!("unexpected watch event type {other:?}"))),
    }
}

/// Reassembles newline-delimited events from arbitrary chunk boundaries.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            let line = &line[..line.len() - 1];
            if !line.iter().all(u8::is_ascii_whitespace) {
                lines.push(line.to_vec());
            }
        }
        lines
    }
}

/// Prepares a candidate for creation in `namespace`.
fn creation_body(
    namespace: &Namespace,
    candidate: &RunCandidate,
) -> Result<serde_json::Value, PacError> {
    let mut body = candidate.to_json()?;
    let Some(object) = body.as_object_mut() else {
        return Err(PacError::engine(format!(
            "PipelineRun {} is not an object",
            candidate.name()
        )));
    };
    // The definition's own apiVersion wins; only a missing one is defaulted.
    let has_version = object
        .get("apiVersion")
        .and_then(|v| v.as_str())
        .is_some_and(|v| !v.is_empty());
    if !has_version {
        object.insert("apiVersion".into(), json!(API_VERSION));
    }
    object.insert("kind".into(), json!("PipelineRun"));
    let metadata = object.entry("metadata").or_insert_with(|| json!({}));
    if let Some(metadata) = metadata.as_object_mut() {
        metadata.insert("namespace".into(), json!(namespace.as_str()));
    }
    Ok(body)
}

fn engine_error(action: &str, err: KubeError) -> PacError {
    PacError::engine(format!("{action}: {err}"))
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// [`ExecutionEngine`] that creates and follows Tekton `PipelineRun`s.
#[derive(Debug, Clone)]
pub struct TektonEngine {
    client: KubeClient,
    console: ConsoleLocator,
}

impl TektonEngine {
    /// Creates an engine that discovers the console route on demand.
    pub fn new(client: KubeClient) -> Self {
        Self::with_console_url(client, None)
    }

    /// Creates an engine that links runs under `console_url` when given.
    pub fn with_console_url(client: KubeClient, console_url: Option<String>) -> Self {
        Self {
            console: ConsoleLocator::new(client.clone(), console_url),
            client,
        }
    }

    fn runs_path(namespace: &str) -> String {
        Self::versioned_runs_path(API_VERSION, namespace)
    }

    fn versioned_runs_path(api_version: &str, namespace: &str) -> String {
        format!("apis/{api_version}/namespaces/{namespace}/pipelineruns")
    }
}

#[async_trait]
impl ExecutionEngine for TektonEngine {
    async fn check_namespace(&self, namespace: &Namespace) -> Result<(), PacError> {
        let found = self
            .client
            .get_optional_json::<serde_json::Value>(&format!("api/v1/namespaces/{namespace}"))
            .await
            .map_err(|e| engine_error(&format!("checking namespace {namespace}"), e))?;
        match found {
            Some(_) => Ok(()),
            None => Err(PacError::NamespaceNotFound {
                namespace: namespace.to_string(),
            }),
        }
    }

    #[instrument(skip_all, fields(namespace = %namespace, candidate = candidate.name()))]
    async fn submit(
        &self,
        namespace: &Namespace,
        candidate: &RunCandidate,
    ) -> Result<SubmittedRun, PacError> {
        let body = creation_body(namespace, candidate)?;
        let api_version = body["apiVersion"].as_str().unwrap_or(API_VERSION);
        let created: PipelineRunResource = self
            .client
            .post_json(
                &Self::versioned_runs_path(api_version, namespace.as_str()),
                &body,
            )
            .await
            .map_err(|e| engine_error(&format!("creating PipelineRun {}", candidate.name()), e))?;
        let name = RunName::new(created.metadata.name)
            .ok_or_else(|| PacError::engine("created PipelineRun has no name"))?;
        info!(run = %name, "PipelineRun created");
        Ok(SubmittedRun {
            name,
            namespace: namespace.clone(),
        })
    }

    #[instrument(skip_all, fields(run = %run.name, namespace = %run.namespace))]
    async fn await_completion(&self, run: &SubmittedRun) -> Result<TerminalRun, PacError> {
        let path = Self::runs_path(run.namespace.as_str());
        let mut resource_version: Option<String> = None;

        loop {
            let mut query = vec![
                ("fieldSelector", format!("metadata.name={}", run.name)),
                ("timeoutSeconds", WATCH_TIMEOUT_SECS.to_string()),
            ];
            if let Some(version) = &resource_version {
                query.push(("resourceVersion", version.clone()));
            }
            let mut response = self
                .client
                .watch(&path, &query)
                .await
                .map_err(|e| engine_error(&format!("watching PipelineRun {}", run.name), e))?;

            let mut lines = LineBuffer::default();
            let mut saw_event = false;
            while let Some(chunk) = response.chunk().await.map_err(|e| {
                engine_error(&format!("watching PipelineRun {}", run.name), e.into())
            })? {
                for line in lines.push(&chunk) {
                    saw_event = true;
                    match interpret(decode_watch_line(&line)?, &run.name)? {
                        WatchStep::Finished(done) => {
                            info!(
                                conclusion = ?done.conclusion,
                                reason = %done.reason,
                                "PipelineRun finished"
                            );
                            return Ok(done);
                        }
                        WatchStep::Pending(Some(version)) => resource_version = Some(version),
                        WatchStep::Pending(None) => {}
                        WatchStep::Expired => {
                            warn!("watch resource version expired; restarting from current state");
                            resource_version = None;
                        }
                    }
                }
            }

            debug!(saw_event, "watch closed before completion; re-establishing");
            if !saw_event {
                tokio::time::sleep(REWATCH_DELAY).await;
            }
        }
    }

    async fn observability_url(&self, run: &SubmittedRun) -> Option<String> {
        self.console
            .run_url(run.namespace.as_str(), run.name.as_str())
            .await
    }
}
