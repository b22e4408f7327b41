//! In-memory port fakes shared by the orchestrator integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use orchestrator::Orchestrator;
use pipeline::{
    BranchName, CommitSha, Conclusion, Event, ExecutionEngine, FileHandle, GitProvider, Namespace,
    PacError, PayloadHints, ProviderCredentials, ProviderKind, Registration, RegistrationName,
    RegistrationStore, RepositoryUrl, RunCandidate, RunConclusion, RunName, RunStatusRecord,
    StatusPhase, StatusUpdate, SubmittedRun, TaskFetcher, TaskOutcome, TerminalRun, Timestamp,
};

pub const REPO_URL: &str = "https://git.example/org/app";

pub const PIPELINE_RUN: &str = r#"apiVersion: tekton.dev/v1beta1
kind: PipelineRun
metadata:
  name: app-pr
  labels:
    team: web
  annotations:
    pipelinesascode.tekton.dev/on-event: "[pull_request]"
    pipelinesascode.tekton.dev/on-target-branch: "[main]"
spec:
  params:
    - name: revision
      value: "{{revision}}"
  pipelineRef:
    name: app-pipeline
"#;

pub const PIPELINE: &str = r#"apiVersion: tekton.dev/v1beta1
kind: Pipeline
metadata:
  name: app-pipeline
spec:
  tasks:
    - name: test
      taskRef:
        name: unit-test
"#;

pub const TASK: &str = r#"apiVersion: tekton.dev/v1beta1
kind: Task
metadata:
  name: unit-test
spec:
  steps:
    - name: run
      image: golang:1.22
      script: "go test ./..."
"#;

pub fn event(sender: &str) -> Event {
    Event {
        provider: ProviderKind::GitHub,
        sender: sender.into(),
        url: RepositoryUrl::new(REPO_URL).unwrap(),
        owner: "org".into(),
        repository: "app".into(),
        base_branch: BranchName::new("main").unwrap(),
        head_branch: BranchName::new("feature/login"),
        default_branch: BranchName::new("main"),
        sha: CommitSha::new("5f2b9c1e").unwrap(),
        event_type: "pull_request".into(),
        trigger_target: "pull_request".into(),
        pull_request_number: Some(42),
    }
}

pub fn record(name: &str) -> RunStatusRecord {
    RunStatusRecord {
        status: Some(RunConclusion::Succeeded),
        reason: "Succeeded".into(),
        message: String::new(),
        run_name: RunName::new(name).unwrap(),
        start_time: None,
        completion_time: None,
    }
}

pub fn registration(owning: &str, target: &str, history: &[&str]) -> Registration {
    Registration {
        name: RegistrationName::new("app").unwrap(),
        namespace: Namespace::new(owning).unwrap(),
        url: RepositoryUrl::new(REPO_URL).unwrap(),
        branch: BranchName::new("main").unwrap(),
        target_namespace: Namespace::new(target),
        history: history.iter().map(|n| record(n)).collect(),
        resource_version: Some("1".into()),
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeProvider {
    pub members: Vec<String>,
    pub default_branch_config: Option<String>,
    /// `(file name, content)` pairs under `.tekton/`.
    pub files: Vec<(String, String)>,
    pub fail_status_posts: bool,
    pub statuses: Mutex<Vec<StatusUpdate>>,
}

impl FakeProvider {
    pub fn with_definitions() -> Self {
        Self {
            files: vec![
                ("pull-request.yaml".into(), PIPELINE_RUN.into()),
                ("pipeline.yaml".into(), PIPELINE.into()),
                ("task.yml".into(), TASK.into()),
                ("README.md".into(), "# not yaml".into()),
            ],
            ..Self::default()
        }
    }

    pub fn statuses(&self) -> Vec<StatusUpdate> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<StatusUpdate> {
        self.statuses()
            .into_iter()
            .filter(|s| s.phase == StatusPhase::Completed)
            .collect()
    }

    pub fn last(&self) -> StatusUpdate {
        self.statuses().last().cloned().unwrap()
    }
}

#[async_trait]
impl GitProvider for FakeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitHub
    }

    async fn authenticate(&mut self, _: &ProviderCredentials) -> Result<(), PacError> {
        Ok(())
    }

    fn parse_payload(&self, _: &PayloadHints, _: &[u8]) -> Result<Event, PacError> {
        Err(PacError::malformed("webhook payload", "not supported by the fake"))
    }

    async fn fetch_default_branch_file(
        &self,
        _: &Event,
        _: &str,
    ) -> Result<Option<String>, PacError> {
        Ok(self.default_branch_config.clone())
    }

    async fn fetch_directory_tree(
        &self,
        _: &Event,
        path: &str,
    ) -> Result<Vec<FileHandle>, PacError> {
        Ok(self
            .files
            .iter()
            .map(|(name, _)| FileHandle {
                name: name.clone(),
                path: format!("{path}/{name}"),
                sha: None,
            })
            .collect())
    }

    async fn fetch_file_content(&self, _: &Event, file: &FileHandle) -> Result<Vec<u8>, PacError> {
        self.files
            .iter()
            .find(|(name, _)| *name == file.name)
            .map(|(_, content)| content.clone().into_bytes())
            .ok_or_else(|| PacError::provider(format!("{} not found", file.path)))
    }

    async fn report_status(&self, _: &Event, update: &StatusUpdate) -> Result<(), PacError> {
        self.statuses.lock().unwrap().push(update.clone());
        if self.fail_status_posts {
            return Err(PacError::provider("status endpoint returned 502"));
        }
        Ok(())
    }

    async fn is_sender_member(&self, event: &Event) -> Result<bool, PacError> {
        Ok(self.members.iter().any(|m| *m == event.sender))
    }
}

// ---------------------------------------------------------------------------
// Registration store
// ---------------------------------------------------------------------------

pub struct FakeStore {
    pub registrations: Mutex<Vec<Registration>>,
    /// Simulates a concurrent writer bumping the version before our update.
    pub conflict_on_update: bool,
}

impl FakeStore {
    pub fn new(registrations: Vec<Registration>) -> Self {
        Self {
            registrations: Mutex::new(registrations),
            conflict_on_update: false,
        }
    }

    /// Another writer appends `record` to registration `name` and bumps its
    /// resource version.
    pub fn write_concurrently(&self, name: &str, record: RunStatusRecord) {
        let mut registrations = self.registrations.lock().unwrap();
        let stored = registrations
            .iter_mut()
            .find(|r| r.name.as_str() == name)
            .unwrap();
        stored.history.push(record);
        let next = stored
            .resource_version
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        stored.resource_version = Some(next.to_string());
    }

    pub fn stored(&self, name: &str) -> Registration {
        self.registrations
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.name.as_str() == name)
            .cloned()
            .unwrap()
    }
}

#[async_trait]
impl RegistrationStore for FakeStore {
    async fn list_all(&self) -> Result<Vec<Registration>, PacError> {
        Ok(self.registrations.lock().unwrap().clone())
    }

    async fn get(
        &self,
        namespace: &Namespace,
        name: &RegistrationName,
    ) -> Result<Registration, PacError> {
        self.registrations
            .lock()
            .unwrap()
            .iter()
            .find(|r| &r.namespace == namespace && &r.name == name)
            .cloned()
            .ok_or_else(|| PacError::store(format!("{namespace}/{name} not found")))
    }

    async fn update(&self, registration: &Registration) -> Result<Registration, PacError> {
        let mut registrations = self.registrations.lock().unwrap();
        let stored = registrations
            .iter_mut()
            .find(|r| r.namespace == registration.namespace && r.name == registration.name)
            .ok_or_else(|| PacError::store("registration vanished"))?;
        if self.conflict_on_update || stored.resource_version != registration.resource_version {
            return Err(PacError::LedgerConflict {
                registration: registration.name.to_string(),
            });
        }
        let next = stored
            .resource_version
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        *stored = registration.clone();
        stored.resource_version = Some(next.to_string());
        Ok(stored.clone())
    }
}

// ---------------------------------------------------------------------------
// Execution engine
// ---------------------------------------------------------------------------

pub struct FakeEngine {
    pub namespaces: Vec<String>,
    pub conclusion: RunConclusion,
    pub console_url: Option<String>,
    pub submitted: Mutex<Vec<(Namespace, RunCandidate)>>,
    /// Runs once while the pass waits for completion.
    pub while_running: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl FakeEngine {
    pub fn new(namespaces: &[&str]) -> Self {
        Self {
            namespaces: namespaces.iter().map(|n| n.to_string()).collect(),
            conclusion: RunConclusion::Succeeded,
            console_url: Some("https://console.example/pipelineruns".into()),
            submitted: Mutex::new(Vec::new()),
            while_running: Mutex::new(None),
        }
    }

    pub fn submissions(&self) -> Vec<(Namespace, RunCandidate)> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionEngine for FakeEngine {
    async fn check_namespace(&self, namespace: &Namespace) -> Result<(), PacError> {
        if self.namespaces.iter().any(|n| n == namespace.as_str()) {
            Ok(())
        } else {
            Err(PacError::NamespaceNotFound {
                namespace: namespace.to_string(),
            })
        }
    }

    async fn submit(
        &self,
        namespace: &Namespace,
        candidate: &RunCandidate,
    ) -> Result<SubmittedRun, PacError> {
        self.submitted
            .lock()
            .unwrap()
            .push((namespace.clone(), candidate.clone()));
        Ok(SubmittedRun {
            name: RunName::new(format!("{}x7k2p", candidate.name())).unwrap(),
            namespace: namespace.clone(),
        })
    }

    async fn await_completion(&self, run: &SubmittedRun) -> Result<TerminalRun, PacError> {
        let hook = self.while_running.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        let reason = match self.conclusion {
            RunConclusion::Succeeded => "Succeeded",
            RunConclusion::Failed => "Failed",
        };
        Ok(TerminalRun {
            name: run.name.clone(),
            conclusion: self.conclusion,
            reason: reason.into(),
            message: String::new(),
            start_time: Timestamp::parse_rfc3339("2024-05-01T10:00:00Z"),
            completion_time: Timestamp::parse_rfc3339("2024-05-01T10:02:00Z"),
            tasks: vec![TaskOutcome {
                name: "test".into(),
                conclusion: Some(self.conclusion),
                reason: reason.into(),
            }],
        })
    }

    async fn observability_url(&self, run: &SubmittedRun) -> Option<String> {
        self.console_url
            .as_ref()
            .map(|base| format!("{base}/{}/{}", run.namespace, run.name))
    }
}

// ---------------------------------------------------------------------------
// Task fetcher
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeFetcher {
    pub documents: BTreeMap<String, String>,
}

#[async_trait]
impl TaskFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<String, PacError> {
        self.documents
            .get(url)
            .cloned()
            .ok_or_else(|| PacError::provider(format!("GET {url} returned 404")))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub provider: Arc<FakeProvider>,
    pub store: Arc<FakeStore>,
    pub engine: Arc<FakeEngine>,
    pub fetcher: Arc<FakeFetcher>,
}

impl Harness {
    pub fn new(provider: FakeProvider, store: FakeStore, engine: FakeEngine) -> Self {
        Self {
            provider: Arc::new(provider),
            store: Arc::new(store),
            engine: Arc::new(engine),
            fetcher: Arc::new(FakeFetcher::default()),
        }
    }

    pub fn with_fetcher(mut self, fetcher: FakeFetcher) -> Self {
        self.fetcher = Arc::new(fetcher);
        self
    }

    /// Makes another writer add `run_name` to registration `app` while the
    /// submitted run is still going.
    pub fn write_history_during_run(&self, run_name: &str) {
        let store = self.store.clone();
        let record = record(run_name);
        *self.engine.while_running.lock().unwrap() =
            Some(Box::new(move || store.write_concurrently("app", record)));
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.provider.clone(),
            self.store.clone(),
            self.engine.clone(),
            self.fetcher.clone(),
        )
    }
}

pub fn is_failure(update: &StatusUpdate) -> bool {
    update.phase == StatusPhase::Completed && update.conclusion == Conclusion::Failure
}
