//! The orchestration state machine.
//!
//! ```text
//! Start -> ProgressMarker -> Authorize -> DefaultBranchConfig -> MatchRegistration
//!   -> FetchDirectory -> CheckNamespace -> Resolve -> Select -> LabelAndSubmit
//!   -> AwaitCompletion -> AppendHistory -> ReportFinal -> End
//! ```
//!
//! Every failing step returns immediately. Skips (sender denied, repository
//! not registered, no definition directory) post a `completed/skipped`
//! status and return `Ok`.

use std::sync::Arc;

use pipeline::{
    collect_remote_tasks, event_variables, find_registration, merge_definitions,
    parse_config_document, record_run, run_labels, select_candidate, AccessPolicy, Conclusion,
    DefinitionSource, Event, ExecutionEngine, FileHandle, GitProvider, MergeRequest, PacError,
    PassId, PipelineConfig, RegistrationStore, StatusUpdate, TaskFetcher,
};
use tracing::{error, info, info_span, instrument, warn, Instrument};

use crate::messages;
use crate::outcome::{RunOutcome, SkipReason};
use crate::settings::OrchestratorSettings;

/// Drives one event through every orchestration step.
///
/// Holds no per-pass state: one instance may serve concurrent passes.
pub struct Orchestrator {
    provider: Arc<dyn GitProvider>,
    store: Arc<dyn RegistrationStore>,
    engine: Arc<dyn ExecutionEngine>,
    fetcher: Arc<dyn TaskFetcher>,
    policy: AccessPolicy,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    /// Creates an orchestrator with the default settings and an empty allow-list.
    pub fn new(
        provider: Arc<dyn GitProvider>,
        store: Arc<dyn RegistrationStore>,
        engine: Arc<dyn ExecutionEngine>,
        fetcher: Arc<dyn TaskFetcher>,
    ) -> Self {
        Self {
            provider,
            store,
            engine,
            fetcher,
            policy: AccessPolicy::default(),
            settings: OrchestratorSettings::default(),
        }
    }

    /// Replaces the access policy.
    pub fn with_policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the settings.
    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// The active settings.
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Top-level entry point.
    ///
    /// Runs the pass under a fresh [`PassId`] span. On failure, posts a single
    /// best-effort `completed/failure` status carrying the error text and
    /// returns the original error unchanged.
    pub async fn run_with_reporting(&self, event: &Event) -> Result<RunOutcome, PacError> {
        let pass_id = PassId::new_random();
        let span = info_span!(
            "orchestration_pass",
            pass_id = %pass_id,
            provider = %event.provider,
            repository = %event.url,
            sha = %event.sha,
        );

        async {
            let result = self.run(event).await;
            if let Err(err) = &result {
                if err.is_bookkeeping() {
                    warn!(category = %err.category(), error = %err, "run history not recorded");
                } else {
                    error!(
                        category = %err.category(),
                        error = %err,
                        "orchestration pass failed"
                    );
                }
                let update = StatusUpdate::completed(
                    Conclusion::Failure,
                    messages::pass_failed(err),
                    self.settings.fallback_details_url.as_str(),
                );
                self.report(event, &update).await;
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Runs every step for `event` without the top-level failure report.
    #[instrument(skip_all, fields(sender = %event.sender, branch = %event.base_branch))]
    pub async fn run(&self, event: &Event) -> Result<RunOutcome, PacError> {
        let fallback_url = self.settings.fallback_details_url.as_str();

        self.report(
            event,
            &StatusUpdate::in_progress(
                messages::validating(&self.settings.application_name),
                fallback_url,
            ),
        )
        .await;

        let decision = self.policy.authorize(self.provider.as_ref(), event).await?;
        if !decision.is_allowed() {
            info!(sender = %event.sender, "sender is not allowed to run CI on this repository");
            return self
                .skip(
                    event,
                    SkipReason::AccessDenied,
                    messages::sender_not_allowed(&event.sender),
                )
                .await;
        }
        info!(?decision, "sender authorised");

        let default_config = self.default_branch_config(event).await?;

        let Some(registration) = find_registration(
            self.store.as_ref(),
            &event.url,
            &event.base_branch,
            default_config.namespace.as_ref(),
        )
        .await?
        else {
            info!(
                owner = %event.owner,
                repository = %event.repository,
                branch = %event.base_branch,
                "no repository registration matches this event"
            );
            return self
                .skip(event, SkipReason::NotConfigured, messages::not_configured())
                .await;
        };
        let namespace = registration.namespace.clone();

        let files: Vec<FileHandle> = self
            .provider
            .fetch_directory_tree(event, &self.settings.definition_dir)
            .await?
            .into_iter()
            .filter(FileHandle::is_yaml)
            .collect();
        // The configuration document alone defines nothing to run.
        let has_definitions = files.iter().any(|f| f.name != self.settings.config_file);
        if !has_definitions {
            return self
                .skip(
                    event,
                    SkipReason::NoDefinitionDirectory,
                    messages::no_definition_dir(&self.settings.definition_dir),
                )
                .await;
        }
        info!(
            url = %event.url,
            branch = %event.base_branch,
            sha = %event.sha,
            event_type = %event.trigger_target,
            files = files.len(),
            "loading definitions"
        );

        self.engine.check_namespace(&namespace).await?;

        self.report(
            event,
            &StatusUpdate::in_progress(messages::fetching_configuration(&namespace), fallback_url),
        )
        .await;

        let (sources, config) = self.read_definitions(event, &files).await?;
        let remote_tasks = collect_remote_tasks(&config, self.fetcher.as_ref()).await?;
        let variables = event_variables(event);
        let candidates = merge_definitions(&MergeRequest {
            sources: &sources,
            variables: &variables,
            remote_tasks: &remote_tasks,
            strict: self.settings.strict_resolution,
        })?;

        let mut candidate = select_candidate(candidates, event)?;
        candidate.apply_labels(&run_labels(event));
        candidate.use_generated_name();

        let submitted = self.engine.submit(&namespace, &candidate).await?;
        info!(run = %submitted.name, namespace = %namespace, "run submitted");

        let details_url = self
            .engine
            .observability_url(&submitted)
            .await
            .unwrap_or_else(|| fallback_url.to_string());

        self.report(
            event,
            &StatusUpdate::in_progress(messages::run_started(&submitted), details_url.as_str()),
        )
        .await;

        let terminal = self.engine.await_completion(&submitted).await?;
        info!(
            run = %terminal.name,
            conclusion = ?terminal.conclusion,
            reason = %terminal.reason,
            "run reached a terminal state"
        );

        let updated = record_run(
            self.store.as_ref(),
            &registration.namespace,
            &registration.name,
            terminal.to_status_record(),
            self.settings.history_capacity,
        )
        .await?;

        self.report(
            event,
            &StatusUpdate::completed(
                terminal.conclusion.as_status_conclusion(),
                messages::run_finished(&terminal, &namespace),
                details_url.as_str(),
            ),
        )
        .await;

        Ok(RunOutcome::Completed {
            run: submitted,
            conclusion: terminal.conclusion,
            registration: updated,
        })
    }

    /// Reads the configuration document from the default branch; its
    /// namespace, if any, constrains the registration match.
    async fn default_branch_config(&self, event: &Event) -> Result<PipelineConfig, PacError> {
        let path = self.settings.config_path();
        match self.provider.fetch_default_branch_file(event, &path).await? {
            Some(text) => parse_config_document(&text, &path),
            None => Ok(PipelineConfig::default()),
        }
    }

    /// Fetches every listed file. The configuration document is parsed on its
    /// own and kept out of the definition stream.
    async fn read_definitions(
        &self,
        event: &Event,
        files: &[FileHandle],
    ) -> Result<(Vec<DefinitionSource>, PipelineConfig), PacError> {
        let mut sources = Vec::with_capacity(files.len());
        let mut config = PipelineConfig::default();
        for file in files {
            let bytes = self.provider.fetch_file_content(event, file).await?;
            let content =
                String::from_utf8(bytes).map_err(|e| PacError::malformed(file.path.as_str(), e))?;
            if file.name == self.settings.config_file {
                config = parse_config_document(&content, &file.path)?;
                continue;
            }
            sources.push(DefinitionSource {
                path: file.path.clone(),
                content,
            });
        }
        Ok((sources, config))
    }

    async fn skip(
        &self,
        event: &Event,
        reason: SkipReason,
        message: String,
    ) -> Result<RunOutcome, PacError> {
        self.report(
            event,
            &StatusUpdate::completed(
                Conclusion::Skipped,
                message,
                self.settings.fallback_details_url.as_str(),
            ),
        )
        .await;
        Ok(RunOutcome::Skipped { reason })
    }

    /// Posts a status; failures are logged and never change the pass result.
    async fn report(&self, event: &Event, update: &StatusUpdate) {
        if let Err(err) = self.provider.report_status(event, update).await {
            warn!(
                phase = update.phase.as_str(),
                conclusion = update.conclusion.as_str(),
                error = %err,
                "could not post status to the git provider"
            );
        }
    }
}
