//! pipelines-as-code entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Parse configuration**: flags with `PAC_*` environment fallbacks.
//! 2. **Wire observability**: `tracing-subscriber` with a text or JSON layer
//!    and, when `OTEL_EXPORTER_OTLP_ENDPOINT` is set, an OTLP exporter.
//! 3. **Construct infrastructure**: the Git provider picked by discriminator,
//!    the Kubernetes registration store and Tekton engine, and the HTTP task
//!    fetcher, all injected into one [`Orchestrator`].
//! 4. **Run one pass** for the payload on disk and exit non-zero if it failed.

mod args;
mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use cluster::{KubeClient, KubeConfig, KubeRegistrationStore, TektonEngine};
use orchestrator::{Orchestrator, OrchestratorSettings, RunOutcome};
use pipeline::{
    AccessPolicy, Event, GitProvider, PacError, PayloadHints, ProviderCredentials, ProviderKind,
};
use provider::{select_provider, HttpTaskFetcher, ProviderSettings};

use crate::args::Cli;

/// Reads the webhook body. A missing or unreadable file is a configuration
/// problem, reported before anything is posted to the provider.
fn load_payload(cli: &Cli) -> Result<Vec<u8>, PacError> {
    std::fs::read(&cli.payload_file).map_err(|e| {
        PacError::configuration(format!(
            "cannot read payload file {}: {e}",
            cli.payload_file.display()
        ))
    })
}

fn kube_config(cli: &Cli) -> Result<KubeConfig, PacError> {
    match &cli.kube_api_url {
        Some(api_url) => Ok(KubeConfig {
            api_url: api_url.clone(),
            token: cli.kube_token.clone(),
            ca_pem: None,
        }),
        None => KubeConfig::in_cluster(),
    }
}

/// Builds every adapter and parses the event. Nothing is posted to the
/// provider before this succeeds.
async fn bootstrap(cli: Cli) -> Result<(Orchestrator, Event)> {
    let kind: ProviderKind = cli.git_provider.parse()?;
    let payload = load_payload(&cli)?;

    let settings = ProviderSettings {
        api_url: cli.provider_api_url.clone(),
        application_name: cli.application_name.clone(),
    };
    let mut git: Box<dyn GitProvider> = select_provider(kind, &settings)?;
    git.authenticate(&ProviderCredentials {
        token: cli.provider_token.clone(),
        user: cli.provider_user.clone(),
    })
    .await?;

    let hints = PayloadHints {
        event_type: cli.webhook_type.clone(),
        trigger_target: cli.trigger_target.clone(),
    };
    let event = git.parse_payload(&hints, &payload)?;
    info!(provider = %kind, event = %event.describe(), "payload parsed");

    let kube = KubeClient::new(kube_config(&cli)?)?;
    let orchestrator = Orchestrator::new(
        Arc::from(git),
        Arc::new(KubeRegistrationStore::new(kube.clone())),
        Arc::new(TektonEngine::with_console_url(kube, cli.console_url.clone())),
        Arc::new(HttpTaskFetcher::new()),
    )
    .with_policy(AccessPolicy::new(&cli.allowed_users))
    .with_settings(OrchestratorSettings {
        application_name: cli.application_name.clone(),
        ..OrchestratorSettings::default()
    });

    Ok((orchestrator, event))
}

fn log_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Skipped { reason } => info!(%reason, "nothing to run"),
        RunOutcome::Completed {
            run, conclusion, ..
        } => info!(run = %run.name, namespace = %run.namespace, ?conclusion, "pass complete"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let telemetry = telemetry::init(cli.log_format)?;

    // Pass failures are logged and reported by the orchestrator itself.
    let result = match bootstrap(cli).await {
        Ok((orchestrator, event)) => orchestrator
            .run_with_reporting(&event)
            .await
            .map(|outcome| log_outcome(&outcome))
            .map_err(anyhow::Error::from),
        Err(e) => {
            error!(error = %format!("{e:#}"), "startup failed");
            Err(e)
        }
    };

    telemetry.shutdown();
    result.context("pipelines-as-code pass failed")
}
