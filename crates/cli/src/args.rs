//! Command-line arguments and their environment fallbacks.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use orchestrator::DEFAULT_APPLICATION_NAME;

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "pipelines-as-code")]
#[command(about = "Run the Tekton pipelines a Git event asks for", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Git provider the payload comes from: github, bitbucket-cloud, bitbucket-server
    #[arg(long, env = "PAC_GIT_PROVIDER")]
    pub git_provider: String,

    /// File holding the raw webhook body
    #[arg(long, env = "PAC_PAYLOAD_FILE")]
    pub payload_file: PathBuf,

    /// Provider event header, e.g. pull_request or repo:push
    #[arg(long, env = "PAC_WEBHOOK_TYPE", default_value = "")]
    pub webhook_type: String,

    /// Normalized trigger: pull_request or push
    #[arg(long, env = "PAC_TRIGGER_TARGET", default_value = "")]
    pub trigger_target: String,

    /// Provider API token or app password
    #[arg(long, env = "PAC_PROVIDER_TOKEN", hide_env_values = true)]
    pub provider_token: Option<String>,

    /// Username for providers that use basic authentication
    #[arg(long, env = "PAC_PROVIDER_USER")]
    pub provider_user: Option<String>,

    /// Provider API base URL (required for bitbucket-server)
    #[arg(long, env = "PAC_PROVIDER_API_URL")]
    pub provider_api_url: Option<String>,

    /// Senders always allowed to trigger runs, comma separated
    #[arg(long, env = "PAC_ALLOWED_USERS", value_delimiter = ',')]
    pub allowed_users: Vec<String>,

    /// Cluster API URL; defaults to the in-cluster service account
    #[arg(long, env = "PAC_KUBE_API_URL")]
    pub kube_api_url: Option<String>,

    /// Cluster bearer token, used with --kube-api-url
    #[arg(long, env = "PAC_KUBE_TOKEN", hide_env_values = true)]
    pub kube_token: Option<String>,

    /// Console base URL for run links; discovered from the cluster when unset
    #[arg(long, env = "PAC_CONSOLE_URL")]
    pub console_url: Option<String>,

    /// Name shown on check runs and build statuses
    #[arg(long, env = "PAC_APPLICATION_NAME", default_value = DEFAULT_APPLICATION_NAME)]
    pub application_name: String,

    /// Log output format
    #[arg(long, env = "PAC_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}
