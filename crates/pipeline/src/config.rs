//! The optional `.tekton/tekton.yaml` configuration document.
//!
//! ```yaml
//! namespace: ci-frontend
//! tasks:
//!   - https://raw.githubusercontent.com/tektoncd/catalog/main/task/git-clone/0.4/git-clone.yaml
//!   - |
//!     apiVersion: tekton.dev/v1beta1
//!     kind: Task
//!     metadata:
//!       name: lint
//!     ...
//! ```
//!
//! Parsing is lenient: an empty or absent document yields the defaults and
//! unknown keys are ignored. Invalid YAML is a hard error.

use serde::Deserialize;
use tracing::debug;

use crate::{Namespace, PacError, TaskFetcher};

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    tasks: Vec<String>,
}

/// Where a configured task comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskSource {
    /// Fetched over HTTP(S).
    Remote(String),
    /// Task YAML written directly in the configuration document.
    Inline(String),
}

impl TaskSource {
    fn classify(entry: String) -> Self {
        let trimmed = entry.trim();
        if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
            Self::Remote(trimmed.to_string())
        } else {
            Self::Inline(entry)
        }
    }
}

/// Parsed configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Namespace the registration must live in, if the document demands one.
    pub namespace: Option<Namespace>,
    /// Extra task definitions to fold into the merge, in document order.
    pub tasks: Vec<TaskSource>,
}

/// Parses the configuration document text.
///
/// `source_name` is only used in error messages.
pub fn parse_config_document(text: &str, source_name: &str) -> Result<PipelineConfig, PacError> {
    if text.trim().is_empty() {
        return Ok(PipelineConfig::default());
    }

    // A comment-only document yields no YAML documents at all.
    let raw = match serde_yaml::Deserializer::from_str(text).next() {
        None => RawConfig::default(),
        Some(document) => {
            let value = serde_yaml::Value::deserialize(document)
                .map_err(|e| PacError::malformed(source_name, e))?;
            if value.is_null() {
                RawConfig::default()
            } else {
                serde_yaml::from_value(value).map_err(|e| PacError::malformed(source_name, e))?
            }
        }
    };

    Ok(PipelineConfig {
        namespace: raw.namespace.and_then(|ns| Namespace::new(ns.trim())),
        tasks: raw.tasks.into_iter().map(TaskSource::classify).collect(),
    })
}

/// Produces the remote task text to append after the substituted definitions.
///
/// Each task becomes its own document. Fetch failures abort the pass.
pub async fn collect_remote_tasks(
    config: &PipelineConfig,
    fetcher: &dyn TaskFetcher,
) -> Result<String, PacError> {
    let mut out = String::new();
    for source in &config.tasks {
        let text = match source {
            TaskSource::Remote(url) => {
                debug!(url = %url, "fetching remote task");
                fetcher.fetch(url).await?
            }
            TaskSource::Inline(text) => text.clone(),
        };
        crate::resolver::push_document(&mut out, &text);
    }
    Ok(out)
}
