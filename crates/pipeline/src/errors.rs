//! Top-level error and error-category types for the pipelines-as-code domain.
//!
//! [`PacError`] covers every condition that aborts an orchestration pass. The
//! variants are deliberately flat: the top-level handler reports an error to
//! the Git provider and then returns it *unchanged*, so callers can still match
//! on the variant to tell a hijack attempt from a transient network failure.
//!
//! Conditions that end a pass without failing it (access denied, repository
//! not registered, no definition directory) are not errors at all; see
//! `orchestrator::RunOutcome::Skipped`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error categories
// ---------------------------------------------------------------------------

/// Coarse classification of a [`PacError`], used for log fields and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Bad inbound payload or unparseable declarative/configuration YAML.
    MalformedInput,
    /// Namespace placement mismatch or hijack attempt. Operators alert on this.
    Security,
    /// Definitions could not be resolved or no single run could be selected.
    Definition,
    /// The execution engine refused or failed the submission or the wait.
    Execution,
    /// The run finished but its history could not be recorded.
    Bookkeeping,
    /// The Git provider or a remote fetch failed.
    Provider,
    /// The registration store could not be read.
    Store,
    /// Process or adapter configuration is invalid.
    Configuration,
}

impl ErrorCategory {
    /// Returns the stable snake_case label used in log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MalformedInput => "malformed_input",
            Self::Security => "security",
            Self::Definition => "definition",
            Self::Execution => "execution",
            Self::Bookkeeping => "bookkeeping",
            Self::Provider => "provider",
            Self::Store => "store",
            Self::Configuration => "configuration",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Pass-level errors
// ---------------------------------------------------------------------------

/// Errors that abort an orchestration pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacError {
    /// The inbound payload or a YAML document could not be parsed.
    #[error("malformed input in {source_name}: {message}")]
    MalformedInput {
        /// What was being parsed (e.g. `"webhook payload"`, `".tekton/tekton.yaml"`).
        source_name: String,
        /// Parser diagnostic.
        message: String,
    },

    /// A registration matched but lives outside the namespace the default
    /// branch configuration requires.
    #[error(
        "repository registration {registration} matches but should be installed in {required_namespace} as configured on the default branch"
    )]
    PolicyViolation {
        /// Name of the offending registration.
        registration: String,
        /// Namespace demanded by the default-branch configuration document.
        required_namespace: String,
    },

    /// A registration points execution at a namespace it is not stored in.
    #[error(
        "repository registration {registration} matches but belongs to {owning_namespace} while it should be in {target_namespace}"
    )]
    SecurityViolation {
        /// Name of the offending registration.
        registration: String,
        /// Namespace the registration record is stored in.
        owning_namespace: String,
        /// Namespace the registration asks to execute in.
        target_namespace: String,
    },

    /// A reference inside the merged definitions could not be resolved.
    #[error("cannot resolve {kind} {name} referenced by {referenced_by}")]
    Resolution {
        /// Kind of the missing unit (`Task`, `Pipeline`).
        kind: String,
        /// Name that was looked up.
        name: String,
        /// Unit that holds the reference.
        referenced_by: String,
    },

    /// No run candidate matches the triggering event.
    #[error("no pipeline definition matches this event ({event})")]
    Selection {
        /// Short description of the event used for matching.
        event: String,
    },

    /// More than one run candidate matches the event equally well.
    #[error("multiple pipeline definitions match this event equally: {candidates:?}")]
    Ambiguity {
        /// Names of the tied candidates, in definition order.
        candidates: Vec<String>,
    },

    /// The target namespace does not exist on the cluster.
    #[error("namespace {namespace} does not exist on the cluster")]
    NamespaceNotFound {
        /// The namespace that was checked.
        namespace: String,
    },

    /// Submission, the completion wait, or another execution-engine call failed.
    #[error("execution engine error: {message}")]
    ExecutionEngine {
        /// Engine diagnostic.
        message: String,
    },

    /// The registration changed between re-fetch and history update.
    #[error("repository registration {registration} was modified concurrently; run history not recorded")]
    LedgerConflict {
        /// Name of the registration whose update was rejected.
        registration: String,
    },

    /// A call to the Git provider (or a remote task URL) failed.
    #[error("git provider error: {message}")]
    Provider {
        /// Provider diagnostic, including the HTTP status when available.
        message: String,
    },

    /// The registration store could not be listed or read.
    #[error("registration store error: {message}")]
    Store {
        /// Store diagnostic.
        message: String,
    },

    /// Adapter or process configuration is invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },
}

impl PacError {
    /// Shorthand for [`PacError::MalformedInput`].
    pub fn malformed(source_name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::MalformedInput {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    /// Shorthand for [`PacError::Provider`].
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// Shorthand for [`PacError::ExecutionEngine`].
    pub fn engine(message: impl Into<String>) -> Self {
        Self::ExecutionEngine {
            message: message.into(),
        }
    }

    /// Shorthand for [`PacError::Store`].
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Shorthand for [`PacError::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Classifies this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MalformedInput { .. } => ErrorCategory::MalformedInput,
            Self::PolicyViolation { .. } | Self::SecurityViolation { .. } => {
                ErrorCategory::Security
            }
            Self::Resolution { .. } | Self::Selection { .. } | Self::Ambiguity { .. } => {
                ErrorCategory::Definition
            }
            Self::NamespaceNotFound { .. } | Self::ExecutionEngine { .. } => {
                ErrorCategory::Execution
            }
            Self::LedgerConflict { .. } => ErrorCategory::Bookkeeping,
            Self::Provider { .. } => ErrorCategory::Provider,
            Self::Store { .. } => ErrorCategory::Store,
            Self::Configuration { .. } => ErrorCategory::Configuration,
        }
    }

    /// Returns `true` for namespace placement and hijack violations.
    pub fn is_security_relevant(&self) -> bool {
        self.category() == ErrorCategory::Security
    }

    /// Returns `true` when the run itself completed and only the history
    /// update failed.
    pub fn is_bookkeeping(&self) -> bool {
        self.category() == ErrorCategory::Bookkeeping
    }
}
