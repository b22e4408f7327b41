use pipeline::{Registration, RunConclusion, SubmittedRun};

/// Why a pass ended without submitting anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The sender failed the access policy.
    AccessDenied,
    /// No registration binds the event's repository and branch.
    NotConfigured,
    /// The definition directory is absent or holds no YAML files.
    NoDefinitionDirectory,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::AccessDenied => "access denied",
            Self::NotConfigured => "repository not configured",
            Self::NoDefinitionDirectory => "no definition directory",
        })
    }
}

/// Successful result of a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing was submitted; a `skipped` status was posted.
    Skipped {
        /// What caused the skip.
        reason: SkipReason,
    },
    /// A run was submitted, finished, and recorded.
    ///
    /// A failed run is still a completed pass; only `conclusion` tells.
    Completed {
        /// The submitted run.
        run: SubmittedRun,
        /// Its terminal outcome.
        conclusion: RunConclusion,
        /// The registration as persisted with the new history entry.
        registration: Registration,
    },
}
