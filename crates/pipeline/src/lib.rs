//! Core domain for pipelines-as-code.
//!
//! This crate contains every domain concept, newtype identifier, shared value
//! type, and the pass-level error type. Infrastructure crates implement the
//! port traits defined here; they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; the `provider` and `cluster` crates define
//! *how* to supply it, and `orchestrator` drives a pass through it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`PassId`, `Namespace`, `BranchName`, etc.) |
//! | [`types`] | `Event`, `Registration`, status vocabulary, run results |
//! | [`errors`] | `PacError` and `ErrorCategory` |
//! | [`ports`] | `GitProvider`, `TaskFetcher`, `RegistrationStore`, `ExecutionEngine` |
//! | [`access`] | Sender authorisation gate |
//! | [`matcher`] | Event-to-registration matching and namespace validation |
//! | [`config`] | The optional configuration document on the default branch |
//! | [`placeholders`] | `{{name}}` substitution |
//! | [`definitions`] | Declarative units and run candidates |
//! | [`resolver`] | Definition merging and reference inlining |
//! | [`selector`] | Annotation-based candidate selection |
//! | [`labels`] | Stable run labels |
//! | [`ledger`] | Bounded run history |

pub mod access;
pub mod config;
pub mod definitions;
pub mod errors;
pub mod identifiers;
pub mod labels;
pub mod ledger;
pub mod matcher;
pub mod placeholders;
pub mod ports;
pub mod resolver;
pub mod selector;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use access::{AccessDecision, AccessPolicy, AllowReason};
pub use config::{collect_remote_tasks, parse_config_document, PipelineConfig, TaskSource};
pub use definitions::{parse_stream, DeclarativeUnit, RunCandidate, UnitKind};
pub use errors::{ErrorCategory, PacError};
pub use identifiers::{
    BranchName, CommitSha, Namespace, PassId, RegistrationName, RepositoryUrl, RunName,
};
pub use labels::{run_labels, sanitize_label_value};
pub use ledger::{append_bounded, record_run, HISTORY_CAPACITY};
pub use matcher::{find_registration, match_registration};
pub use placeholders::{event_variables, substitute};
pub use ports::{
    ExecutionEngine, GitProvider, PayloadHints, ProviderCredentials, RegistrationStore,
    TaskFetcher,
};
pub use resolver::{merge_definitions, DefinitionSource, MergeRequest};
pub use selector::{select_candidate, ON_EVENT_ANNOTATION, ON_TARGET_BRANCH_ANNOTATION};
pub use types::{
    Conclusion, Event, FileHandle, ProviderKind, Registration, RunConclusion, RunStatusRecord,
    StatusPhase, StatusUpdate, SubmittedRun, TaskOutcome, TerminalRun, Timestamp,
};
