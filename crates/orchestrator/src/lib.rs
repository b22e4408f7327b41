//! Pipelines-as-code run orchestrator.
//!
//! Sequences one inbound [`pipeline::Event`] through authorisation,
//! registration matching, definition resolution, candidate selection,
//! submission, completion, history recording, and status reporting.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** This crate sequences calls between the business
//! logic in [`pipeline`] and the port traits it defines. It contains no domain
//! rules of its own and no I/O: every side effect goes through a port.
//!
//! ## Entry points
//!
//! - [`Orchestrator::run_with_reporting`] is what a composition root calls.
//!   It is the only place an error is turned into user-facing text.
//! - [`Orchestrator::run`] runs the steps without that final report, which is
//!   handy when composing with another reporting layer.

mod messages;
mod outcome;
mod pass;
mod settings;

pub use outcome::{RunOutcome, SkipReason};
pub use pass::Orchestrator;
pub use settings::{
    OrchestratorSettings, DEFAULT_APPLICATION_NAME, DEFAULT_CONFIG_FILE, DEFAULT_DEFINITION_DIR,
    DEFAULT_FALLBACK_DETAILS_URL,
};
