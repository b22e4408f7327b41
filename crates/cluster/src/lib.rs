//! Kubernetes infrastructure adapters.
//!
//! Implements the [`pipeline::RegistrationStore`] port on top of
//! `Repository` custom resources and the [`pipeline::ExecutionEngine`] port
//! on top of Tekton `PipelineRun`s, both over the cluster's REST API.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Resource shapes, watch semantics, and API error codes
//! stay in this crate. Callers see domain records and [`pipeline::PacError`]
//! only; an HTTP 409 on a registration update arrives as
//! [`pipeline::PacError::LedgerConflict`].
//!
//! ## Connecting
//!
//! Inside a pod use [`KubeConfig::in_cluster`]; elsewhere fill in
//! [`KubeConfig`] with the API URL and a bearer token.

mod client;
mod console;
mod objects;
mod repository;
mod tekton;

pub use client::{KubeClient, KubeConfig, KubeError};
pub use repository::KubeRegistrationStore;
pub use tekton::TektonEngine;
