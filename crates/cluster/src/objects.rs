//! Object metadata and Knative-style status conditions shared by the
//! `Repository` and `PipelineRun` mappings.

use serde::{Deserialize, Serialize};

use pipeline::RunConclusion;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

/// The condition type that carries a run's terminal state.
pub(crate) const SUCCEEDED: &str = "Succeeded";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Condition {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl Condition {
    /// `True` and `False` are terminal; `Unknown` (or anything else) is not.
    pub fn conclusion(&self) -> Option<RunConclusion> {
        match self.status.as_str() {
            "True" => Some(RunConclusion::Succeeded),
            "False" => Some(RunConclusion::Failed),
            _ => None,
        }
    }
}

/// Finds the `Succeeded` condition.
pub(crate) fn succeeded(conditions: &[Condition]) -> Option<&Condition> {
    conditions.iter().find(|c| c.kind == SUCCEEDED)
}
