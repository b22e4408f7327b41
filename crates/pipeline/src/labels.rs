//! Labels attached to every submitted run.
//!
//! These keys are the only contract for querying runs from outside (UI, CLI),
//! so they must never change.

use std::collections::BTreeMap;

use crate::Event;

/// Label prefix shared by every key below.
pub const LABEL_PREFIX: &str = "tekton.dev/pipeline-ascode-";

/// Owning account of the repository.
pub const OWNER_LABEL: &str = "tekton.dev/pipeline-ascode-owner";
/// Repository name.
pub const REPOSITORY_LABEL: &str = "tekton.dev/pipeline-ascode-repository";
/// Commit SHA.
pub const SHA_LABEL: &str = "tekton.dev/pipeline-ascode-sha";
/// Triggering sender.
pub const SENDER_LABEL: &str = "tekton.dev/pipeline-ascode-sender";
/// Base branch.
pub const BRANCH_LABEL: &str = "tekton.dev/pipeline-ascode-branch";
/// Normalised trigger.
pub const EVENT_TYPE_LABEL: &str = "tekton.dev/pipeline-ascode-event-type";

const MAX_LABEL_VALUE_LEN: usize = 63;

/// Coerces `value` into a valid label value: `[A-Za-z0-9._-]`, at most 63
/// characters, starting and ending with an alphanumeric. Anything else
/// becomes `-`; the result may be empty.
pub fn sanitize_label_value(value: &str) -> String {
    let mapped: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .take(MAX_LABEL_VALUE_LEN)
        .collect();
    mapped
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

/// Builds the label set for a run triggered by `event`.
pub fn run_labels(event: &Event) -> BTreeMap<String, String> {
    [
        (OWNER_LABEL, event.owner.as_str()),
        (REPOSITORY_LABEL, event.repository.as_str()),
        (SHA_LABEL, event.sha.as_str()),
        (SENDER_LABEL, event.sender.as_str()),
        (BRANCH_LABEL, event.base_branch.as_str()),
        (EVENT_TYPE_LABEL, event.trigger_target.as_str()),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), sanitize_label_value(value)))
    .collect()
}
