//! Chooses the run candidate whose annotations fit the triggering event.
//!
//! Two annotations are consulted, each a single value or a bracketed list:
//!
//! ```yaml
//! metadata:
//!   annotations:
//!     pipelinesascode.tekton.dev/on-event: "[pull_request, push]"
//!     pipelinesascode.tekton.dev/on-target-branch: "[main]"
//! ```
//!
//! For each annotation a candidate fits the event exactly, as a wildcard
//! (`*` or annotation absent), or not at all. Non-fitting candidates are
//! discarded; among the rest the most specific wins. A tie at the top is an
//! error rather than an arbitrary pick.

use tracing::{debug, info};

use crate::{Event, PacError, RunCandidate};

/// Annotation listing the event kinds a run reacts to.
pub const ON_EVENT_ANNOTATION: &str = "pipelinesascode.tekton.dev/on-event";
/// Annotation listing the target branches a run reacts to.
pub const ON_TARGET_BRANCH_ANNOTATION: &str = "pipelinesascode.tekton.dev/on-target-branch";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Fit {
    Wildcard = 1,
    Exact = 2,
}

/// Parses `"[a, b]"`, `"a"`, or `"a, b"` into its non-empty values.
fn annotation_values(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed);
    inner
        .split(',')
        .map(|v| v.trim().trim_matches(|c| c == '"' || c == '\'').trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn fit(raw: Option<&String>, accepts: impl Fn(&str) -> bool) -> Option<Fit> {
    let values = raw.map(|r| annotation_values(r)).unwrap_or_default();
    if values.is_empty() {
        return Some(Fit::Wildcard);
    }
    if values.iter().any(|v| accepts(v)) {
        return Some(Fit::Exact);
    }
    if values.iter().any(|v| v == "*") {
        return Some(Fit::Wildcard);
    }
    None
}

/// Specificity of `candidate` for `event`, or `None` when it does not fit.
fn specificity(candidate: &RunCandidate, event: &Event) -> Option<u8> {
    let annotations = candidate.annotations();
    let on_event = fit(annotations.get(ON_EVENT_ANNOTATION), |v| {
        v == event.trigger_target || v == event.event_type
    })?;
    let on_branch = fit(annotations.get(ON_TARGET_BRANCH_ANNOTATION), |v| {
        v.strip_prefix("refs/heads/").unwrap_or(v) == event.base_branch.as_str()
    })?;
    Some(on_event as u8 + on_branch as u8)
}

/// Picks the single most specific candidate for `event`.
///
/// # Errors
///
/// - [`PacError::Selection`] when no candidate fits.
/// - [`PacError::Ambiguity`] when several candidates fit equally well.
pub fn select_candidate(
    candidates: Vec<RunCandidate>,
    event: &Event,
) -> Result<RunCandidate, PacError> {
    let scored: Vec<(u8, RunCandidate)> = candidates
        .into_iter()
        .filter_map(|c| {
            let score = specificity(&c, event);
            debug!(candidate = c.name(), ?score, "scored run candidate");
            score.map(|s| (s, c))
        })
        .collect();

    let Some(best) = scored.iter().map(|(s, _)| *s).max() else {
        return Err(PacError::Selection {
            event: event.describe(),
        });
    };

    let mut top: Vec<RunCandidate> = scored
        .into_iter()
        .filter(|(s, _)| *s == best)
        .map(|(_, c)| c)
        .collect();

    if top.len() > 1 {
        return Err(PacError::Ambiguity {
            candidates: top.iter().map(|c| c.name().to_string()).collect(),
        });
    }

    let chosen = top.remove(0);
    info!(candidate = chosen.name(), specificity = best, "selected run candidate");
    Ok(chosen)
}
