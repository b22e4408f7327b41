//! `{{name}}` substitution over raw definition text.
//!
//! Only names present in the variable map are replaced; any other
//! `{{token}}` is left verbatim so definitions can carry templating meant for
//! the execution engine (e.g. Tekton's `$(params.x)` is untouched anyway, but
//! a stray `{{ foo }}` is not an error either).

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::Event;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder pattern is valid")
});

/// Replaces recognised `{{name}}` tokens in `text`.
///
/// Whitespace inside the braces is tolerated (`{{ revision }}`).
pub fn substitute(text: &str, variables: &BTreeMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures<'_>| match variables.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// The variables every definition may reference: `revision` (the commit
/// sha) and `repo_url`. Other `{{...}}` tokens are left for the engine.
pub fn event_variables(event: &Event) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("revision".to_string(), event.sha.to_string()),
        ("repo_url".to_string(), event.url.to_string()),
    ])
}
