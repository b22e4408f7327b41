//! Mapping of the domain status vocabulary onto provider wire values.

use pipeline::{Conclusion, StatusPhase, StatusUpdate};

/// Bitbucket build-status state (Cloud and Server share the vocabulary).
pub(crate) fn bitbucket_state(update: &StatusUpdate) -> &'static str {
    match (update.phase, update.conclusion) {
        (StatusPhase::Queued | StatusPhase::InProgress, _) => "INPROGRESS",
        (StatusPhase::Completed, Conclusion::Success) => "SUCCESSFUL",
        (StatusPhase::Completed, Conclusion::Failure) => "FAILED",
        (StatusPhase::Completed, Conclusion::Skipped | Conclusion::None) => "STOPPED",
    }
}

/// GitHub check-run title.
pub(crate) fn check_run_title(update: &StatusUpdate) -> String {
    match update.phase {
        StatusPhase::Queued => "CI is queued".to_string(),
        StatusPhase::InProgress => "CI has started".to_string(),
        StatusPhase::Completed => format!("CI run: {}", update.conclusion.as_str()),
    }
}

/// Reduces the light HTML used in status messages to plain text.
pub(crate) fn plain_text(html: &str) -> String {
    let with_breaks = html.replace("<br>", "\n").replace("<br/>", "\n");
    let mut out = String::with_capacity(with_breaks.len());
    let mut in_tag = false;
    for c in with_breaks.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

/// Truncates `text` to at most `max` characters.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitbucket_states() {
        let cases = [
            (StatusUpdate::in_progress("x", "u"), "INPROGRESS"),
            (StatusUpdate::completed(Conclusion::Success, "x", "u"), "SUCCESSFUL"),
            (StatusUpdate::completed(Conclusion::Failure, "x", "u"), "FAILED"),
            (StatusUpdate::completed(Conclusion::Skipped, "x", "u"), "STOPPED"),
        ];
        for (update, expected) in cases {
            assert_eq!(bitbucket_state(&update), expected);
        }
    }

    #[test]
    fn test_plain_text_strips_markup() {
        assert_eq!(
            plain_text("Starting <b>run-1</b><br><br><code>tkn pr logs</code>"),
            "Starting run-1\n\ntkn pr logs"
        );
    }

    #[test]
    fn test_check_run_title_names_conclusion() {
        let update = StatusUpdate::completed(Conclusion::Failure, "x", "u");
        assert_eq!(check_run_title(&update), "CI run: failure");
    }
}
