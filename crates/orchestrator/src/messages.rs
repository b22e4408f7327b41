//! User-facing status texts.
//!
//! GitHub renders check-run text as HTML, so the messages carry light markup.
//! Bitbucket shows them verbatim, which is still readable.

use pipeline::{Namespace, PacError, RunConclusion, SubmittedRun, TerminalRun};

pub(crate) fn validating(application: &str) -> String {
    format!("{application} is validating this commit")
}

pub(crate) fn sender_not_allowed(sender: &str) -> String {
    format!("User {sender} is not allowed to run CI on this repo.")
}

pub(crate) fn not_configured() -> String {
    "Could not find a configuration for this repository".to_string()
}

pub(crate) fn no_definition_dir(dir: &str) -> String {
    format!("Could not find a <b>{dir}/</b> directory for this repository")
}

pub(crate) fn fetching_configuration(namespace: &Namespace) -> String {
    format!("Getting pipelinerun configuration in namespace <b>{namespace}</b>")
}

pub(crate) fn run_started(run: &SubmittedRun) -> String {
    format!(
        "Starting PipelineRun <b>{name}</b> in namespace <b>{ns}</b><br><br>\
         You can follow the execution on the command line with: <br><br>\
         <code>tkn pr logs -f -n {ns} {name}</code>",
        name = run.name,
        ns = run.namespace,
    )
}

pub(crate) fn pass_failed(err: &PacError) -> String {
    format!("There was an issue validating the commit: \"{err}\"")
}

fn verdict(conclusion: Option<RunConclusion>) -> &'static str {
    match conclusion {
        Some(RunConclusion::Succeeded) => "succeeded",
        Some(RunConclusion::Failed) => "failed",
        None => "skipped",
    }
}

/// Final report: outcome headline followed by a per-task table.
pub(crate) fn run_finished(run: &TerminalRun, namespace: &Namespace) -> String {
    let mut text = format!(
        "PipelineRun <b>{}</b> in namespace <b>{}</b> has {}",
        run.name,
        namespace,
        verdict(Some(run.conclusion)),
    );
    if !run.reason.is_empty() {
        text.push_str(&format!(" ({})", run.reason));
    }
    if !run.message.is_empty() {
        text.push_str(&format!(": {}", run.message));
    }
    if let (Some(start), Some(end)) = (run.start_time, run.completion_time) {
        let seconds = (end.as_datetime() - start.as_datetime()).num_seconds();
        text.push_str(&format!("<br>Duration: {seconds}s"));
    }
    if run.tasks.is_empty() {
        return text;
    }
    text.push_str("<br><br><table><tr><th>Task</th><th>Status</th><th>Reason</th></tr>");
    for task in &run.tasks {
        text.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            task.name,
            verdict(task.conclusion),
            task.reason
        ));
    }
    text.push_str("</table>");
    text
}
