//! Merges the definition directory into self-contained run candidates.
//!
//! The pipeline is:
//!
//! 1. concatenate every definition file into one multi-document stream, in
//!    listing order;
//! 2. substitute `{{placeholders}}` over that stream;
//! 3. append the configured remote tasks, untouched by substitution;
//! 4. parse the stream into [`DeclarativeUnit`]s;
//! 5. for every `PipelineRun`, inline the `Pipeline` and `Task` units it
//!    references by name.
//!
//! Resolution works on an arena: units live in one `Vec`, and per-kind
//! `name -> index` maps are built once per pass. Every candidate is produced
//! by copying out of the arena, so no unit is ever shared or mutated in place.

use std::collections::{BTreeMap, HashMap};

use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use crate::definitions::{parse_stream, DeclarativeUnit, RunCandidate, UnitKind};
use crate::placeholders::substitute;
use crate::PacError;

/// Pipeline tasks sections that may carry `taskRef`s.
const TASK_SECTIONS: [&str; 2] = ["tasks", "finally"];

/// One definition file's content, tagged with its path for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionSource {
    /// Repository-relative path.
    pub path: String,
    /// Raw file text.
    pub content: String,
}

/// Inputs to [`merge_definitions`].
#[derive(Debug, Clone)]
pub struct MergeRequest<'a> {
    /// Definition files in listing order.
    pub sources: &'a [DefinitionSource],
    /// Placeholder values.
    pub variables: &'a BTreeMap<String, String>,
    /// Extra task documents appended after substitution.
    pub remote_tasks: &'a str,
    /// Treat an unresolvable `Task` or `Pipeline` reference as fatal.
    pub strict: bool,
}

/// Appends `text` to a multi-document stream, inserting a `---` separator
/// unless the stream is empty or `text` already starts with one.
pub fn push_document(stream: &mut String, text: &str) {
    if !stream.is_empty() && !text.trim_start().starts_with("---") {
        stream.push_str("---\n");
    }
    stream.push_str(text);
    if !text.ends_with('\n') {
        stream.push('\n');
    }
}

/// Concatenates definition files into one multi-document stream.
pub fn concat_documents(sources: &[DefinitionSource]) -> String {
    let mut stream = String::new();
    for source in sources {
        debug!(path = %source.path, bytes = source.content.len(), "adding definition file");
        push_document(&mut stream, &source.content);
    }
    stream
}

/// Runs the full merge and returns the resolved candidates in stream order.
///
/// The output depends only on the request: the same sources and variables
/// always yield identical candidates.
pub fn merge_definitions(request: &MergeRequest<'_>) -> Result<Vec<RunCandidate>, PacError> {
    let mut stream = substitute(&concat_documents(request.sources), request.variables);
    if !request.remote_tasks.is_empty() {
        push_document(&mut stream, request.remote_tasks);
    }
    resolve(&stream, request.strict)
}

/// Parses `stream` and resolves every `PipelineRun` in it.
pub fn resolve(stream: &str, strict: bool) -> Result<Vec<RunCandidate>, PacError> {
    let units = parse_stream(stream, "definition directory")?;
    let arena = Arena::build(&units);

    let mut candidates = Vec::new();
    for unit in units.iter().filter(|u| u.kind == UnitKind::PipelineRun) {
        candidates.push(arena.resolve_run(unit, strict)?);
    }
    debug!(
        units = units.len(),
        candidates = candidates.len(),
        "definitions resolved"
    );
    Ok(candidates)
}

// ---------------------------------------------------------------------------
// Arena
// ---------------------------------------------------------------------------

struct Arena<'a> {
    units: &'a [DeclarativeUnit],
    pipelines: HashMap<&'a str, usize>,
    tasks: HashMap<&'a str, usize>,
}

impl<'a> Arena<'a> {
    /// Indexes named `Pipeline` and `Task` units. The first definition of a
    /// name wins, so repository-local units shadow appended remote tasks.
    fn build(units: &'a [DeclarativeUnit]) -> Self {
        let mut pipelines = HashMap::new();
        let mut tasks = HashMap::new();
        for (index, unit) in units.iter().enumerate() {
            let map = match unit.kind {
                UnitKind::Pipeline => &mut pipelines,
                UnitKind::Task => &mut tasks,
                _ => continue,
            };
            let Some(name) = unit.name() else {
                warn!(kind = unit.kind.as_str(), "ignoring unnamed unit");
                continue;
            };
            if map.contains_key(name) {
                warn!(kind = unit.kind.as_str(), name, "duplicate definition ignored");
                continue;
            }
            map.insert(name, index);
        }
        Self {
            units,
            pipelines,
            tasks,
        }
    }

    fn spec_of(&self, index: usize) -> Mapping {
        self.units[index].spec().cloned().unwrap_or_default()
    }

    fn resolve_run(&self, run: &DeclarativeUnit, strict: bool) -> Result<RunCandidate, PacError> {
        let run_name = run.name().unwrap_or("<unnamed>").to_string();
        let mut document = run.document.clone();

        if let Some(Value::Mapping(spec)) = document.get_mut("spec") {
            if let Some(pipeline_name) = local_reference(spec.get("pipelineRef")) {
                match self.pipelines.get(pipeline_name.as_str()) {
                    Some(&index) => {
                        let mut pipeline_spec = self.spec_of(index);
                        self.resolve_tasks(&mut pipeline_spec, &pipeline_name, strict)?;
                        spec.remove("pipelineRef");
                        spec.insert(Value::from("pipelineSpec"), Value::Mapping(pipeline_spec));
                    }
                    None if strict => {
                        return Err(PacError::Resolution {
                            kind: "Pipeline".into(),
                            name: pipeline_name,
                            referenced_by: run_name,
                        })
                    }
                    None => debug!(pipeline = %pipeline_name, "leaving pipeline reference unresolved"),
                }
            } else if let Some(Value::Mapping(pipeline_spec)) = spec.get_mut("pipelineSpec") {
                self.resolve_tasks(pipeline_spec, &run_name, strict)?;
            }
        }

        Ok(RunCandidate::from_document(document))
    }

    fn resolve_tasks(
        &self,
        pipeline_spec: &mut Mapping,
        referenced_by: &str,
        strict: bool,
    ) -> Result<(), PacError> {
        for section in TASK_SECTIONS {
            let Some(Value::Sequence(entries)) = pipeline_spec.get_mut(section) else {
                continue;
            };
            for entry in entries.iter_mut() {
                let Value::Mapping(pipeline_task) = entry else {
                    continue;
                };
                let Some(task_name) = local_reference(pipeline_task.get("taskRef")) else {
                    continue;
                };
                match self.tasks.get(task_name.as_str()) {
                    Some(&index) => {
                        pipeline_task.remove("taskRef");
                        pipeline_task
                            .insert(Value::from("taskSpec"), Value::Mapping(self.spec_of(index)));
                    }
                    None if strict => {
                        return Err(PacError::Resolution {
                            kind: "Task".into(),
                            name: task_name,
                            referenced_by: referenced_by.to_string(),
                        })
                    }
                    None => debug!(task = %task_name, "leaving task reference unresolved"),
                }
            }
        }
        Ok(())
    }
}

/// Returns the referenced name when `reference` points at a unit that should
/// live in the same stream. Cluster-scoped kinds, bundles, and resolver
/// references are external.
fn local_reference(reference: Option<&Value>) -> Option<String> {
    let reference = reference?.as_mapping()?;
    if reference.contains_key("bundle") || reference.contains_key("resolver") {
        return None;
    }
    if let Some(kind) = reference.get("kind").and_then(Value::as_str) {
        if kind != "Task" && kind != "Pipeline" {
            return None;
        }
    }
    reference
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
}
