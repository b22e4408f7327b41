//! Declarative units parsed from a multi-document YAML stream.
//!
//! Documents are kept as [`serde_yaml::Mapping`] rather than fully typed
//! structs: the engine accepts many fields this crate has no opinion on, and
//! `Mapping` preserves key order, which keeps serialised output stable.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::PacError;

/// The kinds of unit the resolver understands.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UnitKind {
    /// A runnable unit; the only kind that becomes a [`RunCandidate`].
    PipelineRun,
    /// A named graph of tasks referenced by runs.
    Pipeline,
    /// A named sequence of steps referenced by pipelines.
    Task,
    /// Anything else; carried through parsing but ignored by resolution.
    Other(String),
}

impl UnitKind {
    fn from_kind(kind: &str) -> Self {
        match kind {
            "PipelineRun" => Self::PipelineRun,
            "Pipeline" => Self::Pipeline,
            "Task" => Self::Task,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the `kind:` value.
    pub fn as_str(&self) -> &str {
        match self {
            Self::PipelineRun => "PipelineRun",
            Self::Pipeline => "Pipeline",
            Self::Task => "Task",
            Self::Other(kind) => kind,
        }
    }
}

/// One document of the merged stream.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclarativeUnit {
    /// Parsed `kind:`.
    pub kind: UnitKind,
    /// The complete document.
    pub document: Mapping,
}

impl DeclarativeUnit {
    /// `metadata.name`, falling back to `metadata.generateName`.
    pub fn name(&self) -> Option<&str> {
        let metadata = self.document.get("metadata")?.as_mapping()?;
        metadata
            .get("name")
            .and_then(Value::as_str)
            .or_else(|| metadata.get("generateName").and_then(Value::as_str))
    }

    /// The `spec:` mapping, if any.
    pub fn spec(&self) -> Option<&Mapping> {
        self.document.get("spec").and_then(Value::as_mapping)
    }
}

fn metadata_strings(document: &Mapping, field: &str) -> BTreeMap<String, String> {
    document
        .get("metadata")
        .and_then(Value::as_mapping)
        .and_then(|m| m.get(field))
        .and_then(Value::as_mapping)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|(k, v)| Some((k.as_str()?.to_string(), scalar_to_string(v)?)))
                .collect()
        })
        .unwrap_or_default()
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parses a multi-document stream into units, in stream order.
///
/// Empty documents and documents without a string `kind:` are skipped.
///
/// # Errors
///
/// [`PacError::MalformedInput`] on YAML syntax errors or a non-mapping
/// top-level document.
pub fn parse_stream(stream: &str, source_name: &str) -> Result<Vec<DeclarativeUnit>, PacError> {
    let mut units = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(stream).enumerate() {
        let value = Value::deserialize(document).map_err(|e| PacError::malformed(source_name, e))?;
        let document = match value {
            Value::Null => continue,
            Value::Mapping(mapping) => mapping,
            other => {
                return Err(PacError::malformed(
                    source_name,
                    format!("document {index} is not a mapping: {other:?}"),
                ))
            }
        };
        let Some(kind) = document.get("kind").and_then(Value::as_str) else {
            tracing::debug!(document = index, "skipping document without kind");
            continue;
        };
        units.push(DeclarativeUnit {
            kind: UnitKind::from_kind(kind),
            document,
        });
    }
    Ok(units)
}

// ---------------------------------------------------------------------------
// Run candidates
// ---------------------------------------------------------------------------

/// A fully resolved, self-contained run definition eligible for submission.
#[derive(Debug, Clone, PartialEq)]
pub struct RunCandidate {
    document: Mapping,
}

impl RunCandidate {
    pub(crate) fn from_document(document: Mapping) -> Self {
        Self { document }
    }

    /// Display name: `metadata.name`, then `metadata.generateName`, then `"<unnamed>"`.
    pub fn name(&self) -> &str {
        self.metadata()
            .and_then(|m| {
                m.get("name")
                    .and_then(Value::as_str)
                    .or_else(|| m.get("generateName").and_then(Value::as_str))
            })
            .unwrap_or("<unnamed>")
    }

    /// The selector metadata used by the annotation selector.
    pub fn annotations(&self) -> BTreeMap<String, String> {
        metadata_strings(&self.document, "annotations")
    }

    /// Labels currently carried by the candidate.
    pub fn labels(&self) -> BTreeMap<String, String> {
        metadata_strings(&self.document, "labels")
    }

    /// Merges `labels` into `metadata.labels`; the given keys win.
    pub fn apply_labels(&mut self, labels: &BTreeMap<String, String>) {
        self.edit_metadata(|metadata| {
            let mut existing = match metadata.get("labels") {
                Some(Value::Mapping(existing)) => existing.clone(),
                _ => Mapping::new(),
            };
            for (key, value) in labels {
                existing.insert(Value::from(key.as_str()), Value::from(value.as_str()));
            }
            metadata.insert(Value::from("labels"), Value::Mapping(existing));
        });
    }

    /// Converts a fixed `metadata.name` into `generateName: <name>-` so
    /// repeated submissions of the same definition never collide.
    pub fn use_generated_name(&mut self) {
        self.edit_metadata(|metadata| {
            if metadata.contains_key("generateName") {
                metadata.remove("name");
                return;
            }
            if let Some(Value::String(name)) = metadata.remove("name") {
                let prefix = if name.ends_with('-') { name } else { format!("{name}-") };
                metadata.insert(Value::from("generateName"), Value::from(prefix));
            }
        });
    }

    /// The complete document.
    pub fn document(&self) -> &Mapping {
        &self.document
    }

    /// Serialises the candidate as a single YAML document.
    pub fn to_yaml(&self) -> Result<String, PacError> {
        serde_yaml::to_string(&self.document).map_err(|e| PacError::malformed(self.name(), e))
    }

    /// Converts the candidate into a JSON value for API submission.
    pub fn to_json(&self) -> Result<serde_json::Value, PacError> {
        serde_json::to_value(&self.document).map_err(|e| PacError::malformed(self.name(), e))
    }

    fn metadata(&self) -> Option<&Mapping> {
        self.document.get("metadata").and_then(Value::as_mapping)
    }

    fn edit_metadata(&mut self, edit: impl FnOnce(&mut Mapping)) {
        if let Some(Value::Mapping(metadata)) = self.document.get_mut("metadata") {
            edit(metadata);
            return;
        }
        let mut metadata = Mapping::new();
        edit(&mut metadata);
        self.document
            .insert(Value::from("metadata"), Value::Mapping(metadata));
    }
}
