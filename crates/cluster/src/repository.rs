//! `Repository` custom resources as the registration store.
//!
//! A registration is a `pipelinesascode.tekton.dev/v1alpha1` `Repository`:
//! `spec.url` and `spec.branch` bind it to a Git repository, `spec.namespace`
//! names the namespace runs should execute in, and the top-level
//! `pipelinerun_status` list is the bounded run history.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use pipeline::{
    BranchName, Namespace, PacError, Registration, RegistrationName, RegistrationStore,
    RepositoryUrl, RunConclusion, RunName, RunStatusRecord, Timestamp,
};

use crate::client::{KubeClient, KubeError};
use crate::objects::{succeeded, Condition, ObjectMeta, SUCCEEDED};

const GROUP_VERSION: &str = "pipelinesascode.tekton.dev/v1alpha1";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RepositorySpec {
    #[serde(default)]
    url: String,
    #[serde(default)]
    branch: String,
    #[serde(default)]
    namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunStatusEntry {
    pipeline_run_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completion_time: Option<String>,
    #[serde(default)]
    conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Deserialize)]
struct RepositoryResource {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: RepositorySpec,
    #[serde(default)]
    pipelinerun_status: Vec<RunStatusEntry>,
}

#[derive(Debug, Deserialize)]
struct RepositoryList {
    #[serde(default)]
    items: Vec<RepositoryResource>,
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

/// Maps one stored entry. Entries that have not reached a terminal state
/// keep their place with `status: None`; only entries without a run name
/// are unusable.
fn record_from_entry(entry: &RunStatusEntry) -> Option<RunStatusRecord> {
    let condition = succeeded(&entry.conditions);
    Some(RunStatusRecord {
        status: condition.and_then(Condition::conclusion),
        reason: condition.map(|c| c.reason.clone()).unwrap_or_default(),
        message: condition.map(|c| c.message.clone()).unwrap_or_default(),
        run_name: RunName::new(entry.pipeline_run_name.clone())?,
        start_time: entry.start_time.as_deref().and_then(Timestamp::parse_rfc3339),
        completion_time: entry.completion_time.as_deref().and_then(Timestamp::parse_rfc3339),
    })
}

fn entry_from_record(record: &RunStatusRecord) -> RunStatusEntry {
    let status = match record.status {
        Some(RunConclusion::Succeeded) => "True",
        Some(RunConclusion::Failed) => "False",
        None => "Unknown",
    };
    // An entry that was stored without any condition is written back without one.
    let bare = record.status.is_none() && record.reason.is_empty() && record.message.is_empty();
    let conditions = if bare {
        Vec::new()
    } else {
        vec![Condition {
            kind: SUCCEEDED.to_string(),
            status: status.to_string(),
            reason: record.reason.clone(),
            message: record.message.clone(),
        }]
    };
    RunStatusEntry {
        pipeline_run_name: record.run_name.to_string(),
        start_time: record.start_time.map(|t| t.to_string()),
        completion_time: record.completion_time.map(|t| t.to_string()),
        conditions,
    }
}

/// Converts a resource into the domain record. Resources missing a name,
/// namespace, URL or branch cannot match any event and yield `None`.
fn registration_from_resource(resource: RepositoryResource) -> Option<Registration> {
    Some(Registration {
        name: RegistrationName::new(resource.metadata.name)?,
        namespace: Namespace::new(resource.metadata.namespace)?,
        url: RepositoryUrl::normalized(&resource.spec.url)?,
        branch: BranchName::from_ref(&resource.spec.branch)?,
        target_namespace: Namespace::new(resource.spec.namespace),
        history: resource
            .pipelinerun_status
            .iter()
            .filter_map(record_from_entry)
            .collect(),
        resource_version: resource.metadata.resource_version,
    })
}

/// Builds the merge patch that replaces the run history. The
/// `resourceVersion` turns the patch into a conditional write.
fn history_patch(registration: &Registration) -> serde_json::Value {
    let history: Vec<RunStatusEntry> =
        registration.history.iter().map(entry_from_record).collect();
    let mut metadata = json!({});
    if let Some(version) = &registration.resource_version {
        metadata["resourceVersion"] = json!(version);
    }
    json!({
        "metadata": metadata,
        "pipelinerun_status": history,
    })
}

fn store_error(action: &str, err: KubeError) -> PacError {
    PacError::store(format!("{action}: {err}"))
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// [`RegistrationStore`] backed by `Repository` custom resources.
#[derive(Debug, Clone)]
pub struct KubeRegistrationStore {
    client: KubeClient,
}

impl KubeRegistrationStore {
    pub fn new(client: KubeClient) -> Self {
        Self { client }
    }

    fn resource_path(namespace: &str, name: &str) -> String {
        format!("apis/{GROUP_VERSION}/namespaces/{namespace}/repositories/{name}")
    }
}

#[async_trait]
impl RegistrationStore for KubeRegistrationStore {
    async fn list_all(&self) -> Result<Vec<Registration>, PacError> {
        let list: RepositoryList = self
            .client
            .get_json(&format!("apis/{GROUP_VERSION}/repositories"))
            .await
            .map_err(|e| store_error("listing repositories", e))?;

        let total = list.items.len();
        let registrations: Vec<Registration> = list
            .items
            .into_iter()
            .filter_map(|resource| {
                let id = format!("{}/{}", resource.metadata.namespace, resource.metadata.name);
                let registration = registration_from_resource(resource);
                if registration.is_none() {
                    warn!(repository = %id, "ignoring incomplete Repository resource");
                }
                registration
            })
            .collect();
        debug!(total, usable = registrations.len(), "listed repositories");
        Ok(registrations)
    }

    async fn get(
        &self,
        namespace: &Namespace,
        name: &RegistrationName,
    ) -> Result<Registration, PacError> {
        let path = Self::resource_path(namespace.as_str(), name.as_str());
        let resource: RepositoryResource = self
            .client
            .get_json(&path)
            .await
            .map_err(|e| store_error(&format!("reading repository {namespace}/{name}"), e))?;
        registration_from_resource(resource).ok_or_else(|| {
            PacError::store(format!("repository {namespace}/{name} is missing url or branch"))
        })
    }

    async fn update(&self, registration: &Registration) -> Result<Registration, PacError> {
        let path = Self::resource_path(
            registration.namespace.as_str(),
            registration.name.as_str(),
        );
        let resource: RepositoryResource = self
            .client
            .merge_patch(&path, &history_patch(registration))
            .await
            .map_err(|e| {
                if e.is_conflict() {
                    PacError::LedgerConflict {
                        registration: registration.name.to_string(),
                    }
                } else {
                    store_error(&format!("updating repository {}", registration.name), e)
                }
            })?;
        registration_from_resource(resource).ok_or_else(|| {
            PacError::store(format!(
                "repository {} came back without url or branch",
                registration.name
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::{append_bounded, HISTORY_CAPACITY};

    const RESOURCE: &str = r#"{
        "apiVersion": "pipelinesascode.tekton.dev/v1alpha1",
        "kind": "Repository",
        "metadata": {"name": "app", "namespace": "ci-app", "resourceVersion": "812"},
        "spec": {"url": "https://github.com/org/app", "branch": "main", "namespace": "ci-app"},
        "pipelinerun_status": [
            {
                "pipelineRunName": "app-pr-a",
                "startTime": "2024-05-01T10:00:00Z",
                "completionTime": "2024-05-01T10:04:00Z",
                "conditions": [{
                    "type": "Succeeded", "status": "True",
                    "reason": "Succeeded", "message": "detail for a"
                }]
            },
            {
                "pipelineRunName": "app-pr-b",
                "conditions": [{"type": "Succeeded", "status": "Unknown", "reason": "Running"}]
            },
            {
                "pipelineRunName": "app-pr-c",
                "conditions": [{
                    "type": "Succeeded", "status": "True",
                    "reason": "Succeeded", "message": "detail for c"
                }]
            },
            {
                "pipelineRunName": "app-pr-d",
                "conditions": [{"type": "Succeeded", "status": "False", "reason": "Failed"}]
            },
            {"pipelineRunName": "app-pr-e"}
        ]
    }"#;

    fn resource() -> RepositoryResource {
        serde_json::from_str(RESOURCE).unwrap()
    }

    fn run_names(patch: &serde_json::Value) -> Vec<&str> {
        patch["pipelinerun_status"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["pipelineRunName"].as_str().unwrap())
            .collect()
    }

    #[test]
    fn test_resource_maps_to_registration() {
        let registration = registration_from_resource(resource()).unwrap();
        assert_eq!(registration.name.as_str(), "app");
        assert_eq!(registration.namespace.as_str(), "ci-app");
        assert_eq!(registration.target_namespace.as_ref().unwrap().as_str(), "ci-app");
        assert_eq!(registration.url.as_str(), "https://github.com/org/app");
        assert_eq!(registration.resource_version.as_deref(), Some("812"));

        // Every stored entry keeps its place, finished or not.
        assert_eq!(registration.history.len(), 5);
        let first = &registration.history[0];
        assert_eq!(first.status, Some(RunConclusion::Succeeded));
        assert_eq!(first.run_name.as_str(), "app-pr-a");
        assert_eq!(first.message, "detail for a");
        assert_eq!(first.completion_time.unwrap().to_string(), "2024-05-01T10:04:00Z");
        assert_eq!(registration.history[1].status, None);
        assert_eq!(registration.history[1].reason, "Running");
        assert_eq!(registration.history[3].status, Some(RunConclusion::Failed));
        assert_eq!(registration.history[4].status, None);
    }

    #[test]
    fn test_append_to_full_history_keeps_unfinished_entries_in_order() {
        let mut registration = registration_from_resource(resource()).unwrap();
        let newest = RunStatusRecord {
            status: Some(RunConclusion::Succeeded),
            reason: "Succeeded".into(),
            message: "all good".into(),
            run_name: RunName::new("app-pr-f").unwrap(),
            start_time: None,
            completion_time: None,
        };
        append_bounded(&mut registration.history, newest, HISTORY_CAPACITY);

        let patch = history_patch(&registration);
        assert_eq!(
            run_names(&patch),
            ["app-pr-b", "app-pr-c", "app-pr-d", "app-pr-e", "app-pr-f"]
        );
        let entries = patch["pipelinerun_status"].as_array().unwrap();
        assert_eq!(entries[0]["conditions"][0]["status"], "Unknown");
        assert_eq!(entries[0]["conditions"][0]["reason"], "Running");
        assert_eq!(entries[1]["conditions"][0]["message"], "detail for c");
        // Stored without conditions, written back without conditions.
        assert_eq!(entries[3]["conditions"], serde_json::json!([]));
        assert_eq!(entries[4]["conditions"][0]["message"], "all good");
    }

    #[test]
    fn test_missing_target_namespace_is_none() {
        let mut resource = resource();
        resource.spec.namespace = String::new();
        assert!(registration_from_resource(resource).unwrap().target_namespace.is_none());
    }

    #[test]
    fn test_resource_without_url_is_unusable() {
        let mut resource = resource();
        resource.spec.url = String::new();
        assert!(registration_from_resource(resource).is_none());
    }

    #[test]
    fn test_history_patch_carries_version_and_conditions() {
        let registration = registration_from_resource(resource()).unwrap();
        let patch = history_patch(&registration);
        assert_eq!(patch["metadata"]["resourceVersion"], "812");
        let entries = patch["pipelinerun_status"].as_array().unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0]["pipelineRunName"], "app-pr-a");
        assert_eq!(entries[0]["conditions"][0]["type"], "Succeeded");
        assert_eq!(entries[0]["conditions"][0]["status"], "True");
        assert_eq!(entries[0]["conditions"][0]["message"], "detail for a");
        assert_eq!(entries[0]["startTime"], "2024-05-01T10:00:00Z");
    }

    #[test]
    fn test_records_round_trip_through_entries() {
        let registration = registration_from_resource(resource()).unwrap();
        for record in &registration.history {
            assert_eq!(record_from_entry(&entry_from_record(record)).as_ref(), Some(record));
        }
    }
}
