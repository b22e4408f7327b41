//! Web console links for submitted runs.
//!
//! An explicitly configured console base URL wins. Otherwise the OpenShift
//! console route is looked up; on plain Kubernetes there is none and no link
//! is produced.

use serde::Deserialize;
use tracing::debug;

use crate::client::KubeClient;

const CONSOLE_ROUTE_PATH: &str =
    "apis/route.openshift.io/v1/namespaces/openshift-console/routes/console";

#[derive(Debug, Deserialize)]
struct RouteSpec {
    #[serde(default)]
    host: String,
}

#[derive(Debug, Deserialize)]
struct Route {
    spec: RouteSpec,
}

/// Deep link to a `PipelineRun` page of the OpenShift console.
pub(crate) fn pipeline_run_url(base: &str, namespace: &str, name: &str) -> String {
    format!(
        "{}/k8s/ns/{namespace}/tekton.dev~v1beta1~PipelineRun/{name}",
        base.trim_end_matches('/')
    )
}

#[derive(Debug, Clone)]
pub(crate) struct ConsoleLocator {
    client: KubeClient,
    explicit: Option<String>,
}

impl ConsoleLocator {
    pub(crate) fn new(client: KubeClient, explicit: Option<String>) -> Self {
        Self {
            client,
            explicit: explicit.filter(|u| !u.is_empty()),
        }
    }

    async fn base_url(&self) -> Option<String> {
        if let Some(explicit) = &self.explicit {
            return Some(explicit.clone());
        }
        match self.client.get_optional_json::<Route>(CONSOLE_ROUTE_PATH).await {
            Ok(Some(route)) if !route.spec.host.is_empty() => {
                Some(format!("https://{}", route.spec.host))
            }
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "console route lookup failed");
                None
            }
        }
    }

    pub(crate) async fn run_url(&self, namespace: &str, name: &str) -> Option<String> {
        self.base_url()
            .await
            .map(|base| pipeline_run_url(&base, namespace, name))
    }
}
