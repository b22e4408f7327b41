//! Tunables for one orchestration pass.

use pipeline::HISTORY_CAPACITY;

/// Directory holding the declarative definitions.
pub const DEFAULT_DEFINITION_DIR: &str = ".tekton";

/// Configuration document inside [`DEFAULT_DEFINITION_DIR`].
pub const DEFAULT_CONFIG_FILE: &str = "tekton.yaml";

/// Details link used when no console URL is available.
pub const DEFAULT_FALLBACK_DETAILS_URL: &str = "https://pipelinesascode.com";

/// Name shown on provider check runs and build statuses.
pub const DEFAULT_APPLICATION_NAME: &str = "Pipelines as Code CI";

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Repository-relative directory scanned for definitions.
    pub definition_dir: String,
    /// Configuration document name within `definition_dir`.
    pub config_file: String,
    /// Run records kept per registration.
    pub history_capacity: usize,
    /// Fail the pass on an unresolvable `Task` or `Pipeline` reference.
    pub strict_resolution: bool,
    /// Details link for statuses that have no console page.
    pub fallback_details_url: String,
    /// Application name used in status messages.
    pub application_name: String,
}

impl OrchestratorSettings {
    /// Repository-relative path of the configuration document.
    pub fn config_path(&self) -> String {
        format!(
            "{}/{}",
            self.definition_dir.trim_end_matches('/'),
            self.config_file
        )
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            definition_dir: DEFAULT_DEFINITION_DIR.to_string(),
            config_file: DEFAULT_CONFIG_FILE.to_string(),
            history_capacity: HISTORY_CAPACITY,
            strict_resolution: true,
            fallback_details_url: DEFAULT_FALLBACK_DETAILS_URL.to_string(),
            application_name: DEFAULT_APPLICATION_NAME.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = OrchestratorSettings::default();
        assert_eq!(settings.config_path(), ".tekton/tekton.yaml");
        assert_eq!(settings.history_capacity, 5);
        assert!(settings.strict_resolution);
    }

    #[test]
    fn test_config_path_tolerates_trailing_slash() {
        let settings = OrchestratorSettings {
            definition_dir: "ci/".into(),
            ..OrchestratorSettings::default()
        };
        assert_eq!(settings.config_path(), "ci/tekton.yaml");
    }
}
