//! Matches an event to its repository registration.
//!
//! The scan is linear over every registration and the first exact
//! `(url, branch)` match wins. A match is then validated:
//!
//! 1. when the default branch configuration names a namespace, the
//!    registration must be stored there ([`PacError::PolicyViolation`]);
//! 2. the registration must be stored in the namespace it targets
//!    ([`PacError::SecurityViolation`]). Without this check a registration
//!    placed in namespace A could direct execution into namespace B.
//!
//! No match at all is `Ok(None)`: the repository is simply not configured.

use tracing::error;

use crate::{BranchName, Namespace, PacError, Registration, RegistrationStore, RepositoryUrl};

/// Finds and validates the registration for `(url, branch)` in `registrations`.
pub fn match_registration<'a>(
    registrations: &'a [Registration],
    url: &RepositoryUrl,
    branch: &BranchName,
    forced_namespace: Option<&Namespace>,
) -> Result<Option<&'a Registration>, PacError> {
    let Some(found) = registrations
        .iter()
        .find(|r| &r.url == url && &r.branch == branch)
    else {
        return Ok(None);
    };

    if let Some(required) = forced_namespace {
        if &found.namespace != required {
            error!(
                category = "security",
                registration = %found.name,
                namespace = %found.namespace,
                required = %required,
                "registration is not installed in the namespace required by the default branch"
            );
            return Err(PacError::PolicyViolation {
                registration: found.name.to_string(),
                required_namespace: required.to_string(),
            });
        }
    }

    if found.target_namespace.as_ref() != Some(&found.namespace) {
        let target = found
            .target_namespace
            .as_ref()
            .map(Namespace::to_string)
            .unwrap_or_default();
        error!(
            category = "security",
            registration = %found.name,
            owning_namespace = %found.namespace,
            target_namespace = %target,
            "registration targets a namespace it does not belong to"
        );
        return Err(PacError::SecurityViolation {
            registration: found.name.to_string(),
            owning_namespace: found.namespace.to_string(),
            target_namespace: target,
        });
    }

    Ok(Some(found))
}

/// Lists every registration from `store` and matches against it.
pub async fn find_registration(
    store: &dyn RegistrationStore,
    url: &RepositoryUrl,
    branch: &BranchName,
    forced_namespace: Option<&Namespace>,
) -> Result<Option<Registration>, PacError> {
    let registrations = store.list_all().await?;
    Ok(match_registration(&registrations, url, branch, forced_namespace)?.cloned())
}
