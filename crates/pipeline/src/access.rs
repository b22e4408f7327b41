//! Decides whether the event's sender may trigger runs.
//!
//! The gate runs before the registration is matched, so it only has the
//! event to go on. A sender is allowed when any of the following holds, in
//! this order (cheapest first):
//!
//! 1. the sender owns the repository;
//! 2. the sender is on the configured allow-list;
//! 3. the provider confirms the sender is a member of the owning
//!    organisation, workspace, or project.
//!
//! A denial is not an error; the orchestrator reports it as a skip.

use std::collections::BTreeSet;

use tracing::debug;

use crate::{Event, GitProvider, PacError};

/// Why a sender was allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowReason {
    /// Sender is the repository owner.
    Owner,
    /// Sender is on the explicit allow-list.
    AllowList,
    /// Provider confirmed membership.
    Member,
}

/// Outcome of [`AccessPolicy::authorize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// The sender may trigger runs.
    Allowed(AllowReason),
    /// The sender may not.
    Denied,
}

impl AccessDecision {
    /// Returns `true` for [`AccessDecision::Allowed`].
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed(_))
    }
}

/// Access policy configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    allowed_users: BTreeSet<String>,
}

impl AccessPolicy {
    /// Creates a policy with an explicit allow-list. Blank entries are ignored.
    pub fn new<I, S>(allowed_users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed_users: allowed_users
                .into_iter()
                .map(|u| u.as_ref().trim().to_string())
                .filter(|u| !u.is_empty())
                .collect(),
        }
    }

    /// Evaluates the policy for `event`.
    ///
    /// # Errors
    ///
    /// Propagates provider failures from the membership lookup.
    pub async fn authorize(
        &self,
        provider: &dyn GitProvider,
        event: &Event,
    ) -> Result<AccessDecision, PacError> {
        if event.sender == event.owner {
            return Ok(AccessDecision::Allowed(AllowReason::Owner));
        }
        if self.allowed_users.contains(&event.sender) {
            return Ok(AccessDecision::Allowed(AllowReason::AllowList));
        }
        if provider.is_sender_member(event).await? {
            return Ok(AccessDecision::Allowed(AllowReason::Member));
        }
        debug!(sender = %event.sender, "sender not allowed by any rule");
        Ok(AccessDecision::Denied)
    }
}
