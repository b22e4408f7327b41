//! Newtype domain identifiers.
//!
//! Every domain concept that has an identity is represented as a distinct newtype
//! wrapping a primitive. This prevents accidentally interchanging, for example,
//! a [`Namespace`] with a [`BranchName`] even though both are strings under the
//! hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers — UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies a single orchestration pass (one inbound event handled end-to-end).
///
/// Generated fresh for every invocation; recorded on the pass span so all
/// activity from a single pass can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PassId(Uuid);

impl PassId {
    /// Generates a new random pass identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a [`PassId`] from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for PassId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Identifiers — String-backed (cluster / Git names)
// ---------------------------------------------------------------------------

string_id! {
    /// A cluster namespace (e.g. `"ci-frontend"`).
    Namespace
}

string_id! {
    /// A Git branch name (e.g. `"main"`, `"feature/login"`).
    ///
    /// Stored without the `refs/heads/` prefix.
    BranchName
}

string_id! {
    /// A Git commit SHA (40-character lowercase hex string for SHA-1 repositories).
    CommitSha
}

string_id! {
    /// The browsable URL of a repository (e.g. `"https://github.com/org/app"`).
    ///
    /// Registrations are matched by exact equality on this value.
    RepositoryUrl
}

string_id! {
    /// The name of a submitted run as assigned by the execution engine.
    RunName
}

string_id! {
    /// The name of a repository registration record within its namespace.
    RegistrationName
}

impl BranchName {
    /// Creates a branch name, stripping a leading `refs/heads/` if present.
    pub fn from_ref(git_ref: &str) -> Option<Self> {
        Self::new(git_ref.strip_prefix("refs/heads/").unwrap_or(git_ref))
    }
}

impl RepositoryUrl {
    /// Creates a repository URL, dropping a trailing `/` or `.git` suffix so
    /// clone URLs and browse URLs compare equal.
    pub fn normalized(url: &str) -> Option<Self> {
        let trimmed = url.trim().trim_end_matches('/');
        Self::new(trimmed.strip_suffix(".git").unwrap_or(trimmed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_identifier_is_rejected() {
        assert!(Namespace::new("").is_none());
        assert_eq!(Namespace::new("ns1").unwrap().as_str(), "ns1");
    }

    #[test]
    fn test_branch_from_ref_strips_heads_prefix() {
        assert_eq!(BranchName::from_ref("refs/heads/main").unwrap().as_str(), "main");
        assert_eq!(BranchName::from_ref("release/1.0").unwrap().as_str(), "release/1.0");
        assert!(BranchName::from_ref("refs/heads/").is_none());
    }

    #[test]
    fn test_repository_url_normalization() {
        let a = RepositoryUrl::normalized("https://git.example/org/app.git").unwrap();
        let b = RepositoryUrl::normalized("https://git.example/org/app/").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "https://git.example/org/app");
    }

    #[test]
    fn test_identifiers_serialize_transparently() {
        let ns = Namespace::new("ns1").unwrap();
        assert_eq!(serde_json::to_string(&ns).unwrap(), "\"ns1\"");
    }
}
