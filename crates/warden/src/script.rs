//! Policy scripts and their entry points.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum size of a policy script source, in bytes.
///
/// Scripts at or under this ceiling are accepted; anything larger is rejected
/// before any parsing or execution is attempted.
pub const MAX_SCRIPT_BYTES: usize = 50_000;

/// The three entry points a policy script may implement.
///
/// Each kind binds to a required global function name and to the result shape
/// that function must return: package policies return
/// `{allowed, reasons}`, the other two return `{status, violations}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryPointKind {
    /// Per-dependency allow/deny decision (`packagePolicy`)
    PackagePolicy,
    /// Whole-project status assignment (`projectStatus`)
    ProjectStatus,
    /// Pull-request gate (`pullRequestCheck`)
    PullRequestCheck,
}

impl EntryPointKind {
    /// The global function name the script must define for this kind.
    pub fn entry_point(self) -> &'static str {
        match self {
            EntryPointKind::PackagePolicy => "packagePolicy",
            EntryPointKind::ProjectStatus => "projectStatus",
            EntryPointKind::PullRequestCheck => "pullRequestCheck",
        }
    }

    /// All entry-point kinds, in a fixed order.
    pub fn all() -> [EntryPointKind; 3] {
        [
            EntryPointKind::PackagePolicy,
            EntryPointKind::ProjectStatus,
            EntryPointKind::PullRequestCheck,
        ]
    }

    /// Whether results for this kind carry `{status, violations}` rather
    /// than `{allowed, reasons}`.
    pub fn is_status_kind(self) -> bool {
        !matches!(self, EntryPointKind::PackagePolicy)
    }
}

impl fmt::Display for EntryPointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryPointKind::PackagePolicy => "package-policy",
            EntryPointKind::ProjectStatus => "project-status",
            EntryPointKind::PullRequestCheck => "pull-request-check",
        };
        f.write_str(name)
    }
}

/// Error returned when parsing an entry-point kind from its CLI name.
#[derive(Debug, Error)]
#[error("unknown policy kind `{0}` (expected package-policy, project-status or pull-request-check)")]
pub struct UnknownKind(String);

impl FromStr for EntryPointKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "package-policy" => Ok(EntryPointKind::PackagePolicy),
            "project-status" => Ok(EntryPointKind::ProjectStatus),
            "pull-request-check" => Ok(EntryPointKind::PullRequestCheck),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

/// Error rejecting a script body at construction time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScriptError {
    /// The script body is empty or whitespace-only.
    #[error("script is empty")]
    Empty,
    /// The script body exceeds [`MAX_SCRIPT_BYTES`].
    #[error("script is {size} bytes, over the 50 KB limit")]
    TooLarge {
        /// Actual size of the rejected body.
        size: usize,
    },
}

/// An organization-authored policy script.
///
/// Immutable once constructed: editing a script produces a new
/// `PolicyScript` with a new id. Activation state lives with the store, not
/// here, so evaluation can never mutate the script it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyScript {
    /// Store-assigned identifier for this revision
    pub id: String,
    /// Owning organization
    pub org: String,
    /// Which entry point this script implements
    pub kind: EntryPointKind,
    /// The user-submitted script body
    pub source: String,
}

impl PolicyScript {
    /// Create a new script revision, enforcing the size ceiling.
    pub fn new(
        id: impl Into<String>,
        org: impl Into<String>,
        kind: EntryPointKind,
        source: impl Into<String>,
    ) -> Result<Self, ScriptError> {
        let source = source.into();
        if source.trim().is_empty() {
            return Err(ScriptError::Empty);
        }
        if source.len() > MAX_SCRIPT_BYTES {
            return Err(ScriptError::TooLarge { size: source.len() });
        }
        Ok(Self {
            id: id.into(),
            org: org.into(),
            kind,
            source,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_point_names() {
        assert_eq!(EntryPointKind::PackagePolicy.entry_point(), "packagePolicy");
        assert_eq!(EntryPointKind::ProjectStatus.entry_point(), "projectStatus");
        assert_eq!(
            EntryPointKind::PullRequestCheck.entry_point(),
            "pullRequestCheck"
        );
    }

    #[test]
    fn test_kind_round_trips_through_display() {
        for kind in EntryPointKind::all() {
            let parsed: EntryPointKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let err = "package".parse::<EntryPointKind>().unwrap_err();
        assert!(err.to_string().contains("package"));
    }

    #[test]
    fn test_empty_script_rejected() {
        let err = PolicyScript::new("s1", "org", EntryPointKind::PackagePolicy, "  \n")
            .unwrap_err();
        assert_eq!(err, ScriptError::Empty);
    }

    #[test]
    fn test_oversize_script_rejected() {
        let body = "x".repeat(51_000);
        let err =
            PolicyScript::new("s1", "org", EntryPointKind::PackagePolicy, body).unwrap_err();
        assert_eq!(err, ScriptError::TooLarge { size: 51_000 });
        assert!(err.to_string().contains("50 KB"));
    }

    #[test]
    fn test_script_at_ceiling_accepted() {
        let body = "x".repeat(MAX_SCRIPT_BYTES);
        assert!(PolicyScript::new("s1", "org", EntryPointKind::PackagePolicy, body).is_ok());
    }
}
