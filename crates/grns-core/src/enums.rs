//! Enum types for the grns system.
//!
//! Each enum has:
//! - Custom Serialize (as snake_case string)
//! - Custom Deserialize (known variants + catch-all Custom(String))
//! - `as_str()`, `is_default()`, `Display` impl

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// ---------------------------------------------------------------------------
// Macro: defines an enum with known string variants + a Custom(String) fallback.
// ---------------------------------------------------------------------------
macro_rules! define_enum {
    (
        $(#[$meta:meta])*
        $name:ident, default = $default:ident, custom_variant = $custom_variant:ident,
        variants: [
            $( ($variant:ident, $str:expr) ),+ $(,)?
        ]
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $variant, )+
            $custom_variant(String),
        }

        impl $name {
            /// Returns the string representation.
            pub fn as_str(&self) -> &str {
                match self {
                    $( Self::$variant => $str, )+
                    Self::$custom_variant(s) => s.as_str(),
                }
            }

            /// Returns `true` if this is the default variant.
            pub fn is_default(&self) -> bool {
                *self == Self::$default
            }

            /// Returns `true` if this is a built-in (non-custom) variant.
            pub fn is_builtin(&self) -> bool {
                !matches!(self, Self::$custom_variant(_))
            }

            /// Returns `true` if this is a known variant or any non-empty custom string.
            pub fn is_valid(&self) -> bool {
                match self {
                    Self::$custom_variant(s) => !s.is_empty(),
                    _ => true,
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Ok(Self::from(s))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                match s {
                    $( $str => Self::$variant, )+
                    other => Self::$custom_variant(other.to_owned()),
                }
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                // Check known variants first to avoid allocation in common case.
                match s.as_str() {
                    $( $str => Self::$variant, )+
                    _ => Self::$custom_variant(s),
                }
            }
        }
    };
}

// ===========================================================================
// Status
// ===========================================================================

define_enum! {
    /// Current state of a task.
    Status, default = Open, custom_variant = Custom,
    variants: [
        (Open, "open"),
        (InProgress, "in_progress"),
        (Blocked, "blocked"),
        (Closed, "closed"),
    ]
}

impl Status {
    /// Returns `true` for statuses that require a `closed_at` timestamp.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

// ===========================================================================
// TaskType
// ===========================================================================

define_enum! {
    /// Categorises the kind of work.
    TaskType, default = Task, custom_variant = Custom,
    variants: [
        (Task, "task"),
        (Bug, "bug"),
        (Feature, "feature"),
        (Epic, "epic"),
        (Chore, "chore"),
    ]
}

// ===========================================================================
// DepType
// ===========================================================================

define_enum! {
    /// Relationship type between tasks.
    DepType, default = Blocks, custom_variant = Custom,
    variants: [
        (Blocks, "blocks"),
        (Related, "related"),
        (ParentChild, "parent-child"),
        (DiscoveredFrom, "discovered-from"),
    ]
}

impl DepType {
    /// Returns `true` if this edge type gates readiness.
    ///
    /// Only `blocks` edges keep a task out of the ready set; all other types
    /// are informational.
    pub fn gates_readiness(&self) -> bool {
        matches!(self, Self::Blocks)
    }
}

// ===========================================================================
// GitRelation
// ===========================================================================

define_enum! {
    /// What a git reference means for a task.
    GitRelation, default = References, custom_variant = Custom,
    variants: [
        (References, "references"),
        (DesignDoc, "design_doc"),
        (ClosedBy, "closed_by"),
        (Implements, "implements"),
    ]
}

// ===========================================================================
// GitObjectType
// ===========================================================================

define_enum! {
    /// The kind of git object a reference points at.
    GitObjectType, default = Commit, custom_variant = Custom,
    variants: [
        (Commit, "commit"),
        (Tag, "tag"),
        (Branch, "branch"),
        (Path, "path"),
        (Blob, "blob"),
        (Tree, "tree"),
    ]
}

// ===========================================================================
// AttachmentSource
// ===========================================================================

define_enum! {
    /// Where an attachment's content lives.
    AttachmentSource, default = Managed, custom_variant = Custom,
    variants: [
        (Managed, "managed"),
        (ExternalUrl, "external_url"),
        (RepoPath, "repo_path"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_default_is_open() {
        assert_eq!(Status::default(), Status::Open);
        assert!(Status::Open.is_default());
        assert!(!Status::Closed.is_default());
    }

    #[test]
    fn status_terminal() {
        assert!(Status::Closed.is_terminal());
        assert!(!Status::Open.is_terminal());
        assert!(!Status::InProgress.is_terminal());
        assert!(!Status::Blocked.is_terminal());
        assert!(!Status::Custom("paused".into()).is_terminal());
    }

    #[test]
    fn status_roundtrip_serde() {
        let s = Status::InProgress;
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, r#""in_progress""#);
        let back: Status = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn status_custom_roundtrip() {
        let json = r#""triage""#;
        let s: Status = serde_json::from_str(json).unwrap();
        assert_eq!(s, Status::Custom("triage".into()));
        assert_eq!(serde_json::to_string(&s).unwrap(), json);
    }

    #[test]
    fn dep_type_gates_readiness() {
        assert!(DepType::Blocks.gates_readiness());
        assert!(!DepType::Related.gates_readiness());
        assert!(!DepType::ParentChild.gates_readiness());
        assert!(!DepType::Custom("mirrors".into()).gates_readiness());
    }

    #[test]
    fn git_object_type_as_str() {
        assert_eq!(GitObjectType::Commit.as_str(), "commit");
        assert_eq!(GitObjectType::Tree.as_str(), "tree");
        assert!(GitObjectType::from("commit").is_builtin());
        assert!(!GitObjectType::from("submodule").is_builtin());
    }

    #[test]
    fn attachment_source_roundtrip() {
        let s: AttachmentSource = serde_json::from_str(r#""external_url""#).unwrap();
        assert_eq!(s, AttachmentSource::ExternalUrl);
        assert_eq!(AttachmentSource::RepoPath.as_str(), "repo_path");
    }
}
