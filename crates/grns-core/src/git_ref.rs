//! Git reference types -- links between tasks and git objects.

use serde::{Deserialize, Serialize};

use crate::enums::{GitObjectType, GitRelation};

/// A link from a task to a git object in some repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitRef {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub task_id: String,

    /// Repository slug (e.g. `org/repo`).
    pub repo: String,

    #[serde(default)]
    pub relation: GitRelation,

    #[serde(default)]
    pub object_type: GitObjectType,

    /// The object name: a commit hash, tag, branch name, or path.
    pub object_value: String,

    /// The commit the object resolved to at link time, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_commit: Option<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub note: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_ref_serde_roundtrip() {
        let r = GitRef {
            id: "ref-1".into(),
            task_id: "gr-aaaa".into(),
            repo: "acme/widgets".into(),
            relation: GitRelation::ClosedBy,
            object_type: GitObjectType::Commit,
            object_value: "deadbeef".into(),
            resolved_commit: None,
            note: String::new(),
        };
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains(r#""relation":"closed_by""#));
        let back: GitRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
