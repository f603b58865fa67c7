//! Dependency types -- edges between tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::DepType;

/// A directed edge in the dependency graph: `child` depends on `parent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub child_id: String,

    pub parent_id: String,

    /// Edge type (serialised as "type" in JSON).
    #[serde(rename = "type", default)]
    pub dep_type: DepType,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Dependency {
    /// Creates a `blocks` edge from `child` to `parent`.
    pub fn blocks(child_id: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self {
            child_id: child_id.into(),
            parent_id: parent_id.into(),
            dep_type: DepType::Blocks,
            created_at: Utc::now(),
        }
    }
}

/// A dependency as carried in an import/export record.
///
/// The child is implied by the enclosing record's task, so only the parent
/// and edge type are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepEntry {
    pub parent_id: String,

    #[serde(rename = "type", default)]
    pub dep_type: DepType,
}

/// Direction of an edge relative to a tree traversal root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeDirection {
    /// Parents the root (transitively) depends on.
    Upstream,
    /// Children that (transitively) depend on the root.
    Downstream,
}
