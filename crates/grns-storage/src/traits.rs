//! Storage and Transaction traits -- the public API for task persistence.
//!
//! Consumers depend on these traits rather than on concrete implementations so
//! that alternative backends (mocks, proxies, etc.) can be substituted.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use grns_core::admin::AdminUser;
use grns_core::attachment::Attachment;
use grns_core::dependency::{DepEntry, Dependency, TreeDirection};
use grns_core::enums::{DepType, Status, TaskType};
use grns_core::filter::{ReadyFilter, StaleFilter, TaskFilter};
use grns_core::git_ref::GitRef;
use grns_core::task::Task;

use crate::error::Result;

// ---------------------------------------------------------------------------
// View / helper types
// ---------------------------------------------------------------------------

/// Typed partial-update struct for tasks.
///
/// Only `Some` fields are applied; `None` fields are left unchanged.
/// `Option<Option<T>>` fields distinguish "set to NULL" (inner `None`) from
/// "leave alone" (outer `None`).
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub design: Option<String>,
    pub acceptance_criteria: Option<String>,
    pub status: Option<Status>,
    pub task_type: Option<TaskType>,
    pub priority: Option<i32>,
    pub assignee: Option<String>,
    pub parent_id: Option<Option<String>>,
    pub source_repo: Option<String>,
    pub spec_id: Option<String>,
    /// Replace-on-present; an empty map clears the stored object.
    pub custom: Option<Map<String, Value>>,
    pub closed_at: Option<Option<DateTime<Utc>>>,
    /// Only set by import-overwrite, which replaces the full row.
    pub created_at: Option<DateTime<Utc>>,
    /// The service clock value recorded as `updated_at` when any field above
    /// is present.
    pub updated_at: Option<DateTime<Utc>>,
}

impl TaskPatch {
    /// Returns `true` if no field (other than the clock) is present.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.notes.is_none()
            && self.design.is_none()
            && self.acceptance_criteria.is_none()
            && self.status.is_none()
            && self.task_type.is_none()
            && self.priority.is_none()
            && self.assignee.is_none()
            && self.parent_id.is_none()
            && self.source_repo.is_none()
            && self.spec_id.is_none()
            && self.custom.is_none()
            && self.closed_at.is_none()
            && self.created_at.is_none()
    }
}

/// A node in a dependency tree traversal.
#[derive(Debug, Clone)]
pub struct TreeNode {
    /// The task at this node.
    pub task: Task,
    /// Depth from the root (0 = root).
    pub depth: i32,
    /// Whether this node lies upstream (parents) or downstream (children).
    pub direction: TreeDirection,
    /// The dependency type of the edge leading to this node.
    pub dep_type: DepType,
}

/// A blob refcount row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRow {
    pub id: String,
    pub size_bytes: i64,
    pub ref_count: i64,
}

/// Aggregate counts reported by `/info`.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub total_tasks: i64,
    /// Breakdown by status: `(status, count)`.
    pub by_status: Vec<(String, i64)>,
    /// Breakdown by task type: `(type, count)`.
    pub by_type: Vec<(String, i64)>,
    pub blob_count: i64,
    pub blob_total_bytes: i64,
}

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

/// Primary storage interface for task persistence.
pub trait Storage: Send + Sync {
    // -- Task CRUD -----------------------------------------------------------

    /// Inserts a new task row. Fails with `DuplicateId` if the id exists.
    fn create_task(&self, task: &Task) -> Result<()>;

    /// Retrieves a task by its ID.
    fn get_task(&self, id: &str) -> Result<Task>;

    /// Returns `true` if a task with the given id exists.
    fn task_exists(&self, id: &str) -> Result<bool>;

    /// Retrieves multiple tasks by their IDs (missing ids are skipped).
    fn get_tasks_by_ids(&self, ids: &[String]) -> Result<Vec<Task>>;

    /// Applies partial updates to a task.
    fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<()>;

    /// Permanently deletes a task and its dependent rows, decrementing blob
    /// refcounts for its managed attachments.
    fn delete_task(&self, id: &str) -> Result<()>;

    /// Lists tasks matching the filter, newest first.
    fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>>;

    // -- Labels --------------------------------------------------------------

    /// Adds labels to a task; returns how many were actually added.
    /// Membership changes bump the task's `updated_at` to `now`.
    fn add_labels(&self, task_id: &str, labels: &[String], now: DateTime<Utc>) -> Result<usize>;

    /// Removes labels from a task; returns how many were actually removed.
    fn remove_labels(&self, task_id: &str, labels: &[String], now: DateTime<Utc>)
    -> Result<usize>;

    /// Returns a task's labels, sorted.
    fn get_labels(&self, task_id: &str) -> Result<Vec<String>>;

    /// Returns the union of labels across all tasks, sorted.
    fn list_all_labels(&self) -> Result<Vec<String>>;

    // -- Dependencies --------------------------------------------------------

    /// Adds a dependency edge, rejecting edges that would create a cycle.
    fn add_dependency(&self, dep: &Dependency, now: DateTime<Utc>) -> Result<()>;

    /// Returns a task's outgoing edges (tasks it depends on).
    fn get_dependencies(&self, task_id: &str) -> Result<Vec<Dependency>>;

    /// Returns a task's incoming edges (tasks that depend on it).
    fn get_dependents(&self, task_id: &str) -> Result<Vec<Dependency>>;

    /// Traverses both directions from a root, annotating depth and direction.
    fn dependency_tree(&self, task_id: &str, max_depth: i32) -> Result<Vec<TreeNode>>;

    // -- Git references ------------------------------------------------------

    /// Inserts a git reference, minting its id. Returns the stored ref.
    fn add_git_ref(&self, git_ref: &GitRef) -> Result<GitRef>;

    /// Returns all git references for a task.
    fn get_git_refs(&self, task_id: &str) -> Result<Vec<GitRef>>;

    /// Removes a git reference by id.
    fn delete_git_ref(&self, id: &str) -> Result<()>;

    // -- Attachments ---------------------------------------------------------

    /// Inserts an attachment, minting its id. For managed attachments the
    /// blob refcount is incremented in the same transaction.
    fn insert_attachment(&self, attachment: &Attachment) -> Result<Attachment>;

    /// Retrieves an attachment by id.
    fn get_attachment(&self, id: &str) -> Result<Attachment>;

    /// Lists a task's attachments, newest first.
    fn list_attachments(&self, task_id: &str) -> Result<Vec<Attachment>>;

    /// Deletes an attachment, decrementing the blob refcount for managed
    /// content. Returns the deleted row.
    fn delete_attachment(&self, id: &str) -> Result<Attachment>;

    /// Returns the refcount row for a blob, if present.
    fn get_blob_row(&self, blob_id: &str) -> Result<Option<BlobRow>>;

    /// Returns up to `limit` blobs whose refcount has reached zero.
    fn zero_ref_blobs(&self, limit: i64) -> Result<Vec<BlobRow>>;

    /// Removes a blob refcount row (after its file has been deleted).
    fn delete_blob_row(&self, blob_id: &str) -> Result<()>;

    // -- Admin users ---------------------------------------------------------

    /// Inserts an admin user. Fails with `Conflict` on duplicate username.
    fn create_admin_user(&self, user: &AdminUser) -> Result<()>;

    /// Retrieves an admin user by normalized username.
    fn get_admin_user(&self, username: &str) -> Result<AdminUser>;

    /// Lists all admin users, ordered by username.
    fn list_admin_users(&self) -> Result<Vec<AdminUser>>;

    /// Enables or disables an admin user.
    fn set_admin_user_disabled(&self, username: &str, disabled: bool) -> Result<()>;

    /// Deletes an admin user by username.
    fn delete_admin_user(&self, username: &str) -> Result<()>;

    // -- Work queries --------------------------------------------------------

    /// Returns non-terminal tasks whose `blocks` parents are all terminal,
    /// ordered by `(priority DESC, updated_at DESC)`.
    fn ready_tasks(&self, filter: &ReadyFilter) -> Result<Vec<Task>>;

    /// Returns tasks whose `updated_at` is older than `now - days`.
    fn stale_tasks(&self, filter: &StaleFilter, now: DateTime<Utc>) -> Result<Vec<Task>>;

    /// Returns ids of closed tasks eligible for cleanup: the later of
    /// `updated_at`/`closed_at` is before `cutoff`, optionally restricted to
    /// ids with the given project prefix.
    fn cleanup_candidates(
        &self,
        cutoff: DateTime<Utc>,
        project: Option<&str>,
    ) -> Result<Vec<String>>;

    /// Ordered `(created_at, id)` id list for export.
    fn export_task_ids(&self) -> Result<Vec<String>>;

    // -- Statistics ----------------------------------------------------------

    /// Returns aggregate counts for `/info`.
    fn stats(&self) -> Result<StoreStats>;

    /// Returns the current schema version.
    fn schema_version(&self) -> Result<i64>;

    // -- Transactions --------------------------------------------------------

    /// Executes a closure within a database transaction.
    ///
    /// If the closure returns `Ok`, the transaction is committed; otherwise it
    /// is rolled back.
    fn run_in_transaction(&self, f: &dyn Fn(&dyn Transaction) -> Result<()>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Transaction trait
// ---------------------------------------------------------------------------

/// Subset of [`Storage`] methods available inside a transaction.
///
/// All operations share a single database connection and are committed or
/// rolled back atomically.
pub trait Transaction {
    fn create_task(&self, task: &Task) -> Result<()>;
    fn get_task(&self, id: &str) -> Result<Task>;
    fn task_exists(&self, id: &str) -> Result<bool>;
    fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<()>;
    fn delete_task(&self, id: &str) -> Result<()>;

    fn add_labels(&self, task_id: &str, labels: &[String], now: DateTime<Utc>) -> Result<usize>;
    fn replace_labels(&self, task_id: &str, labels: &[String], now: DateTime<Utc>) -> Result<()>;
    fn get_labels(&self, task_id: &str) -> Result<Vec<String>>;

    fn add_dependency(&self, dep: &Dependency, now: DateTime<Utc>) -> Result<()>;
    fn replace_deps(&self, task_id: &str, deps: &[DepEntry], now: DateTime<Utc>) -> Result<()>;
    fn get_dependencies(&self, task_id: &str) -> Result<Vec<Dependency>>;

    fn add_git_ref(&self, git_ref: &GitRef) -> Result<GitRef>;
    fn insert_attachment(&self, attachment: &Attachment) -> Result<Attachment>;
}
