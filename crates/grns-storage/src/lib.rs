//! Storage backend for the grns task tracker.
//!
//! Provides the [`Storage`] trait and a SQLite implementation
//! ([`SqliteStore`]).

pub mod error;
pub mod migrations;
pub mod sqlite;
pub mod traits;

// Re-exports for convenience.
pub use error::StorageError;
pub use migrations::MigrationPlan;
pub use sqlite::SqliteStore;
pub use traits::{BlobRow, Storage, StoreStats, TaskPatch, Transaction, TreeNode};

// ---------------------------------------------------------------------------
// Storage trait implementation for SqliteStore
// ---------------------------------------------------------------------------

use chrono::{DateTime, Utc};

use grns_core::admin::AdminUser;
use grns_core::attachment::Attachment;
use grns_core::dependency::Dependency;
use grns_core::filter::{ReadyFilter, StaleFilter, TaskFilter};
use grns_core::git_ref::GitRef;
use grns_core::task::Task;

use crate::error::Result;

impl Storage for SqliteStore {
    fn create_task(&self, task: &Task) -> Result<()> {
        self.create_task_impl(task)
    }

    fn get_task(&self, id: &str) -> Result<Task> {
        self.get_task_impl(id)
    }

    fn task_exists(&self, id: &str) -> Result<bool> {
        self.task_exists_impl(id)
    }

    fn get_tasks_by_ids(&self, ids: &[String]) -> Result<Vec<Task>> {
        self.get_tasks_by_ids_impl(ids)
    }

    fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<()> {
        self.update_task_impl(id, patch)
    }

    fn delete_task(&self, id: &str) -> Result<()> {
        self.delete_task_impl(id)
    }

    fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        self.list_tasks_impl(filter)
    }

    fn add_labels(&self, task_id: &str, labels: &[String], now: DateTime<Utc>) -> Result<usize> {
        self.add_labels_impl(task_id, labels, now)
    }

    fn remove_labels(
        &self,
        task_id: &str,
        labels: &[String],
        now: DateTime<Utc>,
    ) -> Result<usize> {
        self.remove_labels_impl(task_id, labels, now)
    }

    fn get_labels(&self, task_id: &str) -> Result<Vec<String>> {
        self.get_labels_impl(task_id)
    }

    fn list_all_labels(&self) -> Result<Vec<String>> {
        self.list_all_labels_impl()
    }

    fn add_dependency(&self, dep: &Dependency, now: DateTime<Utc>) -> Result<()> {
        self.add_dependency_impl(dep, now)
    }

    fn get_dependencies(&self, task_id: &str) -> Result<Vec<Dependency>> {
        self.get_dependencies_impl(task_id)
    }

    fn get_dependents(&self, task_id: &str) -> Result<Vec<Dependency>> {
        self.get_dependents_impl(task_id)
    }

    fn dependency_tree(&self, task_id: &str, max_depth: i32) -> Result<Vec<TreeNode>> {
        self.dependency_tree_impl(task_id, max_depth)
    }

    fn add_git_ref(&self, git_ref: &GitRef) -> Result<GitRef> {
        self.add_git_ref_impl(git_ref)
    }

    fn get_git_refs(&self, task_id: &str) -> Result<Vec<GitRef>> {
        self.get_git_refs_impl(task_id)
    }

    fn delete_git_ref(&self, id: &str) -> Result<()> {
        self.delete_git_ref_impl(id)
    }

    fn insert_attachment(&self, attachment: &Attachment) -> Result<Attachment> {
        self.insert_attachment_impl(attachment)
    }

    fn get_attachment(&self, id: &str) -> Result<Attachment> {
        self.get_attachment_impl(id)
    }

    fn list_attachments(&self, task_id: &str) -> Result<Vec<Attachment>> {
        self.list_attachments_impl(task_id)
    }

    fn delete_attachment(&self, id: &str) -> Result<Attachment> {
        self.delete_attachment_impl(id)
    }

    fn get_blob_row(&self, blob_id: &str) -> Result<Option<BlobRow>> {
        self.get_blob_row_impl(blob_id)
    }

    fn zero_ref_blobs(&self, limit: i64) -> Result<Vec<BlobRow>> {
        self.zero_ref_blobs_impl(limit)
    }

    fn delete_blob_row(&self, blob_id: &str) -> Result<()> {
        self.delete_blob_row_impl(blob_id)
    }

    fn create_admin_user(&self, user: &AdminUser) -> Result<()> {
        self.create_admin_user_impl(user).map(|_| ())
    }

    fn get_admin_user(&self, username: &str) -> Result<AdminUser> {
        self.get_admin_user_impl(username)
    }

    fn list_admin_users(&self) -> Result<Vec<AdminUser>> {
        self.list_admin_users_impl()
    }

    fn set_admin_user_disabled(&self, username: &str, disabled: bool) -> Result<()> {
        self.set_admin_user_disabled_impl(username, disabled)
    }

    fn delete_admin_user(&self, username: &str) -> Result<()> {
        self.delete_admin_user_impl(username)
    }

    fn ready_tasks(&self, filter: &ReadyFilter) -> Result<Vec<Task>> {
        self.ready_tasks_impl(filter)
    }

    fn stale_tasks(&self, filter: &StaleFilter, now: DateTime<Utc>) -> Result<Vec<Task>> {
        self.stale_tasks_impl(filter, now)
    }

    fn cleanup_candidates(
        &self,
        cutoff: DateTime<Utc>,
        project: Option<&str>,
    ) -> Result<Vec<String>> {
        self.cleanup_candidates_impl(cutoff, project)
    }

    fn export_task_ids(&self) -> Result<Vec<String>> {
        self.export_task_ids_impl()
    }

    fn stats(&self) -> Result<StoreStats> {
        self.stats_impl()
    }

    fn schema_version(&self) -> Result<i64> {
        self.schema_version_impl()
    }

    fn run_in_transaction(&self, f: &dyn Fn(&dyn Transaction) -> Result<()>) -> Result<()> {
        self.run_in_transaction_impl(f)
    }
}
