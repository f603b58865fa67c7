//! Transaction wrapper for [`SqliteStore`].

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use grns_core::attachment::Attachment;
use grns_core::dependency::{DepEntry, Dependency};
use grns_core::git_ref::GitRef;
use grns_core::task::Task;

use crate::error::{Result, StorageError};
use crate::sqlite::attachments;
use crate::sqlite::dependencies;
use crate::sqlite::git_refs;
use crate::sqlite::labels;
use crate::sqlite::store::SqliteStore;
use crate::sqlite::tasks;
use crate::traits::{TaskPatch, Transaction};

/// A thin wrapper around a SQLite connection that is inside a transaction.
///
/// Holds a reference to the connection (which already has an active `BEGIN`)
/// and implements [`Transaction`] by delegating to the same connection-level
/// helpers used by [`SqliteStore`].
pub(crate) struct SqliteTx<'a> {
    pub(crate) conn: &'a Connection,
}

impl Transaction for SqliteTx<'_> {
    fn create_task(&self, task: &Task) -> Result<()> {
        tasks::insert_task_on_conn(self.conn, task)
    }

    fn get_task(&self, id: &str) -> Result<Task> {
        tasks::get_task_on_conn(self.conn, id)
    }

    fn task_exists(&self, id: &str) -> Result<bool> {
        tasks::task_exists_on_conn(self.conn, id)
    }

    fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<()> {
        tasks::update_task_on_conn(self.conn, id, patch)
    }

    fn delete_task(&self, id: &str) -> Result<()> {
        tasks::delete_task_on_conn(self.conn, id)
    }

    fn add_labels(&self, task_id: &str, labels: &[String], now: DateTime<Utc>) -> Result<usize> {
        labels::add_labels_on_conn(self.conn, task_id, labels, now)
    }

    fn replace_labels(&self, task_id: &str, labels: &[String], now: DateTime<Utc>) -> Result<()> {
        labels::replace_labels_on_conn(self.conn, task_id, labels, now)
    }

    fn get_labels(&self, task_id: &str) -> Result<Vec<String>> {
        labels::get_labels_on_conn(self.conn, task_id)
    }

    fn add_dependency(&self, dep: &Dependency, now: DateTime<Utc>) -> Result<()> {
        dependencies::add_dependency_on_conn(self.conn, dep, now)
    }

    fn replace_deps(&self, task_id: &str, deps: &[DepEntry], now: DateTime<Utc>) -> Result<()> {
        dependencies::replace_deps_on_conn(self.conn, task_id, deps, now)
    }

    fn get_dependencies(&self, task_id: &str) -> Result<Vec<Dependency>> {
        dependencies::get_dependencies_on_conn(self.conn, task_id)
    }

    fn add_git_ref(&self, git_ref: &GitRef) -> Result<GitRef> {
        git_refs::add_git_ref_on_conn(self.conn, git_ref)
    }

    fn insert_attachment(&self, attachment: &Attachment) -> Result<Attachment> {
        attachments::insert_attachment_on_conn(self.conn, attachment)
    }
}

// ---------------------------------------------------------------------------
// SqliteStore::run_in_transaction
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Runs a closure inside a database transaction.
    pub fn run_in_transaction_impl(
        &self,
        f: &dyn Fn(&dyn Transaction) -> Result<()>,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;

        let sqlite_tx = SqliteTx { conn: &tx };
        match f(&sqlite_tx) {
            Ok(()) => {
                tx.commit()
                    .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
                Ok(())
            }
            Err(e) => {
                // Transaction is rolled back on drop.
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grns_core::task::TaskBuilder;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn transaction_commit() {
        let store = test_store();

        store
            .run_in_transaction_impl(&|tx| {
                let task = TaskBuilder::new("In transaction").id("gr-tx2a").build();
                tx.create_task(&task)?;
                tx.add_labels("gr-tx2a", &["transacted".into()], Utc::now())?;
                Ok(())
            })
            .unwrap();

        let task = store.get_task_impl("gr-tx2a").unwrap();
        assert_eq!(task.title, "In transaction");
        let labels = store.get_labels_impl("gr-tx2a").unwrap();
        assert_eq!(labels, vec!["transacted"]);
    }

    #[test]
    fn transaction_rollback_on_error() {
        let store = test_store();

        let result = store.run_in_transaction_impl(&|tx| {
            let task = TaskBuilder::new("Should rollback").id("gr-tx2b").build();
            tx.create_task(&task)?;
            Err(StorageError::Internal("test rollback".into()))
        });

        assert!(result.is_err());
        let err = store.get_task_impl("gr-tx2b").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn transaction_with_dependencies() {
        let store = test_store();

        store
            .run_in_transaction_impl(&|tx| {
                let parent = TaskBuilder::new("Parent").id("gr-tx2p").build();
                let child = TaskBuilder::new("Child").id("gr-tx2c").build();
                tx.create_task(&parent)?;
                tx.create_task(&child)?;
                tx.add_dependency(&Dependency::blocks("gr-tx2c", "gr-tx2p"), Utc::now())?;
                Ok(())
            })
            .unwrap();

        let deps = store.get_dependencies_impl("gr-tx2c").unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].parent_id, "gr-tx2p");
    }

    #[test]
    fn rollback_restores_refcounts() {
        let store = test_store();
        let task = TaskBuilder::new("Holder").id("gr-tx2d").build();
        store.create_task_impl(&task).unwrap();
        let blob_id = "ab".repeat(32);

        let result = store.run_in_transaction_impl(&|tx| {
            let att = Attachment {
                task_id: "gr-tx2d".into(),
                blob_id: Some(blob_id.clone()),
                size_bytes: Some(10),
                ..Attachment::default()
            };
            tx.insert_attachment(&att)?;
            Err(StorageError::Internal("abort".into()))
        });
        assert!(result.is_err());

        // The refcount row was rolled back with the attachment.
        assert!(store.get_blob_row_impl(&blob_id).unwrap().is_none());
    }
}
