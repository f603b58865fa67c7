//! The task service -- business logic above the store.
//!
//! Owns ID minting, status/closed-at normalization, label normalization, and
//! dependency-graph rules. Handlers hand it validated DTOs; it hands back
//! denormalized views ready for serialization.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use grns_core::cancel::CancelToken;
use grns_core::dependency::{DepEntry, Dependency, TreeDirection};
use grns_core::enums::{DepType, GitObjectType, GitRelation, Status, TaskType};
use grns_core::filter::{ReadyFilter, StaleFilter, TaskFilter};
use grns_core::git_ref::GitRef;
use grns_core::idgen;
use grns_core::task::Task;
use grns_blob::BlobStore;
use grns_storage::{Storage, StorageError, TaskPatch};

use crate::error::{Result, ServiceError};

/// How many slug collisions to tolerate before giving up on minting.
const MAX_MINT_ATTEMPTS: u32 = 16;

/// Maximum length of a caller-supplied id, in bytes.
const MAX_ID_LEN: usize = 128;

/// Tunables the daemon hands the service at startup.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub project_prefix: String,
    pub max_upload_bytes: u64,
    pub allowed_media_types: Vec<String>,
    pub reject_media_type_mismatch: bool,
    pub gc_batch_size: i64,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            project_prefix: "gr".to_string(),
            max_upload_bytes: 64 * 1024 * 1024,
            allowed_media_types: Vec::new(),
            reject_media_type_mismatch: false,
            gc_batch_size: 100,
        }
    }
}

/// The business-logic layer for tasks, labels, dependencies, git refs,
/// attachments, import/export, and admin operations.
pub struct TaskService {
    pub(crate) store: Arc<dyn Storage>,
    pub(crate) blobs: BlobStore,
    pub(crate) options: ServiceOptions,
    pub(crate) login_attempts: std::sync::Mutex<std::collections::HashMap<String, (u32, std::time::Instant)>>,
}

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

/// A task together with its denormalized relational data.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub labels: Vec<String>,
    pub deps: Vec<Dependency>,
}

/// Request body for task creation.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(flatten)]
    pub task: Task,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub deps: Vec<DepEntry>,
}

/// Deserializes a present-but-null field as `Some(None)`.
///
/// With a plain `Option<Option<T>>`, serde collapses `null` and "absent" to
/// the same value; this keeps them apart so PATCH can clear nullable columns.
fn double_option<'de, T, D>(de: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Deserialize::deserialize(de).map(Some)
}

/// Request body for task updates. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub design: Option<String>,
    pub acceptance_criteria: Option<String>,
    pub status: Option<Status>,
    #[serde(rename = "type")]
    pub task_type: Option<TaskType>,
    pub priority: Option<i32>,
    pub assignee: Option<String>,
    #[serde(deserialize_with = "double_option")]
    pub parent_id: Option<Option<String>>,
    pub source_repo: Option<String>,
    pub spec_id: Option<String>,
    /// Replace-on-present; an explicit empty object clears.
    pub custom: Option<Map<String, Value>>,
    #[serde(deserialize_with = "double_option")]
    pub closed_at: Option<Option<DateTime<Utc>>>,
}

/// One node of a dependency tree response.
#[derive(Debug, Clone, Serialize)]
pub struct TreeNodeView {
    pub id: String,
    pub title: String,
    pub status: Status,
    pub depth: i32,
    pub direction: TreeDirection,
    pub dep_type: DepType,
}

/// Response body for `/info`.
#[derive(Debug, Clone, Serialize)]
pub struct InfoResponse {
    pub project_prefix: String,
    pub schema_version: i64,
    pub task_counts: BTreeMap<String, i64>,
    pub type_counts: BTreeMap<String, i64>,
    pub total_tasks: i64,
    pub blob_count: i64,
    pub blob_total_bytes: i64,
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

/// Rejects caller-supplied ids that are empty, oversized, or contain
/// whitespace.
pub(crate) fn validate_task_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(ServiceError::invalid("task id must be non-empty"));
    }
    if id.len() > MAX_ID_LEN {
        return Err(ServiceError::invalid(format!(
            "task id exceeds {MAX_ID_LEN} bytes"
        )));
    }
    if id.chars().any(char::is_whitespace) {
        return Err(ServiceError::invalid(format!(
            "task id must not contain whitespace: {id:?}"
        )));
    }
    Ok(())
}

/// Lowercases, trims, dedupes, and sorts a label list, dropping empties.
pub(crate) fn normalize_labels(labels: &[String]) -> Vec<String> {
    let set: BTreeSet<String> = labels
        .iter()
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .collect();
    set.into_iter().collect()
}

/// Computes the `closed_at` value that keeps the terminal-status invariant.
///
/// Terminal status gets the provided time (or `now`); non-terminal status
/// gets `None`, overriding any inconsistent caller-supplied value.
pub(crate) fn normalized_closed_at(
    status: &Status,
    provided: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if status.is_terminal() {
        Some(provided.unwrap_or(now))
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// TaskService
// ---------------------------------------------------------------------------

impl TaskService {
    pub fn new(store: Arc<dyn Storage>, blobs: BlobStore, options: ServiceOptions) -> Self {
        Self {
            store,
            blobs,
            options,
            login_attempts: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    // -- Create --------------------------------------------------------------

    /// Creates a task with its labels and dependencies in one transaction.
    ///
    /// Omitted ids are minted as `<prefix>-<slug>`; collisions retry with a
    /// fresh nonce up to a bounded number of attempts.
    pub fn create_task(&self, req: CreateTaskRequest) -> Result<TaskView> {
        let mut task = req.task;
        task.trim_strings();

        if task.title.is_empty() {
            return Err(ServiceError::invalid("title is required"));
        }
        let now = Utc::now();
        task.updated_at = task.created_at;
        task.closed_at = normalized_closed_at(&task.status, task.closed_at, now);

        let labels = normalize_labels(&req.labels);
        for dep in &req.deps {
            if dep.parent_id.trim().is_empty() {
                return Err(ServiceError::invalid("dependency parent_id is required"));
            }
        }

        let minted = task.id.is_empty();
        if !minted {
            validate_task_id(&task.id)?;
        }

        let mut nonce = 0u32;
        loop {
            if minted {
                task.id = idgen::mint_id(
                    &self.options.project_prefix,
                    &task.title,
                    task.created_at,
                    nonce,
                );
            }

            let result = self.store.run_in_transaction(&|tx| {
                tx.create_task(&task)?;
                if !labels.is_empty() {
                    tx.add_labels(&task.id, &labels, task.updated_at)?;
                }
                for entry in &req.deps {
                    if !tx.task_exists(&entry.parent_id)? {
                        return Err(StorageError::not_found("task", &entry.parent_id));
                    }
                    let dep = Dependency {
                        child_id: task.id.clone(),
                        parent_id: entry.parent_id.clone(),
                        dep_type: entry.dep_type.clone(),
                        created_at: task.created_at,
                    };
                    tx.add_dependency(&dep, task.updated_at)?;
                }
                Ok(())
            });

            match result {
                Ok(()) => break,
                Err(StorageError::DuplicateId { .. }) if minted => {
                    nonce += 1;
                    if nonce >= MAX_MINT_ATTEMPTS {
                        return Err(ServiceError::internal(format!(
                            "could not mint a unique id after {MAX_MINT_ATTEMPTS} attempts"
                        )));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(id = %task.id, "task created");
        self.task_view(&task.id)
    }

    /// Creates several tasks atomically; any failure rolls back the batch.
    pub fn create_tasks_batch(&self, reqs: Vec<CreateTaskRequest>) -> Result<Vec<TaskView>> {
        // Minted ids must be decided before the transaction so the whole
        // batch stays atomic; collisions across the batch retry per task.
        let mut prepared: Vec<(Task, Vec<String>, Vec<DepEntry>)> = Vec::with_capacity(reqs.len());
        for req in reqs {
            let mut task = req.task;
            task.trim_strings();
            if task.title.is_empty() {
                return Err(ServiceError::invalid("title is required"));
            }
            let now = Utc::now();
            task.updated_at = task.created_at;
            task.closed_at = normalized_closed_at(&task.status, task.closed_at, now);
            if task.id.is_empty() {
                let mut nonce = 0u32;
                loop {
                    let candidate = idgen::mint_id(
                        &self.options.project_prefix,
                        &task.title,
                        task.created_at,
                        nonce,
                    );
                    let taken = self.store.task_exists(&candidate)?
                        || prepared.iter().any(|(t, _, _)| t.id == candidate);
                    if !taken {
                        task.id = candidate;
                        break;
                    }
                    nonce += 1;
                    if nonce >= MAX_MINT_ATTEMPTS {
                        return Err(ServiceError::internal(
                            "could not mint a unique id for batch entry",
                        ));
                    }
                }
            } else {
                validate_task_id(&task.id)?;
            }
            prepared.push((task, normalize_labels(&req.labels), req.deps));
        }

        self.store.run_in_transaction(&|tx| {
            for (task, labels, deps) in &prepared {
                tx.create_task(task)?;
                if !labels.is_empty() {
                    tx.add_labels(&task.id, labels, task.updated_at)?;
                }
                for entry in deps {
                    if !tx.task_exists(&entry.parent_id)? {
                        return Err(StorageError::not_found("task", &entry.parent_id));
                    }
                    let dep = Dependency {
                        child_id: task.id.clone(),
                        parent_id: entry.parent_id.clone(),
                        dep_type: entry.dep_type.clone(),
                        created_at: task.created_at,
                    };
                    tx.add_dependency(&dep, task.updated_at)?;
                }
            }
            Ok(())
        })?;

        prepared
            .iter()
            .map(|(task, _, _)| self.task_view(&task.id))
            .collect()
    }

    // -- Read ----------------------------------------------------------------

    /// A task with its labels and dependencies.
    pub fn task_view(&self, id: &str) -> Result<TaskView> {
        let task = self.store.get_task(id)?;
        let labels = self.store.get_labels(id)?;
        let deps = self.store.get_dependencies(id)?;
        Ok(TaskView { task, labels, deps })
    }

    /// Lists tasks; the token is checked before the scan starts.
    pub fn list_tasks(&self, filter: &TaskFilter, cancel: &CancelToken) -> Result<Vec<Task>> {
        cancel.check()?;
        Ok(self.store.list_tasks(filter)?)
    }

    pub fn ready_tasks(&self, filter: &ReadyFilter) -> Result<Vec<Task>> {
        Ok(self.store.ready_tasks(filter)?)
    }

    pub fn stale_tasks(&self, filter: &StaleFilter) -> Result<Vec<Task>> {
        if filter.days <= 0 {
            return Err(ServiceError::invalid("days must be positive"));
        }
        Ok(self.store.stale_tasks(filter, Utc::now())?)
    }

    pub fn info(&self) -> Result<InfoResponse> {
        let stats = self.store.stats()?;
        let schema_version = self.store.schema_version()?;
        let task_counts: BTreeMap<String, i64> = stats.by_status.into_iter().collect();
        let type_counts: BTreeMap<String, i64> = stats.by_type.into_iter().collect();
        Ok(InfoResponse {
            project_prefix: self.options.project_prefix.clone(),
            schema_version,
            task_counts,
            type_counts,
            total_tasks: stats.total_tasks,
            blob_count: stats.blob_count,
            blob_total_bytes: stats.blob_total_bytes,
        })
    }

    // -- Update --------------------------------------------------------------

    /// Applies a patch, normalizing the status/closed-at pair.
    pub fn update_task(&self, id: &str, req: UpdateTaskRequest) -> Result<TaskView> {
        let stored = self.store.get_task(id)?;
        let now = Utc::now();

        let mut patch = TaskPatch {
            description: req.description.map(|s| s.trim().to_owned()),
            notes: req.notes.map(|s| s.trim().to_owned()),
            design: req.design.map(|s| s.trim().to_owned()),
            acceptance_criteria: req.acceptance_criteria.map(|s| s.trim().to_owned()),
            task_type: req.task_type,
            priority: req.priority,
            assignee: req.assignee.map(|s| s.trim().to_owned()),
            parent_id: req.parent_id,
            source_repo: req.source_repo.map(|s| s.trim().to_owned()),
            spec_id: req.spec_id.map(|s| s.trim().to_owned()),
            custom: req.custom,
            updated_at: Some(now),
            ..Default::default()
        };

        if let Some(title) = req.title {
            let title = title.trim().to_owned();
            if title.is_empty() {
                return Err(ServiceError::invalid("title must be non-empty"));
            }
            patch.title = Some(title);
        }

        let provided_closed_at = req.closed_at.flatten();
        match req.status {
            Some(new_status) => {
                if new_status.is_terminal() {
                    if stored.closed_at.is_none() || provided_closed_at.is_some() {
                        patch.closed_at =
                            Some(Some(provided_closed_at.unwrap_or(now)));
                    }
                } else {
                    // Away from terminal (or inconsistent caller input): clear.
                    patch.closed_at = Some(None);
                }
                patch.status = Some(new_status);
            }
            None => {
                // No status change: honor an explicit closed_at only while
                // terminal; otherwise normalization drops it.
                if req.closed_at.is_some() && stored.status.is_terminal() {
                    patch.closed_at = Some(normalized_closed_at(
                        &stored.status,
                        provided_closed_at,
                        now,
                    ));
                }
            }
        }

        if patch.is_empty() {
            debug!(id, "empty patch, nothing to update");
            return self.task_view(id);
        }

        self.store.update_task(id, &patch)?;
        self.task_view(id)
    }

    /// Closes tasks, optionally recording the closing commit as a git ref.
    ///
    /// Already-closed ids are left untouched and omitted from the result.
    pub fn close_tasks(
        &self,
        ids: &[String],
        commit: Option<&str>,
        repo: Option<&str>,
    ) -> Result<Vec<String>> {
        let now = Utc::now();
        let mut closed = Vec::new();
        for id in ids {
            let task = self.store.get_task(id)?;
            if task.is_terminal() {
                continue;
            }
            let patch = TaskPatch {
                status: Some(Status::Closed),
                closed_at: Some(Some(now)),
                updated_at: Some(now),
                ..Default::default()
            };
            self.store.update_task(id, &patch)?;

            if let Some(commit) = commit {
                let repo = repo
                    .map(str::to_owned)
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| task.source_repo.clone());
                let git_ref = GitRef {
                    id: String::new(),
                    task_id: id.clone(),
                    repo,
                    relation: GitRelation::ClosedBy,
                    object_type: GitObjectType::Commit,
                    object_value: commit.to_owned(),
                    resolved_commit: Some(commit.to_owned()),
                    note: String::new(),
                };
                self.store.add_git_ref(&git_ref)?;
            }
            closed.push(id.clone());
        }
        Ok(closed)
    }

    /// Reopens tasks: status back to open, `closed_at` cleared.
    ///
    /// Non-terminal ids are left untouched and omitted from the result.
    pub fn reopen_tasks(&self, ids: &[String]) -> Result<Vec<String>> {
        let now = Utc::now();
        let mut reopened = Vec::new();
        for id in ids {
            let task = self.store.get_task(id)?;
            if !task.is_terminal() {
                continue;
            }
            let patch = TaskPatch {
                status: Some(Status::Open),
                closed_at: Some(None),
                updated_at: Some(now),
                ..Default::default()
            };
            self.store.update_task(id, &patch)?;
            reopened.push(id.clone());
        }
        Ok(reopened)
    }

    // -- Labels --------------------------------------------------------------

    /// Adds labels (idempotent set semantics); returns the resulting set.
    pub fn add_labels(&self, task_id: &str, labels: &[String]) -> Result<Vec<String>> {
        let labels = normalize_labels(labels);
        self.store.add_labels(task_id, &labels, Utc::now())?;
        Ok(self.store.get_labels(task_id)?)
    }

    /// Removes labels (idempotent); returns the resulting set.
    pub fn remove_labels(&self, task_id: &str, labels: &[String]) -> Result<Vec<String>> {
        let labels = normalize_labels(labels);
        self.store.remove_labels(task_id, &labels, Utc::now())?;
        Ok(self.store.get_labels(task_id)?)
    }

    pub fn list_all_labels(&self) -> Result<Vec<String>> {
        Ok(self.store.list_all_labels()?)
    }

    // -- Dependencies --------------------------------------------------------

    /// Adds an edge; both endpoints must exist and the graph must stay a DAG.
    pub fn add_dependency(
        &self,
        child_id: &str,
        parent_id: &str,
        dep_type: DepType,
    ) -> Result<Dependency> {
        validate_task_id(child_id)?;
        validate_task_id(parent_id)?;
        if !self.store.task_exists(child_id)? {
            return Err(ServiceError::NotFound(format!("task not found: {child_id}")));
        }
        if !self.store.task_exists(parent_id)? {
            return Err(ServiceError::NotFound(format!(
                "task not found: {parent_id}"
            )));
        }

        let dep = Dependency {
            child_id: child_id.to_owned(),
            parent_id: parent_id.to_owned(),
            dep_type,
            created_at: Utc::now(),
        };
        self.store.add_dependency(&dep, dep.created_at)?;
        Ok(dep)
    }

    /// The upstream and downstream neighborhood of a task.
    pub fn dependency_tree(&self, task_id: &str, max_depth: i32) -> Result<Vec<TreeNodeView>> {
        let nodes = self.store.dependency_tree(task_id, max_depth)?;
        Ok(nodes
            .into_iter()
            .map(|n| TreeNodeView {
                id: n.task.id,
                title: n.task.title,
                status: n.task.status,
                depth: n.depth,
                direction: n.direction,
                dep_type: n.dep_type,
            })
            .collect())
    }

    // -- Git refs ------------------------------------------------------------

    /// Records a git reference against a task.
    pub fn add_git_ref(&self, mut git_ref: GitRef) -> Result<GitRef> {
        git_ref.repo = git_ref.repo.trim().to_owned();
        git_ref.object_value = git_ref.object_value.trim().to_owned();
        if git_ref.repo.is_empty() {
            return Err(ServiceError::invalid("repo is required"));
        }
        if git_ref.object_value.is_empty() {
            return Err(ServiceError::invalid("object_value is required"));
        }
        if !git_ref.object_type.is_builtin() {
            return Err(ServiceError::invalid(format!(
                "unknown object_type: {}",
                git_ref.object_type
            )));
        }
        Ok(self.store.add_git_ref(&git_ref)?)
    }

    pub fn git_refs(&self, task_id: &str) -> Result<Vec<GitRef>> {
        if !self.store.task_exists(task_id)? {
            return Err(ServiceError::NotFound(format!("task not found: {task_id}")));
        }
        Ok(self.store.get_git_refs(task_id)?)
    }

    pub fn delete_git_ref(&self, id: &str) -> Result<()> {
        Ok(self.store.delete_git_ref(id)?)
    }

    // -- Internal ------------------------------------------------------------

    pub(crate) fn blobs(&self) -> &BlobStore {
        &self.blobs
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use grns_storage::SqliteStore;

    pub(crate) fn test_service() -> (tempfile::TempDir, TaskService) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let blobs = BlobStore::open(dir.path().join("blobs")).unwrap();
        let service = TaskService::new(store, blobs, ServiceOptions::default());
        (dir, service)
    }

    fn create_req(title: &str) -> CreateTaskRequest {
        CreateTaskRequest {
            task: grns_core::task::TaskBuilder::new(title).build(),
            labels: Vec::new(),
            deps: Vec::new(),
        }
    }

    #[test]
    fn create_mints_id_with_prefix() {
        let (_dir, service) = test_service();
        let view = service.create_task(create_req("Fix bug")).unwrap();
        assert!(idgen::is_minted_id(&view.task.id, "gr"));
        assert_eq!(view.task.status, Status::Open);
        assert_eq!(view.task.priority, 2);
        assert!(view.task.closed_at.is_none());
    }

    #[test]
    fn create_requires_title() {
        let (_dir, service) = test_service();
        let err = service.create_task(create_req("   ")).unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }

    #[test]
    fn create_rejects_whitespace_id() {
        let (_dir, service) = test_service();
        let mut req = create_req("Valid");
        req.task.id = "gr id".into();
        let err = service.create_task(req).unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }

    #[test]
    fn create_with_labels_and_deps() {
        let (_dir, service) = test_service();
        let parent = service.create_task(create_req("Parent")).unwrap();

        let mut req = create_req("Child");
        req.labels = vec!["Backend ".into(), "backend".into(), "ui".into()];
        req.deps = vec![DepEntry {
            parent_id: parent.task.id.clone(),
            dep_type: DepType::Blocks,
        }];
        let view = service.create_task(req).unwrap();

        assert_eq!(view.labels, vec!["backend", "ui"]);
        assert_eq!(view.deps.len(), 1);
        assert_eq!(view.deps[0].parent_id, parent.task.id);
    }

    #[test]
    fn create_dep_on_unknown_parent_fails() {
        let (_dir, service) = test_service();
        let mut req = create_req("Orphan child");
        req.deps = vec![DepEntry {
            parent_id: "gr-nope".into(),
            dep_type: DepType::Blocks,
        }];
        let err = service.create_task(req).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn create_terminal_status_gets_closed_at() {
        let (_dir, service) = test_service();
        let mut req = create_req("Already done");
        req.task.status = Status::Closed;
        let view = service.create_task(req).unwrap();
        assert!(view.task.closed_at.is_some());
    }

    #[test]
    fn close_and_reopen_normalize_closed_at() {
        let (_dir, service) = test_service();
        let view = service.create_task(create_req("Lifecycle")).unwrap();
        let id = view.task.id.clone();

        let closed = service.close_tasks(&[id.clone()], None, None).unwrap();
        assert_eq!(closed, vec![id.clone()]);
        let view = service.task_view(&id).unwrap();
        assert_eq!(view.task.status, Status::Closed);
        assert!(view.task.closed_at.is_some());

        // Closing again is a no-op.
        let closed = service.close_tasks(&[id.clone()], None, None).unwrap();
        assert!(closed.is_empty());

        let reopened = service.reopen_tasks(&[id.clone()]).unwrap();
        assert_eq!(reopened, vec![id.clone()]);
        let view = service.task_view(&id).unwrap();
        assert_eq!(view.task.status, Status::Open);
        assert!(view.task.closed_at.is_none());
    }

    #[test]
    fn close_records_git_ref() {
        let (_dir, service) = test_service();
        let view = service.create_task(create_req("With commit")).unwrap();
        let id = view.task.id.clone();

        service
            .close_tasks(&[id.clone()], Some("abc123"), Some("acme/widgets"))
            .unwrap();

        let refs = service.git_refs(&id).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].relation, GitRelation::ClosedBy);
        assert_eq!(refs[0].object_value, "abc123");
        assert_eq!(refs[0].repo, "acme/widgets");
    }

    #[test]
    fn update_to_terminal_sets_closed_at() {
        let (_dir, service) = test_service();
        let view = service.create_task(create_req("Updatable")).unwrap();
        let id = view.task.id.clone();

        let req = UpdateTaskRequest {
            status: Some(Status::Closed),
            ..Default::default()
        };
        let view = service.update_task(&id, req).unwrap();
        assert!(view.task.closed_at.is_some());

        let req = UpdateTaskRequest {
            status: Some(Status::InProgress),
            ..Default::default()
        };
        let view = service.update_task(&id, req).unwrap();
        assert_eq!(view.task.status, Status::InProgress);
        assert!(view.task.closed_at.is_none());
    }

    #[test]
    fn update_ignores_inconsistent_closed_at() {
        let (_dir, service) = test_service();
        let view = service.create_task(create_req("Open stays open")).unwrap();
        let id = view.task.id.clone();

        // closed_at supplied while status stays open: normalization drops it.
        let req = UpdateTaskRequest {
            closed_at: Some(Some(Utc::now())),
            notes: Some("touched".into()),
            ..Default::default()
        };
        let view = service.update_task(&id, req).unwrap();
        assert!(view.task.closed_at.is_none());
        assert_eq!(view.task.notes, "touched");
    }

    #[test]
    fn update_bumps_updated_at() {
        let (_dir, service) = test_service();
        let view = service.create_task(create_req("Bump me")).unwrap();
        let id = view.task.id.clone();
        let before = view.task.updated_at;

        let req = UpdateTaskRequest {
            priority: Some(4),
            ..Default::default()
        };
        let view = service.update_task(&id, req).unwrap();
        assert!(view.task.updated_at >= before);
        assert_eq!(view.task.priority, 4);
    }

    #[test]
    fn update_custom_merge_semantics() {
        let (_dir, service) = test_service();
        let mut map = Map::new();
        map.insert("env".into(), Value::String("prod".into()));
        let mut req = create_req("Custom holder");
        req.task.custom = Some(map);
        let view = service.create_task(req).unwrap();
        let id = view.task.id.clone();

        // Absent custom leaves it alone.
        let view = service
            .update_task(
                &id,
                UpdateTaskRequest {
                    notes: Some("x".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(view.task.custom.is_some());

        // Present replaces.
        let mut replacement = Map::new();
        replacement.insert("env".into(), Value::String("staging".into()));
        let view = service
            .update_task(
                &id,
                UpdateTaskRequest {
                    custom: Some(replacement),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(
            view.task.custom.as_ref().and_then(|m| m.get("env")),
            Some(&Value::String("staging".into()))
        );

        // Present-but-empty clears.
        let view = service
            .update_task(
                &id,
                UpdateTaskRequest {
                    custom: Some(Map::new()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(view.task.custom.is_none());
    }

    #[test]
    fn cycle_rejected_with_edge_in_message() {
        let (_dir, service) = test_service();
        let a = service.create_task(create_req("A")).unwrap().task.id;
        let b = service.create_task(create_req("B")).unwrap().task.id;

        service.add_dependency(&b, &a, DepType::Blocks).unwrap();
        let err = service.add_dependency(&a, &b, DepType::Blocks).unwrap_err();
        assert!(err.is_conflict());
        assert!(err.to_string().contains(&a));
        assert!(err.to_string().contains(&b));
    }

    #[test]
    fn ready_flow() {
        let (_dir, service) = test_service();
        let a = service.create_task(create_req("A")).unwrap().task.id;
        let b = service.create_task(create_req("B")).unwrap().task.id;
        service.add_dependency(&b, &a, DepType::Blocks).unwrap();

        let ready = service.ready_tasks(&ReadyFilter::default()).unwrap();
        let ids: Vec<&str> = ready.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![a.as_str()]);

        service.close_tasks(&[a.clone()], None, None).unwrap();
        let ready = service.ready_tasks(&ReadyFilter::default()).unwrap();
        let ids: Vec<&str> = ready.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![b.as_str()]);
    }

    #[test]
    fn info_counts() {
        let (_dir, service) = test_service();
        service.create_task(create_req("One")).unwrap();
        let mut bug = create_req("Two");
        bug.task.task_type = TaskType::Bug;
        let done = service.create_task(bug).unwrap().task.id;
        service.close_tasks(&[done], None, None).unwrap();

        let info = service.info().unwrap();
        assert_eq!(info.project_prefix, "gr");
        assert_eq!(info.total_tasks, 2);
        assert_eq!(info.task_counts.get("open"), Some(&1));
        assert_eq!(info.task_counts.get("closed"), Some(&1));
        assert_eq!(info.type_counts.get("task"), Some(&1));
        assert_eq!(info.type_counts.get("bug"), Some(&1));
        assert!(info.schema_version >= 4);
    }
}
