//! Import: NDJSON/JSON records into the store, with dedupe and orphan modes.
//!
//! The axes combine orthogonally: `dry_run` suppresses all writes, `dedupe`
//! decides what happens on an existing id, `orphan_handling` decides what
//! happens to edges naming unknown parents, and `atomic` chooses between
//! one-transaction-per-record (best effort) and all-or-nothing.

use std::cell::RefCell;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use grns_core::cancel::CancelToken;
use grns_core::dependency::{DepEntry, Dependency};
use grns_core::idgen;
use grns_core::ndjson::Record;
use grns_storage::{StorageError, TaskPatch, Transaction};

use crate::error::{Result, ServiceError};
use crate::service::{TaskService, normalize_labels, normalized_closed_at, validate_task_id};

/// Marker smuggled through [`StorageError::Internal`] to force a rollback.
const ABORT_SENTINEL: &str = "__grns_import_abort__";

/// Behavior when a record's task id already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupeMode {
    #[default]
    Skip,
    Overwrite,
    Error,
}

/// Behavior when a dependency names an unknown parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanHandling {
    #[default]
    Allow,
    Skip,
    Strict,
}

/// Import mode flags; all axes combine freely.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    pub dry_run: bool,
    pub dedupe: DedupeMode,
    pub orphan_handling: OrphanHandling,
    pub atomic: bool,
}

/// Per-batch accounting returned to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
    pub messages: Vec<String>,
    pub dry_run: bool,
}

/// What processing one record did.
enum RecordOutcome {
    Created,
    Updated,
    Skipped,
    /// The record wrote nothing (duplicate id under `dedupe=error`).
    Failed(String),
}

impl TaskService {
    /// Imports a batch of records.
    ///
    /// In atomic mode the first error (including a strict-mode orphan) aborts
    /// and rolls back the entire batch. Best-effort mode gives each record
    /// its own transaction and reports per-record errors in `messages`.
    pub fn import<I>(
        &self,
        records: I,
        opts: &ImportOptions,
        cancel: &CancelToken,
    ) -> Result<ImportReport>
    where
        I: IntoIterator<Item = grns_core::ndjson::Result<Record>>,
    {
        if opts.atomic || opts.dry_run {
            self.import_single_tx(records, opts, cancel)
        } else {
            self.import_best_effort(records, opts, cancel)
        }
    }

    fn import_best_effort<I>(
        &self,
        records: I,
        opts: &ImportOptions,
        cancel: &CancelToken,
    ) -> Result<ImportReport>
    where
        I: IntoIterator<Item = grns_core::ndjson::Result<Record>>,
    {
        let mut report = ImportReport::default();

        for (index, item) in records.into_iter().enumerate() {
            cancel.check()?;

            let record = match item {
                Ok(record) => record,
                Err(e) => {
                    report.errors += 1;
                    report.messages.push(format!("record {index}: {e}"));
                    continue;
                }
            };

            let outcome: RefCell<Option<(RecordOutcome, Option<String>)>> = RefCell::new(None);
            let failure: RefCell<Option<ServiceError>> = RefCell::new(None);

            let tx_result = self.store.run_in_transaction(&|tx| {
                match self.process_record(tx, &record, opts) {
                    Ok(result) => {
                        *outcome.borrow_mut() = Some(result);
                        Ok(())
                    }
                    Err(e) => {
                        *failure.borrow_mut() = Some(e);
                        Err(StorageError::Internal(ABORT_SENTINEL.into()))
                    }
                }
            });

            match tx_result {
                Ok(()) => {
                    let (result, dep_message) =
                        outcome.into_inner().expect("outcome set on success");
                    apply_outcome(&mut report, index, result, dep_message);
                }
                Err(_) => {
                    let e = failure
                        .into_inner()
                        .map_or_else(|| "transaction failed".to_string(), |e| e.to_string());
                    report.errors += 1;
                    report.messages.push(format!("record {index}: {e}"));
                }
            }
        }

        info!(
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            errors = report.errors,
            "import finished (best effort)"
        );
        Ok(report)
    }

    /// Atomic and/or dry-run import: the whole batch runs in one transaction.
    ///
    /// Dry runs always roll back; atomic runs roll back when any record
    /// fails and surface that record's error.
    fn import_single_tx<I>(
        &self,
        records: I,
        opts: &ImportOptions,
        cancel: &CancelToken,
    ) -> Result<ImportReport>
    where
        I: IntoIterator<Item = grns_core::ndjson::Result<Record>>,
    {
        let records: Vec<_> = records.into_iter().collect();
        let report: RefCell<ImportReport> = RefCell::new(ImportReport::default());
        let failure: RefCell<Option<ServiceError>> = RefCell::new(None);

        let tx_result = self.store.run_in_transaction(&|tx| {
            for (index, item) in records.iter().enumerate() {
                if let Err(i) = cancel.check() {
                    *failure.borrow_mut() = Some(i.into());
                    return Err(StorageError::Internal(ABORT_SENTINEL.into()));
                }

                let record = match item {
                    Ok(record) => record,
                    Err(e) => {
                        if opts.atomic {
                            *failure.borrow_mut() =
                                Some(ServiceError::invalid(format!("record {index}: {e}")));
                            return Err(StorageError::Internal(ABORT_SENTINEL.into()));
                        }
                        let mut r = report.borrow_mut();
                        r.errors += 1;
                        r.messages.push(format!("record {index}: {e}"));
                        continue;
                    }
                };

                match self.process_record(tx, record, opts) {
                    Ok((result, dep_message)) => {
                        if opts.atomic {
                            if let RecordOutcome::Failed(ref message) = result {
                                *failure.borrow_mut() = Some(ServiceError::Conflict(format!(
                                    "record {index}: {message}"
                                )));
                                return Err(StorageError::Internal(ABORT_SENTINEL.into()));
                            }
                            if let Some(ref message) = dep_message {
                                *failure.borrow_mut() = Some(ServiceError::Conflict(format!(
                                    "record {index}: {message}"
                                )));
                                return Err(StorageError::Internal(ABORT_SENTINEL.into()));
                            }
                        }
                        apply_outcome(&mut report.borrow_mut(), index, result, dep_message);
                    }
                    Err(e) => {
                        if opts.atomic {
                            *failure.borrow_mut() = Some(e);
                            return Err(StorageError::Internal(ABORT_SENTINEL.into()));
                        }
                        let mut r = report.borrow_mut();
                        r.errors += 1;
                        r.messages.push(format!("record {index}: {e}"));
                    }
                }
            }

            if opts.dry_run {
                // Accounting is done; roll the writes back.
                return Err(StorageError::Internal(ABORT_SENTINEL.into()));
            }
            Ok(())
        });

        match tx_result {
            Ok(()) => {}
            Err(StorageError::Internal(ref s)) if s == ABORT_SENTINEL => {
                if let Some(e) = failure.into_inner() {
                    return Err(e);
                }
                // Dry-run rollback; the report stands.
            }
            Err(e) => return Err(e.into()),
        }

        let mut report = report.into_inner();
        report.dry_run = opts.dry_run;
        info!(
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            errors = report.errors,
            dry_run = report.dry_run,
            atomic = opts.atomic,
            "import finished"
        );
        Ok(report)
    }

    /// Processes one record inside a transaction.
    ///
    /// Returns the outcome plus an optional dependency-rejection message
    /// (strict orphan handling writes the task but refuses its deps).
    fn process_record(
        &self,
        tx: &dyn Transaction,
        record: &Record,
        opts: &ImportOptions,
    ) -> Result<(RecordOutcome, Option<String>)> {
        let mut task = record.task.clone();
        task.trim_strings();

        if task.title.is_empty() {
            return Err(ServiceError::invalid(format!(
                "task {:?}: title is required",
                task.id
            )));
        }

        let now = Utc::now();
        task.closed_at = normalized_closed_at(&task.status, task.closed_at, now);
        // Label/dep writes reuse the record's clock so that importing an
        // export is a fixpoint.
        let stamp = task.updated_at;

        if task.id.is_empty() {
            let mut nonce = 0u32;
            loop {
                let candidate = idgen::mint_id(
                    &self.options.project_prefix,
                    &task.title,
                    task.created_at,
                    nonce,
                );
                if !tx.task_exists(&candidate)? {
                    task.id = candidate;
                    break;
                }
                nonce += 1;
                if nonce >= 16 {
                    return Err(ServiceError::internal("could not mint a unique id"));
                }
            }
        } else {
            validate_task_id(&task.id)?;
        }

        if !tx.task_exists(&task.id)? {
            tx.create_task(&task)?;
            if let Some(ref labels) = record.labels {
                let labels = normalize_labels(labels);
                if !labels.is_empty() {
                    tx.add_labels(&task.id, &labels, stamp)?;
                }
            }
            let dep_message = match record.deps {
                Some(ref deps) => self.write_deps(tx, &task.id, deps, opts, stamp)?,
                None => None,
            };
            return Ok((RecordOutcome::Created, dep_message));
        }

        match opts.dedupe {
            DedupeMode::Skip => Ok((RecordOutcome::Skipped, None)),
            DedupeMode::Error => Ok((
                RecordOutcome::Failed(format!("task already exists: {}", task.id)),
                None,
            )),
            DedupeMode::Overwrite => {
                // Full field replacement, timestamps included; status and
                // closed_at were re-normalized above.
                let patch = TaskPatch {
                    title: Some(task.title.clone()),
                    description: Some(task.description.clone()),
                    notes: Some(task.notes.clone()),
                    design: Some(task.design.clone()),
                    acceptance_criteria: Some(task.acceptance_criteria.clone()),
                    status: Some(task.status.clone()),
                    task_type: Some(task.task_type.clone()),
                    priority: Some(task.priority),
                    assignee: Some(task.assignee.clone()),
                    parent_id: Some(task.parent_id.clone()),
                    source_repo: Some(task.source_repo.clone()),
                    spec_id: Some(task.spec_id.clone()),
                    custom: Some(task.custom.clone().unwrap_or_default()),
                    closed_at: Some(task.closed_at),
                    created_at: Some(task.created_at),
                    updated_at: Some(task.updated_at),
                };
                tx.update_task(&task.id, &patch)?;

                // Labels: replaced if present in the record, preserved if
                // absent. Deps: same rule, and an explicit empty list clears.
                if let Some(ref labels) = record.labels {
                    tx.replace_labels(&task.id, &normalize_labels(labels), stamp)?;
                }
                let dep_message = match record.deps {
                    Some(ref deps) => {
                        let message =
                            self.check_orphans(tx, deps, opts)?;
                        match message {
                            Some(message) => Some(message),
                            None => {
                                let allowed = self.filter_orphans(tx, deps, opts)?;
                                tx.replace_deps(&task.id, &allowed, stamp)?;
                                None
                            }
                        }
                    }
                    None => None,
                };
                Ok((RecordOutcome::Updated, dep_message))
            }
        }
    }

    /// Strict-mode orphan check: returns a rejection message if any parent is
    /// missing.
    fn check_orphans(
        &self,
        tx: &dyn Transaction,
        deps: &[DepEntry],
        opts: &ImportOptions,
    ) -> Result<Option<String>> {
        if opts.orphan_handling != OrphanHandling::Strict {
            return Ok(None);
        }
        for entry in deps {
            if !tx.task_exists(&entry.parent_id)? {
                return Ok(Some(format!(
                    "dependency on unknown task {}: deps rejected",
                    entry.parent_id
                )));
            }
        }
        Ok(None)
    }

    /// Drops orphan edges under `skip`; passes everything under `allow`.
    fn filter_orphans(
        &self,
        tx: &dyn Transaction,
        deps: &[DepEntry],
        opts: &ImportOptions,
    ) -> Result<Vec<DepEntry>> {
        match opts.orphan_handling {
            OrphanHandling::Skip => {
                let mut kept = Vec::with_capacity(deps.len());
                for entry in deps {
                    if tx.task_exists(&entry.parent_id)? {
                        kept.push(entry.clone());
                    }
                }
                Ok(kept)
            }
            _ => Ok(deps.to_vec()),
        }
    }

    /// Writes a fresh task's deps, honoring orphan handling.
    fn write_deps(
        &self,
        tx: &dyn Transaction,
        task_id: &str,
        deps: &[DepEntry],
        opts: &ImportOptions,
        stamp: chrono::DateTime<Utc>,
    ) -> Result<Option<String>> {
        if let Some(message) = self.check_orphans(tx, deps, opts)? {
            return Ok(Some(message));
        }
        let allowed = self.filter_orphans(tx, deps, opts)?;
        for entry in &allowed {
            let dep = Dependency {
                child_id: task_id.to_owned(),
                parent_id: entry.parent_id.clone(),
                dep_type: entry.dep_type.clone(),
                created_at: stamp,
            };
            tx.add_dependency(&dep, stamp)?;
        }
        Ok(None)
    }
}

/// Folds a record outcome into the running report.
fn apply_outcome(
    report: &mut ImportReport,
    index: usize,
    outcome: RecordOutcome,
    dep_message: Option<String>,
) {
    match outcome {
        RecordOutcome::Created => report.created += 1,
        RecordOutcome::Updated => report.updated += 1,
        RecordOutcome::Skipped => report.skipped += 1,
        RecordOutcome::Failed(message) => {
            report.errors += 1;
            report.messages.push(format!("record {index}: {message}"));
            return;
        }
    }
    if let Some(message) = dep_message {
        // Strict orphan rejection: the task landed, its deps did not.
        report.errors += 1;
        report.messages.push(format!("record {index}: {message}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::CreateTaskRequest;
    use crate::service::tests::test_service;
    use grns_core::task::TaskBuilder;

    fn record(id: &str, title: &str) -> Record {
        Record::from_task(TaskBuilder::new(title).id(id).build())
    }

    fn ok_records(records: Vec<Record>) -> Vec<grns_core::ndjson::Result<Record>> {
        records.into_iter().map(Ok).collect()
    }

    #[test]
    fn import_creates_tasks() {
        let (_dir, service) = test_service();
        let report = service
            .import(
                ok_records(vec![record("gr-im2a", "One"), record("gr-im2b", "Two")]),
                &ImportOptions::default(),
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(report.created, 2);
        assert_eq!(report.errors, 0);
        assert!(service.task_view("gr-im2a").is_ok());
    }

    #[test]
    fn dedupe_skip_leaves_existing() {
        let (_dir, service) = test_service();
        service
            .create_task(CreateTaskRequest {
                task: TaskBuilder::new("Original").id("gr-im2c").build(),
                labels: Vec::new(),
                deps: Vec::new(),
            })
            .unwrap();

        let report = service
            .import(
                ok_records(vec![record("gr-im2c", "Replacement")]),
                &ImportOptions::default(),
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(service.task_view("gr-im2c").unwrap().task.title, "Original");
    }

    #[test]
    fn dedupe_error_counts_errors() {
        let (_dir, service) = test_service();
        service
            .create_task(CreateTaskRequest {
                task: TaskBuilder::new("Original").id("gr-im2d").build(),
                labels: Vec::new(),
                deps: Vec::new(),
            })
            .unwrap();

        let opts = ImportOptions {
            dedupe: DedupeMode::Error,
            ..Default::default()
        };
        let report = service
            .import(
                ok_records(vec![record("gr-im2d", "Replacement")]),
                &opts,
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(report.errors, 1);
        assert_eq!(report.created, 0);
        assert!(report.messages[0].contains("already exists"));
    }

    #[test]
    fn overwrite_preserves_unlisted_deps() {
        let (_dir, service) = test_service();
        // Pre-state: child depends on parent1.
        service
            .import(
                ok_records(vec![record("gr-p2r1", "Parent 1"), {
                    let mut r = record("gr-ch2d", "Child");
                    r.deps = Some(vec![DepEntry {
                        parent_id: "gr-p2r1".into(),
                        dep_type: Default::default(),
                    }]);
                    r
                }]),
                &ImportOptions::default(),
                &CancelToken::new(),
            )
            .unwrap();

        // Overwrite the child WITHOUT a deps field.
        let opts = ImportOptions {
            dedupe: DedupeMode::Overwrite,
            ..Default::default()
        };
        let report = service
            .import(
                ok_records(vec![record("gr-ch2d", "Child renamed")]),
                &opts,
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(report.updated, 1);

        let view = service.task_view("gr-ch2d").unwrap();
        assert_eq!(view.task.title, "Child renamed");
        assert_eq!(view.deps.len(), 1, "unlisted deps must be preserved");
        assert_eq!(view.deps[0].parent_id, "gr-p2r1");
    }

    #[test]
    fn overwrite_with_empty_deps_clears() {
        let (_dir, service) = test_service();
        service
            .import(
                ok_records(vec![record("gr-p2r2", "Parent"), {
                    let mut r = record("gr-ch2e", "Child");
                    r.deps = Some(vec![DepEntry {
                        parent_id: "gr-p2r2".into(),
                        dep_type: Default::default(),
                    }]);
                    r
                }]),
                &ImportOptions::default(),
                &CancelToken::new(),
            )
            .unwrap();

        let opts = ImportOptions {
            dedupe: DedupeMode::Overwrite,
            ..Default::default()
        };
        let mut overwrite = record("gr-ch2e", "Child");
        overwrite.deps = Some(Vec::new());
        service
            .import(ok_records(vec![overwrite]), &opts, &CancelToken::new())
            .unwrap();

        let view = service.task_view("gr-ch2e").unwrap();
        assert!(view.deps.is_empty(), "explicit empty deps must clear");
    }

    #[test]
    fn overwrite_labels_follow_presence_rule() {
        let (_dir, service) = test_service();
        let mut with_labels = record("gr-lb2i", "Labeled");
        with_labels.labels = Some(vec!["keep-me".into()]);
        service
            .import(
                ok_records(vec![with_labels]),
                &ImportOptions::default(),
                &CancelToken::new(),
            )
            .unwrap();

        let opts = ImportOptions {
            dedupe: DedupeMode::Overwrite,
            ..Default::default()
        };
        // Absent labels: preserved.
        service
            .import(
                ok_records(vec![record("gr-lb2i", "Renamed")]),
                &opts,
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(service.task_view("gr-lb2i").unwrap().labels, vec!["keep-me"]);

        // Present labels: replaced.
        let mut replace = record("gr-lb2i", "Renamed again");
        replace.labels = Some(vec!["new-label".into()]);
        service
            .import(ok_records(vec![replace]), &opts, &CancelToken::new())
            .unwrap();
        assert_eq!(
            service.task_view("gr-lb2i").unwrap().labels,
            vec!["new-label"]
        );
    }

    #[test]
    fn orphan_allow_writes_dangling_edge() {
        let (_dir, service) = test_service();
        let mut r = record("gr-or2a", "Dangling");
        r.deps = Some(vec![DepEntry {
            parent_id: "gr-miss".into(),
            dep_type: Default::default(),
        }]);

        let report = service
            .import(ok_records(vec![r]), &ImportOptions::default(), &CancelToken::new())
            .unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.errors, 0);

        let view = service.task_view("gr-or2a").unwrap();
        assert_eq!(view.deps.len(), 1);
        assert_eq!(view.deps[0].parent_id, "gr-miss");
    }

    #[test]
    fn orphan_skip_drops_only_dangling_edges() {
        let (_dir, service) = test_service();
        service
            .import(
                ok_records(vec![record("gr-or2p", "Real parent")]),
                &ImportOptions::default(),
                &CancelToken::new(),
            )
            .unwrap();

        let mut r = record("gr-or2b", "Mixed deps");
        r.deps = Some(vec![
            DepEntry {
                parent_id: "gr-or2p".into(),
                dep_type: Default::default(),
            },
            DepEntry {
                parent_id: "gr-miss".into(),
                dep_type: Default::default(),
            },
        ]);

        let opts = ImportOptions {
            orphan_handling: OrphanHandling::Skip,
            ..Default::default()
        };
        let report = service
            .import(ok_records(vec![r]), &opts, &CancelToken::new())
            .unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.errors, 0);

        let view = service.task_view("gr-or2b").unwrap();
        assert_eq!(view.deps.len(), 1);
        assert_eq!(view.deps[0].parent_id, "gr-or2p");
    }

    #[test]
    fn orphan_strict_writes_task_but_rejects_deps() {
        let (_dir, service) = test_service();
        let mut r = record("gr-or2c", "Strict orphan");
        r.deps = Some(vec![DepEntry {
            parent_id: "gr-miss".into(),
            dep_type: Default::default(),
        }]);

        let opts = ImportOptions {
            orphan_handling: OrphanHandling::Strict,
            ..Default::default()
        };
        let report = service
            .import(ok_records(vec![r]), &opts, &CancelToken::new())
            .unwrap();

        assert_eq!(report.created, 1);
        assert_eq!(report.errors, 1);
        assert!(report.messages[0].contains("gr-miss"));

        let view = service.task_view("gr-or2c").unwrap();
        assert!(view.deps.is_empty());
    }

    #[test]
    fn atomic_rolls_back_whole_batch() {
        let (_dir, service) = test_service();
        let good = record("gr-at2x", "Good");
        let mut bad = record("gr-at2y", "Bad deps");
        bad.deps = Some(vec![DepEntry {
            parent_id: "gr-miss".into(),
            dep_type: Default::default(),
        }]);

        let opts = ImportOptions {
            atomic: true,
            orphan_handling: OrphanHandling::Strict,
            ..Default::default()
        };
        let err = service
            .import(ok_records(vec![good, bad]), &opts, &CancelToken::new())
            .unwrap_err();
        assert!(err.is_conflict());

        // Neither record is present.
        assert!(service.task_view("gr-at2x").unwrap_err().is_not_found());
        assert!(service.task_view("gr-at2y").unwrap_err().is_not_found());
    }

    #[test]
    fn dry_run_reports_without_writing() {
        let (_dir, service) = test_service();
        let opts = ImportOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = service
            .import(
                ok_records(vec![record("gr-dr2a", "Phantom")]),
                &opts,
                &CancelToken::new(),
            )
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.created, 1);
        assert!(service.task_view("gr-dr2a").unwrap_err().is_not_found());
    }

    #[test]
    fn parse_errors_recorded_in_best_effort() {
        let (_dir, service) = test_service();
        let items: Vec<grns_core::ndjson::Result<Record>> = vec![
            Ok(record("gr-pe2a", "Fine")),
            Err(grns_core::ndjson::NdjsonError::Json {
                line: 2,
                source: serde_json::from_str::<serde_json::Value>("nope").unwrap_err(),
            }),
        ];
        let report = service
            .import(items, &ImportOptions::default(), &CancelToken::new())
            .unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.errors, 1);
    }

    #[test]
    fn canceled_import_stops() {
        let (_dir, service) = test_service();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = service
            .import(
                ok_records(vec![record("gr-cn2a", "Never")]),
                &ImportOptions::default(),
                &cancel,
            )
            .unwrap_err();
        assert_eq!(err.code(), "canceled");
    }
}
