//! Export: stream the full store as NDJSON records.

use std::io::Write;

use tracing::info;

use grns_core::cancel::CancelToken;
use grns_core::dependency::DepEntry;
use grns_core::ndjson::{self, Record};

use crate::error::{Result, ServiceError};
use crate::service::TaskService;

impl TaskService {
    /// Streams every task as one NDJSON record per line, ordered by
    /// `(created_at, id)`.
    ///
    /// The writer is flushed after each record so large exports never hold
    /// more than one record in memory. Returns the number of records written.
    pub fn export<W: Write>(&self, writer: &mut W, cancel: &CancelToken) -> Result<u64> {
        let ids = self.store.export_task_ids()?;
        let mut written = 0u64;

        for id in ids {
            cancel.check()?;

            // A task deleted between the id scan and this read is skipped.
            let task = match self.store.get_task(&id) {
                Ok(task) => task,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };

            let labels = self.store.get_labels(&id)?;
            let deps = self
                .store
                .get_dependencies(&id)?
                .into_iter()
                .map(|d| DepEntry {
                    parent_id: d.parent_id,
                    dep_type: d.dep_type,
                })
                .collect();
            let git_refs = self.store.get_git_refs(&id)?;
            let attachments = self.store.list_attachments(&id)?;

            let record = Record {
                task,
                labels: Some(labels),
                deps: Some(deps),
                git_refs: Some(git_refs),
                attachments: Some(attachments),
            };

            ndjson::write_record(writer, &record).map_err(|e| match e {
                ndjson::NdjsonError::Io(io) => ServiceError::internal(format!("export write: {io}")),
                other => ServiceError::internal(other.to_string()),
            })?;
            written += 1;
        }

        info!(records = written, "export finished");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::{DedupeMode, ImportOptions};
    use crate::service::CreateTaskRequest;
    use crate::service::tests::test_service;
    use grns_core::dependency::DepEntry;
    use grns_core::task::TaskBuilder;
    use std::io::BufReader;

    #[test]
    fn export_contains_relational_data() {
        let (_dir, service) = test_service();
        let parent = service
            .create_task(CreateTaskRequest {
                task: TaskBuilder::new("Parent").build(),
                labels: Vec::new(),
                deps: Vec::new(),
            })
            .unwrap();
        service
            .create_task(CreateTaskRequest {
                task: TaskBuilder::new("Child").build(),
                labels: vec!["core".into()],
                deps: vec![DepEntry {
                    parent_id: parent.task.id.clone(),
                    dep_type: Default::default(),
                }],
            })
            .unwrap();

        let mut buf = Vec::new();
        let written = service.export(&mut buf, &CancelToken::new()).unwrap();
        assert_eq!(written, 2);

        let records: Vec<Record> = ndjson::read_records(BufReader::new(buf.as_slice()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(records.len(), 2);

        let child = records
            .iter()
            .find(|r| r.task.title == "Child")
            .expect("child record");
        assert_eq!(child.labels.as_deref(), Some(&["core".to_string()][..]));
        assert_eq!(child.deps.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn export_import_export_is_fixpoint() {
        let (_dir, service) = test_service();
        let parent = service
            .create_task(CreateTaskRequest {
                task: TaskBuilder::new("Parent").build(),
                labels: vec!["infra".into()],
                deps: Vec::new(),
            })
            .unwrap();
        service
            .create_task(CreateTaskRequest {
                task: TaskBuilder::new("Child").build(),
                labels: Vec::new(),
                deps: vec![DepEntry {
                    parent_id: parent.task.id.clone(),
                    dep_type: Default::default(),
                }],
            })
            .unwrap();

        let mut first = Vec::new();
        service.export(&mut first, &CancelToken::new()).unwrap();

        let records = ndjson::read_records(BufReader::new(first.as_slice()));
        let opts = ImportOptions {
            dedupe: DedupeMode::Overwrite,
            atomic: true,
            ..Default::default()
        };
        let report = service.import(records, &opts, &CancelToken::new()).unwrap();
        assert_eq!(report.updated, 2);
        assert_eq!(report.errors, 0);

        let mut second = Vec::new();
        service.export(&mut second, &CancelToken::new()).unwrap();

        assert_eq!(
            String::from_utf8(first).unwrap(),
            String::from_utf8(second).unwrap(),
            "import of an export must be a fixpoint"
        );
    }

    #[test]
    fn export_respects_cancellation() {
        let (_dir, service) = test_service();
        service
            .create_task(CreateTaskRequest {
                task: TaskBuilder::new("Task").build(),
                labels: Vec::new(),
                deps: Vec::new(),
            })
            .unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let mut buf = Vec::new();
        let err = service.export(&mut buf, &cancel).unwrap_err();
        assert_eq!(err.code(), "canceled");
    }
}
