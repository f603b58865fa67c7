//! NDJSON (newline-delimited JSON) record support for import/export.
//!
//! Each line is a complete JSON object holding one task together with its
//! relational data. Export always writes every field; import distinguishes
//! absent fields (preserve) from present-but-empty fields (replace).

use std::io::{self, BufRead, Write};

use serde::{Deserialize, Serialize};

use crate::attachment::Attachment;
use crate::dependency::DepEntry;
use crate::git_ref::GitRef;
use crate::task::Task;

/// Error type for NDJSON operations.
#[derive(Debug, thiserror::Error)]
pub enum NdjsonError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error at line {line}: {source}")]
    Json {
        line: usize,
        source: serde_json::Error,
    },
}

/// Result alias for NDJSON operations.
pub type Result<T> = std::result::Result<T, NdjsonError>;

/// One import/export record.
///
/// On export all relational fields are present (possibly empty). On import,
/// `None` means "leave the stored value alone" while `Some(vec![])` means
/// "replace with nothing" -- the distinction drives overwrite semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub task: Task,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deps: Option<Vec<DepEntry>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_refs: Option<Vec<GitRef>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
}

impl Record {
    /// Wraps a bare task with no relational data.
    pub fn from_task(task: Task) -> Self {
        Self {
            task,
            labels: None,
            deps: None,
            git_refs: None,
            attachments: None,
        }
    }
}

/// Writes one record as a JSON line and flushes.
///
/// Per-record flushing keeps memory flat when streaming large exports.
pub fn write_record<W: Write>(writer: &mut W, record: &Record) -> Result<()> {
    serde_json::to_writer(&mut *writer, record)
        .map_err(|e| NdjsonError::Json { line: 0, source: e })?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Returns an iterator that reads records from an NDJSON reader.
///
/// Empty lines are skipped; parse errors carry the 1-based line number.
pub fn read_records<R: BufRead>(reader: R) -> RecordIter<R> {
    RecordIter {
        reader,
        line_number: 0,
    }
}

/// Iterator over NDJSON-encoded records.
pub struct RecordIter<R> {
    reader: R,
    line_number: usize,
}

impl<R: BufRead> Iterator for RecordIter<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => return None, // EOF
                Ok(_) => {
                    self.line_number += 1;
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Record>(trimmed) {
                        Ok(record) => return Some(Ok(record)),
                        Err(e) => {
                            return Some(Err(NdjsonError::Json {
                                line: self.line_number,
                                source: e,
                            }));
                        }
                    }
                }
                Err(e) => return Some(Err(NdjsonError::Io(e))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskBuilder;
    use std::io::BufReader;

    #[test]
    fn write_and_read_roundtrip() {
        let records = vec![
            Record {
                task: TaskBuilder::new("Task 1").id("gr-aaa2").build(),
                labels: Some(vec!["backend".into()]),
                deps: Some(Vec::new()),
                git_refs: Some(Vec::new()),
                attachments: Some(Vec::new()),
            },
            Record::from_task(TaskBuilder::new("Task 2").id("gr-bbb3").build()),
        ];

        let mut buf = Vec::new();
        for r in &records {
            write_record(&mut buf, r).unwrap();
        }

        let reader = BufReader::new(buf.as_slice());
        let back: Vec<Record> = read_records(reader)
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert_eq!(back.len(), 2);
        assert_eq!(back[0].task.id, "gr-aaa2");
        assert_eq!(back[0].labels.as_deref(), Some(&["backend".to_string()][..]));
        assert_eq!(back[1].labels, None);
    }

    #[test]
    fn absent_deps_stay_none() {
        let data = b"{\"task\":{\"title\":\"A\",\"id\":\"gr-1\"}}\n";
        let reader = BufReader::new(data.as_slice());
        let records: Vec<Record> = read_records(reader)
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        assert!(records[0].deps.is_none());
    }

    #[test]
    fn empty_deps_stay_some_empty() {
        let data = b"{\"task\":{\"title\":\"A\",\"id\":\"gr-1\"},\"deps\":[]}\n";
        let reader = BufReader::new(data.as_slice());
        let records: Vec<Record> = read_records(reader)
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(records[0].deps.as_deref(), Some(&[][..]));
    }

    #[test]
    fn read_skips_empty_lines() {
        let data = b"{\"task\":{\"title\":\"A\"}}\n\n{\"task\":{\"title\":\"B\"}}\n";
        let reader = BufReader::new(data.as_slice());
        let results: Vec<Record> = read_records(reader)
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn read_reports_line_number_on_error() {
        let data = b"{\"task\":{\"title\":\"A\"}}\nnot-json\n";
        let reader = BufReader::new(data.as_slice());
        let results: Vec<_> = read_records(reader).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        match &results[1] {
            Err(NdjsonError::Json { line, .. }) => assert_eq!(*line, 2),
            other => panic!("expected JSON error, got {:?}", other),
        }
    }
}
