//! Task struct -- the central domain model for the grns system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::enums::{Status, TaskType};

/// Helper for `skip_serializing_if` on the custom metadata map.
fn is_none_or_empty(m: &Option<Map<String, Value>>) -> bool {
    m.as_ref().is_none_or(Map::is_empty)
}

/// Represents a trackable work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub design: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub acceptance_criteria: String,

    #[serde(default, skip_serializing_if = "Status::is_default")]
    pub status: Status,

    #[serde(default, skip_serializing_if = "TaskType::is_default", rename = "type")]
    pub task_type: TaskType,

    /// Priority; higher sorts earlier in ready work.
    #[serde(default = "default_priority")]
    pub priority: i32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub assignee: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_repo: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub spec_id: String,

    /// Free-form JSON object for extension points.
    #[serde(default, skip_serializing_if = "is_none_or_empty")]
    pub custom: Option<Map<String, Value>>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    /// Present iff `status` is terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

fn default_priority() -> i32 {
    2
}

impl Default for Task {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            title: String::new(),
            description: String::new(),
            notes: String::new(),
            design: String::new(),
            acceptance_criteria: String::new(),
            status: Status::Open,
            task_type: TaskType::Task,
            priority: 2,
            assignee: String::new(),
            parent_id: None,
            source_repo: String::new(),
            spec_id: String::new(),
            custom: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }
}

impl Task {
    /// Trims surrounding whitespace from every string field in place.
    pub fn trim_strings(&mut self) {
        fn trim(s: &mut String) {
            let trimmed = s.trim();
            if trimmed.len() != s.len() {
                *s = trimmed.to_owned();
            }
        }
        trim(&mut self.id);
        trim(&mut self.title);
        trim(&mut self.description);
        trim(&mut self.notes);
        trim(&mut self.design);
        trim(&mut self.acceptance_criteria);
        trim(&mut self.assignee);
        trim(&mut self.source_repo);
        trim(&mut self.spec_id);
        if let Some(parent) = self.parent_id.as_mut() {
            trim(parent);
        }
    }

    /// Returns `true` if the task's status requires a `closed_at` timestamp.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Builder for constructing a [`Task`] with a fluent API.
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    /// Creates a new builder with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        let mut task = Task::default();
        task.title = title.into();
        Self { task }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.task.id = id.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.task.description = description.into();
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.task.notes = notes.into();
        self
    }

    pub fn design(mut self, design: impl Into<String>) -> Self {
        self.task.design = design.into();
        self
    }

    pub fn acceptance_criteria(mut self, ac: impl Into<String>) -> Self {
        self.task.acceptance_criteria = ac.into();
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.task.status = status;
        self
    }

    pub fn task_type(mut self, task_type: TaskType) -> Self {
        self.task.task_type = task_type;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn assignee(mut self, assignee: impl Into<String>) -> Self {
        self.task.assignee = assignee.into();
        self
    }

    pub fn parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.task.parent_id = Some(parent_id.into());
        self
    }

    pub fn source_repo(mut self, repo: impl Into<String>) -> Self {
        self.task.source_repo = repo.into();
        self
    }

    pub fn spec_id(mut self, spec_id: impl Into<String>) -> Self {
        self.task.spec_id = spec_id.into();
        self
    }

    pub fn custom(mut self, custom: Map<String, Value>) -> Self {
        self.task.custom = Some(custom);
        self
    }

    pub fn created_at(mut self, t: DateTime<Utc>) -> Self {
        self.task.created_at = t;
        self
    }

    pub fn updated_at(mut self, t: DateTime<Utc>) -> Self {
        self.task.updated_at = t;
        self
    }

    pub fn closed_at(mut self, t: DateTime<Utc>) -> Self {
        self.task.closed_at = Some(t);
        self
    }

    /// Consumes the builder and returns the constructed [`Task`].
    pub fn build(self) -> Task {
        self.task
    }
}
