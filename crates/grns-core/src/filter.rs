//! Filter types for querying tasks.

use chrono::{DateTime, Utc};

use crate::enums::{Status, TaskType};

/// Filter for task list queries.
///
/// Conditions AND across categories; list-valued fields OR within the list
/// (except `labels`, which is AND -- `labels_any` is the OR variant).
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub statuses: Vec<Status>,
    pub types: Vec<TaskType>,

    pub priority: Option<i32>,
    pub priority_min: Option<i32>,
    pub priority_max: Option<i32>,

    pub parent_id: Option<String>,
    /// POSIX regex matched against `spec_id`, case-sensitive.
    pub spec_pattern: Option<String>,
    pub assignee: Option<String>,
    pub no_assignee: bool,

    /// Filter by specific task IDs.
    pub ids: Vec<String>,

    // Substring matching
    pub title_contains: Option<String>,
    pub description_contains: Option<String>,
    pub notes_contains: Option<String>,

    /// Whole-word search over title, description, and notes.
    pub search: Option<String>,

    // Time windows
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,
    pub closed_after: Option<DateTime<Utc>>,
    pub closed_before: Option<DateTime<Utc>>,

    // Empty/null checks
    pub empty_description: bool,
    pub no_labels: bool,

    /// AND semantics: task must have ALL these labels.
    pub labels: Vec<String>,
    /// OR semantics: task must have AT LEAST ONE of these labels.
    pub labels_any: Vec<String>,

    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Filter for ready-work queries.
#[derive(Debug, Clone, Default)]
pub struct ReadyFilter {
    pub assignee: Option<String>,
    pub limit: Option<i64>,
}

/// Filter for stale-task queries.
#[derive(Debug, Clone)]
pub struct StaleFilter {
    /// Tasks not updated in this many days.
    pub days: i64,
    /// Restrict to one status; `None` means any non-terminal status.
    pub status: Option<Status>,
    pub limit: Option<i64>,
}

impl Default for StaleFilter {
    fn default() -> Self {
        Self {
            days: 30,
            status: None,
            limit: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_filter_defaults() {
        let f = TaskFilter::default();
        assert!(f.statuses.is_empty());
        assert!(f.priority.is_none());
        assert!(f.labels.is_empty());
        assert!(!f.no_labels);
        assert!(f.limit.is_none());
    }

    #[test]
    fn stale_filter_defaults() {
        let f = StaleFilter::default();
        assert_eq!(f.days, 30);
        assert!(f.status.is_none());
    }
}
