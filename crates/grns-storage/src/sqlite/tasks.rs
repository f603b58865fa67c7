//! Task CRUD and list queries for [`SqliteStore`].

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use serde_json::{Map, Value};

use grns_core::filter::TaskFilter;
use grns_core::task::Task;

use crate::error::{Result, StorageError};
use crate::sqlite::store::SqliteStore;
use crate::traits::TaskPatch;

// ---------------------------------------------------------------------------
// Column list (shared between INSERT and SELECT)
// ---------------------------------------------------------------------------

/// All task columns in a deterministic order for SELECT queries.
pub(crate) const TASK_COLUMNS: &str = r#"
    id, title, description, notes, design, acceptance_criteria,
    status, task_type, priority, assignee, parent_id,
    source_repo, spec_id, custom,
    created_at, updated_at, closed_at
"#;

// ---------------------------------------------------------------------------
// Row scanning
// ---------------------------------------------------------------------------

/// Deserialises a row into a [`Task`].
///
/// The column order MUST match [`TASK_COLUMNS`].
pub(crate) fn scan_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let custom_str: String = row.get("custom")?;
    let custom: Option<Map<String, Value>> = if custom_str.is_empty() || custom_str == "{}" {
        None
    } else {
        serde_json::from_str(&custom_str).ok()
    };

    let created_at_str: String = row.get("created_at")?;
    let updated_at_str: String = row.get("updated_at")?;
    let closed_at_str: Option<String> = row.get("closed_at")?;

    Ok(Task {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        notes: row.get("notes")?,
        design: row.get("design")?,
        acceptance_criteria: row.get("acceptance_criteria")?,
        status: row.get::<_, String>("status")?.into(),
        task_type: row.get::<_, String>("task_type")?.into(),
        priority: row.get("priority")?,
        assignee: row.get("assignee")?,
        parent_id: row.get("parent_id")?,
        source_repo: row.get("source_repo")?,
        spec_id: row.get("spec_id")?,
        custom,
        created_at: parse_datetime(&created_at_str),
        updated_at: parse_datetime(&updated_at_str),
        closed_at: closed_at_str.as_deref().map(parse_datetime),
    })
}

// ---------------------------------------------------------------------------
// Datetime helpers
// ---------------------------------------------------------------------------

/// Formats a `DateTime<Utc>` as ISO 8601 TEXT for SQLite.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parses an ISO 8601 TEXT string from SQLite into a `DateTime<Utc>`.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    s.parse::<DateTime<Utc>>().unwrap_or_else(|_| {
        chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
            .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ"))
            .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
            .map(|ndt| ndt.and_utc())
            .unwrap_or_else(|_| Utc::now())
    })
}

// ---------------------------------------------------------------------------
// Connection-level helpers (shared with Transaction)
// ---------------------------------------------------------------------------

/// Inserts a single task row using the provided connection.
pub(crate) fn insert_task_on_conn(conn: &Connection, task: &Task) -> Result<()> {
    let custom_str = match &task.custom {
        Some(map) if !map.is_empty() => serde_json::to_string(map)?,
        _ => "{}".to_string(),
    };

    let result = conn.execute(
        &format!(
            "INSERT INTO tasks ({TASK_COLUMNS}) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6,
                ?7, ?8, ?9, ?10, ?11,
                ?12, ?13, ?14,
                ?15, ?16, ?17
            )"
        ),
        params![
            task.id,
            task.title,
            task.description,
            task.notes,
            task.design,
            task.acceptance_criteria,
            task.status.as_str(),
            task.task_type.as_str(),
            task.priority,
            task.assignee,
            task.parent_id,
            task.source_repo,
            task.spec_id,
            custom_str,
            format_datetime(&task.created_at),
            format_datetime(&task.updated_at),
            task.closed_at.as_ref().map(format_datetime),
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(StorageError::DuplicateId {
            id: task.id.clone(),
        }),
        Err(e) => Err(StorageError::Query(e)),
    }
}

/// Returns `true` for SQLite primary-key / unique constraint violations.
pub(crate) fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Retrieves a single task by ID on the given connection.
pub(crate) fn get_task_on_conn(conn: &Connection, id: &str) -> Result<Task> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
    conn.query_row(&sql, params![id], scan_task)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StorageError::not_found("task", id),
            other => StorageError::Query(other),
        })
}

/// Returns `true` if a task exists, on the given connection.
pub(crate) fn task_exists_on_conn(conn: &Connection, id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM tasks WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Applies partial updates on the given connection.
///
/// An empty patch is a no-op; otherwise `updated_at` is bumped to the patch's
/// clock value (or now).
pub(crate) fn update_task_on_conn(conn: &Connection, id: &str, patch: &TaskPatch) -> Result<()> {
    if patch.is_empty() {
        return Ok(());
    }

    let mut set_clauses: Vec<String> = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    macro_rules! add_field {
        ($field:ident, $col:expr) => {
            if let Some(ref val) = patch.$field {
                set_clauses.push(format!("{} = ?", $col));
                param_values.push(Box::new(val.clone()));
            }
        };
    }

    add_field!(title, "title");
    add_field!(description, "description");
    add_field!(notes, "notes");
    add_field!(design, "design");
    add_field!(acceptance_criteria, "acceptance_criteria");
    add_field!(assignee, "assignee");
    add_field!(source_repo, "source_repo");
    add_field!(spec_id, "spec_id");

    if let Some(ref status) = patch.status {
        set_clauses.push("status = ?".to_string());
        param_values.push(Box::new(status.as_str().to_string()));
    }
    if let Some(ref task_type) = patch.task_type {
        set_clauses.push("task_type = ?".to_string());
        param_values.push(Box::new(task_type.as_str().to_string()));
    }
    if let Some(priority) = patch.priority {
        set_clauses.push("priority = ?".to_string());
        param_values.push(Box::new(priority));
    }

    // Option<Option<T>> fields: outer Some means "update", inner is the value.
    if let Some(ref parent) = patch.parent_id {
        set_clauses.push("parent_id = ?".to_string());
        param_values.push(Box::new(parent.clone()));
    }
    if let Some(ref closed) = patch.closed_at {
        set_clauses.push("closed_at = ?".to_string());
        param_values.push(Box::new(closed.as_ref().map(format_datetime)));
    }
    if let Some(ref custom) = patch.custom {
        let custom_str = if custom.is_empty() {
            "{}".to_string()
        } else {
            serde_json::to_string(custom)?
        };
        set_clauses.push("custom = ?".to_string());
        param_values.push(Box::new(custom_str));
    }
    if let Some(ref created) = patch.created_at {
        set_clauses.push("created_at = ?".to_string());
        param_values.push(Box::new(format_datetime(created)));
    }

    // At least one field present: bump updated_at.
    let now = patch.updated_at.unwrap_or_else(Utc::now);
    set_clauses.push("updated_at = ?".to_string());
    param_values.push(Box::new(format_datetime(&now)));

    let sql = format!("UPDATE tasks SET {} WHERE id = ?", set_clauses.join(", "));
    param_values.push(Box::new(id.to_string()));

    let param_refs: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();

    let affected = conn.execute(&sql, param_refs.as_slice())?;
    if affected == 0 {
        return Err(StorageError::not_found("task", id));
    }

    Ok(())
}

/// Deletes a task and all its dependent rows on the given connection.
///
/// Managed attachments decrement their blob refcounts first; incoming
/// dependency edges have no FK and are removed explicitly; everything else
/// cascades off the task row.
pub(crate) fn delete_task_on_conn(conn: &Connection, id: &str) -> Result<()> {
    // One decrement per attachment row, not per distinct blob: a task may
    // reference the same content twice.
    conn.execute(
        "UPDATE blobs SET ref_count = ref_count -
            (SELECT COUNT(*) FROM attachments
             WHERE attachments.task_id = ?1 AND attachments.blob_id = blobs.id)
         WHERE id IN (SELECT blob_id FROM attachments
                      WHERE task_id = ?1 AND blob_id IS NOT NULL)",
        params![id],
    )?;
    conn.execute(
        "DELETE FROM dependencies WHERE parent_id = ?1",
        params![id],
    )?;
    let affected = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
    if affected == 0 {
        return Err(StorageError::not_found("task", id));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// List query
// ---------------------------------------------------------------------------

/// Lists tasks on the given connection.
///
/// Most of the filter compiles to SQL; the spec-id regex and whole-word
/// search run as post-filters in Rust since SQLite has neither REGEXP nor a
/// portable word-boundary match. When a post-filter is active, limit/offset
/// are applied after it.
pub(crate) fn list_tasks_on_conn(conn: &Connection, filter: &TaskFilter) -> Result<Vec<Task>> {
    let mut where_clauses: Vec<String> = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    let mut param_idx = 1;

    macro_rules! push_param {
        ($clause:expr, $value:expr) => {
            where_clauses.push($clause);
            param_values.push(Box::new($value));
            param_idx += 1;
        };
    }

    if !filter.statuses.is_empty() {
        let placeholders: Vec<String> = filter
            .statuses
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", param_idx + i))
            .collect();
        where_clauses.push(format!("status IN ({})", placeholders.join(",")));
        for status in &filter.statuses {
            param_values.push(Box::new(status.as_str().to_string()));
        }
        param_idx += filter.statuses.len();
    }

    if !filter.types.is_empty() {
        let placeholders: Vec<String> = filter
            .types
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", param_idx + i))
            .collect();
        where_clauses.push(format!("task_type IN ({})", placeholders.join(",")));
        for t in &filter.types {
            param_values.push(Box::new(t.as_str().to_string()));
        }
        param_idx += filter.types.len();
    }

    if let Some(priority) = filter.priority {
        push_param!(format!("priority = ?{param_idx}"), priority);
    }
    if let Some(min) = filter.priority_min {
        push_param!(format!("priority >= ?{param_idx}"), min);
    }
    if let Some(max) = filter.priority_max {
        push_param!(format!("priority <= ?{param_idx}"), max);
    }
    if let Some(ref parent) = filter.parent_id {
        push_param!(format!("parent_id = ?{param_idx}"), parent.clone());
    }
    if let Some(ref assignee) = filter.assignee {
        push_param!(format!("assignee = ?{param_idx}"), assignee.clone());
    }
    if filter.no_assignee {
        where_clauses.push("(assignee IS NULL OR assignee = '')".to_string());
    }

    if !filter.ids.is_empty() {
        let placeholders: Vec<String> = filter
            .ids
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", param_idx + i))
            .collect();
        where_clauses.push(format!("id IN ({})", placeholders.join(",")));
        for id in &filter.ids {
            param_values.push(Box::new(id.clone()));
        }
        param_idx += filter.ids.len();
    }

    if let Some(ref needle) = filter.title_contains {
        push_param!(format!("title LIKE ?{param_idx}"), format!("%{needle}%"));
    }
    if let Some(ref needle) = filter.description_contains {
        push_param!(
            format!("description LIKE ?{param_idx}"),
            format!("%{needle}%")
        );
    }
    if let Some(ref needle) = filter.notes_contains {
        push_param!(format!("notes LIKE ?{param_idx}"), format!("%{needle}%"));
    }

    if let Some(ref t) = filter.created_after {
        push_param!(format!("created_at >= ?{param_idx}"), format_datetime(t));
    }
    if let Some(ref t) = filter.created_before {
        push_param!(format!("created_at <= ?{param_idx}"), format_datetime(t));
    }
    if let Some(ref t) = filter.updated_after {
        push_param!(format!("updated_at >= ?{param_idx}"), format_datetime(t));
    }
    if let Some(ref t) = filter.updated_before {
        push_param!(format!("updated_at <= ?{param_idx}"), format_datetime(t));
    }
    if let Some(ref t) = filter.closed_after {
        push_param!(
            format!("(closed_at IS NOT NULL AND closed_at >= ?{param_idx})"),
            format_datetime(t)
        );
    }
    if let Some(ref t) = filter.closed_before {
        push_param!(
            format!("(closed_at IS NOT NULL AND closed_at <= ?{param_idx})"),
            format_datetime(t)
        );
    }

    if filter.empty_description {
        where_clauses.push("(description IS NULL OR description = '')".to_string());
    }
    if filter.no_labels {
        where_clauses
            .push("NOT EXISTS (SELECT 1 FROM labels WHERE labels.task_id = tasks.id)".to_string());
    }

    // Labels AND.
    for label in &filter.labels {
        push_param!(
            format!(
                "EXISTS (SELECT 1 FROM labels WHERE labels.task_id = tasks.id AND labels.label = ?{param_idx})"
            ),
            label.clone()
        );
    }

    // Labels OR.
    if !filter.labels_any.is_empty() {
        let placeholders: Vec<String> = filter
            .labels_any
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", param_idx + i))
            .collect();
        where_clauses.push(format!(
            "EXISTS (SELECT 1 FROM labels WHERE labels.task_id = tasks.id AND labels.label IN ({}))",
            placeholders.join(",")
        ));
        for label in &filter.labels_any {
            param_values.push(Box::new(label.clone()));
        }
        param_idx += filter.labels_any.len();
    }

    // Search prefilter: every term must appear somewhere as a substring; the
    // whole-word check happens below.
    let search_terms = filter.search.as_deref().map(search_terms).unwrap_or_default();
    for term in &search_terms {
        push_param!(
            format!(
                "(title LIKE ?{pi} OR description LIKE ?{pi} OR notes LIKE ?{pi})",
                pi = param_idx
            ),
            format!("%{term}%")
        );
    }

    let where_sql = if where_clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", where_clauses.join(" AND "))
    };

    let post_filtering = filter.spec_pattern.is_some() || !search_terms.is_empty();

    let mut tail = String::new();
    if !post_filtering {
        if let Some(limit) = filter.limit {
            tail.push_str(&format!(" LIMIT {limit}"));
            if let Some(offset) = filter.offset {
                tail.push_str(&format!(" OFFSET {offset}"));
            }
        }
    }

    let sql = format!(
        "SELECT {TASK_COLUMNS} FROM tasks {where_sql} ORDER BY created_at DESC, id{tail}"
    );

    let param_refs: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), scan_task)?;

    let mut tasks = Vec::new();
    for row in rows {
        tasks.push(row?);
    }

    let _ = param_idx;

    if !post_filtering {
        return Ok(tasks);
    }

    // Spec-id regex (POSIX-style, case-sensitive).
    if let Some(ref pattern) = filter.spec_pattern {
        let re = regex::Regex::new(pattern)
            .map_err(|e| StorageError::validation(format!("invalid spec pattern: {e}")))?;
        tasks.retain(|t| re.is_match(&t.spec_id));
    }

    // Whole-word search with ranking: title hits sort before body hits,
    // non-matches are dropped.
    if !search_terms.is_empty() {
        let mut ranked: Vec<(u8, Task)> = tasks
            .into_iter()
            .filter_map(|t| search_rank(&t, &search_terms).map(|rank| (rank, t)))
            .collect();
        ranked.sort_by(|a, b| a.0.cmp(&b.0));
        tasks = ranked.into_iter().map(|(_, t)| t).collect();
    }

    let offset = filter.offset.unwrap_or(0).max(0) as usize;
    let tasks: Vec<Task> = match filter.limit {
        Some(limit) => tasks
            .into_iter()
            .skip(offset)
            .take(limit.max(0) as usize)
            .collect(),
        None => tasks.into_iter().skip(offset).collect(),
    };

    Ok(tasks)
}

// ---------------------------------------------------------------------------
// Whole-word search helpers
// ---------------------------------------------------------------------------

/// Splits a search query into terms. A quoted query is one phrase term.
pub(crate) fn search_terms(query: &str) -> Vec<String> {
    let trimmed = query.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        let phrase = trimmed[1..trimmed.len() - 1].trim();
        if phrase.is_empty() {
            return Vec::new();
        }
        return vec![phrase.to_lowercase()];
    }
    trimmed
        .split_whitespace()
        .map(str::to_lowercase)
        .collect()
}

/// Returns `true` if `term` occurs in `haystack` bounded by non-alphanumeric
/// characters (or string edges). Comparison is case-insensitive.
pub(crate) fn word_match(haystack: &str, term: &str) -> bool {
    if term.is_empty() {
        return false;
    }
    let haystack = haystack.to_lowercase();
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(term) {
        let begin = start + pos;
        let end = begin + term.len();
        let left_ok = begin == 0
            || !haystack[..begin]
                .chars()
                .next_back()
                .is_some_and(char::is_alphanumeric);
        let right_ok = end == haystack.len()
            || !haystack[end..].chars().next().is_some_and(char::is_alphanumeric);
        if left_ok && right_ok {
            return true;
        }
        start = begin + 1;
        if start >= haystack.len() {
            break;
        }
    }
    false
}

/// Ranks a task against search terms: `Some(0)` when every term matches and
/// at least one hits the title, `Some(1)` for body-only matches, `None` when
/// any term misses.
pub(crate) fn search_rank(task: &Task, terms: &[String]) -> Option<u8> {
    let mut any_title = false;
    for term in terms {
        let in_title = word_match(&task.title, term);
        let in_body = word_match(&task.description, term) || word_match(&task.notes, term);
        if !in_title && !in_body {
            return None;
        }
        any_title |= in_title;
    }
    Some(if any_title { 0 } else { 1 })
}

// ---------------------------------------------------------------------------
// SqliteStore task methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    pub fn create_task_impl(&self, task: &Task) -> Result<()> {
        let conn = self.lock_conn()?;
        insert_task_on_conn(&conn, task)
    }

    pub fn get_task_impl(&self, id: &str) -> Result<Task> {
        let conn = self.lock_conn()?;
        get_task_on_conn(&conn, id)
    }

    pub fn task_exists_impl(&self, id: &str) -> Result<bool> {
        let conn = self.lock_conn()?;
        task_exists_on_conn(&conn, id)
    }

    pub fn get_tasks_by_ids_impl(&self, ids: &[String]) -> Result<Vec<Task>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock_conn()?;
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id IN ({placeholders})");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), scan_task)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    pub fn update_task_impl(&self, id: &str, patch: &TaskPatch) -> Result<()> {
        let conn = self.lock_conn()?;
        update_task_on_conn(&conn, id, patch)
    }

    pub fn delete_task_impl(&self, id: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        delete_task_on_conn(&conn, id)
    }

    pub fn list_tasks_impl(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let conn = self.lock_conn()?;
        list_tasks_on_conn(&conn, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grns_core::enums::Status;
    use grns_core::task::TaskBuilder;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn create_and_get_task() {
        let store = test_store();
        let task = TaskBuilder::new("Test task")
            .id("gr-t2st")
            .description("A test description")
            .priority(2)
            .build();

        store.create_task_impl(&task).unwrap();

        let got = store.get_task_impl("gr-t2st").unwrap();
        assert_eq!(got.title, "Test task");
        assert_eq!(got.description, "A test description");
        assert_eq!(got.priority, 2);
    }

    #[test]
    fn duplicate_id_rejected() {
        let store = test_store();
        let task = TaskBuilder::new("First").id("gr-dup2").build();
        store.create_task_impl(&task).unwrap();
        let err = store.create_task_impl(&task).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateId { .. }));
    }

    #[test]
    fn get_nonexistent_task_returns_not_found() {
        let store = test_store();
        let err = store.get_task_impl("gr-nope").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn update_task_partial() {
        let store = test_store();
        let task = TaskBuilder::new("Original title").id("gr-upd2").build();
        store.create_task_impl(&task).unwrap();

        let patch = TaskPatch {
            title: Some("Updated title".into()),
            priority: Some(3),
            updated_at: Some(Utc::now()),
            ..Default::default()
        };
        store.update_task_impl("gr-upd2", &patch).unwrap();

        let got = store.get_task_impl("gr-upd2").unwrap();
        assert_eq!(got.title, "Updated title");
        assert_eq!(got.priority, 3);
        assert!(got.updated_at >= task.updated_at);
    }

    #[test]
    fn empty_patch_is_noop() {
        let store = test_store();
        let task = TaskBuilder::new("Keep me").id("gr-noop").build();
        store.create_task_impl(&task).unwrap();
        let before = store.get_task_impl("gr-noop").unwrap();

        store
            .update_task_impl("gr-noop", &TaskPatch::default())
            .unwrap();
        let after = store.get_task_impl("gr-noop").unwrap();
        assert_eq!(before.updated_at, after.updated_at);
    }

    #[test]
    fn custom_roundtrip_and_clear() {
        let store = test_store();
        let mut map = Map::new();
        map.insert("team".into(), Value::String("storage".into()));
        let task = TaskBuilder::new("Custom").id("gr-cst2").custom(map).build();
        store.create_task_impl(&task).unwrap();

        let got = store.get_task_impl("gr-cst2").unwrap();
        assert_eq!(
            got.custom.as_ref().and_then(|m| m.get("team")),
            Some(&Value::String("storage".into()))
        );

        // Empty map clears.
        let patch = TaskPatch {
            custom: Some(Map::new()),
            ..Default::default()
        };
        store.update_task_impl("gr-cst2", &patch).unwrap();
        let got = store.get_task_impl("gr-cst2").unwrap();
        assert!(got.custom.is_none());
    }

    #[test]
    fn list_by_status_and_limit() {
        let store = test_store();
        for i in 0..5 {
            let task = TaskBuilder::new(format!("Task {i}"))
                .id(format!("gr-l{i}00"))
                .status(if i % 2 == 0 { Status::Open } else { Status::Closed })
                .build();
            store.create_task_impl(&task).unwrap();
        }

        let filter = TaskFilter {
            statuses: vec![Status::Open],
            limit: Some(2),
            ..Default::default()
        };
        let tasks = store.list_tasks_impl(&filter).unwrap();
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|t| t.status == Status::Open));
    }

    #[test]
    fn list_with_spec_pattern() {
        let store = test_store();
        let a = TaskBuilder::new("A").id("gr-sp21").spec_id("SPEC-001").build();
        let b = TaskBuilder::new("B").id("gr-sp22").spec_id("OTHER-9").build();
        store.create_task_impl(&a).unwrap();
        store.create_task_impl(&b).unwrap();

        let filter = TaskFilter {
            spec_pattern: Some("^SPEC-[0-9]+$".into()),
            ..Default::default()
        };
        let tasks = store.list_tasks_impl(&filter).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "gr-sp21");
    }

    #[test]
    fn word_match_boundaries() {
        assert!(word_match("fix the login bug", "login"));
        assert!(word_match("Login broken", "login"));
        assert!(word_match("bug (login)", "login"));
        assert!(!word_match("loginserver down", "login"));
        assert!(!word_match("relogin required", "login"));
    }

    #[test]
    fn search_ranks_title_before_body() {
        let store = test_store();
        let body = TaskBuilder::new("Unrelated title")
            .id("gr-se21")
            .description("crash in the parser")
            .build();
        let title = TaskBuilder::new("Parser crash").id("gr-se22").build();
        let miss = TaskBuilder::new("Nothing here").id("gr-se23").build();
        store.create_task_impl(&body).unwrap();
        store.create_task_impl(&title).unwrap();
        store.create_task_impl(&miss).unwrap();

        let filter = TaskFilter {
            search: Some("parser".into()),
            ..Default::default()
        };
        let tasks = store.list_tasks_impl(&filter).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, "gr-se22");
        assert_eq!(tasks[1].id, "gr-se21");
    }

    #[test]
    fn search_phrase() {
        let store = test_store();
        let a = TaskBuilder::new("null pointer dereference").id("gr-ph21").build();
        let b = TaskBuilder::new("pointer is null sometimes").id("gr-ph22").build();
        store.create_task_impl(&a).unwrap();
        store.create_task_impl(&b).unwrap();

        let filter = TaskFilter {
            search: Some("\"null pointer\"".into()),
            ..Default::default()
        };
        let tasks = store.list_tasks_impl(&filter).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "gr-ph21");
    }
}
