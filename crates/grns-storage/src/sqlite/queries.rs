//! Work queries: ready tasks, stale tasks, cleanup candidates, statistics.

use chrono::{DateTime, Duration, Utc};

use grns_core::filter::{ReadyFilter, StaleFilter};
use grns_core::task::Task;

use crate::error::Result;
use crate::sqlite::store::SqliteStore;
use crate::sqlite::tasks::{TASK_COLUMNS, format_datetime, scan_task};
use crate::traits::StoreStats;

/// Statuses that do not require `closed_at`; inlined into several queries.
const NON_TERMINAL_SQL: &str = "tasks.status != 'closed'";

impl SqliteStore {
    /// Returns tasks that are ready to work on.
    ///
    /// A task is ready if its status is non-terminal and every `blocks`
    /// parent is terminal. Edges pointing at ids with no task row do not
    /// block. Ordered by `(priority DESC, updated_at DESC)`.
    pub fn ready_tasks_impl(&self, filter: &ReadyFilter) -> Result<Vec<Task>> {
        let conn = self.lock_conn()?;

        let mut where_clauses: Vec<String> = vec![NON_TERMINAL_SQL.to_string()];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut param_idx = 1;

        where_clauses.push(
            "NOT EXISTS (
                SELECT 1 FROM dependencies d
                INNER JOIN tasks blocker ON blocker.id = d.parent_id
                WHERE d.child_id = tasks.id
                  AND d.type = 'blocks'
                  AND blocker.status != 'closed'
            )"
            .to_string(),
        );

        if let Some(ref assignee) = filter.assignee {
            where_clauses.push(format!("tasks.assignee = ?{param_idx}"));
            param_values.push(Box::new(assignee.clone()));
            param_idx += 1;
        }

        let where_sql = where_clauses.join(" AND ");
        let limit_sql = filter
            .limit
            .map(|l| format!(" LIMIT {l}"))
            .unwrap_or_default();

        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE {where_sql}
             ORDER BY priority DESC, updated_at DESC{limit_sql}"
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
        Ok(tasks)
    }

    /// Returns tasks whose `updated_at` is older than `now - days`.
    ///
    /// An explicit status filter narrows to that status; otherwise any
    /// non-terminal task qualifies.
    pub fn stale_tasks_impl(&self, filter: &StaleFilter, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let conn = self.lock_conn()?;

        let cutoff = now - Duration::days(filter.days);
        let mut where_clauses: Vec<String> = vec!["tasks.updated_at < ?1".to_string()];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(format_datetime(&cutoff))];

        match filter.status {
            Some(ref status) => {
                where_clauses.push("tasks.status = ?2".to_string());
                param_values.push(Box::new(status.as_str().to_string()));
            }
            None => where_clauses.push(NON_TERMINAL_SQL.to_string()),
        }

        let where_sql = where_clauses.join(" AND ");
        let limit_sql = filter
            .limit
            .map(|l| format!(" LIMIT {l}"))
            .unwrap_or_default();

        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE {where_sql}
             ORDER BY updated_at ASC{limit_sql}"
        );

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), scan_task)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    /// Returns ids of closed tasks whose last activity (the later of
    /// `updated_at` and `closed_at`) is before `cutoff`.
    ///
    /// The project filter matches the id's prefix segment exactly: a task id
    /// belongs to project `gr` iff it starts with `gr-`.
    pub fn cleanup_candidates_impl(
        &self,
        cutoff: DateTime<Utc>,
        project: Option<&str>,
    ) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;

        let cutoff_str = format_datetime(&cutoff);
        let mut where_clauses: Vec<String> = vec![
            "status = 'closed'".to_string(),
            "MAX(updated_at, COALESCE(closed_at, updated_at)) < ?1".to_string(),
        ];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(cutoff_str)];

        if let Some(project) = project {
            where_clauses.push("id LIKE ?2".to_string());
            param_values.push(Box::new(format!("{project}-%")));
        }

        let sql = format!(
            "SELECT id FROM tasks WHERE {} ORDER BY id",
            where_clauses.join(" AND ")
        );

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Ordered `(created_at, id)` id list for export.
    pub fn export_task_ids_impl(&self) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT id FROM tasks ORDER BY created_at, id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Aggregate counts for `/info`.
    pub fn stats_impl(&self) -> Result<StoreStats> {
        let conn = self.lock_conn()?;
        let mut stats = StoreStats::default();

        stats.total_tasks = conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;

        {
            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*) FROM tasks GROUP BY status ORDER BY status",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                stats.by_status.push(row?);
            }
        }

        {
            let mut stmt = conn.prepare(
                "SELECT task_type, COUNT(*) FROM tasks GROUP BY task_type ORDER BY task_type",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                stats.by_type.push(row?);
            }
        }

        let (blob_count, blob_total_bytes): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM blobs",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        stats.blob_count = blob_count;
        stats.blob_total_bytes = blob_total_bytes;

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grns_core::dependency::Dependency;
    use grns_core::enums::{Status, TaskType};
    use grns_core::task::TaskBuilder;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn ready_excludes_blocked_children() {
        let store = test_store();
        let parent = TaskBuilder::new("Parent").id("gr-rd2a").build();
        let child = TaskBuilder::new("Child").id("gr-rd2b").build();
        store.create_task_impl(&parent).unwrap();
        store.create_task_impl(&child).unwrap();
        store
            .add_dependency_impl(&Dependency::blocks("gr-rd2b", "gr-rd2a"), Utc::now())
            .unwrap();

        let ready = store.ready_tasks_impl(&ReadyFilter::default()).unwrap();
        let ids: Vec<&str> = ready.iter().map(|t| t.id.as_str()).collect();
        assert!(ids.contains(&"gr-rd2a"));
        assert!(!ids.contains(&"gr-rd2b"));
    }

    #[test]
    fn closing_parent_frees_child() {
        let store = test_store();
        let parent = TaskBuilder::new("Parent").id("gr-rd2c").build();
        let child = TaskBuilder::new("Child").id("gr-rd2d").build();
        store.create_task_impl(&parent).unwrap();
        store.create_task_impl(&child).unwrap();
        store
            .add_dependency_impl(&Dependency::blocks("gr-rd2d", "gr-rd2c"), Utc::now())
            .unwrap();

        let patch = crate::traits::TaskPatch {
            status: Some(Status::Closed),
            closed_at: Some(Some(Utc::now())),
            updated_at: Some(Utc::now()),
            ..Default::default()
        };
        store.update_task_impl("gr-rd2c", &patch).unwrap();

        let ready = store.ready_tasks_impl(&ReadyFilter::default()).unwrap();
        let ids: Vec<&str> = ready.iter().map(|t| t.id.as_str()).collect();
        assert!(ids.contains(&"gr-rd2d"));
        assert!(!ids.contains(&"gr-rd2c"));
    }

    #[test]
    fn related_edges_do_not_block() {
        let store = test_store();
        let a = TaskBuilder::new("A").id("gr-rd2e").build();
        let b = TaskBuilder::new("B").id("gr-rd2f").build();
        store.create_task_impl(&a).unwrap();
        store.create_task_impl(&b).unwrap();
        let dep = Dependency {
            dep_type: grns_core::enums::DepType::Related,
            ..Dependency::blocks("gr-rd2f", "gr-rd2e")
        };
        store.add_dependency_impl(&dep, Utc::now()).unwrap();

        let ready = store.ready_tasks_impl(&ReadyFilter::default()).unwrap();
        assert_eq!(ready.len(), 2);
    }

    #[test]
    fn ready_orders_by_priority_then_recency() {
        let store = test_store();
        let low = TaskBuilder::new("Low").id("gr-or2a").priority(1).build();
        let high = TaskBuilder::new("High").id("gr-or2b").priority(4).build();
        store.create_task_impl(&low).unwrap();
        store.create_task_impl(&high).unwrap();

        let ready = store.ready_tasks_impl(&ReadyFilter::default()).unwrap();
        assert_eq!(ready[0].id, "gr-or2b");
        assert_eq!(ready[1].id, "gr-or2a");
    }

    #[test]
    fn stale_respects_cutoff_and_status() {
        let store = test_store();
        let old_time = Utc::now() - Duration::days(40);
        let old = TaskBuilder::new("Old")
            .id("gr-st2a")
            .created_at(old_time)
            .updated_at(old_time)
            .build();
        let fresh = TaskBuilder::new("Fresh").id("gr-st2b").build();
        store.create_task_impl(&old).unwrap();
        store.create_task_impl(&fresh).unwrap();

        let stale = store
            .stale_tasks_impl(&StaleFilter::default(), Utc::now())
            .unwrap();
        let ids: Vec<&str> = stale.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["gr-st2a"]);

        let filtered = store
            .stale_tasks_impl(
                &StaleFilter {
                    days: 30,
                    status: Some(Status::InProgress),
                    limit: None,
                },
                Utc::now(),
            )
            .unwrap();
        assert!(filtered.is_empty());
    }

    #[test]
    fn cleanup_candidates_project_scoped() {
        let store = test_store();
        let old_time = Utc::now() - Duration::days(100);
        for id in ["gr-cl2a", "grx-cl2b"] {
            let task = TaskBuilder::new("Closed old")
                .id(id)
                .status(Status::Closed)
                .created_at(old_time)
                .updated_at(old_time)
                .closed_at(old_time)
                .build();
            store.create_task_impl(&task).unwrap();
        }

        let cutoff = Utc::now() - Duration::days(30);
        let all = store.cleanup_candidates_impl(cutoff, None).unwrap();
        assert_eq!(all.len(), 2);

        // Tasks under another prefix must survive a project-scoped run.
        let scoped = store.cleanup_candidates_impl(cutoff, Some("gr")).unwrap();
        assert_eq!(scoped, vec!["gr-cl2a"]);
    }

    #[test]
    fn cleanup_ignores_open_tasks() {
        let store = test_store();
        let old_time = Utc::now() - Duration::days(100);
        let open = TaskBuilder::new("Open old")
            .id("gr-cl2c")
            .created_at(old_time)
            .updated_at(old_time)
            .build();
        store.create_task_impl(&open).unwrap();

        let cutoff = Utc::now() - Duration::days(30);
        assert!(store.cleanup_candidates_impl(cutoff, None).unwrap().is_empty());
    }

    #[test]
    fn stats_counts_by_status_and_type() {
        let store = test_store();
        for (id, status, task_type) in [
            ("gr-in2a", Status::Open, TaskType::Task),
            ("gr-in2b", Status::Open, TaskType::Bug),
            ("gr-in2c", Status::Closed, TaskType::Bug),
        ] {
            let mut builder = TaskBuilder::new("T")
                .id(id)
                .status(status.clone())
                .task_type(task_type);
            if status.is_terminal() {
                builder = builder.closed_at(Utc::now());
            }
            store.create_task_impl(&builder.build()).unwrap();
        }

        let stats = store.stats_impl().unwrap();
        assert_eq!(stats.total_tasks, 3);
        assert!(stats.by_status.contains(&("open".to_string(), 2)));
        assert!(stats.by_status.contains(&("closed".to_string(), 1)));
        assert!(stats.by_type.contains(&("bug".to_string(), 2)));
        assert!(stats.by_type.contains(&("task".to_string(), 1)));
    }
}
