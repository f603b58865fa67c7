//! Dependency operations and cycle detection for [`SqliteStore`].

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use grns_core::dependency::{DepEntry, Dependency, TreeDirection};
use grns_core::enums::DepType;

use crate::error::{Result, StorageError};
use crate::sqlite::labels::bump_updated_at;
use crate::sqlite::store::SqliteStore;
use crate::sqlite::tasks::{format_datetime, get_task_on_conn, parse_datetime};
use crate::traits::TreeNode;

// ---------------------------------------------------------------------------
// Connection-level helpers
// ---------------------------------------------------------------------------

/// Inserts a dependency edge on the given connection, rejecting cycles.
///
/// The edge set must stay a DAG regardless of edge type. Re-adding an
/// existing edge is a no-op that does not bump `updated_at`.
pub(crate) fn add_dependency_on_conn(
    conn: &Connection,
    dep: &Dependency,
    now: DateTime<Utc>,
) -> Result<()> {
    detect_cycle(conn, &dep.child_id, &dep.parent_id)?;

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO dependencies (child_id, parent_id, type, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            dep.child_id,
            dep.parent_id,
            dep.dep_type.as_str(),
            format_datetime(&dep.created_at),
        ],
    )?;

    if inserted > 0 {
        bump_updated_at(conn, &dep.child_id, now)?;
    }
    Ok(())
}

/// Replaces a task's outgoing edges wholesale (import overwrite).
pub(crate) fn replace_deps_on_conn(
    conn: &Connection,
    task_id: &str,
    deps: &[DepEntry],
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "DELETE FROM dependencies WHERE child_id = ?1",
        params![task_id],
    )?;
    for entry in deps {
        let dep = Dependency {
            child_id: task_id.to_owned(),
            parent_id: entry.parent_id.clone(),
            dep_type: entry.dep_type.clone(),
            created_at: now,
        };
        add_dependency_on_conn(conn, &dep, now)?;
    }
    bump_updated_at(conn, task_id, now)?;
    Ok(())
}

/// Returns a task's outgoing edges on the given connection.
pub(crate) fn get_dependencies_on_conn(
    conn: &Connection,
    task_id: &str,
) -> Result<Vec<Dependency>> {
    scan_edges(
        conn,
        "SELECT child_id, parent_id, type, created_at FROM dependencies
         WHERE child_id = ?1 ORDER BY created_at, parent_id",
        task_id,
    )
}

/// Returns a task's incoming edges on the given connection.
pub(crate) fn get_dependents_on_conn(conn: &Connection, task_id: &str) -> Result<Vec<Dependency>> {
    scan_edges(
        conn,
        "SELECT child_id, parent_id, type, created_at FROM dependencies
         WHERE parent_id = ?1 ORDER BY created_at, child_id",
        task_id,
    )
}

fn scan_edges(conn: &Connection, sql: &str, task_id: &str) -> Result<Vec<Dependency>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![task_id], |row| {
        Ok(Dependency {
            child_id: row.get("child_id")?,
            parent_id: row.get("parent_id")?,
            dep_type: DepType::from(row.get::<_, String>("type")?),
            created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        })
    })?;

    let mut deps = Vec::new();
    for row in rows {
        deps.push(row?);
    }
    Ok(deps)
}

// ---------------------------------------------------------------------------
// Cycle detection
// ---------------------------------------------------------------------------

/// Detects whether adding an edge `child -> parent` would create a cycle.
///
/// BFS from `parent` over outgoing edges; if `child` is reachable, the new
/// edge would close a loop. The error names the offending edge.
fn detect_cycle(conn: &Connection, child_id: &str, parent_id: &str) -> Result<()> {
    if child_id == parent_id {
        return Err(StorageError::CycleDetected {
            child_id: child_id.to_owned(),
            parent_id: parent_id.to_owned(),
        });
    }

    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(parent_id.to_owned());

    while let Some(current) = queue.pop_front() {
        if current == child_id {
            return Err(StorageError::CycleDetected {
                child_id: child_id.to_owned(),
                parent_id: parent_id.to_owned(),
            });
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        let mut stmt =
            conn.prepare_cached("SELECT parent_id FROM dependencies WHERE child_id = ?1")?;
        let rows = stmt.query_map(params![current], |row| row.get::<_, String>(0))?;
        for row in rows {
            let next = row?;
            if !visited.contains(&next) {
                queue.push_back(next);
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    pub fn add_dependency_impl(&self, dep: &Dependency, now: DateTime<Utc>) -> Result<()> {
        let conn = self.lock_conn()?;
        add_dependency_on_conn(&conn, dep, now)
    }

    pub fn get_dependencies_impl(&self, task_id: &str) -> Result<Vec<Dependency>> {
        let conn = self.lock_conn()?;
        get_dependencies_on_conn(&conn, task_id)
    }

    pub fn get_dependents_impl(&self, task_id: &str) -> Result<Vec<Dependency>> {
        let conn = self.lock_conn()?;
        get_dependents_on_conn(&conn, task_id)
    }

    /// Traverses the dependency graph both ways from a root.
    ///
    /// Upstream nodes are the (transitive) parents; downstream nodes the
    /// (transitive) children. The root itself is the first node, at depth 0.
    pub fn dependency_tree_impl(&self, task_id: &str, max_depth: i32) -> Result<Vec<TreeNode>> {
        let conn = self.lock_conn()?;

        let root = get_task_on_conn(&conn, task_id)?;
        let mut result = vec![TreeNode {
            task: root,
            depth: 0,
            direction: TreeDirection::Upstream,
            dep_type: DepType::Blocks,
        }];

        for direction in [TreeDirection::Upstream, TreeDirection::Downstream] {
            let mut visited: HashSet<String> = HashSet::new();
            visited.insert(task_id.to_owned());
            let mut queue: VecDeque<(String, i32)> = VecDeque::new();
            queue.push_back((task_id.to_owned(), 0));

            let sql = match direction {
                TreeDirection::Upstream => {
                    "SELECT parent_id, type FROM dependencies WHERE child_id = ?1"
                }
                TreeDirection::Downstream => {
                    "SELECT child_id, type FROM dependencies WHERE parent_id = ?1"
                }
            };

            while let Some((current, depth)) = queue.pop_front() {
                if depth >= max_depth {
                    continue;
                }

                let mut stmt = conn.prepare(sql)?;
                let edges: Vec<(String, String)> = stmt
                    .query_map(params![current], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })?
                    .filter_map(std::result::Result::ok)
                    .collect();

                for (next_id, dep_type_str) in edges {
                    if !visited.insert(next_id.clone()) {
                        continue;
                    }
                    // Orphan edges point at ids with no task row; skip them.
                    if let Ok(task) = get_task_on_conn(&conn, &next_id) {
                        result.push(TreeNode {
                            task,
                            depth: depth + 1,
                            direction,
                            dep_type: DepType::from(dep_type_str),
                        });
                        queue.push_back((next_id, depth + 1));
                    }
                }
            }
        }

        Ok(result)
    }
}
