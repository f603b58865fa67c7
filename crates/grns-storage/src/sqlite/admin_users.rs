//! Admin user operations for [`SqliteStore`].
//!
//! Usernames arrive normalized (lowercase, trimmed) from the service layer;
//! uniqueness is enforced by the database. Password hashes are opaque strings
//! here -- verification happens in the auth module, not in storage.

use rusqlite::{Row, params};

use grns_core::admin::AdminUser;

use crate::error::{Result, StorageError};
use crate::sqlite::store::{SqliteStore, new_entity_id};
use crate::sqlite::tasks::{format_datetime, is_unique_violation, parse_datetime};

fn scan_admin_user(row: &Row<'_>) -> rusqlite::Result<AdminUser> {
    let disabled: i64 = row.get("disabled")?;
    let created_at_str: String = row.get("created_at")?;
    Ok(AdminUser {
        id: row.get("id")?,
        username: row.get("username")?,
        password_hash: row.get("password_hash")?,
        role: row.get("role")?,
        disabled: disabled != 0,
        created_at: parse_datetime(&created_at_str),
    })
}

impl SqliteStore {
    pub fn create_admin_user_impl(&self, user: &AdminUser) -> Result<AdminUser> {
        let conn = self.lock_conn()?;

        let mut stored = user.clone();
        if stored.id.is_empty() {
            stored.id = new_entity_id("usr", &stored.username);
        }

        let result = conn.execute(
            "INSERT INTO admin_users (id, username, password_hash, role, disabled, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                stored.id,
                stored.username,
                stored.password_hash,
                stored.role,
                stored.disabled as i64,
                format_datetime(&stored.created_at),
            ],
        );

        match result {
            Ok(_) => Ok(stored),
            Err(e) if is_unique_violation(&e) => Err(StorageError::conflict(format!(
                "admin user already exists: {}",
                stored.username
            ))),
            Err(e) => Err(StorageError::Query(e)),
        }
    }

    pub fn get_admin_user_impl(&self, username: &str) -> Result<AdminUser> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT id, username, password_hash, role, disabled, created_at
             FROM admin_users WHERE username = ?1",
            params![username],
            scan_admin_user,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StorageError::not_found("admin user", username),
            other => StorageError::Query(other),
        })
    }

    pub fn list_admin_users_impl(&self) -> Result<Vec<AdminUser>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, username, password_hash, role, disabled, created_at
             FROM admin_users ORDER BY username",
        )?;
        let rows = stmt.query_map([], scan_admin_user)?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    pub fn set_admin_user_disabled_impl(&self, username: &str, disabled: bool) -> Result<()> {
        let conn = self.lock_conn()?;
        let affected = conn.execute(
            "UPDATE admin_users SET disabled = ?1 WHERE username = ?2",
            params![disabled as i64, username],
        )?;
        if affected == 0 {
            return Err(StorageError::not_found("admin user", username));
        }
        Ok(())
    }

    pub fn delete_admin_user_impl(&self, username: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        let affected = conn.execute(
            "DELETE FROM admin_users WHERE username = ?1",
            params![username],
        )?;
        if affected == 0 {
            return Err(StorageError::not_found("admin user", username));
        }
        Ok(())
    }
}
