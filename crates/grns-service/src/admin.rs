//! Admin operations: cleanup, blob garbage collection, admin users.

use std::time::{Duration, Instant};

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use grns_core::admin::{AdminUser, normalize_username};
use grns_core::cancel::CancelToken;

use crate::error::{Result, ServiceError};
use crate::service::TaskService;

/// Failed-login window length.
const LOGIN_WINDOW: Duration = Duration::from_secs(60);
/// Failed logins tolerated per username per window.
const LOGIN_MAX_FAILURES: u32 = 5;

/// Result of an admin cleanup run.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub count: usize,
    pub dry_run: bool,
    pub task_ids: Vec<String>,
}

/// Result of a blob GC run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GcReport {
    pub candidate_count: u64,
    pub deleted_count: u64,
    pub failed_count: u64,
    pub reclaimed_bytes: u64,
    pub dry_run: bool,
}

impl TaskService {
    // -- Cleanup -------------------------------------------------------------

    /// Deletes closed tasks whose last activity predates the cutoff.
    ///
    /// The project filter only touches ids under that prefix; a dry run
    /// returns the candidate ids without deleting anything. The real run
    /// removes every selected task and its dependent rows in one
    /// transaction; freed blobs wait for [`TaskService::blob_gc`].
    pub fn cleanup(
        &self,
        older_than_days: i64,
        project: Option<&str>,
        dry_run: bool,
        cancel: &CancelToken,
    ) -> Result<CleanupReport> {
        if older_than_days <= 0 {
            return Err(ServiceError::invalid("older_than_days must be positive"));
        }
        cancel.check()?;

        let cutoff = Utc::now() - chrono::Duration::days(older_than_days);
        let task_ids = self.store.cleanup_candidates(cutoff, project)?;

        if dry_run {
            return Ok(CleanupReport {
                count: task_ids.len(),
                dry_run: true,
                task_ids,
            });
        }

        self.store.run_in_transaction(&|tx| {
            for id in &task_ids {
                tx.delete_task(id)?;
            }
            Ok(())
        })?;

        info!(count = task_ids.len(), "cleanup removed closed tasks");
        Ok(CleanupReport {
            count: task_ids.len(),
            dry_run: false,
            task_ids,
        })
    }

    // -- Blob GC -------------------------------------------------------------

    /// Removes blob files whose refcount reached zero.
    ///
    /// Runs in batches so a long GC never monopolizes the store lock. File
    /// deletion failures are counted and the refcount row is kept so a later
    /// pass can retry.
    pub fn blob_gc(
        &self,
        dry_run: bool,
        batch_size: Option<i64>,
        cancel: &CancelToken,
    ) -> Result<GcReport> {
        let batch_size = batch_size
            .unwrap_or(self.options.gc_batch_size)
            .clamp(1, 10_000);
        let mut report = GcReport {
            dry_run,
            ..GcReport::default()
        };

        if dry_run {
            cancel.check()?;
            report.candidate_count = self.store.zero_ref_blobs(i64::MAX)?.len() as u64;
            return Ok(report);
        }

        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
        loop {
            cancel.check()?;
            let batch = self.store.zero_ref_blobs(batch_size)?;
            // Rows whose file delete failed stay behind; without the seen
            // guard they would be re-fetched forever.
            let fresh: Vec<_> = batch
                .into_iter()
                .filter(|b| seen.insert(b.id.clone()))
                .collect();
            if fresh.is_empty() {
                break;
            }
            report.candidate_count += fresh.len() as u64;

            for blob in &fresh {
                cancel.check()?;
                match self.blobs().delete(&blob.id) {
                    Ok(()) => {
                        self.store.delete_blob_row(&blob.id)?;
                        report.deleted_count += 1;
                        report.reclaimed_bytes += blob.size_bytes.max(0) as u64;
                    }
                    Err(e) => {
                        warn!(blob = %blob.id, error = %e, "blob GC failed to delete file");
                        report.failed_count += 1;
                    }
                }
            }
        }

        info!(
            candidates = report.candidate_count,
            deleted = report.deleted_count,
            failed = report.failed_count,
            reclaimed = report.reclaimed_bytes,
            dry_run,
            "blob GC finished"
        );
        Ok(report)
    }

    // -- Admin users ----------------------------------------------------------

    /// Creates an admin user with an argon2-hashed password.
    pub fn create_admin_user(&self, username: &str, password: &str, role: &str) -> Result<AdminUser> {
        let username = normalize_username(username);
        if username.is_empty() {
            return Err(ServiceError::invalid("username is required"));
        }
        if password.len() < 8 {
            return Err(ServiceError::invalid(
                "password must be at least 8 characters",
            ));
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| ServiceError::internal(format!("password hashing failed: {e}")))?
            .to_string();

        let user = AdminUser {
            id: String::new(),
            username,
            password_hash,
            role: if role.is_empty() { "admin".into() } else { role.into() },
            disabled: false,
            created_at: Utc::now(),
        };
        self.store.create_admin_user(&user)?;
        self.store.get_admin_user(&user.username).map_err(Into::into)
    }

    /// Verifies a username/password pair, enforcing the failed-login window.
    pub fn verify_admin_password(&self, username: &str, password: &str) -> Result<AdminUser> {
        let username = normalize_username(username);
        self.check_login_rate(&username)?;

        let user = match self.store.get_admin_user(&username) {
            Ok(user) => user,
            Err(e) if e.is_not_found() => {
                self.record_login_failure(&username);
                return Err(ServiceError::Unauthorized("invalid credentials".into()));
            }
            Err(e) => return Err(e.into()),
        };

        if user.disabled {
            return Err(ServiceError::Forbidden(format!(
                "admin user is disabled: {username}"
            )));
        }

        let parsed = PasswordHash::new(&user.password_hash)
            .map_err(|e| ServiceError::internal(format!("stored hash unreadable: {e}")))?;
        if Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_err()
        {
            self.record_login_failure(&username);
            return Err(ServiceError::Unauthorized("invalid credentials".into()));
        }

        self.clear_login_failures(&username);
        Ok(user)
    }

    pub fn list_admin_users(&self) -> Result<Vec<AdminUser>> {
        Ok(self.store.list_admin_users()?)
    }

    pub fn set_admin_user_disabled(&self, username: &str, disabled: bool) -> Result<()> {
        let username = normalize_username(username);
        Ok(self.store.set_admin_user_disabled(&username, disabled)?)
    }

    pub fn delete_admin_user(&self, username: &str) -> Result<()> {
        let username = normalize_username(username);
        Ok(self.store.delete_admin_user(&username)?)
    }

    // -- Login rate limiting --------------------------------------------------

    fn check_login_rate(&self, username: &str) -> Result<()> {
        let attempts = self
            .login_attempts
            .lock()
            .map_err(|_| ServiceError::internal("login limiter poisoned"))?;
        if let Some((count, since)) = attempts.get(username) {
            if *count >= LOGIN_MAX_FAILURES && since.elapsed() < LOGIN_WINDOW {
                return Err(ServiceError::ResourceExhausted(format!(
                    "too many failed logins for {username}, retry later"
                )));
            }
        }
        Ok(())
    }

    fn record_login_failure(&self, username: &str) {
        if let Ok(mut attempts) = self.login_attempts.lock() {
            let entry = attempts
                .entry(username.to_owned())
                .or_insert((0, Instant::now()));
            if entry.1.elapsed() >= LOGIN_WINDOW {
                *entry = (0, Instant::now());
            }
            entry.0 += 1;
        }
    }

    fn clear_login_failures(&self, username: &str) {
        if let Ok(mut attempts) = self.login_attempts.lock() {
            attempts.remove(username);
        }
    }
}
