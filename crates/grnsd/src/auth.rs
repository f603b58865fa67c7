//! Request authentication: bearer token and admin sessions.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::RngCore;
use rand::rngs::OsRng;
use tiny_http::Request;

use grns_service::ServiceError;

/// Admin sessions expire after this long.
const SESSION_TTL: Duration = Duration::from_secs(8 * 60 * 60);

/// Header carrying the admin token or a session id.
pub const ADMIN_HEADER: &str = "X-Admin-Token";

/// Extracts the `Authorization: Bearer` value from a request, if any.
pub fn bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Authorization"))
        .and_then(|h| {
            h.value
                .as_str()
                .strip_prefix("Bearer ")
                .map(str::to_owned)
        })
}

/// Extracts the admin header value, if any.
pub fn admin_header(request: &Request) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|h| h.field.equiv(ADMIN_HEADER))
        .map(|h| h.value.as_str().to_owned())
}

/// Verifies the static bearer token when one is configured.
pub fn check_bearer(request: &Request, expected: Option<&str>) -> Result<(), ServiceError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    match bearer_token(request) {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => Ok(()),
        Some(_) => Err(ServiceError::Unauthorized("invalid bearer token".into())),
        None => Err(ServiceError::Unauthorized(
            "missing Authorization bearer token".into(),
        )),
    }
}

/// Compares two byte strings without early exit.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

/// In-process admin session store.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

#[derive(Debug, Clone)]
struct Session {
    username: String,
    expires: Instant,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a fresh opaque session id for a verified admin.
    pub fn create(&self, username: &str) -> String {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let mut id = String::with_capacity(64);
        for b in bytes {
            id.push_str(&format!("{b:02x}"));
        }

        let mut sessions = self.sessions.lock().expect("session store poisoned");
        // Drop expired entries while we hold the lock anyway.
        sessions.retain(|_, s| s.expires > Instant::now());
        sessions.insert(
            id.clone(),
            Session {
                username: username.to_owned(),
                expires: Instant::now() + SESSION_TTL,
            },
        );
        id
    }

    /// Returns the session's username if the id is valid and unexpired.
    pub fn validate(&self, id: &str) -> Option<String> {
        let sessions = self.sessions.lock().expect("session store poisoned");
        sessions
            .get(id)
            .filter(|s| s.expires > Instant::now())
            .map(|s| s.username.clone())
    }

    /// The session lifetime, for login responses.
    pub fn ttl() -> Duration {
        SESSION_TTL
    }
}

/// Checks admin access: the configured admin token, or a live session.
pub fn check_admin(
    request: &Request,
    admin_token: Option<&str>,
    sessions: &SessionStore,
) -> Result<(), ServiceError> {
    let Some(presented) = admin_header(request) else {
        return Err(ServiceError::Unauthorized(format!(
            "missing {ADMIN_HEADER} header"
        )));
    };

    if let Some(expected) = admin_token {
        if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            return Ok(());
        }
    }
    if sessions.validate(&presented).is_some() {
        return Ok(());
    }
    Err(ServiceError::Forbidden(
        "admin token or session required".into(),
    ))
}
