//! The HTTP server: listener, worker threads, routing, error mapping.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;
use tiny_http::{Header, Method, Request, Response, StatusCode};
use tracing::{debug, error, info, warn};

use grns_core::cancel::CancelToken;
use grns_service::ServiceError;

use crate::auth;
use crate::handlers::{self, Reply};
use crate::state::AppState;

/// How long a worker waits in `recv_timeout` before rechecking shutdown.
const RECV_POLL: Duration = Duration::from_millis(250);

/// A running server bound to a concrete address.
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl ServerHandle {
    /// Signals shutdown and drains in-flight handlers within the grace
    /// period.
    pub fn shutdown(self) {
        info!("shutting down HTTP server");
        self.shutdown.store(true, Ordering::SeqCst);

        let deadline = Instant::now() + self.grace;
        for worker in self.workers {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("shutdown grace period elapsed with workers still busy");
                break;
            }
            // recv_timeout guarantees each worker observes the flag shortly.
            let _ = worker.join();
        }
    }
}

/// Binds the listener and starts the worker pool.
///
/// `/ping` answers as soon as this function returns.
pub fn start(state: Arc<AppState>, addr: &str) -> anyhow::Result<ServerHandle> {
    let server = tiny_http::Server::http(addr)
        .map_err(|e| anyhow::anyhow!("failed to bind {addr}: {e}"))?;
    let bound = server
        .server_addr()
        .to_ip()
        .ok_or_else(|| anyhow::anyhow!("listener has no IP address"))?;
    info!(%bound, "listening");

    let server = Arc::new(server);
    let shutdown = Arc::new(AtomicBool::new(false));
    let worker_count = state.config.server.worker_threads;
    let grace = Duration::from_millis(state.config.server.shutdown_grace_ms);

    let mut workers = Vec::with_capacity(worker_count);
    for index in 0..worker_count {
        let server = Arc::clone(&server);
        let state = Arc::clone(&state);
        let shutdown = Arc::clone(&shutdown);
        workers.push(
            std::thread::Builder::new()
                .name(format!("grns-http-{index}"))
                .spawn(move || {
                    while !shutdown.load(Ordering::SeqCst) {
                        match server.recv_timeout(RECV_POLL) {
                            Ok(Some(request)) => handle_request(&state, request),
                            Ok(None) => {}
                            Err(e) => {
                                error!(error = %e, "listener error, worker exiting");
                                break;
                            }
                        }
                    }
                })?,
        );
    }

    Ok(ServerHandle {
        addr: bound,
        shutdown,
        workers,
        grace,
    })
}

// ---------------------------------------------------------------------------
// Request handling
// ---------------------------------------------------------------------------

fn handle_request(state: &Arc<AppState>, mut request: Request) {
    let method = request.method().clone();
    let url = request.url().to_owned();
    debug!(%method, %url, "request");

    let result = route(state, &mut request, &url);

    let outcome = match result {
        Ok(reply) => respond(request, reply),
        Err(e) => {
            let status = status_for(&e);
            if status >= 500 {
                error!(%method, %url, error = %e, "request failed");
            } else {
                debug!(%method, %url, error = %e, status, "request rejected");
            }
            respond(request, error_reply(&e))
        }
    };
    if let Err(e) = outcome {
        debug!(error = %e, "client went away while responding");
    }
}

fn route(
    state: &Arc<AppState>,
    request: &mut Request,
    url: &str,
) -> Result<Reply, ServiceError> {
    let path = url.split('?').next().unwrap_or("");
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let query = handlers::parse_query(url)?;

    // /ping stays open so clients can detect readiness before they have
    // credentials.
    if segments.as_slice() != ["v1", "ping"] {
        auth::check_bearer(request, state.config.api_token.as_deref())?;
    }

    // Admin endpoints need the admin token or a session; login itself only
    // needs the bearer token.
    if let ["v1", "admin", rest @ ..] = segments.as_slice() {
        if rest != ["login"] {
            auth::check_admin(
                request,
                state.config.admin_token.as_deref(),
                &state.sessions,
            )?;
        }
    }

    let deadline = Instant::now() + Duration::from_millis(state.config.server.request_timeout_ms);
    let cancel = CancelToken::with_deadline(deadline);

    match (request.method().clone(), segments.as_slice()) {
        (Method::Get, ["v1", "ping"]) => handlers::ping(),
        (Method::Get, ["v1", "info"]) => handlers::info(state),

        (Method::Post, ["v1", "tasks"]) => handlers::create_task(state, request),
        (Method::Post, ["v1", "tasks", "batch"]) => handlers::create_tasks_batch(state, request),
        (Method::Get, ["v1", "tasks"]) => handlers::list_tasks(state, &query, &cancel),
        (Method::Get, ["v1", "tasks", "ready"]) => handlers::ready_tasks(state, &query),
        (Method::Get, ["v1", "tasks", "stale"]) => handlers::stale_tasks(state, &query),
        (Method::Post, ["v1", "tasks", "close"]) => handlers::close_tasks(state, request),
        (Method::Post, ["v1", "tasks", "reopen"]) => handlers::reopen_tasks(state, request),

        (Method::Get, ["v1", "tasks", id]) => handlers::get_task(state, id),
        (Method::Patch, ["v1", "tasks", id]) => {
            let id = (*id).to_owned();
            handlers::update_task(state, request, &id)
        }

        (Method::Get, ["v1", "tasks", id, "deps", "tree"]) => {
            handlers::dependency_tree(state, id, &query)
        }
        (Method::Post, ["v1", "tasks", id, "labels"]) => {
            let id = (*id).to_owned();
            handlers::add_labels(state, request, &id)
        }
        (Method::Delete, ["v1", "tasks", id, "labels"]) => {
            let id = (*id).to_owned();
            handlers::remove_labels(state, request, &id)
        }
        (Method::Post, ["v1", "tasks", id, "attachments"]) => {
            let id = (*id).to_owned();
            handlers::upload_attachment(state, request, &id, &query)
        }
        (Method::Get, ["v1", "tasks", id, "attachments"]) => {
            handlers::list_attachments(state, id)
        }
        (Method::Post, ["v1", "tasks", id, "git-refs"]) => {
            let id = (*id).to_owned();
            handlers::add_git_ref(state, request, &id)
        }
        (Method::Get, ["v1", "tasks", id, "git-refs"]) => handlers::list_git_refs(state, id),
        (Method::Delete, ["v1", "git-refs", id]) => handlers::delete_git_ref(state, id),

        (Method::Post, ["v1", "deps"]) => handlers::add_dependency(state, request),
        (Method::Get, ["v1", "labels"]) => handlers::list_all_labels(state),

        (Method::Get, ["v1", "attachments", id]) => handlers::get_attachment(state, id),
        (Method::Delete, ["v1", "attachments", id]) => handlers::delete_attachment(state, id),
        (Method::Get, ["v1", "attachments", id, "content"]) => {
            handlers::attachment_content(state, id)
        }

        (Method::Post, ["v1", "import"]) => handlers::import(state, request, &query, &cancel),
        (Method::Get, ["v1", "export"]) => handlers::export(state, &cancel),

        (Method::Post, ["v1", "admin", "login"]) => handlers::admin_login(state, request),
        (Method::Post, ["v1", "admin", "cleanup"]) => {
            handlers::admin_cleanup(state, request, &cancel)
        }
        (Method::Post, ["v1", "admin", "gc-blobs"]) => {
            handlers::admin_gc_blobs(state, request, &cancel)
        }
        (Method::Get, ["v1", "admin", "users"]) => handlers::admin_list_users(state),
        (Method::Post, ["v1", "admin", "users"]) => handlers::admin_create_user(state, request),
        (Method::Patch, ["v1", "admin", "users", username]) => {
            let username = (*username).to_owned();
            handlers::admin_patch_user(state, request, &username)
        }
        (Method::Delete, ["v1", "admin", "users", username]) => {
            handlers::admin_delete_user(state, username)
        }

        _ => Err(ServiceError::NotFound(format!(
            "no route for {} {path}",
            request.method()
        ))),
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// Maps service error kinds to HTTP status codes.
pub fn status_for(e: &ServiceError) -> u16 {
    match e {
        ServiceError::InvalidArgument(_) => 400,
        ServiceError::Unauthorized(_) => 401,
        ServiceError::Forbidden(_) => 403,
        ServiceError::NotFound(_) => 404,
        ServiceError::Conflict(_) => 409,
        ServiceError::ResourceExhausted(_) => 429,
        ServiceError::Canceled => 499,
        ServiceError::Internal(_) => 500,
        ServiceError::DeadlineExceeded => 504,
    }
}

fn error_reply(e: &ServiceError) -> Reply {
    let envelope = ErrorEnvelope {
        error: ErrorDetail {
            code: e.code(),
            message: e.to_string(),
        },
    };
    let body = serde_json::to_vec(&envelope).unwrap_or_else(|_| b"{}".to_vec());
    Reply::Json {
        status: status_for(e),
        body,
    }
}

fn json_header() -> Header {
    Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
        .expect("static header is valid")
}

fn respond(request: Request, reply: Reply) -> std::io::Result<()> {
    match reply {
        Reply::Json { status, body } => {
            let response = Response::from_data(body)
                .with_status_code(StatusCode(status))
                .with_header(json_header());
            request.respond(response)
        }
        Reply::Stream {
            status,
            content_type,
            reader,
            len,
        } => {
            let header =
                Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes())
                    .unwrap_or_else(|_| json_header());
            let response = Response::new(StatusCode(status), vec![header], reader, len, None);
            request.respond(response)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert_eq!(status_for(&ServiceError::invalid("x")), 400);
        assert_eq!(status_for(&ServiceError::Unauthorized("x".into())), 401);
        assert_eq!(status_for(&ServiceError::Forbidden("x".into())), 403);
        assert_eq!(status_for(&ServiceError::NotFound("x".into())), 404);
        assert_eq!(status_for(&ServiceError::Conflict("x".into())), 409);
        assert_eq!(
            status_for(&ServiceError::ResourceExhausted("x".into())),
            429
        );
        assert_eq!(status_for(&ServiceError::Canceled), 499);
        assert_eq!(status_for(&ServiceError::internal("x")), 500);
        assert_eq!(status_for(&ServiceError::DeadlineExceeded), 504);
    }
}
