//! HTTP endpoint handlers.
//!
//! Each handler parses its request into service DTOs, calls the service, and
//! returns a [`Reply`]. Error mapping to status codes happens in the server
//! loop.

use std::collections::HashMap;
use std::io::{BufReader, Read};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tiny_http::Request;
use tracing::error;

use grns_core::cancel::CancelToken;
use grns_core::enums::{DepType, GitObjectType, GitRelation, Status, TaskType};
use grns_core::filter::{ReadyFilter, StaleFilter, TaskFilter};
use grns_core::git_ref::GitRef;
use grns_core::ndjson;
use grns_core::task::Task;
use grns_service::{
    AttachmentMeta, CreateTaskRequest, ImportOptions, ServiceError, TaskService,
    UpdateTaskRequest,
};

use crate::auth::SessionStore;
use crate::multipart;
use crate::pipe;
use crate::state::AppState;

/// Server-side clamp for list limits.
const MAX_LIST_LIMIT: i64 = 500;
/// Default list limit when the caller does not send one.
const DEFAULT_LIST_LIMIT: i64 = 100;
/// Cap on `/tasks/batch` payloads.
const MAX_BATCH_TASKS: usize = 100;
/// Depth cap for dependency trees.
const MAX_TREE_DEPTH: i32 = 25;

/// What a handler hands back to the server loop.
pub enum Reply {
    Json {
        status: u16,
        body: Vec<u8>,
    },
    Stream {
        status: u16,
        content_type: String,
        reader: Box<dyn Read + Send>,
        len: Option<usize>,
    },
}

/// Serializes a value as a JSON reply.
pub fn json<T: Serialize>(status: u16, value: &T) -> Result<Reply, ServiceError> {
    let body = serde_json::to_vec(value)
        .map_err(|e| ServiceError::internal(format!("response encoding: {e}")))?;
    Ok(Reply::Json { status, body })
}

// ---------------------------------------------------------------------------
// Query-string parsing
// ---------------------------------------------------------------------------

/// Decoded query parameters; repeated keys keep the last value.
pub type Query = HashMap<String, String>;

pub fn parse_query(url: &str) -> Result<Query, ServiceError> {
    let mut query = Query::new();
    let Some((_, raw)) = url.split_once('?') else {
        return Ok(query);
    };
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = urlencoding::decode(key)
            .map_err(|e| ServiceError::invalid(format!("bad query key: {e}")))?;
        let value = urlencoding::decode(value)
            .map_err(|e| ServiceError::invalid(format!("bad query value for {key}: {e}")))?;
        query.insert(key.into_owned(), value.replace('+', " "));
    }
    Ok(query)
}

fn query_i64(query: &Query, key: &str) -> Result<Option<i64>, ServiceError> {
    match query.get(key) {
        Some(raw) => raw
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ServiceError::invalid(format!("{key} must be an integer"))),
        None => Ok(None),
    }
}

fn query_bool(query: &Query, key: &str) -> Result<bool, ServiceError> {
    match query.get(key).map(String::as_str) {
        None => Ok(false),
        Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") | Some("") => Ok(false),
        Some(other) => Err(ServiceError::invalid(format!(
            "{key} must be true or false, got {other:?}"
        ))),
    }
}

fn query_time(query: &Query, key: &str) -> Result<Option<DateTime<Utc>>, ServiceError> {
    match query.get(key) {
        Some(raw) => raw
            .parse::<DateTime<Utc>>()
            .map(Some)
            .map_err(|_| ServiceError::invalid(format!("{key} must be an RFC 3339 timestamp"))),
        None => Ok(None),
    }
}

fn query_list(query: &Query, key: &str) -> Vec<String> {
    query
        .get(key)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

/// Applies the server-side clamp to limit/offset.
fn clamped_limit(query: &Query) -> Result<(i64, i64), ServiceError> {
    let limit = query_i64(query, "limit")?
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let offset = query_i64(query, "offset")?.unwrap_or(0).max(0);
    Ok((limit, offset))
}

/// Builds a [`TaskFilter`] from list-endpoint query parameters.
pub fn task_filter_from_query(query: &Query) -> Result<TaskFilter, ServiceError> {
    let (limit, offset) = clamped_limit(query)?;
    let filter = TaskFilter {
        statuses: query_list(query, "status")
            .into_iter()
            .map(Status::from)
            .collect(),
        types: query_list(query, "type")
            .into_iter()
            .map(TaskType::from)
            .collect(),
        priority: query_i64(query, "priority")?.map(|p| p as i32),
        priority_min: query_i64(query, "priority_min")?.map(|p| p as i32),
        priority_max: query_i64(query, "priority_max")?.map(|p| p as i32),
        parent_id: query.get("parent").cloned(),
        spec_pattern: query.get("spec_pattern").cloned(),
        assignee: query.get("assignee").cloned(),
        no_assignee: query_bool(query, "no_assignee")?,
        ids: query_list(query, "id"),
        title_contains: query.get("title_contains").cloned(),
        description_contains: query.get("description_contains").cloned(),
        notes_contains: query.get("notes_contains").cloned(),
        search: query.get("search").cloned().filter(|s| !s.trim().is_empty()),
        created_after: query_time(query, "created_after")?,
        created_before: query_time(query, "created_before")?,
        updated_after: query_time(query, "updated_after")?,
        updated_before: query_time(query, "updated_before")?,
        closed_after: query_time(query, "closed_after")?,
        closed_before: query_time(query, "closed_before")?,
        empty_description: query_bool(query, "empty_description")?,
        no_labels: query_bool(query, "no_labels")?,
        labels: query_list(query, "label"),
        labels_any: query_list(query, "labels_any"),
        limit: Some(limit),
        offset: Some(offset),
    };
    Ok(filter)
}

// ---------------------------------------------------------------------------
// Body reading
// ---------------------------------------------------------------------------

/// Reads a JSON body, enforcing the configured cap.
fn read_body(request: &mut Request, cap: u64) -> Result<Vec<u8>, ServiceError> {
    let mut body = Vec::new();
    let mut reader = request.as_reader().take(cap + 1);
    reader
        .read_to_end(&mut body)
        .map_err(|e| ServiceError::invalid(format!("failed to read body: {e}")))?;
    if body.len() as u64 > cap {
        return Err(ServiceError::ResourceExhausted(format!(
            "request body exceeds {cap} bytes"
        )));
    }
    Ok(body)
}

fn parse_json<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, ServiceError> {
    serde_json::from_slice(body).map_err(|e| ServiceError::invalid(format!("invalid JSON: {e}")))
}

fn read_json<T: for<'de> Deserialize<'de>>(
    state: &AppState,
    request: &mut Request,
) -> Result<T, ServiceError> {
    let body = read_body(request, state.config.server.request_body_limit)?;
    parse_json(&body)
}

fn header_value(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|h| h.field.equiv(name))
        .map(|h| h.value.as_str().to_owned())
}

// ---------------------------------------------------------------------------
// Ping / info
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct PingResponse {
    ok: bool,
}

pub fn ping() -> Result<Reply, ServiceError> {
    json(200, &PingResponse { ok: true })
}

pub fn info(state: &AppState) -> Result<Reply, ServiceError> {
    json(200, &state.service.info()?)
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

pub fn create_task(state: &AppState, request: &mut Request) -> Result<Reply, ServiceError> {
    let req: CreateTaskRequest = read_json(state, request)?;
    let view = state.service.create_task(req)?;
    json(201, &view)
}

pub fn create_tasks_batch(state: &AppState, request: &mut Request) -> Result<Reply, ServiceError> {
    let reqs: Vec<CreateTaskRequest> = read_json(state, request)?;
    if reqs.is_empty() {
        return Err(ServiceError::invalid("batch must contain at least one task"));
    }
    if reqs.len() > MAX_BATCH_TASKS {
        return Err(ServiceError::invalid(format!(
            "batch exceeds {MAX_BATCH_TASKS} tasks"
        )));
    }
    let views = state.service.create_tasks_batch(reqs)?;
    json(201, &views)
}

#[derive(Serialize)]
struct TaskListResponse {
    tasks: Vec<Task>,
    count: usize,
}

pub fn list_tasks(
    state: &AppState,
    query: &Query,
    cancel: &CancelToken,
) -> Result<Reply, ServiceError> {
    let filter = task_filter_from_query(query)?;

    // Full-text search counts as a heavy request.
    let _guard = if filter.search.is_some() {
        Some(state.acquire_heavy()?)
    } else {
        None
    };

    let tasks = state.service.list_tasks(&filter, cancel)?;
    let count = tasks.len();
    json(200, &TaskListResponse { tasks, count })
}

pub fn get_task(state: &AppState, id: &str) -> Result<Reply, ServiceError> {
    json(200, &state.service.task_view(id)?)
}

pub fn update_task(state: &AppState, request: &mut Request, id: &str) -> Result<Reply, ServiceError> {
    let req: UpdateTaskRequest = read_json(state, request)?;
    json(200, &state.service.update_task(id, req)?)
}

#[derive(Deserialize)]
struct CloseRequest {
    ids: Vec<String>,
    #[serde(default)]
    commit: Option<String>,
    #[serde(default)]
    repo: Option<String>,
}

#[derive(Serialize)]
struct CloseResponse {
    closed: Vec<String>,
}

pub fn close_tasks(state: &AppState, request: &mut Request) -> Result<Reply, ServiceError> {
    let req: CloseRequest = read_json(state, request)?;
    if req.ids.is_empty() {
        return Err(ServiceError::invalid("ids must be non-empty"));
    }
    let closed = state
        .service
        .close_tasks(&req.ids, req.commit.as_deref(), req.repo.as_deref())?;
    json(200, &CloseResponse { closed })
}

#[derive(Deserialize)]
struct ReopenRequest {
    ids: Vec<String>,
}

#[derive(Serialize)]
struct ReopenResponse {
    reopened: Vec<String>,
}

pub fn reopen_tasks(state: &AppState, request: &mut Request) -> Result<Reply, ServiceError> {
    let req: ReopenRequest = read_json(state, request)?;
    if req.ids.is_empty() {
        return Err(ServiceError::invalid("ids must be non-empty"));
    }
    let reopened = state.service.reopen_tasks(&req.ids)?;
    json(200, &ReopenResponse { reopened })
}

pub fn ready_tasks(state: &AppState, query: &Query) -> Result<Reply, ServiceError> {
    let (limit, _) = clamped_limit(query)?;
    let filter = ReadyFilter {
        assignee: query.get("assignee").cloned(),
        limit: Some(limit),
    };
    let tasks = state.service.ready_tasks(&filter)?;
    let count = tasks.len();
    json(200, &TaskListResponse { tasks, count })
}

pub fn stale_tasks(state: &AppState, query: &Query) -> Result<Reply, ServiceError> {
    let (limit, _) = clamped_limit(query)?;
    let filter = StaleFilter {
        days: query_i64(query, "days")?.unwrap_or(30),
        status: query.get("status").cloned().map(Status::from),
        limit: Some(limit),
    };
    let tasks = state.service.stale_tasks(&filter)?;
    let count = tasks.len();
    json(200, &TaskListResponse { tasks, count })
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct DepRequest {
    child_id: String,
    parent_id: String,
    #[serde(rename = "type", default)]
    dep_type: DepType,
}

pub fn add_dependency(state: &AppState, request: &mut Request) -> Result<Reply, ServiceError> {
    let req: DepRequest = read_json(state, request)?;
    let dep = state
        .service
        .add_dependency(&req.child_id, &req.parent_id, req.dep_type)?;
    json(201, &dep)
}

#[derive(Serialize)]
struct TreeResponse {
    nodes: Vec<grns_service::TreeNodeView>,
}

pub fn dependency_tree(state: &AppState, id: &str, query: &Query) -> Result<Reply, ServiceError> {
    let depth = query_i64(query, "depth")?
        .unwrap_or(10)
        .clamp(1, i64::from(MAX_TREE_DEPTH)) as i32;
    let nodes = state.service.dependency_tree(id, depth)?;
    json(200, &TreeResponse { nodes })
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct LabelsRequest {
    labels: Vec<String>,
}

#[derive(Serialize)]
struct LabelsResponse {
    labels: Vec<String>,
}

pub fn add_labels(state: &AppState, request: &mut Request, id: &str) -> Result<Reply, ServiceError> {
    let req: LabelsRequest = read_json(state, request)?;
    let labels = state.service.add_labels(id, &req.labels)?;
    json(200, &LabelsResponse { labels })
}

pub fn remove_labels(
    state: &AppState,
    request: &mut Request,
    id: &str,
) -> Result<Reply, ServiceError> {
    let req: LabelsRequest = read_json(state, request)?;
    let labels = state.service.remove_labels(id, &req.labels)?;
    json(200, &LabelsResponse { labels })
}

pub fn list_all_labels(state: &AppState) -> Result<Reply, ServiceError> {
    let labels = state.service.list_all_labels()?;
    json(200, &LabelsResponse { labels })
}

// ---------------------------------------------------------------------------
// Git refs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct GitRefRequest {
    repo: String,
    #[serde(default)]
    relation: GitRelation,
    #[serde(default)]
    object_type: GitObjectType,
    object_value: String,
    #[serde(default)]
    resolved_commit: Option<String>,
    #[serde(default)]
    note: String,
}

pub fn add_git_ref(state: &AppState, request: &mut Request, id: &str) -> Result<Reply, ServiceError> {
    let req: GitRefRequest = read_json(state, request)?;
    let git_ref = GitRef {
        id: String::new(),
        task_id: id.to_owned(),
        repo: req.repo,
        relation: req.relation,
        object_type: req.object_type,
        object_value: req.object_value,
        resolved_commit: req.resolved_commit,
        note: req.note,
    };
    json(201, &state.service.add_git_ref(git_ref)?)
}

#[derive(Serialize)]
struct GitRefsResponse {
    git_refs: Vec<GitRef>,
}

pub fn list_git_refs(state: &AppState, id: &str) -> Result<Reply, ServiceError> {
    let git_refs = state.service.git_refs(id)?;
    json(200, &GitRefsResponse { git_refs })
}

#[derive(Serialize)]
struct Ack {
    ok: bool,
}

pub fn delete_git_ref(state: &AppState, id: &str) -> Result<Reply, ServiceError> {
    state.service.delete_git_ref(id)?;
    json(200, &Ack { ok: true })
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(default)]
struct AttachmentJsonBody {
    kind: String,
    title: String,
    filename: String,
    media_type: String,
    labels: Vec<String>,
    expires_at: Option<DateTime<Utc>>,
    /// Base64 content for a small managed upload.
    content: Option<String>,
    external_url: Option<String>,
    repo_path: Option<String>,
}

impl Default for AttachmentJsonBody {
    fn default() -> Self {
        Self {
            kind: String::new(),
            title: String::new(),
            filename: String::new(),
            media_type: String::new(),
            labels: Vec::new(),
            expires_at: None,
            content: None,
            external_url: None,
            repo_path: None,
        }
    }
}

fn meta_from_query(query: &Query) -> Result<AttachmentMeta, ServiceError> {
    Ok(AttachmentMeta {
        kind: query.get("kind").cloned().unwrap_or_default(),
        title: query.get("title").cloned().unwrap_or_default(),
        filename: query.get("filename").cloned().unwrap_or_default(),
        media_type: query.get("media_type").cloned().unwrap_or_default(),
        labels: query_list(query, "label"),
        expires_at: query_time(query, "expires_at")?,
    })
}

/// Upload entry point: dispatches on Content-Type.
///
/// - `multipart/form-data`: metadata fields + one file part, buffered up to
///   the multipart memory ceiling.
/// - `application/octet-stream`: raw content streamed into the blob store,
///   metadata in query parameters.
/// - `application/json`: link attachments, or base64 content.
pub fn upload_attachment(
    state: &AppState,
    request: &mut Request,
    task_id: &str,
    query: &Query,
) -> Result<Reply, ServiceError> {
    let content_type = header_value(request, "Content-Type").unwrap_or_default();

    if let Some(boundary) = multipart::boundary_from_content_type(&content_type) {
        return upload_multipart(state, request, task_id, &boundary);
    }
    if content_type.starts_with("application/json") {
        return upload_json(state, request, task_id);
    }

    // Raw stream; request.as_reader() hands us the body directly and the
    // service enforces the upload cap while hashing.
    let meta = meta_from_query(query)?;
    let attachment = state
        .service
        .upload_attachment(task_id, meta, request.as_reader())?;
    json(201, &attachment)
}

fn upload_multipart(
    state: &AppState,
    request: &mut Request,
    task_id: &str,
    boundary: &str,
) -> Result<Reply, ServiceError> {
    let body = read_body(request, state.config.attachments.multipart_max_memory)?;
    let parts = multipart::parse(&body, boundary)?;

    let mut meta = AttachmentMeta::default();
    let mut file: Option<multipart::Part> = None;
    for part in parts {
        match part.name.as_str() {
            "file" | "content" => file = Some(part),
            "kind" => meta.kind = text_field(&part)?,
            "title" => meta.title = text_field(&part)?,
            "filename" => meta.filename = text_field(&part)?,
            "media_type" => meta.media_type = text_field(&part)?,
            "labels" => {
                meta.labels = text_field(&part)?
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect();
            }
            "expires_at" => {
                meta.expires_at = Some(text_field(&part)?.parse().map_err(|_| {
                    ServiceError::invalid("expires_at must be an RFC 3339 timestamp")
                })?);
            }
            other => {
                return Err(ServiceError::invalid(format!(
                    "unknown multipart field: {other}"
                )));
            }
        }
    }

    let Some(file) = file else {
        return Err(ServiceError::invalid("multipart upload requires a file part"));
    };
    if meta.filename.is_empty() {
        meta.filename = file.filename.clone().unwrap_or_default();
    }
    if meta.media_type.is_empty() {
        meta.media_type = file.content_type.clone().unwrap_or_default();
    }

    let attachment =
        state
            .service
            .upload_attachment(task_id, meta, std::io::Cursor::new(file.data))?;
    json(201, &attachment)
}

fn text_field(part: &multipart::Part) -> Result<String, ServiceError> {
    String::from_utf8(part.data.clone())
        .map_err(|_| ServiceError::invalid(format!("field {} is not UTF-8", part.name)))
}

fn upload_json(
    state: &AppState,
    request: &mut Request,
    task_id: &str,
) -> Result<Reply, ServiceError> {
    let cap = state
        .config
        .server
        .request_body_limit
        .max(state.config.attachments.multipart_max_memory);
    let body = read_body(request, cap)?;
    let req: AttachmentJsonBody = parse_json(&body)?;

    let meta = AttachmentMeta {
        kind: req.kind,
        title: req.title,
        filename: req.filename,
        media_type: req.media_type,
        labels: req.labels,
        expires_at: req.expires_at,
    };

    let attachment = match req.content {
        Some(encoded) => {
            let content = BASE64
                .decode(encoded.as_bytes())
                .map_err(|e| ServiceError::invalid(format!("content is not valid base64: {e}")))?;
            state
                .service
                .upload_attachment(task_id, meta, std::io::Cursor::new(content))?
        }
        None => state
            .service
            .link_attachment(task_id, meta, req.external_url, req.repo_path)?,
    };
    json(201, &attachment)
}

#[derive(Serialize)]
struct AttachmentsResponse {
    attachments: Vec<grns_core::attachment::Attachment>,
}

pub fn list_attachments(state: &AppState, task_id: &str) -> Result<Reply, ServiceError> {
    let attachments = state.service.list_attachments(task_id)?;
    json(200, &AttachmentsResponse { attachments })
}

pub fn get_attachment(state: &AppState, id: &str) -> Result<Reply, ServiceError> {
    json(200, &state.service.get_attachment(id)?)
}

pub fn delete_attachment(state: &AppState, id: &str) -> Result<Reply, ServiceError> {
    state.service.delete_attachment(id)?;
    json(200, &Ack { ok: true })
}

pub fn attachment_content(state: &AppState, id: &str) -> Result<Reply, ServiceError> {
    let (attachment, reader) = state.service.open_attachment_content(id)?;
    let content_type = if attachment.media_type.is_empty() {
        "application/octet-stream".to_owned()
    } else {
        attachment.media_type.clone()
    };
    Ok(Reply::Stream {
        status: 200,
        content_type,
        reader: Box::new(reader),
        len: attachment.size_bytes.map(|s| s.max(0) as usize),
    })
}

// ---------------------------------------------------------------------------
// Import / export
// ---------------------------------------------------------------------------

fn import_options_from_query(query: &Query) -> Result<ImportOptions, ServiceError> {
    let mut opts = ImportOptions {
        dry_run: query_bool(query, "dry_run")?,
        atomic: query_bool(query, "atomic")?,
        ..Default::default()
    };
    if let Some(raw) = query.get("dedupe") {
        opts.dedupe = serde_json::from_value(serde_json::Value::String(raw.clone()))
            .map_err(|_| ServiceError::invalid(format!("unknown dedupe mode: {raw}")))?;
    }
    if let Some(raw) = query.get("orphan_handling") {
        opts.orphan_handling = serde_json::from_value(serde_json::Value::String(raw.clone()))
            .map_err(|_| ServiceError::invalid(format!("unknown orphan_handling mode: {raw}")))?;
    }
    Ok(opts)
}

pub fn import(
    state: &AppState,
    request: &mut Request,
    query: &Query,
    cancel: &CancelToken,
) -> Result<Reply, ServiceError> {
    let _guard = state.acquire_heavy()?;
    let opts = import_options_from_query(query)?;

    let content_type = header_value(request, "Content-Type").unwrap_or_default();
    let report = if content_type.starts_with("application/json") {
        // A JSON array of records, bounded by the body cap.
        let body = read_body(request, state.config.server.request_body_limit)?;
        let records: Vec<ndjson::Record> = parse_json(&body)?;
        state
            .service
            .import(records.into_iter().map(Ok), &opts, cancel)?
    } else {
        // NDJSON streamed straight off the socket, one record per line.
        let reader = BufReader::new(request.as_reader());
        state.service.import(ndjson::read_records(reader), &opts, cancel)?
    };

    json(200, &report)
}

pub fn export(state: &Arc<AppState>, cancel: &CancelToken) -> Result<Reply, ServiceError> {
    let guard = state.acquire_heavy()?;

    let (mut writer, reader) = pipe::pipe();
    let service = Arc::clone(&state.service);
    let cancel = cancel.clone();
    std::thread::Builder::new()
        .name("grns-export".to_owned())
        .spawn(move || {
            // The guard rides along so the slot stays held while streaming.
            let _guard = guard;
            if let Err(e) = service.export(&mut writer, &cancel) {
                // Status line is already on the wire; all we can do is stop.
                error!(error = %e, "export aborted mid-stream");
            }
        })
        .map_err(|e| ServiceError::internal(format!("failed to spawn export thread: {e}")))?;

    Ok(Reply::Stream {
        status: 200,
        content_type: "application/x-ndjson".to_owned(),
        reader: Box::new(reader),
        len: None,
    })
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CleanupRequest {
    older_than_days: i64,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    dry_run: bool,
}

pub fn admin_cleanup(
    state: &AppState,
    request: &mut Request,
    cancel: &CancelToken,
) -> Result<Reply, ServiceError> {
    let req: CleanupRequest = read_json(state, request)?;
    let report = state.service.cleanup(
        req.older_than_days,
        req.project.as_deref(),
        req.dry_run,
        cancel,
    )?;
    json(200, &report)
}

#[derive(Deserialize)]
struct GcRequest {
    #[serde(default)]
    dry_run: bool,
    #[serde(default)]
    batch_size: Option<i64>,
}

pub fn admin_gc_blobs(
    state: &AppState,
    request: &mut Request,
    cancel: &CancelToken,
) -> Result<Reply, ServiceError> {
    let req: GcRequest = read_json(state, request)?;
    let report = state.service.blob_gc(req.dry_run, req.batch_size, cancel)?;
    json(200, &report)
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    expires_in_secs: u64,
}

pub fn admin_login(state: &AppState, request: &mut Request) -> Result<Reply, ServiceError> {
    let req: LoginRequest = read_json(state, request)?;
    let user = state
        .service
        .verify_admin_password(&req.username, &req.password)?;
    let token = state.sessions.create(&user.username);
    json(
        200,
        &LoginResponse {
            token,
            expires_in_secs: SessionStore::ttl().as_secs(),
        },
    )
}

#[derive(Deserialize)]
struct CreateUserRequest {
    username: String,
    password: String,
    #[serde(default)]
    role: String,
}

pub fn admin_create_user(state: &AppState, request: &mut Request) -> Result<Reply, ServiceError> {
    let req: CreateUserRequest = read_json(state, request)?;
    let user = state
        .service
        .create_admin_user(&req.username, &req.password, &req.role)?;
    json(201, &user)
}

#[derive(Serialize)]
struct UsersResponse {
    users: Vec<grns_core::admin::AdminUser>,
}

pub fn admin_list_users(state: &AppState) -> Result<Reply, ServiceError> {
    let users = state.service.list_admin_users()?;
    json(200, &UsersResponse { users })
}

#[derive(Deserialize)]
struct PatchUserRequest {
    disabled: bool,
}

pub fn admin_patch_user(
    state: &AppState,
    request: &mut Request,
    username: &str,
) -> Result<Reply, ServiceError> {
    let req: PatchUserRequest = read_json(state, request)?;
    state.service.set_admin_user_disabled(username, req.disabled)?;
    json(200, &Ack { ok: true })
}

pub fn admin_delete_user(state: &AppState, username: &str) -> Result<Reply, ServiceError> {
    state.service.delete_admin_user(username)?;
    json(200, &Ack { ok: true })
}
