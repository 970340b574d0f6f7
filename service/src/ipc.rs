//! Unix domain socket IPC listener.
//!
//! Listens on the socket path and dispatches JSON-RPC-lite messages to the
//! issue engine.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use issuevault_engine::{
    BulkUpdateRequest, CollectionRef, IssueEngine, IssuePatch, MutationError, NewComment,
    NewIssue, UpdateRequest,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::PROTOCOL_VERSION;
use crate::protocol::*;

/// Methods answered by [`dispatch_message`], as advertised by `hello`.
pub const METHODS: &[&str] = &[
    "issues.update",
    "issues.create",
    "issues.delete",
    "issues.bulk_update",
    "issues.comment",
    "issues.list",
    "issues.get",
    "markdown.create",
    "markdown.get",
    "markdown.update",
    "service.status",
];

/// Everything a connection needs to serve requests.
pub struct ServiceState {
    engine: IssueEngine,
    default_collection: CollectionRef,
    backend: String,
    started: Instant,
    shutdown: CancellationToken,
}

impl ServiceState {
    pub fn new(
        engine: IssueEngine,
        default_collection: impl Into<String>,
        backend: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            default_collection: CollectionRef::new(default_collection),
            backend: backend.into(),
            started: Instant::now(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelling this stops the listener and every in-flight mutation at
    /// its next retry boundary.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn uptime_s(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    fn collection(&self, requested: Option<&str>) -> Result<CollectionRef, RpcFailure> {
        let Some(dir) = requested else {
            return Ok(self.default_collection.clone());
        };
        if dir.split('/').any(|segment| segment == "." || segment == "..") {
            return Err(RpcFailure::invalid_params(format!(
                "collection must be a plain relative path: {dir}"
            )));
        }
        Ok(CollectionRef::new(dir))
    }
}

/// Bind the listening socket, replacing a stale socket file.
pub fn bind_socket(path: &Path) -> std::io::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(path)?;
    tracing::info!("issuevault service listening on {}", path.display());
    Ok(listener)
}

/// Accept connections until the state's shutdown token is cancelled.
///
/// Each connection reads newline-delimited JSON-RPC messages, dispatches
/// them to the engine, and writes responses.
/// Accept connections until shutdown, then wait for every open
/// connection to finish before returning.
pub async fn serve(state: Arc<ServiceState>, listener: UnixListener) -> std::io::Result<()> {
    let shutdown = state.shutdown_token();
    let connections = TaskTracker::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Listener stopping");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let state = Arc::clone(&state);
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            tracing::warn!("Connection error: {e}");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Accept error: {e}");
                }
            }
        }
    }

    connections.close();
    tracing::debug!(open = connections.len(), "Waiting for connections to drain");
    connections.wait().await;
    Ok(())
}

async fn handle_connection(state: Arc<ServiceState>, stream: UnixStream) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    let shutdown = state.shutdown_token();

    loop {
        line.clear();
        let n = tokio::select! {
            _ = shutdown.cancelled() => break,
            read = reader.read_line(&mut line) => read?,
        };
        if n == 0 {
            break; // EOF
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = dispatch_message(&state, trimmed).await;
        let mut response_bytes = serde_json::to_vec(&response).unwrap_or_else(|_| b"{}".to_vec());
        response_bytes.push(b'\n');
        writer.write_all(&response_bytes).await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Parse and dispatch a single JSON-RPC message.
pub async fn dispatch_message(state: &ServiceState, raw: &str) -> Value {
    let request: Request = match serde_json::from_str(raw) {
        Ok(req) => req,
        Err(e) => {
            return serde_json::to_value(ErrorResponse {
                id: RequestId::Integer(0),
                error: ErrorObject {
                    code: ERR_INVALID_REQUEST,
                    message: format!("Invalid JSON-RPC: {e}"),
                    data: None,
                },
            })
            .unwrap_or_default();
        }
    };

    let id = request.id.clone();
    let result = dispatch_method(state, &request.method, request.params).await;

    match result {
        Ok(value) => serde_json::to_value(Response { id, result: value }).unwrap_or_default(),
        Err(failure) => {
            tracing::debug!(
                method = %request.method,
                code = failure.code,
                "request failed: {}",
                failure.message
            );
            serde_json::to_value(ErrorResponse {
                id,
                error: ErrorObject {
                    code: failure.code,
                    message: failure.message,
                    data: failure.data,
                },
            })
            .unwrap_or_default()
        }
    }
}

type HandlerResult = Result<Value, RpcFailure>;

async fn dispatch_method(state: &ServiceState, method: &str, params: Option<Value>) -> HandlerResult {
    match method {
        "hello" => handle_hello(params),
        "issues.update" => handle_update(state, params).await,
        "issues.create" => handle_create(state, params).await,
        "issues.delete" => handle_delete(state, params).await,
        "issues.bulk_update" => handle_bulk_update(state, params).await,
        "issues.comment" => handle_comment(state, params).await,
        "issues.list" => handle_list(state, params).await,
        "issues.get" => handle_get(state, params).await,
        "markdown.create" => handle_markdown_create(state, params).await,
        "markdown.get" => handle_markdown_get(state, params).await,
        "markdown.update" => handle_markdown_update(state, params).await,
        "service.status" => handle_service_status(state),
        _ => Err(RpcFailure::new(
            ERR_METHOD_NOT_FOUND,
            format!("Unknown method: {method}"),
        )),
    }
}

fn handle_hello(params: Option<Value>) -> HandlerResult {
    let hello: HelloParams = parse_params("hello", params)?;

    if hello.protocol_version != PROTOCOL_VERSION {
        return Err(RpcFailure::invalid_params(format!(
            "Incompatible protocol version: client={}, service={}",
            hello.protocol_version, PROTOCOL_VERSION
        )));
    }

    to_result(HelloResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        service_version: env!("CARGO_PKG_VERSION").to_string(),
        capabilities: METHODS.iter().map(|m| (*m).to_string()).collect(),
    })
}

async fn handle_update(state: &ServiceState, params: Option<Value>) -> HandlerResult {
    let params: UpdateParams = parse_params("issues.update", params)?;
    let collection = state.collection(params.collection.as_deref())?;
    let request = UpdateRequest {
        updates: parse_body("updates", params.updates)?,
        base_state: params
            .base_state
            .map(|base| parse_body("baseState", base))
            .transpose()?,
    };

    let outcome = state
        .engine
        .update(&collection, &params.id, request, &state.shutdown)
        .await?;

    to_result(UpdateResult {
        status: STATUS_OK,
        success: true,
        merge_result: outcome.merge_result,
        retry_count: outcome.retry_count,
    })
}

async fn handle_create(state: &ServiceState, params: Option<Value>) -> HandlerResult {
    let params: CreateParams = parse_params("issues.create", params)?;
    let collection = state.collection(params.collection.as_deref())?;
    let fields: NewIssue = parse_body("fields", params.fields)?;

    let issue = state
        .engine
        .create(&collection, fields, &state.shutdown)
        .await?;

    to_result(IssueResult {
        status: STATUS_CREATED,
        issue,
    })
}

async fn handle_delete(state: &ServiceState, params: Option<Value>) -> HandlerResult {
    let params: IssueRefParams = parse_params("issues.delete", params)?;
    let collection = state.collection(params.collection.as_deref())?;

    state
        .engine
        .delete(&collection, &params.id, &state.shutdown)
        .await?;

    to_result(DeleteResult {
        status: STATUS_OK,
        success: true,
    })
}

async fn handle_bulk_update(state: &ServiceState, params: Option<Value>) -> HandlerResult {
    let params: BulkUpdateParams = parse_params("issues.bulk_update", params)?;
    let collection = state.collection(params.collection.as_deref())?;
    let request = BulkUpdateRequest {
        ids: params.ids,
        updates: parse_body("updates", params.updates)?,
    };

    let outcome = state
        .engine
        .bulk_update(&collection, request, &state.shutdown)
        .await?;

    to_result(BulkUpdateResult {
        status: STATUS_OK,
        success: true,
        updated: outcome.updated,
        retry_count: outcome.retry_count,
    })
}

async fn handle_comment(state: &ServiceState, params: Option<Value>) -> HandlerResult {
    let params: CommentParams = parse_params("issues.comment", params)?;
    let collection = state.collection(params.collection.as_deref())?;
    let comment = NewComment {
        text: params.text,
        author: params.author,
    };

    let comment = state
        .engine
        .add_comment(&collection, &params.id, comment, &state.shutdown)
        .await?;

    to_result(CommentResult {
        status: STATUS_CREATED,
        comment,
    })
}

async fn handle_list(state: &ServiceState, params: Option<Value>) -> HandlerResult {
    let params: ListParams = parse_params("issues.list", params)?;
    let collection = state.collection(params.collection.as_deref())?;

    let outcome = state.engine.list(&collection, &params.filter).await?;

    to_result(ListResult {
        status: STATUS_OK,
        issues: outcome.issues,
        skipped: outcome.skipped,
    })
}

async fn handle_get(state: &ServiceState, params: Option<Value>) -> HandlerResult {
    let params: IssueRefParams = parse_params("issues.get", params)?;
    let collection = state.collection(params.collection.as_deref())?;

    let issue = state.engine.get(&collection, &params.id).await?;

    to_result(IssueResult {
        status: STATUS_OK,
        issue,
    })
}

async fn handle_markdown_create(state: &ServiceState, params: Option<Value>) -> HandlerResult {
    let params: CreateParams = parse_params("markdown.create", params)?;
    let collection = state.collection(params.collection.as_deref())?;
    let fields: NewIssue = parse_body("fields", params.fields)?;

    let issue = state
        .engine
        .create_markdown(&collection, fields, &state.shutdown)
        .await?;

    to_result(IssueResult {
        status: STATUS_CREATED,
        issue,
    })
}

async fn handle_markdown_get(state: &ServiceState, params: Option<Value>) -> HandlerResult {
    let params: IssueRefParams = parse_params("markdown.get", params)?;
    let collection = state.collection(params.collection.as_deref())?;

    let issue = state.engine.get_markdown(&collection, &params.id).await?;

    to_result(IssueResult {
        status: STATUS_OK,
        issue,
    })
}

async fn handle_markdown_update(state: &ServiceState, params: Option<Value>) -> HandlerResult {
    let params: MarkdownUpdateParams = parse_params("markdown.update", params)?;
    let collection = state.collection(params.collection.as_deref())?;
    let updates: IssuePatch = parse_body("updates", params.updates)?;

    let outcome = state
        .engine
        .update_markdown(&collection, &params.id, updates, &state.shutdown)
        .await?;

    to_result(MarkdownUpdateResult {
        status: STATUS_OK,
        issue: outcome.issue,
        retry_count: outcome.retry_count,
    })
}

fn handle_service_status(state: &ServiceState) -> HandlerResult {
    to_result(ServiceStatusResult {
        uptime_s: state.uptime_s(),
        backend: state.backend.clone(),
        default_collection: state.default_collection.to_string(),
        protocol_version: PROTOCOL_VERSION.to_string(),
    })
}

/// A failed request: `(code, message, data)` of the error object.
#[derive(Debug)]
struct RpcFailure {
    code: i64,
    message: String,
    data: Option<Value>,
}

impl RpcFailure {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ERR_INVALID_PARAMS, message)
    }
}

impl From<MutationError> for RpcFailure {
    fn from(err: MutationError) -> Self {
        let code = i64::from(err.status_code());
        let message = err.to_string();
        match err {
            MutationError::MergeConflict(result) => {
                let data = serde_json::to_value(ConflictData {
                    success: false,
                    conflict: true,
                    merge_result: *result,
                })
                .ok();
                Self {
                    code,
                    message,
                    data,
                }
            }
            MutationError::Store(_) | MutationError::Encode(_) => {
                tracing::warn!("Store failure: {message}");
                Self::new(code, message)
            }
            _ => Self::new(code, message),
        }
    }
}

/// Missing params are treated as `{}` so methods without required fields
/// can be called bare.
fn parse_params<T: DeserializeOwned>(method: &str, params: Option<Value>) -> Result<T, RpcFailure> {
    let params = params.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    serde_json::from_value(params)
        .map_err(|e| RpcFailure::invalid_params(format!("Invalid {method} params: {e}")))
}

/// Decode a request body field; a bad value is a 400.
fn parse_body<T: DeserializeOwned>(field: &str, value: Value) -> Result<T, RpcFailure> {
    serde_json::from_value(value).map_err(|e| MutationError::validation(field, e.to_string()).into())
}

fn to_result<T: Serialize>(result: T) -> HandlerResult {
    serde_json::to_value(result)
        .map_err(|e| RpcFailure::new(ERR_INTERNAL, format!("Serialize error: {e}")))
}
