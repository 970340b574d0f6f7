//! IPC protocol types for the issuevault service.
//!
//! Requests are `{id, method, params}`, responses `{id, result}` or
//! `{id, error: {code, message, data?}}`, one JSON object per line.
//! Operation failures use HTTP-equivalent statuses as `code`; malformed
//! traffic uses the JSON-RPC codes below.

use issuevault_engine::codec::SkippedEntry;
use issuevault_engine::{Comment, Issue, ListFilter, MergeResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Error codes (JSON-RPC error.code)
// ─────────────────────────────────────────────────────────────────────────────

/// Standard JSON-RPC errors.
pub const ERR_INVALID_REQUEST: i64 = -32600;
pub const ERR_METHOD_NOT_FOUND: i64 = -32601;
pub const ERR_INVALID_PARAMS: i64 = -32602;
pub const ERR_INTERNAL: i64 = -32603;

/// HTTP-equivalent statuses carried in successful results.
pub const STATUS_OK: u16 = 200;
pub const STATUS_CREATED: u16 = 201;

// ─────────────────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Integer(i64),
    String(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: RequestId,
    pub result: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub id: RequestId,
    pub error: ErrorObject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handshake
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloParams {
    pub protocol_version: String,
    pub client_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloResult {
    pub protocol_version: String,
    pub service_version: String,
    pub capabilities: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// issues.*
// ─────────────────────────────────────────────────────────────────────────────

/// Params naming one issue. Used by `issues.delete`, `issues.get` and
/// `markdown.get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRefParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    pub id: String,
}

/// `updates` and `baseState` stay raw here so a bad field value is
/// reported as a 400 rather than a protocol error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    pub id: String,
    pub updates: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_state: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    pub fields: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkUpdateParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    pub ids: Vec<String>,
    pub updates: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(flatten)]
    pub filter: ListFilter,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub status: u16,
    pub success: bool,
    pub merge_result: MergeResult,
    pub retry_count: u32,
}

/// `error.data` for a 409.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictData {
    pub success: bool,
    pub conflict: bool,
    pub merge_result: MergeResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssueResult {
    pub status: u16,
    pub issue: Issue,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteResult {
    pub status: u16,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpdateResult {
    pub status: u16,
    pub success: bool,
    pub updated: usize,
    pub retry_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentResult {
    pub status: u16,
    pub comment: Comment,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub status: u16,
    pub issues: Vec<Issue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedEntry>,
}

// ─────────────────────────────────────────────────────────────────────────────
// markdown.*
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkdownUpdateParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    pub id: String,
    pub updates: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkdownUpdateResult {
    pub status: u16,
    pub issue: Issue,
    pub retry_count: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// service.status
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatusResult {
    pub uptime_s: u64,
    pub backend: String,
    pub default_collection: String,
    pub protocol_version: String,
}
