//! Wire types for the folio service protocol.

use folio_core::{MetadataUpdate, PortfolioItem, PortfolioMetadata};
use serde::{Deserialize, Serialize};

use crate::sync::SyncStats;

// ─────────────────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────────────────

/// Standard JSON-RPC errors.
pub const ERR_PARSE: i64 = -32700;
pub const ERR_INVALID_REQUEST: i64 = -32600;
pub const ERR_METHOD_NOT_FOUND: i64 = -32601;
pub const ERR_INVALID_PARAMS: i64 = -32602;

/// Service-side failure unrelated to the request.
pub const ERR_INFRA: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Integer(i64),
    String(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub id: RequestId,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub id: RequestId,
    pub error: JsonRpcErrorBody,
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
// portfolio.*
// ─────────────────────────────────────────────────────────────────────────────

/// An uploaded file on the wire; `data` is base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadParam {
    pub file_name: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioCreateParams {
    pub images: Vec<UploadParam>,
    #[serde(flatten)]
    pub metadata: PortfolioMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioUpdateParams {
    pub folder: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<UploadParam>>,
    #[serde(flatten)]
    pub metadata: MetadataUpdate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioDeleteParams {
    pub folder: String,
}

/// Outcome of a mutating operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioListResult {
    pub success: bool,
    #[serde(default)]
    pub data: Vec<PortfolioItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioCreateResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioDeleteResult {
    pub success: bool,
    pub message: String,
    pub folder_deleted: bool,
    pub ledger_entry_deleted: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// git.*
// ─────────────────────────────────────────────────────────────────────────────

fn default_pathspec() -> String {
    ".".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitAddParams {
    #[serde(default = "default_pathspec")]
    pub files: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitCommitParams {
    #[serde(default)]
    pub message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// service.*
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatusResult {
    pub uptime_s: u64,
    pub connections: u32,
    pub working_copy: String,
    pub working_copy_present: bool,
    pub sync: SyncStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorCheck {
    pub name: String,
    pub status: CheckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDoctorResult {
    pub checks: Vec<DoctorCheck>,
}
