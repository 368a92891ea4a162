//! Unix domain socket listener.
//!
//! Reads newline-delimited JSON-RPC-lite requests, dispatches them to the
//! [`PortfolioManager`] and writes one response line per request.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;

use crate::PROTOCOL_VERSION;
use crate::manager::{ManagerError, PortfolioManager};
use crate::protocol::*;

type RpcResult = Result<serde_json::Value, (i64, String)>;

/// Methods advertised by `hello`.
const CAPABILITIES: &[&str] = &[
    "portfolio.list",
    "portfolio.create",
    "portfolio.update",
    "portfolio.delete",
    "git.clone",
    "git.pull",
    "git.add",
    "git.commit",
    "git.push",
    "service.status",
    "service.doctor",
];

/// Bind the socket at `path`, replacing a stale socket file left by a
/// previous run.
pub fn bind(path: &Path) -> std::io::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(path)?;
    tracing::info!("folio service listening on {}", path.display());
    Ok(listener)
}

/// Accept connections until `shutdown` flips to `true`.
pub async fn serve(
    manager: Arc<PortfolioManager>,
    listener: UnixListener,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let mgr = Arc::clone(&manager);
                    tokio::spawn(async move {
                        mgr.inc_connections();
                        if let Err(e) = handle_connection(&mgr, stream).await {
                            tracing::warn!("connection error: {e}");
                        }
                        mgr.dec_connections();
                    });
                }
                Err(e) => tracing::error!("accept error: {e}"),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("listener shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(manager: &PortfolioManager, stream: UnixStream) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = dispatch_message(manager, trimmed).await;
        let mut bytes = serde_json::to_vec(&response).unwrap_or_else(|_| b"{}".to_vec());
        bytes.push(b'\n');
        writer.write_all(&bytes).await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Parse one request line and build its response object.
pub async fn dispatch_message(manager: &PortfolioManager, raw: &str) -> serde_json::Value {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            return error_response(RequestId::Integer(0), ERR_PARSE, format!("Parse error: {e}"));
        }
    };
    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            return error_response(
                RequestId::Integer(0),
                ERR_INVALID_REQUEST,
                format!("Invalid JSON-RPC: {e}"),
            );
        }
    };

    tracing::debug!("request {:?}: {}", request.id, request.method);
    let id = request.id.clone();
    match dispatch_method(manager, &request.method, request.params).await {
        Ok(result) => serde_json::to_value(JsonRpcResponse { id, result }).unwrap_or_default(),
        Err((code, message)) => error_response(id, code, message),
    }
}

async fn dispatch_method(
    manager: &PortfolioManager,
    method: &str,
    params: Option<serde_json::Value>,
) -> RpcResult {
    match method {
        "hello" => handle_hello(params),
        "portfolio.list" => respond(manager.list().await),
        "portfolio.create" => respond(manager.create(parse(method, params)?).await),
        "portfolio.update" => respond(manager.update(parse(method, params)?).await),
        "portfolio.delete" => respond(manager.delete(parse(method, params)?).await),
        "git.clone" => respond(manager.git_clone().await),
        "git.pull" => respond(manager.git_pull().await),
        "git.add" => {
            let params: GitAddParams = parse_or_default(method, params)?;
            respond(manager.git_add(params.files).await)
        }
        "git.commit" => {
            let params: GitCommitParams = parse_or_default(method, params)?;
            respond(manager.git_commit(params.message).await)
        }
        "git.push" => respond(manager.git_push().await),
        "service.status" => to_value(manager.status()),
        "service.doctor" => respond(manager.doctor().await),
        _ => Err((ERR_METHOD_NOT_FOUND, format!("Unknown method: {method}"))),
    }
}

fn handle_hello(params: Option<serde_json::Value>) -> RpcResult {
    let hello: HelloParams = parse("hello", params)?;

    if hello.protocol_version != PROTOCOL_VERSION {
        return Err((
            ERR_INVALID_PARAMS,
            format!(
                "Incompatible protocol version: client={}, service={}",
                hello.protocol_version, PROTOCOL_VERSION
            ),
        ));
    }
    tracing::debug!("hello from client {}", hello.client_version);

    to_value(HelloResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        service_version: env!("CARGO_PKG_VERSION").to_string(),
        capabilities: CAPABILITIES.iter().map(ToString::to_string).collect(),
    })
}

/// Params are required.
fn parse<T: DeserializeOwned>(
    method: &str,
    params: Option<serde_json::Value>,
) -> Result<T, (i64, String)> {
    let params = params.ok_or_else(|| (ERR_INVALID_PARAMS, "Missing params".to_string()))?;
    serde_json::from_value(params)
        .map_err(|e| (ERR_INVALID_PARAMS, format!("Invalid {method} params: {e}")))
}

/// Params may be omitted; every field has a default.
fn parse_or_default<T: DeserializeOwned>(
    method: &str,
    params: Option<serde_json::Value>,
) -> Result<T, (i64, String)> {
    parse(method, Some(params.unwrap_or_else(|| serde_json::json!({}))))
}

fn respond<T: Serialize>(result: Result<T, ManagerError>) -> RpcResult {
    result
        .map_err(|e| manager_error_to_rpc(&e))
        .and_then(to_value)
}

fn to_value<T: Serialize>(value: T) -> RpcResult {
    serde_json::to_value(value).map_err(|e| (ERR_INFRA, format!("Serialize error: {e}")))
}

fn manager_error_to_rpc(err: &ManagerError) -> (i64, String) {
    match err {
        ManagerError::InvalidRequest { .. } => (ERR_INVALID_PARAMS, err.to_string()),
        ManagerError::Infra(_) => (ERR_INFRA, err.to_string()),
    }
}

fn error_response(id: RequestId, code: i64, message: String) -> serde_json::Value {
    serde_json::to_value(JsonRpcError {
        id,
        error: JsonRpcErrorBody {
            code,
            message,
            data: None,
        },
    })
    .unwrap_or_default()
}
