//! `folio-service`: owns the Portfolio Store and the git sync worker and
//! serves them over a Unix domain socket.
//!
//! Speaks JSON-RPC-lite: one JSON object per line, `{id, method, params}`
//! in, `{id, result}` or `{id, error}` out. Domain failures are ordinary
//! results with `success: false`; JSON-RPC errors mean the request itself
//! was unusable.

pub mod ipc;
pub mod manager;
pub mod protocol;
pub mod sync;

/// Protocol version checked by the `hello` handshake.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Default socket filename.
pub const SOCKET_FILENAME: &str = "folio.sock";

/// `$XDG_RUNTIME_DIR/folio.sock`, falling back to `/tmp/folio-<user>.sock`.
pub fn default_socket_path() -> std::path::PathBuf {
    if let Some(runtime_dir) = dirs::runtime_dir() {
        runtime_dir.join(SOCKET_FILENAME)
    } else {
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
        std::path::PathBuf::from(format!("/tmp/folio-{user}.sock"))
    }
}
