//! `issuevault-service`: the issue mutation surface over a Unix domain socket.
//!
//! Listens at `$XDG_RUNTIME_DIR/issuevault.sock` (or the configured path)
//! and speaks newline-delimited JSON-RPC-lite. Every issue method runs
//! through one [`issuevault_engine::IssueEngine`] bound to the configured
//! content store.

pub mod backend;
pub mod config;
pub mod ipc;
pub mod protocol;

/// Protocol version for the service IPC.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Default socket filename.
pub const SOCKET_FILENAME: &str = "issuevault.sock";

/// Get the default socket path using XDG_RUNTIME_DIR.
///
/// Falls back to `/tmp/issuevault-<username>.sock` if XDG_RUNTIME_DIR is not set.
pub fn default_socket_path() -> std::path::PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        std::path::PathBuf::from(runtime_dir).join(SOCKET_FILENAME)
    } else {
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
        std::path::PathBuf::from(format!("/tmp/issuevault-{user}.sock"))
    }
}
