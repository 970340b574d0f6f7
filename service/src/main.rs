//! `issuevault-service` entry point.
//!
//! ## Modes
//!
//! - **Service mode** (default): load configuration, open the content
//!   store, serve the socket until Ctrl+C.
//! - **`--ping`**: connect to the running service socket, send a hello
//!   handshake, verify the response, then exit. Suitable as a health probe.

use std::io::{BufRead, Write};
use std::sync::Arc;

use issuevault_service::backend;
use issuevault_service::config::{ConfigLoader, ServiceConfig};
use issuevault_service::ipc::{self, ServiceState};

/// Connect to the service socket, send a hello handshake, verify the
/// response, then exit.
fn ping(config: &ServiceConfig) -> std::io::Result<()> {
    let path = config.socket_path();
    let mut stream = std::os::unix::net::UnixStream::connect(&path).map_err(|e| {
        std::io::Error::other(format!("ping: cannot connect to {}: {e}", path.display()))
    })?;
    stream.set_read_timeout(Some(std::time::Duration::from_secs(10)))?;
    stream.set_write_timeout(Some(std::time::Duration::from_secs(5)))?;

    let hello = format!(
        r#"{{"id":0,"method":"hello","params":{{"protocol_version":"{}","client_version":"ping"}}}}"#,
        issuevault_service::PROTOCOL_VERSION,
    );
    stream.write_all(hello.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()?;

    let mut reader = std::io::BufReader::new(&stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;

    let resp: serde_json::Value = serde_json::from_str(line.trim())
        .map_err(|e| std::io::Error::other(format!("ping: invalid response JSON: {e}")))?;
    if resp.get("result").is_some() {
        eprintln!("ping: service is alive");
        Ok(())
    } else {
        let msg = resp
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        Err(std::io::Error::other(format!("ping: hello failed: {msg}")))
    }
}

fn main() -> std::io::Result<()> {
    let config = ConfigLoader::load_default()
        .map_err(|e| std::io::Error::other(format!("Failed to load configuration: {e}")))?;

    if std::env::args().nth(1).as_deref() == Some("--ping") {
        return ping(&config);
    }

    run_service(config)
}

#[tokio::main]
async fn run_service(config: ServiceConfig) -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("issuevault-service v{} starting", env!("CARGO_PKG_VERSION"));

    let action_log = backend::open_action_log(&config.action_log)
        .map_err(|e| std::io::Error::other(format!("Failed to open action log: {e}")))?;
    let engine = backend::build_engine(&config, action_log.sink)
        .map_err(|e| std::io::Error::other(format!("Failed to open content store: {e}")))?;

    let state = Arc::new(ServiceState::new(
        engine,
        config.default_collection.clone(),
        backend::describe(&config.backend),
    ));
    let listener = ipc::bind_socket(&config.socket_path())?;

    // Signal handler task: Ctrl+C
    let shutdown = state.shutdown_token();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Signal received, shutting down");
        shutdown.cancel();
    });

    // Blocks until shutdown
    ipc::serve(Arc::clone(&state), listener).await?;

    drop(state);
    if let Some(file) = action_log.file {
        match Arc::try_unwrap(file) {
            Ok(file) => file.close().await,
            Err(_) => tracing::warn!("Action log still shared after shutdown; queued entries not flushed"),
        }
    }

    if let Err(e) = std::fs::remove_file(config.socket_path()) {
        tracing::debug!("Socket cleanup failed: {e}");
    }

    tracing::info!("issuevault-service exiting cleanly");
    Ok(())
}
