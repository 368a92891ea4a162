//! `folio-service` entry point.
//!
//! Loads the configuration, opens the Portfolio Store, starts the git sync
//! worker and serves requests on a Unix socket until Ctrl+C.
//!
//! `--ping` connects to a running service, performs the `hello` handshake
//! and exits; useful as a liveness probe.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use folio_core::{ConfigLoader, FolioConfig};
use folio_service::manager::PortfolioManager;
use folio_service::{PROTOCOL_VERSION, default_socket_path, ipc};

#[derive(Debug, Parser)]
#[command(name = "folio-service", version, about = "Portfolio content service")]
struct Args {
    /// Check that a service answers on the socket, then exit.
    #[arg(long)]
    ping: bool,

    /// Configuration file (default: $FOLIO_CONFIG or ./folio.toml).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Socket path (overrides the configuration).
    #[arg(long, value_name = "PATH")]
    socket: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_config_path(path);
    }
    let config = loader.load().context("failed to load configuration")?;
    let socket = args
        .socket
        .clone()
        .or_else(|| config.socket_path.clone())
        .unwrap_or_else(default_socket_path);

    if args.ping {
        return ping(&socket);
    }
    run_service(config, socket)
}

fn ping(socket: &Path) -> anyhow::Result<()> {
    let mut stream = std::os::unix::net::UnixStream::connect(socket)
        .with_context(|| format!("ping: cannot connect to {}", socket.display()))?;
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
    stream.set_write_timeout(Some(Duration::from_secs(5)))?;

    let hello = serde_json::json!({
        "id": 0,
        "method": "hello",
        "params": {"protocol_version": PROTOCOL_VERSION, "client_version": "ping"},
    });
    stream.write_all(hello.to_string().as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()?;

    let mut reader = std::io::BufReader::new(&stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;

    let response: serde_json::Value =
        serde_json::from_str(line.trim()).context("ping: invalid response JSON")?;
    if response.get("result").is_some() {
        eprintln!("ping: service is alive");
        Ok(())
    } else {
        let message = response
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown error");
        anyhow::bail!("ping: hello failed: {message}")
    }
}

#[tokio::main]
async fn run_service(config: FolioConfig, socket: PathBuf) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("folio-service v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::debug!("configuration: {config:?}");
    tracing::info!("working copy at {}", config.working_copy().display());

    let manager = Arc::new(PortfolioManager::from_config(&config)?);
    let listener = ipc::bind(&socket)
        .with_context(|| format!("failed to bind {}", socket.display()))?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {e}");
            return;
        }
        tracing::info!("signal received, shutting down");
        let _ = shutdown_tx.send(true);
    });

    ipc::serve(Arc::clone(&manager), listener, shutdown_rx).await?;

    manager.shutdown().await;
    if let Err(e) = std::fs::remove_file(&socket) {
        tracing::debug!("could not remove {}: {e}", socket.display());
    }
    tracing::info!("folio-service exiting cleanly");
    Ok(())
}
