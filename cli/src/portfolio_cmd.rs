//! `folio` subcommands.
//!
//! Thin IPC client: every command connects to `folio-service` over its
//! Unix socket, performs the `hello` handshake and sends one request.
//!
//! ## Commands
//!
//! - `folio portfolio list|create|update|delete`
//! - `folio git clone|pull|add|commit|push`
//! - `folio service status|doctor`

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::{Args, Parser, Subcommand};
use folio_core::{ConfigLoader, MetadataUpdate};
use folio_service::protocol::{
    GitAddParams, GitCommitParams, OperationResult, PortfolioCreateParams, PortfolioCreateResult,
    PortfolioDeleteParams, PortfolioDeleteResult, PortfolioListResult, PortfolioUpdateParams,
    ServiceDoctorResult, ServiceStatusResult, UploadParam,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

#[derive(Debug, Parser)]
#[command(name = "folio", version, about = "Manage portfolios through folio-service")]
pub struct FolioCli {
    /// Override the service socket path.
    #[arg(long, global = true, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// Configuration file used to find the socket.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print raw JSON results.
    #[arg(long, short = 'j', global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: FolioSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum FolioSubcommand {
    /// List, create, update or delete portfolios.
    #[command(subcommand)]
    Portfolio(PortfolioSubcommand),
    /// Manual git operations on the working copy.
    #[command(subcommand)]
    Git(GitSubcommand),
    /// Service status and health checks.
    #[command(subcommand)]
    Service(ServiceSubcommand),
}

#[derive(Debug, Subcommand)]
pub enum PortfolioSubcommand {
    /// List portfolios, newest first.
    List,
    /// Create a portfolio from image files.
    Create(CreateArgs),
    /// Replace images and/or change description fields.
    Update(UpdateArgs),
    /// Delete a portfolio folder and its description.
    Delete(DeleteArgs),
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    /// Image file to upload; repeat for several.
    #[arg(long = "image", short = 'i', value_name = "FILE", required = true)]
    pub images: Vec<PathBuf>,

    #[command(flatten)]
    pub metadata: MetadataArgs,
}

#[derive(Debug, Args)]
pub struct UpdateArgs {
    /// Folder key, e.g. `w3`.
    pub folder: String,

    /// Replacement image named `<number>.<ext>`; repeat for several.
    #[arg(long = "image", short = 'i', value_name = "FILE")]
    pub images: Vec<PathBuf>,

    #[command(flatten)]
    pub metadata: MetadataArgs,
}

#[derive(Debug, Args)]
pub struct DeleteArgs {
    /// Folder key, e.g. `w3`.
    pub folder: String,
}

/// Description fields; omitted ones are left unchanged on update.
#[derive(Debug, Default, Args)]
pub struct MetadataArgs {
    #[arg(long)]
    pub project_name: Option<String>,
    /// Style description.
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub area: Option<String>,
    #[arg(long)]
    pub date: Option<String>,
    #[arg(long)]
    pub size: Option<String>,
    #[arg(long)]
    pub location: Option<String>,
    #[arg(long)]
    pub category: Option<String>,
}

impl From<&MetadataArgs> for MetadataUpdate {
    fn from(args: &MetadataArgs) -> Self {
        MetadataUpdate {
            project_name: args.project_name.clone(),
            description: args.description.clone(),
            area: args.area.clone(),
            date: args.date.clone(),
            size: args.size.clone(),
            location: args.location.clone(),
            category: args.category.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum GitSubcommand {
    /// Clone the remote into the working copy.
    Clone,
    Pull,
    /// Stage files.
    Add {
        #[arg(default_value = ".")]
        files: String,
    },
    Commit {
        #[arg(long, short = 'm')]
        message: String,
    },
    Push,
}

#[derive(Debug, Subcommand)]
pub enum ServiceSubcommand {
    /// Uptime, connections and sync counters.
    Status,
    /// Run health checks.
    Doctor,
}

// ─────────────────────────────────────────────────────────────────────────────
// IPC client
// ─────────────────────────────────────────────────────────────────────────────

/// Handshake, then send one request and return its `result`.
pub fn send_rpc(
    socket_path: &Path,
    method: &str,
    params: serde_json::Value,
) -> anyhow::Result<serde_json::Value> {
    let stream = UnixStream::connect(socket_path).with_context(|| {
        format!(
            "cannot connect to folio-service at {}\nHint: start it with `folio-service`",
            socket_path.display()
        )
    })?;
    let mut writer = stream.try_clone().context("clone stream")?;
    let mut reader = BufReader::new(stream);

    let hello = exchange(
        &mut writer,
        &mut reader,
        serde_json::json!({
            "id": 0,
            "method": "hello",
            "params": {
                "protocol_version": folio_service::PROTOCOL_VERSION,
                "client_version": env!("CARGO_PKG_VERSION"),
            }
        }),
    )?;
    if let Some(error) = hello.get("error") {
        bail!("handshake failed: {}", rpc_message(error));
    }

    let response = exchange(
        &mut writer,
        &mut reader,
        serde_json::json!({"id": 1, "method": method, "params": params}),
    )?;
    if let Some(error) = response.get("error") {
        bail!("RPC error: {}", rpc_message(error));
    }
    Ok(response
        .get("result")
        .cloned()
        .unwrap_or(serde_json::Value::Null))
}

fn exchange(
    writer: &mut UnixStream,
    reader: &mut BufReader<UnixStream>,
    request: serde_json::Value,
) -> anyhow::Result<serde_json::Value> {
    let mut bytes = serde_json::to_vec(&request).context("serialize request")?;
    bytes.push(b'\n');
    writer.write_all(&bytes).context("write request")?;
    writer.flush().context("flush request")?;

    let mut line = String::new();
    reader.read_line(&mut line).context("read response")?;
    if line.is_empty() {
        bail!("service closed the connection");
    }
    serde_json::from_str(&line).context("parse response")
}

fn rpc_message(error: &serde_json::Value) -> &str {
    error
        .get("message")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("unknown error")
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch
// ─────────────────────────────────────────────────────────────────────────────

impl FolioCli {
    pub fn run(&self) -> anyhow::Result<()> {
        let socket = self.socket_path()?;
        let client = Client {
            socket: &socket,
            json: self.json,
        };
        match &self.command {
            FolioSubcommand::Portfolio(cmd) => client.portfolio(cmd),
            FolioSubcommand::Git(cmd) => client.git(cmd),
            FolioSubcommand::Service(cmd) => client.service(cmd),
        }
    }

    /// `--socket`, else the configured socket, else the default path.
    fn socket_path(&self) -> anyhow::Result<PathBuf> {
        if let Some(socket) = &self.socket {
            return Ok(socket.clone());
        }
        let mut loader = ConfigLoader::new();
        if let Some(path) = &self.config {
            loader = loader.with_config_path(path);
        }
        let config = loader.load().context("failed to load configuration")?;
        Ok(config
            .socket_path
            .unwrap_or_else(folio_service::default_socket_path))
    }
}

struct Client<'a> {
    socket: &'a Path,
    json: bool,
}

impl Client<'_> {
    fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: impl Serialize,
    ) -> anyhow::Result<(T, serde_json::Value)> {
        let params = serde_json::to_value(params).context("serialize params")?;
        let raw = send_rpc(self.socket, method, params)?;
        let typed = serde_json::from_value(raw.clone())
            .with_context(|| format!("unexpected {method} result: {raw}"))?;
        Ok((typed, raw))
    }

    fn print_json(&self, raw: &serde_json::Value) {
        println!(
            "{}",
            serde_json::to_string_pretty(raw).unwrap_or_else(|_| "{}".to_string())
        );
    }

    /// Print an operation outcome; a failed one becomes the command's error.
    fn finish(
        &self,
        success: bool,
        message: &str,
        raw: &serde_json::Value,
    ) -> anyhow::Result<()> {
        if self.json {
            self.print_json(raw);
        } else if success {
            println!("{message}");
        }
        if success {
            Ok(())
        } else {
            bail!("{message}")
        }
    }

    fn portfolio(&self, cmd: &PortfolioSubcommand) -> anyhow::Result<()> {
        match cmd {
            PortfolioSubcommand::List => {
                let (result, raw): (PortfolioListResult, _) =
                    self.call("portfolio.list", serde_json::json!({}))?;
                if self.json {
                    self.print_json(&raw);
                } else if !result.success {
                    bail!("{}", result.message.unwrap_or_default());
                } else if result.data.is_empty() {
                    println!("No portfolios");
                } else {
                    for item in &result.data {
                        println!(
                            "{:<6} {:<24} {} images",
                            item.folder,
                            item.metadata.project_name,
                            item.images.len()
                        );
                    }
                }
                Ok(())
            }
            PortfolioSubcommand::Create(args) => {
                let params = PortfolioCreateParams {
                    images: read_uploads(&args.images)?,
                    metadata: MetadataUpdate::from(&args.metadata).into_metadata(),
                };
                let (result, raw): (PortfolioCreateResult, _) =
                    self.call("portfolio.create", params)?;
                self.finish(result.success, &result.message, &raw)
            }
            PortfolioSubcommand::Update(args) => {
                let images = if args.images.is_empty() {
                    None
                } else {
                    Some(read_uploads(&args.images)?)
                };
                let params = PortfolioUpdateParams {
                    folder: args.folder.clone(),
                    images,
                    metadata: MetadataUpdate::from(&args.metadata),
                };
                let (result, raw): (OperationResult, _) = self.call("portfolio.update", params)?;
                self.finish(result.success, &result.message, &raw)
            }
            PortfolioSubcommand::Delete(args) => {
                let params = PortfolioDeleteParams {
                    folder: args.folder.clone(),
                };
                let (result, raw): (PortfolioDeleteResult, _) =
                    self.call("portfolio.delete", params)?;
                self.finish(result.success, &result.message, &raw)
            }
        }
    }

    fn git(&self, cmd: &GitSubcommand) -> anyhow::Result<()> {
        let (method, params) = match cmd {
            GitSubcommand::Clone => ("git.clone", serde_json::json!({})),
            GitSubcommand::Pull => ("git.pull", serde_json::json!({})),
            GitSubcommand::Add { files } => (
                "git.add",
                serde_json::to_value(GitAddParams {
                    files: files.clone(),
                })?,
            ),
            GitSubcommand::Commit { message } => (
                "git.commit",
                serde_json::to_value(GitCommitParams {
                    message: message.clone(),
                })?,
            ),
            GitSubcommand::Push => ("git.push", serde_json::json!({})),
        };
        let (result, raw): (OperationResult, _) = self.call(method, params)?;
        self.finish(result.success, &result.message, &raw)
    }

    fn service(&self, cmd: &ServiceSubcommand) -> anyhow::Result<()> {
        match cmd {
            ServiceSubcommand::Status => {
                let (status, raw): (ServiceStatusResult, _) =
                    self.call("service.status", serde_json::json!({}))?;
                if self.json {
                    self.print_json(&raw);
                    return Ok(());
                }
                println!(
                    "folio-service: uptime {}s, {} connections",
                    status.uptime_s, status.connections
                );
                let presence = if status.working_copy_present {
                    "present"
                } else {
                    "not cloned"
                };
                println!("working copy: {} ({presence})", status.working_copy);
                let sync = &status.sync;
                println!(
                    "sync: {} queued, {} completed, {} failed, {} skipped, {} coalesced",
                    sync.queued, sync.completed, sync.failed, sync.skipped, sync.coalesced
                );
                if let Some(last) = &sync.last {
                    println!(
                        "last sync: '{}' at {}: {:?}",
                        last.message, last.finished_at, last.report
                    );
                }
                Ok(())
            }
            ServiceSubcommand::Doctor => {
                let (doctor, raw): (ServiceDoctorResult, _) =
                    self.call("service.doctor", serde_json::json!({}))?;
                if self.json {
                    self.print_json(&raw);
                    return Ok(());
                }
                for check in &doctor.checks {
                    let status = serde_json::to_value(check.status)?;
                    println!(
                        "  [{}] {}: {}",
                        status.as_str().unwrap_or("?"),
                        check.name,
                        check.detail.as_deref().unwrap_or("")
                    );
                }
                Ok(())
            }
        }
    }
}

/// Read files from disk as base64 uploads named by their file name.
pub fn read_uploads(paths: &[PathBuf]) -> anyhow::Result<Vec<UploadParam>> {
    paths
        .iter()
        .map(|path| {
            let data =
                std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .with_context(|| format!("{} has no file name", path.display()))?;
            Ok(UploadParam {
                file_name,
                data: STANDARD.encode(data),
            })
        })
        .collect()
}
