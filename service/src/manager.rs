//! PortfolioManager: the request-handler role between the socket and the
//! Portfolio Store.
//!
//! Every domain outcome is turned into a `success`/`message` result here.
//! Successful mutations hand a commit message to the [`SyncOrchestrator`]
//! and get its advisory note appended. `ManagerError` is reserved for
//! requests that cannot be carried out at all.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use folio_core::{FolioConfig, ImageCrateNormalizer, PortfolioStore, StoreError, Upload};
use folio_git_tooling::{CommitIdentity, GitClient, GitClientConfig};

use crate::protocol::{
    CheckStatus, DoctorCheck, OperationResult, PortfolioCreateParams, PortfolioCreateResult,
    PortfolioDeleteParams, PortfolioDeleteResult, PortfolioListResult, PortfolioUpdateParams,
    ServiceDoctorResult, ServiceStatusResult, UploadParam,
};
use crate::sync::{Schedule, SyncOrchestrator};

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("infrastructure error: {0}")]
    Infra(String),
}

pub struct PortfolioManager {
    store: Arc<PortfolioStore>,
    git: GitClient,
    sync: SyncOrchestrator,
    /// Whether a remote URL is configured; reported by `service.doctor`.
    has_remote: bool,
    started_at: Instant,
    connection_count: AtomicU32,
}

impl PortfolioManager {
    /// Build the store, the git client and the sync worker from `config`.
    ///
    /// Must run inside a tokio runtime: the sync worker is spawned here.
    pub fn from_config(config: &FolioConfig) -> Result<Self, ManagerError> {
        let store = PortfolioStore::new(
            config.store_config(),
            Arc::new(ImageCrateNormalizer::default()),
        )
        .map_err(|e| ManagerError::Infra(format!("failed to open portfolio store: {e}")))?;

        let git = GitClient::new(GitClientConfig {
            repo_path: config.working_copy(),
            remote_url: config.repo_url.clone(),
            token: config.token.clone(),
            identity: CommitIdentity {
                name: config.commit_name.clone(),
                email: config.commit_email.clone(),
            },
        });

        Ok(Self::new(
            store,
            git,
            config.repo_url.is_some(),
            config.sync_queue_capacity,
        ))
    }

    pub fn new(
        store: PortfolioStore,
        git: GitClient,
        has_remote: bool,
        sync_queue_capacity: usize,
    ) -> Self {
        let sync = SyncOrchestrator::start(git.clone(), sync_queue_capacity);
        Self {
            store: Arc::new(store),
            git,
            sync,
            has_remote,
            started_at: Instant::now(),
            connection_count: AtomicU32::new(0),
        }
    }

    pub fn uptime_s(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn inc_connections(&self) -> u32 {
        self.connection_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn dec_connections(&self) -> u32 {
        self.connection_count
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1)
    }

    pub fn connection_count(&self) -> u32 {
        self.connection_count.load(Ordering::Relaxed)
    }

    /// Stop the sync worker after it has drained its queue.
    pub async fn shutdown(&self) {
        self.sync.shutdown().await;
    }

    // ── portfolio.* ─────────────────────────────────────────────────────────

    pub async fn list(&self) -> Result<PortfolioListResult, ManagerError> {
        let items = self.with_store(PortfolioStore::list_items).await?;
        Ok(match items {
            Ok(data) => PortfolioListResult {
                success: true,
                data,
                message: None,
            },
            Err(e) => {
                tracing::warn!("listing portfolios failed: {e}");
                PortfolioListResult {
                    success: false,
                    data: Vec::new(),
                    message: Some(e.to_string()),
                }
            }
        })
    }

    pub async fn create(
        &self,
        params: PortfolioCreateParams,
    ) -> Result<PortfolioCreateResult, ManagerError> {
        if params.images.is_empty() {
            return Ok(PortfolioCreateResult {
                success: false,
                message: "No images were uploaded".to_string(),
                folder: None,
            });
        }
        let uploads = decode_uploads(&params.images)?;
        let metadata = params.metadata;

        let created = self
            .with_store(move |store| store.create_portfolio(&uploads, metadata))
            .await?;
        Ok(match created {
            Ok(key) => {
                tracing::info!("created portfolio {key}");
                let schedule = self.sync.schedule(format!("Create portfolio {key}"));
                PortfolioCreateResult {
                    success: true,
                    message: with_note(format!("Created portfolio {key}."), schedule),
                    folder: Some(key.to_string()),
                }
            }
            Err(e) => {
                log_store_error("create", &e);
                PortfolioCreateResult {
                    success: false,
                    message: e.to_string(),
                    folder: None,
                }
            }
        })
    }

    /// Replace images when `images` is present, then merge any metadata
    /// fields. A rejected image batch stops the update before the ledger is
    /// touched; otherwise both halves are attempted and a sync is scheduled
    /// if either changed something.
    pub async fn update(
        &self,
        params: PortfolioUpdateParams,
    ) -> Result<OperationResult, ManagerError> {
        let uploads = params.images.as_deref().map(decode_uploads).transpose()?;
        let update = params.metadata;
        if uploads.is_none() && update.is_empty() {
            return Ok(OperationResult::failed(
                "Nothing to update: provide images or at least one description field",
            ));
        }

        let folder = params.folder;
        let key = folder.clone();
        let (replaced, described) = self
            .with_store(move |store| {
                let replaced = uploads.map(|files| store.replace_images(&key, &files));
                if matches!(&replaced, Some(Err(e)) if e.is_validation()) {
                    return (replaced, None);
                }
                let described =
                    (!update.is_empty()).then(|| store.update_description(&key, &update));
                (replaced, described)
            })
            .await?;

        let mut changed = false;
        let mut failed = false;
        let mut notes = Vec::new();
        for (stage, outcome) in [("replace", replaced), ("describe", described)] {
            match outcome {
                Some(Ok(message)) => {
                    changed = true;
                    notes.push(message);
                }
                Some(Err(e)) => {
                    log_store_error(stage, &e);
                    failed = true;
                    notes.push(e.to_string());
                }
                None => {}
            }
        }

        let mut message = notes.join("; ");
        if changed {
            let schedule = self.sync.schedule(format!("Update portfolio {folder}"));
            message = with_note(format!("{message}."), schedule);
        }
        Ok(OperationResult {
            success: !failed,
            message,
        })
    }

    pub async fn delete(
        &self,
        params: PortfolioDeleteParams,
    ) -> Result<PortfolioDeleteResult, ManagerError> {
        let folder = params.folder;
        let key = folder.clone();
        let deleted = self
            .with_store(move |store| store.delete_portfolio(&key))
            .await?;

        Ok(match deleted {
            Ok(outcome) => {
                let mut message = outcome.message.clone();
                if outcome.folder_deleted || outcome.ledger_entry_deleted {
                    let schedule = self.sync.schedule(format!("Delete portfolio {folder}"));
                    message = with_note(format!("{message}."), schedule);
                }
                PortfolioDeleteResult {
                    success: outcome.success(),
                    message,
                    folder_deleted: outcome.folder_deleted,
                    ledger_entry_deleted: outcome.ledger_entry_deleted,
                }
            }
            Err(e) => {
                log_store_error("delete", &e);
                PortfolioDeleteResult {
                    success: false,
                    message: e.to_string(),
                    folder_deleted: false,
                    ledger_entry_deleted: false,
                }
            }
        })
    }

    // ── git.* ───────────────────────────────────────────────────────────────

    pub async fn git_clone(&self) -> Result<OperationResult, ManagerError> {
        self.with_git(|git| git.clone_repo().map(|outcome| outcome.to_string()))
            .await
    }

    pub async fn git_pull(&self) -> Result<OperationResult, ManagerError> {
        self.with_git(|git| git.pull().map(|outcome| outcome.to_string()))
            .await
    }

    pub async fn git_add(&self, pathspec: String) -> Result<OperationResult, ManagerError> {
        self.with_git(move |git| git.add(&pathspec)).await
    }

    pub async fn git_commit(&self, message: String) -> Result<OperationResult, ManagerError> {
        if message.trim().is_empty() {
            return Ok(OperationResult::failed("Commit message must not be empty"));
        }
        self.with_git(move |git| git.commit(&message).map(|outcome| outcome.to_string()))
            .await
    }

    pub async fn git_push(&self) -> Result<OperationResult, ManagerError> {
        self.with_git(|git| git.push().map(|outcome| outcome.to_string()))
            .await
    }

    // ── service.* ───────────────────────────────────────────────────────────

    pub fn status(&self) -> ServiceStatusResult {
        ServiceStatusResult {
            uptime_s: self.uptime_s(),
            connections: self.connection_count(),
            working_copy: self.git.repo_path().display().to_string(),
            working_copy_present: self.git.working_copy_exists(),
            sync: self.sync.stats(),
        }
    }

    pub async fn doctor(&self) -> Result<ServiceDoctorResult, ManagerError> {
        let mut checks = Vec::new();

        checks.push(match which::which("git") {
            Ok(path) => check("git", CheckStatus::Ok, path.display().to_string()),
            Err(e) => check("git", CheckStatus::Fail, format!("git binary not found: {e}")),
        });

        let repo_path = self.git.repo_path().display().to_string();
        checks.push(if self.git.working_copy_exists() {
            check("working_copy", CheckStatus::Ok, repo_path)
        } else {
            check(
                "working_copy",
                CheckStatus::Warn,
                format!("{repo_path} is not cloned yet; run `folio git clone`"),
            )
        });

        let ledger = self.with_store(|store| store.ledger().load()).await?;
        let ledger_path = self.store.ledger().path().display().to_string();
        checks.push(match ledger {
            Ok(entries) => check(
                "ledger",
                CheckStatus::Ok,
                format!("{ledger_path}: {} entries", entries.len()),
            ),
            Err(e) => check("ledger", CheckStatus::Fail, e.to_string()),
        });

        checks.push(if self.git.has_token() {
            check("token", CheckStatus::Ok, "access token configured")
        } else {
            check(
                "token",
                CheckStatus::Warn,
                "no access token; pull and push run unauthenticated",
            )
        });

        checks.push(if self.has_remote {
            check("remote", CheckStatus::Ok, "remote URL configured")
        } else {
            check(
                "remote",
                CheckStatus::Warn,
                "no remote URL; clone is unavailable",
            )
        });

        Ok(ServiceDoctorResult { checks })
    }

    /// Run a Store call on the blocking pool.
    async fn with_store<T, F>(&self, f: F) -> Result<T, ManagerError>
    where
        T: Send + 'static,
        F: FnOnce(&PortfolioStore) -> T + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| ManagerError::Infra(format!("store task failed: {e}")))
    }

    /// Run a git call under the shared git lock, so it never overlaps a
    /// background sync.
    async fn with_git<F>(&self, f: F) -> Result<OperationResult, ManagerError>
    where
        F: FnOnce(&GitClient) -> folio_git_tooling::Result<String> + Send + 'static,
    {
        let lock = self.sync.git_lock();
        let _guard = lock.lock().await;
        let git = self.git.clone();
        let outcome = tokio::task::spawn_blocking(move || f(&git))
            .await
            .map_err(|e| ManagerError::Infra(format!("git task failed: {e}")))?;
        Ok(match outcome {
            Ok(message) => OperationResult::ok(message),
            Err(e) => {
                tracing::warn!("{e}");
                OperationResult::failed(e.to_string())
            }
        })
    }
}

/// Decode base64 upload payloads.
pub fn decode_uploads(params: &[UploadParam]) -> Result<Vec<Upload>, ManagerError> {
    params
        .iter()
        .map(|param| {
            STANDARD
                .decode(param.data.as_bytes())
                .map(|data| Upload::new(param.file_name.clone(), data))
                .map_err(|e| ManagerError::InvalidRequest {
                    reason: format!("'{}' is not valid base64: {e}", param.file_name),
                })
        })
        .collect()
}

fn with_note(message: String, schedule: Schedule) -> String {
    format!("{message} {}", schedule.note())
}

fn log_store_error(operation: &str, err: &StoreError) {
    if err.is_validation() {
        tracing::info!("{operation} rejected: {err}");
    } else {
        tracing::warn!("{operation} failed: {err}");
    }
}

fn check(name: &str, status: CheckStatus, detail: impl Into<String>) -> DoctorCheck {
    DoctorCheck {
        name: name.to_string(),
        status,
        detail: Some(detail.into()),
    }
}
