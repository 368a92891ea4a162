//! Background git sync.
//!
//! Mutating requests hand a commit message to [`SyncOrchestrator::schedule`]
//! and return immediately. One worker drains a bounded queue and, per job,
//! pulls and then runs add/commit/push, so git never runs twice at once.
//! When the queue is full the job is dropped: the pending jobs' `add .`
//! already covers its changes.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use folio_git_tooling::{GitClient, PublishOutcome};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
struct SyncJob {
    message: String,
}

/// What happened to a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Queued,
    /// Queue full; the job's changes ride along with a pending job.
    Coalesced,
    /// The worker has shut down.
    Closed,
}

impl Schedule {
    /// Advisory appended to the caller's message.
    pub fn note(self) -> &'static str {
        match self {
            Schedule::Queued => {
                "Git sync is running in the background; its result is not known yet."
            }
            Schedule::Coalesced => {
                "A git sync is already pending and will include this change."
            }
            Schedule::Closed => "Git sync is unavailable because the service is shutting down.",
        }
    }
}

/// Result of one pull + add/commit/push pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum SyncReport {
    /// No working copy yet; nothing to sync.
    Skipped,
    Pushed,
    NoChanges,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastSync {
    pub message: String,
    pub report: SyncReport,
    pub finished_at: DateTime<Utc>,
}

/// Counters reported by `service.status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub queued: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub coalesced: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<LastSync>,
}

pub struct SyncOrchestrator {
    tx: Mutex<Option<Sender<SyncJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<Mutex<SyncStats>>,
    /// Held by the worker for each job and by direct `git.*` requests.
    git_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SyncOrchestrator {
    /// Spawn the worker on the current tokio runtime.
    pub fn start(git: GitClient, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stats = Arc::new(Mutex::new(SyncStats::default()));
        let git_lock = Arc::new(tokio::sync::Mutex::new(()));
        let worker = tokio::spawn(run_worker(
            git,
            rx,
            Arc::clone(&stats),
            Arc::clone(&git_lock),
        ));
        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            stats,
            git_lock,
        }
    }

    /// Queue a sync with `message` as the commit message. Never blocks.
    pub fn schedule(&self, message: impl Into<String>) -> Schedule {
        let job = SyncJob {
            message: message.into(),
        };
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = tx.as_ref() else {
            tracing::warn!("sync worker stopped, dropping sync for '{}'", job.message);
            return Schedule::Closed;
        };
        match tx.try_send(job) {
            Ok(()) => {
                self.update_stats(|stats| stats.queued += 1);
                Schedule::Queued
            }
            Err(TrySendError::Full(job)) => {
                tracing::info!("sync queue full, coalescing '{}'", job.message);
                self.update_stats(|stats| stats.coalesced += 1);
                Schedule::Coalesced
            }
            Err(TrySendError::Closed(job)) => {
                tracing::warn!("sync worker stopped, dropping sync for '{}'", job.message);
                Schedule::Closed
            }
        }
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn git_lock(&self) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&self.git_lock)
    }

    /// Stop accepting jobs and wait for the queued ones to finish.
    pub async fn shutdown(&self) {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(tx);

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            tracing::info!("draining sync queue");
            if let Err(e) = worker.await {
                tracing::error!("sync worker panicked: {e}");
            }
        }
    }

    fn update_stats(&self, update: impl FnOnce(&mut SyncStats)) {
        update(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

async fn run_worker(
    git: GitClient,
    mut rx: Receiver<SyncJob>,
    stats: Arc<Mutex<SyncStats>>,
    git_lock: Arc<tokio::sync::Mutex<()>>,
) {
    while let Some(job) = rx.recv().await {
        let _git = git_lock.lock().await;
        let client = git.clone();
        let message = job.message.clone();
        let report = match tokio::task::spawn_blocking(move || sync_once(&client, &message)).await
        {
            Ok(report) => report,
            Err(e) => SyncReport::Failed(format!("sync task aborted: {e}")),
        };

        match &report {
            SyncReport::Skipped => {
                tracing::info!("sync '{}' skipped: working copy not cloned", job.message)
            }
            SyncReport::Pushed => tracing::info!("sync '{}' pushed", job.message),
            SyncReport::NoChanges => tracing::info!("sync '{}': nothing to push", job.message),
            SyncReport::Failed(detail) => {
                tracing::warn!("sync '{}' failed: {detail}", job.message)
            }
        }

        let mut totals = stats.lock().unwrap_or_else(PoisonError::into_inner);
        match report {
            SyncReport::Skipped => totals.skipped += 1,
            SyncReport::Failed(_) => totals.failed += 1,
            SyncReport::Pushed | SyncReport::NoChanges => totals.completed += 1,
        }
        totals.last = Some(LastSync {
            message: job.message,
            report,
            finished_at: Utc::now(),
        });
    }
    tracing::debug!("sync worker exiting");
}

/// Pull, then add/commit/push. A failed pull is logged and the push is
/// still attempted.
pub fn sync_once(git: &GitClient, message: &str) -> SyncReport {
    if !git.working_copy_exists() {
        return SyncReport::Skipped;
    }

    if let Err(e) = git.pull() {
        tracing::warn!("pull before sync failed: {e}");
    }

    match git.add_commit_push(message) {
        Ok(PublishOutcome::Pushed { .. }) => SyncReport::Pushed,
        Ok(PublishOutcome::NoChanges) => SyncReport::NoChanges,
        Err(e) => SyncReport::Failed(e.to_string()),
    }
}
