//! Runs one sync engine per configured channel.
//!
//! Workers share the ledger source and the storage backend but nothing
//! else. A failing worker is logged once and stops contributing data; its
//! siblings keep running. With a non-zero restart budget, transient
//! failures start a fresh engine after a backoff delay, which resumes from
//! the last durable marker.

use crate::config::{IndexerConfig, RestartConfig};
use crate::core::engine::SyncEngine;
use crate::storage::StorageBackend;
use crate::streams::LedgerSource;
use crate::utils::error::{IndexerError, Result};
use crate::utils::logging;
use crate::utils::retry::{compute_backoff, is_transient};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// How a channel worker ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    /// Cancelled or the ledger closed the stream.
    Stopped,
    /// The worker stopped on an error, reported once.
    Failed(String),
}

/// Supervisor of all channel workers.
pub struct Supervisor {
    config: IndexerConfig,
    ledger: Arc<dyn LedgerSource>,
    storage: Arc<dyn StorageBackend>,
    cancel: CancellationToken,
}

impl Supervisor {
    #[must_use]
    pub fn new(
        config: IndexerConfig,
        ledger: Arc<dyn LedgerSource>,
        storage: Arc<dyn StorageBackend>,
    ) -> Self {
        Self {
            config,
            ledger,
            storage,
            cancel: CancellationToken::new(),
        }
    }

    /// Process-wide cancellation token observed by every worker.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Asks every worker to stop after the block it is processing.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Cancels all workers on Ctrl+C.
    pub fn install_ctrl_c_handler(&self) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                logging::log(logging::LogLevel::Warning, "Shutdown signal received");
                cancel.cancel();
            }
        });
    }

    /// Initializes every channel's storage unit, runs the workers and waits
    /// until all of them exited.
    ///
    /// A channel whose storage cannot be initialized is reported as failed
    /// and gets no worker.
    pub async fn run(&self) -> BTreeMap<String, ChannelOutcome> {
        let mut outcomes = BTreeMap::new();
        let mut workers = JoinSet::new();
        let mut task_channels = HashMap::new();

        for channel in &self.config.channels {
            if let Err(e) = self.storage.init(channel).await {
                logging::log_error(&format!("Storage init for channel {channel}"), &e.to_string());
                outcomes.insert(channel.clone(), ChannelOutcome::Failed(e.to_string()));
                continue;
            }

            let handle = workers.spawn(supervise_channel(
                channel.clone(),
                Arc::clone(&self.ledger),
                Arc::clone(&self.storage),
                self.config.restart,
                self.cancel.clone(),
            ));
            task_channels.insert(handle.id(), channel.clone());
            tracing::info!(channel = %channel, "Started channel worker");
        }

        while let Some(joined) = workers.join_next_with_id().await {
            let (channel, result) = match joined {
                Ok((id, result)) => (task_channels.remove(&id), result),
                Err(join_error) => (
                    task_channels.remove(&join_error.id()),
                    Err(IndexerError::InternalError(format!(
                        "worker task failed: {join_error}"
                    ))),
                ),
            };
            let channel = channel.unwrap_or_default();

            let outcome = match result {
                Ok(()) => {
                    tracing::info!(channel = %channel, "Channel worker stopped");
                    ChannelOutcome::Stopped
                }
                Err(e) => {
                    logging::log_error(&format!("Channel {channel} stopped"), &e.to_string());
                    ChannelOutcome::Failed(e.to_string())
                }
            };
            outcomes.insert(channel, outcome);
        }

        outcomes
    }
}

/// Runs engines for `channel` until one ends cleanly, fails permanently, or
/// the restart budget is spent.
async fn supervise_channel(
    channel: String,
    ledger: Arc<dyn LedgerSource>,
    storage: Arc<dyn StorageBackend>,
    restart: RestartConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let mut restarts = 0;
    loop {
        let engine = SyncEngine::new(
            channel.clone(),
            Arc::clone(&ledger),
            Arc::clone(&storage),
            cancel.clone(),
        );

        let err = match engine.run().await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if restart.max_restarts == 0 || !is_transient(&err) || cancel.is_cancelled() {
            return Err(err);
        }
        if restarts >= restart.max_restarts {
            return Err(IndexerError::RetryExhausted {
                attempts: restarts + 1,
                last_error: err.to_string(),
            });
        }

        restarts += 1;
        let delay = compute_backoff(&restart, restarts);
        tracing::warn!(
            channel = %channel,
            attempt = restarts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "Restarting channel worker"
        );

        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            () = tokio::time::sleep(delay) => {}
        }
    }
}
