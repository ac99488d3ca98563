//! # Refresh Worker
//!
//! Single background loop that drains the refresh queue.
//!
//! Every poll interval the worker claims due items in batches of
//! `max_concurrent_attempts`, resolves each against the media library, asks
//! the library to refresh what it found, and folds the outcome back into the
//! queue. An item's failure, including an unreachable library, only affects
//! that item; the loop keeps running until its cancellation token fires.
//!
//! ## Usage
//!
//! ```ignore
//! let worker = Arc::new(RefreshWorker::new(queue, library, mapper));
//! let token = CancellationToken::new();
//! let handle = worker.spawn(token.clone());
//!
//! // ...
//! token.cancel();
//! handle.await?;
//! ```

use crate::queue::RefreshQueue;
use crate::resolver::ItemResolver;
use crate::{AttemptOutcome, QueueItem, QueueStatus, RefreshError, Result};
use bridge_traits::MediaLibrary;
use core_runtime::PathMapper;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// A path that could not be refreshed in a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshFailure {
    pub path: String,
    pub reason: String,
}

/// Per-path breakdown of a batch refresh
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<RefreshFailure>,
}

pub struct RefreshWorker {
    queue: Arc<RefreshQueue>,
    resolver: ItemResolver,
    library: Arc<dyn MediaLibrary>,
}

impl RefreshWorker {
    pub fn new(queue: Arc<RefreshQueue>, library: Arc<dyn MediaLibrary>, mapper: PathMapper) -> Self {
        Self {
            queue,
            resolver: ItemResolver::new(Arc::clone(&library), mapper),
            library,
        }
    }

    pub fn queue(&self) -> &Arc<RefreshQueue> {
        &self.queue
    }

    /// Run the polling loop on the tokio runtime until `token` is cancelled
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(token).await })
    }

    pub async fn run(&self, token: CancellationToken) {
        let poll_interval = self.queue.config().poll_interval;
        info!(poll_secs = poll_interval.as_secs(), "Refresh worker started");

        loop {
            if token.is_cancelled() {
                break;
            }

            match self.run_once().await {
                Ok(0) => {}
                Ok(processed) => debug!(processed, "Refresh tick finished"),
                Err(e) => error!(error = %e, "Refresh tick failed"),
            }

            if let Err(e) = self.queue.prune_history().await {
                warn!(error = %e, "Failed to prune refresh history");
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = sleep(poll_interval) => {}
            }
        }

        info!("Refresh worker stopped");
    }

    /// Attempt every item that is due now, returning how many were attempted
    pub async fn run_once(&self) -> Result<usize> {
        let batch_size = self.queue.config().max_concurrent_attempts.max(1);
        let mut processed = 0;

        loop {
            let batch = self.queue.claim_due(batch_size).await?;
            if batch.is_empty() {
                break;
            }
            processed += batch.len();

            let results = join_all(batch.into_iter().map(|item| self.process(item))).await;
            for result in results {
                if let Err(e) = result {
                    error!(error = %e, "Failed to record refresh outcome");
                }
            }
        }

        Ok(processed)
    }

    /// One immediate attempt for `path`, ignoring its schedule
    #[instrument(skip(self), fields(path = %path))]
    pub async fn force_refresh(&self, path: &str) -> Result<QueueItem> {
        let item = self.queue.begin_force(path).await?;
        self.process(item).await
    }

    /// Force one attempt for every terminally failed path
    pub async fn force_refresh_failed(&self) -> RefreshReport {
        let mut report = RefreshReport::default();

        for path in self.queue.failed_paths().await {
            match self.force_refresh(&path).await {
                Ok(item) if item.status() == QueueStatus::Success => report.succeeded.push(path),
                Ok(item) => report.failed.push(RefreshFailure {
                    reason: item
                        .last_error()
                        .unwrap_or("refresh did not succeed")
                        .to_string(),
                    path,
                }),
                Err(e) => report.failed.push(RefreshFailure {
                    path,
                    reason: e.to_string(),
                }),
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Forced refresh of failed items finished"
        );
        report
    }

    async fn process(&self, item: QueueItem) -> Result<QueueItem> {
        let outcome = self.attempt(&item).await;
        self.queue.record_outcome(&item.id, outcome).await
    }

    async fn attempt(&self, item: &QueueItem) -> AttemptOutcome {
        let limit = self.queue.config().attempt_timeout;
        let result = match timeout(limit, self.resolve_and_refresh(item)).await {
            Ok(result) => result,
            Err(_) => Err(RefreshError::Timeout(limit.as_secs())),
        };

        match result {
            Ok(library_item_id) => AttemptOutcome::Refreshed { library_item_id },
            Err(e) => AttemptOutcome::Failed {
                message: e.to_string(),
            },
        }
    }

    async fn resolve_and_refresh(&self, item: &QueueItem) -> Result<String> {
        let library_item = self
            .resolver
            .resolve(&item.path, item.media_type)
            .await?
            .ok_or_else(|| RefreshError::NotFound(item.path.clone()))?;

        self.library.refresh_item(&library_item.id).await?;
        Ok(library_item.id)
    }
}
