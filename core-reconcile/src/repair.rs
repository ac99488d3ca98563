//! # Repair Executor
//!
//! Acts on problems from the ledger: stale proxies are deleted, missing ones
//! are generated and queued for a library refresh.
//!
//! Each path is handled independently. A failure is recorded in the
//! [`RepairReport`] and the batch moves on to the next path.
//!
//! ```ignore
//! let report = executor.repair_missing(&["movies/A.mkv".to_string()]).await;
//! assert!(report.failed.is_empty());
//! ```

use crate::ledger::ProblemLedger;
use crate::{ProblemType, Result};
use bridge_traits::{ProxyGenerator, ProxyTree, RemoteEntry};
use core_refresh::RefreshQueue;
use core_runtime::events::{CoreEvent, EventBus, RepairEvent};
use core_runtime::PathMapper;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairFailure {
    pub path: String,
    pub reason: String,
}

/// Per-path outcome of a repair batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<RepairFailure>,
}

impl RepairReport {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct RepairExecutor {
    ledger: Arc<ProblemLedger>,
    proxy_tree: Arc<dyn ProxyTree>,
    generator: Arc<dyn ProxyGenerator>,
    mapper: PathMapper,
    queue: Arc<RefreshQueue>,
    event_bus: Arc<EventBus>,
}

impl RepairExecutor {
    pub fn new(
        ledger: Arc<ProblemLedger>,
        proxy_tree: Arc<dyn ProxyTree>,
        generator: Arc<dyn ProxyGenerator>,
        mapper: PathMapper,
        queue: Arc<RefreshQueue>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            ledger,
            proxy_tree,
            generator,
            mapper,
            queue,
            event_bus,
        }
    }

    /// Delete the given proxies and clear their `InvalidProxy` problems
    ///
    /// A proxy that is already gone counts as repaired.
    #[instrument(skip(self, paths), fields(count = paths.len()))]
    pub async fn repair_invalid(&self, paths: &[String]) -> RepairReport {
        let mut report = RepairReport::default();

        for path in paths {
            match self.delete_one(path).await {
                Ok(()) => {
                    self.emit(RepairEvent::ProxyDeleted { path: path.clone() });
                    report.succeeded.push(path.clone());
                }
                Err(e) => self.record_failure(&mut report, path, ProblemType::InvalidProxy, e),
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Invalid proxy repair finished"
        );
        report
    }

    /// Generate proxies for the given media paths and queue a refresh for each
    #[instrument(skip(self, paths), fields(count = paths.len()))]
    pub async fn repair_missing(&self, paths: &[String]) -> RepairReport {
        let mut report = RepairReport::default();

        for path in paths {
            match self.generate_one(path).await {
                Ok(proxy_path) => {
                    self.emit(RepairEvent::ProxyGenerated {
                        path: path.clone(),
                        proxy_path,
                    });
                    report.succeeded.push(path.clone());
                }
                Err(e) => self.record_failure(&mut report, path, ProblemType::MissingProxy, e),
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Missing proxy repair finished"
        );
        report
    }

    /// Repair every recorded problem of one type
    pub async fn repair_all(&self, problem_type: ProblemType) -> RepairReport {
        let mut paths: Vec<String> = self
            .ledger
            .list_problems(Some(problem_type))
            .await
            .into_iter()
            .map(|p| p.path)
            .collect();
        paths.sort();

        match problem_type {
            ProblemType::InvalidProxy => self.repair_invalid(&paths).await,
            ProblemType::MissingProxy => self.repair_missing(&paths).await,
        }
    }

    async fn delete_one(&self, path: &str) -> Result<()> {
        let relative = self.mapper.relative_to_proxy(path)?;
        if !self.proxy_tree.delete_proxy(&relative).await? {
            debug!(path = %relative, "Proxy already removed");
        }
        self.ledger
            .clear_problem(&relative, ProblemType::InvalidProxy)
            .await?;
        Ok(())
    }

    async fn generate_one(&self, path: &str) -> Result<String> {
        let relative = self.mapper.relative_to_proxy(path)?;
        let remote = self.mapper.to_remote(&relative)?;

        let generated = self
            .generator
            .generate_proxy(&RemoteEntry::file(remote, 0))
            .await?;
        let proxy_path = self.mapper.relative_to_proxy(&generated)?;

        // Queue first so a failed enqueue leaves the problem to repair again
        self.queue.enqueue(&proxy_path, None).await?;
        self.ledger
            .clear_problem(&relative, ProblemType::MissingProxy)
            .await?;

        Ok(proxy_path)
    }

    fn record_failure(
        &self,
        report: &mut RepairReport,
        path: &str,
        problem_type: ProblemType,
        error: crate::ReconcileError,
    ) {
        warn!(path = %path, problem_type = %problem_type, error = %error, "Repair failed");
        self.emit(RepairEvent::RepairFailed {
            path: path.to_string(),
            problem_type: problem_type.as_str().to_string(),
            reason: error.to_string(),
        });
        report.failed.push(RepairFailure {
            path: path.to_string(),
            reason: error.to_string(),
        });
    }

    fn emit(&self, event: RepairEvent) {
        self.event_bus.emit(CoreEvent::Repair(event)).ok();
    }
}
