//! # Core Reconcile
//!
//! Finds and repairs drift between the remote media tree and the local proxy
//! tree.
//!
//! ## Overview
//!
//! - [`ReconcileScanner`]: full, incremental and problems-only scans, one at a time
//! - [`ProblemLedger`]: persisted problems keyed by `(path, type)`
//! - [`RepairExecutor`]: deletes stale proxies, generates missing ones and
//!   queues a library refresh for each new proxy
//!
//! ## Path Conventions
//!
//! Ledger paths are relative to the proxy root. A `MissingProxy` problem is
//! keyed by the media path (`movies/A.mkv`), an `InvalidProxy` problem by the
//! proxy path (`movies/B.strm`).
//!
//! ## Usage
//!
//! ```ignore
//! let ledger = Arc::new(ProblemLedger::new(Arc::new(problems), clock.clone()));
//! ledger.load().await?;
//!
//! let scanner = ReconcileScanner::new(
//!     ScanConfig::from_core_config(&config),
//!     mapper.clone(),
//!     lister,
//!     proxy_tree.clone(),
//!     ledger.clone(),
//!     Arc::new(history),
//!     event_bus.clone(),
//!     clock,
//! );
//! scanner.scan_now(ScanMode::Full).await?;
//!
//! let report = executor.repair_all(ProblemType::MissingProxy).await;
//! ```

pub mod config;
pub mod error;
pub mod ledger;
pub mod problem;
pub mod repair;
pub mod repository;
pub mod scan;
pub mod scanner;

#[cfg(test)]
mod testing;

pub use config::ScanConfig;
pub use error::{ReconcileError, Result};
pub use ledger::ProblemLedger;
pub use problem::{Problem, ProblemCounts, ProblemType};
pub use repair::{RepairExecutor, RepairFailure, RepairReport};
pub use repository::{
    ProblemRepository, ScanHistoryRepository, SqliteProblemRepository,
    SqliteScanHistoryRepository,
};
pub use scan::{ScanJob, ScanJobId, ScanMode, ScanProgress, ScanStats, ScanStatus};
pub use scanner::{ReconcileScanner, ScanStatusReport};
