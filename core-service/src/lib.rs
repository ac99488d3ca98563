//! # Core Service
//!
//! Façade that wires the reconciliation subsystem together and owns its
//! lifecycle.
//!
//! ## Lifecycle
//!
//! 1. [`CoreService::bootstrap`] opens the database, creates tables, loads the
//!    problem ledger and refresh queue, and closes out scans a previous process
//!    left running.
//! 2. [`CoreService::start`] spawns the refresh worker.
//! 3. [`CoreService::shutdown`] stops the worker, cancels a running scan and
//!    flushes the ledger and queue.
//!
//! ## Surface
//!
//! Observability: scan status, problem list and counts, queue snapshot and
//! stats, scan history, event subscription. Triggers: scan start/cancel,
//! repair batches, force refresh, queue removal.
//!
//! ```ignore
//! let config = CoreConfig::builder()
//!     .proxy_root("/mnt/strm")
//!     .remote_root("/media")
//!     .library_root("/data/strm")
//!     .remote_endpoint("http://alist.local:5244", token)
//!     .library_endpoint("http://emby.local:8096", api_key)
//!     .build()?;
//!
//! let core = bootstrap_desktop(&config).await?;
//! core.start().await;
//! core.start_scan(ScanMode::Full).await?;
//! ```

pub mod db;
pub mod error;

pub use error::{CoreError, Result};

use bridge_traits::{
    ChangeHintSource, Clock, MediaLibrary, ProxyGenerator, ProxyTree, RemoteLister,
};
use core_reconcile::{
    Problem, ProblemCounts, ProblemLedger, ProblemType, ReconcileError, ReconcileScanner,
    RepairExecutor, RepairReport, ScanConfig, ScanJob, ScanJobId, ScanMode, ScanStatusReport,
    SqliteProblemRepository, SqliteScanHistoryRepository,
};
use core_refresh::{
    QueueItem, QueueStats, QueueStatus, RefreshConfig, RefreshQueue, RefreshReport,
    RefreshWorker, SortBy, SortOrder, SqliteRefreshQueueRepository,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::{EventBus, Receiver, CoreEvent, DEFAULT_EVENT_BUFFER_SIZE};
use core_runtime::PathMapper;
use db::DatabaseConfig;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

#[cfg(feature = "desktop-shims")]
use bridge_desktop::{LocalProxyTree, StrmProxyGenerator};
#[cfg(feature = "desktop-shims")]
use bridge_traits::SystemClock;
#[cfg(feature = "desktop-shims")]
use provider_alist::AlistConnector;
#[cfg(feature = "desktop-shims")]
use provider_emby::EmbyConnector;

/// Aggregated handle to the collaborators the core requires.
pub struct CoreDependencies {
    pub remote: Arc<dyn RemoteLister>,
    pub change_hints: Option<Arc<dyn ChangeHintSource>>,
    pub proxy_tree: Arc<dyn ProxyTree>,
    pub generator: Arc<dyn ProxyGenerator>,
    pub library: Arc<dyn MediaLibrary>,
    pub clock: Arc<dyn Clock>,
}

impl CoreDependencies {
    pub fn new(
        remote: Arc<dyn RemoteLister>,
        proxy_tree: Arc<dyn ProxyTree>,
        generator: Arc<dyn ProxyGenerator>,
        library: Arc<dyn MediaLibrary>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            remote,
            change_hints: None,
            proxy_tree,
            generator,
            library,
            clock,
        }
    }

    pub fn with_change_hints(mut self, hints: Arc<dyn ChangeHintSource>) -> Self {
        self.change_hints = Some(hints);
        self
    }
}

/// Tunables for one service instance
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub mapper: PathMapper,
    pub database: DatabaseConfig,
    pub scan: ScanConfig,
    pub refresh: RefreshConfig,
    pub event_buffer: usize,
}

impl ServiceConfig {
    pub fn new(mapper: PathMapper) -> Self {
        Self {
            mapper,
            database: DatabaseConfig::in_memory(),
            scan: ScanConfig::default(),
            refresh: RefreshConfig::default(),
            event_buffer: DEFAULT_EVENT_BUFFER_SIZE,
        }
    }

    pub fn from_core_config(config: &CoreConfig) -> Self {
        Self {
            mapper: PathMapper::from_config(config),
            database: DatabaseConfig::new(&config.database_path),
            scan: ScanConfig::from_core_config(config),
            refresh: RefreshConfig::default(),
            event_buffer: DEFAULT_EVENT_BUFFER_SIZE,
        }
    }

    pub fn with_database(mut self, database: DatabaseConfig) -> Self {
        self.database = database;
        self
    }

    pub fn with_scan(mut self, scan: ScanConfig) -> Self {
        self.scan = scan;
        self
    }

    pub fn with_refresh(mut self, refresh: RefreshConfig) -> Self {
        self.refresh = refresh;
        self
    }
}

struct WorkerHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Primary façade exposed to host applications.
pub struct CoreService {
    pool: SqlitePool,
    event_bus: Arc<EventBus>,
    ledger: Arc<ProblemLedger>,
    scanner: Arc<ReconcileScanner>,
    repair: RepairExecutor,
    queue: Arc<RefreshQueue>,
    worker: Arc<RefreshWorker>,
    running: Mutex<Option<WorkerHandle>>,
}

impl CoreService {
    /// Open storage, restore persisted state and wire every component
    #[instrument(skip_all)]
    pub async fn bootstrap(config: ServiceConfig, deps: CoreDependencies) -> Result<Self> {
        let pool = db::create_pool(config.database.clone()).await?;
        let event_bus = Arc::new(EventBus::new(config.event_buffer));

        let problems = SqliteProblemRepository::new(pool.clone());
        problems.initialize().await?;
        let history = SqliteScanHistoryRepository::new(pool.clone());
        history.initialize().await?;
        let queue_repository = SqliteRefreshQueueRepository::new(pool.clone());
        queue_repository.initialize().await?;

        let ledger = Arc::new(ProblemLedger::new(
            Arc::new(problems),
            Arc::clone(&deps.clock),
        ));
        let loaded_problems = ledger.load().await?;

        let queue = Arc::new(RefreshQueue::new(
            Arc::new(queue_repository),
            Arc::clone(&deps.clock),
            Arc::clone(&event_bus),
            config.refresh.clone(),
        ));
        let loaded_items = queue.load().await?;

        let mut scanner = ReconcileScanner::new(
            config.scan.clone(),
            config.mapper.clone(),
            Arc::clone(&deps.remote),
            Arc::clone(&deps.proxy_tree),
            Arc::clone(&ledger),
            Arc::new(history),
            Arc::clone(&event_bus),
            Arc::clone(&deps.clock),
        );
        if let Some(hints) = deps.change_hints.clone() {
            scanner = scanner.with_change_hints(hints);
        }
        let scanner = Arc::new(scanner);
        scanner.recover().await?;

        let repair = RepairExecutor::new(
            Arc::clone(&ledger),
            Arc::clone(&deps.proxy_tree),
            Arc::clone(&deps.generator),
            config.mapper.clone(),
            Arc::clone(&queue),
            Arc::clone(&event_bus),
        );
        let worker = Arc::new(RefreshWorker::new(
            Arc::clone(&queue),
            Arc::clone(&deps.library),
            config.mapper.clone(),
        ));

        info!(
            problems = loaded_problems,
            queue_items = loaded_items,
            "Core service bootstrapped"
        );

        Ok(Self {
            pool,
            event_bus,
            ledger,
            scanner,
            repair,
            queue,
            worker,
            running: Mutex::new(None),
        })
    }

    /// Spawn the refresh worker; a second call is a no-op
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let handle = Arc::clone(&self.worker).spawn(token.clone());
        *running = Some(WorkerHandle { token, handle });
        info!("Refresh worker started");
    }

    /// Stop background work and persist in-memory state
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(WorkerHandle { token, handle }) = self.running.lock().await.take() {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Refresh worker ended abnormally");
            }
        }

        match self.scanner.cancel_scan().await {
            Ok(job_id) => info!("Cancelled scan {} for shutdown", job_id),
            Err(ReconcileError::NoActiveScan) => {}
            Err(e) => warn!(error = %e, "Could not cancel running scan"),
        }
        self.scanner.wait_idle().await;

        self.ledger.flush().await?;
        self.queue.flush().await?;
        self.pool.close().await;

        info!("Core service shut down");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Observability
    // ------------------------------------------------------------------------

    pub async fn scan_status(&self) -> ScanStatusReport {
        self.scanner.status().await
    }

    pub async fn scan_history(&self, limit: Option<u32>) -> Result<Vec<ScanJob>> {
        Ok(self.scanner.history(limit).await?)
    }

    pub async fn list_problems(&self, filter: Option<ProblemType>) -> Vec<Problem> {
        let mut problems = self.ledger.list_problems(filter).await;
        problems.sort_by(|a, b| a.path.cmp(&b.path));
        problems
    }

    pub async fn problem_counts(&self) -> ProblemCounts {
        self.ledger.counts().await
    }

    pub async fn list_queue(
        &self,
        status: Option<QueueStatus>,
        sort_by: SortBy,
        order: SortOrder,
    ) -> Vec<QueueItem> {
        self.queue.list_queue(status, sort_by, order).await
    }

    pub async fn queue_stats(&self) -> QueueStats {
        self.queue.stats().await
    }

    pub fn subscribe_events(&self) -> Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }

    // ------------------------------------------------------------------------
    // Triggers
    // ------------------------------------------------------------------------

    pub async fn start_scan(&self, mode: ScanMode) -> Result<ScanJobId> {
        Ok(self.scanner.start_scan(mode).await?)
    }

    /// Run a scan on the caller's task and return the finished job
    pub async fn run_scan(&self, mode: ScanMode) -> Result<ScanJob> {
        Ok(self.scanner.scan_now(mode).await?)
    }

    pub async fn cancel_scan(&self) -> Result<ScanJobId> {
        Ok(self.scanner.cancel_scan().await?)
    }

    /// Repair the given paths, or every recorded problem of the type when `None`
    pub async fn repair(&self, problem_type: ProblemType, paths: Option<Vec<String>>) -> RepairReport {
        match (problem_type, paths) {
            (_, None) => self.repair.repair_all(problem_type).await,
            (ProblemType::InvalidProxy, Some(paths)) => self.repair.repair_invalid(&paths).await,
            (ProblemType::MissingProxy, Some(paths)) => self.repair.repair_missing(&paths).await,
        }
    }

    pub async fn enqueue_refresh(&self, path: &str) -> Result<QueueItem> {
        Ok(self.queue.enqueue(path, None).await?)
    }

    pub async fn force_refresh(&self, path: &str) -> Result<QueueItem> {
        Ok(self.worker.force_refresh(path).await?)
    }

    pub async fn force_refresh_failed(&self) -> RefreshReport {
        self.worker.force_refresh_failed().await
    }

    /// Drop terminal queue entries for `path`
    pub async fn remove_from_queue(&self, path: &str) -> Result<usize> {
        Ok(self.queue.remove(path).await?)
    }

    /// Attempt every due queue item now instead of waiting for the next poll
    pub async fn process_due_refreshes(&self) -> Result<usize> {
        Ok(self.worker.run_once().await?)
    }
}

/// Bootstrap with the desktop adapters and the AList/Emby connectors
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap_desktop(config: &CoreConfig) -> Result<CoreService> {
    let http_client = config
        .http_client
        .clone()
        .ok_or_else(|| CoreError::CapabilityMissing {
            capability: "HttpClient".to_string(),
            message: "CoreConfig was built without an HTTP client".to_string(),
        })?;

    let alist = Arc::new(AlistConnector::new(
        Arc::clone(&http_client),
        &config.remote_endpoint,
        config.remote_root.clone(),
    ));
    let library = Arc::new(EmbyConnector::new(http_client, &config.library_endpoint));
    let proxy_tree = Arc::new(LocalProxyTree::new(
        config.proxy_root.clone(),
        config.proxy_url_base.clone(),
    ));
    let generator = Arc::new(
        StrmProxyGenerator::new(
            config.proxy_root.clone(),
            config.remote_root.clone(),
            config.proxy_url_base.clone(),
        )
        .with_url_encoding(config.encode_proxy_urls),
    );

    let deps = CoreDependencies::new(
        alist.clone(),
        proxy_tree,
        generator,
        library,
        Arc::new(SystemClock),
    )
    .with_change_hints(alist);

    CoreService::bootstrap(ServiceConfig::from_core_config(config), deps).await
}
