//! # Reconciliation Scanner
//!
//! Diffs the remote tree against the local proxy tree and records what it
//! finds in the [`ProblemLedger`].
//!
//! ## Modes
//!
//! - **Full**: list the whole remote tree and every proxy. A remote video file
//!   without a proxy is a `MissingProxy`; a proxy whose target is gone is an
//!   `InvalidProxy`.
//! - **Incremental**: the same diff limited to directories the change-hint
//!   source reports as changed since the last completed full scan. Without a
//!   hint source or a completed full scan it runs as Full.
//! - **ProblemsOnly**: re-check the paths already in the ledger; never
//!   discovers new problems.
//!
//! ## Failure Handling
//!
//! A subdirectory that cannot be listed is reported and skipped; problems under
//! it are neither cleared nor added. Failing to list the remote root or to read
//! the proxy tree fails the scan before anything is written to the ledger.
//!
//! Cancellation is checked between top-level directories. A cancelled scan
//! ends `Failed` with "Scan cancelled".
//!
//! ## Usage
//!
//! ```ignore
//! let job_id = scanner.start_scan(ScanMode::Full).await?;
//!
//! let report = scanner.status().await;
//! println!("{} {}% {}", report.status, report.percent(), report.phase());
//! ```

use crate::config::ScanConfig;
use crate::ledger::ProblemLedger;
use crate::repository::ScanHistoryRepository;
use crate::{ProblemType, ReconcileError, Result, ScanJob, ScanJobId, ScanMode, ScanStats, ScanStatus};
use bridge_traits::{BridgeError, ChangeHintSource, Clock, ProxyFile, ProxyTree, RemoteEntry, RemoteLister};
use core_runtime::events::{CoreEvent, EventBus, ScanEvent};
use core_runtime::paths::normalize;
use core_runtime::PathMapper;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

// ============================================================================
// Status Projection
// ============================================================================

/// What callers poll while a scan runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStatusReport {
    pub status: ScanStatus,
    /// Current or most recent job
    pub job: Option<ScanJob>,
    /// Stats of the most recent completed scan
    pub last_stats: Option<ScanStats>,
}

impl ScanStatusReport {
    pub fn percent(&self) -> u8 {
        self.job.as_ref().map_or(0, |j| j.progress.percent)
    }

    pub fn phase(&self) -> &str {
        self.job.as_ref().map_or("Idle", |j| j.progress.phase.as_str())
    }
}

// ============================================================================
// Internal Types
// ============================================================================

struct ActiveScan {
    job_id: ScanJobId,
    cancellation_token: CancellationToken,
}

/// Which part of the remote tree a scan covers
enum ScanScope {
    Everything,
    Subtrees(Vec<String>),
}

impl ScanScope {
    fn contains_remote(&self, remote: &str) -> bool {
        match self {
            ScanScope::Everything => true,
            ScanScope::Subtrees(dirs) => dirs.iter().any(|dir| is_under(remote, dir)),
        }
    }

    /// Proxies without a readable target belong only to full scans
    fn contains_proxy(&self, target: Option<&str>) -> bool {
        match (self, target) {
            (ScanScope::Everything, _) => true,
            (ScanScope::Subtrees(_), None) => false,
            (_, Some(target)) => self.contains_remote(target),
        }
    }
}

#[derive(Default)]
struct RemoteSnapshot {
    /// Every listed file, normalised remote path
    files: HashSet<String>,
    /// Listed files with a video extension
    media: Vec<RemoteEntry>,
    /// Directories whose listing failed
    failed: Vec<String>,
}

impl RemoteSnapshot {
    fn record_file(&mut self, entry: RemoteEntry, config: &ScanConfig) {
        let path = normalize(&entry.path);
        let is_media = entry
            .extension()
            .map_or(false, |ext| config.is_video_extension(&ext));
        self.files.insert(path.clone());
        if is_media {
            self.media.push(RemoteEntry { path, ..entry });
        }
    }

    /// Under a directory that could not be listed
    fn is_unknown(&self, remote: &str) -> bool {
        self.failed.iter().any(|dir| is_under(remote, dir))
    }
}

#[derive(Default)]
struct Findings {
    invalid: BTreeMap<String, String>,
    missing: BTreeMap<String, String>,
    /// Proxies whose target probe failed; their state is unknown
    unverified: HashSet<String>,
    proxies_in_scope: u64,
}

struct ScanOutcome {
    mode: ScanMode,
    stats: ScanStats,
}

fn is_under(path: &str, dir: &str) -> bool {
    if dir == "/" {
        return true;
    }
    path == dir
        || path
            .strip_prefix(dir)
            .map_or(false, |rest| rest.starts_with('/'))
}

// ============================================================================
// Scanner
// ============================================================================

pub struct ReconcileScanner {
    config: ScanConfig,
    mapper: PathMapper,
    lister: Arc<dyn RemoteLister>,
    proxy_tree: Arc<dyn ProxyTree>,
    change_hints: Option<Arc<dyn ChangeHintSource>>,
    ledger: Arc<ProblemLedger>,
    history: Arc<dyn ScanHistoryRepository>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    active: Arc<Mutex<Option<ActiveScan>>>,
    /// `true` while a scan holds `active`
    running: Arc<watch::Sender<bool>>,
    current: Arc<RwLock<Option<ScanJob>>>,
    last_stats: Arc<RwLock<Option<ScanStats>>>,
}

impl ReconcileScanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ScanConfig,
        mapper: PathMapper,
        lister: Arc<dyn RemoteLister>,
        proxy_tree: Arc<dyn ProxyTree>,
        ledger: Arc<ProblemLedger>,
        history: Arc<dyn ScanHistoryRepository>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            mapper,
            lister,
            proxy_tree,
            change_hints: None,
            ledger,
            history,
            event_bus,
            clock,
            active: Arc::new(Mutex::new(None)),
            running: Arc::new(watch::channel(false).0),
            current: Arc::new(RwLock::new(None)),
            last_stats: Arc::new(RwLock::new(None)),
        }
    }

    /// Enable incremental scans
    pub fn with_change_hints(mut self, hints: Arc<dyn ChangeHintSource>) -> Self {
        self.change_hints = Some(hints);
        self
    }

    /// Close out jobs a previous process left running and restore the last stats
    pub async fn recover(&self) -> Result<u64> {
        let interrupted = self
            .history
            .fail_interrupted(self.clock.unix_timestamp())
            .await?;
        if interrupted > 0 {
            warn!(interrupted, "Marked interrupted scans as failed");
        }

        let latest = self.history.history(self.config.history_limit).await?;
        let last_completed = latest
            .iter()
            .find(|job| job.status == ScanStatus::Completed)
            .and_then(|job| job.stats);
        *self.last_stats.write().await = last_completed;
        *self.current.write().await = latest.into_iter().next();

        Ok(interrupted)
    }

    /// Start a scan in the background and return its job ID
    ///
    /// # Errors
    ///
    /// `ScanInProgress` if a scan is already running; the request is not queued.
    #[instrument(skip(self))]
    pub async fn start_scan(&self, mode: ScanMode) -> Result<ScanJobId> {
        let (job, token) = self.begin(mode).await?;
        let job_id = job.id;

        let scanner = Arc::new(self.clone_for_task());
        tokio::spawn(async move {
            if let Err(e) = scanner.run_job(job_id, mode, token).await {
                error!("Scan task {} failed: {}", job_id, e);
            }
        });

        Ok(job_id)
    }

    /// Run a scan to completion on the caller's task
    #[instrument(skip(self))]
    pub async fn scan_now(&self, mode: ScanMode) -> Result<ScanJob> {
        let (job, token) = self.begin(mode).await?;
        self.run_job(job.id, mode, token).await
    }

    /// Request cancellation of the running scan
    pub async fn cancel_scan(&self) -> Result<ScanJobId> {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(scan) => {
                scan.cancellation_token.cancel();
                info!("Cancellation requested for scan {}", scan.job_id);
                Ok(scan.job_id)
            }
            None => Err(ReconcileError::NoActiveScan),
        }
    }

    /// Resolve once no scan is running
    pub async fn wait_idle(&self) {
        let mut running = self.running.subscribe();
        running.wait_for(|running| !*running).await.ok();
    }

    pub async fn status(&self) -> ScanStatusReport {
        let job = self.current.read().await.clone();
        ScanStatusReport {
            status: job.as_ref().map_or(ScanStatus::Idle, |j| j.status),
            job,
            last_stats: *self.last_stats.read().await,
        }
    }

    pub async fn history(&self, limit: Option<u32>) -> Result<Vec<ScanJob>> {
        self.history
            .history(limit.unwrap_or(self.config.history_limit))
            .await
    }

    fn clone_for_task(&self) -> Self {
        Self {
            config: self.config.clone(),
            mapper: self.mapper.clone(),
            lister: Arc::clone(&self.lister),
            proxy_tree: Arc::clone(&self.proxy_tree),
            change_hints: self.change_hints.clone(),
            ledger: Arc::clone(&self.ledger),
            history: Arc::clone(&self.history),
            event_bus: Arc::clone(&self.event_bus),
            clock: Arc::clone(&self.clock),
            active: Arc::clone(&self.active),
            running: Arc::clone(&self.running),
            current: Arc::clone(&self.current),
            last_stats: Arc::clone(&self.last_stats),
        }
    }

    // ------------------------------------------------------------------------
    // Job lifecycle
    // ------------------------------------------------------------------------

    async fn begin(&self, mode: ScanMode) -> Result<(ScanJob, CancellationToken)> {
        let mut active = self.active.lock().await;
        if let Some(scan) = active.as_ref() {
            return Err(ReconcileError::ScanInProgress {
                job_id: scan.job_id.to_string(),
            });
        }

        let job = ScanJob::start(mode, self.clock.unix_timestamp());
        self.history.insert(&job).await?;

        let token = CancellationToken::new();
        *active = Some(ActiveScan {
            job_id: job.id,
            cancellation_token: token.clone(),
        });
        self.running.send_replace(true);
        drop(active);

        *self.current.write().await = Some(job.clone());
        self.emit(ScanEvent::Started {
            job_id: job.id.to_string(),
            mode: mode.as_str().to_string(),
        });
        info!("Started {} scan with job {}", mode, job.id);

        Ok((job, token))
    }

    async fn run_job(
        &self,
        job_id: ScanJobId,
        mode: ScanMode,
        token: CancellationToken,
    ) -> Result<ScanJob> {
        let limit = self.config.scan_timeout;
        let outcome = match timeout(limit, self.execute(&job_id, mode, &token)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ReconcileError::Timeout(limit.as_secs())),
        };

        let finished = self.finish(job_id, outcome).await;

        let mut active = self.active.lock().await;
        if let Ok(job) = &finished {
            *self.current.write().await = Some(job.clone());
        }
        *active = None;
        self.running.send_replace(false);
        drop(active);

        finished
    }

    async fn finish(&self, job_id: ScanJobId, outcome: Result<ScanOutcome>) -> Result<ScanJob> {
        let now = self.clock.unix_timestamp();
        let mut job = self
            .current
            .read()
            .await
            .clone()
            .filter(|job| job.id == job_id)
            .ok_or_else(|| ReconcileError::NotFound(format!("scan job {}", job_id)))?;

        let job = match outcome {
            Ok(ScanOutcome { mode, stats }) => {
                job.mode = mode;
                let job = job.complete(stats, now)?;
                *self.last_stats.write().await = Some(stats);
                info!(
                    total_proxies = stats.total_proxies,
                    invalid_proxies = stats.invalid_proxies,
                    total_media_files = stats.total_media_files,
                    missing_proxies = stats.missing_proxies,
                    "Scan {} completed",
                    job_id
                );
                self.emit(ScanEvent::Completed {
                    job_id: job_id.to_string(),
                    total_proxies: stats.total_proxies,
                    invalid_proxies: stats.invalid_proxies,
                    total_media_files: stats.total_media_files,
                    missing_proxies: stats.missing_proxies,
                    duration_secs: job.duration_secs().unwrap_or(0),
                });
                job
            }
            Err(ReconcileError::Cancelled) => {
                info!("Scan {} cancelled", job_id);
                self.emit(ScanEvent::Cancelled {
                    job_id: job_id.to_string(),
                });
                job.fail(ReconcileError::Cancelled.to_string(), now)?
            }
            Err(e) => {
                error!("Scan {} failed: {}", job_id, e);
                self.emit(ScanEvent::Failed {
                    job_id: job_id.to_string(),
                    message: e.to_string(),
                });
                job.fail(e.to_string(), now)?
            }
        };

        if let Err(e) = self.history.update(&job).await {
            warn!("Failed to record scan {} in history: {}", job_id, e);
        }
        Ok(job)
    }

    async fn execute(
        &self,
        job_id: &ScanJobId,
        mode: ScanMode,
        token: &CancellationToken,
    ) -> Result<ScanOutcome> {
        match mode {
            ScanMode::Full => self.reconcile(job_id, ScanScope::Everything, token).await.map(|stats| {
                ScanOutcome {
                    mode: ScanMode::Full,
                    stats,
                }
            }),
            ScanMode::Incremental => match self.incremental_scope().await? {
                Some(dirs) => {
                    info!(directories = dirs.len(), "Incremental scan over changed directories");
                    let stats = self
                        .reconcile(job_id, ScanScope::Subtrees(dirs), token)
                        .await?;
                    Ok(ScanOutcome {
                        mode: ScanMode::Incremental,
                        stats,
                    })
                }
                None => {
                    let stats = self.reconcile(job_id, ScanScope::Everything, token).await?;
                    Ok(ScanOutcome {
                        mode: ScanMode::Full,
                        stats,
                    })
                }
            },
            ScanMode::ProblemsOnly => {
                let stats = self.recheck_problems(job_id, token).await?;
                Ok(ScanOutcome {
                    mode: ScanMode::ProblemsOnly,
                    stats,
                })
            }
        }
    }

    /// Changed directories since the last completed full scan; `None` means run Full
    async fn incremental_scope(&self) -> Result<Option<Vec<String>>> {
        let Some(hints) = &self.change_hints else {
            info!("No change hint source, falling back to a full scan");
            return Ok(None);
        };

        let marker = self
            .history
            .latest_completed(ScanMode::Full)
            .await?
            .and_then(|job| job.completed_at);
        let Some(since) = marker else {
            info!("No completed full scan yet, falling back to a full scan");
            return Ok(None);
        };

        match hints.changed_directories(since).await {
            Ok(dirs) => {
                let mut dirs: Vec<String> = dirs.iter().map(|d| normalize(d)).collect();
                dirs.sort();
                dirs.dedup();
                Ok(Some(dirs))
            }
            Err(e) => {
                warn!("Change hints unavailable ({}), falling back to a full scan", e);
                Ok(None)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Full and incremental diff
    // ------------------------------------------------------------------------

    async fn reconcile(
        &self,
        job_id: &ScanJobId,
        scope: ScanScope,
        token: &CancellationToken,
    ) -> Result<ScanStats> {
        info!("Phase 1: Listing remote tree");
        self.progress(job_id, 5, "Listing remote tree").await;
        let snapshot = self.list_remote(job_id, &scope, token).await?;
        check_cancelled(token)?;

        info!("Phase 2: Reading proxy tree");
        self.progress(job_id, 70, "Reading proxy tree").await;
        let proxies = self.proxy_tree.list_proxies().await?;
        check_cancelled(token)?;

        info!("Phase 3: Comparing trees");
        self.progress(job_id, 80, "Comparing trees").await;
        let findings = self.compare(&scope, &snapshot, &proxies).await?;
        check_cancelled(token)?;

        info!("Phase 4: Updating problem ledger");
        self.progress(job_id, 90, "Updating problem ledger").await;
        self.apply(&scope, &snapshot, &proxies, &findings).await?;

        Ok(ScanStats {
            total_proxies: findings.proxies_in_scope,
            invalid_proxies: findings.invalid.len() as u64,
            total_media_files: snapshot.media.len() as u64,
            missing_proxies: findings.missing.len() as u64,
            failed_subtrees: snapshot.failed.len() as u64,
        })
    }

    async fn list_remote(
        &self,
        job_id: &ScanJobId,
        scope: &ScanScope,
        token: &CancellationToken,
    ) -> Result<RemoteSnapshot> {
        let mut snapshot = RemoteSnapshot::default();

        let steps = match scope {
            ScanScope::Everything => {
                let root = self.mapper.to_remote("")?;
                let entries = self.lister.list_directory(&root).await.map_err(|e| {
                    error!("Cannot list remote root {}: {}", root, e);
                    ReconcileError::from(e)
                })?;

                let mut dirs = Vec::new();
                for entry in entries {
                    if entry.is_dir {
                        dirs.push(normalize(&entry.path));
                    } else {
                        snapshot.record_file(entry, &self.config);
                    }
                }
                dirs.sort();
                dirs
            }
            ScanScope::Subtrees(dirs) => dirs.clone(),
        };

        let total = steps.len();
        for (index, dir) in steps.iter().enumerate() {
            check_cancelled(token)?;
            self.walk(job_id, dir, &mut snapshot).await;

            let percent = 5 + (65 * (index + 1) / total.max(1)) as u8;
            self.progress(
                job_id,
                percent,
                &format!("Listing remote tree ({}/{})", index + 1, total),
            )
            .await;
        }

        debug!(
            files = snapshot.files.len(),
            media = snapshot.media.len(),
            failed = snapshot.failed.len(),
            "Remote listing finished"
        );
        Ok(snapshot)
    }

    async fn walk(&self, job_id: &ScanJobId, dir: &str, snapshot: &mut RemoteSnapshot) {
        let mut stack = vec![dir.to_string()];

        while let Some(current) = stack.pop() {
            match self.lister.list_directory(&current).await {
                Ok(entries) => {
                    for entry in entries {
                        if entry.is_dir {
                            stack.push(normalize(&entry.path));
                        } else {
                            snapshot.record_file(entry, &self.config);
                        }
                    }
                }
                Err(BridgeError::NotFound(_)) => {
                    debug!(path = %current, "Remote directory no longer exists");
                }
                Err(e) => {
                    warn!(path = %current, error = %e, "Skipping remote subtree");
                    self.emit(ScanEvent::SubtreeFailed {
                        job_id: job_id.to_string(),
                        path: current.clone(),
                        message: e.to_string(),
                    });
                    snapshot.failed.push(current);
                }
            }
        }
    }

    async fn compare(
        &self,
        scope: &ScanScope,
        snapshot: &RemoteSnapshot,
        proxies: &[ProxyFile],
    ) -> Result<Findings> {
        let remote_root = self.mapper.to_remote("")?;
        let mut findings = Findings::default();

        for proxy in proxies {
            let target = proxy.target.as_deref().map(normalize);
            if !scope.contains_proxy(target.as_deref()) {
                continue;
            }
            findings.proxies_in_scope += 1;

            let Some(target) = target else {
                findings.invalid.insert(
                    proxy.path.clone(),
                    "Proxy file has no readable target".to_string(),
                );
                continue;
            };

            if snapshot.files.contains(&target) || snapshot.is_unknown(&target) {
                continue;
            }

            if is_under(&target, &remote_root) {
                findings.invalid.insert(
                    proxy.path.clone(),
                    format!("Remote target {} no longer exists", target),
                );
            } else if self.config.probe_unlisted_targets {
                match self.lister.probe_file(&target).await {
                    Ok(true) => {}
                    Ok(false) => {
                        findings.invalid.insert(
                            proxy.path.clone(),
                            format!("Remote target {} not found", target),
                        );
                    }
                    Err(e) => {
                        warn!(path = %proxy.path, error = %e, "Could not probe proxy target");
                        findings.unverified.insert(proxy.path.clone());
                    }
                }
            } else {
                findings.invalid.insert(
                    proxy.path.clone(),
                    format!("Remote target {} is outside {}", target, remote_root),
                );
            }
        }

        let proxy_paths: HashSet<&str> = proxies.iter().map(|p| p.path.as_str()).collect();
        let targets: HashSet<String> = proxies
            .iter()
            .filter_map(|p| p.target.as_deref().map(normalize))
            .collect();

        for entry in &snapshot.media {
            if targets.contains(&entry.path) {
                continue;
            }
            let relative = self.mapper.relative_from_remote(&entry.path)?;
            let expected = PathMapper::proxy_path_for(&relative);
            if proxy_paths.contains(expected.as_str()) {
                continue;
            }
            findings
                .missing
                .insert(relative, format!("No proxy for remote file {}", entry.path));
        }

        Ok(findings)
    }

    /// Clear problems the scan covered but no longer observes, then record findings
    async fn apply(
        &self,
        scope: &ScanScope,
        snapshot: &RemoteSnapshot,
        proxies: &[ProxyFile],
        findings: &Findings,
    ) -> Result<()> {
        let target_of: HashMap<&str, Option<String>> = proxies
            .iter()
            .map(|p| (p.path.as_str(), p.target.as_deref().map(normalize)))
            .collect();

        let mut cleared = 0;
        for problem in self.ledger.list_problems(None).await {
            let stale = match problem.problem_type {
                ProblemType::InvalidProxy => {
                    if findings.invalid.contains_key(&problem.path)
                        || findings.unverified.contains(&problem.path)
                    {
                        false
                    } else {
                        match target_of.get(problem.path.as_str()) {
                            None => true,
                            Some(target) => {
                                scope.contains_proxy(target.as_deref())
                                    && !target.as_deref().map_or(false, |t| snapshot.is_unknown(t))
                            }
                        }
                    }
                }
                ProblemType::MissingProxy => {
                    if findings.missing.contains_key(&problem.path) {
                        false
                    } else {
                        match self.mapper.to_remote(&problem.path) {
                            Ok(remote) => {
                                scope.contains_remote(&remote) && !snapshot.is_unknown(&remote)
                            }
                            Err(_) => false,
                        }
                    }
                }
            };

            if stale
                && self
                    .ledger
                    .clear_problem(&problem.path, problem.problem_type)
                    .await?
            {
                cleared += 1;
            }
        }

        for (path, details) in &findings.invalid {
            self.ledger
                .report_problem(path, ProblemType::InvalidProxy, details)
                .await?;
        }
        for (path, details) in &findings.missing {
            self.ledger
                .report_problem(path, ProblemType::MissingProxy, details)
                .await?;
        }

        debug!(
            cleared,
            invalid = findings.invalid.len(),
            missing = findings.missing.len(),
            "Problem ledger updated"
        );
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Problems-only re-check
    // ------------------------------------------------------------------------

    async fn recheck_problems(
        &self,
        job_id: &ScanJobId,
        token: &CancellationToken,
    ) -> Result<ScanStats> {
        let mut problems = self.ledger.list_problems(None).await;
        problems.sort_by(|a, b| (a.problem_type, &a.path).cmp(&(b.problem_type, &b.path)));

        info!(problems = problems.len(), "Re-checking recorded problems");
        self.progress(job_id, 5, "Re-checking problems").await;

        let total = problems.len();
        let mut stats = ScanStats::default();
        for (index, problem) in problems.iter().enumerate() {
            check_cancelled(token)?;

            let verdict = match problem.problem_type {
                ProblemType::InvalidProxy => {
                    stats.total_proxies += 1;
                    self.recheck_invalid(&problem.path).await
                }
                ProblemType::MissingProxy => {
                    stats.total_media_files += 1;
                    self.recheck_missing(&problem.path).await
                }
            };

            let still_present = match verdict {
                Ok(Some(details)) => {
                    self.ledger
                        .report_problem(&problem.path, problem.problem_type, &details)
                        .await?;
                    true
                }
                Ok(None) => {
                    self.ledger
                        .clear_problem(&problem.path, problem.problem_type)
                        .await?;
                    false
                }
                Err(e) => {
                    warn!(path = %problem.path, error = %e, "Could not re-check problem");
                    stats.failed_subtrees += 1;
                    self.emit(ScanEvent::SubtreeFailed {
                        job_id: job_id.to_string(),
                        path: problem.path.clone(),
                        message: e.to_string(),
                    });
                    true
                }
            };

            if still_present {
                match problem.problem_type {
                    ProblemType::InvalidProxy => stats.invalid_proxies += 1,
                    ProblemType::MissingProxy => stats.missing_proxies += 1,
                }
            }

            let percent = 5 + (90 * (index + 1) / total.max(1)) as u8;
            self.progress(
                job_id,
                percent,
                &format!("Re-checking problems ({}/{})", index + 1, total),
            )
            .await;
        }

        Ok(stats)
    }

    /// `Some(details)` while the proxy is still broken
    async fn recheck_invalid(&self, path: &str) -> Result<Option<String>> {
        match self.proxy_tree.read_proxy(path).await? {
            None => Ok(None),
            Some(ProxyFile { target: None, .. }) => {
                Ok(Some("Proxy file has no readable target".to_string()))
            }
            Some(ProxyFile {
                target: Some(target),
                ..
            }) => {
                if self.lister.probe_file(&target).await? {
                    Ok(None)
                } else {
                    Ok(Some(format!("Remote target {} no longer exists", target)))
                }
            }
        }
    }

    /// `Some(details)` while the remote file exists and still has no proxy
    async fn recheck_missing(&self, path: &str) -> Result<Option<String>> {
        let proxy = PathMapper::proxy_path_for(path);
        if self.proxy_tree.read_proxy(&proxy).await?.is_some() {
            return Ok(None);
        }

        let remote = self.mapper.to_remote(path)?;
        if self.lister.probe_file(&remote).await? {
            Ok(Some(format!("No proxy for remote file {}", remote)))
        } else {
            Ok(None)
        }
    }

    // ------------------------------------------------------------------------
    // Progress and events
    // ------------------------------------------------------------------------

    async fn progress(&self, job_id: &ScanJobId, percent: u8, phase: &str) {
        let mut current = self.current.write().await;
        let Some(job) = current.as_mut().filter(|job| job.id == *job_id) else {
            return;
        };
        if job.update_progress(percent, phase).is_ok() {
            self.emit(ScanEvent::Progress {
                job_id: job_id.to_string(),
                percent: job.progress.percent,
                phase: phase.to_string(),
            });
        }
    }

    fn emit(&self, event: ScanEvent) {
        self.event_bus.emit(CoreEvent::Scan(event)).ok();
    }
}

fn check_cancelled(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        return Err(ReconcileError::Cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::tests::{create_test_pool, history_repository, problem_repository};
    use crate::testing::{mapper, FakeProxyTree, FakeRemote};
    use bridge_traits::ManualClock;
    use std::time::Duration;

    struct Harness {
        scanner: ReconcileScanner,
        ledger: Arc<ProblemLedger>,
        remote: Arc<FakeRemote>,
        proxies: Arc<FakeProxyTree>,
        bus: Arc<EventBus>,
        clock: Arc<ManualClock>,
    }

    async fn harness(remote_files: &[&str], proxies: &[(&str, &str)]) -> Harness {
        let pool = create_test_pool().await;
        let clock = Arc::new(ManualClock::at(1_700_000_000));
        let ledger = Arc::new(ProblemLedger::new(
            Arc::new(problem_repository(&pool).await),
            clock.clone(),
        ));
        let remote = Arc::new(FakeRemote::new(remote_files));
        let proxy_tree = Arc::new(FakeProxyTree::with(proxies));
        let bus = Arc::new(EventBus::new(256));

        let scanner = ReconcileScanner::new(
            ScanConfig::default(),
            mapper(),
            remote.clone(),
            proxy_tree.clone(),
            ledger.clone(),
            Arc::new(history_repository(&pool).await),
            bus.clone(),
            clock.clone(),
        )
        .with_change_hints(remote.clone());

        Harness {
            scanner,
            ledger,
            remote,
            proxies: proxy_tree,
            bus,
            clock,
        }
    }

    async fn problem_keys(ledger: &ProblemLedger) -> Vec<(ProblemType, String)> {
        let mut keys: Vec<_> = ledger
            .list_problems(None)
            .await
            .into_iter()
            .map(|p| (p.problem_type, p.path))
            .collect();
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn test_full_scan_reports_missing_and_invalid() {
        let h = harness(
            &[
                "/media/movies/A.mkv",
                "/media/movies/C.mkv",
                "/media/movies/notes.txt",
            ],
            &[
                ("movies/C.strm", "/media/movies/C.mkv"),
                ("movies/B.strm", "/media/movies/B.mkv"),
            ],
        )
        .await;

        let job = h.scanner.scan_now(ScanMode::Full).await.unwrap();

        assert_eq!(job.status, ScanStatus::Completed);
        assert_eq!(
            problem_keys(&h.ledger).await,
            vec![
                (ProblemType::InvalidProxy, "movies/B.strm".to_string()),
                (ProblemType::MissingProxy, "movies/A.mkv".to_string()),
            ]
        );
        assert_eq!(
            job.stats.unwrap(),
            ScanStats {
                total_proxies: 2,
                invalid_proxies: 1,
                total_media_files: 2,
                missing_proxies: 1,
                failed_subtrees: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_rescan_clears_resolved_problems() {
        let h = harness(
            &["/media/movies/A.mkv"],
            &[("movies/B.strm", "/media/movies/B.mkv")],
        )
        .await;
        h.scanner.scan_now(ScanMode::Full).await.unwrap();
        assert_eq!(h.ledger.counts().await.total(), 2);

        h.proxies.insert("movies/A.strm", Some("/media/movies/A.mkv"));
        h.remote.add_file("/media/movies/B.mkv");
        h.scanner.scan_now(ScanMode::Full).await.unwrap();

        assert!(h.ledger.list_problems(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_rescan_keeps_first_detection() {
        let h = harness(&["/media/movies/A.mkv"], &[]).await;
        h.scanner.scan_now(ScanMode::Full).await.unwrap();
        h.clock.advance(Duration::from_secs(3_600));
        h.scanner.scan_now(ScanMode::Full).await.unwrap();

        let problem = h
            .ledger
            .get("movies/A.mkv", ProblemType::MissingProxy)
            .await
            .unwrap();
        assert_eq!(problem.discovered_at - problem.first_detected_at, 3_600);
    }

    #[tokio::test]
    async fn test_failed_subtree_is_skipped_not_fatal() {
        let h = harness(
            &["/media/movies/A.mkv", "/media/tv/Show/S01E01.mkv"],
            &[("tv/Show/S01E01.strm", "/media/tv/Show/S01E09.mkv")],
        )
        .await;
        h.ledger
            .report_problem("tv/Show/S02E01.mkv", ProblemType::MissingProxy, "earlier")
            .await
            .unwrap();
        h.remote.fail_dir("/media/tv");
        let mut events = h.bus.subscribe();

        let job = h.scanner.scan_now(ScanMode::Full).await.unwrap();

        assert_eq!(job.status, ScanStatus::Completed);
        assert_eq!(job.stats.unwrap().failed_subtrees, 1);
        assert_eq!(
            problem_keys(&h.ledger).await,
            vec![
                (ProblemType::MissingProxy, "movies/A.mkv".to_string()),
                (ProblemType::MissingProxy, "tv/Show/S02E01.mkv".to_string()),
            ]
        );

        let mut saw_subtree_failure = false;
        while let Ok(event) = events.try_recv() {
            if let CoreEvent::Scan(ScanEvent::SubtreeFailed { path, .. }) = event {
                assert_eq!(path, "/media/tv");
                saw_subtree_failure = true;
            }
        }
        assert!(saw_subtree_failure);
    }

    #[tokio::test]
    async fn test_unreachable_root_fails_without_writing() {
        let h = harness(&["/media/movies/A.mkv"], &[]).await;
        h.ledger
            .report_problem("old/thing.mkv", ProblemType::MissingProxy, "")
            .await
            .unwrap();
        h.remote.fail_dir("/media");

        let job = h.scanner.scan_now(ScanMode::Full).await.unwrap();

        assert_eq!(job.status, ScanStatus::Failed);
        assert!(job.error_message.unwrap().contains("unreachable"));
        assert_eq!(
            problem_keys(&h.ledger).await,
            vec![(ProblemType::MissingProxy, "old/thing.mkv".to_string())]
        );
        assert_eq!(h.scanner.status().await.status, ScanStatus::Failed);
    }

    #[tokio::test]
    async fn test_second_start_rejected_and_cancel() {
        let h = harness(&["/media/movies/A.mkv"], &[]).await;
        let gate = h.remote.hold_listings();

        let job_id = h.scanner.start_scan(ScanMode::Full).await.unwrap();
        assert_eq!(h.scanner.status().await.status, ScanStatus::Running);
        assert!(matches!(
            h.scanner.start_scan(ScanMode::Full).await,
            Err(ReconcileError::ScanInProgress { .. })
        ));

        assert_eq!(h.scanner.cancel_scan().await.unwrap(), job_id);
        gate.add_permits(100);

        let report = timeout(Duration::from_secs(5), async {
            loop {
                let report = h.scanner.status().await;
                if report.status.is_terminal() {
                    return report;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(report.status, ScanStatus::Failed);
        assert_eq!(
            report.job.unwrap().error_message.as_deref(),
            Some("Scan cancelled")
        );
        assert!(h.ledger.list_problems(None).await.is_empty());
        assert!(matches!(
            h.scanner.cancel_scan().await,
            Err(ReconcileError::NoActiveScan)
        ));
    }

    #[tokio::test]
    async fn test_wait_idle_returns_after_cancelled_scan_finishes() {
        let h = harness(&["/media/movies/A.mkv"], &[]).await;
        let gate = h.remote.hold_listings();

        timeout(Duration::from_secs(1), h.scanner.wait_idle())
            .await
            .unwrap();

        h.scanner.start_scan(ScanMode::Full).await.unwrap();
        h.scanner.cancel_scan().await.unwrap();
        assert!(timeout(Duration::from_millis(50), h.scanner.wait_idle())
            .await
            .is_err());

        gate.add_permits(100);
        timeout(Duration::from_secs(5), h.scanner.wait_idle())
            .await
            .unwrap();

        let report = h.scanner.status().await;
        assert_eq!(report.status, ScanStatus::Failed);
        let history = h.scanner.history(None).await.unwrap();
        assert_eq!(history[0].status, ScanStatus::Failed);
    }

    #[tokio::test]
    async fn test_incremental_without_marker_runs_full() {
        let h = harness(&["/media/movies/A.mkv"], &[]).await;

        let job = h.scanner.scan_now(ScanMode::Incremental).await.unwrap();

        assert_eq!(job.mode, ScanMode::Full);
        assert_eq!(h.ledger.counts().await.missing_proxies, 1);
    }

    #[tokio::test]
    async fn test_incremental_limited_to_changed_directories() {
        let h = harness(&["/media/movies/A.mkv"], &[("movies/A.strm", "/media/movies/A.mkv")]).await;
        h.scanner.scan_now(ScanMode::Full).await.unwrap();

        h.remote.add_file("/media/tv/New/E01.mkv");
        h.remote.add_file("/media/movies/Z.mkv");
        h.remote.set_changed(&["/media/tv"]);
        h.clock.advance(Duration::from_secs(60));

        let job = h.scanner.scan_now(ScanMode::Incremental).await.unwrap();

        assert_eq!(job.mode, ScanMode::Incremental);
        assert_eq!(
            problem_keys(&h.ledger).await,
            vec![(ProblemType::MissingProxy, "tv/New/E01.mkv".to_string())]
        );
        assert_eq!(job.stats.unwrap().total_media_files, 1);
    }

    #[tokio::test]
    async fn test_problems_only_rechecks_without_discovering() {
        let h = harness(&["/media/movies/A.mkv", "/media/movies/X.mkv"], &[]).await;
        for (path, kind) in [
            ("movies/B.strm", ProblemType::InvalidProxy),
            ("movies/A.mkv", ProblemType::MissingProxy),
            ("movies/Gone.mkv", ProblemType::MissingProxy),
        ] {
            h.ledger.report_problem(path, kind, "").await.unwrap();
        }

        let job = h.scanner.scan_now(ScanMode::ProblemsOnly).await.unwrap();

        assert_eq!(job.status, ScanStatus::Completed);
        assert_eq!(
            problem_keys(&h.ledger).await,
            vec![(ProblemType::MissingProxy, "movies/A.mkv".to_string())]
        );
        assert_eq!(job.stats.unwrap().missing_proxies, 1);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let h = harness(
            &["/media/a/1.mkv", "/media/b/2.mkv", "/media/c/3.mkv"],
            &[],
        )
        .await;
        let mut events = h.bus.subscribe();

        h.scanner.scan_now(ScanMode::Full).await.unwrap();

        let mut percents = Vec::new();
        let mut completed = false;
        while let Ok(event) = events.try_recv() {
            match event {
                CoreEvent::Scan(ScanEvent::Progress { percent, .. }) => percents.push(percent),
                CoreEvent::Scan(ScanEvent::Completed { .. }) => completed = true,
                _ => {}
            }
        }

        assert!(completed);
        assert!(percents.len() >= 4);
        assert!(percents.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(h.scanner.status().await.percent(), 100);
    }

    #[tokio::test]
    async fn test_history_and_recover() {
        let h = harness(&[], &[]).await;
        h.scanner.scan_now(ScanMode::Full).await.unwrap();
        h.scanner.scan_now(ScanMode::ProblemsOnly).await.unwrap();

        let history = h.scanner.history(None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(h.scanner.recover().await.unwrap(), 0);
        assert!(h.scanner.status().await.last_stats.is_some());
    }
}
