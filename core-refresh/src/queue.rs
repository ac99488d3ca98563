//! # Refresh Queue
//!
//! Persisted set of refresh requests, at most one live item per proxy path.
//!
//! ## Overview
//!
//! The repair path enqueues, the worker claims due items and folds attempt
//! outcomes back in, and observability readers take snapshots. All of them go
//! through one lock over the in-memory state. Every mutation is written to the
//! repository before the in-memory copy changes, so a failed write leaves the
//! queue as it was. Attempt outcomes are the exception: the attempt already
//! happened, so the in-memory item moves on and the next flush persists it.
//!
//! ## Usage
//!
//! ```ignore
//! let queue = RefreshQueue::new(repository, clock, event_bus, RefreshConfig::default());
//! queue.load().await?;
//!
//! let item = queue.enqueue("movies/Alien (1979).strm", None).await?;
//! assert_eq!(item.status(), QueueStatus::Pending);
//! ```

use crate::config::RefreshConfig;
use crate::repository::RefreshQueueRepository;
use crate::{
    AttemptOutcome, ItemState, MediaType, QueueItem, QueueItemId, QueueStatus, RefreshError,
    Result,
};
use bridge_traits::Clock;
use core_runtime::events::{CoreEvent, EventBus, RefreshEvent};
use core_runtime::paths::normalize;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

// ============================================================================
// Projection Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    Added,
    Scheduled,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Item counts per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub success: usize,
    pub failed: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.success + self.failed
    }
}

// ============================================================================
// Queue
// ============================================================================

#[derive(Default)]
struct QueueState {
    items: HashMap<QueueItemId, QueueItem>,
    /// Current item for each path
    by_path: HashMap<String, QueueItemId>,
}

impl QueueState {
    fn current(&self, path: &str) -> Option<&QueueItem> {
        self.by_path.get(path).and_then(|id| self.items.get(id))
    }

    fn insert(&mut self, item: QueueItem) {
        self.by_path.insert(item.path.clone(), item.id);
        self.items.insert(item.id, item);
    }

    fn remove(&mut self, id: &QueueItemId) -> Option<QueueItem> {
        let item = self.items.remove(id)?;
        if self.by_path.get(&item.path) == Some(id) {
            self.by_path.remove(&item.path);
        }
        Some(item)
    }
}

pub struct RefreshQueue {
    repository: Arc<dyn RefreshQueueRepository>,
    clock: Arc<dyn Clock>,
    event_bus: Arc<EventBus>,
    config: RefreshConfig,
    state: Mutex<QueueState>,
}

impl RefreshQueue {
    pub fn new(
        repository: Arc<dyn RefreshQueueRepository>,
        clock: Arc<dyn Clock>,
        event_bus: Arc<EventBus>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            repository,
            clock,
            event_bus,
            config,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    /// Replace the in-memory state with what the repository holds
    ///
    /// Items left `Processing` by an interrupted run become due immediately.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<usize> {
        let now = self.clock.unix_timestamp();
        let stored = self.repository.load_all().await?;
        let mut state = QueueState::default();

        for item in stored {
            let item = if item.status() == QueueStatus::Processing {
                let recovered = item.recover_interrupted(now);
                warn!(path = %recovered.path, "Recovering refresh interrupted mid-attempt");
                self.repository.upsert(&recovered).await?;
                recovered
            } else {
                item
            };

            let keep_existing = state
                .current(&item.path)
                .map(|existing| existing.is_live() && !item.is_live())
                .unwrap_or(false);
            if keep_existing {
                state.items.insert(item.id, item);
            } else {
                state.insert(item);
            }
        }

        let count = state.items.len();
        *self.state.lock().await = state;
        info!(items = count, "Refresh queue loaded");
        Ok(count)
    }

    /// Schedule a refresh for `path`
    ///
    /// A live item for the path is pushed back to `now + initial_delay` rather
    /// than duplicated; a `Failed` item is revived with a fresh retry budget.
    #[instrument(skip(self), fields(path = %path))]
    pub async fn enqueue(&self, path: &str, media_type: Option<MediaType>) -> Result<QueueItem> {
        let path = canonical(path);
        let now = self.clock.unix_timestamp();
        let scheduled_at = now + self.config.initial_delay.as_secs() as i64;

        let mut state = self.state.lock().await;
        let item = match state.current(&path) {
            Some(existing) if existing.status() != QueueStatus::Success => {
                existing.clone().reschedule(scheduled_at)?
            }
            _ => QueueItem::new(
                path.clone(),
                media_type.unwrap_or_else(|| MediaType::infer(&path)),
                now,
                self.config.initial_delay.as_secs() as i64,
                self.config.max_retries,
            ),
        };

        self.repository.upsert(&item).await?;
        state.insert(item.clone());
        drop(state);

        debug!(item_id = %item.id, scheduled_at = item.scheduled_at, "Refresh enqueued");
        self.emit(RefreshEvent::Enqueued {
            item_id: item.id.to_string(),
            path: item.path.clone(),
            scheduled_at: item.scheduled_at,
        });

        Ok(item)
    }

    /// Move up to `limit` due items to `Processing`, earliest scheduled first
    pub async fn claim_due(&self, limit: usize) -> Result<Vec<QueueItem>> {
        let now = self.clock.unix_timestamp();
        let mut state = self.state.lock().await;

        let mut due: Vec<&QueueItem> = state.items.values().filter(|i| i.is_due(now)).collect();
        due.sort_by_key(|item| (item.scheduled_at, item.added_at));
        let due: Vec<QueueItem> = due.into_iter().take(limit).cloned().collect();

        // Claims are all-or-nothing; a failed write releases what was taken
        let mut claimed: Vec<(QueueItem, QueueItem)> = Vec::with_capacity(due.len());
        for original in due {
            let result = match original.clone().begin_attempt(now) {
                Ok(item) => self.repository.upsert(&item).await.map(|_| item),
                Err(e) => Err(e),
            };
            match result {
                Ok(item) => {
                    state.items.insert(item.id, item.clone());
                    claimed.push((original, item));
                }
                Err(e) => {
                    for (original, _) in claimed {
                        if let Err(release) = self.repository.upsert(&original).await {
                            warn!(path = %original.path, error = %release, "Failed to release claimed refresh item");
                        }
                        state.items.insert(original.id, original);
                    }
                    return Err(e);
                }
            }
        }

        Ok(claimed.into_iter().map(|(_, item)| item).collect())
    }

    /// Move the current item for `path` to `Processing` regardless of its schedule
    ///
    /// Creates the item when the path has never been queued.
    pub async fn begin_force(&self, path: &str) -> Result<QueueItem> {
        let path = canonical(path);
        let now = self.clock.unix_timestamp();
        let mut state = self.state.lock().await;

        let item = match state.current(&path) {
            Some(existing) if existing.status() == QueueStatus::Processing => {
                return Err(RefreshError::ItemBusy { path });
            }
            Some(existing) => existing.clone(),
            None => QueueItem::new(
                path.clone(),
                MediaType::infer(&path),
                now,
                0,
                self.config.max_retries,
            ),
        };

        let item = item.begin_attempt(now)?;
        self.repository.upsert(&item).await?;
        state.insert(item.clone());
        Ok(item)
    }

    /// Fold an attempt's outcome into the item
    pub async fn record_outcome(
        &self,
        id: &QueueItemId,
        outcome: AttemptOutcome,
    ) -> Result<QueueItem> {
        let now = self.clock.unix_timestamp();
        let mut state = self.state.lock().await;

        let item = state
            .items
            .get(id)
            .cloned()
            .ok_or_else(|| RefreshError::ItemNotFound {
                path: id.to_string(),
            })?;
        let message = match &outcome {
            AttemptOutcome::Failed { message } => Some(message.clone()),
            AttemptOutcome::Refreshed { .. } => None,
        };
        let item = item.complete_attempt(outcome, now, &self.config.backoff())?;

        state.items.insert(item.id, item.clone());
        let persisted = self.repository.upsert(&item).await;
        drop(state);
        if let Err(e) = persisted {
            warn!(path = %item.path, error = %e, "Failed to persist refresh outcome");
            return Err(e);
        }

        let event = match &item.state {
            ItemState::Success {
                library_item_id, ..
            } => {
                info!(path = %item.path, library_item_id = %library_item_id, "Library item refreshed");
                RefreshEvent::Refreshed {
                    item_id: item.id.to_string(),
                    path: item.path.clone(),
                    library_item_id: library_item_id.clone(),
                }
            }
            ItemState::Failed { last_error } => {
                warn!(
                    path = %item.path,
                    retry_count = item.retry_count,
                    error = %last_error,
                    "Refresh retries exhausted"
                );
                RefreshEvent::Exhausted {
                    item_id: item.id.to_string(),
                    path: item.path.clone(),
                    retry_count: item.retry_count,
                    message: last_error.clone(),
                }
            }
            ItemState::Pending | ItemState::Processing { .. } => {
                let message = message.unwrap_or_default();
                debug!(
                    path = %item.path,
                    retry_count = item.retry_count,
                    scheduled_at = item.scheduled_at,
                    error = %message,
                    "Refresh attempt failed, retrying later"
                );
                RefreshEvent::Retrying {
                    item_id: item.id.to_string(),
                    path: item.path.clone(),
                    retry_count: item.retry_count,
                    scheduled_at: item.scheduled_at,
                    message,
                }
            }
        };
        self.emit(event);

        Ok(item)
    }

    /// Delete the finished items for `path`
    ///
    /// # Errors
    ///
    /// `LiveItemRemoval` if the path has a pending or processing item,
    /// `ItemNotFound` if nothing is queued for it.
    #[instrument(skip(self), fields(path = %path))]
    pub async fn remove(&self, path: &str) -> Result<usize> {
        let path = canonical(path);
        let mut state = self.state.lock().await;

        let matching: Vec<&QueueItem> = state.items.values().filter(|i| i.path == path).collect();
        if matching.is_empty() {
            return Err(RefreshError::ItemNotFound { path });
        }
        if let Some(live) = matching.iter().find(|i| i.is_live()) {
            return Err(RefreshError::LiveItemRemoval {
                path,
                status: live.status().to_string(),
            });
        }

        let ids: Vec<QueueItemId> = matching.iter().map(|i| i.id).collect();
        self.repository.delete_many(&ids).await?;
        for id in &ids {
            state.remove(id);
        }
        drop(state);

        for id in &ids {
            self.emit(RefreshEvent::Removed {
                item_id: id.to_string(),
                path: path.clone(),
            });
        }
        info!(removed = ids.len(), "Removed refresh queue items");
        Ok(ids.len())
    }

    /// Snapshot of the queue, optionally filtered by status
    pub async fn list_queue(
        &self,
        status: Option<QueueStatus>,
        sort_by: SortBy,
        order: SortOrder,
    ) -> Vec<QueueItem> {
        let mut items: Vec<QueueItem> = {
            let state = self.state.lock().await;
            state
                .items
                .values()
                .filter(|item| status.map_or(true, |s| item.status() == s))
                .cloned()
                .collect()
        };

        items.sort_by(|a, b| compare(a, b, sort_by, order));
        items
    }

    /// Current item for a path
    pub async fn get(&self, path: &str) -> Option<QueueItem> {
        let path = canonical(path);
        self.state.lock().await.current(&path).cloned()
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        let mut stats = QueueStats::default();
        for item in state.items.values() {
            match item.status() {
                QueueStatus::Pending => stats.pending += 1,
                QueueStatus::Processing => stats.processing += 1,
                QueueStatus::Success => stats.success += 1,
                QueueStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Paths whose current item is terminally failed
    pub async fn failed_paths(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut paths: Vec<String> = state
            .by_path
            .values()
            .filter_map(|id| state.items.get(id))
            .filter(|item| item.status() == QueueStatus::Failed)
            .map(|item| item.path.clone())
            .collect();
        paths.sort();
        paths
    }

    /// Drop finished items older than the retention window
    pub async fn prune_history(&self) -> Result<u64> {
        let cutoff = self.clock.unix_timestamp() - self.config.history_retention.as_secs() as i64;
        let mut state = self.state.lock().await;

        let expired: Vec<QueueItemId> = state
            .items
            .values()
            .filter(|item| item.finished_at().map_or(false, |at| at < cutoff))
            .map(|item| item.id)
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }

        let removed = self.repository.delete_many(&expired).await?;
        for id in &expired {
            state.remove(id);
        }
        debug!(removed, "Pruned refresh history");
        Ok(removed)
    }

    /// Write every in-memory item back to the repository
    pub async fn flush(&self) -> Result<()> {
        let state = self.state.lock().await;
        for item in state.items.values() {
            self.repository.upsert(item).await?;
        }
        debug!(items = state.items.len(), "Refresh queue flushed");
        Ok(())
    }

    fn emit(&self, event: RefreshEvent) {
        self.event_bus.emit(CoreEvent::Refresh(event)).ok();
    }
}

fn canonical(path: &str) -> String {
    normalize(path).trim_start_matches('/').to_string()
}

fn compare(a: &QueueItem, b: &QueueItem, sort_by: SortBy, order: SortOrder) -> Ordering {
    let directed = |ordering: Ordering| match order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    };

    let primary = match sort_by {
        SortBy::Added => directed(a.added_at.cmp(&b.added_at)),
        SortBy::Scheduled => directed(a.scheduled_at.cmp(&b.scheduled_at)),
        // Unresolved items go last in either direction
        SortBy::Resolved => match (a.resolved_at(), b.resolved_at()) {
            (Some(x), Some(y)) => directed(x.cmp(&y)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
    };

    primary
        .then_with(|| a.added_at.cmp(&b.added_at))
        .then_with(|| a.path.cmp(&b.path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::tests::create_test_repository;
    use crate::repository::SqliteRefreshQueueRepository;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
    use bridge_traits::ManualClock;
    use std::time::Duration;

    const START: i64 = 1_700_000_000;

    async fn setup() -> (RefreshQueue, Arc<ManualClock>, Arc<EventBus>) {
        let clock = Arc::new(ManualClock::at(START));
        let bus = Arc::new(EventBus::new(64));
        let repo = Arc::new(create_test_repository().await);
        let queue = RefreshQueue::new(repo, clock.clone(), bus.clone(), RefreshConfig::default());
        (queue, clock, bus)
    }

    /// Repository whose writes start failing after a set number of them
    struct FlakyRepository {
        inner: SqliteRefreshQueueRepository,
        remaining_writes: AtomicI64,
    }

    impl FlakyRepository {
        fn fail_after(&self, writes: i64) {
            self.remaining_writes.store(writes, AtomicOrdering::SeqCst);
        }

        fn heal(&self) {
            self.remaining_writes.store(-1, AtomicOrdering::SeqCst);
        }

        fn take_write(&self) -> Result<()> {
            let left = self.remaining_writes.load(AtomicOrdering::SeqCst);
            if left == 0 {
                return Err(RefreshError::Database("disk I/O error".to_string()));
            }
            if left > 0 {
                self.remaining_writes.store(left - 1, AtomicOrdering::SeqCst);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RefreshQueueRepository for FlakyRepository {
        async fn upsert(&self, item: &QueueItem) -> Result<()> {
            self.take_write()?;
            self.inner.upsert(item).await
        }

        async fn delete(&self, id: &QueueItemId) -> Result<()> {
            self.take_write()?;
            self.inner.delete(id).await
        }

        async fn delete_many(&self, ids: &[QueueItemId]) -> Result<u64> {
            self.take_write()?;
            self.inner.delete_many(ids).await
        }

        async fn load_all(&self) -> Result<Vec<QueueItem>> {
            self.inner.load_all().await
        }
    }

    async fn setup_flaky() -> (RefreshQueue, Arc<ManualClock>, Arc<FlakyRepository>) {
        let clock = Arc::new(ManualClock::at(START));
        let repo = Arc::new(FlakyRepository {
            inner: create_test_repository().await,
            remaining_writes: AtomicI64::new(-1),
        });
        let queue = RefreshQueue::new(
            repo.clone(),
            clock.clone(),
            Arc::new(EventBus::new(64)),
            RefreshConfig::default(),
        );
        (queue, clock, repo)
    }

    fn not_found() -> AttemptOutcome {
        AttemptOutcome::Failed {
            message: "Library item not found".to_string(),
        }
    }

    #[tokio::test]
    async fn test_enqueue_creates_pending_item_with_initial_delay() {
        let (queue, _clock, _bus) = setup().await;

        let item = queue
            .enqueue("movies/Alien (1979).strm", None)
            .await
            .unwrap();

        assert_eq!(item.status(), QueueStatus::Pending);
        assert_eq!(item.media_type, MediaType::Movie);
        assert_eq!(item.scheduled_at, START + 30 * 60);
        assert_eq!(item.retry_count, 0);
    }

    #[tokio::test]
    async fn test_double_enqueue_keeps_one_live_item() {
        let (queue, clock, _bus) = setup().await;

        let first = queue.enqueue("movies/A.strm", None).await.unwrap();
        clock.advance(Duration::from_secs(600));
        let second = queue.enqueue("/movies/A.strm", None).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.scheduled_at, START + 600 + 30 * 60);
        assert_eq!(queue.stats().await.total(), 1);
    }

    #[tokio::test]
    async fn test_claim_due_respects_schedule() {
        let (queue, clock, _bus) = setup().await;
        queue.enqueue("movies/A.strm", None).await.unwrap();

        assert!(queue.claim_due(10).await.unwrap().is_empty());

        clock.advance(Duration::from_secs(30 * 60));
        let claimed = queue.claim_due(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status(), QueueStatus::Processing);
        assert!(queue.claim_due(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_four_failures_exhaust_item() {
        let (queue, clock, _bus) = setup().await;
        let item = queue.enqueue("tv/Show/S01E01.strm", None).await.unwrap();
        clock.set(item.scheduled_at);

        let mut gaps = Vec::new();
        let mut last = item;
        for _ in 0..4 {
            let claimed = queue.claim_due(1).await.unwrap();
            assert_eq!(claimed.len(), 1);
            last = queue.record_outcome(&claimed[0].id, not_found()).await.unwrap();
            if last.status() == QueueStatus::Pending {
                gaps.push(last.scheduled_at - clock.unix_timestamp());
                clock.set(last.scheduled_at);
            }
        }

        assert_eq!(gaps, vec![3_600, 7_200, 14_400]);
        assert_eq!(last.status(), QueueStatus::Failed);
        assert_eq!(last.retry_count, 4);

        clock.advance(Duration::from_secs(365 * 24 * 3_600));
        assert!(queue.claim_due(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_revives_failed_item() {
        let (queue, clock, _bus) = setup().await;
        queue.enqueue("a.strm", None).await.unwrap();
        let forced = queue.begin_force("a.strm").await.unwrap();
        let mut item = forced;
        for _ in 0..4 {
            item = queue.record_outcome(&item.id, not_found()).await.unwrap();
            if item.status() == QueueStatus::Pending {
                item = queue.begin_force("a.strm").await.unwrap();
            }
        }
        assert_eq!(item.status(), QueueStatus::Failed);

        clock.advance(Duration::from_secs(10));
        let revived = queue.enqueue("a.strm", None).await.unwrap();
        assert_eq!(revived.id, item.id);
        assert_eq!(revived.status(), QueueStatus::Pending);
        assert_eq!(revived.retry_count, 0);
    }

    #[tokio::test]
    async fn test_enqueue_after_success_creates_new_item() {
        let (queue, _clock, _bus) = setup().await;
        queue.enqueue("a.strm", None).await.unwrap();
        let item = queue.begin_force("a.strm").await.unwrap();
        queue
            .record_outcome(
                &item.id,
                AttemptOutcome::Refreshed {
                    library_item_id: "7".to_string(),
                },
            )
            .await
            .unwrap();

        let next = queue.enqueue("a.strm", None).await.unwrap();
        assert_ne!(next.id, item.id);
        assert_eq!(queue.stats().await.success, 1);
        assert_eq!(queue.stats().await.pending, 1);
    }

    #[tokio::test]
    async fn test_begin_force_rejects_processing_item() {
        let (queue, _clock, _bus) = setup().await;
        queue.begin_force("a.strm").await.unwrap();

        assert!(matches!(
            queue.begin_force("a.strm").await,
            Err(RefreshError::ItemBusy { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_rejects_live_and_deletes_finished() {
        let (queue, _clock, _bus) = setup().await;
        queue.enqueue("a.strm", None).await.unwrap();

        assert!(matches!(
            queue.remove("a.strm").await,
            Err(RefreshError::LiveItemRemoval { .. })
        ));

        let item = queue.begin_force("a.strm").await.unwrap();
        queue
            .record_outcome(
                &item.id,
                AttemptOutcome::Refreshed {
                    library_item_id: "7".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(queue.remove("a.strm").await.unwrap(), 1);
        assert!(queue.get("a.strm").await.is_none());
        assert!(matches!(
            queue.remove("a.strm").await,
            Err(RefreshError::ItemNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_queue_filters_and_sorts() {
        let (queue, clock, _bus) = setup().await;
        queue.enqueue("b.strm", None).await.unwrap();
        clock.advance(Duration::from_secs(5));
        queue.enqueue("a.strm", None).await.unwrap();
        clock.advance(Duration::from_secs(5));
        let forced = queue.begin_force("c.strm").await.unwrap();
        queue.record_outcome(&forced.id, not_found()).await.unwrap();

        let by_added: Vec<String> = queue
            .list_queue(None, SortBy::Added, SortOrder::Desc)
            .await
            .into_iter()
            .map(|i| i.path)
            .collect();
        assert_eq!(by_added, vec!["c.strm", "a.strm", "b.strm"]);

        let pending = queue
            .list_queue(Some(QueueStatus::Pending), SortBy::Scheduled, SortOrder::Asc)
            .await;
        assert_eq!(pending.len(), 3);
        assert!(pending
            .windows(2)
            .all(|pair| pair[0].scheduled_at <= pair[1].scheduled_at));

        // Read-only: listing twice yields the same snapshot
        assert_eq!(
            queue.list_queue(None, SortBy::Added, SortOrder::Asc).await.len(),
            3
        );
    }

    #[tokio::test]
    async fn test_load_recovers_processing_items() {
        let clock = Arc::new(ManualClock::at(START));
        let bus = Arc::new(EventBus::new(16));
        let repo = Arc::new(create_test_repository().await);

        let queue = RefreshQueue::new(repo.clone(), clock.clone(), bus.clone(), RefreshConfig::default());
        queue.enqueue("a.strm", None).await.unwrap();
        queue.begin_force("a.strm").await.unwrap();

        clock.advance(Duration::from_secs(100));
        let restarted = RefreshQueue::new(repo, clock.clone(), bus, RefreshConfig::default());
        assert_eq!(restarted.load().await.unwrap(), 1);

        let item = restarted.get("a.strm").await.unwrap();
        assert_eq!(item.status(), QueueStatus::Pending);
        assert_eq!(item.scheduled_at, START + 100);
        assert_eq!(restarted.claim_due(5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_prune_history_drops_old_finished_items() {
        let (queue, clock, _bus) = setup().await;
        let item = queue.begin_force("old.strm").await.unwrap();
        queue
            .record_outcome(
                &item.id,
                AttemptOutcome::Refreshed {
                    library_item_id: "1".to_string(),
                },
            )
            .await
            .unwrap();
        queue.enqueue("live.strm", None).await.unwrap();

        clock.advance(Duration::from_secs(8 * 24 * 3_600));
        assert_eq!(queue.prune_history().await.unwrap(), 1);
        assert!(queue.get("old.strm").await.is_none());
        assert!(queue.get("live.strm").await.is_some());
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let (queue, _clock, bus) = setup().await;
        let mut rx = bus.subscribe();

        let item = queue.enqueue("a.strm", None).await.unwrap();
        let event = rx.recv().await.unwrap();

        assert_eq!(
            event,
            CoreEvent::Refresh(RefreshEvent::Enqueued {
                item_id: item.id.to_string(),
                path: "a.strm".to_string(),
                scheduled_at: item.scheduled_at,
            })
        );
    }

    #[tokio::test]
    async fn test_unpersisted_outcome_does_not_strand_item() {
        let (queue, clock, repo) = setup_flaky().await;
        let item = queue.enqueue("movies/A.strm", None).await.unwrap();
        clock.set(item.scheduled_at);
        let claimed = queue.claim_due(1).await.unwrap();

        repo.fail_after(0);
        assert!(queue.record_outcome(&claimed[0].id, not_found()).await.is_err());
        repo.heal();

        let current = queue.get("movies/A.strm").await.unwrap();
        assert_eq!(current.status(), QueueStatus::Pending);
        assert_eq!(current.retry_count, 1);

        clock.advance(Duration::from_secs(365 * 24 * 3_600));
        assert_eq!(queue.claim_due(10).await.unwrap().len(), 1);

        queue.flush().await.unwrap();
        let stored = repo.load_all().await.unwrap();
        assert_eq!(stored[0].status(), QueueStatus::Processing);
        assert_eq!(stored[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_failed_claim_releases_already_claimed_items() {
        let (queue, clock, repo) = setup_flaky().await;
        queue.enqueue("movies/A.strm", None).await.unwrap();
        queue.enqueue("movies/B.strm", None).await.unwrap();
        clock.advance(Duration::from_secs(30 * 60));

        repo.fail_after(1);
        assert!(queue.claim_due(10).await.is_err());
        repo.heal();

        let stats = queue.stats().await;
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.processing, 0);
        assert_eq!(queue.claim_due(10).await.unwrap().len(), 2);
    }
}
