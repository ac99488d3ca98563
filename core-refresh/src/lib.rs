//! # Core Refresh
//!
//! Delayed, retrying refresh requests against the media-library server.
//!
//! ## Overview
//!
//! A freshly written proxy file is usually not in the library yet; asking for a
//! refresh right away finds nothing. This crate defers the first attempt,
//! backs off on repeated misses, and gives up after a bounded number of tries:
//!
//! - [`RefreshQueue`]: persisted queue items, one live item per proxy path
//! - [`RefreshWorker`]: background loop that claims due items and attempts them
//! - [`ItemResolver`]: path lookup first, then title/season/episode search
//! - [`BackoffPolicy`]: geometric retry delay with a cap
//!
//! ## Usage
//!
//! ```ignore
//! use core_refresh::{RefreshConfig, RefreshQueue, RefreshWorker, SqliteRefreshQueueRepository};
//!
//! let repository = SqliteRefreshQueueRepository::new(pool.clone());
//! repository.initialize().await?;
//!
//! let queue = Arc::new(RefreshQueue::new(
//!     Arc::new(repository),
//!     Arc::new(SystemClock),
//!     event_bus,
//!     RefreshConfig::default(),
//! ));
//! queue.load().await?;
//!
//! let worker = Arc::new(RefreshWorker::new(queue.clone(), library, mapper));
//! let handle = worker.spawn(shutdown_token.clone());
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod item;
pub mod naming;
pub mod queue;
pub mod repository;
pub mod resolver;
pub mod worker;

pub use backoff::BackoffPolicy;
pub use config::RefreshConfig;
pub use error::{RefreshError, Result};
pub use item::{AttemptOutcome, ItemState, MediaType, QueueItem, QueueItemId, QueueStatus};
pub use queue::{QueueStats, RefreshQueue, SortBy, SortOrder};
pub use repository::{RefreshQueueRepository, SqliteRefreshQueueRepository};
pub use resolver::ItemResolver;
pub use worker::{RefreshFailure, RefreshReport, RefreshWorker};
