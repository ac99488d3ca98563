//! # Event Bus System
//!
//! Typed, broadcast notifications for scans, repairs and library refreshes.
//!
//! ## Overview
//!
//! The scanner, the repair executor and the refresh worker publish what they do
//! onto a shared [`EventBus`] (`tokio::sync::broadcast`). A dashboard, a chat
//! notifier or a test can subscribe independently; nobody upstream waits on
//! them. Emitting never fails an operation: callers use `emit(..).ok()`.
//!
//! ```text
//! ┌──────────────┐   emit   ┌───────────┐   subscribe   ┌────────────┐
//! │   Scanner    ├─────────>│           ├──────────────>│ Subscriber │
//! ├──────────────┤          │ EventBus  │               └────────────┘
//! │ RepairExec.  ├─────────>│ (broadcast│   subscribe   ┌────────────┐
//! ├──────────────┤          │  channel) ├──────────────>│ Subscriber │
//! │ RefreshWorker├─────────>│           │               └────────────┘
//! └──────────────┘          └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, EventStream, RefreshEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut refreshes = EventStream::new(bus.subscribe())
//!     .filter(|event| matches!(event, CoreEvent::Refresh(_)));
//!
//! bus.emit(CoreEvent::Refresh(RefreshEvent::Enqueued {
//!     item_id: "item-1".to_string(),
//!     path: "movies/A.strm".to_string(),
//!     scheduled_at: 1_700_000_000,
//! }))
//! .ok();
//!
//! let event = refreshes.recv().await.unwrap();
//! assert_eq!(event.description(), "Refresh enqueued");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; keep reading.
//! - **`RecvError::Closed`**: every sender is gone, i.e. shutdown.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Reconciliation scan lifecycle
    Scan(ScanEvent),
    /// Proxy repair outcomes
    Repair(RepairEvent),
    /// Refresh queue transitions
    Refresh(RefreshEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Scan(e) => e.description(),
            CoreEvent::Repair(e) => e.description(),
            CoreEvent::Refresh(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Scan(ScanEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Repair(RepairEvent::RepairFailed { .. }) => EventSeverity::Error,
            CoreEvent::Refresh(RefreshEvent::Exhausted { .. }) => EventSeverity::Error,
            CoreEvent::Scan(ScanEvent::SubtreeFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Refresh(RefreshEvent::Retrying { .. }) => EventSeverity::Warning,
            CoreEvent::Scan(ScanEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Repair(_) => EventSeverity::Info,
            CoreEvent::Refresh(RefreshEvent::Refreshed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Scan Events
// ============================================================================

/// Events emitted by the reconciliation scanner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ScanEvent {
    Started {
        job_id: String,
        /// "full", "incremental" or "problems_only"
        mode: String,
    },
    Progress {
        job_id: String,
        /// Monotonically non-decreasing, 0-100
        percent: u8,
        phase: String,
    },
    /// One remote subtree could not be listed; the scan continues.
    SubtreeFailed {
        job_id: String,
        path: String,
        message: String,
    },
    Completed {
        job_id: String,
        total_proxies: u64,
        invalid_proxies: u64,
        total_media_files: u64,
        missing_proxies: u64,
        duration_secs: u64,
    },
    Failed {
        job_id: String,
        message: String,
    },
    Cancelled {
        job_id: String,
    },
}

impl ScanEvent {
    fn description(&self) -> &str {
        match self {
            ScanEvent::Started { .. } => "Scan started",
            ScanEvent::Progress { .. } => "Scan in progress",
            ScanEvent::SubtreeFailed { .. } => "Remote subtree listing failed",
            ScanEvent::Completed { .. } => "Scan completed",
            ScanEvent::Failed { .. } => "Scan failed",
            ScanEvent::Cancelled { .. } => "Scan cancelled",
        }
    }
}

// ============================================================================
// Repair Events
// ============================================================================

/// Events emitted by the repair executor, one per path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum RepairEvent {
    /// A stale proxy was removed.
    ProxyDeleted { path: String },
    /// A missing proxy was written.
    ProxyGenerated {
        /// Media path the problem was reported under
        path: String,
        /// Proxy-relative path of the new file
        proxy_path: String,
    },
    RepairFailed {
        path: String,
        /// "InvalidProxy" or "MissingProxy"
        problem_type: String,
        reason: String,
    },
}

impl RepairEvent {
    fn description(&self) -> &str {
        match self {
            RepairEvent::ProxyDeleted { .. } => "Stale proxy deleted",
            RepairEvent::ProxyGenerated { .. } => "Missing proxy generated",
            RepairEvent::RepairFailed { .. } => "Repair failed",
        }
    }
}

// ============================================================================
// Refresh Events
// ============================================================================

/// Events emitted by the refresh queue and its worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum RefreshEvent {
    Enqueued {
        item_id: String,
        path: String,
        scheduled_at: i64,
    },
    /// The library item was found and its refresh accepted.
    Refreshed {
        item_id: String,
        path: String,
        library_item_id: String,
    },
    /// Attempt failed; another one is scheduled.
    Retrying {
        item_id: String,
        path: String,
        retry_count: u32,
        scheduled_at: i64,
        message: String,
    },
    /// Retries used up; the item stays `Failed` until forced or removed.
    Exhausted {
        item_id: String,
        path: String,
        retry_count: u32,
        message: String,
    },
    Removed {
        item_id: String,
        path: String,
    },
}

impl RefreshEvent {
    fn description(&self) -> &str {
        match self {
            RefreshEvent::Enqueued { .. } => "Refresh enqueued",
            RefreshEvent::Refreshed { .. } => "Library item refreshed",
            RefreshEvent::Retrying { .. } => "Refresh attempt failed, retry scheduled",
            RefreshEvent::Exhausted { .. } => "Refresh retries exhausted",
            RefreshEvent::Removed { .. } => "Refresh item removed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cheap to clone; every clone publishes into the same channel. Slow
/// subscribers get `RecvError::Lagged` instead of blocking publishers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified per-subscriber buffer.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// when there are none (callers normally discard it with `.ok()`).
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`/`try_recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking receive; `None` when nothing matching is buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
