//! # Refresh Queue Items
//!
//! A queue item tracks one "ask the media library to pick up this proxy"
//! request through its resolution state machine.
//!
//! ## State Machine
//!
//! ```text
//!             claim / force                 refreshed
//! Pending ─────────────────> Processing ─────────────────> Success
//!    ^                         │    │
//!    │  failed, retries left   │    │ failed, retries used up
//!    └─────────────────────────┘    └──────────────────────> Failed
//!
//! Success / Failed ── force ──> Processing
//! Failed ── re-enqueue ──> Pending (retry count reset)
//! ```
//!
//! The state carries exactly the data that is meaningful for it: a `Failed`
//! item always has its last error, a `Success` item always has its resolution
//! time and the library item that was refreshed.

use crate::backoff::BackoffPolicy;
use crate::naming::infer_media_type;
use crate::{RefreshError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueItemId(Uuid);

impl QueueItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| RefreshError::InvalidItemId(e.to_string()))?,
        ))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for QueueItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Status Types
// ============================================================================

/// Flat status of a queue item, used for filtering and storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl QueueStatus {
    /// No further automatic attempts
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Success | QueueStatus::Failed)
    }

    pub fn is_live(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Success => "success",
            QueueStatus::Failed => "failed",
        }
    }
}

impl FromStr for QueueStatus {
    type Err = RefreshError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(QueueStatus::Pending),
            "processing" => Ok(QueueStatus::Processing),
            "success" => Ok(QueueStatus::Success),
            "failed" => Ok(QueueStatus::Failed),
            _ => Err(RefreshError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Inferred kind of media behind a proxy; a hint for the resolver only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Series,
    Season,
    Episode,
    Unknown,
}

impl MediaType {
    pub fn infer(path: &str) -> Self {
        infer_media_type(path)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Series => "series",
            MediaType::Season => "season",
            MediaType::Episode => "episode",
            MediaType::Unknown => "unknown",
        }
    }
}

impl FromStr for MediaType {
    type Err = RefreshError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "movie" => Ok(MediaType::Movie),
            "series" => Ok(MediaType::Series),
            "season" => Ok(MediaType::Season),
            "episode" => Ok(MediaType::Episode),
            "unknown" => Ok(MediaType::Unknown),
            _ => Err(RefreshError::InvalidMediaType(s.to_string())),
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Item State
// ============================================================================

/// Resolution state with the data each state owns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ItemState {
    Pending,
    Processing {
        started_at: i64,
    },
    Success {
        resolved_at: i64,
        library_item_id: String,
    },
    Failed {
        last_error: String,
    },
}

impl ItemState {
    pub fn status(&self) -> QueueStatus {
        match self {
            ItemState::Pending => QueueStatus::Pending,
            ItemState::Processing { .. } => QueueStatus::Processing,
            ItemState::Success { .. } => QueueStatus::Success,
            ItemState::Failed { .. } => QueueStatus::Failed,
        }
    }
}

/// Result of one resolution + refresh attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Refreshed { library_item_id: String },
    Failed { message: String },
}

// ============================================================================
// Queue Item
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    /// Proxy path this refresh concerns, relative to the proxy root
    pub path: String,
    pub media_type: MediaType,
    pub added_at: i64,
    /// Earliest time of the next automatic attempt
    pub scheduled_at: i64,
    pub last_attempt_at: Option<i64>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub state: ItemState,
}

impl QueueItem {
    pub fn new(
        path: impl Into<String>,
        media_type: MediaType,
        now: i64,
        initial_delay_secs: i64,
        max_retries: u32,
    ) -> Self {
        Self {
            id: QueueItemId::new(),
            path: path.into(),
            media_type,
            added_at: now,
            scheduled_at: now + initial_delay_secs,
            last_attempt_at: None,
            retry_count: 0,
            max_retries,
            state: ItemState::Pending,
        }
    }

    pub fn status(&self) -> QueueStatus {
        self.state.status()
    }

    pub fn is_live(&self) -> bool {
        self.status().is_live()
    }

    /// Eligible for an automatic attempt at `now`
    pub fn is_due(&self, now: i64) -> bool {
        self.state == ItemState::Pending && self.scheduled_at <= now
    }

    pub fn resolved_at(&self) -> Option<i64> {
        match &self.state {
            ItemState::Success { resolved_at, .. } => Some(*resolved_at),
            _ => None,
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        match &self.state {
            ItemState::Failed { last_error } => Some(last_error),
            _ => None,
        }
    }

    /// When the item reached its terminal state, for history pruning
    pub fn finished_at(&self) -> Option<i64> {
        match &self.state {
            ItemState::Success { resolved_at, .. } => Some(*resolved_at),
            ItemState::Failed { .. } => Some(self.last_attempt_at.unwrap_or(self.added_at)),
            _ => None,
        }
    }

    fn validate_transition(&self, to: QueueStatus) -> Result<()> {
        let from = self.status();
        let valid = matches!(
            (from, to),
            (QueueStatus::Pending, QueueStatus::Processing)
                | (QueueStatus::Success, QueueStatus::Processing)
                | (QueueStatus::Failed, QueueStatus::Processing)
                | (QueueStatus::Processing, QueueStatus::Success)
                | (QueueStatus::Processing, QueueStatus::Pending)
                | (QueueStatus::Processing, QueueStatus::Failed)
                | (QueueStatus::Failed, QueueStatus::Pending)
        );

        if valid {
            Ok(())
        } else {
            Err(RefreshError::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
                reason: format!("item {} ({})", self.id, self.path),
            })
        }
    }

    /// Start an attempt
    pub fn begin_attempt(mut self, now: i64) -> Result<Self> {
        self.validate_transition(QueueStatus::Processing)?;
        self.state = ItemState::Processing { started_at: now };
        self.last_attempt_at = Some(now);
        Ok(self)
    }

    /// Fold an attempt's outcome into the item
    pub fn complete_attempt(
        mut self,
        outcome: AttemptOutcome,
        now: i64,
        backoff: &BackoffPolicy,
    ) -> Result<Self> {
        match outcome {
            AttemptOutcome::Refreshed { library_item_id } => {
                self.validate_transition(QueueStatus::Success)?;
                self.state = ItemState::Success {
                    resolved_at: now,
                    library_item_id,
                };
            }
            AttemptOutcome::Failed { message } => {
                self.validate_transition(QueueStatus::Pending)?;
                self.retry_count = self.retry_count.saturating_add(1);
                if self.retry_count >= self.max_retries {
                    self.state = ItemState::Failed {
                        last_error: message,
                    };
                } else {
                    self.state = ItemState::Pending;
                    self.scheduled_at = now + backoff.delay_for(self.retry_count).as_secs() as i64;
                }
            }
        }
        Ok(self)
    }

    /// Push the next automatic attempt out; a `Failed` item is revived with a fresh budget
    pub fn reschedule(mut self, scheduled_at: i64) -> Result<Self> {
        match self.status() {
            QueueStatus::Pending | QueueStatus::Processing => {}
            QueueStatus::Failed => {
                self.validate_transition(QueueStatus::Pending)?;
                self.state = ItemState::Pending;
                self.retry_count = 0;
            }
            QueueStatus::Success => {
                return Err(RefreshError::InvalidStateTransition {
                    from: QueueStatus::Success.to_string(),
                    to: QueueStatus::Pending.to_string(),
                    reason: "finished items are not rescheduled".to_string(),
                })
            }
        }
        self.scheduled_at = scheduled_at;
        Ok(self)
    }

    /// Crash recovery: an attempt interrupted mid-flight becomes due again
    pub fn recover_interrupted(mut self, now: i64) -> Self {
        if let ItemState::Processing { .. } = self.state {
            self.state = ItemState::Pending;
            self.scheduled_at = now;
        }
        self
    }
}
