//! # Scan Job State Machine
//!
//! ```text
//! Idle → Running → Completed
//!           ↓
//!         Failed
//! ```
//!
//! `Idle` is what the scanner reports before any job exists; a job is created
//! already `Running`. Cancellation and timeouts end a job as `Failed` with the
//! reason in `error_message`.

use crate::{ReconcileError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanJobId(Uuid);

impl ScanJobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| ReconcileError::InvalidJobId(e.to_string()))?,
        ))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ScanJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ScanJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Status Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ScanStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Idle => "idle",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }
}

impl FromStr for ScanStatus {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(ScanStatus::Idle),
            "running" => Ok(ScanStatus::Running),
            "completed" => Ok(ScanStatus::Completed),
            "failed" => Ok(ScanStatus::Failed),
            _ => Err(ReconcileError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Whole remote tree against whole proxy tree
    Full,
    /// Only subtrees changed since the last completed full scan
    Incremental,
    /// Re-check what the ledger already holds
    ProblemsOnly,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Full => "full",
            ScanMode::Incremental => "incremental",
            ScanMode::ProblemsOnly => "problems_only",
        }
    }
}

impl FromStr for ScanMode {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "full" => Ok(ScanMode::Full),
            "incremental" => Ok(ScanMode::Incremental),
            "problems_only" | "problems-only" => Ok(ScanMode::ProblemsOnly),
            _ => Err(ReconcileError::InvalidScanMode(s.to_string())),
        }
    }
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Progress Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanProgress {
    /// 0-100, never decreases during a job
    pub percent: u8,
    pub phase: String,
}

impl ScanProgress {
    pub fn new() -> Self {
        Self {
            percent: 0,
            phase: "Starting scan".to_string(),
        }
    }

    /// Advance; a lower percentage than the current one only changes the phase
    pub fn advance(&mut self, percent: u8, phase: &str) {
        self.percent = self.percent.max(percent.min(100));
        self.phase = phase.to_string();
    }
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate counts computed at the end of a scan, over the scan's scope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub total_proxies: u64,
    pub invalid_proxies: u64,
    pub total_media_files: u64,
    pub missing_proxies: u64,
    /// Remote subtrees that could not be listed
    pub failed_subtrees: u64,
}

// ============================================================================
// Scan Job Entity
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: ScanJobId,
    /// Mode that actually ran; an incremental request may fall back to full
    pub mode: ScanMode,
    pub status: ScanStatus,
    pub progress: ScanProgress,
    pub stats: Option<ScanStats>,
    pub error_message: Option<String>,
    pub started_at: i64,
    pub completed_at: Option<i64>,
}

impl ScanJob {
    /// A job starts out running
    pub fn start(mode: ScanMode, now: i64) -> Self {
        Self {
            id: ScanJobId::new(),
            mode,
            status: ScanStatus::Running,
            progress: ScanProgress::new(),
            stats: None,
            error_message: None,
            started_at: now,
            completed_at: None,
        }
    }

    pub fn update_progress(&mut self, percent: u8, phase: &str) -> Result<()> {
        if self.status != ScanStatus::Running {
            return Err(ReconcileError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: "update_progress".to_string(),
                reason: "Job must be running to update progress".to_string(),
            });
        }
        self.progress.advance(percent, phase);
        Ok(())
    }

    pub fn complete(mut self, stats: ScanStats, now: i64) -> Result<Self> {
        self.validate_transition(ScanStatus::Completed)?;
        self.status = ScanStatus::Completed;
        self.stats = Some(stats);
        self.completed_at = Some(now);
        self.progress.advance(100, "Completed");
        Ok(self)
    }

    pub fn fail(mut self, error_message: impl Into<String>, now: i64) -> Result<Self> {
        self.validate_transition(ScanStatus::Failed)?;
        self.status = ScanStatus::Failed;
        self.error_message = Some(error_message.into());
        self.completed_at = Some(now);
        self.progress.phase = "Failed".to_string();
        Ok(self)
    }

    pub fn duration_secs(&self) -> Option<u64> {
        self.completed_at
            .map(|end| (end - self.started_at).max(0) as u64)
    }

    fn validate_transition(&self, to: ScanStatus) -> Result<()> {
        let valid = matches!(
            (self.status, to),
            (ScanStatus::Running, ScanStatus::Completed) | (ScanStatus::Running, ScanStatus::Failed)
        );

        if !valid {
            return Err(ReconcileError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}
