//! # Reconciliation Repositories
//!
//! SQLite persistence for the problem ledger (`reconcile_problems`) and the
//! scan history (`reconcile_scans`).

use crate::{
    Problem, ProblemType, ReconcileError, Result, ScanJob, ScanJobId, ScanMode, ScanProgress,
    ScanStats, ScanStatus,
};
use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};

// ============================================================================
// Repository Traits
// ============================================================================

#[async_trait]
pub trait ProblemRepository: Send + Sync {
    /// Insert, or update `details` and `discovered_at` of the stored row
    ///
    /// `first_detected_at` of an existing row is never overwritten.
    async fn upsert(&self, problem: &Problem) -> Result<()>;

    /// Delete one problem, returning whether a row existed
    async fn delete(&self, path: &str, problem_type: ProblemType) -> Result<bool>;

    async fn delete_all(&self) -> Result<u64>;

    async fn load_all(&self) -> Result<Vec<Problem>>;
}

#[async_trait]
pub trait ScanHistoryRepository: Send + Sync {
    async fn insert(&self, job: &ScanJob) -> Result<()>;

    /// # Errors
    ///
    /// `NotFound` if the job was never inserted
    async fn update(&self, job: &ScanJob) -> Result<()>;

    async fn find_by_id(&self, id: &ScanJobId) -> Result<Option<ScanJob>>;

    /// Most recent completed job of the given mode
    async fn latest_completed(&self, mode: ScanMode) -> Result<Option<ScanJob>>;

    /// Most recent jobs first
    async fn history(&self, limit: u32) -> Result<Vec<ScanJob>>;

    /// Fail jobs left running by a previous process, returning how many
    async fn fail_interrupted(&self, now: i64) -> Result<u64>;
}

// ============================================================================
// Problem Ledger Table
// ============================================================================

pub struct SqliteProblemRepository {
    pool: SqlitePool,
}

impl SqliteProblemRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reconcile_problems (
                path TEXT NOT NULL,
                problem_type TEXT NOT NULL,
                details TEXT NOT NULL,
                discovered_at INTEGER NOT NULL,
                first_detected_at INTEGER NOT NULL,
                PRIMARY KEY (path, problem_type)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ReconcileError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_reconcile_problems_type
            ON reconcile_problems(problem_type)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ReconcileError::Database(e.to_string()))?;

        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct ProblemRow {
    path: String,
    problem_type: String,
    details: String,
    discovered_at: i64,
    first_detected_at: i64,
}

impl TryFrom<ProblemRow> for Problem {
    type Error = ReconcileError;

    fn try_from(row: ProblemRow) -> Result<Self> {
        Ok(Problem {
            path: row.path,
            problem_type: row.problem_type.parse()?,
            details: row.details,
            discovered_at: row.discovered_at,
            first_detected_at: row.first_detected_at,
        })
    }
}

#[async_trait]
impl ProblemRepository for SqliteProblemRepository {
    async fn upsert(&self, problem: &Problem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reconcile_problems (
                path, problem_type, details, discovered_at, first_detected_at
            ) VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(path, problem_type) DO UPDATE SET
                details = excluded.details,
                discovered_at = excluded.discovered_at
            "#,
        )
        .bind(&problem.path)
        .bind(problem.problem_type.as_str())
        .bind(&problem.details)
        .bind(problem.discovered_at)
        .bind(problem.first_detected_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ReconcileError::Database(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, path: &str, problem_type: ProblemType) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM reconcile_problems WHERE path = ? AND problem_type = ?")
                .bind(path)
                .bind(problem_type.as_str())
                .execute(&self.pool)
                .await
                .map_err(|e| ReconcileError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM reconcile_problems")
            .execute(&self.pool)
            .await
            .map_err(|e| ReconcileError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn load_all(&self) -> Result<Vec<Problem>> {
        let rows = sqlx::query_as::<_, ProblemRow>(
            r#"
            SELECT path, problem_type, details, discovered_at, first_detected_at
            FROM reconcile_problems
            ORDER BY path ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ReconcileError::Database(e.to_string()))?;

        rows.into_iter()
            .map(Problem::try_from)
            .collect::<Result<Vec<_>>>()
    }
}

// ============================================================================
// Scan History Table
// ============================================================================

pub struct SqliteScanHistoryRepository {
    pool: SqlitePool,
}

impl SqliteScanHistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reconcile_scans (
                id TEXT PRIMARY KEY NOT NULL,
                mode TEXT NOT NULL,
                status TEXT NOT NULL,
                percent INTEGER NOT NULL DEFAULT 0,
                phase TEXT NOT NULL,
                total_proxies INTEGER,
                invalid_proxies INTEGER,
                total_media_files INTEGER,
                missing_proxies INTEGER,
                failed_subtrees INTEGER,
                error_message TEXT,
                started_at INTEGER NOT NULL,
                completed_at INTEGER,
                CONSTRAINT reconcile_scans_status_check CHECK (
                    status IN ('running', 'completed', 'failed')
                )
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ReconcileError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_reconcile_scans_mode_status
            ON reconcile_scans(mode, status, completed_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ReconcileError::Database(e.to_string()))?;

        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct ScanJobRow {
    id: String,
    mode: String,
    status: String,
    percent: i64,
    phase: String,
    total_proxies: Option<i64>,
    invalid_proxies: Option<i64>,
    total_media_files: Option<i64>,
    missing_proxies: Option<i64>,
    failed_subtrees: Option<i64>,
    error_message: Option<String>,
    started_at: i64,
    completed_at: Option<i64>,
}

impl TryFrom<ScanJobRow> for ScanJob {
    type Error = ReconcileError;

    fn try_from(row: ScanJobRow) -> Result<Self> {
        let status: ScanStatus = row.status.parse()?;

        let stats = if status == ScanStatus::Completed {
            Some(ScanStats {
                total_proxies: row.total_proxies.unwrap_or(0) as u64,
                invalid_proxies: row.invalid_proxies.unwrap_or(0) as u64,
                total_media_files: row.total_media_files.unwrap_or(0) as u64,
                missing_proxies: row.missing_proxies.unwrap_or(0) as u64,
                failed_subtrees: row.failed_subtrees.unwrap_or(0) as u64,
            })
        } else {
            None
        };

        Ok(ScanJob {
            id: ScanJobId::from_string(&row.id)?,
            mode: row.mode.parse()?,
            status,
            progress: ScanProgress {
                percent: row.percent.clamp(0, 100) as u8,
                phase: row.phase,
            },
            stats,
            error_message: row.error_message,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

const SCAN_COLUMNS: &str = "id, mode, status, percent, phase, total_proxies, invalid_proxies, \
     total_media_files, missing_proxies, failed_subtrees, error_message, started_at, completed_at";

#[async_trait]
impl ScanHistoryRepository for SqliteScanHistoryRepository {
    async fn insert(&self, job: &ScanJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reconcile_scans (
                id, mode, status, percent, phase,
                total_proxies, invalid_proxies, total_media_files, missing_proxies, failed_subtrees,
                error_message, started_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.as_str())
        .bind(job.mode.as_str())
        .bind(job.status.as_str())
        .bind(job.progress.percent as i64)
        .bind(&job.progress.phase)
        .bind(job.stats.map(|s| s.total_proxies as i64))
        .bind(job.stats.map(|s| s.invalid_proxies as i64))
        .bind(job.stats.map(|s| s.total_media_files as i64))
        .bind(job.stats.map(|s| s.missing_proxies as i64))
        .bind(job.stats.map(|s| s.failed_subtrees as i64))
        .bind(&job.error_message)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ReconcileError::Database(e.to_string()))?;

        Ok(())
    }

    async fn update(&self, job: &ScanJob) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE reconcile_scans SET
                mode = ?,
                status = ?,
                percent = ?,
                phase = ?,
                total_proxies = ?,
                invalid_proxies = ?,
                total_media_files = ?,
                missing_proxies = ?,
                failed_subtrees = ?,
                error_message = ?,
                completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(job.mode.as_str())
        .bind(job.status.as_str())
        .bind(job.progress.percent as i64)
        .bind(&job.progress.phase)
        .bind(job.stats.map(|s| s.total_proxies as i64))
        .bind(job.stats.map(|s| s.invalid_proxies as i64))
        .bind(job.stats.map(|s| s.total_media_files as i64))
        .bind(job.stats.map(|s| s.missing_proxies as i64))
        .bind(job.stats.map(|s| s.failed_subtrees as i64))
        .bind(&job.error_message)
        .bind(job.completed_at)
        .bind(job.id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| ReconcileError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(ReconcileError::NotFound(format!("scan job {}", job.id)));
        }

        Ok(())
    }

    async fn find_by_id(&self, id: &ScanJobId) -> Result<Option<ScanJob>> {
        let row = sqlx::query_as::<_, ScanJobRow>(&format!(
            "SELECT {} FROM reconcile_scans WHERE id = ?",
            SCAN_COLUMNS
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ReconcileError::Database(e.to_string()))?;

        row.map(ScanJob::try_from).transpose()
    }

    async fn latest_completed(&self, mode: ScanMode) -> Result<Option<ScanJob>> {
        let row = sqlx::query_as::<_, ScanJobRow>(&format!(
            "SELECT {} FROM reconcile_scans \
             WHERE mode = ? AND status = 'completed' \
             ORDER BY completed_at DESC LIMIT 1",
            SCAN_COLUMNS
        ))
        .bind(mode.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ReconcileError::Database(e.to_string()))?;

        row.map(ScanJob::try_from).transpose()
    }

    async fn history(&self, limit: u32) -> Result<Vec<ScanJob>> {
        let rows = sqlx::query_as::<_, ScanJobRow>(&format!(
            "SELECT {} FROM reconcile_scans ORDER BY started_at DESC LIMIT ?",
            SCAN_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ReconcileError::Database(e.to_string()))?;

        rows.into_iter()
            .map(ScanJob::try_from)
            .collect::<Result<Vec<_>>>()
    }

    async fn fail_interrupted(&self, now: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE reconcile_scans SET
                status = 'failed',
                phase = 'Failed',
                error_message = 'Interrupted by shutdown',
                completed_at = ?
            WHERE status = 'running'
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| ReconcileError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

// ============================================================================
// Tests
// ============================================================================
