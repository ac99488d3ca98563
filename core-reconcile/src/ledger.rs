//! # Problem Ledger
//!
//! Persisted set of detected inconsistencies, unique per `(path, type)`.
//!
//! Reports are insert-or-touch: re-detecting a known problem refreshes its
//! details and `discovered_at` but never its `first_detected_at`. Every
//! mutation is written through to the repository before the in-memory copy
//! changes; a persistence failure is returned to the caller and the report is
//! not recorded.

use crate::repository::ProblemRepository;
use crate::{Problem, ProblemCounts, ProblemType, Result};
use bridge_traits::Clock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

type ProblemKey = (String, ProblemType);

pub struct ProblemLedger {
    repository: Arc<dyn ProblemRepository>,
    clock: Arc<dyn Clock>,
    problems: RwLock<HashMap<ProblemKey, Problem>>,
}

impl ProblemLedger {
    pub fn new(repository: Arc<dyn ProblemRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            clock,
            problems: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the in-memory copy with the persisted problems
    pub async fn load(&self) -> Result<usize> {
        let stored = self.repository.load_all().await?;
        let loaded: HashMap<ProblemKey, Problem> = stored
            .into_iter()
            .map(|p| ((p.path.clone(), p.problem_type), p))
            .collect();

        let count = loaded.len();
        *self.problems.write().await = loaded;
        info!(problems = count, "Problem ledger loaded");
        Ok(count)
    }

    /// Record a detection; idempotent per `(path, type)`
    pub async fn report_problem(
        &self,
        path: &str,
        problem_type: ProblemType,
        details: &str,
    ) -> Result<Problem> {
        let now = self.clock.unix_timestamp();
        let key = (path.to_string(), problem_type);
        let mut problems = self.problems.write().await;

        let problem = match problems.get(&key) {
            Some(existing) => existing.clone().touch(details, now),
            None => Problem::new(path, problem_type, details, now),
        };

        self.repository.upsert(&problem).await?;
        problems.insert(key, problem.clone());
        debug!(path = %path, problem_type = %problem_type, "Problem reported");
        Ok(problem)
    }

    /// Remove a problem; returns whether it was present
    pub async fn clear_problem(&self, path: &str, problem_type: ProblemType) -> Result<bool> {
        let key = (path.to_string(), problem_type);
        let mut problems = self.problems.write().await;
        if !problems.contains_key(&key) {
            return Ok(false);
        }

        self.repository.delete(path, problem_type).await?;
        problems.remove(&key);
        debug!(path = %path, problem_type = %problem_type, "Problem cleared");
        Ok(true)
    }

    /// Snapshot, optionally restricted to one type; order is unspecified
    pub async fn list_problems(&self, filter: Option<ProblemType>) -> Vec<Problem> {
        self.problems
            .read()
            .await
            .values()
            .filter(|p| filter.map_or(true, |t| p.problem_type == t))
            .cloned()
            .collect()
    }

    pub async fn get(&self, path: &str, problem_type: ProblemType) -> Option<Problem> {
        self.problems
            .read()
            .await
            .get(&(path.to_string(), problem_type))
            .cloned()
    }

    /// Empty the ledger; reserved for explicit user resets
    pub async fn clear_all(&self) -> Result<u64> {
        let mut problems = self.problems.write().await;
        let removed = self.repository.delete_all().await?;
        problems.clear();
        info!(removed, "Problem ledger cleared");
        Ok(removed)
    }

    pub async fn counts(&self) -> ProblemCounts {
        let problems = self.problems.read().await;
        let mut counts = ProblemCounts::default();
        for key in problems.keys() {
            match key.1 {
                ProblemType::InvalidProxy => counts.invalid_proxies += 1,
                ProblemType::MissingProxy => counts.missing_proxies += 1,
            }
        }
        counts
    }

    /// Write every in-memory problem back to the repository
    pub async fn flush(&self) -> Result<()> {
        let problems = self.problems.read().await;
        for problem in problems.values() {
            self.repository.upsert(problem).await?;
        }
        debug!(problems = problems.len(), "Problem ledger flushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::tests::{create_test_pool, problem_repository};
    use crate::ReconcileError;
    use async_trait::async_trait;
    use bridge_traits::ManualClock;
    use std::time::Duration;

    async fn ledger() -> (ProblemLedger, Arc<ManualClock>) {
        let pool = create_test_pool().await;
        let clock = Arc::new(ManualClock::at(1_000));
        let ledger = ProblemLedger::new(Arc::new(problem_repository(&pool).await), clock.clone());
        (ledger, clock)
    }

    #[tokio::test]
    async fn test_report_is_idempotent() {
        let (ledger, clock) = ledger().await;

        ledger
            .report_problem("movies/A.mkv", ProblemType::MissingProxy, "no proxy")
            .await
            .unwrap();
        clock.advance(Duration::from_secs(60));
        let again = ledger
            .report_problem("movies/A.mkv", ProblemType::MissingProxy, "still no proxy")
            .await
            .unwrap();

        assert_eq!(ledger.list_problems(None).await.len(), 1);
        assert_eq!(again.first_detected_at, 1_000);
        assert_eq!(again.discovered_at, 1_060);
        assert_eq!(again.details, "still no proxy");
    }

    #[tokio::test]
    async fn test_clear_and_filter() {
        let (ledger, _clock) = ledger().await;
        ledger
            .report_problem("movies/A.mkv", ProblemType::MissingProxy, "")
            .await
            .unwrap();
        ledger
            .report_problem("movies/B.strm", ProblemType::InvalidProxy, "")
            .await
            .unwrap();

        let invalid = ledger.list_problems(Some(ProblemType::InvalidProxy)).await;
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid[0].path, "movies/B.strm");

        assert!(ledger
            .clear_problem("movies/B.strm", ProblemType::InvalidProxy)
            .await
            .unwrap());
        assert!(!ledger
            .clear_problem("movies/B.strm", ProblemType::InvalidProxy)
            .await
            .unwrap());
        assert_eq!(
            ledger.counts().await,
            ProblemCounts {
                invalid_proxies: 0,
                missing_proxies: 1
            }
        );

        assert_eq!(ledger.clear_all().await.unwrap(), 1);
        assert!(ledger.list_problems(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_load_restores_persisted_problems() {
        let pool = create_test_pool().await;
        let clock = Arc::new(ManualClock::at(5));
        let repo = Arc::new(problem_repository(&pool).await);

        let first = ProblemLedger::new(repo.clone(), clock.clone());
        first
            .report_problem("tv/x.mkv", ProblemType::MissingProxy, "")
            .await
            .unwrap();

        let second = ProblemLedger::new(repo, clock);
        assert_eq!(second.load().await.unwrap(), 1);
        assert!(second
            .get("tv/x.mkv", ProblemType::MissingProxy)
            .await
            .is_some());
    }

    struct FailingRepository;

    #[async_trait]
    impl ProblemRepository for FailingRepository {
        async fn upsert(&self, _problem: &Problem) -> Result<()> {
            Err(ReconcileError::Database("disk full".to_string()))
        }

        async fn delete(&self, _path: &str, _problem_type: ProblemType) -> Result<bool> {
            Err(ReconcileError::Database("disk full".to_string()))
        }

        async fn delete_all(&self) -> Result<u64> {
            Err(ReconcileError::Database("disk full".to_string()))
        }

        async fn load_all(&self) -> Result<Vec<Problem>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_is_surfaced() {
        let ledger = ProblemLedger::new(Arc::new(FailingRepository), Arc::new(ManualClock::at(0)));

        let result = ledger
            .report_problem("a.mkv", ProblemType::MissingProxy, "")
            .await;

        assert!(matches!(result, Err(ReconcileError::Database(_))));
        assert!(ledger.list_problems(None).await.is_empty());
    }
}
