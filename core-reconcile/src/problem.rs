//! Ledger entries: one detected inconsistency between the remote tree and the
//! proxy tree.

use crate::{ReconcileError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProblemType {
    /// A proxy whose remote target is gone. Keyed by the proxy path.
    InvalidProxy,
    /// A remote video file without a proxy. Keyed by the media path.
    MissingProxy,
}

impl ProblemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProblemType::InvalidProxy => "InvalidProxy",
            ProblemType::MissingProxy => "MissingProxy",
        }
    }
}

impl FromStr for ProblemType {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "InvalidProxy" | "invalid_proxy" => Ok(ProblemType::InvalidProxy),
            "MissingProxy" | "missing_proxy" => Ok(ProblemType::MissingProxy),
            _ => Err(ReconcileError::InvalidProblemType(s.to_string())),
        }
    }
}

impl std::fmt::Display for ProblemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    /// Path relative to the proxy root
    pub path: String,
    pub problem_type: ProblemType,
    pub details: String,
    /// Most recent detection
    pub discovered_at: i64,
    /// First detection; never changes once set
    pub first_detected_at: i64,
}

impl Problem {
    pub fn new(path: impl Into<String>, problem_type: ProblemType, details: impl Into<String>, now: i64) -> Self {
        Self {
            path: path.into(),
            problem_type,
            details: details.into(),
            discovered_at: now,
            first_detected_at: now,
        }
    }

    /// Re-detection: refresh details and `discovered_at`, keep `first_detected_at`
    pub fn touch(mut self, details: impl Into<String>, now: i64) -> Self {
        self.details = details.into();
        self.discovered_at = now;
        self
    }
}

/// Problem counts by type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemCounts {
    pub invalid_proxies: u64,
    pub missing_proxies: u64,
}

impl ProblemCounts {
    pub fn total(&self) -> u64 {
        self.invalid_proxies + self.missing_proxies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_keeps_first_detection() {
        let problem = Problem::new("movies/B.strm", ProblemType::InvalidProxy, "gone", 100);
        let touched = problem.touch("still gone", 250);

        assert_eq!(touched.first_detected_at, 100);
        assert_eq!(touched.discovered_at, 250);
        assert_eq!(touched.details, "still gone");
    }

    #[test]
    fn test_problem_type_parse() {
        assert_eq!(
            "MissingProxy".parse::<ProblemType>().unwrap(),
            ProblemType::MissingProxy
        );
        assert_eq!(
            "invalid_proxy".parse::<ProblemType>().unwrap(),
            ProblemType::InvalidProxy
        );
        assert!("Broken".parse::<ProblemType>().is_err());
    }
}
