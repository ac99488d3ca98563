use bridge_traits::BridgeError;
use core_refresh::RefreshError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("A scan is already running (job {job_id})")]
    ScanInProgress { job_id: String },

    #[error("No scan is running")]
    NoActiveScan,

    #[error("Remote source error: {0}")]
    Remote(String),

    #[error("Remote source unreachable: {0}")]
    Unreachable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Proxy tree error: {0}")]
    ProxyTree(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Refresh queue error: {0}")]
    Refresh(#[from] RefreshError),

    #[error("Scan timeout after {0} seconds")]
    Timeout(u64),

    #[error("Scan cancelled")]
    Cancelled,

    #[error("Invalid scan job ID: {0}")]
    InvalidJobId(String),

    #[error("Invalid scan status: {0}")]
    InvalidStatus(String),

    #[error("Invalid scan mode: {0}")]
    InvalidScanMode(String),

    #[error("Invalid problem type: {0}")]
    InvalidProblemType(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Database error: {0}")]
    Database(String),
}

impl From<BridgeError> for ReconcileError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Unreachable(msg) => ReconcileError::Unreachable(msg),
            BridgeError::NotFound(msg) => ReconcileError::NotFound(msg),
            BridgeError::DatabaseError(msg) => ReconcileError::Database(msg),
            BridgeError::Io(e) => ReconcileError::ProxyTree(e.to_string()),
            other => ReconcileError::Remote(other.to_string()),
        }
    }
}

impl From<core_runtime::Error> for ReconcileError {
    fn from(err: core_runtime::Error) -> Self {
        ReconcileError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
