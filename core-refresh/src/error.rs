use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("No queue item for {path}")]
    ItemNotFound { path: String },

    #[error("Queue item for {path} is {status}; only finished items can be removed")]
    LiveItemRemoval { path: String, status: String },

    #[error("Queue item for {path} is already being processed")]
    ItemBusy { path: String },

    #[error("Library item not found for {0}")]
    NotFound(String),

    #[error("Media library error: {0}")]
    Library(String),

    #[error("Media library unreachable: {0}")]
    Unreachable(String),

    #[error("Refresh attempt timed out after {0} seconds")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid queue item ID: {0}")]
    InvalidItemId(String),

    #[error("Invalid queue status: {0}")]
    InvalidStatus(String),

    #[error("Invalid media type: {0}")]
    InvalidMediaType(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Database error: {0}")]
    Database(String),
}

impl From<BridgeError> for RefreshError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Unreachable(msg) => RefreshError::Unreachable(msg),
            BridgeError::Io(e) => RefreshError::Unreachable(e.to_string()),
            BridgeError::NotFound(msg) => RefreshError::NotFound(msg),
            BridgeError::DatabaseError(msg) => RefreshError::Database(msg),
            other => RefreshError::Library(other.to_string()),
        }
    }
}

impl From<core_runtime::Error> for RefreshError {
    fn from(err: core_runtime::Error) -> Self {
        RefreshError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RefreshError>;
