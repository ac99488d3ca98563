use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Remote endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
