//! Error types for the Emby provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbyError {
    /// API key rejected
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Emby API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    #[error("Item not found: {item_id}")]
    ItemNotFound { item_id: String },

    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, EmbyError>;

impl EmbyError {
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status_code {
            401 | 403 => EmbyError::AuthenticationFailed(message),
            _ => EmbyError::ApiError {
                status_code,
                message,
            },
        }
    }
}

impl From<EmbyError> for BridgeError {
    fn from(error: EmbyError) -> Self {
        match error {
            EmbyError::ItemNotFound { item_id } => BridgeError::NotFound(item_id),
            EmbyError::ApiError { status_code, .. } if status_code == 429 || status_code >= 500 => {
                BridgeError::Unreachable(format!("Emby returned HTTP {}", status_code))
            }
            EmbyError::BridgeError(e) => e,
            other => BridgeError::OperationFailed(other.to_string()),
        }
    }
}
