//! Error types for the AList provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// AList provider errors
#[derive(Error, Debug)]
pub enum AlistError {
    /// The request was rejected for lack of a valid token
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The API answered with a non-200 `code` in its envelope
    #[error("AList API error (code {code}): {message}")]
    ApiError { code: u16, message: String },

    /// Path does not exist on the remote
    #[error("Object not found: {path}")]
    ObjectNotFound { path: String },

    /// Transport-level HTTP failure
    #[error("AList HTTP error (status {status})")]
    HttpStatus { status: u16 },

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, AlistError>;

impl AlistError {
    /// Classify an envelope `code`/`message` pair
    pub fn from_envelope(path: &str, code: u16, message: &str) -> Self {
        let lowered = message.to_ascii_lowercase();
        if lowered.contains("not found") || lowered.contains("not exist") {
            return AlistError::ObjectNotFound {
                path: path.to_string(),
            };
        }
        match code {
            401 | 403 => AlistError::AuthenticationFailed(message.to_string()),
            _ => AlistError::ApiError {
                code,
                message: message.to_string(),
            },
        }
    }
}

impl From<AlistError> for BridgeError {
    fn from(error: AlistError) -> Self {
        match error {
            AlistError::ObjectNotFound { path } => BridgeError::NotFound(path),
            AlistError::HttpStatus { status } if status == 429 || status >= 500 => {
                BridgeError::Unreachable(format!("AList returned HTTP {}", status))
            }
            AlistError::BridgeError(e) => e,
            other => BridgeError::OperationFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_classification() {
        assert!(matches!(
            AlistError::from_envelope("/media/x", 500, "object not found"),
            AlistError::ObjectNotFound { .. }
        ));
        assert!(matches!(
            AlistError::from_envelope("/media/x", 401, "token is expired"),
            AlistError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            AlistError::from_envelope("/media/x", 500, "storage driver panic"),
            AlistError::ApiError { code: 500, .. }
        ));
    }

    #[test]
    fn test_bridge_conversion() {
        let bridge: BridgeError = AlistError::HttpStatus { status: 502 }.into();
        assert!(matches!(bridge, BridgeError::Unreachable(_)));

        let bridge: BridgeError = AlistError::HttpStatus { status: 400 }.into();
        assert!(matches!(bridge, BridgeError::OperationFailed(_)));

        let bridge: BridgeError = AlistError::ObjectNotFound {
            path: "/media/a".to_string(),
        }
        .into();
        assert!(matches!(bridge, BridgeError::NotFound(p) if p == "/media/a"));
    }
}
