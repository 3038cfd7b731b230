//! Error types for the barista agent orchestrator

use std::time::Duration;
use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Conversation-level errors
    // =============================

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    // =============================
    // Request-fatal errors
    // =============================

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Model error: {0}")]
    UpstreamModelError(String),

    #[error("Model did not respond within {0:?}")]
    ModelTimeout(Duration),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestrationError {
    /// HTTP status code used when the error reaches the transport layer.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ValidationError(_) | Self::ToolNotFound(_) | Self::InvalidToolInput(_) => 400,
            Self::StateError(_) => 409,
            Self::AuthError(_) => 401,
            Self::UpstreamModelError(_) | Self::HttpError(_) => 502,
            Self::ModelTimeout(_) => 504,
            Self::PersistenceError(_)
            | Self::ConfigError(_)
            | Self::SerializationError(_)
            | Self::IoError(_) => 500,
        }
    }

    /// Message safe to show to the end user.
    pub fn public_message(&self) -> String {
        match self {
            Self::UpstreamModelError(_) | Self::ModelTimeout(_) | Self::HttpError(_) => {
                "The barista is having trouble responding right now. Please try again.".to_string()
            }
            Self::PersistenceError(_) | Self::SerializationError(_) | Self::IoError(_) => {
                "Your session could not be saved. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(OrchestrationError::AuthError("x".into()).status_code(), 401);
        assert_eq!(OrchestrationError::PersistenceError("x".into()).status_code(), 500);
        assert_eq!(
            OrchestrationError::ModelTimeout(Duration::from_secs(1)).status_code(),
            504
        );
    }

    #[test]
    fn test_public_message_hides_upstream_detail() {
        let err = OrchestrationError::UpstreamModelError("quota exceeded for project 123".into());
        assert!(!err.public_message().contains("project 123"));
    }
}
