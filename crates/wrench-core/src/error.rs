use thiserror::Error;

/// Core error types for Wrench event handling
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid event type: {0:?}")]
    InvalidEventType(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CoreError {
    /// Create a new InvalidEventType error
    pub fn invalid_event_type(event_type: impl Into<String>) -> Self {
        Self::InvalidEventType(event_type.into())
    }

    /// Create a new InvalidPayload error
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload(message.into())
    }

    /// Create a new Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Check if this error was caused by caller input
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidEventType(_) | Self::InvalidPayload(_) | Self::JsonError(_)
        )
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::invalid_event_type("");
        assert_eq!(err.to_string(), "Invalid event type: \"\"");

        let err = CoreError::configuration("history_capacity too large");
        assert_eq!(
            err.to_string(),
            "Configuration error: history_capacity too large"
        );
    }

    #[test]
    fn test_client_error_classification() {
        assert!(CoreError::invalid_payload("not an object").is_client_error());
        assert!(!CoreError::configuration("x").is_client_error());
    }
}
