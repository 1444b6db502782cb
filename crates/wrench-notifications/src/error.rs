use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Send timed out after {0} ms")]
    Timeout(u64),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
