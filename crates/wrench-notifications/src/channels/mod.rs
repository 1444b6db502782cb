//! Delivery channels, one per medium.
//!
//! A channel validates that it can reach a recipient and performs the
//! delivery. `send` never returns an error: every failure, including time
//! outs, is folded into a failed [`SendResult`] so the dispatcher can record
//! it.

pub mod email;
pub mod in_app;
pub mod sms;

use async_trait::async_trait;

use crate::error::NotificationError;
use crate::types::{ChannelKind, Recipient, RenderedContent, SendResult};

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Check the recipient has a valid contact attribute for this medium.
    fn validate(&self, recipient: &Recipient) -> Result<(), NotificationError>;

    fn can_reach(&self, recipient: &Recipient) -> bool {
        self.validate(recipient).is_ok()
    }

    /// Deliver rendered content. Failures are reported in the result.
    async fn send(&self, recipient: &Recipient, content: &RenderedContent) -> SendResult;
}

/// Minimal address check: something on both sides of a single `@`.
pub fn validate_email(address: &str) -> Result<(), NotificationError> {
    match address.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(())
        }
        _ => Err(NotificationError::InvalidRecipient(format!(
            "invalid email address '{address}'"
        ))),
    }
}

/// E.164 style number: `+` followed by 7 to 15 digits.
pub fn validate_phone(number: &str) -> Result<(), NotificationError> {
    let valid = number
        .strip_prefix('+')
        .is_some_and(|digits| (7..=15).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit()));
    if valid {
        Ok(())
    } else {
        Err(NotificationError::InvalidRecipient(format!(
            "invalid phone number '{number}'"
        )))
    }
}

pub use email::{EmailChannel, EmailConfig};
pub use in_app::{InAppChannel, InAppMessage, InAppStore, MemoryInAppStore};
pub use sms::{SmsChannel, SmsConfig};
