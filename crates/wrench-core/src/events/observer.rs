//! Observer capability for the work-order event system.
//!
//! Observers are the consumers that react to published events. They are:
//! - **Opaque**: the broker only knows the trait object, never the concrete type
//! - **Isolated**: an error or panic in one observer never reaches another
//!   observer or the publisher
//! - **Borrowed**: the broker keeps weak references and never extends an
//!   observer's lifetime

use std::any::Any;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures_util::FutureExt;
use tracing::{debug, error, warn};

use super::types::Event;

/// Error type for observer reactions.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// Reaction failed with a message.
    #[error("Observer execution failed: {0}")]
    Execution(String),

    /// A storage collaborator call failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Outbound delivery failed.
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Writing to a sink failed.
    #[error("Sink error: {0}")]
    Sink(String),

    /// The event payload lacked a field or carried the wrong shape.
    #[error("Invalid payload field '{field}': {reason}")]
    InvalidPayload { field: String, reason: String },

    /// Generic error with source.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ObserverError {
    /// Create an execution error from a string.
    pub fn execution(msg: impl Into<String>) -> Self {
        ObserverError::Execution(msg.into())
    }

    /// Create a storage error from a string.
    pub fn storage(msg: impl Into<String>) -> Self {
        ObserverError::Storage(msg.into())
    }

    /// Create a delivery error from a string.
    pub fn delivery(msg: impl Into<String>) -> Self {
        ObserverError::Delivery(msg.into())
    }

    /// Create an invalid payload error.
    pub fn invalid_payload(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ObserverError::InvalidPayload {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Capability implemented by every event consumer.
///
/// # Implementation Notes
///
/// - `react` receives a shared reference; the event must not be modified
/// - Errors are logged by the broker with the observer name and event id
/// - Panics are caught at the call site
/// - An inline observer must not publish an event of the type it is
///   currently reacting to; subscribe it with `Delivery::Queued` instead
///
/// # Example
///
/// ```ignore
/// struct Counter(AtomicUsize);
///
/// #[async_trait]
/// impl Observer for Counter {
///     fn name(&self) -> &str { "counter" }
///
///     async fn react(&self, _event: &Event) -> Result<(), ObserverError> {
///         self.0.fetch_add(1, Ordering::SeqCst);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Observer: Send + Sync {
    /// Name used in logs when this observer fails.
    fn name(&self) -> &str;

    /// React to a published event.
    async fn react(&self, event: &Event) -> Result<(), ObserverError>;
}

/// Outcome of invoking one observer for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reaction {
    Ok,
    Failed,
    Panicked,
}

/// Invoke an observer inside its own failure boundary.
pub(crate) async fn invoke(observer: &dyn Observer, name: &str, event: &Event) -> Reaction {
    match AssertUnwindSafe(observer.react(event)).catch_unwind().await {
        Ok(Ok(())) => {
            debug!(observer = %name, event_id = %event.id, "Observer reacted");
            Reaction::Ok
        }
        Ok(Err(e)) => {
            warn!(
                observer = %name,
                event_id = %event.id,
                event_type = %event.event_type,
                error = %e,
                "Observer failed"
            );
            Reaction::Failed
        }
        Err(panic) => {
            error!(
                observer = %name,
                event_id = %event.id,
                event_type = %event.event_type,
                panic = %panic_message(panic.as_ref()),
                "Observer panicked"
            );
            Reaction::Panicked
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
