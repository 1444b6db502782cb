//! Notification delivery for work-order events.
//!
//! [`NotificationDispatcher`] is an observer: subscribe it to
//! [`NotificationDispatcher::EVENT_TYPES`] and it resolves recipients,
//! renders a message, picks a channel through a [`ChannelSelector`] and
//! records every attempt in a [`NotificationLog`].

pub mod channels;
pub mod dispatcher;
pub mod error;
pub mod log;
pub mod registry;
pub mod selector;
pub mod templates;
pub mod types;

pub use channels::{
    EmailChannel, EmailConfig, InAppChannel, InAppMessage, InAppStore, MemoryInAppStore,
    NotificationChannel, SmsChannel, SmsConfig,
};
pub use dispatcher::{NOTIFICATIONS_TOTAL, NotificationDispatcher};
pub use error::NotificationError;
pub use log::{DEFAULT_RECORD_CAPACITY, NotificationLog, RecordQuery};
pub use registry::{ChannelRegistry, ChannelSet};
pub use selector::{ChannelSelector, PreferenceSelector};
pub use templates::{Template, TemplateRenderer};
pub use types::*;
