//! Channel selection strategies.

use std::sync::Arc;

use wrench_storage::Priority;

use crate::channels::NotificationChannel;
use crate::registry::ChannelSet;
use crate::types::{ChannelKind, Recipient};

/// Picks the channel used to reach one recipient for one event.
pub trait ChannelSelector: Send + Sync {
    /// `None` means no installed channel can reach the recipient.
    fn select(
        &self,
        recipient: &Recipient,
        priority: Option<Priority>,
        channels: &ChannelSet,
    ) -> Option<Arc<dyn NotificationChannel>>;
}

/// Default selection order:
///
/// 1. urgent work orders go by SMS when the recipient has a valid phone
/// 2. otherwise the recipient's preferred channel, if reachable
/// 3. otherwise the first reachable channel in `fallback` order
#[derive(Debug, Clone)]
pub struct PreferenceSelector {
    fallback: Vec<ChannelKind>,
}

impl PreferenceSelector {
    pub const DEFAULT_FALLBACK: [ChannelKind; 3] =
        [ChannelKind::Email, ChannelKind::Sms, ChannelKind::InApp];

    pub fn new() -> Self {
        Self {
            fallback: Self::DEFAULT_FALLBACK.to_vec(),
        }
    }

    pub fn with_fallback(fallback: Vec<ChannelKind>) -> Self {
        Self { fallback }
    }

    fn reachable(
        channels: &ChannelSet,
        kind: ChannelKind,
        recipient: &Recipient,
    ) -> Option<Arc<dyn NotificationChannel>> {
        channels
            .get(&kind)
            .filter(|channel| channel.can_reach(recipient))
            .cloned()
    }
}

impl Default for PreferenceSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelSelector for PreferenceSelector {
    fn select(
        &self,
        recipient: &Recipient,
        priority: Option<Priority>,
        channels: &ChannelSet,
    ) -> Option<Arc<dyn NotificationChannel>> {
        if priority == Some(Priority::Urgent)
            && let Some(channel) = Self::reachable(channels, ChannelKind::Sms, recipient)
        {
            return Some(channel);
        }

        if let Some(preferred) = recipient.preferred_channel
            && let Some(channel) = Self::reachable(channels, preferred, recipient)
        {
            return Some(channel);
        }

        self.fallback
            .iter()
            .find_map(|kind| Self::reachable(channels, *kind, recipient))
    }
}
