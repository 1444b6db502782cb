//! Runtime-replaceable set of installed channels.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::channels::NotificationChannel;
use crate::types::ChannelKind;

/// Installed channels at one point in time.
pub type ChannelSet = BTreeMap<ChannelKind, Arc<dyn NotificationChannel>>;

/// Registry mapping each medium to its channel implementation.
///
/// Installing a channel for a kind that is already present replaces it;
/// dispatches already in flight keep the channel they resolved.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: RwLock<ChannelSet>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channels(channels: impl IntoIterator<Item = Arc<dyn NotificationChannel>>) -> Self {
        let set = channels
            .into_iter()
            .map(|channel| (channel.kind(), channel))
            .collect();
        Self {
            channels: RwLock::new(set),
        }
    }

    /// Install or replace the channel for its kind.
    pub async fn install(&self, channel: Arc<dyn NotificationChannel>) {
        let kind = channel.kind();
        let replaced = self.channels.write().await.insert(kind, channel).is_some();
        info!(channel = %kind, replaced, "Notification channel installed");
    }

    pub async fn remove(&self, kind: ChannelKind) -> bool {
        let removed = self.channels.write().await.remove(&kind).is_some();
        if removed {
            info!(channel = %kind, "Notification channel removed");
        }
        removed
    }

    pub async fn get(&self, kind: ChannelKind) -> Option<Arc<dyn NotificationChannel>> {
        self.channels.read().await.get(&kind).cloned()
    }

    pub async fn kinds(&self) -> Vec<ChannelKind> {
        self.channels.read().await.keys().copied().collect()
    }

    /// Clone of the installed channels for one dispatch.
    pub async fn snapshot(&self) -> ChannelSet {
        self.channels.read().await.clone()
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry").finish_non_exhaustive()
    }
}
