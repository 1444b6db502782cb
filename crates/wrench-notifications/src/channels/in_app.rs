use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::NotificationChannel;
use crate::error::NotificationError;
use crate::types::{ChannelKind, Recipient, RenderedContent, SendResult};
use wrench_storage::UserId;

/// Message shown in a user's in-application inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InAppMessage {
    pub id: u64,
    pub user_id: UserId,
    pub subject: String,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub read: bool,
}

/// Inbox storage behind the in-app channel.
#[async_trait]
pub trait InAppStore: Send + Sync {
    /// Store a message and return its id.
    async fn push(
        &self,
        user_id: UserId,
        subject: String,
        body: String,
    ) -> Result<u64, NotificationError>;

    /// Messages for a user, oldest first.
    async fn list(&self, user_id: UserId) -> Result<Vec<InAppMessage>, NotificationError>;

    /// Returns `false` if the message does not exist for that user.
    async fn mark_read(&self, user_id: UserId, message_id: u64) -> Result<bool, NotificationError>;

    async fn unread_count(&self, user_id: UserId) -> Result<usize, NotificationError> {
        Ok(self
            .list(user_id)
            .await?
            .iter()
            .filter(|m| !m.read)
            .count())
    }
}

#[derive(Debug)]
pub struct MemoryInAppStore {
    inboxes: DashMap<UserId, Vec<InAppMessage>>,
    next_id: AtomicU64,
}

impl MemoryInAppStore {
    pub fn new() -> Self {
        Self {
            inboxes: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for MemoryInAppStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InAppStore for MemoryInAppStore {
    async fn push(
        &self,
        user_id: UserId,
        subject: String,
        body: String,
    ) -> Result<u64, NotificationError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.inboxes.entry(user_id).or_default().push(InAppMessage {
            id,
            user_id,
            subject,
            body,
            created_at: OffsetDateTime::now_utc(),
            read: false,
        });
        Ok(id)
    }

    async fn list(&self, user_id: UserId) -> Result<Vec<InAppMessage>, NotificationError> {
        Ok(self
            .inboxes
            .get(&user_id)
            .map(|inbox| inbox.value().clone())
            .unwrap_or_default())
    }

    async fn mark_read(&self, user_id: UserId, message_id: u64) -> Result<bool, NotificationError> {
        let Some(mut inbox) = self.inboxes.get_mut(&user_id) else {
            return Ok(false);
        };
        match inbox.iter_mut().find(|m| m.id == message_id) {
            Some(message) => {
                message.read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// In-application channel; every registered user is reachable.
pub struct InAppChannel {
    store: Arc<dyn InAppStore>,
}

impl InAppChannel {
    pub fn new(store: Arc<dyn InAppStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn InAppStore> {
        &self.store
    }
}

#[async_trait]
impl NotificationChannel for InAppChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::InApp
    }

    fn validate(&self, recipient: &Recipient) -> Result<(), NotificationError> {
        if recipient.user_id == 0 {
            return Err(NotificationError::InvalidRecipient(
                "in-app delivery needs a user id".into(),
            ));
        }
        Ok(())
    }

    async fn send(&self, recipient: &Recipient, content: &RenderedContent) -> SendResult {
        if let Err(e) = self.validate(recipient) {
            return SendResult::failure(e);
        }
        match self
            .store
            .push(
                recipient.user_id,
                content.subject.clone(),
                content.body.clone(),
            )
            .await
        {
            Ok(id) => SendResult::success(Some(id.to_string())),
            Err(e) => SendResult::failure(e),
        }
    }
}
