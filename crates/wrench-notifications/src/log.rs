//! Bounded store of delivery attempts.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;
use wrench_storage::UserId;

use crate::types::NotificationRecord;

pub const DEFAULT_RECORD_CAPACITY: usize = 10_000;

/// Filter for [`NotificationLog::query`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordQuery {
    #[serde(default)]
    pub recipient_id: Option<UserId>,
    #[serde(default)]
    pub event_id: Option<Uuid>,
    /// Only failed attempts.
    #[serde(default)]
    pub failed_only: bool,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl RecordQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recipient(mut self, recipient_id: UserId) -> Self {
        self.recipient_id = Some(recipient_id);
        self
    }

    pub fn event(mut self, event_id: Uuid) -> Self {
        self.event_id = Some(event_id);
        self
    }

    pub fn failed(mut self) -> Self {
        self.failed_only = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, record: &NotificationRecord) -> bool {
        self.recipient_id.is_none_or(|id| record.recipient_id == id)
            && self.event_id.is_none_or(|id| record.event_id == id)
            && (!self.failed_only || !record.success)
    }
}

/// Most recent delivery attempts, oldest evicted first.
#[derive(Debug)]
pub struct NotificationLog {
    capacity: usize,
    records: RwLock<VecDeque<NotificationRecord>>,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RECORD_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            records: RwLock::new(VecDeque::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn record(&self, record: NotificationRecord) {
        if self.capacity == 0 {
            return;
        }
        let mut records = self.records.write().await;
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Matching records oldest first, trimmed to the most recent `limit`.
    pub async fn query(&self, query: &RecordQuery) -> Vec<NotificationRecord> {
        let records = self.records.read().await;
        let mut matched: Vec<NotificationRecord> = records
            .iter()
            .rev()
            .filter(|record| query.matches(record))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        matched.reverse();
        matched
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.records.write().await.clear();
    }
}

impl Default for NotificationLog {
    fn default() -> Self {
        Self::new()
    }
}
