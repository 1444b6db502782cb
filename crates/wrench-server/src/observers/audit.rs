//! Audit logger observer.
//!
//! Writes one [`AuditRecord`] per published event to an append-only
//! [`AuditSink`]. A failing sink never fails the reaction: the error is
//! logged and the event is considered handled.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, error, info};
use uuid::Uuid;
use wrench_core::{Event, EventType, Observer, ObserverError};

/// Maximum length of the payload summary kept in a record.
const SUMMARY_LEN: usize = 160;

/// Records kept by a [`MemorySink`] unless configured otherwise.
pub const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

/// One line of the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub event_type: EventType,
    pub source: String,
    pub event_id: Uuid,
    pub summary: String,
    pub payload: serde_json::Value,
}

impl AuditRecord {
    pub fn from_event(event: &Event) -> Self {
        Self {
            timestamp: event.occurred_at,
            event_type: event.event_type.clone(),
            source: event.source.clone(),
            event_id: event.id,
            summary: event.payload.summary(SUMMARY_LEN),
            payload: event.payload.to_json(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuditSinkError {
    #[error("audit sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Append-only destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    fn name(&self) -> &str;

    async fn append(&self, record: &AuditRecord) -> Result<(), AuditSinkError>;
}

/// Appends one JSON document per line to a file.
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl JsonLinesSink {
    /// Open (or create) the file in append mode.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AuditSinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        info!(path = %path.display(), "Audit trail opened");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonLinesSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn append(&self, record: &AuditRecord) -> Result<(), AuditSinkError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Emits each record as a structured log line on the `wrench::audit` target.
#[derive(Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl AuditSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn append(&self, record: &AuditRecord) -> Result<(), AuditSinkError> {
        info!(
            target: "wrench::audit",
            event_id = %record.event_id,
            event_type = %record.event_type,
            source = %record.source,
            summary = %record.summary,
            "audit"
        );
        Ok(())
    }
}

/// Keeps the most recent records in memory, oldest evicted first.
#[derive(Debug)]
pub struct MemorySink {
    capacity: usize,
    records: Mutex<VecDeque<AuditRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(VecDeque::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Retained records, oldest first.
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl AuditSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append(&self, record: &AuditRecord) -> Result<(), AuditSinkError> {
        if self.capacity == 0 {
            return Ok(());
        }
        let mut records = self.records.lock().await;
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record.clone());
        Ok(())
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer that records every event it receives. Subscribe it with
/// [`EventBroker::subscribe_any`](wrench_core::EventBroker::subscribe_any)
/// so that event types outside [`EventType::KNOWN`] are audited too.
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
}

impl AuditLogger {
    pub const NAME: &'static str = "audit_logger";

    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &Arc<dyn AuditSink> {
        &self.sink
    }
}

#[async_trait]
impl Observer for AuditLogger {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn react(&self, event: &Event) -> Result<(), ObserverError> {
        let record = AuditRecord::from_event(event);
        match self.sink.append(&record).await {
            Ok(()) => debug!(event_id = %event.id, sink = self.sink.name(), "Audit record written"),
            Err(e) => error!(
                event_id = %event.id,
                event_type = %event.event_type,
                sink = self.sink.name(),
                error = %e,
                "Failed to write audit record"
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wrench_core::Payload;

    struct BrokenSink;

    #[async_trait]
    impl AuditSink for BrokenSink {
        fn name(&self) -> &str {
            "broken"
        }

        async fn append(&self, _record: &AuditRecord) -> Result<(), AuditSinkError> {
            Err(std::io::Error::other("disk full").into())
        }
    }

    fn assigned() -> Event {
        Event::new(
            EventType::WORK_ORDER_ASSIGNED,
            Payload::new().with("workOrderId", 42).with("technicianId", 3),
            "work_order_service",
        )
    }

    #[tokio::test]
    async fn test_record_captures_event() {
        let sink = Arc::new(MemorySink::new());
        let logger = AuditLogger::new(sink.clone());
        let event = assigned();

        logger.react(&event).await.unwrap();

        let records = sink.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_id, event.id);
        assert_eq!(records[0].event_type, EventType::WORK_ORDER_ASSIGNED);
        assert_eq!(records[0].source, "work_order_service");
        assert_eq!(records[0].summary, "workOrderId=42 technicianId=3");
        assert_eq!(records[0].payload["technicianId"], 3);
    }

    #[tokio::test]
    async fn test_memory_sink_is_bounded() {
        let sink = MemorySink::with_capacity(2);
        let events: Vec<Event> = (0..3).map(|_| assigned()).collect();
        for event in &events {
            sink.append(&AuditRecord::from_event(event)).await.unwrap();
        }

        let kept: Vec<Uuid> = sink.records().await.iter().map(|r| r.event_id).collect();
        assert_eq!(kept, vec![events[1].id, events[2].id]);
    }

    #[tokio::test]
    async fn test_catch_all_subscription_audits_custom_types() {
        use wrench_core::{Delivery, EventBroker};

        let sink = Arc::new(MemorySink::new());
        let logger = Arc::new(AuditLogger::new(sink.clone()));
        let broker = EventBroker::new();
        broker.subscribe_any(&logger, Delivery::Inline).await;

        let event = broker
            .publish(
                "inventory.restocked",
                Payload::new().with("sku", "FLT-20"),
                "stockroom",
            )
            .await;
        broker
            .publish(EventType::USER_REGISTERED, Payload::new().with("userId", 9), "test")
            .await;

        let records = sink.records().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event_id, event.id);
        assert_eq!(records[0].event_type.as_str(), "inventory.restocked");
        assert_eq!(records[0].source, "stockroom");
    }

    #[tokio::test]
    async fn test_sink_failure_is_swallowed() {
        let logger = AuditLogger::new(Arc::new(BrokenSink));
        assert!(logger.react(&assigned()).await.is_ok());
    }

    #[tokio::test]
    async fn test_json_lines_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit").join("trail.jsonl");
        let sink = Arc::new(JsonLinesSink::open(&path).await.unwrap());
        let logger = AuditLogger::new(sink.clone());

        let first = assigned();
        let second = assigned();
        logger.react(&first).await.unwrap();
        logger.react(&second).await.unwrap();

        let contents = tokio::fs::read_to_string(sink.path()).await.unwrap();
        let records: Vec<AuditRecord> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event_id, first.id);
        assert_eq!(records[1].event_id, second.id);
    }

    #[tokio::test]
    async fn test_json_lines_sink_reopen_keeps_existing_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trail.jsonl");

        JsonLinesSink::open(&path)
            .await
            .unwrap()
            .append(&AuditRecord::from_event(&assigned()))
            .await
            .unwrap();
        JsonLinesSink::open(&path)
            .await
            .unwrap()
            .append(&AuditRecord::from_event(&assigned()))
            .await
            .unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
