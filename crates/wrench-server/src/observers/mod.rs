//! Observers that turn work-order events into side effects.

pub mod audit;
pub mod metrics;
pub mod projector;

pub use audit::{
    AuditLogger, AuditRecord, AuditSink, AuditSinkError, DEFAULT_MEMORY_CAPACITY, JsonLinesSink,
    MemorySink, TracingSink,
};
pub use metrics::{MetricsAggregator, MetricsSnapshot};
pub use projector::ResourceStateProjector;
