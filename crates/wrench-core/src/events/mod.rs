//! Work-order event system for inter-module communication.
//!
//! This module provides the decoupling layer between the work-order
//! lifecycle (producer) and the components reacting to it (observers).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          Event Broker                               │
//! │     event type ─► [subscriptions]        bounded history ring       │
//! └─────────────────────────────────────────────────────────────────────┘
//!          │                    │                    │
//!          ▼                    ▼                    ▼
//!    ┌──────────┐        ┌──────────┐        ┌──────────┐
//!    │ Observer │        │ Observer │        │ Observer │
//!    │ (inline) │        │ (inline) │        │ (queued) │
//!    └──────────┘        └──────────┘        └──────────┘
//! ```
//!
//! # Features
//!
//! - **Event Types**: open `EventType` tag with constants for lifecycle transitions
//! - **Broker**: per-type registry, publish-order delivery, bounded history
//! - **Catch-all**: `subscribe_any` receives every type, custom tags included
//! - **Observers**: async `react()` with panic and error isolation
//! - **Delivery**: inline (awaited by `publish`) or queued (dedicated worker)
//!
//! # Example
//!
//! ```ignore
//! use wrench_core::events::{EventBroker, EventType, Payload};
//!
//! let broker = EventBroker::new_shared();
//! broker.subscribe(EventType::WORK_ORDER_ASSIGNED, &projector).await;
//!
//! broker
//!     .publish(
//!         EventType::WORK_ORDER_ASSIGNED,
//!         Payload::new().with("workOrderId", 42).with("resourceId", 7),
//!         "work_order_service",
//!     )
//!     .await;
//! ```

pub mod broker;
pub mod history;
pub mod observer;
pub mod types;

pub use broker::{
    BrokerConfig, BrokerStats, Delivery, EVENTS_PUBLISHED_TOTAL, EventBroker,
    OBSERVER_FAILURES_TOTAL, SubscriptionId,
};
pub use history::{DEFAULT_HISTORY_CAPACITY, HistoryQuery};
pub use observer::{Observer, ObserverError};
pub use types::{Event, EventType, Payload};
