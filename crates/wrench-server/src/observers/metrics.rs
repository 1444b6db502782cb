//! Work-order metrics aggregator.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use wrench_core::{Event, EventType, Observer, ObserverError};
use wrench_storage::{UserId, WorkOrderStatus};

use crate::metrics::names;

/// Point-in-time view of the aggregated counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub events_by_type: BTreeMap<String, u64>,
    pub created_total: u64,
    pub assigned_total: u64,
    pub started_total: u64,
    pub completed_total: u64,
    pub cancelled_total: u64,
    /// Orders created and neither completed nor cancelled.
    pub open_work_orders: u64,
    /// Orders started and neither completed nor cancelled.
    pub in_progress: u64,
    pub by_category: BTreeMap<String, u64>,
    pub by_priority: BTreeMap<String, u64>,
    /// Active assignments per technician.
    pub technician_load: BTreeMap<UserId, u64>,
}

#[derive(Debug, Default)]
struct Counters {
    snapshot: MetricsSnapshot,
    cancelled_in_progress: u64,
}

impl Counters {
    fn apply(&mut self, event: &Event) {
        let s = &mut self.snapshot;
        *s.events_by_type
            .entry(event.event_type.to_string())
            .or_default() += 1;

        let payload = &event.payload;
        let technician = payload.get_id("technicianId");

        if event.event_type == EventType::WORK_ORDER_CREATED {
            s.created_total += 1;
            let category = payload.get_str("category").unwrap_or("general");
            *s.by_category.entry(category.to_string()).or_default() += 1;
            let priority = payload.get_str("priority").unwrap_or("normal");
            *s.by_priority.entry(priority.to_string()).or_default() += 1;
        } else if event.event_type == EventType::WORK_ORDER_ASSIGNED {
            s.assigned_total += 1;
            if let Some(previous) = payload.get_id("previousTechnicianId") {
                release(&mut s.technician_load, previous);
            }
            if let Some(id) = technician {
                *s.technician_load.entry(id).or_default() += 1;
            }
        } else if event.event_type == EventType::WORK_ORDER_STARTED {
            s.started_total += 1;
        } else if event.event_type == EventType::WORK_ORDER_COMPLETED {
            s.completed_total += 1;
            if let Some(id) = technician {
                release(&mut s.technician_load, id);
            }
        } else if event.event_type == EventType::WORK_ORDER_STATUS_CHANGED
            && payload.get_str("to") == Some(WorkOrderStatus::Cancelled.as_str())
        {
            s.cancelled_total += 1;
            if payload.get_str("from") == Some(WorkOrderStatus::InProgress.as_str()) {
                self.cancelled_in_progress += 1;
            }
            if let Some(id) = technician {
                release(&mut s.technician_load, id);
            }
        }

        s.open_work_orders = s
            .created_total
            .saturating_sub(s.completed_total + s.cancelled_total);
        s.in_progress = s
            .started_total
            .saturating_sub(s.completed_total + self.cancelled_in_progress);
    }
}

fn release(load: &mut BTreeMap<UserId, u64>, technician: UserId) {
    if let Some(count) = load.get_mut(&technician) {
        *count = count.saturating_sub(1);
        if *count == 0 {
            load.remove(&technician);
        }
    }
}

/// Observer that keeps live work-order counters.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    counters: Mutex<Counters>,
}

impl MetricsAggregator {
    pub const NAME: &'static str = "metrics_aggregator";

    pub const EVENT_TYPES: [EventType; 5] = [
        EventType::WORK_ORDER_CREATED,
        EventType::WORK_ORDER_ASSIGNED,
        EventType::WORK_ORDER_STARTED,
        EventType::WORK_ORDER_COMPLETED,
        EventType::WORK_ORDER_STATUS_CHANGED,
    ];

    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        self.counters.lock().await.snapshot.clone()
    }

    pub async fn reset(&self) {
        *self.counters.lock().await = Counters::default();
    }
}

#[async_trait]
impl Observer for MetricsAggregator {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn react(&self, event: &Event) -> Result<(), ObserverError> {
        let mut counters = self.counters.lock().await;
        counters.apply(event);

        metrics::counter!(names::EVENTS_TOTAL, "type" => event.event_type.to_string())
            .increment(1);
        metrics::gauge!(names::OPEN_WORK_ORDERS).set(counters.snapshot.open_work_orders as f64);
        metrics::gauge!(names::IN_PROGRESS_WORK_ORDERS).set(counters.snapshot.in_progress as f64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wrench_core::Payload;

    fn event(event_type: EventType, payload: Payload) -> Event {
        Event::new(event_type, payload, "test")
    }

    fn created(id: u64, category: &str, priority: &str) -> Event {
        event(
            EventType::WORK_ORDER_CREATED,
            Payload::new()
                .with("workOrderId", id)
                .with("category", category)
                .with("priority", priority),
        )
    }

    #[tokio::test]
    async fn test_lifecycle_counts() {
        let aggregator = MetricsAggregator::new();
        aggregator.react(&created(1, "hvac", "high")).await.unwrap();
        aggregator.react(&created(2, "hvac", "normal")).await.unwrap();
        aggregator.react(&created(3, "plumbing", "high")).await.unwrap();

        let assigned = Payload::new().with("workOrderId", 1).with("technicianId", 7);
        aggregator
            .react(&event(EventType::WORK_ORDER_ASSIGNED, assigned.clone()))
            .await
            .unwrap();
        aggregator
            .react(&event(EventType::WORK_ORDER_STARTED, assigned.clone()))
            .await
            .unwrap();

        let snapshot = aggregator.snapshot().await;
        assert_eq!(snapshot.created_total, 3);
        assert_eq!(snapshot.open_work_orders, 3);
        assert_eq!(snapshot.in_progress, 1);
        assert_eq!(snapshot.by_category["hvac"], 2);
        assert_eq!(snapshot.by_priority["high"], 2);
        assert_eq!(snapshot.technician_load[&7], 1);

        aggregator
            .react(&event(EventType::WORK_ORDER_COMPLETED, assigned))
            .await
            .unwrap();

        let snapshot = aggregator.snapshot().await;
        assert_eq!(snapshot.completed_total, 1);
        assert_eq!(snapshot.open_work_orders, 2);
        assert_eq!(snapshot.in_progress, 0);
        assert!(!snapshot.technician_load.contains_key(&7));
        assert_eq!(snapshot.events_by_type["work_order.created"], 3);
    }

    #[tokio::test]
    async fn test_technician_load_never_negative() {
        let aggregator = MetricsAggregator::new();
        aggregator
            .react(&event(
                EventType::WORK_ORDER_COMPLETED,
                Payload::new().with("technicianId", 9),
            ))
            .await
            .unwrap();

        let snapshot = aggregator.snapshot().await;
        assert!(snapshot.technician_load.is_empty());
        assert_eq!(snapshot.open_work_orders, 0);
    }

    #[tokio::test]
    async fn test_reassignment_moves_load() {
        let aggregator = MetricsAggregator::new();
        aggregator
            .react(&event(
                EventType::WORK_ORDER_ASSIGNED,
                Payload::new().with("technicianId", 3),
            ))
            .await
            .unwrap();
        aggregator
            .react(&event(
                EventType::WORK_ORDER_ASSIGNED,
                Payload::new()
                    .with("technicianId", 4)
                    .with("previousTechnicianId", 3),
            ))
            .await
            .unwrap();

        let snapshot = aggregator.snapshot().await;
        assert_eq!(snapshot.assigned_total, 2);
        assert_eq!(snapshot.technician_load.get(&3), None);
        assert_eq!(snapshot.technician_load[&4], 1);
    }

    #[tokio::test]
    async fn test_cancellation_closes_order() {
        let aggregator = MetricsAggregator::new();
        aggregator.react(&created(1, "general", "low")).await.unwrap();
        aggregator
            .react(&event(
                EventType::WORK_ORDER_STARTED,
                Payload::new().with("workOrderId", 1),
            ))
            .await
            .unwrap();
        aggregator
            .react(&event(
                EventType::WORK_ORDER_STATUS_CHANGED,
                Payload::new()
                    .with("workOrderId", 1)
                    .with("from", "in_progress")
                    .with("to", "cancelled"),
            ))
            .await
            .unwrap();

        let snapshot = aggregator.snapshot().await;
        assert_eq!(snapshot.cancelled_total, 1);
        assert_eq!(snapshot.open_work_orders, 0);
        assert_eq!(snapshot.in_progress, 0);

        aggregator.reset().await;
        assert_eq!(aggregator.snapshot().await, MetricsSnapshot::default());
    }
}
