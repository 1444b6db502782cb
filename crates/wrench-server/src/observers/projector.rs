//! Equipment state projection.
//!
//! While a work order against a resource is assigned, the resource is held
//! `in_maintenance`. The status it had before the first hold is restored
//! once the last holder completes (or is cancelled).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};
use wrench_core::{Event, EventType, Observer, ObserverError};
use wrench_storage::{EquipmentStatus, ResourceId, ResourceStore, WorkOrderId, WorkOrderStatus};

#[derive(Debug)]
struct Hold {
    prior: EquipmentStatus,
    holders: BTreeSet<WorkOrderId>,
}

pub struct ResourceStateProjector {
    resources: Arc<dyn ResourceStore>,
    fallback_status: EquipmentStatus,
    holds: Mutex<HashMap<ResourceId, Hold>>,
}

impl ResourceStateProjector {
    pub const NAME: &'static str = "resource_state_projector";

    pub const EVENT_TYPES: [EventType; 3] = [
        EventType::WORK_ORDER_ASSIGNED,
        EventType::WORK_ORDER_COMPLETED,
        EventType::WORK_ORDER_STATUS_CHANGED,
    ];

    pub fn new(resources: Arc<dyn ResourceStore>) -> Self {
        Self::with_fallback(resources, EquipmentStatus::Operational)
    }

    pub fn with_fallback(resources: Arc<dyn ResourceStore>, fallback_status: EquipmentStatus) -> Self {
        Self {
            resources,
            fallback_status,
            holds: Mutex::new(HashMap::new()),
        }
    }

    /// Number of work orders currently holding a resource.
    pub async fn holders(&self, resource_id: ResourceId) -> usize {
        self.holds
            .lock()
            .await
            .get(&resource_id)
            .map_or(0, |hold| hold.holders.len())
    }

    async fn hold(
        &self,
        resource_id: ResourceId,
        order_id: WorkOrderId,
    ) -> Result<(), ObserverError> {
        let mut holds = self.holds.lock().await;
        if let Some(hold) = holds.get_mut(&resource_id) {
            hold.holders.insert(order_id);
            return Ok(());
        }

        let resource = self
            .resources
            .get_resource(resource_id)
            .await
            .map_err(|e| ObserverError::storage(e.to_string()))?
            .ok_or_else(|| ObserverError::storage(format!("resource {resource_id} not found")))?;

        self.resources
            .update_resource_status(resource_id, EquipmentStatus::InMaintenance)
            .await
            .map_err(|e| ObserverError::storage(e.to_string()))?;

        info!(
            resource_id,
            work_order_id = order_id,
            prior = %resource.status,
            "Resource held for maintenance"
        );
        holds.insert(
            resource_id,
            Hold {
                prior: resource.status,
                holders: BTreeSet::from([order_id]),
            },
        );
        Ok(())
    }

    async fn release(
        &self,
        resource_id: ResourceId,
        order_id: WorkOrderId,
    ) -> Result<(), ObserverError> {
        let mut holds = self.holds.lock().await;
        let restore = match holds.get_mut(&resource_id) {
            Some(hold) => {
                hold.holders.remove(&order_id);
                if !hold.holders.is_empty() {
                    debug!(
                        resource_id,
                        remaining = hold.holders.len(),
                        "Resource still held by other work orders"
                    );
                    return Ok(());
                }
                hold.prior
            }
            None => self.fallback_status,
        };

        self.resources
            .update_resource_status(resource_id, restore)
            .await
            .map_err(|e| ObserverError::storage(e.to_string()))?;
        holds.remove(&resource_id);

        info!(resource_id, status = %restore, "Resource status restored");
        Ok(())
    }
}

#[async_trait]
impl Observer for ResourceStateProjector {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn react(&self, event: &Event) -> Result<(), ObserverError> {
        let Some(resource_id) = event.payload.get_id("resourceId") else {
            return Ok(());
        };
        let order_id = event.payload.get_id("workOrderId");

        if event.event_type == EventType::WORK_ORDER_ASSIGNED {
            let order_id = order_id.ok_or_else(|| {
                ObserverError::invalid_payload("workOrderId", "required for assignments")
            })?;
            self.hold(resource_id, order_id).await
        } else if event.event_type == EventType::WORK_ORDER_COMPLETED {
            let order_id = order_id.ok_or_else(|| {
                ObserverError::invalid_payload("workOrderId", "required for completions")
            })?;
            self.release(resource_id, order_id).await
        } else if event.event_type == EventType::WORK_ORDER_STATUS_CHANGED
            && event.payload.get_str("to") == Some(WorkOrderStatus::Cancelled.as_str())
        {
            // Only cancelled orders that actually held the resource release it.
            let Some(order_id) = order_id else {
                return Ok(());
            };
            let held = self
                .holds
                .lock()
                .await
                .get(&resource_id)
                .is_some_and(|hold| hold.holders.contains(&order_id));
            if held {
                self.release(resource_id, order_id).await
            } else {
                Ok(())
            }
        } else {
            Ok(())
        }
    }
}
