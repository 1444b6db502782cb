//! Work-order lifecycle and directory services.
//!
//! These are the producers: every state change is written to storage first
//! and only then published on the broker. Transitions of one service are
//! serialized through publication, so inline observers must not call back
//! into the service.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, instrument};
use wrench_api::ApiError;
use wrench_core::{EventBroker, EventType, Payload};
use wrench_storage::{
    EquipmentStatus, NewResource, NewUser, NewWorkOrder, Resource, ResourceId, ResourceStore,
    Role, StorageError, User, UserDirectory, UserId, WorkOrder, WorkOrderFilter, WorkOrderId,
    WorkOrderStatus, WorkOrderStore,
};

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("work order {0} not found")]
    NotFound(WorkOrderId),

    #[error("cannot move work order from {from} to {to}")]
    InvalidTransition {
        from: WorkOrderStatus,
        to: WorkOrderStatus,
    },

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl LifecycleError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::NotFound(_) => ApiError::not_found(e.to_string()),
            LifecycleError::InvalidTransition { .. } => ApiError::conflict(e.to_string()),
            LifecycleError::Validation(msg) => ApiError::bad_request(msg),
            LifecycleError::Storage(inner) => inner.into(),
        }
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Whether a work order may move from `from` to `to`.
pub fn is_allowed(from: WorkOrderStatus, to: WorkOrderStatus) -> bool {
    use WorkOrderStatus::*;
    matches!(
        (from, to),
        (Open, Assigned)
            | (Assigned, Assigned)
            | (Assigned, InProgress)
            | (InProgress, Completed)
            | (Open | Assigned | InProgress, Cancelled)
    )
}

/// Event fields shared by every work-order event.
fn order_payload(order: &WorkOrder) -> Payload {
    Payload::new()
        .with("workOrderId", order.id)
        .with("title", order.title.as_str())
        .with("category", order.category.as_str())
        .with("priority", order.priority.as_str())
        .with("submitterId", order.submitter_id)
        .with_opt("technicianId", order.technician_id)
        .with_opt("resourceId", order.resource_id)
        .with("status", order.status.as_str())
        .with_opt("resolution", order.resolution.clone())
}

pub struct WorkOrderService {
    orders: Arc<dyn WorkOrderStore>,
    users: Arc<dyn UserDirectory>,
    resources: Arc<dyn ResourceStore>,
    broker: Arc<EventBroker>,
    // Held from the read of a transition until its events are published.
    transitions: Mutex<()>,
}

/// A stored transition whose events are not yet published.
struct Transition<'a, R> {
    _guard: MutexGuard<'a, ()>,
    from: WorkOrderStatus,
    applied: R,
    order: WorkOrder,
}

impl WorkOrderService {
    /// Event source label.
    pub const SOURCE: &'static str = "work_order_service";

    pub fn new(
        orders: Arc<dyn WorkOrderStore>,
        users: Arc<dyn UserDirectory>,
        resources: Arc<dyn ResourceStore>,
        broker: Arc<EventBroker>,
    ) -> Self {
        Self {
            orders,
            users,
            resources,
            broker,
            transitions: Mutex::new(()),
        }
    }

    pub async fn get(&self, id: WorkOrderId) -> LifecycleResult<WorkOrder> {
        self.orders
            .get(id)
            .await?
            .ok_or(LifecycleError::NotFound(id))
    }

    pub async fn list(&self, filter: &WorkOrderFilter) -> LifecycleResult<Vec<WorkOrder>> {
        Ok(self.orders.list(filter).await?)
    }

    #[instrument(skip(self, request), fields(title = %request.title))]
    pub async fn create(&self, request: NewWorkOrder) -> LifecycleResult<WorkOrder> {
        if request.title.trim().is_empty() {
            return Err(LifecycleError::validation("title must not be empty"));
        }
        if self.users.get_user(request.submitter_id).await?.is_none() {
            return Err(LifecycleError::validation(format!(
                "submitter {} is not a registered user",
                request.submitter_id
            )));
        }
        if let Some(resource_id) = request.resource_id {
            if self.resources.get_resource(resource_id).await?.is_none() {
                return Err(LifecycleError::validation(format!(
                    "resource {resource_id} does not exist"
                )));
            }
        }

        let order = self.orders.insert(request).await?;
        info!(work_order_id = order.id, "Work order created");
        self.broker
            .publish(EventType::WORK_ORDER_CREATED, order_payload(&order), Self::SOURCE)
            .await;
        Ok(order)
    }

    #[instrument(skip(self))]
    pub async fn assign(
        &self,
        id: WorkOrderId,
        technician_id: UserId,
    ) -> LifecycleResult<WorkOrder> {
        let technician = self
            .users
            .get_user(technician_id)
            .await?
            .ok_or_else(|| {
                LifecycleError::validation(format!("technician {technician_id} is not a registered user"))
            })?;
        if technician.role != Role::Technician {
            return Err(LifecycleError::validation(format!(
                "user {technician_id} is not a technician"
            )));
        }

        let step = self
            .transition(id, WorkOrderStatus::Assigned, |order| {
                order.technician_id.replace(technician_id)
            })
            .await?;

        let mut payload = order_payload(&step.order);
        if let Some(previous) = step.applied.filter(|p| *p != technician_id) {
            payload.insert("previousTechnicianId", previous);
        }
        self.publish(EventType::WORK_ORDER_ASSIGNED, payload, &step.order, step.from)
            .await;
        Ok(step.order)
    }

    #[instrument(skip(self))]
    pub async fn start(&self, id: WorkOrderId) -> LifecycleResult<WorkOrder> {
        let step = self
            .transition(id, WorkOrderStatus::InProgress, |_| ())
            .await?;
        self.publish(
            EventType::WORK_ORDER_STARTED,
            order_payload(&step.order),
            &step.order,
            step.from,
        )
        .await;
        Ok(step.order)
    }

    #[instrument(skip(self, resolution))]
    pub async fn complete(
        &self,
        id: WorkOrderId,
        resolution: Option<String>,
    ) -> LifecycleResult<WorkOrder> {
        let step = self
            .transition(id, WorkOrderStatus::Completed, |order| {
                order.completed_at = Some(order.updated_at);
                order.resolution = resolution;
            })
            .await?;
        self.publish(
            EventType::WORK_ORDER_COMPLETED,
            order_payload(&step.order),
            &step.order,
            step.from,
        )
        .await;
        Ok(step.order)
    }

    /// Cancel an order; only `work_order.status_changed` is published.
    #[instrument(skip(self, reason))]
    pub async fn cancel(&self, id: WorkOrderId, reason: Option<String>) -> LifecycleResult<WorkOrder> {
        let step = self
            .transition(id, WorkOrderStatus::Cancelled, |_| ())
            .await?;
        self.publish_status_changed(&step.order, step.from, reason)
            .await;
        Ok(step.order)
    }

    /// Validate and persist a transition. The returned [`Transition`] keeps
    /// the transition lock until it is dropped, so callers publish while
    /// still holding it.
    async fn transition<R>(
        &self,
        id: WorkOrderId,
        to: WorkOrderStatus,
        apply: impl FnOnce(&mut WorkOrder) -> R,
    ) -> LifecycleResult<Transition<'_, R>> {
        let guard = self.transitions.lock().await;
        let mut order = self.get(id).await?;
        let from = order.status;
        if !is_allowed(from, to) {
            return Err(LifecycleError::InvalidTransition { from, to });
        }

        order.status = to;
        order.updated_at = OffsetDateTime::now_utc();
        let applied = apply(&mut order);
        let order = self.orders.update(order).await?;
        info!(work_order_id = id, %from, %to, "Work order transitioned");
        Ok(Transition {
            _guard: guard,
            from,
            applied,
            order,
        })
    }

    async fn publish(
        &self,
        event_type: EventType,
        payload: Payload,
        order: &WorkOrder,
        from: WorkOrderStatus,
    ) {
        self.broker.publish(event_type, payload, Self::SOURCE).await;
        self.publish_status_changed(order, from, None).await;
    }

    async fn publish_status_changed(
        &self,
        order: &WorkOrder,
        from: WorkOrderStatus,
        reason: Option<String>,
    ) {
        let payload = order_payload(order)
            .with("from", from.as_str())
            .with("to", order.status.as_str())
            .with_opt("reason", reason);
        self.broker
            .publish(EventType::WORK_ORDER_STATUS_CHANGED, payload, Self::SOURCE)
            .await;
    }
}

/// Registration of users and equipment, and condition reports.
pub struct DirectoryService {
    users: Arc<dyn UserDirectory>,
    resources: Arc<dyn ResourceStore>,
    broker: Arc<EventBroker>,
}

impl DirectoryService {
    pub const SOURCE: &'static str = "directory_service";

    pub fn new(
        users: Arc<dyn UserDirectory>,
        resources: Arc<dyn ResourceStore>,
        broker: Arc<EventBroker>,
    ) -> Self {
        Self {
            users,
            resources,
            broker,
        }
    }

    pub async fn register_user(&self, request: NewUser) -> LifecycleResult<User> {
        if request.name.trim().is_empty() {
            return Err(LifecycleError::validation("name must not be empty"));
        }
        let user = self.users.create_user(request).await?;
        info!(user_id = user.id, role = %user.role, "User registered");
        self.broker
            .publish(
                EventType::USER_REGISTERED,
                Payload::new()
                    .with("userId", user.id)
                    .with("name", user.name.as_str())
                    .with("role", user.role.as_str()),
                Self::SOURCE,
            )
            .await;
        Ok(user)
    }

    pub async fn get_user(&self, id: UserId) -> LifecycleResult<User> {
        self.users
            .get_user(id)
            .await?
            .ok_or_else(|| StorageError::not_found("user", id).into())
    }

    pub async fn list_users(&self) -> LifecycleResult<Vec<User>> {
        Ok(self.users.list_users().await?)
    }

    pub async fn create_resource(&self, request: NewResource) -> LifecycleResult<Resource> {
        if request.name.trim().is_empty() {
            return Err(LifecycleError::validation("name must not be empty"));
        }
        let resource = self.resources.create_resource(request).await?;
        info!(resource_id = resource.id, "Resource created");
        Ok(resource)
    }

    pub async fn get_resource(&self, id: ResourceId) -> LifecycleResult<Resource> {
        self.resources
            .get_resource(id)
            .await?
            .ok_or_else(|| StorageError::not_found("resource", id).into())
    }

    pub async fn list_resources(&self) -> LifecycleResult<Vec<Resource>> {
        Ok(self.resources.list_resources().await?)
    }

    /// Record an observed equipment condition and publish the change.
    pub async fn report_condition(
        &self,
        id: ResourceId,
        status: EquipmentStatus,
        note: Option<String>,
    ) -> LifecycleResult<Resource> {
        let before = self.get_resource(id).await?;
        let resource = self.resources.update_resource_status(id, status).await?;
        info!(resource_id = id, from = %before.status, to = %status, "Equipment condition reported");
        self.broker
            .publish(
                EventType::EQUIPMENT_CONDITION_CHANGED,
                Payload::new()
                    .with("resourceId", id)
                    .with("name", resource.name.as_str())
                    .with("from", before.status.as_str())
                    .with("to", status.as_str())
                    .with_opt("note", note),
                Self::SOURCE,
            )
            .await;
        Ok(resource)
    }
}
