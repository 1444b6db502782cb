//! Collaborator contracts reached by the lifecycle service and observers.
//!
//! Every contract is object safe and `Send + Sync` so implementations can be
//! shared as `Arc<dyn ...>` between the HTTP handlers and the observers.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::types::{
    EquipmentStatus, NewResource, NewUser, NewWorkOrder, Resource, ResourceId, Role, User, UserId,
    WorkOrder, WorkOrderFilter, WorkOrderId,
};

/// Directory of users who can submit, work on, or be notified about orders.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Look up a single user. `None` if the id is unknown.
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StorageError>;

    /// All users with the given role, ordered by id.
    async fn users_with_role(&self, role: Role) -> Result<Vec<User>, StorageError>;

    /// Register a new user and allocate its id.
    async fn create_user(&self, user: NewUser) -> Result<User, StorageError>;

    /// Insert or replace a user by id.
    async fn upsert_user(&self, user: User) -> Result<User, StorageError>;

    async fn list_users(&self) -> Result<Vec<User>, StorageError>;
}

/// Store of equipment resources.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_resource(&self, id: ResourceId) -> Result<Option<Resource>, StorageError>;

    /// Set the status of an existing resource and return the updated record.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the resource does not exist.
    async fn update_resource_status(
        &self,
        id: ResourceId,
        status: EquipmentStatus,
    ) -> Result<Resource, StorageError>;

    async fn create_resource(&self, resource: NewResource) -> Result<Resource, StorageError>;

    async fn upsert_resource(&self, resource: Resource) -> Result<Resource, StorageError>;

    /// All resources, ordered by id.
    async fn list_resources(&self) -> Result<Vec<Resource>, StorageError>;
}

/// Store of work orders.
#[async_trait]
pub trait WorkOrderStore: Send + Sync {
    /// Persist a new order with status `open` and a fresh id.
    async fn insert(&self, order: NewWorkOrder) -> Result<WorkOrder, StorageError>;

    async fn get(&self, id: WorkOrderId) -> Result<Option<WorkOrder>, StorageError>;

    /// Replace an existing order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no order with that id exists.
    async fn update(&self, order: WorkOrder) -> Result<WorkOrder, StorageError>;

    /// Orders matching the filter, ordered by id.
    async fn list(&self, filter: &WorkOrderFilter) -> Result<Vec<WorkOrder>, StorageError>;
}
