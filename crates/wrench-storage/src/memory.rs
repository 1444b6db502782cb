//! In-memory backends built on `DashMap`.
//!
//! Ids are allocated from an atomic counter starting at 1. Upserting a record
//! with an explicit id bumps the counter past it so later allocations never
//! collide.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;
use tracing::debug;

use crate::error::StorageError;
use crate::traits::{ResourceStore, UserDirectory, WorkOrderStore};
use crate::types::{
    EquipmentStatus, NewResource, NewUser, NewWorkOrder, Resource, ResourceId, Role, User, UserId,
    WorkOrder, WorkOrderFilter, WorkOrderId,
};

#[derive(Debug)]
struct IdAllocator(AtomicU64);

impl IdAllocator {
    fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    fn observe(&self, id: u64) {
        self.0.fetch_max(id.saturating_add(1), Ordering::Relaxed);
    }
}

fn sorted_by_id<T: Clone>(map: &DashMap<u64, T>, keep: impl Fn(&T) -> bool) -> Vec<T> {
    let mut entries: Vec<(u64, T)> = map
        .iter()
        .filter(|entry| keep(entry.value()))
        .map(|entry| (*entry.key(), entry.value().clone()))
        .collect();
    entries.sort_by_key(|(id, _)| *id);
    entries.into_iter().map(|(_, value)| value).collect()
}

// ============================================================================
// Users
// ============================================================================

#[derive(Debug)]
pub struct MemoryUserDirectory {
    users: DashMap<UserId, User>,
    ids: IdAllocator,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            ids: IdAllocator::new(),
        }
    }

    /// Build a directory pre-populated with the given users.
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let directory = Self::new();
        for user in users {
            directory.ids.observe(user.id);
            directory.users.insert(user.id, user);
        }
        directory
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl Default for MemoryUserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StorageError> {
        Ok(self.users.get(&id).map(|u| u.value().clone()))
    }

    async fn users_with_role(&self, role: Role) -> Result<Vec<User>, StorageError> {
        Ok(sorted_by_id(&self.users, |u| u.role == role))
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StorageError> {
        if user.name.trim().is_empty() {
            return Err(StorageError::invalid("user name must not be empty"));
        }
        let user = user.into_user(self.ids.next());
        self.users.insert(user.id, user.clone());
        debug!(user_id = user.id, role = %user.role, "User created");
        Ok(user)
    }

    async fn upsert_user(&self, user: User) -> Result<User, StorageError> {
        self.ids.observe(user.id);
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn list_users(&self) -> Result<Vec<User>, StorageError> {
        Ok(sorted_by_id(&self.users, |_| true))
    }
}

// ============================================================================
// Resources
// ============================================================================

#[derive(Debug)]
pub struct MemoryResourceStore {
    resources: DashMap<ResourceId, Resource>,
    ids: IdAllocator,
}

impl MemoryResourceStore {
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
            ids: IdAllocator::new(),
        }
    }

    pub fn with_resources(resources: impl IntoIterator<Item = Resource>) -> Self {
        let store = Self::new();
        for resource in resources {
            store.ids.observe(resource.id);
            store.resources.insert(resource.id, resource);
        }
        store
    }
}

impl Default for MemoryResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn get_resource(&self, id: ResourceId) -> Result<Option<Resource>, StorageError> {
        Ok(self.resources.get(&id).map(|r| r.value().clone()))
    }

    async fn update_resource_status(
        &self,
        id: ResourceId,
        status: EquipmentStatus,
    ) -> Result<Resource, StorageError> {
        let mut entry = self
            .resources
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("resource", id))?;
        let previous = entry.status;
        entry.status = status;
        debug!(resource_id = id, from = %previous, to = %status, "Resource status updated");
        Ok(entry.value().clone())
    }

    async fn create_resource(&self, resource: NewResource) -> Result<Resource, StorageError> {
        if resource.name.trim().is_empty() {
            return Err(StorageError::invalid("resource name must not be empty"));
        }
        let resource = resource.into_resource(self.ids.next());
        self.resources.insert(resource.id, resource.clone());
        Ok(resource)
    }

    async fn upsert_resource(&self, resource: Resource) -> Result<Resource, StorageError> {
        self.ids.observe(resource.id);
        self.resources.insert(resource.id, resource.clone());
        Ok(resource)
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, StorageError> {
        Ok(sorted_by_id(&self.resources, |_| true))
    }
}

// ============================================================================
// Work orders
// ============================================================================

#[derive(Debug)]
pub struct MemoryWorkOrderStore {
    orders: DashMap<WorkOrderId, WorkOrder>,
    ids: IdAllocator,
}

impl MemoryWorkOrderStore {
    pub fn new() -> Self {
        Self {
            orders: DashMap::new(),
            ids: IdAllocator::new(),
        }
    }
}

impl Default for MemoryWorkOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkOrderStore for MemoryWorkOrderStore {
    async fn insert(&self, order: NewWorkOrder) -> Result<WorkOrder, StorageError> {
        if order.title.trim().is_empty() {
            return Err(StorageError::invalid("work order title must not be empty"));
        }
        let order = order.into_work_order(self.ids.next(), OffsetDateTime::now_utc());
        self.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get(&self, id: WorkOrderId) -> Result<Option<WorkOrder>, StorageError> {
        Ok(self.orders.get(&id).map(|o| o.value().clone()))
    }

    async fn update(&self, order: WorkOrder) -> Result<WorkOrder, StorageError> {
        let mut entry = self
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| StorageError::not_found("work_order", order.id))?;
        *entry = order.clone();
        Ok(order)
    }

    async fn list(&self, filter: &WorkOrderFilter) -> Result<Vec<WorkOrder>, StorageError> {
        Ok(sorted_by_id(&self.orders, |o| filter.matches(o)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChannelKind, WorkOrderStatus};

    fn user(id: UserId, role: Role) -> User {
        User {
            id,
            name: format!("user-{id}"),
            role,
            email: Some(format!("user{id}@example.com")),
            phone: None,
            preferred_channel: Some(ChannelKind::Email),
        }
    }

    #[tokio::test]
    async fn test_users_with_role_sorted() {
        let directory = MemoryUserDirectory::with_users([
            user(4, Role::Admin),
            user(2, Role::Technician),
            user(1, Role::Admin),
        ]);

        let admins = directory.users_with_role(Role::Admin).await.unwrap();
        let ids: Vec<_> = admins.iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![1, 4]);
    }

    #[tokio::test]
    async fn test_create_user_skips_seeded_ids() {
        let directory = MemoryUserDirectory::with_users([user(5, Role::Admin)]);
        let created = directory
            .create_user(NewUser {
                name: "Dana".into(),
                role: Role::Technician,
                email: None,
                phone: Some("+15550001111".into()),
                preferred_channel: Some(ChannelKind::Sms),
            })
            .await
            .unwrap();
        assert_eq!(created.id, 6);
        assert_eq!(directory.len(), 2);
    }

    #[tokio::test]
    async fn test_update_missing_resource_is_not_found() {
        let store = MemoryResourceStore::new();
        let err = store
            .update_resource_status(7, EquipmentStatus::InMaintenance)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_resource_status_update() {
        let store = MemoryResourceStore::new();
        let resource = store
            .create_resource(NewResource {
                name: "Boiler".into(),
                location: Some("Basement".into()),
                status: EquipmentStatus::Degraded,
            })
            .await
            .unwrap();

        let updated = store
            .update_resource_status(resource.id, EquipmentStatus::InMaintenance)
            .await
            .unwrap();
        assert_eq!(updated.status, EquipmentStatus::InMaintenance);
        assert_eq!(
            store.get_resource(resource.id).await.unwrap().unwrap().status,
            EquipmentStatus::InMaintenance
        );
    }

    #[tokio::test]
    async fn test_work_order_insert_update_list() {
        let store = MemoryWorkOrderStore::new();
        let first = store.insert(NewWorkOrder::new("Fan", 1)).await.unwrap();
        let second = store
            .insert(NewWorkOrder::new("Door", 2).with_resource(7))
            .await
            .unwrap();
        assert_eq!((first.id, second.id), (1, 2));

        let mut changed = second.clone();
        changed.status = WorkOrderStatus::Assigned;
        changed.technician_id = Some(3);
        store.update(changed).await.unwrap();

        let assigned = store
            .list(&WorkOrderFilter {
                status: Some(WorkOrderStatus::Assigned),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].technician_id, Some(3));

        let all = store.list(&WorkOrderFilter::default()).await.unwrap();
        assert_eq!(all.iter().map(|o| o.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_update_unknown_work_order_fails() {
        let store = MemoryWorkOrderStore::new();
        let ghost = NewWorkOrder::new("Ghost", 1).into_work_order(99, OffsetDateTime::now_utc());
        assert!(store.update(ghost).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_empty_title_rejected() {
        let store = MemoryWorkOrderStore::new();
        let err = store.insert(NewWorkOrder::new("  ", 1)).await.unwrap_err();
        assert!(matches!(err, StorageError::Invalid { .. }));
    }
}
