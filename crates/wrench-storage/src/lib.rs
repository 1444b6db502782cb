//! # wrench-storage
//!
//! Collaborator contracts for the Wrench work-order service.
//!
//! The lifecycle service and the observers reach users, equipment and work
//! orders only through the traits in this crate:
//! - [`UserDirectory`] resolves notification recipients
//! - [`ResourceStore`] holds equipment state mutated by the projector
//! - [`WorkOrderStore`] persists work orders
//!
//! `memory` provides `DashMap`-backed implementations used by the server and
//! by tests.
//!
//! ## Example
//!
//! ```ignore
//! use wrench_storage::{MemoryWorkOrderStore, NewWorkOrder, WorkOrderStore};
//!
//! let store = MemoryWorkOrderStore::new();
//! let order = store.insert(NewWorkOrder::new("Replace filter", 1)).await?;
//! assert_eq!(order.status, WorkOrderStatus::Open);
//! ```

mod error;
pub mod memory;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use memory::{MemoryResourceStore, MemoryUserDirectory, MemoryWorkOrderStore};
pub use traits::{ResourceStore, UserDirectory, WorkOrderStore};
pub use types::{
    ChannelKind, EquipmentStatus, NewResource, NewUser, NewWorkOrder, ParseEnumError, Priority,
    Resource, ResourceId, Role, User, UserId, WorkOrder, WorkOrderFilter, WorkOrderId,
    WorkOrderStatus,
};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

pub type DynUserDirectory = std::sync::Arc<dyn UserDirectory>;
pub type DynResourceStore = std::sync::Arc<dyn ResourceStore>;
pub type DynWorkOrderStore = std::sync::Arc<dyn WorkOrderStore>;
