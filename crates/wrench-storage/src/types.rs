//! Records kept by the collaborator stores.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub type UserId = u64;
pub type ResourceId = u64;
pub type WorkOrderId = u64;

/// Error returned when parsing one of the string enums below.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal { $($variant:ident => $tag:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $tag)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $tag),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($tag => Ok($name::$variant),)+
                    other => Err(ParseEnumError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

// ============================================================================
// Users
// ============================================================================

string_enum! {
    /// Role of a user within the maintenance organisation.
    Role, "role" {
        Admin => "admin",
        Technician => "technician",
        Requester => "requester",
    }
}

string_enum! {
    /// Delivery medium a user can be reached through.
    ChannelKind, "channel" {
        Email => "email",
        Sms => "sms",
        InApp => "in_app",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_channel: Option<ChannelKind>,
}

/// User registration request; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub preferred_channel: Option<ChannelKind>,
}

impl NewUser {
    pub fn into_user(self, id: UserId) -> User {
        User {
            id,
            name: self.name,
            role: self.role,
            email: self.email,
            phone: self.phone,
            preferred_channel: self.preferred_channel,
        }
    }
}

// ============================================================================
// Equipment
// ============================================================================

string_enum! {
    /// Operational condition of a piece of equipment.
    EquipmentStatus, "equipment status" {
        Operational => "operational",
        InMaintenance => "in_maintenance",
        Degraded => "degraded",
        OutOfService => "out_of_service",
        Retired => "retired",
    }
}

impl Default for EquipmentStatus {
    fn default() -> Self {
        Self::Operational
    }
}

/// Equipment resource that work orders can target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub status: EquipmentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewResource {
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub status: EquipmentStatus,
}

impl NewResource {
    pub fn into_resource(self, id: ResourceId) -> Resource {
        Resource {
            id,
            name: self.name,
            location: self.location,
            status: self.status,
        }
    }
}

// ============================================================================
// Work orders
// ============================================================================

string_enum! {
    Priority, "priority" {
        Low => "low",
        Normal => "normal",
        High => "high",
        Urgent => "urgent",
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

string_enum! {
    /// Lifecycle state of a work order.
    WorkOrderStatus, "work order status" {
        Open => "open",
        Assigned => "assigned",
        InProgress => "in_progress",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

impl WorkOrderStatus {
    /// Completed and cancelled orders accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkOrder {
    pub id: WorkOrderId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub category: String,
    pub priority: Priority,
    pub status: WorkOrderStatus,
    pub submitter_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technician_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<ResourceId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

/// Work order submission; status starts at `open`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWorkOrder {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub priority: Priority,
    pub submitter_id: UserId,
    #[serde(default)]
    pub resource_id: Option<ResourceId>,
}

fn default_category() -> String {
    "general".to_string()
}

impl NewWorkOrder {
    pub fn new(title: impl Into<String>, submitter_id: UserId) -> Self {
        Self {
            title: title.into(),
            description: None,
            category: default_category(),
            priority: Priority::default(),
            submitter_id,
            resource_id: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_resource(mut self, resource_id: ResourceId) -> Self {
        self.resource_id = Some(resource_id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn into_work_order(self, id: WorkOrderId, now: OffsetDateTime) -> WorkOrder {
        WorkOrder {
            id,
            title: self.title,
            description: self.description,
            category: self.category,
            priority: self.priority,
            status: WorkOrderStatus::Open,
            submitter_id: self.submitter_id,
            technician_id: None,
            resource_id: self.resource_id,
            created_at: now,
            updated_at: now,
            completed_at: None,
            resolution: None,
        }
    }
}

/// Listing filter; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkOrderFilter {
    #[serde(default)]
    pub status: Option<WorkOrderStatus>,
    #[serde(default)]
    pub technician_id: Option<UserId>,
    #[serde(default)]
    pub submitter_id: Option<UserId>,
    #[serde(default)]
    pub resource_id: Option<ResourceId>,
}

impl WorkOrderFilter {
    pub fn matches(&self, order: &WorkOrder) -> bool {
        self.status.is_none_or(|s| order.status == s)
            && self
                .technician_id
                .is_none_or(|t| order.technician_id == Some(t))
            && self.submitter_id.is_none_or(|s| order.submitter_id == s)
            && self
                .resource_id
                .is_none_or(|r| order.resource_id == Some(r))
    }
}
