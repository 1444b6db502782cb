//! Event types for the work-order event system.
//!
//! This module defines the values that flow through the broker:
//! - `EventType` - open string tag with constants for the known lifecycle transitions
//! - `Payload` - insertion-ordered field map carried by every event
//! - `Event` - the immutable record published to observers and kept in history

use std::borrow::Cow;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::CoreError;

// ============================================================================
// Event Type
// ============================================================================

/// Tag identifying what kind of transition an event describes.
///
/// The set below is the one the lifecycle service emits, but the broker
/// accepts any non-empty tag: publishing an unrecognised type is a no-op
/// fan-out, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(Cow<'static, str>);

impl EventType {
    /// A work order was submitted.
    pub const WORK_ORDER_CREATED: EventType = EventType::from_static("work_order.created");
    /// A technician was assigned (or reassigned) to a work order.
    pub const WORK_ORDER_ASSIGNED: EventType = EventType::from_static("work_order.assigned");
    /// The assigned technician started working.
    pub const WORK_ORDER_STARTED: EventType = EventType::from_static("work_order.started");
    /// The work order was completed.
    pub const WORK_ORDER_COMPLETED: EventType = EventType::from_static("work_order.completed");
    /// Generic status transition, emitted alongside every specific one.
    pub const WORK_ORDER_STATUS_CHANGED: EventType =
        EventType::from_static("work_order.status_changed");
    /// An equipment condition report was filed.
    pub const EQUIPMENT_CONDITION_CHANGED: EventType =
        EventType::from_static("equipment.condition_changed");
    /// A user was added to the directory.
    pub const USER_REGISTERED: EventType = EventType::from_static("user.registered");

    /// Every event type the lifecycle and directory services emit.
    pub const KNOWN: [EventType; 7] = [
        Self::WORK_ORDER_CREATED,
        Self::WORK_ORDER_ASSIGNED,
        Self::WORK_ORDER_STARTED,
        Self::WORK_ORDER_COMPLETED,
        Self::WORK_ORDER_STATUS_CHANGED,
        Self::EQUIPMENT_CONDITION_CHANGED,
        Self::USER_REGISTERED,
    ];

    /// Create an event type from a static string.
    pub const fn from_static(tag: &'static str) -> Self {
        Self(Cow::Borrowed(tag))
    }

    /// Create an event type from any string without validation.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(Cow::Owned(tag.into()))
    }

    /// Parse a user-supplied tag, rejecting empty or whitespace-padded input.
    pub fn parse(tag: &str) -> Result<Self, CoreError> {
        if tag.is_empty() || tag.trim() != tag {
            return Err(CoreError::invalid_event_type(tag));
        }
        Ok(Self::new(tag))
    }

    /// Returns the string representation of the event type.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this tag is one of [`EventType::KNOWN`].
    pub fn is_known(&self) -> bool {
        Self::KNOWN.iter().any(|known| known == self)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&'static str> for EventType {
    fn from(tag: &'static str) -> Self {
        Self::from_static(tag)
    }
}

impl From<String> for EventType {
    fn from(tag: String) -> Self {
        Self::new(tag)
    }
}

impl From<&EventType> for EventType {
    fn from(tag: &EventType) -> Self {
        tag.clone()
    }
}

// ============================================================================
// Payload
// ============================================================================

/// Ordered mapping of field name to value carried by an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(IndexMap<String, Value>);

impl Payload {
    /// Create an empty payload.
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Builder-style insert that skips `None`.
    pub fn with_opt<V: Into<Value>>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(v) => self.with(key, v),
            None => self,
        }
    }

    /// Insert a field, keeping the original position if it already existed.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Build a payload from a JSON object.
    pub fn from_json(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Object(map) => Ok(map.into_iter().collect()),
            Value::Null => Ok(Self::new()),
            other => Err(CoreError::invalid_payload(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    /// Read an identifier that may have been encoded as a number or a numeric string.
    pub fn get_id(&self, key: &str) -> Option<u64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Compact one-line `key=value` rendering, truncated to `max_len` characters.
    pub fn summary(&self, max_len: usize) -> String {
        let mut out = String::new();
        for (key, value) in &self.0 {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(key);
            out.push('=');
            match value {
                Value::String(s) => out.push_str(s),
                other => out.push_str(&other.to_string()),
            }
        }
        if out.chars().count() > max_len {
            let mut truncated: String = out.chars().take(max_len.saturating_sub(3)).collect();
            truncated.push_str("...");
            return truncated;
        }
        out
    }

    /// Convert into a JSON object value.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl FromIterator<(String, Value)> for Payload {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Event
// ============================================================================

/// Immutable record of something that happened in the work-order lifecycle.
///
/// Events are shared as `Arc<Event>` between the broker history and every
/// observer, so nothing can change them after publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique event id
    pub id: Uuid,
    /// What happened
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Transition details
    pub payload: Payload,
    /// Free-text origin label (e.g. "work_order_service")
    pub source: String,
    /// When the event was published
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
}

impl Event {
    /// Create a new event with a fresh id and the current timestamp.
    pub fn new(event_type: EventType, payload: Payload, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            payload,
            source: source.into(),
            occurred_at: OffsetDateTime::now_utc(),
        }
    }

    /// Check if this event matches a filter by event type.
    pub fn matches_type(&self, filter: Option<&EventType>) -> bool {
        match filter {
            Some(t) => &self.event_type == t,
            None => true,
        }
    }

    /// Check if this event matches a filter by source label.
    pub fn matches_source(&self, filter: Option<&str>) -> bool {
        match filter {
            Some(s) => self.source == s,
            None => true,
        }
    }
}
