//! Bounded event history kept by the broker.

use std::collections::VecDeque;
use std::sync::Arc;

use time::OffsetDateTime;

use super::types::{Event, EventType};

/// Default number of events retained by the broker.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Filter for [`EventBroker::history`](super::EventBroker::history).
///
/// Every filter is optional; an empty query returns the whole history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryQuery {
    pub event_type: Option<EventType>,
    /// Only events with `occurred_at >= since`.
    pub since: Option<OffsetDateTime>,
    pub source: Option<String>,
    /// Keep at most this many of the most recent matches.
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(mut self, event_type: impl Into<EventType>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn since(mut self, since: OffsetDateTime) -> Self {
        self.since = Some(since);
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check whether an event passes the type, since and source filters.
    pub fn matches(&self, event: &Event) -> bool {
        event.matches_type(self.event_type.as_ref())
            && event.matches_source(self.source.as_deref())
            && self.since.is_none_or(|since| event.occurred_at >= since)
    }
}

/// Ring buffer of the most recent events, oldest first.
#[derive(Debug)]
pub(crate) struct History {
    capacity: usize,
    entries: VecDeque<Arc<Event>>,
}

impl History {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Append an event, evicting the oldest entry once at capacity.
    pub(crate) fn push(&mut self, event: Arc<Event>) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(event);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Matching events in publish order, trimmed to the most recent `limit`.
    pub(crate) fn query(&self, query: &HistoryQuery) -> Vec<Arc<Event>> {
        let limit = query.limit.unwrap_or(usize::MAX);
        let mut matched: Vec<Arc<Event>> = self
            .entries
            .iter()
            .rev()
            .filter(|event| query.matches(event))
            .take(limit)
            .cloned()
            .collect();
        matched.reverse();
        matched
    }
}
