//! Event broker: subscription registry, fan-out and bounded history.
//!
//! The broker maps each event type to an ordered list of subscriptions and
//! keeps the most recent events for inspection. Catch-all subscriptions see
//! every type. Registry and history share
//! one `RwLock`; ordering between events of the same type is enforced by a
//! per-type dispatch lane held from history append until fan-out finishes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info, warn};

use super::history::{DEFAULT_HISTORY_CAPACITY, History, HistoryQuery};
use super::observer::{Observer, Reaction, invoke};
use super::types::{Event, EventType, Payload};

// ============================================================================
// Configuration
// ============================================================================

/// Broker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Maximum number of events kept in history. Zero disables history.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
        }
    }
}

// ============================================================================
// Subscriptions
// ============================================================================

/// How events reach a subscribed observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    /// `publish()` awaits the observer before returning.
    #[default]
    Inline,
    /// The observer gets a dedicated worker task fed in publish order;
    /// `publish()` returns once the event is enqueued.
    Queued,
}

/// Handle identifying a single registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

enum Route {
    Inline,
    Queued(mpsc::UnboundedSender<Arc<Event>>),
}

struct Subscription {
    id: SubscriptionId,
    observer: Weak<dyn Observer>,
    name: Arc<str>,
    route: Route,
}

impl Subscription {
    fn is_alive(&self) -> bool {
        if self.observer.strong_count() == 0 {
            return false;
        }
        match &self.route {
            Route::Inline => true,
            Route::Queued(tx) => !tx.is_closed(),
        }
    }

    fn is_observer(&self, ptr: *const ()) -> bool {
        self.observer.as_ptr().cast::<()>() == ptr
    }
}

/// Resolved dispatch target, taken out of the registry before fan-out.
enum Target {
    Inline {
        observer: Arc<dyn Observer>,
        name: Arc<str>,
    },
    Queued {
        sender: mpsc::UnboundedSender<Arc<Event>>,
        name: Arc<str>,
    },
}

// ============================================================================
// Statistics
// ============================================================================

/// Counter of published events, labelled by `type`.
pub const EVENTS_PUBLISHED_TOTAL: &str = "wrench_events_published_total";
/// Counter of observer reactions that failed or panicked.
pub const OBSERVER_FAILURES_TOTAL: &str = "wrench_observer_failures_total";

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    failures: AtomicU64,
}

impl Counters {
    fn record(&self, reaction: Reaction) {
        match reaction {
            Reaction::Ok => self.delivered.fetch_add(1, Ordering::Relaxed),
            Reaction::Failed | Reaction::Panicked => {
                metrics::counter!(OBSERVER_FAILURES_TOTAL).increment(1);
                self.failures.fetch_add(1, Ordering::Relaxed)
            }
        };
    }
}

/// Point-in-time broker statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerStats {
    /// Events accepted by `publish()` since construction.
    pub published: u64,
    /// Successful observer reactions.
    pub delivered: u64,
    /// Observer reactions that returned an error or panicked.
    pub observer_failures: u64,
    pub history_len: usize,
    pub history_capacity: usize,
    /// Live registrations across all event types.
    pub subscriptions: usize,
}

// ============================================================================
// Broker
// ============================================================================

struct BrokerState {
    subscriptions: HashMap<EventType, Vec<Subscription>>,
    catch_all: Vec<Subscription>,
    lanes: HashMap<EventType, Arc<Mutex<()>>>,
    history: History,
}

/// In-process publish/subscribe broker with bounded history.
///
/// The broker is an explicit value owned by the composition root and shared
/// as `Arc<EventBroker>`; there is no global instance.
///
/// # Example
///
/// ```
/// use wrench_core::events::{EventBroker, EventType, HistoryQuery, Payload};
///
/// # tokio_test::block_on(async {
/// let broker = EventBroker::with_capacity(100);
/// let event = broker
///     .publish(
///         EventType::WORK_ORDER_CREATED,
///         Payload::new().with("workOrderId", 1),
///         "docs",
///     )
///     .await;
///
/// let history = broker.history(&HistoryQuery::new()).await;
/// assert_eq!(history.len(), 1);
/// assert_eq!(history[0].id, event.id);
/// # });
/// ```
pub struct EventBroker {
    state: RwLock<BrokerState>,
    next_id: AtomicU64,
    counters: Arc<Counters>,
}

impl EventBroker {
    /// Create a broker with the default history capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Create a broker retaining at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: RwLock::new(BrokerState {
                subscriptions: HashMap::new(),
                catch_all: Vec::new(),
                lanes: HashMap::new(),
                history: History::new(capacity),
            }),
            next_id: AtomicU64::new(1),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Create a broker from configuration.
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self::with_capacity(config.history_capacity)
    }

    /// Create a new broker wrapped in an Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    // ------------------------------------------------------------------------
    // Publish
    // ------------------------------------------------------------------------

    /// Publish an event to every observer subscribed to `event_type`.
    ///
    /// The event is appended to history first, then delivered in
    /// registration order. Observer failures are logged and counted; they
    /// never reach the caller.
    pub async fn publish(
        &self,
        event_type: impl Into<EventType>,
        payload: Payload,
        source: impl Into<String>,
    ) -> Arc<Event> {
        let event_type = event_type.into();
        let source = source.into();
        self.dispatch(event_type.clone(), move || {
            Event::new(event_type, payload, source)
        })
        .await
    }

    /// Publish a caller-built event.
    pub async fn publish_event(&self, event: Event) -> Arc<Event> {
        let event_type = event.event_type.clone();
        self.dispatch(event_type, move || event).await
    }

    async fn dispatch(&self, event_type: EventType, build: impl FnOnce() -> Event) -> Arc<Event> {
        let lane = self.lane(&event_type).await;
        let _ordered = lane.lock().await;
        let event = Arc::new(build());

        let targets = {
            let mut state = self.state.write().await;
            state.history.push(event.clone());
            state.targets(&event.event_type)
        };
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(EVENTS_PUBLISHED_TOTAL, "type" => event.event_type.to_string())
            .increment(1);

        if targets.is_empty() {
            debug!(event_id = %event.id, event_type = %event.event_type, "No observers for event");
            return event;
        }

        for target in targets {
            match target {
                Target::Inline { observer, name } => {
                    let reaction = invoke(observer.as_ref(), &name, &event).await;
                    self.counters.record(reaction);
                }
                Target::Queued { sender, name } => {
                    if sender.send(event.clone()).is_err() {
                        warn!(
                            observer = %name,
                            event_id = %event.id,
                            "Observer worker stopped, event dropped"
                        );
                        self.counters.record(Reaction::Failed);
                    }
                }
            }
        }

        event
    }

    async fn lane(&self, event_type: &EventType) -> Arc<Mutex<()>> {
        if let Some(lane) = self.state.read().await.lanes.get(event_type) {
            return lane.clone();
        }
        self.state
            .write()
            .await
            .lanes
            .entry(event_type.clone())
            .or_default()
            .clone()
    }

    // ------------------------------------------------------------------------
    // Subscribe / unsubscribe
    // ------------------------------------------------------------------------

    /// Register an observer for one event type with inline delivery.
    ///
    /// Subscribing the same observer twice to the same type yields two
    /// deliveries per event.
    pub async fn subscribe<O>(
        &self,
        event_type: impl Into<EventType>,
        observer: &Arc<O>,
    ) -> SubscriptionId
    where
        O: Observer + 'static,
    {
        self.subscribe_with(event_type, observer, Delivery::Inline)
            .await
    }

    /// Register an observer for one event type with the given delivery mode.
    pub async fn subscribe_with<O>(
        &self,
        event_type: impl Into<EventType>,
        observer: &Arc<O>,
        delivery: Delivery,
    ) -> SubscriptionId
    where
        O: Observer + 'static,
    {
        let observer: Arc<dyn Observer> = observer.clone();
        self.subscribe_dyn(event_type, &observer, delivery).await
    }

    /// Register an observer trait object.
    pub async fn subscribe_dyn(
        &self,
        event_type: impl Into<EventType>,
        observer: &Arc<dyn Observer>,
        delivery: Delivery,
    ) -> SubscriptionId {
        self.register(Some(event_type.into()), observer, delivery)
            .await
    }

    /// Register an observer for every event type, including types that are
    /// not known to this crate.
    ///
    /// Catch-all and typed registrations are delivered together in
    /// registration order.
    pub async fn subscribe_any<O>(&self, observer: &Arc<O>, delivery: Delivery) -> SubscriptionId
    where
        O: Observer + 'static,
    {
        let observer: Arc<dyn Observer> = observer.clone();
        self.register(None, &observer, delivery).await
    }

    async fn register(
        &self,
        event_type: Option<EventType>,
        observer: &Arc<dyn Observer>,
        delivery: Delivery,
    ) -> SubscriptionId {
        let name: Arc<str> = Arc::from(observer.name());
        let weak = Arc::downgrade(observer);

        let route = match delivery {
            Delivery::Inline => Route::Inline,
            Delivery::Queued => Route::Queued(spawn_worker(
                weak.clone(),
                name.clone(),
                self.counters.clone(),
            )),
        };

        let mut state = self.state.write().await;
        // Allocated under the write lock so ids follow registration order.
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscription = Subscription {
            id,
            observer: weak,
            name: name.clone(),
            route,
        };
        match &event_type {
            Some(event_type) => state
                .subscriptions
                .entry(event_type.clone())
                .or_default()
                .push(subscription),
            None => state.catch_all.push(subscription),
        }
        drop(state);

        debug!(
            observer = %name,
            event_type = event_type.as_ref().map_or("*", EventType::as_str),
            subscription = %id,
            delivery = ?delivery,
            "Registered observer"
        );
        id
    }

    /// Register one observer for several event types.
    pub async fn subscribe_all<O, I, T>(
        &self,
        event_types: I,
        observer: &Arc<O>,
        delivery: Delivery,
    ) -> Vec<SubscriptionId>
    where
        O: Observer + 'static,
        I: IntoIterator<Item = T>,
        T: Into<EventType>,
    {
        let mut ids = Vec::new();
        for event_type in event_types {
            ids.push(self.subscribe_with(event_type, observer, delivery).await);
        }
        ids
    }

    /// Remove every registration of `observer` for `event_type`.
    ///
    /// Returns the number of registrations removed; zero means it was not
    /// subscribed.
    pub async fn unsubscribe<O>(&self, event_type: impl Into<EventType>, observer: &Arc<O>) -> usize
    where
        O: Observer + 'static,
    {
        let ptr = Arc::as_ptr(observer).cast::<()>();
        self.remove_matching(&event_type.into(), |sub| sub.is_observer(ptr))
            .await
    }

    /// Remove every catch-all registration of `observer`.
    pub async fn unsubscribe_any<O>(&self, observer: &Arc<O>) -> usize
    where
        O: Observer + 'static,
    {
        let ptr = Arc::as_ptr(observer).cast::<()>();
        let mut state = self.state.write().await;
        let before = state.catch_all.len();
        state.catch_all.retain(|sub| !sub.is_observer(ptr));
        let removed = before - state.catch_all.len();
        if removed > 0 {
            debug!(removed, "Unsubscribed catch-all observer");
        }
        removed
    }

    /// Remove every registration of a trait-object observer for `event_type`.
    pub async fn unsubscribe_dyn(
        &self,
        event_type: impl Into<EventType>,
        observer: &Arc<dyn Observer>,
    ) -> usize {
        let ptr = Arc::as_ptr(observer).cast::<()>();
        self.remove_matching(&event_type.into(), |sub| sub.is_observer(ptr))
            .await
    }

    /// Remove a single registration by id.
    pub async fn unsubscribe_id(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.write().await;
        if let Some(pos) = state.catch_all.iter().position(|sub| sub.id == id) {
            state.catch_all.remove(pos);
            return true;
        }
        let mut removed = false;
        for subs in state.subscriptions.values_mut() {
            if let Some(pos) = subs.iter().position(|sub| sub.id == id) {
                subs.remove(pos);
                removed = true;
                break;
            }
        }
        state.subscriptions.retain(|_, subs| !subs.is_empty());
        removed
    }

    async fn remove_matching(
        &self,
        event_type: &EventType,
        predicate: impl Fn(&Subscription) -> bool,
    ) -> usize {
        let mut state = self.state.write().await;
        let Some(subs) = state.subscriptions.get_mut(event_type) else {
            return 0;
        };
        let before = subs.len();
        subs.retain(|sub| !predicate(sub));
        let removed = before - subs.len();
        if subs.is_empty() {
            state.subscriptions.remove(event_type);
        }
        if removed > 0 {
            debug!(event_type = %event_type, removed, "Unsubscribed observer");
        }
        removed
    }

    // ------------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------------

    /// Query retained events, oldest first.
    pub async fn history(&self, query: &HistoryQuery) -> Vec<Arc<Event>> {
        self.state.read().await.history.query(query)
    }

    /// Drop all retained events. Subscriptions are unaffected.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        let dropped = state.history.len();
        state.history.clear();
        info!(dropped, "Event history cleared");
    }

    pub async fn history_len(&self) -> usize {
        self.state.read().await.history.len()
    }

    pub async fn capacity(&self) -> usize {
        self.state.read().await.history.capacity()
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    /// Number of live registrations that receive an event type, catch-all
    /// registrations included.
    pub async fn subscriber_count(&self, event_type: impl Into<EventType>) -> usize {
        let event_type = event_type.into();
        let state = self.state.read().await;
        let typed = state
            .subscriptions
            .get(&event_type)
            .map(|subs| subs.iter().filter(|sub| sub.is_alive()).count())
            .unwrap_or(0);
        typed + state.catch_all_count()
    }

    /// Number of live catch-all registrations.
    pub async fn catch_all_count(&self) -> usize {
        self.state.read().await.catch_all_count()
    }

    /// Event types with at least one live typed registration, sorted.
    pub async fn subscribed_types(&self) -> Vec<EventType> {
        let state = self.state.read().await;
        let mut types: Vec<EventType> = state
            .subscriptions
            .iter()
            .filter(|(_, subs)| subs.iter().any(Subscription::is_alive))
            .map(|(event_type, _)| event_type.clone())
            .collect();
        types.sort();
        types
    }

    pub async fn stats(&self) -> BrokerStats {
        let state = self.state.read().await;
        BrokerStats {
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            observer_failures: self.counters.failures.load(Ordering::Relaxed),
            history_len: state.history.len(),
            history_capacity: state.history.capacity(),
            subscriptions: state
                .subscriptions
                .values()
                .flatten()
                .filter(|sub| sub.is_alive())
                .count()
                + state.catch_all_count(),
        }
    }
}

impl BrokerState {
    fn catch_all_count(&self) -> usize {
        self.catch_all.iter().filter(|sub| sub.is_alive()).count()
    }

    /// Snapshot live targets for an event type in registration order,
    /// pruning dropped observers.
    fn targets(&mut self, event_type: &EventType) -> Vec<Target> {
        prune(&mut self.catch_all);
        if let Some(subs) = self.subscriptions.get_mut(event_type) {
            prune(subs);
            if subs.is_empty() {
                self.subscriptions.remove(event_type);
            }
        }

        let mut subs: Vec<&Subscription> = self
            .subscriptions
            .get(event_type)
            .into_iter()
            .flatten()
            .chain(self.catch_all.iter())
            .collect();
        subs.sort_by_key(|sub| sub.id);

        subs.into_iter()
            .filter_map(|sub| match &sub.route {
                Route::Inline => sub.observer.upgrade().map(|observer| Target::Inline {
                    observer,
                    name: sub.name.clone(),
                }),
                Route::Queued(sender) => Some(Target::Queued {
                    sender: sender.clone(),
                    name: sub.name.clone(),
                }),
            })
            .collect()
    }
}

fn prune(subs: &mut Vec<Subscription>) {
    subs.retain(|sub| {
        let alive = sub.is_alive();
        if !alive {
            debug!(observer = %sub.name, subscription = %sub.id, "Pruned dropped observer");
        }
        alive
    });
}

/// Spawn the worker task behind a queued subscription.
///
/// The worker stops when the subscription is removed (sender dropped) or
/// the observer itself has been dropped.
fn spawn_worker(
    observer: Weak<dyn Observer>,
    name: Arc<str>,
    counters: Arc<Counters>,
) -> mpsc::UnboundedSender<Arc<Event>> {
    let (sender, mut receiver) = mpsc::unbounded_channel::<Arc<Event>>();

    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            let Some(observer) = observer.upgrade() else {
                debug!(observer = %name, "Observer dropped, stopping worker");
                break;
            };
            let reaction = invoke(observer.as_ref(), &name, &event).await;
            counters.record(reaction);
        }
    });

    sender
}

impl Default for EventBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroker")
            .field("published", &self.counters.published.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
