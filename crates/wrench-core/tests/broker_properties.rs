use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use wrench_core::events::{
    Delivery, Event, EventBroker, EventType, HistoryQuery, Observer, ObserverError, Payload,
};

/// Observer that remembers every event it saw.
struct Recorder {
    name: String,
    seen: Mutex<Vec<Arc<Event>>>,
}

impl Recorder {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<Arc<Event>> {
        self.seen.lock().unwrap().clone()
    }

    fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn numbers(&self) -> Vec<i64> {
        self.seen()
            .iter()
            .filter_map(|e| e.payload.get_i64("n"))
            .collect()
    }
}

#[async_trait]
impl Observer for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn react(&self, event: &Event) -> Result<(), ObserverError> {
        self.seen.lock().unwrap().push(Arc::new(event.clone()));
        Ok(())
    }
}

struct Failing;

#[async_trait]
impl Observer for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    async fn react(&self, _event: &Event) -> Result<(), ObserverError> {
        Err(ObserverError::execution("always fails"))
    }
}

struct Panicking;

#[async_trait]
impl Observer for Panicking {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn react(&self, _event: &Event) -> Result<(), ObserverError> {
        panic!("observer blew up");
    }
}

/// Observer that sleeps before recording, to expose reordering.
struct Slow {
    inner: Arc<Recorder>,
}

#[async_trait]
impl Observer for Slow {
    fn name(&self) -> &str {
        "slow"
    }

    async fn react(&self, event: &Event) -> Result<(), ObserverError> {
        let n = event.payload.get_i64("n").unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(((5 - n.min(5)) * 3) as u64)).await;
        self.inner.react(event).await
    }
}

fn numbered(n: i64) -> Payload {
    Payload::new().with("n", n)
}

async fn wait_for(recorder: &Recorder, expected: usize) {
    for _ in 0..200 {
        if recorder.count() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "observer {} saw {} events, expected {}",
        recorder.name,
        recorder.count(),
        expected
    );
}

#[tokio::test]
async fn fan_out_reaches_every_observer_once_with_same_event() {
    let broker = EventBroker::new();
    let observers: Vec<Arc<Recorder>> = (0..4).map(|i| Recorder::new(&format!("o{i}"))).collect();
    for observer in &observers {
        broker
            .subscribe(EventType::WORK_ORDER_CREATED, observer)
            .await;
    }

    let payload = Payload::new().with("workOrderId", 42).with("title", "Pump noise");
    let event = broker
        .publish(EventType::WORK_ORDER_CREATED, payload.clone(), "test")
        .await;

    for observer in &observers {
        let seen = observer.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].id, event.id);
        assert_eq!(seen[0].payload, payload);
    }
}

#[tokio::test]
async fn failing_and_panicking_observers_do_not_stop_the_rest() {
    let broker = EventBroker::new();
    let before = Recorder::new("before");
    let after = Recorder::new("after");

    let failing = Arc::new(Failing);
    let panicking = Arc::new(Panicking);
    broker.subscribe(EventType::WORK_ORDER_STARTED, &before).await;
    broker.subscribe(EventType::WORK_ORDER_STARTED, &failing).await;
    broker.subscribe(EventType::WORK_ORDER_STARTED, &panicking).await;
    broker.subscribe(EventType::WORK_ORDER_STARTED, &after).await;

    let event = broker
        .publish(EventType::WORK_ORDER_STARTED, numbered(1), "test")
        .await;

    assert_eq!(before.count(), 1);
    assert_eq!(after.count(), 1);
    assert_eq!(after.seen()[0].id, event.id);

    let stats = broker.stats().await;
    assert_eq!(stats.observer_failures, 2);
    assert_eq!(stats.delivered, 2);
}

#[tokio::test]
async fn history_keeps_exactly_the_most_recent_n() {
    let broker = EventBroker::with_capacity(10);
    for n in 0..25 {
        broker
            .publish(EventType::WORK_ORDER_CREATED, numbered(n), "test")
            .await;
    }

    let history = broker.history(&HistoryQuery::new()).await;
    let numbers: Vec<i64> = history
        .iter()
        .filter_map(|e| e.payload.get_i64("n"))
        .collect();
    assert_eq!(numbers, (15..25).collect::<Vec<_>>());
    assert_eq!(broker.stats().await.published, 25);
}

#[tokio::test]
async fn history_filters_by_type_since_source_and_limit() {
    let broker = EventBroker::new();
    broker
        .publish(EventType::WORK_ORDER_CREATED, numbered(1), "api")
        .await;
    broker
        .publish(EventType::WORK_ORDER_ASSIGNED, numbered(2), "api")
        .await;

    tokio::time::sleep(Duration::from_millis(5)).await;
    let cutoff = time::OffsetDateTime::now_utc();

    broker
        .publish(EventType::WORK_ORDER_CREATED, numbered(3), "import")
        .await;
    broker
        .publish(EventType::WORK_ORDER_CREATED, numbered(4), "api")
        .await;

    let by_type = broker
        .history(&HistoryQuery::new().event_type(EventType::WORK_ORDER_CREATED))
        .await;
    assert!(
        by_type
            .iter()
            .all(|e| e.event_type == EventType::WORK_ORDER_CREATED)
    );
    assert_eq!(by_type.len(), 3);

    let since = broker.history(&HistoryQuery::new().since(cutoff)).await;
    assert!(since.iter().all(|e| e.occurred_at >= cutoff));
    assert_eq!(since.len(), 2);

    let from_import = broker.history(&HistoryQuery::new().source("import")).await;
    assert_eq!(from_import.len(), 1);
    assert_eq!(from_import[0].payload.get_i64("n"), Some(3));

    let limited = broker.history(&HistoryQuery::new().limit(3)).await;
    assert_eq!(limited.len(), 3);
    assert_eq!(limited[0].payload.get_i64("n"), Some(2));
}

#[tokio::test]
async fn unsubscribed_observer_gets_nothing_afterwards() {
    let broker = EventBroker::new();
    let observer = Recorder::new("leaver");
    broker
        .subscribe(EventType::WORK_ORDER_COMPLETED, &observer)
        .await;

    broker
        .publish(EventType::WORK_ORDER_COMPLETED, numbered(1), "test")
        .await;
    broker
        .publish(EventType::WORK_ORDER_COMPLETED, numbered(2), "test")
        .await;

    assert_eq!(
        broker
            .unsubscribe(EventType::WORK_ORDER_COMPLETED, &observer)
            .await,
        1
    );

    broker
        .publish(EventType::WORK_ORDER_COMPLETED, numbered(3), "test")
        .await;

    assert_eq!(observer.numbers(), vec![1, 2]);
}

#[tokio::test]
async fn duplicate_subscription_delivers_twice() {
    let broker = EventBroker::new();
    let observer = Recorder::new("twice");
    broker.subscribe(EventType::WORK_ORDER_CREATED, &observer).await;
    broker.subscribe(EventType::WORK_ORDER_CREATED, &observer).await;

    let event = broker
        .publish(EventType::WORK_ORDER_CREATED, numbered(1), "test")
        .await;

    let seen = observer.seen();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|e| e.id == event.id));

    // Unsubscribe removes both registrations.
    assert_eq!(
        broker
            .unsubscribe(EventType::WORK_ORDER_CREATED, &observer)
            .await,
        2
    );
}

#[tokio::test]
async fn observer_sees_events_in_publish_order() {
    let broker = EventBroker::new();
    let observer = Recorder::new("ordered");
    broker.subscribe(EventType::WORK_ORDER_CREATED, &observer).await;

    for n in 0..20 {
        broker
            .publish(EventType::WORK_ORDER_CREATED, numbered(n), "test")
            .await;
    }

    assert_eq!(observer.numbers(), (0..20).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_publishers_are_fully_recorded_and_delivered() {
    const PRODUCERS: usize = 6;
    const EVENTS_EACH: usize = 50;

    let broker = Arc::new(EventBroker::with_capacity(PRODUCERS * EVENTS_EACH));
    let types: Vec<EventType> = (0..PRODUCERS)
        .map(|p| EventType::new(format!("load.type_{p}")))
        .collect();

    // One observer per type plus one that listens to the first half.
    let per_type: Vec<Arc<Recorder>> = (0..PRODUCERS)
        .map(|p| Recorder::new(&format!("type_{p}")))
        .collect();
    let half = Recorder::new("half");
    for (event_type, observer) in types.iter().zip(&per_type) {
        broker.subscribe(event_type, observer).await;
    }
    for event_type in types.iter().take(PRODUCERS / 2) {
        broker.subscribe(event_type, &half).await;
    }

    let mut handles = Vec::new();
    for event_type in types.clone() {
        let broker = broker.clone();
        handles.push(tokio::spawn(async move {
            for n in 0..EVENTS_EACH {
                broker
                    .publish(&event_type, numbered(n as i64), "load")
                    .await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(
        broker.history(&HistoryQuery::new()).await.len(),
        PRODUCERS * EVENTS_EACH
    );
    for observer in &per_type {
        assert_eq!(observer.count(), EVENTS_EACH);
        assert_eq!(
            observer.numbers(),
            (0..EVENTS_EACH as i64).collect::<Vec<_>>()
        );
    }
    assert_eq!(half.count(), (PRODUCERS / 2) * EVENTS_EACH);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_publishers_of_one_type_keep_history_and_delivery_order_aligned() {
    let broker = Arc::new(EventBroker::new());
    let observer = Recorder::new("aligned");
    broker.subscribe(EventType::WORK_ORDER_CREATED, &observer).await;

    let mut handles = Vec::new();
    for p in 0..4_i64 {
        let broker = broker.clone();
        handles.push(tokio::spawn(async move {
            for n in 0..25_i64 {
                broker
                    .publish(EventType::WORK_ORDER_CREATED, numbered(p * 100 + n), "load")
                    .await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let history_ids: Vec<_> = broker
        .history(&HistoryQuery::new())
        .await
        .iter()
        .map(|e| e.id)
        .collect();
    let delivered_ids: Vec<_> = observer.seen().iter().map(|e| e.id).collect();
    assert_eq!(history_ids.len(), 100);
    assert_eq!(history_ids, delivered_ids);
}

#[tokio::test]
async fn queued_delivery_preserves_order_and_isolation() {
    let broker = EventBroker::new();
    let recorder = Recorder::new("queued");
    let slow = Arc::new(Slow {
        inner: recorder.clone(),
    });
    let panicking = Arc::new(Panicking);
    let inline = Recorder::new("inline");

    broker
        .subscribe_with(EventType::WORK_ORDER_ASSIGNED, &panicking, Delivery::Queued)
        .await;
    broker
        .subscribe_with(EventType::WORK_ORDER_ASSIGNED, &slow, Delivery::Queued)
        .await;
    broker
        .subscribe(EventType::WORK_ORDER_ASSIGNED, &inline)
        .await;

    for n in 0..5 {
        broker
            .publish(EventType::WORK_ORDER_ASSIGNED, numbered(n), "test")
            .await;
    }

    // Inline delivery completed before publish returned.
    assert_eq!(inline.count(), 5);

    wait_for(&recorder, 5).await;
    assert_eq!(recorder.numbers(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn queued_subscription_stops_after_unsubscribe() {
    let broker = EventBroker::new();
    let recorder = Recorder::new("queued");
    broker
        .subscribe_with(EventType::WORK_ORDER_CREATED, &recorder, Delivery::Queued)
        .await;

    broker
        .publish(EventType::WORK_ORDER_CREATED, numbered(1), "test")
        .await;
    wait_for(&recorder, 1).await;

    broker
        .unsubscribe(EventType::WORK_ORDER_CREATED, &recorder)
        .await;
    broker
        .publish(EventType::WORK_ORDER_CREATED, numbered(2), "test")
        .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(recorder.numbers(), vec![1]);
}

#[tokio::test]
async fn separate_brokers_are_isolated() {
    let first = EventBroker::new();
    let second = EventBroker::new();
    let observer = Recorder::new("first-only");
    first.subscribe(EventType::WORK_ORDER_CREATED, &observer).await;

    second
        .publish(EventType::WORK_ORDER_CREATED, numbered(1), "test")
        .await;

    assert_eq!(observer.count(), 0);
    assert_eq!(first.history_len().await, 0);
    assert_eq!(second.history_len().await, 1);
}
