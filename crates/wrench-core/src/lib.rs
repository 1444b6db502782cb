pub mod error;
pub mod events;

pub use error::{CoreError, Result};
pub use events::{
    BrokerConfig, BrokerStats, Delivery, Event, EventBroker, EventType, HistoryQuery, Observer,
    ObserverError, Payload, SubscriptionId,
};
