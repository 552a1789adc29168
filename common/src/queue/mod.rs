// Queue module: broker port plus NATS JetStream and in-memory adapters

pub mod broker;
pub mod memory;
pub mod nats;

pub use broker::{BrokerEvent, BrokerEvents, DeliveryId, DeliveryReport, MessageBroker};
pub use memory::{InMemoryBroker, SubmittedMessage};
pub use nats::{NatsBroker, NatsConfig, MESSAGE_KEY_HEADER};
