// Broker port: asynchronous submission plus an out-of-band confirmation stream

use crate::errors::QueueError;
use crate::models::OutboundMessage;
use std::fmt;
use tokio::sync::mpsc;

/// Correlation identifier assigned to every submitted message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryId(u64);

impl DeliveryId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of a single submission as reported by the broker.
///
/// Headers are not part of the report; whatever is needed after delivery
/// must be looked up through the delivery id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivery_id: DeliveryId,
    pub topic: String,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// `None` when the broker confirmed the delivery
    pub error: Option<String>,
}

impl DeliveryReport {
    pub fn is_delivered(&self) -> bool {
        self.error.is_none()
    }

    pub fn key_lossy(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }
}

/// Event on the confirmation stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// Delivery outcome of one submitted message
    Delivery(DeliveryReport),
    /// Broker-level error not tied to a message
    Error { code: String, message: String },
}

/// Receiving half of the confirmation stream. Ends when the broker is closed.
pub type BrokerEvents = mpsc::UnboundedReceiver<BrokerEvent>;

/// Message broker used by the handler
#[async_trait::async_trait]
pub trait MessageBroker: Send + Sync {
    /// Queue `message` for delivery and return without waiting for it.
    /// The outcome arrives later on the confirmation stream tagged with `delivery_id`.
    async fn submit(&self, delivery_id: DeliveryId, message: OutboundMessage)
        -> Result<(), QueueError>;

    /// Release the connection. Acknowledgements still pending are dropped.
    async fn close(&self);
}
