// NATS JetStream broker adapter

use crate::errors::QueueError;
use crate::models::OutboundMessage;
use crate::queue::broker::{BrokerEvent, BrokerEvents, DeliveryId, DeliveryReport, MessageBroker};
use async_nats::jetstream::context::PublishAckFuture;
use async_nats::jetstream::Context as JetStreamContext;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Transport header carrying the message key; NATS messages have no key of their own
pub const MESSAGE_KEY_HEADER: &str = "Scheduler-Message-Key";

/// NATS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL (e.g., "nats://localhost:4222")
    pub url: String,
    /// Connection name reported to the server
    pub connection_name: String,
    /// How long to wait for a JetStream acknowledgement before reporting failure
    pub ack_timeout_seconds: u64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            connection_name: "scheduler-handler".to_string(),
            ack_timeout_seconds: 30,
        }
    }
}

struct PendingAck {
    delivery_id: DeliveryId,
    topic: String,
    key: Vec<u8>,
    value: Vec<u8>,
    ack: PublishAckFuture,
}

struct Connection {
    client: async_nats::Client,
    jetstream: JetStreamContext,
}

/// JetStream-backed broker.
///
/// `submit` returns once the client has buffered the message. The
/// acknowledgement futures are driven by a single pump task, which turns
/// each completion into a [`BrokerEvent::Delivery`].
pub struct NatsBroker {
    connection: Mutex<Option<Connection>>,
    pending_tx: mpsc::UnboundedSender<PendingAck>,
    pump: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    config: NatsConfig,
}

impl NatsBroker {
    /// Connect to the NATS server and start the acknowledgement pump
    #[instrument(skip(config), fields(url = %config.url))]
    pub async fn connect(config: NatsConfig) -> Result<(Self, BrokerEvents), QueueError> {
        info!("Connecting to NATS server");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connection_events = events_tx.clone();

        let client = async_nats::ConnectOptions::new()
            .name(&config.connection_name)
            .event_callback(move |event| {
                let events = connection_events.clone();
                async move {
                    if let Some(broker_event) = connection_event(&event) {
                        let _ = events.send(broker_event);
                    } else {
                        debug!(event = %event, "NATS connection event");
                    }
                }
            })
            .connect(config.url.as_str())
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to connect to NATS: {}", e)))?;

        info!("Connected to NATS server successfully");

        let jetstream = async_nats::jetstream::new(client.clone());
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        let ack_timeout = Duration::from_secs(config.ack_timeout_seconds);
        let pump = tokio::spawn(run_ack_pump(pending_rx, events_tx, ack_timeout));

        let broker = Self {
            connection: Mutex::new(Some(Connection { client, jetstream })),
            pending_tx,
            pump: Mutex::new(Some(pump)),
            closed: AtomicBool::new(false),
            config,
        };
        Ok((broker, events_rx))
    }

    /// Get the configuration
    pub fn config(&self) -> &NatsConfig {
        &self.config
    }

    async fn jetstream(&self) -> Result<JetStreamContext, QueueError> {
        self.connection
            .lock()
            .await
            .as_ref()
            .map(|connection| connection.jetstream.clone())
            .ok_or_else(|| QueueError::Closed("NATS connection released".to_string()))
    }
}

#[async_trait::async_trait]
impl MessageBroker for NatsBroker {
    #[instrument(skip(self, message), fields(
        delivery_id = %delivery_id,
        topic = %message.topic,
    ))]
    async fn submit(
        &self,
        delivery_id: DeliveryId,
        message: OutboundMessage,
    ) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed("NATS broker closed".to_string()));
        }

        let jetstream = self.jetstream().await?;
        let headers = encode_headers(&message)?;

        let ack = jetstream
            .publish_with_headers(message.topic.clone(), headers, message.value.clone().into())
            .await
            .map_err(|e| QueueError::PublishFailed(format!("Failed to publish message: {}", e)))?;

        self.pending_tx
            .send(PendingAck {
                delivery_id,
                topic: message.topic,
                key: message.key,
                value: message.value,
                ack,
            })
            .map_err(|_| {
                QueueError::PublishFailed("Acknowledgement pump is not running".to_string())
            })
    }

    #[instrument(skip(self))]
    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);

        if let Some(connection) = self.connection.lock().await.take() {
            if let Err(e) = connection.client.flush().await {
                warn!(error = %e, "Failed to flush NATS client");
            }
        }

        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }

        info!("NATS connection released");
    }
}

/// Broker-level errors surfaced from connection events
fn connection_event(event: &async_nats::Event) -> Option<BrokerEvent> {
    let code = match event {
        async_nats::Event::Connected => return None,
        async_nats::Event::Disconnected => "disconnected",
        async_nats::Event::LameDuckMode => "lame_duck_mode",
        async_nats::Event::SlowConsumer(_) => "slow_consumer",
        async_nats::Event::ServerError(_) => "server_error",
        async_nats::Event::ClientError(_) => "client_error",
        #[allow(unreachable_patterns)]
        _ => "connection_event",
    };
    Some(BrokerEvent::Error {
        code: code.to_string(),
        message: event.to_string(),
    })
}

/// NATS header values are text; binary keys or header values are rejected
/// rather than rewritten
fn encode_headers(message: &OutboundMessage) -> Result<async_nats::HeaderMap, QueueError> {
    let mut headers = async_nats::HeaderMap::new();
    for header in &message.headers {
        let value = std::str::from_utf8(&header.value).map_err(|e| {
            QueueError::PublishFailed(format!(
                "Header '{}' is not valid UTF-8: {}",
                header.key, e
            ))
        })?;
        headers.append(header.key.as_str(), value);
    }
    let key = std::str::from_utf8(&message.key).map_err(|e| {
        QueueError::PublishFailed(format!("Message key is not valid UTF-8: {}", e))
    })?;
    headers.insert(MESSAGE_KEY_HEADER, key);
    Ok(headers)
}

async fn await_ack(pending: PendingAck, ack_timeout: Duration) -> DeliveryReport {
    let error = match tokio::time::timeout(ack_timeout, pending.ack).await {
        Ok(Ok(ack)) => {
            debug!(
                delivery_id = %pending.delivery_id,
                stream = %ack.stream,
                sequence = ack.sequence,
                "Publish acknowledged"
            );
            None
        }
        Ok(Err(e)) => Some(format!("Failed to get publish acknowledgment: {}", e)),
        Err(_) => Some(format!(
            "Publish acknowledgment timeout after {:?}",
            ack_timeout
        )),
    };

    DeliveryReport {
        delivery_id: pending.delivery_id,
        topic: pending.topic,
        key: pending.key,
        value: pending.value,
        error,
    }
}

/// Turns acknowledgement completions into delivery reports, in completion order
async fn run_ack_pump(
    mut pending_rx: mpsc::UnboundedReceiver<PendingAck>,
    events_tx: mpsc::UnboundedSender<BrokerEvent>,
    ack_timeout: Duration,
) {
    let mut in_flight = FuturesUnordered::new();

    loop {
        tokio::select! {
            received = pending_rx.recv() => match received {
                Some(pending) => in_flight.push(await_ack(pending, ack_timeout)),
                None => break,
            },
            Some(report) = in_flight.next(), if !in_flight.is_empty() => {
                if events_tx.send(BrokerEvent::Delivery(report)).is_err() {
                    debug!("Confirmation stream receiver dropped");
                }
            }
        }
    }

    while let Some(report) = in_flight.next().await {
        let _ = events_tx.send(BrokerEvent::Delivery(report));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Header;

    #[test]
    fn test_nats_config_default() {
        let config = NatsConfig::default();
        assert_eq!(config.url, "nats://localhost:4222");
        assert_eq!(config.connection_name, "scheduler-handler");
        assert_eq!(config.ack_timeout_seconds, 30);
    }

    #[test]
    fn test_encode_headers_carries_key_and_headers() {
        let message = OutboundMessage {
            topic: "t1".to_string(),
            key: b"k1".to_vec(),
            value: b"v1".to_vec(),
            headers: vec![
                Header::new("scheduler-key", "s1"),
                Header::new("scheduler-topic", "sched-topic"),
            ],
        };

        let headers = encode_headers(&message).unwrap();
        assert_eq!(
            headers.get(MESSAGE_KEY_HEADER).map(|v| v.as_str()),
            Some("k1")
        );
        assert_eq!(
            headers.get("scheduler-key").map(|v| v.as_str()),
            Some("s1")
        );
        assert_eq!(
            headers.get("scheduler-topic").map(|v| v.as_str()),
            Some("sched-topic")
        );
    }

    #[test]
    fn test_encode_headers_rejects_binary_header_value() {
        let message = OutboundMessage {
            topic: "t1".to_string(),
            key: b"k1".to_vec(),
            value: b"v1".to_vec(),
            headers: vec![Header::new("x-bin", vec![255, 254, 97])],
        };

        match encode_headers(&message) {
            Err(QueueError::PublishFailed(reason)) => assert!(reason.contains("x-bin")),
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("binary header value must not be encoded"),
        }
    }

    #[test]
    fn test_encode_headers_rejects_binary_key() {
        let message = OutboundMessage {
            topic: "t1".to_string(),
            key: vec![255, 1],
            value: b"v1".to_vec(),
            headers: vec![Header::new("scheduler-key", "s1")],
        };

        match encode_headers(&message) {
            Err(QueueError::PublishFailed(reason)) => assert!(reason.contains("key")),
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("binary key must not be encoded"),
        }
    }

    #[test]
    fn test_connected_event_is_not_an_error() {
        assert!(connection_event(&async_nats::Event::Connected).is_none());
        match connection_event(&async_nats::Event::Disconnected) {
            Some(BrokerEvent::Error { code, .. }) => assert_eq!(code, "disconnected"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
