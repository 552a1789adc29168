// In-memory broker for tests and local runs

use crate::errors::QueueError;
use crate::models::OutboundMessage;
use crate::queue::broker::{BrokerEvent, BrokerEvents, DeliveryId, DeliveryReport, MessageBroker};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::debug;

/// A message accepted by the in-memory broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedMessage {
    pub delivery_id: DeliveryId,
    pub message: OutboundMessage,
}

#[derive(Default)]
struct BrokerState {
    submitted: Vec<SubmittedMessage>,
    settled: HashSet<DeliveryId>,
    rejection: Option<String>,
    events: Option<mpsc::UnboundedSender<BrokerEvent>>,
}

/// Broker that keeps every submission in memory.
///
/// Nothing is confirmed on its own: callers decide which submissions are
/// delivered (`confirm`) and which fail (`fail`).
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    submitted_count: watch::Sender<usize>,
}

impl InMemoryBroker {
    /// Create a broker and the receiving half of its confirmation stream
    pub fn new() -> (Arc<Self>, BrokerEvents) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (submitted_count, _) = watch::channel(0);
        let broker = Self {
            state: Mutex::new(BrokerState {
                events: Some(events_tx),
                ..Default::default()
            }),
            submitted_count,
        };
        (Arc::new(broker), events_rx)
    }

    /// Reject every following submission with `reason`, or accept again with `None`
    pub async fn reject_submissions(&self, reason: Option<&str>) {
        self.state.lock().await.rejection = reason.map(str::to_string);
    }

    /// All accepted submissions, in submission order
    pub async fn submitted(&self) -> Vec<SubmittedMessage> {
        self.state.lock().await.submitted.clone()
    }

    /// Accepted messages for `topic`, in submission order
    pub async fn submitted_to(&self, topic: &str) -> Vec<OutboundMessage> {
        self.state
            .lock()
            .await
            .submitted
            .iter()
            .filter(|submitted| submitted.message.topic == topic)
            .map(|submitted| submitted.message.clone())
            .collect()
    }

    /// Report `delivery_id` as delivered. Returns false if unknown or already settled.
    pub async fn confirm(&self, delivery_id: DeliveryId) -> bool {
        self.settle(delivery_id, None).await
    }

    /// Report `delivery_id` as failed. Returns false if unknown or already settled.
    pub async fn fail(&self, delivery_id: DeliveryId, reason: &str) -> bool {
        self.settle(delivery_id, Some(reason.to_string())).await
    }

    /// Confirm every unsettled submission in submission order
    pub async fn confirm_all(&self) -> usize {
        let pending: Vec<DeliveryId> = {
            let state = self.state.lock().await;
            state
                .submitted
                .iter()
                .map(|submitted| submitted.delivery_id)
                .filter(|id| !state.settled.contains(id))
                .collect()
        };

        let mut confirmed = 0;
        for delivery_id in pending {
            if self.confirm(delivery_id).await {
                confirmed += 1;
            }
        }
        confirmed
    }

    /// Emit a broker-level error on the confirmation stream
    pub async fn emit_error(&self, code: &str, message: &str) {
        let state = self.state.lock().await;
        if let Some(events) = &state.events {
            let _ = events.send(BrokerEvent::Error {
                code: code.to_string(),
                message: message.to_string(),
            });
        }
    }

    /// Wait until at least `count` submissions were accepted
    pub async fn wait_for_submissions(&self, count: usize, timeout: Duration) -> bool {
        let mut submitted = self.submitted_count.subscribe();
        tokio::time::timeout(timeout, submitted.wait_for(|n| *n >= count))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }

    async fn settle(&self, delivery_id: DeliveryId, error: Option<String>) -> bool {
        let mut state = self.state.lock().await;
        if state.settled.contains(&delivery_id) {
            return false;
        }
        let Some(message) = state
            .submitted
            .iter()
            .find(|submitted| submitted.delivery_id == delivery_id)
            .map(|submitted| submitted.message.clone())
        else {
            return false;
        };
        state.settled.insert(delivery_id);

        let report = DeliveryReport {
            delivery_id,
            topic: message.topic,
            key: message.key,
            value: message.value,
            error,
        };
        match &state.events {
            Some(events) => events.send(BrokerEvent::Delivery(report)).is_ok(),
            None => false,
        }
    }
}

#[async_trait::async_trait]
impl MessageBroker for InMemoryBroker {
    async fn submit(
        &self,
        delivery_id: DeliveryId,
        message: OutboundMessage,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if state.events.is_none() {
            return Err(QueueError::Closed("in-memory broker closed".to_string()));
        }
        if let Some(reason) = &state.rejection {
            return Err(QueueError::PublishFailed(reason.clone()));
        }

        debug!(
            delivery_id = %delivery_id,
            topic = %message.topic,
            key = %message.key_lossy(),
            "Message queued in memory"
        );
        state.submitted.push(SubmittedMessage {
            delivery_id,
            message,
        });
        let count = state.submitted.len();
        drop(state);

        self.submitted_count.send_replace(count);
        Ok(())
    }

    async fn close(&self) {
        // Dropping the sender ends the confirmation stream
        self.state.lock().await.events = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(topic: &str, value: &[u8]) -> OutboundMessage {
        OutboundMessage {
            topic: topic.to_string(),
            key: b"k1".to_vec(),
            value: value.to_vec(),
            headers: vec![],
        }
    }

    #[tokio::test]
    async fn test_confirm_emits_delivery_report() {
        let (broker, mut events) = InMemoryBroker::new();
        broker
            .submit(DeliveryId::new(1), message("t1", b"v1"))
            .await
            .unwrap();

        assert!(broker.confirm(DeliveryId::new(1)).await);
        assert!(!broker.confirm(DeliveryId::new(1)).await);

        match events.recv().await {
            Some(BrokerEvent::Delivery(report)) => {
                assert_eq!(report.delivery_id, DeliveryId::new(1));
                assert_eq!(report.topic, "t1");
                assert_eq!(report.value, b"v1".to_vec());
                assert!(report.is_delivered());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fail_emits_error_report() {
        let (broker, mut events) = InMemoryBroker::new();
        broker
            .submit(DeliveryId::new(7), message("t1", b"v1"))
            .await
            .unwrap();
        assert!(broker.fail(DeliveryId::new(7), "no responders").await);

        match events.recv().await {
            Some(BrokerEvent::Delivery(report)) => {
                assert_eq!(report.error.as_deref(), Some("no responders"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejected_submission_is_not_recorded() {
        let (broker, _events) = InMemoryBroker::new();
        broker.reject_submissions(Some("buffer full")).await;

        let result = broker.submit(DeliveryId::new(1), message("t1", b"v1")).await;
        assert!(matches!(result, Err(QueueError::PublishFailed(_))));
        assert!(broker.submitted().await.is_empty());
    }

    #[tokio::test]
    async fn test_close_ends_confirmation_stream() {
        let (broker, mut events) = InMemoryBroker::new();
        broker.close().await;

        assert!(events.recv().await.is_none());
        let result = broker.submit(DeliveryId::new(1), message("t1", b"v1")).await;
        assert!(matches!(result, Err(QueueError::Closed(_))));
    }

    #[tokio::test]
    async fn test_wait_for_submissions_times_out() {
        let (broker, _events) = InMemoryBroker::new();
        assert!(
            !broker
                .wait_for_submissions(1, Duration::from_millis(20))
                .await
        );
    }
}
