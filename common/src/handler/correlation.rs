// Correlation of delivery confirmations with the metadata of their messages

use crate::errors::HandlerError;
use crate::models::{Header, MessageKind, Schedule};
use crate::queue::DeliveryId;
use crate::telemetry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{watch, Mutex};

/// Metadata of a target message needed once its delivery is confirmed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationContext {
    pub origin_key: String,
    pub origin_topic: String,
    pub origin_timestamp: i64,
    /// Full header set of the target message, reserved headers included
    pub headers: Vec<Header>,
}

impl CorrelationContext {
    pub fn for_schedule(schedule: &Schedule, headers: Vec<Header>) -> Self {
        Self {
            origin_key: schedule.key.clone(),
            origin_topic: schedule.origin_topic.clone(),
            origin_timestamp: schedule.timestamp,
            headers,
        }
    }

    /// Origin key and topic, both required to address the deletion marker
    pub fn origin(&self) -> Result<(&str, &str), HandlerError> {
        if self.origin_key.is_empty() {
            return Err(HandlerError::MissingCorrelationData(
                "cannot find original key in the correlation context".to_string(),
            ));
        }
        if self.origin_topic.is_empty() {
            return Err(HandlerError::MissingCorrelationData(
                "cannot find original topic in the correlation context".to_string(),
            ));
        }
        Ok((&self.origin_key, &self.origin_topic))
    }
}

/// A submission whose confirmation has not been taken yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelivery {
    pub kind: MessageKind,
    /// Present for target messages only
    pub context: Option<CorrelationContext>,
}

/// Maps delivery ids to pending submissions and counts in-flight messages.
///
/// A message stays in flight from `register` until either `discard` (it was
/// never queued) or `settle` (its confirmation has been fully processed).
pub struct CorrelationRegistry {
    next_id: AtomicU64,
    pending: Mutex<HashMap<DeliveryId, PendingDelivery>>,
    in_flight: watch::Sender<usize>,
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            in_flight,
        }
    }

    /// Assign a delivery id to a message about to be submitted
    pub async fn register(
        &self,
        kind: MessageKind,
        context: Option<CorrelationContext>,
    ) -> DeliveryId {
        let delivery_id = DeliveryId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.pending
            .lock()
            .await
            .insert(delivery_id, PendingDelivery { kind, context });
        self.increment_in_flight();
        delivery_id
    }

    /// Forget a registration whose submission failed
    pub async fn discard(&self, delivery_id: DeliveryId) {
        if self.pending.lock().await.remove(&delivery_id).is_some() {
            self.decrement_in_flight();
        }
    }

    /// Remove and return the registration for a confirmed or failed delivery.
    /// The message stays in flight until `settle` is called.
    pub async fn take(&self, delivery_id: DeliveryId) -> Option<PendingDelivery> {
        self.pending.lock().await.remove(&delivery_id)
    }

    /// Mark a taken delivery as fully processed
    pub fn settle(&self) {
        self.decrement_in_flight();
    }

    /// Number of registrations not yet taken
    pub async fn pending(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Wait until nothing is in flight. Returns false when `timeout` elapses first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let mut in_flight = self.in_flight.subscribe();
        tokio::time::timeout(timeout, in_flight.wait_for(|count| *count == 0))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }

    fn increment_in_flight(&self) {
        self.in_flight.send_modify(|count| *count += 1);
        telemetry::update_in_flight(self.in_flight());
    }

    fn decrement_in_flight(&self) {
        self.in_flight
            .send_modify(|count| *count = count.saturating_sub(1));
        telemetry::update_in_flight(self.in_flight());
    }
}
