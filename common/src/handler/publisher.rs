// Builds and submits target, deletion-marker and history messages

use crate::errors::HandlerError;
use crate::handler::correlation::{CorrelationContext, CorrelationRegistry};
use crate::models::{MessageKind, OutboundMessage, Schedule};
use crate::queue::{DeliveryId, DeliveryReport, MessageBroker};
use crate::telemetry;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Target message for `schedule`: its own headers followed by the reserved ones
pub fn target_message(schedule: &Schedule) -> OutboundMessage {
    let mut headers = schedule.headers.clone();
    headers.extend(schedule.reserved_headers());

    OutboundMessage {
        topic: schedule.target_topic.clone(),
        key: schedule.target_key.as_bytes().to_vec(),
        value: schedule.value.clone(),
        headers,
    }
}

/// Deletion marker removing the schedule from its origin topic
pub fn deletion_marker(context: &CorrelationContext) -> Result<OutboundMessage, HandlerError> {
    let (origin_key, origin_topic) = context.origin()?;

    Ok(OutboundMessage {
        topic: origin_topic.to_string(),
        key: origin_key.as_bytes().to_vec(),
        value: Vec::new(),
        headers: context.headers.clone(),
    })
}

/// History entry recording a delivered target message
pub fn history_entry(
    history_topic: &str,
    delivered: &DeliveryReport,
    context: &CorrelationContext,
) -> OutboundMessage {
    OutboundMessage {
        topic: history_topic.to_string(),
        key: delivered.key.clone(),
        value: delivered.value.clone(),
        headers: context.headers.clone(),
    }
}

/// Submits messages to the broker, registering each one for correlation first
pub struct Publisher {
    broker: Arc<dyn MessageBroker>,
    registry: Arc<CorrelationRegistry>,
    history_topic: String,
}

impl Publisher {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        registry: Arc<CorrelationRegistry>,
        history_topic: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            registry,
            history_topic: history_topic.into(),
        }
    }

    pub fn history_topic(&self) -> &str {
        &self.history_topic
    }

    /// Queue the target message of `schedule` and keep its correlation context
    /// until the broker reports on it
    #[instrument(skip_all, fields(schedule_key = %schedule.key, topic = %schedule.target_topic))]
    pub async fn publish_target(&self, schedule: &Schedule) -> Result<DeliveryId, HandlerError> {
        let message = target_message(schedule);
        let context = CorrelationContext::for_schedule(schedule, message.headers.clone());

        debug!(
            key = %schedule.target_key,
            "Producing target message"
        );
        self.submit(MessageKind::Target, message, Some(context)).await
    }

    /// Queue the deletion marker for a confirmed target message
    #[instrument(skip_all, fields(schedule_key = %context.origin_key))]
    pub async fn publish_deletion_marker(
        &self,
        context: &CorrelationContext,
    ) -> Result<DeliveryId, HandlerError> {
        let message = deletion_marker(context)?;

        debug!(topic = %message.topic, "Producing deletion marker");
        self.submit(MessageKind::DeletionMarker, message, None).await
    }

    /// Queue the history entry for a confirmed target message
    #[instrument(skip_all, fields(schedule_key = %context.origin_key))]
    pub async fn publish_history_entry(
        &self,
        delivered: &DeliveryReport,
        context: &CorrelationContext,
    ) -> Result<DeliveryId, HandlerError> {
        let message = history_entry(&self.history_topic, delivered, context);

        debug!(
            key = %delivered.key_lossy(),
            topic = %self.history_topic,
            "Producing history message"
        );
        self.submit(MessageKind::History, message, None).await
    }

    async fn submit(
        &self,
        kind: MessageKind,
        message: OutboundMessage,
        context: Option<CorrelationContext>,
    ) -> Result<DeliveryId, HandlerError> {
        let topic = message.topic.clone();
        let delivery_id = self.registry.register(kind, context).await;

        match self.broker.submit(delivery_id, message).await {
            Ok(()) => {
                telemetry::record_message_submitted(kind);
                debug!(delivery_id = %delivery_id, kind = %kind, "Message queued");
                Ok(delivery_id)
            }
            Err(e) => {
                self.registry.discard(delivery_id).await;
                Err(e.into_submission(&topic))
            }
        }
    }
}
