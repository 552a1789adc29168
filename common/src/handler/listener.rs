// Confirmation listener: fans out deletion markers and history entries
// once a target message is confirmed delivered

use crate::diagnostics::DiagnosticsSink;
use crate::errors::HandlerError;
use crate::handler::correlation::{CorrelationContext, CorrelationRegistry, PendingDelivery};
use crate::handler::publisher::Publisher;
use crate::models::MessageKind;
use crate::queue::{BrokerEvent, BrokerEvents, DeliveryReport};
use crate::telemetry;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct ConfirmationListener {
    publisher: Arc<Publisher>,
    registry: Arc<CorrelationRegistry>,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl ConfirmationListener {
    pub fn new(
        publisher: Arc<Publisher>,
        registry: Arc<CorrelationRegistry>,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        Self {
            publisher,
            registry,
            diagnostics,
        }
    }

    /// Run the listener on its own task until the stream ends or `stop` fires
    pub fn spawn(self, events: BrokerEvents, stop: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(events, stop))
    }

    pub async fn run(self, mut events: BrokerEvents, mut stop: watch::Receiver<bool>) {
        info!("Confirmation listener started");

        loop {
            if *stop.borrow_and_update() {
                debug!("Stop requested");
                break;
            }
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() {
                        debug!("Stop handle dropped");
                        break;
                    }
                }
                event = events.recv() => match event {
                    Some(event) => self.process(event).await,
                    None => {
                        debug!("Confirmation stream closed");
                        break;
                    }
                },
            }
        }

        info!("Confirmation listener stopped");
    }

    /// Handle one event of the confirmation stream. Fan-out publishes are
    /// queued before this returns.
    pub async fn process(&self, event: BrokerEvent) {
        match event {
            BrokerEvent::Error { code, message } => {
                self.diagnostics
                    .record(HandlerError::Broker { code, message }.into());
            }
            BrokerEvent::Delivery(report) => {
                let pending = self.registry.take(report.delivery_id).await;
                let tracked = pending.is_some();

                self.process_delivery(&report, pending).await;

                if tracked {
                    self.registry.settle();
                }
            }
        }
    }

    async fn process_delivery(&self, report: &DeliveryReport, pending: Option<PendingDelivery>) {
        let kind = pending
            .as_ref()
            .map(|pending| pending.kind)
            .unwrap_or_else(|| self.classify(report));

        if let Some(reason) = &report.error {
            telemetry::record_delivery_failed(kind);
            self.diagnostics.record(
                HandlerError::Delivery {
                    topic: report.topic.clone(),
                    key: report.key_lossy(),
                    reason: reason.clone(),
                }
                .into(),
            );
            return;
        }

        telemetry::record_delivery_confirmed(kind);

        // History entries and deletion markers are terminal
        if report.topic == self.publisher.history_topic() || report.value.is_empty() {
            debug!(
                delivery_id = %report.delivery_id,
                topic = %report.topic,
                "Terminal message delivered"
            );
            return;
        }

        match pending.and_then(|pending| pending.context) {
            Some(context) => self.fan_out(report, &context).await,
            None => self.diagnostics.record(
                HandlerError::MissingCorrelationData(format!(
                    "no correlation context for delivery {} with key '{}'",
                    report.delivery_id,
                    report.key_lossy()
                ))
                .into(),
            ),
        }
    }

    async fn fan_out(&self, report: &DeliveryReport, context: &CorrelationContext) {
        debug!(
            delivery_id = %report.delivery_id,
            schedule_key = %context.origin_key,
            "Target message delivered"
        );

        if let Err(e) = self.publisher.publish_deletion_marker(context).await {
            self.diagnostics.record(e.into());
        }
        if let Err(e) = self.publisher.publish_history_entry(report, context).await {
            self.diagnostics.record(e.into());
        }
    }

    fn classify(&self, report: &DeliveryReport) -> MessageKind {
        if report.topic == self.publisher.history_topic() {
            MessageKind::History
        } else if report.value.is_empty() {
            MessageKind::DeletionMarker
        } else {
            MessageKind::Target
        }
    }
}
