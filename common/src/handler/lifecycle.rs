// Handler lifecycle: validated construction, listener start, bounded shutdown

use crate::diagnostics::{DiagnosticsSink, TracingDiagnostics};
use crate::errors::HandlerError;
use crate::handler::correlation::CorrelationRegistry;
use crate::handler::dispatcher::Dispatcher;
use crate::handler::listener::ConfirmationListener;
use crate::handler::publisher::Publisher;
use crate::models::TriggerEvent;
use crate::queue::{BrokerEvents, MessageBroker, NatsBroker, NatsConfig};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

/// Upper bound for flushing in-flight messages on close
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Publishes fired schedules and, once delivered, deletes them from their
/// scheduler topic and records them in the history topic.
pub struct EventHandler {
    history_topic: String,
    broker: Arc<dyn MessageBroker>,
    registry: Arc<CorrelationRegistry>,
    dispatcher: Dispatcher,
    diagnostics: Arc<dyn DiagnosticsSink>,
    accepting: AtomicBool,
    stop_tx: watch::Sender<bool>,
    listener: Mutex<Option<JoinHandle<()>>>,
    flush_timeout: Duration,
}

impl EventHandler {
    /// Connect to the broker at `endpoint` with default settings
    pub async fn open(endpoint: &str, history_topic: &str) -> Result<Self, HandlerError> {
        let config = NatsConfig {
            url: endpoint.to_string(),
            ..Default::default()
        };
        Self::open_with_config(config, history_topic, Arc::new(TracingDiagnostics)).await
    }

    #[instrument(skip(config, diagnostics), fields(url = %config.url))]
    pub async fn open_with_config(
        config: NatsConfig,
        history_topic: &str,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Result<Self, HandlerError> {
        validate(&config.url, history_topic)?;

        let (broker, events) = NatsBroker::connect(config)
            .await
            .map_err(|e| HandlerError::Connection(e.to_string()))?;

        Ok(Self::start(
            Arc::new(broker),
            events,
            history_topic,
            diagnostics,
        ))
    }

    /// Build a handler over an already connected broker.
    /// Must be called from within a Tokio runtime.
    pub fn with_broker(
        broker: Arc<dyn MessageBroker>,
        events: BrokerEvents,
        history_topic: &str,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Result<Self, HandlerError> {
        if history_topic.is_empty() {
            return Err(HandlerError::Config(
                "history topic cannot be empty".to_string(),
            ));
        }
        Ok(Self::start(broker, events, history_topic, diagnostics))
    }

    /// Override the flush bound used by `close`
    pub fn with_flush_timeout(mut self, flush_timeout: Duration) -> Self {
        self.flush_timeout = flush_timeout;
        self
    }

    fn start(
        broker: Arc<dyn MessageBroker>,
        events: BrokerEvents,
        history_topic: &str,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        let registry = Arc::new(CorrelationRegistry::new());
        let publisher = Arc::new(Publisher::new(
            broker.clone(),
            registry.clone(),
            history_topic,
        ));
        let (stop_tx, stop_rx) = watch::channel(false);

        let listener =
            ConfirmationListener::new(publisher.clone(), registry.clone(), diagnostics.clone())
                .spawn(events, stop_rx);

        let handler = Self {
            history_topic: history_topic.to_string(),
            broker,
            registry,
            dispatcher: Dispatcher::new(publisher, diagnostics.clone()),
            diagnostics,
            accepting: AtomicBool::new(true),
            stop_tx,
            listener: Mutex::new(Some(listener)),
            flush_timeout: FLUSH_TIMEOUT,
        };
        info!(history_topic = %handler.history_topic, "Handler opened");
        handler
    }

    pub fn history_topic(&self) -> &str {
        &self.history_topic
    }

    /// Messages submitted whose confirmation has not been processed yet
    pub fn in_flight(&self) -> usize {
        self.registry.in_flight()
    }

    /// Handle one trigger event. Never fails; problems are recorded as diagnostics.
    pub async fn handle(&self, event: TriggerEvent) {
        if !self.accepting.load(Ordering::SeqCst) {
            self.diagnostics
                .record(HandlerError::Closed(format!("{} event", event.kind())).into());
            return;
        }
        self.dispatcher.dispatch(event).await;
    }

    /// Stop accepting events, flush in-flight messages for at most the flush
    /// bound, then release the connection and stop the listener
    pub async fn close(&self) {
        info!("Handler closing ...");
        self.accepting.store(false, Ordering::SeqCst);

        if !self.registry.wait_idle(self.flush_timeout).await {
            warn!(
                in_flight = self.registry.in_flight(),
                timeout = ?self.flush_timeout,
                "Flush timed out, abandoning in-flight messages"
            );
        }

        self.broker.close().await;
        let _ = self.stop_tx.send(true);

        if let Some(listener) = self.listener.lock().await.take() {
            if let Err(e) = listener.await {
                warn!(error = %e, "Confirmation listener ended abnormally");
            }
        }

        info!("Handler closed");
    }
}

impl fmt::Display for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scheduler handler history_topic={}", self.history_topic)
    }
}

fn validate(endpoint: &str, history_topic: &str) -> Result<(), HandlerError> {
    if endpoint.is_empty() {
        return Err(HandlerError::Config(
            "broker endpoint cannot be empty".to_string(),
        ));
    }
    if history_topic.is_empty() {
        return Err(HandlerError::Config(
            "history topic cannot be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemoryDiagnostics;
    use crate::models::Schedule;
    use crate::queue::InMemoryBroker;

    fn schedule() -> Schedule {
        Schedule {
            key: "s1".to_string(),
            target_topic: "t1".to_string(),
            target_key: "k1".to_string(),
            value: b"v1".to_vec(),
            timestamp: 1000,
            origin_topic: "sched-topic".to_string(),
            headers: vec![],
        }
    }

    #[tokio::test]
    async fn test_open_rejects_empty_endpoint() {
        let result = EventHandler::open("", "history").await;
        assert!(matches!(result, Err(HandlerError::Config(_))));
    }

    #[tokio::test]
    async fn test_open_rejects_empty_history_topic() {
        let result = EventHandler::open("nats://localhost:4222", "").await;
        assert!(matches!(result, Err(HandlerError::Config(_))));
    }

    #[tokio::test]
    async fn test_display() {
        let (broker, events) = InMemoryBroker::new();
        let handler = EventHandler::with_broker(
            broker,
            events,
            "history",
            Arc::new(MemoryDiagnostics::new()),
        )
        .unwrap();

        assert_eq!(handler.to_string(), "scheduler handler history_topic=history");
        handler.close().await;
    }

    #[tokio::test]
    async fn test_close_rejects_further_events() {
        let (broker, events) = InMemoryBroker::new();
        let diagnostics = Arc::new(MemoryDiagnostics::new());
        let handler =
            EventHandler::with_broker(broker.clone(), events, "history", diagnostics.clone())
                .unwrap();

        handler.close().await;
        handler.handle(TriggerEvent::fired(schedule())).await;

        assert!(broker.submitted().await.is_empty());
        assert_eq!(diagnostics.kinds(), vec!["closed"]);
    }

    #[tokio::test]
    async fn test_close_abandons_unconfirmed_after_flush_bound() {
        let (broker, events) = InMemoryBroker::new();
        let handler = EventHandler::with_broker(
            broker.clone(),
            events,
            "history",
            Arc::new(MemoryDiagnostics::new()),
        )
        .unwrap()
        .with_flush_timeout(Duration::from_millis(50));

        handler.handle(TriggerEvent::fired(schedule())).await;
        assert_eq!(handler.in_flight(), 1);

        handler.close().await;

        // Late confirmations have nowhere to go and cause no fan-out
        assert_eq!(broker.confirm_all().await, 0);
        assert_eq!(broker.submitted().await.len(), 1);
    }
}
