// Routes trigger events to the publisher

use crate::diagnostics::{Diagnostic, DiagnosticsSink};
use crate::errors::HandlerError;
use crate::handler::publisher::Publisher;
use crate::models::{Schedule, ScheduleEntry, TriggerEvent};
use std::sync::Arc;
use tracing::{debug, info};

/// Classifies trigger events. Failures end up in the diagnostics sink, never
/// with the caller.
pub struct Dispatcher {
    publisher: Arc<Publisher>,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl Dispatcher {
    pub fn new(publisher: Arc<Publisher>, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            publisher,
            diagnostics,
        }
    }

    pub async fn dispatch(&self, event: TriggerEvent) {
        match event {
            TriggerEvent::Invalid {
                schedule_id,
                errors,
            } => {
                debug!(schedule_id = ?schedule_id, errors = ?errors, "Received an invalid schedule event");
                self.diagnostics.record(Diagnostic::InvalidSchedule {
                    schedule_id,
                    errors,
                });
            }
            TriggerEvent::MissedFired(entry) => {
                debug!(schedule_id = %entry.id(), "Received a missed schedule event");
                self.publish(entry).await;
            }
            TriggerEvent::Fired(entry) => {
                info!(schedule_id = %entry.id(), "Received a regular schedule event");
                self.publish(entry).await;
            }
            TriggerEvent::Unrecognized { kind } => {
                self.diagnostics
                    .record(HandlerError::UnexpectedEvent(kind).into());
            }
        }
    }

    async fn publish(&self, entry: Arc<dyn ScheduleEntry>) {
        let Some(schedule) = entry.as_any().downcast_ref::<Schedule>() else {
            self.diagnostics.record(
                HandlerError::TypeMismatch(format!(
                    "event is not a broker schedule: {:?}",
                    entry
                ))
                .into(),
            );
            return;
        };

        if let Err(e) = self.publisher.publish_target(schedule).await {
            self.diagnostics.record(e.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemoryDiagnostics;
    use crate::handler::correlation::CorrelationRegistry;
    use crate::queue::InMemoryBroker;
    use std::any::Any;

    #[derive(Debug)]
    struct DatabaseSchedule {
        id: String,
    }

    impl ScheduleEntry for DatabaseSchedule {
        fn id(&self) -> &str {
            &self.id
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

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

    fn dispatcher() -> (Dispatcher, Arc<InMemoryBroker>, Arc<MemoryDiagnostics>) {
        let (broker, _events) = InMemoryBroker::new();
        let registry = Arc::new(CorrelationRegistry::new());
        let publisher = Arc::new(Publisher::new(broker.clone(), registry, "history"));
        let diagnostics = Arc::new(MemoryDiagnostics::new());
        (
            Dispatcher::new(publisher, diagnostics.clone()),
            broker,
            diagnostics,
        )
    }

    #[tokio::test]
    async fn test_fired_and_missed_publish_target() {
        let (dispatcher, broker, diagnostics) = dispatcher();

        dispatcher.dispatch(TriggerEvent::fired(schedule())).await;
        dispatcher.dispatch(TriggerEvent::missed(schedule())).await;

        assert_eq!(broker.submitted_to("t1").await.len(), 2);
        assert!(diagnostics.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_records_errors_without_submission() {
        let (dispatcher, broker, diagnostics) = dispatcher();

        dispatcher
            .dispatch(TriggerEvent::Invalid {
                schedule_id: Some("s1".to_string()),
                errors: vec!["target topic is empty".to_string()],
            })
            .await;

        assert!(broker.submitted().await.is_empty());
        assert_eq!(
            diagnostics.recorded(),
            vec![Diagnostic::InvalidSchedule {
                schedule_id: Some("s1".to_string()),
                errors: vec!["target topic is empty".to_string()],
            }]
        );
    }

    #[tokio::test]
    async fn test_foreign_schedule_is_a_type_mismatch() {
        let (dispatcher, broker, diagnostics) = dispatcher();

        dispatcher
            .dispatch(TriggerEvent::Fired(Arc::new(DatabaseSchedule {
                id: "db-1".to_string(),
            })))
            .await;

        assert!(broker.submitted().await.is_empty());
        assert_eq!(diagnostics.kinds(), vec!["type_mismatch"]);
    }

    #[tokio::test]
    async fn test_unrecognized_event_is_recorded() {
        let (dispatcher, broker, diagnostics) = dispatcher();

        dispatcher
            .dispatch(TriggerEvent::Unrecognized {
                kind: "paused".to_string(),
            })
            .await;

        assert!(broker.submitted().await.is_empty());
        assert_eq!(
            diagnostics.recorded(),
            vec![Diagnostic::Failure(HandlerError::UnexpectedEvent(
                "paused".to_string()
            ))]
        );
    }

    #[tokio::test]
    async fn test_submission_failure_is_recorded() {
        let (dispatcher, broker, diagnostics) = dispatcher();
        broker.reject_submissions(Some("buffer full")).await;

        dispatcher.dispatch(TriggerEvent::fired(schedule())).await;

        assert_eq!(diagnostics.kinds(), vec!["submission"]);
    }
}
