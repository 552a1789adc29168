// Diagnostics sink injected into the dispatcher and the confirmation listener

use crate::errors::HandlerError;
use crate::telemetry;
use std::sync::Mutex;
use tracing::{error, warn};

/// Something worth reporting that does not stop the handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// The scheduler rejected a schedule definition
    InvalidSchedule {
        schedule_id: Option<String>,
        errors: Vec<String>,
    },
    /// An operation failed and was abandoned
    Failure(HandlerError),
}

impl Diagnostic {
    pub fn kind(&self) -> &'static str {
        match self {
            Diagnostic::InvalidSchedule { .. } => "invalid_schedule",
            Diagnostic::Failure(err) => err.kind(),
        }
    }
}

impl From<HandlerError> for Diagnostic {
    fn from(err: HandlerError) -> Self {
        Diagnostic::Failure(err)
    }
}

/// Receives diagnostics from the handler components
pub trait DiagnosticsSink: Send + Sync {
    fn record(&self, diagnostic: Diagnostic);
}

/// Default sink: structured log line plus a counter per diagnostic kind
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn record(&self, diagnostic: Diagnostic) {
        telemetry::record_diagnostic(diagnostic.kind());

        match &diagnostic {
            Diagnostic::InvalidSchedule {
                schedule_id,
                errors,
            } => {
                warn!(
                    schedule_id = schedule_id.as_deref().unwrap_or("<unknown>"),
                    errors = ?errors,
                    "Received an invalid schedule"
                );
            }
            Diagnostic::Failure(err) => {
                error!(kind = err.kind(), error = %err, "Schedule handling failed");
            }
        }
    }
}

/// Sink that keeps every diagnostic in memory
#[derive(Debug, Default)]
pub struct MemoryDiagnostics {
    recorded: Mutex<Vec<Diagnostic>>,
}

impl MemoryDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<Diagnostic> {
        self.recorded
            .lock()
            .map(|recorded| recorded.clone())
            .unwrap_or_default()
    }

    /// Recorded diagnostic kinds, in order
    pub fn kinds(&self) -> Vec<&'static str> {
        self.recorded().iter().map(Diagnostic::kind).collect()
    }
}

impl DiagnosticsSink for MemoryDiagnostics {
    fn record(&self, diagnostic: Diagnostic) {
        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.push(diagnostic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_diagnostics_records_in_order() {
        let sink = MemoryDiagnostics::new();
        sink.record(Diagnostic::InvalidSchedule {
            schedule_id: Some("s1".to_string()),
            errors: vec!["missing target topic".to_string()],
        });
        sink.record(HandlerError::TypeMismatch("s2".to_string()).into());

        assert_eq!(sink.kinds(), vec!["invalid_schedule", "type_mismatch"]);
    }

    #[test]
    fn test_tracing_diagnostics_does_not_panic() {
        TracingDiagnostics.record(Diagnostic::Failure(HandlerError::Broker {
            code: "disconnected".to_string(),
            message: "connection lost".to_string(),
        }));
    }
}
