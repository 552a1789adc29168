// Error handling framework for the schedule handler

use thiserror::Error;

/// Errors raised while turning trigger events into broker operations.
///
/// Only `Config` and `Connection` abort construction; every other variant is
/// recorded through the diagnostics sink where it occurs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to connect to broker: {0}")]
    Connection(String),

    #[error("Failed to submit message to topic '{topic}': {reason}")]
    Submission { topic: String, reason: String },

    #[error("Delivery failed for message with key '{key}' on topic '{topic}': {reason}")]
    Delivery {
        topic: String,
        key: String,
        reason: String,
    },

    #[error("Missing correlation data: {0}")]
    MissingCorrelationData(String),

    #[error("Unexpected schedule type: {0}")]
    TypeMismatch(String),

    #[error("Broker error ({code}): {message}")]
    Broker { code: String, message: String },

    #[error("Unexpected event type: {0}")]
    UnexpectedEvent(String),

    #[error("Handler is closed, rejecting {0}")]
    Closed(String),
}

impl HandlerError {
    /// Short label used in logs and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::Config(_) => "config",
            HandlerError::Connection(_) => "connection",
            HandlerError::Submission { .. } => "submission",
            HandlerError::Delivery { .. } => "delivery",
            HandlerError::MissingCorrelationData(_) => "missing_correlation_data",
            HandlerError::TypeMismatch(_) => "type_mismatch",
            HandlerError::Broker { .. } => "broker",
            HandlerError::UnexpectedEvent(_) => "unexpected_event",
            HandlerError::Closed(_) => "closed",
        }
    }
}

/// Queue-related errors reported by broker adapters
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to connect to queue: {0}")]
    Connection(String),

    #[error("Failed to publish message: {0}")]
    PublishFailed(String),

    #[error("Queue is closed: {0}")]
    Closed(String),

    #[error("Queue operation timeout: {0}")]
    Timeout(String),
}

impl QueueError {
    /// Wrap a transport error as a submission failure for `topic`
    pub fn into_submission(self, topic: &str) -> HandlerError {
        HandlerError::Submission {
            topic: topic.to_string(),
            reason: self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_error_display() {
        let err = HandlerError::Submission {
            topic: "t1".to_string(),
            reason: "buffer full".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to submit message to topic 't1': buffer full"
        );
    }

    #[test]
    fn test_delivery_error_mentions_key() {
        let err = HandlerError::Delivery {
            topic: "t1".to_string(),
            key: "k1".to_string(),
            reason: "no responders".to_string(),
        };
        assert!(err.to_string().contains("'k1'"));
        assert_eq!(err.kind(), "delivery");
    }

    #[test]
    fn test_queue_error_into_submission() {
        let err = QueueError::PublishFailed("connection reset".to_string()).into_submission("t1");
        match err {
            HandlerError::Submission { topic, reason } => {
                assert_eq!(topic, "t1");
                assert!(reason.contains("connection reset"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
