// Schedule, trigger event and outbound message models

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Header carrying the trigger time of the originating schedule
pub const ORIGINAL_TIMESTAMP_HEADER: &str = "scheduler-timestamp";
/// Header carrying the key of the originating schedule
pub const ORIGINAL_KEY_HEADER: &str = "scheduler-key";
/// Header carrying the topic the schedule was read from
pub const ORIGINAL_TOPIC_HEADER: &str = "scheduler-topic";

/// A single message header. Order is significant and duplicates are allowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub key: String,
    pub value: Vec<u8>,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// First non-empty value stored under `key`
pub fn header_value<'a>(headers: &'a [Header], key: &str) -> Option<&'a [u8]> {
    headers
        .iter()
        .find(|header| header.key == key && !header.value.is_empty())
        .map(|header| header.value.as_slice())
}

/// A schedule read from the scheduler topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Unique schedule key in the scheduler topic
    pub key: String,
    /// Topic the payload is delivered to
    pub target_topic: String,
    /// Key of the delivered message
    pub target_key: String,
    /// Opaque payload
    #[serde(default)]
    pub value: Vec<u8>,
    /// Trigger time in epoch seconds
    pub timestamp: i64,
    /// Scheduler topic the schedule came from
    pub origin_topic: String,
    #[serde(default)]
    pub headers: Vec<Header>,
}

impl Schedule {
    /// The three reserved headers identifying this schedule
    pub fn reserved_headers(&self) -> [Header; 3] {
        [
            Header::new(ORIGINAL_TIMESTAMP_HEADER, self.timestamp.to_string()),
            Header::new(ORIGINAL_KEY_HEADER, self.key.as_str()),
            Header::new(ORIGINAL_TOPIC_HEADER, self.origin_topic.as_str()),
        ]
    }
}

/// A schedule as handed over by a scheduler.
///
/// Event sources may carry schedules of other representations; the
/// dispatcher only publishes entries that downcast to [`Schedule`].
pub trait ScheduleEntry: fmt::Debug + Send + Sync + 'static {
    fn id(&self) -> &str;
    fn as_any(&self) -> &dyn Any;
}

impl ScheduleEntry for Schedule {
    fn id(&self) -> &str {
        &self.key
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Notification emitted by the scheduler
#[derive(Debug, Clone)]
pub enum TriggerEvent {
    /// The schedule is due now
    Fired(Arc<dyn ScheduleEntry>),
    /// The schedule fired after its due time; published like `Fired`
    MissedFired(Arc<dyn ScheduleEntry>),
    /// The schedule definition was malformed
    Invalid {
        schedule_id: Option<String>,
        errors: Vec<String>,
    },
    /// An event kind this handler does not know about
    Unrecognized { kind: String },
}

impl TriggerEvent {
    pub fn fired(schedule: Schedule) -> Self {
        TriggerEvent::Fired(Arc::new(schedule))
    }

    pub fn missed(schedule: Schedule) -> Self {
        TriggerEvent::MissedFired(Arc::new(schedule))
    }

    pub fn kind(&self) -> &str {
        match self {
            TriggerEvent::Fired(_) => "fired",
            TriggerEvent::MissedFired(_) => "missed",
            TriggerEvent::Invalid { .. } => "invalid",
            TriggerEvent::Unrecognized { kind } => kind,
        }
    }
}

/// Role of a message produced by the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Target,
    DeletionMarker,
    History,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Target => "target",
            MessageKind::DeletionMarker => "deletion_marker",
            MessageKind::History => "history",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message handed to the broker. Partition selection is left to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub key: Vec<u8>,
    /// Empty value marks a deletion marker
    pub value: Vec<u8>,
    pub headers: Vec<Header>,
}

impl OutboundMessage {
    pub fn is_deletion_marker(&self) -> bool {
        self.value.is_empty()
    }

    pub fn key_lossy(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }
}
