// JSON representation of trigger events published by the scheduler

use crate::models::{Schedule, TriggerEvent};
use serde::{Deserialize, Serialize};

/// Trigger event as it travels on the wire, tagged by `type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerEnvelope {
    Fired {
        schedule: Schedule,
    },
    Missed {
        schedule: Schedule,
    },
    Invalid {
        #[serde(default)]
        schedule_id: Option<String>,
        #[serde(default)]
        errors: Vec<String>,
    },
    #[serde(other)]
    Unknown,
}

impl TriggerEnvelope {
    /// Decode a trigger event, keeping the name of unknown event types
    pub fn decode(payload: &[u8]) -> Result<TriggerEvent, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_slice(payload)?;
        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();

        let envelope: TriggerEnvelope = serde_json::from_value(value)?;
        Ok(match envelope {
            TriggerEnvelope::Unknown => TriggerEvent::Unrecognized { kind },
            known => known.into(),
        })
    }
}

impl From<TriggerEnvelope> for TriggerEvent {
    fn from(envelope: TriggerEnvelope) -> Self {
        match envelope {
            TriggerEnvelope::Fired { schedule } => TriggerEvent::fired(schedule),
            TriggerEnvelope::Missed { schedule } => TriggerEvent::missed(schedule),
            TriggerEnvelope::Invalid {
                schedule_id,
                errors,
            } => TriggerEvent::Invalid {
                schedule_id,
                errors,
            },
            TriggerEnvelope::Unknown => TriggerEvent::Unrecognized {
                kind: String::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_missed_schedule() {
        let payload = json!({
            "type": "missed",
            "schedule": {
                "key": "s1",
                "target_topic": "t1",
                "target_key": "k1",
                "value": [118, 49],
                "timestamp": 1000,
                "origin_topic": "sched-topic"
            }
        });

        let event = TriggerEnvelope::decode(payload.to_string().as_bytes()).unwrap();
        match event {
            TriggerEvent::MissedFired(entry) => {
                let schedule = entry.as_any().downcast_ref::<Schedule>().unwrap();
                assert_eq!(schedule.value, b"v1".to_vec());
                assert!(schedule.headers.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_decode_invalid_schedule() {
        let payload = json!({"type": "invalid", "errors": ["missing target topic"]});

        let event = TriggerEnvelope::decode(payload.to_string().as_bytes()).unwrap();
        match event {
            TriggerEvent::Invalid {
                schedule_id,
                errors,
            } => {
                assert!(schedule_id.is_none());
                assert_eq!(errors, vec!["missing target topic".to_string()]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_decode_unknown_type_keeps_name() {
        let payload = json!({"type": "paused", "schedule_id": "s1"});

        let event = TriggerEnvelope::decode(payload.to_string().as_bytes()).unwrap();
        assert!(matches!(event, TriggerEvent::Unrecognized { ref kind } if kind == "paused"));
    }

    #[test]
    fn test_decode_rejects_malformed_payload() {
        assert!(TriggerEnvelope::decode(b"not json").is_err());
        assert!(TriggerEnvelope::decode(br#"{"type": "fired"}"#).is_err());
    }
}
