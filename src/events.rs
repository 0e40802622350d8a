//! Inbound event decoding
//!
//! Turns a raw `(topic, payload)` pair from the broker into a typed event.
//! Decoding never touches the backing store.
//!
//! Recognised topics:
//!
//! - `status/<device_id>`: payload `1` means online, anything else offline
//! - `tasks/update`: JSON object `{"c": "<character rfid>", "s": "<supervisor rfid>"}`
//!
//! Every other topic decodes to [`BridgeEvent::Unrecognized`].

use serde::Deserialize;
use thiserror::Error;

/// Prefix of device status topics
pub const STATUS_TOPIC_PREFIX: &str = "status/";

/// Topic carrying RFID task completions
pub const TASK_UPDATE_TOPIC: &str = "tasks/update";

/// Subscription filters the bridge needs at connection time
pub const SUBSCRIPTION_FILTERS: [&str; 2] = ["status/+", TASK_UPDATE_TOPIC];

/// Device presence change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub device_id: String,
    pub online: bool,
}

/// An RFID tap: a character tag presented at a supervisor's post
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaskUpdateEvent {
    #[serde(rename = "c")]
    pub character_rfid: String,
    #[serde(rename = "s")]
    pub supervisor_rfid: String,
}

/// Decoded form of an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    Status(StatusEvent),
    TaskUpdate(TaskUpdateEvent),
    Unrecognized,
}

impl BridgeEvent {
    /// Short label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeEvent::Status(_) => "status",
            BridgeEvent::TaskUpdate(_) => "task_update",
            BridgeEvent::Unrecognized => "unrecognized",
        }
    }
}

/// Payload could not be turned into an event for a recognised topic
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Status topic '{topic}' carries no device id")]
    MissingDeviceId { topic: String },

    #[error("Task update payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("Task update payload is not a valid {{\"c\", \"s\"}} object: {0}")]
    InvalidTaskPayload(#[source] serde_json::Error),
}

/// Decode one broker message (pure function)
pub fn decode(topic: &str, payload: &[u8]) -> Result<BridgeEvent, DecodeError> {
    if let Some(rest) = topic.strip_prefix(STATUS_TOPIC_PREFIX) {
        return decode_status(topic, rest, payload).map(BridgeEvent::Status);
    }

    if topic == TASK_UPDATE_TOPIC {
        return decode_task_update(payload).map(BridgeEvent::TaskUpdate);
    }

    Ok(BridgeEvent::Unrecognized)
}

/// Online iff the payload is exactly `1`
pub fn is_online_payload(payload: &[u8]) -> bool {
    payload == b"1"
}

fn decode_status(topic: &str, rest: &str, payload: &[u8]) -> Result<StatusEvent, DecodeError> {
    // `status/+` only delivers one level, but a multi-level topic still
    // resolves to its first segment.
    let device_id = rest.split('/').next().unwrap_or_default();
    if device_id.is_empty() {
        return Err(DecodeError::MissingDeviceId {
            topic: topic.to_string(),
        });
    }

    Ok(StatusEvent {
        device_id: device_id.to_string(),
        online: is_online_payload(payload),
    })
}

fn decode_task_update(payload: &[u8]) -> Result<TaskUpdateEvent, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(|_| DecodeError::InvalidUtf8)?;
    serde_json::from_str(text).map_err(DecodeError::InvalidTaskPayload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_status_online() {
        let event = decode("status/esp42", b"1").unwrap();
        assert_eq!(
            event,
            BridgeEvent::Status(StatusEvent {
                device_id: "esp42".to_string(),
                online: true,
            })
        );
    }

    #[test]
    fn test_decode_status_offline_for_anything_else() {
        let payloads: [&[u8]; 6] = [b"0", b"", b"11", b" 1", b"true", b"\xff\xfe"];
        for payload in payloads {
            match decode("status/esp42", payload).unwrap() {
                BridgeEvent::Status(status) => assert!(!status.online, "payload {payload:?}"),
                other => panic!("Expected status event, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_decode_status_uses_first_segment() {
        match decode("status/esp7/extra", b"1").unwrap() {
            BridgeEvent::Status(status) => assert_eq!(status.device_id, "esp7"),
            other => panic!("Expected status event, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_status_without_device_id() {
        let result = decode("status/", b"1");
        assert!(matches!(result, Err(DecodeError::MissingDeviceId { .. })));
    }

    #[test]
    fn test_decode_task_update() {
        let event = decode("tasks/update", br#"{"c":"RFID123","s":"RFID999"}"#).unwrap();
        assert_eq!(
            event,
            BridgeEvent::TaskUpdate(TaskUpdateEvent {
                character_rfid: "RFID123".to_string(),
                supervisor_rfid: "RFID999".to_string(),
            })
        );
    }

    #[test]
    fn test_decode_task_update_ignores_extra_fields() {
        let event = decode("tasks/update", br#"{"c":"A","s":"B","rssi":-40}"#).unwrap();
        assert_eq!(event.kind(), "task_update");
    }

    #[test]
    fn test_decode_task_update_rejects_plain_text() {
        let result = decode("tasks/update", b"RFID123 RFID999");
        assert!(matches!(result, Err(DecodeError::InvalidTaskPayload(_))));
    }

    #[test]
    fn test_decode_task_update_rejects_missing_field() {
        let result = decode("tasks/update", br#"{"c":"RFID123"}"#);
        assert!(matches!(result, Err(DecodeError::InvalidTaskPayload(_))));
    }

    #[test]
    fn test_decode_task_update_rejects_non_string_fields() {
        let result = decode("tasks/update", br#"{"c":123,"s":999}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_task_update_rejects_invalid_utf8() {
        let result = decode("tasks/update", b"\xff\xfe");
        assert!(matches!(result, Err(DecodeError::InvalidUtf8)));
    }

    #[test]
    fn test_decode_unrecognized_topics() {
        for topic in ["tasks/update/extra", "status", "statusx/esp1", "devices/esp1", ""] {
            assert_eq!(
                decode(topic, b"1").unwrap(),
                BridgeEvent::Unrecognized,
                "topic {topic}"
            );
        }
    }
}
