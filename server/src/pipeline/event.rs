//! Decoded inbound events.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::decrypt::DecryptError;

/// One inbound event, decoded and ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineEvent {
    pub event_id: String,
    pub event_type: String,
    /// Full decoded body, envelope included.
    pub raw_payload: Value,
    /// When the platform created the event.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct EventHeader {
    event_id: String,
    event_type: String,
    #[serde(default)]
    create_time: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct LegacyEvent {
    #[serde(rename = "type")]
    event_type: String,
}

impl PipelineEvent {
    /// Parse a decoded JSON body.
    ///
    /// Accepts the current envelope (`header.event_id`, `header.event_type`,
    /// `header.create_time` in milliseconds) and the legacy one (`uuid`,
    /// `event.type`, `ts` in seconds).
    pub fn from_json(body: &[u8]) -> Result<Self, DecryptError> {
        let payload: Value = serde_json::from_slice(body)?;

        if let Some(header) = payload.get("header") {
            let header = EventHeader::deserialize(header)?;
            return Self::build(
                header.event_id,
                header.event_type,
                header.create_time.as_ref().and_then(millis_timestamp),
                payload,
            );
        }

        let event_id = payload
            .get("uuid")
            .and_then(Value::as_str)
            .ok_or(DecryptError::MissingField("header.event_id"))?
            .to_string();
        let event = payload
            .get("event")
            .ok_or(DecryptError::MissingField("event"))?;
        let event_type = LegacyEvent::deserialize(event)?.event_type;
        let created_at = payload.get("ts").and_then(seconds_timestamp);

        Self::build(event_id, event_type, created_at, payload)
    }

    fn build(
        event_id: String,
        event_type: String,
        created_at: Option<DateTime<Utc>>,
        raw_payload: Value,
    ) -> Result<Self, DecryptError> {
        // A blank id still dispatches; dedup ignores it.
        if event_type.is_empty() {
            return Err(DecryptError::MissingField("event_type"));
        }
        Ok(Self {
            event_id,
            event_type,
            raw_payload,
            created_at: created_at.unwrap_or_else(Utc::now),
        })
    }

    /// The `event` object of the envelope, if present.
    pub fn body(&self) -> Option<&Value> {
        self.raw_payload.get("event")
    }
}

/// Timestamps arrive as numbers or numeric strings.
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn millis_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let millis = numeric(value)?;
    Utc.timestamp_millis_opt(millis as i64).single()
}

fn seconds_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let secs = numeric(value)?;
    Utc.timestamp_millis_opt((secs * 1000.0) as i64).single()
}
