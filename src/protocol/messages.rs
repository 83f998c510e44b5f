//! Telemetry and command message types
//!
//! Telemetry is a fixed-schema JSON object. Unavailable sensor readings are
//! `None` and serialise as `null`, so every field is always present.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Largest payload the broker accepts (AWS IoT Core message size limit)
pub const MAX_PAYLOAD_BYTES: usize = 128 * 1024;

/// One telemetry reading, built fresh per publish cycle and discarded after
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub device_id: String,
    pub timestamp_ms: u64,
    pub air_temp_c: Option<f32>,
    pub air_humidity_pct: Option<f32>,
    pub soil_moisture_pct: Option<f32>,
    pub soil_temp_c: Option<f32>,
}

impl TelemetrySample {
    /// Serialise to the publish payload
    ///
    /// Writes into a growable buffer, so the payload is never truncated.
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

/// What an inbound message surfaced
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Value of the well-known `message` field
    Message(String),
    /// Valid JSON without a `message` field, echoed as received
    Raw(String),
}

/// Inbound payload that is not valid JSON
#[derive(Debug, Error)]
#[error("Malformed message on '{topic}': {source}")]
pub struct ParseError {
    pub topic: String,
    pub raw: String,
    #[source]
    pub source: serde_json::Error,
}

/// Parse an inbound command payload (pure function)
pub fn parse_command(topic: &str, payload: &[u8]) -> Result<Command, ParseError> {
    let document: Value = serde_json::from_slice(payload).map_err(|source| ParseError {
        topic: topic.to_string(),
        raw: String::from_utf8_lossy(payload).into_owned(),
        source,
    })?;

    Ok(match document.get("message") {
        Some(Value::String(message)) => Command::Message(message.clone()),
        Some(other) => Command::Message(other.to_string()),
        None => Command::Raw(String::from_utf8_lossy(payload).into_owned()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TelemetrySample {
        TelemetrySample {
            device_id: "dev1".to_string(),
            timestamp_ms: 1000,
            air_temp_c: Some(21.5),
            air_humidity_pct: Some(55.0),
            soil_moisture_pct: Some(40.0),
            soil_temp_c: Some(18.2),
        }
    }

    #[test]
    fn test_payload_field_names() {
        let payload = sample().to_payload().unwrap();
        let value: Value = serde_json::from_slice(&payload).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object.len(), 6);
        for field in [
            "device_id",
            "timestamp_ms",
            "air_temp_c",
            "air_humidity_pct",
            "soil_moisture_pct",
            "soil_temp_c",
        ] {
            assert!(object.contains_key(field), "missing field {field}");
        }
        assert_eq!(value["device_id"], "dev1");
        assert_eq!(value["timestamp_ms"], 1000);
    }

    #[test]
    fn test_unavailable_reading_serialises_as_null() {
        let mut sample = sample();
        sample.soil_temp_c = None;

        let payload = sample.to_payload().unwrap();
        let value: Value = serde_json::from_slice(&payload).unwrap();
        assert!(value["soil_temp_c"].is_null());

        let parsed = TelemetrySample::from_payload(&payload).unwrap();
        assert_eq!(parsed.soil_temp_c, None);
    }

    #[test]
    fn test_payload_exceeds_old_fixed_buffer() {
        let mut sample = sample();
        sample.device_id = "d".repeat(400);
        let payload = sample.to_payload().unwrap();
        assert!(payload.len() > 400);
        assert_eq!(TelemetrySample::from_payload(&payload).unwrap(), sample);
    }

    #[test]
    fn test_parse_command_message_field() {
        let command = parse_command("t", br#"{"message":"water now"}"#).unwrap();
        assert_eq!(command, Command::Message("water now".to_string()));
    }

    #[test]
    fn test_parse_command_non_string_message() {
        let command = parse_command("t", br#"{"message":{"pump":true}}"#).unwrap();
        assert_eq!(command, Command::Message(r#"{"pump":true}"#.to_string()));
    }

    #[test]
    fn test_parse_command_without_message_echoes_raw() {
        let payload = br#"{"action":"reboot"}"#;
        let command = parse_command("t", payload).unwrap();
        assert_eq!(command, Command::Raw(r#"{"action":"reboot"}"#.to_string()));
    }

    #[test]
    fn test_parse_command_malformed() {
        let error = parse_command("cmd/topic", b"\xffnot json").unwrap_err();
        assert_eq!(error.topic, "cmd/topic");
        assert!(error.raw.contains("not json"));
        assert!(error.to_string().starts_with("Malformed message on 'cmd/topic'"));
    }
}
