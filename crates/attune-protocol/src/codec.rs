use std::str::FromStr;

use serde_json::Value;
use thiserror::Error;

use crate::envelope::{Envelope, EnvelopeType};

/// Failures raised at the envelope trust boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("failed to serialize envelope: {0}")]
    Serialization(String),
    #[error("failed to parse envelope JSON: {0}")]
    Parse(String),
    #[error("invalid envelope; missing or invalid fields: {}", .fields.join(", "))]
    Validation { fields: Vec<&'static str> },
    #[error("unsupported envelope type '{0}'")]
    UnsupportedType(String),
}

pub fn serialize_envelope(envelope: &Envelope) -> Result<String, CodecError> {
    serde_json::to_string(envelope).map_err(|error| CodecError::Serialization(error.to_string()))
}

/// Serializes an untyped outbound packet, rejecting anything that is not a JSON object.
pub fn serialize_value(value: &Value) -> Result<String, CodecError> {
    if !value.is_object() {
        return Err(CodecError::Serialization(
            "packet must be a non-null JSON object".to_string(),
        ));
    }
    serde_json::to_string(value).map_err(|error| CodecError::Serialization(error.to_string()))
}

pub fn parse_envelope_bytes(raw: &[u8]) -> Result<Envelope, CodecError> {
    let text = std::str::from_utf8(raw)
        .map_err(|error| CodecError::Parse(format!("payload is not valid utf-8: {error}")))?;
    parse_envelope(text)
}

/// Decodes and validates one inbound envelope.
///
/// Structural validation reports every missing or mistyped field at once;
/// the type check against the registry runs only on a structurally valid
/// envelope.
pub fn parse_envelope(raw: &str) -> Result<Envelope, CodecError> {
    if raw.trim().is_empty() {
        return Err(CodecError::Parse("payload is empty".to_string()));
    }
    let value =
        serde_json::from_str::<Value>(raw).map_err(|error| CodecError::Parse(error.to_string()))?;
    let Value::Object(object) = value else {
        return Err(CodecError::Validation {
            fields: vec!["type", "session_id", "sent_at_ms", "payload"],
        });
    };

    let mut invalid = Vec::new();
    let kind = object.get("type").and_then(Value::as_str);
    if kind.is_none() {
        invalid.push("type");
    }
    let session_id = object.get("session_id").and_then(Value::as_str);
    if session_id.is_none() {
        invalid.push("session_id");
    }
    let sent_at_ms = object.get("sent_at_ms").and_then(read_millis);
    if sent_at_ms.is_none() {
        invalid.push("sent_at_ms");
    }
    let payload = object.get("payload").and_then(Value::as_object);
    if payload.is_none() {
        invalid.push("payload");
    }
    let correlation_id = match object.get("correlation_id") {
        None | Some(Value::Null) => None,
        Some(Value::String(value)) => Some(value.clone()),
        Some(_) => {
            invalid.push("correlation_id");
            None
        }
    };

    let (Some(kind), Some(session_id), Some(sent_at_ms), Some(payload), true) =
        (kind, session_id, sent_at_ms, payload, invalid.is_empty())
    else {
        return Err(CodecError::Validation { fields: invalid });
    };

    let kind = EnvelopeType::from_str(kind.trim())
        .map_err(|error| CodecError::UnsupportedType(error.0))?;

    Ok(Envelope {
        kind,
        session_id: session_id.to_string(),
        sent_at_ms,
        payload: payload.clone(),
        correlation_id,
    })
}

fn read_millis(value: &Value) -> Option<u64> {
    if let Some(millis) = value.as_u64() {
        return Some(millis);
    }
    match value.as_f64() {
        Some(millis) if millis.is_finite() && millis >= 0.0 => Some(millis as u64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{
        parse_envelope, parse_envelope_bytes, serialize_envelope, serialize_value, CodecError,
    };
    use crate::envelope::{Envelope, EnvelopeType};

    fn diff_frame() -> Value {
        json!({
            "type": "kg.diff",
            "session_id": "s-1",
            "sent_at_ms": 1_700_000_000_000_u64,
            "payload": {"nodes_upsert": [], "edges_upsert": [], "receipts": []},
            "correlation_id": "corr-9"
        })
    }

    #[test]
    fn unit_parse_envelope_accepts_registered_frame() {
        let envelope = parse_envelope(&diff_frame().to_string()).expect("valid frame");
        assert_eq!(envelope.kind, EnvelopeType::KgDiff);
        assert_eq!(envelope.session_id, "s-1");
        assert_eq!(envelope.sent_at_ms, 1_700_000_000_000);
        assert_eq!(envelope.correlation_id.as_deref(), Some("corr-9"));
        assert!(envelope.payload.contains_key("nodes_upsert"));
    }

    #[test]
    fn unit_parse_envelope_rejects_malformed_json() {
        let error = parse_envelope("{not json").expect_err("malformed");
        assert!(matches!(error, CodecError::Parse(_)));
        let error = parse_envelope("   ").expect_err("empty");
        assert!(matches!(error, CodecError::Parse(_)));
    }

    #[test]
    fn functional_validation_error_lists_every_invalid_field() {
        let raw = json!({"type": 7, "payload": null}).to_string();
        let error = parse_envelope(&raw).expect_err("invalid");
        assert_eq!(
            error,
            CodecError::Validation {
                fields: vec!["type", "session_id", "sent_at_ms", "payload"],
            }
        );
        assert_eq!(
            error.to_string(),
            "invalid envelope; missing or invalid fields: type, session_id, sent_at_ms, payload"
        );
    }

    #[test]
    fn functional_validation_rejects_primitive_payload_and_array_root() {
        let mut frame = diff_frame();
        frame["payload"] = json!("text");
        let error = parse_envelope(&frame.to_string()).expect_err("primitive payload");
        assert_eq!(error, CodecError::Validation { fields: vec!["payload"] });

        let error = parse_envelope("[1,2]").expect_err("array root");
        assert!(matches!(error, CodecError::Validation { .. }));
    }

    #[test]
    fn regression_unknown_type_is_rejected_after_structural_validation() {
        let mut frame = diff_frame();
        frame["type"] = json!("kg.teleport");
        let error = parse_envelope(&frame.to_string()).expect_err("unknown type");
        assert_eq!(error, CodecError::UnsupportedType("kg.teleport".to_string()));
    }

    #[test]
    fn regression_fractional_timestamp_is_truncated_not_rejected() {
        let mut frame = diff_frame();
        frame["sent_at_ms"] = json!(1_700_000_000_000.75_f64);
        let envelope = parse_envelope(&frame.to_string()).expect("fractional timestamp");
        assert_eq!(envelope.sent_at_ms, 1_700_000_000_000);

        frame["sent_at_ms"] = json!(-5);
        assert!(parse_envelope(&frame.to_string()).is_err());
    }

    #[test]
    fn unit_parse_envelope_bytes_rejects_invalid_utf8() {
        let error = parse_envelope_bytes(&[0xff, 0xfe]).expect_err("invalid utf-8");
        assert!(matches!(error, CodecError::Parse(_)));
        let envelope =
            parse_envelope_bytes(diff_frame().to_string().as_bytes()).expect("valid bytes");
        assert_eq!(envelope.kind, EnvelopeType::KgDiff);
    }

    #[test]
    fn functional_serialize_envelope_uses_snake_case_wire_keys() {
        let mut payload = Map::new();
        payload.insert("content".to_string(), json!("hello"));
        let envelope = Envelope::new(EnvelopeType::EviAssistantMessage, "s-2", 10, payload);
        let raw = serialize_envelope(&envelope).expect("serialize");
        let decoded: Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(decoded["type"], "evi.assistant_message");
        assert_eq!(decoded["session_id"], "s-2");
        assert_eq!(decoded["sent_at_ms"], 10);
        assert!(decoded.get("correlation_id").is_none());
        assert_eq!(parse_envelope(&raw).expect("reparse"), envelope);
    }

    #[test]
    fn unit_serialize_value_rejects_non_objects() {
        assert!(matches!(
            serialize_value(&Value::Null),
            Err(CodecError::Serialization(_))
        ));
        assert!(matches!(
            serialize_value(&json!([1])),
            Err(CodecError::Serialization(_))
        ));
        assert_eq!(serialize_value(&json!({"a": 1})).expect("object"), "{\"a\":1}");
    }
}
