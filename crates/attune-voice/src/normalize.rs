use attune_protocol::{MessageRole, ProsodyScores};
use serde::Serialize;
use serde_json::{json, Value};

pub const RAW_USER_MESSAGE: &str = "user_message";
pub const RAW_ASSISTANT_MESSAGE: &str = "assistant_message";
pub const RAW_CHAT_METADATA: &str = "chat_metadata";

const CONTENT_KEYS: &[&str] = &["content", "message", "text", "transcript", "message_text"];
const PART_TEXT_KEYS: &[&str] = &["text", "content", "message", "value"];
const OBJECT_TEXT_KEYS: &[&str] = &["text", "content", "message"];

/// Voice-SDK event kinds the forwarder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceEventKind {
    UserMessage,
    AssistantMessage,
    ChatMetadata,
}

impl VoiceEventKind {
    pub fn from_raw_type(raw_type: &str) -> Option<Self> {
        match raw_type {
            RAW_USER_MESSAGE => Some(Self::UserMessage),
            RAW_ASSISTANT_MESSAGE => Some(Self::AssistantMessage),
            RAW_CHAT_METADATA => Some(Self::ChatMetadata),
            _ => None,
        }
    }

    fn fallback_role(self) -> MessageRole {
        match self {
            Self::AssistantMessage => MessageRole::Assistant,
            Self::UserMessage | Self::ChatMetadata => MessageRole::User,
        }
    }
}

/// Canonical form of a user or assistant message event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedMessage {
    #[serde(rename = "type")]
    pub event_type: String,
    pub message_id: String,
    pub role: String,
    pub content: String,
    pub interim: bool,
    pub prosody_scores: Option<ProsodyScores>,
    pub timestamp_ms: u64,
    pub raw_event: Value,
}

impl NormalizedMessage {
    /// Role as a transcript role; unknown role strings fall back to `fallback`.
    pub fn transcript_role(&self, fallback: MessageRole) -> MessageRole {
        match self.role.as_str() {
            "user" => MessageRole::User,
            "assistant" => MessageRole::Assistant,
            _ => fallback,
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "type": self.event_type,
            "message_id": self.message_id,
            "role": self.role,
            "content": self.content,
            "interim": self.interim,
            "prosody_scores": self.prosody_scores,
            "timestamp_ms": self.timestamp_ms,
            "raw_event": self.raw_event,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMetadata {
    pub timestamp_ms: u64,
    pub chat_group_id: Option<String>,
    pub chat_id: Option<String>,
    pub raw_event: Value,
}

impl ChatMetadata {
    pub fn from_raw(raw: &Value, now_ms: u64) -> Self {
        Self {
            timestamp_ms: read_timestamp_ms(raw, now_ms),
            chat_group_id: first_identifier(raw, &["chat_group_id", "chatGroupId"]),
            chat_id: first_identifier(raw, &["chat_id", "chatId"]),
            raw_event: raw.clone(),
        }
    }

    /// Wire payload forwarded as `evi.chat_metadata`.
    pub fn to_payload(&self) -> Value {
        json!({
            "timestamp_ms": self.timestamp_ms,
            "raw_event": self.raw_event,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedVoiceEvent {
    Message(NormalizedMessage),
    ChatMetadata(ChatMetadata),
}

/// Declared event type, read from `type`, `message_type` or `messageType`.
pub fn raw_event_type(raw: &Value) -> Option<&str> {
    ["type", "message_type", "messageType"]
        .iter()
        .find_map(|key| raw.get(*key).and_then(Value::as_str))
        .filter(|value| !value.is_empty())
}

/// Maps a raw SDK event to its canonical shape. Unrecognized kinds yield `None`.
pub fn normalize(raw: &Value, now_ms: u64) -> Option<NormalizedVoiceEvent> {
    let kind = raw_event_type(raw).and_then(VoiceEventKind::from_raw_type)?;
    Some(match kind {
        VoiceEventKind::ChatMetadata => {
            NormalizedVoiceEvent::ChatMetadata(ChatMetadata::from_raw(raw, now_ms))
        }
        VoiceEventKind::UserMessage | VoiceEventKind::AssistantMessage => {
            NormalizedVoiceEvent::Message(normalize_message(raw, kind, now_ms))
        }
    })
}

pub(crate) fn normalize_message(
    raw: &Value,
    kind: VoiceEventKind,
    now_ms: u64,
) -> NormalizedMessage {
    let fallback_role = kind.fallback_role().as_str();
    let content = CONTENT_KEYS
        .iter()
        .find_map(|key| raw.get(*key).filter(|value| !value.is_null()))
        .map(flatten_text)
        .unwrap_or_default();
    let message_id = first_identifier(raw, &["message_id", "messageId", "id"])
        .unwrap_or_else(|| format!("{fallback_role}-{now_ms}"));
    let role = raw
        .get("role")
        .and_then(Value::as_str)
        .filter(|role| !role.is_empty())
        .unwrap_or(fallback_role)
        .to_string();
    let interim = ["interim", "is_interim"]
        .iter()
        .find_map(|key| raw.get(*key).filter(|value| !value.is_null()))
        .is_some_and(is_truthy);

    NormalizedMessage {
        event_type: raw_event_type(raw).unwrap_or_default().to_string(),
        message_id,
        role,
        content,
        interim,
        prosody_scores: read_prosody_scores(raw),
        timestamp_ms: read_timestamp_ms(raw, now_ms),
        raw_event: raw.clone(),
    }
}

/// Flattens string, array-of-parts and object content shapes into plain text.
pub fn flatten_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .map(|part| match part {
                Value::String(text) => text.as_str(),
                Value::Object(_) => first_str(part, PART_TEXT_KEYS).unwrap_or_default(),
                _ => "",
            })
            .collect::<String>()
            .trim()
            .to_string(),
        Value::Object(_) => first_str(value, OBJECT_TEXT_KEYS)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

/// Expression scores from `prosody_scores`, `prosodyScores` or the SDK's
/// `models.prosody.scores` / `models.prosody.top`. Only numeric entries are kept.
pub fn read_prosody_scores(raw: &Value) -> Option<ProsodyScores> {
    let candidate = raw
        .get("prosody_scores")
        .filter(|value| !value.is_null())
        .or_else(|| raw.get("prosodyScores").filter(|value| !value.is_null()))
        .or_else(|| {
            let prosody = raw.get("models")?.get("prosody")?;
            prosody
                .get("scores")
                .filter(|value| !value.is_null())
                .or_else(|| prosody.get("top").filter(|value| !value.is_null()))
        })?;
    let Value::Object(entries) = candidate else {
        return None;
    };
    Some(
        entries
            .iter()
            .filter_map(|(label, score)| score.as_f64().map(|score| (label.clone(), score)))
            .collect(),
    )
}

pub fn read_timestamp_ms(raw: &Value, now_ms: u64) -> u64 {
    ["timestamp_ms", "timestampMs", "timestamp"]
        .iter()
        .find_map(|key| {
            let value = raw.get(*key)?;
            value.as_u64().or_else(|| {
                value
                    .as_f64()
                    .filter(|millis| millis.is_finite() && *millis >= 0.0)
                    .map(|millis| millis as u64)
            })
        })
        .unwrap_or(now_ms)
}

fn first_str<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| value.get(*key).filter(|value| !value.is_null()))
        .and_then(Value::as_str)
}

fn first_identifier(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match raw.get(*key)? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
