use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Closed registry of envelope types exchanged over the session socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvelopeType {
    #[serde(rename = "evi.user_message.final")]
    EviUserMessageFinal,
    #[serde(rename = "evi.assistant_message")]
    EviAssistantMessage,
    #[serde(rename = "evi.chat_metadata")]
    EviChatMetadata,
    #[serde(rename = "client.ping")]
    ClientPing,
    #[serde(rename = "kg.diff")]
    KgDiff,
    #[serde(rename = "kg.tool_calls_applied")]
    KgToolCallsApplied,
    #[serde(rename = "coach.insight")]
    CoachInsight,
    #[serde(rename = "safety.alert")]
    SafetyAlert,
    #[serde(rename = "safety.status")]
    SafetyStatus,
    #[serde(rename = "summary.partial")]
    SummaryPartial,
    #[serde(rename = "server.error")]
    ServerError,
    #[serde(rename = "server.pong")]
    ServerPong,
    #[serde(rename = "server.ack")]
    ServerAck,
}

pub const ENVELOPE_TYPES: &[EnvelopeType] = &[
    EnvelopeType::EviUserMessageFinal,
    EnvelopeType::EviAssistantMessage,
    EnvelopeType::EviChatMetadata,
    EnvelopeType::ClientPing,
    EnvelopeType::KgDiff,
    EnvelopeType::KgToolCallsApplied,
    EnvelopeType::CoachInsight,
    EnvelopeType::SafetyAlert,
    EnvelopeType::SafetyStatus,
    EnvelopeType::SummaryPartial,
    EnvelopeType::ServerError,
    EnvelopeType::ServerPong,
    EnvelopeType::ServerAck,
];

impl EnvelopeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EviUserMessageFinal => "evi.user_message.final",
            Self::EviAssistantMessage => "evi.assistant_message",
            Self::EviChatMetadata => "evi.chat_metadata",
            Self::ClientPing => "client.ping",
            Self::KgDiff => "kg.diff",
            Self::KgToolCallsApplied => "kg.tool_calls_applied",
            Self::CoachInsight => "coach.insight",
            Self::SafetyAlert => "safety.alert",
            Self::SafetyStatus => "safety.status",
            Self::SummaryPartial => "summary.partial",
            Self::ServerError => "server.error",
            Self::ServerPong => "server.pong",
            Self::ServerAck => "server.ack",
        }
    }

    /// True for types the graph projection folds into its state.
    pub fn affects_projection(self) -> bool {
        matches!(
            self,
            Self::KgDiff
                | Self::KgToolCallsApplied
                | Self::CoachInsight
                | Self::SafetyAlert
                | Self::SafetyStatus
                | Self::ServerError
        )
    }

    /// True for types the client produces and sends to the backend.
    pub fn is_client_originated(self) -> bool {
        matches!(
            self,
            Self::EviUserMessageFinal
                | Self::EviAssistantMessage
                | Self::EviChatMetadata
                | Self::ClientPing
        )
    }
}

impl fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported envelope type '{0}'")]
pub struct UnsupportedEnvelopeType(pub String);

impl FromStr for EnvelopeType {
    type Err = UnsupportedEnvelopeType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ENVELOPE_TYPES
            .iter()
            .copied()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| UnsupportedEnvelopeType(value.to_string()))
    }
}

/// Typed wire unit exchanged with the backend in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    pub session_id: String,
    pub sent_at_ms: u64,
    pub payload: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Envelope {
    pub fn new(
        kind: EnvelopeType,
        session_id: impl Into<String>,
        sent_at_ms: u64,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            sent_at_ms,
            payload,
            correlation_id: None,
        }
    }

    /// Builds an outbound envelope, letting `overrides` replace the auto-filled metadata.
    pub fn outbound(
        kind: EnvelopeType,
        session_id: &str,
        now_ms: u64,
        payload: Map<String, Value>,
        overrides: EnvelopeOverrides,
    ) -> Self {
        Self {
            kind,
            session_id: overrides
                .session_id
                .unwrap_or_else(|| session_id.to_string()),
            sent_at_ms: overrides.sent_at_ms.unwrap_or(now_ms),
            payload,
            correlation_id: overrides.correlation_id,
        }
    }

    pub fn payload_value(&self) -> Value {
        Value::Object(self.payload.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvelopeOverrides {
    pub session_id: Option<String>,
    pub sent_at_ms: Option<u64>,
    pub correlation_id: Option<String>,
}

impl EnvelopeOverrides {
    pub fn correlated(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            ..Self::default()
        }
    }
}
