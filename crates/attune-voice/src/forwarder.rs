use std::sync::Arc;

use attune_core::Clock;
use attune_protocol::{EnvelopeType, MessageRole, ProsodyScores, TranscriptEntry};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::dedupe::DedupeCache;
use crate::normalize::{
    normalize_message, raw_event_type, ChatMetadata, NormalizedMessage, VoiceEventKind,
};

pub const DEFAULT_DEDUPE_WINDOW_MS: u64 = 750;
pub const DEFAULT_DEDUPE_CACHE_BOUND: usize = 200;
pub const DEFAULT_MAX_TRANSCRIPT_ENTRIES: usize = 100;
pub const INTERIM_USER_MESSAGE_TYPE: &str = "evi.user_message.interim";

const NO_SESSION: &str = "no-session";

/// Destination for forwarded envelopes. Returns whether the envelope was
/// accepted (sent or queued).
pub trait EnvelopeSink: Send + Sync {
    fn send_envelope(&self, kind: EnvelopeType, payload: Map<String, Value>) -> bool;
}

impl<F> EnvelopeSink for F
where
    F: Fn(EnvelopeType, Map<String, Value>) -> bool + Send + Sync,
{
    fn send_envelope(&self, kind: EnvelopeType, payload: Map<String, Value>) -> bool {
        self(kind, payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwarderConfig {
    pub dedupe_window_ms: u64,
    pub dedupe_cache_bound: usize,
    pub max_transcript_entries: usize,
    pub forward_assistant_messages: bool,
    pub forward_chat_metadata: bool,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            dedupe_window_ms: DEFAULT_DEDUPE_WINDOW_MS,
            dedupe_cache_bound: DEFAULT_DEDUPE_CACHE_BOUND,
            max_transcript_entries: DEFAULT_MAX_TRANSCRIPT_ENTRIES,
            forward_assistant_messages: true,
            forward_chat_metadata: true,
        }
    }
}

/// Why an event was or was not sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardDisposition {
    Sent,
    SuppressedDuplicate,
    InterimNotForwarded,
    DisabledByConfig,
    SinkRejected,
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForwardOutcome {
    pub forwarded: bool,
    #[serde(rename = "type")]
    pub envelope_type: String,
    pub payload: Value,
    pub disposition: ForwardDisposition,
}

impl ForwardOutcome {
    fn new(
        disposition: ForwardDisposition,
        envelope_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            forwarded: disposition == ForwardDisposition::Sent,
            envelope_type: envelope_type.into(),
            payload,
            disposition,
        }
    }

    /// Chat group identifiers carried by a chat-metadata outcome.
    pub fn chat_metadata(&self) -> Option<ChatMetadata> {
        if self.envelope_type != EnvelopeType::EviChatMetadata.as_str() {
            return None;
        }
        let raw = self.payload.get("raw_event")?;
        let timestamp_ms = self
            .payload
            .get("timestamp_ms")
            .and_then(Value::as_u64)
            .unwrap_or_default();
        Some(ChatMetadata::from_raw(raw, timestamp_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProsodyFrame {
    pub message_id: String,
    pub role: String,
    pub prosody_scores: ProsodyScores,
    pub timestamp_ms: u64,
    pub raw_event: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForwardedEvent {
    #[serde(rename = "type")]
    pub envelope_type: EnvelopeType,
    pub payload: Value,
    pub sent_at_ms: u64,
}

/// Normalizes raw voice-SDK events, keeps the live transcript and forwards the
/// backend-relevant subset through an [`EnvelopeSink`].
///
/// Interim user messages update the transcript but are never sent. Final
/// messages and chat metadata pass through a sliding-window dedupe keyed on
/// `session:type:message_id:content`.
pub struct EventForwarder {
    config: ForwarderConfig,
    session_id: Option<String>,
    sink: Option<Arc<dyn EnvelopeSink>>,
    clock: Arc<dyn Clock>,
    dedupe: DedupeCache,
    transcript: Vec<TranscriptEntry>,
    latest_prosody_frame: Option<ProsodyFrame>,
    last_forwarded_event: Option<ForwardedEvent>,
    consumed: usize,
}

impl EventForwarder {
    pub fn new(
        config: ForwarderConfig,
        session_id: Option<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            session_id: session_id.filter(|id| !id.trim().is_empty()),
            sink: None,
            clock,
            dedupe: DedupeCache::new(config.dedupe_window_ms, config.dedupe_cache_bound),
            transcript: Vec::new(),
            latest_prosody_frame: None,
            last_forwarded_event: None,
            consumed: 0,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EnvelopeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> ForwarderConfig {
        self.config
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn final_transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript
            .iter()
            .filter(|entry| !entry.interim)
            .cloned()
            .collect()
    }

    pub fn latest_prosody_frame(&self) -> Option<&ProsodyFrame> {
        self.latest_prosody_frame.as_ref()
    }

    pub fn last_forwarded_event(&self) -> Option<&ForwardedEvent> {
        self.last_forwarded_event.as_ref()
    }

    /// Number of stream events already consumed by [`Self::consume_pending`].
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Handles one raw SDK event. Returns `None` when the event declares no type.
    pub fn forward_event(&mut self, raw: &Value) -> Option<ForwardOutcome> {
        let raw_type = raw_event_type(raw)?;
        let Some(kind) = VoiceEventKind::from_raw_type(raw_type) else {
            tracing::trace!(event_type = raw_type, "ignoring unrecognized voice event");
            return Some(ForwardOutcome::new(
                ForwardDisposition::Unrecognized,
                raw_type,
                raw.clone(),
            ));
        };
        let now_ms = self.clock.now_ms();
        Some(match kind {
            VoiceEventKind::UserMessage => self.forward_user_message(raw, now_ms),
            VoiceEventKind::AssistantMessage => self.forward_assistant_message(raw, now_ms),
            VoiceEventKind::ChatMetadata => self.forward_chat_metadata(raw, now_ms),
        })
    }

    /// Processes only the events past the consumption cursor, then advances it.
    /// A stream shorter than the cursor (the SDK restarted its history) is
    /// consumed from the beginning.
    pub fn consume_pending(&mut self, events: &[Value]) -> Vec<ForwardOutcome> {
        if events.len() < self.consumed {
            tracing::debug!(
                consumed = self.consumed,
                available = events.len(),
                "voice event stream shrank; rewinding cursor"
            );
            self.consumed = 0;
        }
        let pending = &events[self.consumed..];
        let outcomes = pending
            .iter()
            .filter_map(|raw| self.forward_event(raw))
            .collect();
        self.consumed = events.len();
        outcomes
    }

    pub fn reset(&mut self) {
        self.dedupe.clear();
        self.transcript.clear();
        self.latest_prosody_frame = None;
        self.last_forwarded_event = None;
        self.consumed = 0;
    }

    fn forward_user_message(&mut self, raw: &Value, now_ms: u64) -> ForwardOutcome {
        let message = normalize_message(raw, VoiceEventKind::UserMessage, now_ms);
        self.upsert_transcript(&message, MessageRole::User);

        if let Some(scores) = &message.prosody_scores {
            self.latest_prosody_frame = Some(ProsodyFrame {
                message_id: message.message_id.clone(),
                role: message.role.clone(),
                prosody_scores: scores.clone(),
                timestamp_ms: message.timestamp_ms,
                raw_event: raw.clone(),
            });
        }

        if message.interim {
            return ForwardOutcome::new(
                ForwardDisposition::InterimNotForwarded,
                INTERIM_USER_MESSAGE_TYPE,
                message.to_value(),
            );
        }

        let payload = json!({
            "message_id": message.message_id,
            "role": message.role,
            "content": message.content,
            "interim": false,
            "prosody_scores": message.prosody_scores,
            "timestamp_ms": message.timestamp_ms,
            "raw_event": message.raw_event,
        });
        let signature = self.message_signature(
            EnvelopeType::EviUserMessageFinal,
            &message.message_id,
            &message.content,
        );
        self.dispatch(EnvelopeType::EviUserMessageFinal, &signature, payload, now_ms)
    }

    fn forward_assistant_message(&mut self, raw: &Value, now_ms: u64) -> ForwardOutcome {
        let message = normalize_message(raw, VoiceEventKind::AssistantMessage, now_ms);
        self.upsert_transcript(&message, MessageRole::Assistant);

        if !self.config.forward_assistant_messages {
            return ForwardOutcome::new(
                ForwardDisposition::DisabledByConfig,
                EnvelopeType::EviAssistantMessage.as_str(),
                message.to_value(),
            );
        }

        let payload = json!({
            "message_id": message.message_id,
            "role": message.role,
            "content": message.content,
            "timestamp_ms": message.timestamp_ms,
            "raw_event": message.raw_event,
        });
        let signature = self.message_signature(
            EnvelopeType::EviAssistantMessage,
            &message.message_id,
            &message.content,
        );
        self.dispatch(EnvelopeType::EviAssistantMessage, &signature, payload, now_ms)
    }

    fn forward_chat_metadata(&mut self, raw: &Value, now_ms: u64) -> ForwardOutcome {
        let payload = ChatMetadata::from_raw(raw, now_ms).to_payload();
        if !self.config.forward_chat_metadata {
            return ForwardOutcome::new(
                ForwardDisposition::DisabledByConfig,
                EnvelopeType::EviChatMetadata.as_str(),
                payload,
            );
        }
        let signature = format!(
            "{}:{}:{}",
            self.session_key(),
            EnvelopeType::EviChatMetadata,
            payload
        );
        self.dispatch(EnvelopeType::EviChatMetadata, &signature, payload, now_ms)
    }

    fn dispatch(
        &mut self,
        kind: EnvelopeType,
        signature: &str,
        payload: Value,
        now_ms: u64,
    ) -> ForwardOutcome {
        if !self.dedupe.admit(signature, now_ms) {
            tracing::debug!(envelope_type = %kind, "suppressed duplicate voice event");
            return ForwardOutcome::new(
                ForwardDisposition::SuppressedDuplicate,
                kind.as_str(),
                payload,
            );
        }

        let accepted = match (&self.sink, &payload) {
            (Some(sink), Value::Object(map)) => sink.send_envelope(kind, map.clone()),
            _ => false,
        };
        if !accepted {
            tracing::warn!(envelope_type = %kind, "envelope sink did not accept voice event");
            return ForwardOutcome::new(
                ForwardDisposition::SinkRejected,
                kind.as_str(),
                payload,
            );
        }

        tracing::debug!(envelope_type = %kind, "forwarded voice event");
        self.last_forwarded_event = Some(ForwardedEvent {
            envelope_type: kind,
            payload: payload.clone(),
            sent_at_ms: now_ms,
        });
        ForwardOutcome::new(ForwardDisposition::Sent, kind.as_str(), payload)
    }

    fn upsert_transcript(&mut self, message: &NormalizedMessage, fallback_role: MessageRole) {
        let entry = TranscriptEntry {
            message_id: message.message_id.clone(),
            role: message.transcript_role(fallback_role),
            text: message.content.clone(),
            interim: message.interim,
            timestamp_ms: message.timestamp_ms,
            prosody_scores: message.prosody_scores.clone(),
        };
        if let Some(existing) = self
            .transcript
            .iter_mut()
            .find(|existing| existing.message_id == entry.message_id)
        {
            *existing = entry;
            return;
        }
        self.transcript.push(entry);
        let max = self.config.max_transcript_entries.max(1);
        if self.transcript.len() > max {
            let overflow = self.transcript.len() - max;
            self.transcript.drain(..overflow);
        }
    }

    fn message_signature(&self, kind: EnvelopeType, message_id: &str, content: &str) -> String {
        format!("{}:{}:{}:{}", self.session_key(), kind, message_id, content)
    }

    fn session_key(&self) -> &str {
        self.session_id.as_deref().unwrap_or(NO_SESSION)
    }
}

impl std::fmt::Debug for EventForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventForwarder")
            .field("config", &self.config)
            .field("session_id", &self.session_id)
            .field("has_sink", &self.sink.is_some())
            .field("transcript_len", &self.transcript.len())
            .field("consumed", &self.consumed)
            .finish()
    }
}
