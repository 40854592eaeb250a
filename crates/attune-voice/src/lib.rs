//! Voice-SDK event normalization and backend forwarding.
//!
//! Turns raw voice events into canonical messages, keeps a bounded live
//! transcript, and forwards final user messages, assistant messages and chat
//! metadata as envelopes while suppressing interim and duplicate emissions.

pub mod dedupe;
pub mod forwarder;
pub mod normalize;
pub mod prosody;

pub use dedupe::DedupeCache;
pub use forwarder::{
    EnvelopeSink, EventForwarder, ForwardDisposition, ForwardOutcome, ForwardedEvent,
    ForwarderConfig, ProsodyFrame, DEFAULT_DEDUPE_CACHE_BOUND, DEFAULT_DEDUPE_WINDOW_MS,
    DEFAULT_MAX_TRANSCRIPT_ENTRIES, INTERIM_USER_MESSAGE_TYPE,
};
pub use normalize::{
    flatten_text, normalize, raw_event_type, ChatMetadata, NormalizedMessage,
    NormalizedVoiceEvent, VoiceEventKind,
};
pub use prosody::{prosody_scores_to_signals, ProsodySignal};

#[cfg(test)]
mod tests;
