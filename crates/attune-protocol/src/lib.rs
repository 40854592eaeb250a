//! Wire contract between the Attune client and the session backend.
//!
//! Hosts the envelope registry and codec used at the socket trust boundary,
//! plus the knowledge-graph, receipt, and transcript records carried inside
//! envelope payloads and REST snapshots.

pub mod codec;
pub mod envelope;
pub mod graph_types;
pub mod transcript;

pub use codec::{
    parse_envelope, parse_envelope_bytes, serialize_envelope, serialize_value, CodecError,
};
pub use envelope::{
    Envelope, EnvelopeOverrides, EnvelopeType, UnsupportedEnvelopeType, ENVELOPE_TYPES,
};
pub use graph_types::{
    decode_lenient_list, GraphEdge, GraphNode, GraphSnapshot, Receipt, ReceiptEvidence,
};
pub use transcript::{MessageRole, ProsodyScores, TranscriptEntry};
