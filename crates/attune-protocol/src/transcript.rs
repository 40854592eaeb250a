use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Expression label to confidence, as reported by the voice SDK.
pub type ProsodyScores = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One line of the live transcript. Interim entries are replaced in place
/// when the final form of the same message arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub message_id: String,
    pub role: MessageRole,
    pub text: String,
    pub interim: bool,
    pub timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prosody_scores: Option<ProsodyScores>,
}
