use attune_protocol::CodecError;
use thiserror::Error;

pub const CLOSE_CODE_NORMAL: u16 = 1000;
pub const CLOSE_CODE_NO_STATUS: u16 = 1005;
pub const CLOSE_CODE_ABNORMAL: u16 = 1006;
pub const CLOSE_CODE_TOKEN_REJECTED: u16 = 4401;
pub const CLOSE_CODE_SESSION_NOT_FOUND: u16 = 4404;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SocketError {
    #[error("the backend websocket connection failed: {0}")]
    Transport(String),
    #[error("the backend rejected the session websocket token (close code {code}): {reason}")]
    AuthRejected { code: u16, reason: String },
    #[error("the selected session was not found on the backend (close code {code}): {reason}")]
    SessionNotFound { code: u16, reason: String },
    #[error("received an invalid envelope from the backend: {0}")]
    MalformedEnvelope(#[source] CodecError),
    #[error("failed to serialize outbound packet: {0}")]
    Serialization(#[source] CodecError),
    #[error("invalid socket configuration: {0}")]
    InvalidConfig(String),
}

impl SocketError {
    /// Maps the server-assigned fatal close codes to their named errors.
    pub fn from_close_code(code: u16, reason: &str) -> Option<Self> {
        match code {
            CLOSE_CODE_TOKEN_REJECTED => Some(Self::AuthRejected {
                code,
                reason: reason.to_string(),
            }),
            CLOSE_CODE_SESSION_NOT_FOUND => Some(Self::SessionNotFound {
                code,
                reason: reason.to_string(),
            }),
            _ => None,
        }
    }

    /// Fatal errors end the connection for good; nothing reconnects after them.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthRejected { .. } | Self::SessionNotFound { .. })
    }
}
