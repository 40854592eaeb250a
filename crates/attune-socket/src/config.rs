use crate::backoff::{DEFAULT_INITIAL_RECONNECT_DELAY_MS, DEFAULT_MAX_RECONNECT_DELAY_MS};
use crate::error::SocketError;
use crate::url::build_session_socket_url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketConfig {
    pub base_url: String,
    pub session_id: String,
    pub session_token: Option<String>,
    pub reconnect: bool,
    pub initial_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub queue_while_disconnected: bool,
    /// Upper bound on the handshake. `None` waits for the transport to resolve.
    pub connect_timeout_ms: Option<u64>,
    pub jitter: bool,
}

impl SocketConfig {
    pub fn new(base_url: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            session_id: session_id.into(),
            session_token: None,
            reconnect: true,
            initial_reconnect_delay_ms: DEFAULT_INITIAL_RECONNECT_DELAY_MS,
            max_reconnect_delay_ms: DEFAULT_MAX_RECONNECT_DELAY_MS,
            queue_while_disconnected: true,
            connect_timeout_ms: None,
            jitter: false,
        }
    }

    pub fn with_session_token(mut self, session_token: impl Into<String>) -> Self {
        self.session_token = Some(session_token.into());
        self
    }

    pub fn socket_url(&self) -> Result<String, SocketError> {
        build_session_socket_url(
            &self.base_url,
            &self.session_id,
            self.session_token.as_deref(),
        )
    }
}
