//! Reconnecting per-session websocket client.
//!
//! [`SocketMachine`] holds the connection state machine with no I/O;
//! [`SessionSocket`] drives it over tokio-tungstenite.

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod machine;
pub mod url;

pub use backoff::{
    reconnect_delay_ms, reconnect_delay_ms_with_jitter, DEFAULT_INITIAL_RECONNECT_DELAY_MS,
    DEFAULT_MAX_RECONNECT_DELAY_MS,
};
pub use client::{SessionSocket, SocketEvents};
pub use config::SocketConfig;
pub use error::{
    SocketError, CLOSE_CODE_ABNORMAL, CLOSE_CODE_NORMAL, CLOSE_CODE_SESSION_NOT_FOUND,
    CLOSE_CODE_TOKEN_REJECTED,
};
pub use machine::{
    Effects, SocketCommand, SocketEvent, SocketMachine, SocketSnapshot, SocketStatus,
};
pub use url::{build_session_socket_url, websocket_scheme};
