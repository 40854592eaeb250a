use url::Url;

use crate::error::SocketError;

pub const SESSION_SOCKET_PATH: [&str; 2] = ["ws", "session"];
pub const SESSION_TOKEN_QUERY_KEY: &str = "session_token";

/// Builds `{base}/ws/session/{session_id}?session_token={token}`.
///
/// `http`/`https` bases are mapped to `ws`/`wss`. The session id is
/// percent-encoded as a single path segment; the query is omitted when there is
/// no token.
pub fn build_session_socket_url(
    base_url: &str,
    session_id: &str,
    session_token: Option<&str>,
) -> Result<String, SocketError> {
    let base_url = base_url.trim().trim_end_matches('/');
    if base_url.is_empty() {
        return Err(SocketError::InvalidConfig(
            "socket base url must not be empty".to_string(),
        ));
    }
    if session_id.trim().is_empty() {
        return Err(SocketError::InvalidConfig(
            "session id must not be empty".to_string(),
        ));
    }

    let mut url = Url::parse(&websocket_scheme(base_url)).map_err(|error| {
        SocketError::InvalidConfig(format!("invalid socket base url '{base_url}': {error}"))
    })?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(SocketError::InvalidConfig(format!(
            "unsupported socket url scheme '{}'",
            url.scheme()
        )));
    }

    url.path_segments_mut()
        .map_err(|()| {
            SocketError::InvalidConfig(format!("socket base url '{base_url}' cannot carry a path"))
        })?
        .pop_if_empty()
        .extend(SESSION_SOCKET_PATH)
        .push(session_id);

    if let Some(token) = session_token.filter(|token| !token.is_empty()) {
        url.query_pairs_mut()
            .append_pair(SESSION_TOKEN_QUERY_KEY, token);
    }

    Ok(url.to_string())
}

/// Swaps an `http:`/`https:` prefix (any case) for `ws:`/`wss:`.
pub fn websocket_scheme(base_url: &str) -> String {
    let lowered = base_url.to_ascii_lowercase();
    if lowered.starts_with("https:") {
        format!("wss:{}", &base_url["https:".len()..])
    } else if lowered.starts_with("http:") {
        format!("ws:{}", &base_url["http:".len()..])
    } else {
        base_url.to_string()
    }
}
