use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "attune",
    about = "Realtime session sync client for the Attune control room",
    version
)]
pub struct Cli {
    #[arg(
        long = "log-level",
        env = "ATTUNE_LOG_LEVEL",
        global = true,
        help = "Tracing filter directive (for example 'debug' or 'attune_socket=debug'). Defaults to RUST_LOG, then 'warn'."
    )]
    pub log_level: Option<String>,

    #[arg(
        long = "state-dir",
        env = "ATTUNE_STATE_DIR",
        default_value = ".attune",
        global = true,
        help = "Directory holding the local session record index"
    )]
    pub state_dir: PathBuf,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run one live session: forward stdin voice events and print graph updates.
    Run(RunArgs),
    /// List locally recorded sessions, newest first.
    Sessions,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[arg(
        long = "session-id",
        env = "ATTUNE_SESSION_ID",
        help = "Join an existing session instead of creating one"
    )]
    pub session_id: Option<String>,

    #[arg(
        long = "session-token",
        env = "ATTUNE_SESSION_TOKEN",
        help = "Websocket session token. Falls back to the token stored for --session-id"
    )]
    pub session_token: Option<String>,

    #[arg(long = "api-url", env = "ATTUNE_API_URL", help = "Backend REST base URL")]
    pub api_url: Option<String>,

    #[arg(
        long = "ws-url",
        env = "ATTUNE_WS_URL",
        help = "Backend websocket base URL. Derived from --api-url when omitted"
    )]
    pub ws_url: Option<String>,

    #[arg(
        long = "end-on-exit",
        default_value_t = false,
        action = ArgAction::SetTrue,
        help = "End the session through the backend when input closes or on Ctrl-C"
    )]
    pub end_on_exit: bool,

    #[arg(
        long = "connect-timeout-ms",
        env = "ATTUNE_CONNECT_TIMEOUT_MS",
        value_parser = parse_positive_u64,
        help = "Abort a stalled websocket handshake after this many milliseconds"
    )]
    pub connect_timeout_ms: Option<u64>,

    #[arg(
        long = "reconnect-jitter",
        default_value_t = false,
        action = ArgAction::SetTrue,
        help = "Randomize reconnect delays within 50-100% of the backoff schedule"
    )]
    pub reconnect_jitter: bool,
}
