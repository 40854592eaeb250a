use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use attune_session::runtime_config::{API_URL_ENV, WS_URL_ENV};
use attune_session::{
    ApiClientConfig, BackendApiClient, RuntimeConfig, SessionRecordStore, SessionSync, SyncConfig,
};
use attune_socket::{SocketConfig, SocketEvent};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli_args::RunArgs;
use crate::render::{projection_summary, session_list};

/// Time given to the socket task to flush its close frame before exit.
const CLOSE_GRACE: Duration = Duration::from_millis(200);

/// Command-line values take precedence over the process environment.
pub(crate) fn resolve_runtime_config(args: &RunArgs) -> Result<RuntimeConfig> {
    RuntimeConfig::from_lookup(|name| match name {
        API_URL_ENV => args
            .api_url
            .clone()
            .or_else(|| std::env::var(name).ok()),
        WS_URL_ENV => args.ws_url.clone().or_else(|| std::env::var(name).ok()),
        _ => std::env::var(name).ok(),
    })
    .context("failed to resolve runtime configuration")
}

pub(crate) async fn run_session(args: RunArgs, state_dir: &Path) -> Result<()> {
    let runtime = resolve_runtime_config(&args)?;
    let api = BackendApiClient::new(ApiClientConfig::new(&runtime.api_base_url))?;
    let mut records = SessionRecordStore::load(state_dir)?;

    let (session_id, session_token) = match args.session_id.clone() {
        Some(session_id) => {
            let stored = records
                .get(&session_id)
                .and_then(|record| record.session_token.clone());
            (session_id, args.session_token.clone().or(stored))
        }
        None => {
            let created = api
                .create_session(None)
                .await
                .context("failed to create a session")?;
            tracing::info!(session_id = %created.session_id, "created session");
            (
                created.session_id,
                created.session_token.or_else(|| args.session_token.clone()),
            )
        }
    };
    let record = records.upsert_session(&session_id, session_token.as_deref())?;
    eprintln!(
        "{}: session #{} {}",
        runtime.app_name, record.display_number, session_id
    );

    let snapshot = match api.fetch_graph_snapshot(&session_id).await {
        Ok(snapshot) => Some(snapshot),
        Err(error) => {
            tracing::warn!(session_id = %session_id, %error, "graph snapshot unavailable");
            None
        }
    };

    let mut socket = SocketConfig::new(runtime.ws_base_url.clone(), session_id.clone());
    socket.session_token = session_token;
    socket.connect_timeout_ms = args.connect_timeout_ms;
    socket.jitter = args.reconnect_jitter;
    let mut sync = SessionSync::start(SyncConfig::new(socket), Some(records))?;
    if let Some(snapshot) = snapshot {
        sync.apply_snapshot(snapshot);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("failed to read voice events from stdin")? {
                    Some(line) => forward_line(&mut sync, &line, runtime.verbose_transcription),
                    None => break,
                }
            }
            event = sync.next_event() => {
                match event {
                    Some(event) => report_event(&sync, &event),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(session_id = %session_id, "interrupted");
                break;
            }
        }
    }

    sync.stop();
    if args.end_on_exit {
        match api.end_session(&session_id).await {
            Ok(ended) => {
                if let Some(summary) = ended.summary {
                    println!("summary: {summary}");
                }
                for concept in ended.top_concepts {
                    println!("concept: {} {}", concept.label, concept.canonical);
                }
            }
            Err(error) => tracing::warn!(session_id = %session_id, %error, "failed to end session"),
        }
    }
    tokio::time::sleep(CLOSE_GRACE).await;
    Ok(())
}

pub(crate) fn list_sessions(state_dir: &Path) -> Result<String> {
    let records = SessionRecordStore::load(state_dir)?;
    Ok(session_list(records.list(), records.active_session_id()))
}

fn forward_line(sync: &mut SessionSync, line: &str, verbose: bool) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let raw = match serde_json::from_str::<Value>(line) {
        Ok(raw) => raw,
        Err(error) => {
            tracing::warn!(%error, "ignoring non-JSON voice event line");
            return;
        }
    };
    let Some(outcome) = sync.handle_voice_event(&raw) else {
        tracing::debug!("ignoring untyped voice event");
        return;
    };
    if verbose {
        if let Some(entry) = sync.forwarder().transcript().last() {
            let marker = if entry.interim { "~" } else { ">" };
            println!("{marker} {}: {}", entry.role.as_str(), entry.text);
        }
    }
    tracing::debug!(
        envelope_type = %outcome.envelope_type,
        forwarded = outcome.forwarded,
        disposition = ?outcome.disposition,
        "voice event handled"
    );
}

fn report_event(sync: &SessionSync, event: &SocketEvent) {
    match event {
        SocketEvent::Envelope(envelope) => {
            println!("{}", projection_summary(envelope.kind, sync.projection()));
        }
        SocketEvent::StatusChanged(status) => eprintln!("socket: {status}"),
        SocketEvent::Error(error) => eprintln!("socket error: {error}"),
        SocketEvent::Opened | SocketEvent::Closed { .. } => {}
    }
}
