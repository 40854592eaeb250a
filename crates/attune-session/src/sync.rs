use std::sync::Arc;

use attune_core::{Clock, SystemClock};
use attune_graph::{GraphProjection, ProjectionConfig};
use attune_protocol::{EnvelopeOverrides, EnvelopeType, GraphSnapshot, TranscriptEntry};
use attune_socket::{
    SessionSocket, SocketConfig, SocketError, SocketEvent, SocketEvents, SocketSnapshot,
};
use attune_voice::{EnvelopeSink, EventForwarder, ForwardOutcome, ForwarderConfig, ProsodyFrame};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::record_store::SessionRecordStore;

/// Routes forwarded voice events onto the session socket.
///
/// An envelope queued for the next open counts as accepted.
#[derive(Debug, Clone)]
pub struct SocketEnvelopeSink {
    socket: SessionSocket,
}

impl SocketEnvelopeSink {
    pub fn new(socket: SessionSocket) -> Self {
        Self { socket }
    }
}

impl EnvelopeSink for SocketEnvelopeSink {
    fn send_envelope(&self, kind: EnvelopeType, payload: Map<String, Value>) -> bool {
        match self.socket.send(kind, payload, EnvelopeOverrides::default()) {
            Ok(sent) => sent || self.socket.queues_while_disconnected(),
            Err(error) => {
                tracing::warn!(
                    envelope_type = kind.as_str(),
                    %error,
                    "failed to forward voice event"
                );
                false
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub socket: SocketConfig,
    pub forwarder: ForwarderConfig,
    pub projection: ProjectionConfig,
}

impl SyncConfig {
    pub fn new(socket: SocketConfig) -> Self {
        Self {
            socket,
            forwarder: ForwarderConfig::default(),
            projection: ProjectionConfig::default(),
        }
    }
}

/// Everything a host needs to render one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSyncState {
    pub session_id: String,
    pub connection: SocketSnapshot,
    pub projection: GraphProjection,
    pub transcript: Vec<TranscriptEntry>,
    pub latest_prosody: Option<ProsodyFrame>,
}

/// Per-session composition of socket, forwarder and graph projection.
///
/// Nothing is shared between sessions: switching means [`SessionSync::stop`]
/// followed by a fresh [`SessionSync::start`].
pub struct SessionSync {
    session_id: String,
    socket: SessionSocket,
    events: SocketEvents,
    forwarder: EventForwarder,
    projection: GraphProjection,
    records: Option<SessionRecordStore>,
    clock: Arc<dyn Clock>,
}

impl SessionSync {
    pub fn start(
        config: SyncConfig,
        records: Option<SessionRecordStore>,
    ) -> Result<Self, SocketError> {
        Self::start_with_clock(config, records, Arc::new(SystemClock))
    }

    /// Builds the session components and opens the socket. Must run inside a
    /// tokio runtime.
    pub fn start_with_clock(
        config: SyncConfig,
        records: Option<SessionRecordStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SocketError> {
        let session_id = config.socket.session_id.clone();
        let (socket, events) = SessionSocket::new(config.socket, clock.clone())?;
        let sink: Arc<dyn EnvelopeSink> = Arc::new(SocketEnvelopeSink::new(socket.clone()));
        let forwarder =
            EventForwarder::new(config.forwarder, Some(session_id.clone()), clock.clone())
                .with_sink(sink);
        let projection = GraphProjection::new(config.projection);

        tracing::info!(session_id = %session_id, url = %socket.url(), "starting session sync");
        socket.connect();
        Ok(Self {
            session_id,
            socket,
            events,
            forwarder,
            projection,
            records,
            clock,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn socket(&self) -> &SessionSocket {
        &self.socket
    }

    pub fn forwarder(&self) -> &EventForwarder {
        &self.forwarder
    }

    pub fn projection(&self) -> &GraphProjection {
        &self.projection
    }

    pub fn records(&self) -> Option<&SessionRecordStore> {
        self.records.as_ref()
    }

    /// Seeds the projection from the REST snapshot.
    pub fn apply_snapshot(&mut self, snapshot: GraphSnapshot) {
        self.projection
            .apply_snapshot(snapshot, self.clock.now_ms());
    }

    pub fn select_receipt(&mut self, receipt_id: Option<String>) {
        self.projection.select_receipt(receipt_id);
    }

    /// Forwards one raw voice-SDK event and persists a newly learned chat
    /// group id.
    pub fn handle_voice_event(&mut self, raw: &Value) -> Option<ForwardOutcome> {
        let outcome = self.forwarder.forward_event(raw)?;
        self.remember_chat_group(&outcome);
        Some(outcome)
    }

    /// Processes the unseen tail of a cumulative voice event stream.
    pub fn handle_voice_events(&mut self, events: &[Value]) -> Vec<ForwardOutcome> {
        let outcomes = self.forwarder.consume_pending(events);
        for outcome in &outcomes {
            self.remember_chat_group(outcome);
        }
        outcomes
    }

    /// Folds one socket event into the projection. Returns whether the
    /// projection changed.
    pub fn apply_socket_event(&mut self, event: &SocketEvent) -> bool {
        match event {
            SocketEvent::Envelope(envelope) => {
                let changed = self
                    .projection
                    .apply_envelope(envelope, self.clock.now_ms());
                tracing::debug!(
                    session_id = %self.session_id,
                    envelope_type = envelope.kind.as_str(),
                    changed,
                    "applied envelope"
                );
                changed
            }
            SocketEvent::Error(error) => {
                tracing::debug!(session_id = %self.session_id, %error, "socket error");
                false
            }
            SocketEvent::Closed { code, reason } => {
                tracing::debug!(
                    session_id = %self.session_id,
                    close_code = code,
                    %reason,
                    "socket closed"
                );
                false
            }
            SocketEvent::StatusChanged(_) | SocketEvent::Opened => false,
        }
    }

    /// Waits for the next socket event and applies it. `None` once the socket
    /// has been dropped.
    pub async fn next_event(&mut self) -> Option<SocketEvent> {
        let event = self.events.recv().await?;
        self.apply_socket_event(&event);
        Some(event)
    }

    pub fn set_online(&self, online: bool) {
        self.socket.set_online(online);
    }

    pub fn state(&self) -> SessionSyncState {
        SessionSyncState {
            session_id: self.session_id.clone(),
            connection: self.socket.snapshot(),
            projection: self.projection.clone(),
            transcript: self.forwarder.transcript().to_vec(),
            latest_prosody: self.forwarder.latest_prosody_frame().cloned(),
        }
    }

    /// Cancels any pending reconnect and closes the transport.
    pub fn stop(&self) {
        tracing::info!(session_id = %self.session_id, "stopping session sync");
        self.socket.shutdown();
    }

    fn remember_chat_group(&mut self, outcome: &ForwardOutcome) {
        let Some(metadata) = outcome.chat_metadata() else {
            return;
        };
        let Some(chat_group_id) = metadata.chat_group_id.as_deref() else {
            return;
        };
        let Some(records) = self.records.as_mut() else {
            return;
        };
        let chat_id = metadata.chat_id.as_deref();
        match records.update_chat_group(&self.session_id, chat_group_id, chat_id) {
            Ok(true) => tracing::debug!(
                session_id = %self.session_id,
                chat_group_id,
                "recorded chat group"
            ),
            Ok(false) => {}
            Err(error) => tracing::warn!(
                session_id = %self.session_id,
                error = %format!("{error:#}"),
                "failed to record chat group"
            ),
        }
    }
}

impl std::fmt::Debug for SessionSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSync")
            .field("session_id", &self.session_id)
            .field("socket", &self.socket)
            .field("forwarder", &self.forwarder)
            .finish_non_exhaustive()
    }
}
