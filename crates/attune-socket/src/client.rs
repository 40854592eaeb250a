use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use attune_core::Clock;
use attune_protocol::{EnvelopeOverrides, EnvelopeType};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::config::SocketConfig;
use crate::error::{SocketError, CLOSE_CODE_ABNORMAL, CLOSE_CODE_NORMAL, CLOSE_CODE_NO_STATUS};
use crate::machine::{
    Effects, SocketCommand, SocketEvent, SocketMachine, SocketSnapshot, SocketStatus,
};

pub type SocketEvents = mpsc::UnboundedReceiver<SocketEvent>;

const MANUAL_DISCONNECT_REASON: &str = "Manual disconnect";
const SESSION_CLEANUP_REASON: &str = "Session cleanup";

enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

struct Shared {
    machine: SocketMachine,
    connections: HashMap<u64, mpsc::UnboundedSender<Outbound>>,
    timers: HashMap<u64, JoinHandle<()>>,
}

struct SocketInner {
    shared: Mutex<Shared>,
    clock: Arc<dyn Clock>,
    runtime: Handle,
    events_tx: mpsc::UnboundedSender<SocketEvent>,
    snapshot_tx: watch::Sender<SocketSnapshot>,
}

/// One auto-healing websocket for a single session.
///
/// All state lives in a [`SocketMachine`] behind a mutex that is never held
/// across an await. Each transport attempt runs as its own task and reports
/// back by generation; reconnect timers are spawned sleeps that are aborted on
/// cancel. Events are delivered on the receiver returned by
/// [`SessionSocket::new`], and the latest [`SocketSnapshot`] through
/// [`SessionSocket::subscribe`].
#[derive(Clone)]
pub struct SessionSocket {
    inner: Arc<SocketInner>,
}

impl SessionSocket {
    /// Must be called inside a tokio runtime.
    pub fn new(
        config: SocketConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, SocketEvents), SocketError> {
        let runtime = Handle::try_current().map_err(|error| {
            SocketError::InvalidConfig(format!("session socket requires a tokio runtime: {error}"))
        })?;
        let machine = SocketMachine::new(config)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(machine.snapshot());
        let inner = SocketInner {
            shared: Mutex::new(Shared {
                machine,
                connections: HashMap::new(),
                timers: HashMap::new(),
            }),
            clock,
            runtime,
            events_tx,
            snapshot_tx,
        };
        Ok((
            Self {
                inner: Arc::new(inner),
            },
            events_rx,
        ))
    }

    pub fn connect(&self) {
        self.inner
            .apply(|shared, _| ((), shared.machine.connect()));
    }

    /// Sends an envelope now when open; otherwise queues it (when queuing is
    /// enabled) and returns `false`.
    pub fn send(
        &self,
        kind: EnvelopeType,
        payload: Map<String, Value>,
        overrides: EnvelopeOverrides,
    ) -> Result<bool, SocketError> {
        self.inner.apply(|shared, now_ms| {
            match shared.machine.send(kind, payload, overrides, now_ms) {
                Ok((sent, effects)) => (Ok(sent), effects),
                Err(error) => (Err(error), Effects::default()),
            }
        })
    }

    pub fn send_json(&self, value: &Value) -> Result<bool, SocketError> {
        self.inner
            .apply(|shared, _| match shared.machine.send_json(value) {
                Ok((sent, effects)) => (Ok(sent), effects),
                Err(error) => (Err(error), Effects::default()),
            })
    }

    pub fn ping(&self) -> Result<bool, SocketError> {
        self.send(
            EnvelopeType::ClientPing,
            Map::new(),
            EnvelopeOverrides::default(),
        )
    }

    pub fn disconnect(&self, code: u16, reason: &str) {
        self.inner
            .apply(|shared, _| ((), shared.machine.disconnect(code, reason)));
    }

    pub fn disconnect_manual(&self) {
        self.disconnect(CLOSE_CODE_NORMAL, MANUAL_DISCONNECT_REASON);
    }

    /// Teardown for session switch or exit: cancels any pending reconnect and
    /// closes the transport.
    pub fn shutdown(&self) {
        self.disconnect(CLOSE_CODE_NORMAL, SESSION_CLEANUP_REASON);
    }

    pub fn set_online(&self, online: bool) {
        self.inner
            .apply(|shared, _| ((), shared.machine.set_online(online)));
    }

    pub fn snapshot(&self) -> SocketSnapshot {
        self.inner.lock().machine.snapshot()
    }

    pub fn status(&self) -> SocketStatus {
        self.inner.lock().machine.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<SocketSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn url(&self) -> String {
        self.inner.lock().machine.url().to_string()
    }

    /// Whether packets sent while disconnected are held for the next open.
    pub fn queues_while_disconnected(&self) -> bool {
        self.inner.lock().machine.config().queue_while_disconnected
    }

    pub fn session_id(&self) -> String {
        self.inner.lock().machine.config().session_id.clone()
    }
}

impl std::fmt::Debug for SessionSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSocket")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl SocketInner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs one machine input and executes its effects under the lock so
    /// events and snapshots are published in transition order.
    fn apply<R>(self: &Arc<Self>, input: impl FnOnce(&mut Shared, u64) -> (R, Effects)) -> R {
        let now_ms = self.clock.now_ms();
        let mut shared = self.lock();
        let (result, effects) = input(&mut shared, now_ms);
        for command in effects.commands {
            self.execute(&mut shared, command);
        }
        for event in effects.events {
            let _ = self.events_tx.send(event);
        }
        let snapshot = shared.machine.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
        result
    }

    fn execute(self: &Arc<Self>, shared: &mut Shared, command: SocketCommand) {
        match command {
            SocketCommand::OpenTransport { generation, url } => {
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                shared.connections.insert(generation, outbound_tx);
                let connect_timeout_ms = shared.machine.config().connect_timeout_ms;
                self.runtime.spawn(run_connection(
                    Arc::downgrade(self),
                    generation,
                    url,
                    outbound_rx,
                    connect_timeout_ms,
                ));
            }
            SocketCommand::Transmit { generation, text } => {
                let delivered = shared
                    .connections
                    .get(&generation)
                    .is_some_and(|outbound| outbound.send(Outbound::Text(text)).is_ok());
                if !delivered {
                    tracing::warn!(generation, "dropping packet for a finished connection");
                }
            }
            SocketCommand::CloseTransport {
                generation,
                code,
                reason,
            } => {
                if let Some(outbound) = shared.connections.get(&generation) {
                    let _ = outbound.send(Outbound::Close { code, reason });
                }
            }
            SocketCommand::ScheduleReconnect { timer_id, delay_ms } => {
                let inner = Arc::downgrade(self);
                let timer = self.runtime.spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    if let Some(inner) = inner.upgrade() {
                        inner.apply(|shared, _| {
                            shared.timers.remove(&timer_id);
                            ((), shared.machine.on_reconnect_timer(timer_id))
                        });
                    }
                });
                shared.timers.insert(timer_id, timer);
            }
            SocketCommand::CancelReconnect { timer_id } => {
                if let Some(timer) = shared.timers.remove(&timer_id) {
                    timer.abort();
                }
            }
        }
    }
}

impl Drop for SocketInner {
    fn drop(&mut self) {
        let shared = self.shared.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, timer) in shared.timers.drain() {
            timer.abort();
        }
    }
}

fn dispatch(inner: &Weak<SocketInner>, input: impl FnOnce(&mut SocketMachine) -> Effects) -> bool {
    let Some(inner) = inner.upgrade() else {
        return false;
    };
    inner.apply(|shared, _| ((), input(&mut shared.machine)));
    true
}

async fn run_connection(
    inner: Weak<SocketInner>,
    generation: u64,
    url: String,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    connect_timeout_ms: Option<u64>,
) {
    let (code, reason) =
        drive_connection(&inner, generation, &url, &mut outbound, connect_timeout_ms).await;
    if let Some(inner) = inner.upgrade() {
        inner.apply(|shared, _| {
            shared.connections.remove(&generation);
            ((), shared.machine.on_transport_closed(generation, code, &reason))
        });
    }
}

/// Runs one transport attempt to completion and returns its close code and reason.
async fn drive_connection(
    inner: &Weak<SocketInner>,
    generation: u64,
    url: &str,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    connect_timeout_ms: Option<u64>,
) -> (u16, String) {
    let handshake = connect_async(url);
    let connected = match connect_timeout_ms {
        Some(timeout_ms) => {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), handshake).await {
                Ok(result) => result,
                Err(_) => {
                    let message = format!("connect timed out after {timeout_ms}ms");
                    dispatch(inner, |machine| machine.on_transport_error(generation, &message));
                    return (CLOSE_CODE_ABNORMAL, "connect timeout".to_string());
                }
            }
        }
        None => handshake.await,
    };
    let stream = match connected {
        Ok((stream, _response)) => stream,
        Err(error) => {
            let message = error.to_string();
            dispatch(inner, |machine| machine.on_transport_error(generation, &message));
            return (CLOSE_CODE_ABNORMAL, String::new());
        }
    };

    let (mut sink, mut source) = stream.split();
    if !dispatch(inner, |machine| machine.on_transport_open(generation)) {
        let _ = sink.close().await;
        return (CLOSE_CODE_NORMAL, SESSION_CLEANUP_REASON.to_string());
    }

    loop {
        tokio::select! {
            next_outbound = outbound.recv() => match next_outbound {
                Some(Outbound::Text(text)) => {
                    if let Err(error) = sink.send(WsMessage::Text(text.into())).await {
                        let message = error.to_string();
                        dispatch(inner, |machine| machine.on_transport_error(generation, &message));
                        return (CLOSE_CODE_ABNORMAL, String::new());
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    if sink.send(WsMessage::Close(Some(frame))).await.is_err() {
                        return (code, reason);
                    }
                }
                None => {
                    let _ = sink.close().await;
                    return (CLOSE_CODE_NORMAL, SESSION_CLEANUP_REASON.to_string());
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    dispatch(inner, |machine| machine.on_transport_text(generation, text.as_str()));
                }
                Some(Ok(WsMessage::Binary(bytes))) => {
                    dispatch(inner, |machine| machine.on_transport_binary(generation, &bytes));
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|frame| (u16::from(frame.code), frame.reason.as_str().to_string()))
                        .unwrap_or((CLOSE_CODE_NO_STATUS, String::new()));
                    let _ = sink.close().await;
                    return (code, reason);
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    let message = error.to_string();
                    dispatch(inner, |machine| machine.on_transport_error(generation, &message));
                    return (CLOSE_CODE_ABNORMAL, String::new());
                }
                None => return (CLOSE_CODE_ABNORMAL, String::new()),
            },
        }
    }
}
