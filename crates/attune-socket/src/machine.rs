//! Transport-free reconnect state machine.
//!
//! Every input returns [`Effects`]: commands for the driver to execute against
//! the real transport and timers, and events to publish to subscribers. Each
//! transport attempt carries a generation number; inputs from a superseded
//! generation are ignored.

use std::collections::VecDeque;
use std::fmt;

use attune_protocol::{
    parse_envelope, parse_envelope_bytes, serialize_envelope, serialize_value, CodecError,
    Envelope, EnvelopeOverrides, EnvelopeType,
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::backoff::reconnect_delay_ms_with_jitter;
use crate::config::SocketConfig;
use crate::error::SocketError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SocketStatus {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Offline,
    Closed,
    Error,
}

impl SocketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Offline => "offline",
            Self::Closed => "closed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SocketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable connection state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SocketSnapshot {
    pub status: SocketStatus,
    pub last_error: Option<String>,
    pub reconnect_attempts: u32,
    pub queued_messages: usize,
    pub last_envelope_type: Option<EnvelopeType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketCommand {
    OpenTransport { generation: u64, url: String },
    Transmit { generation: u64, text: String },
    CloseTransport { generation: u64, code: u16, reason: String },
    ScheduleReconnect { timer_id: u64, delay_ms: u64 },
    CancelReconnect { timer_id: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    StatusChanged(SocketStatus),
    Opened,
    Envelope(Envelope),
    Error(SocketError),
    Closed { code: u16, reason: String },
}

#[derive(Debug, Default, PartialEq)]
pub struct Effects {
    pub commands: Vec<SocketCommand>,
    pub events: Vec<SocketEvent>,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.events.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    Absent,
    Opening(u64),
    Open(u64),
    Closing(u64),
}

#[derive(Debug)]
pub struct SocketMachine {
    config: SocketConfig,
    url: String,
    status: SocketStatus,
    transport: Transport,
    generation: u64,
    reconnect_attempts: u32,
    active: bool,
    manual_close: bool,
    online: bool,
    fatal: bool,
    queue: VecDeque<String>,
    reconnect_timer: Option<u64>,
    next_timer_id: u64,
    last_error: Option<SocketError>,
    last_envelope_type: Option<EnvelopeType>,
}

impl SocketMachine {
    pub fn new(config: SocketConfig) -> Result<Self, SocketError> {
        let url = config.socket_url()?;
        Ok(Self {
            config,
            url,
            status: SocketStatus::Idle,
            transport: Transport::Absent,
            generation: 0,
            reconnect_attempts: 0,
            active: false,
            manual_close: false,
            online: true,
            fatal: false,
            queue: VecDeque::new(),
            reconnect_timer: None,
            next_timer_id: 0,
            last_error: None,
            last_envelope_type: None,
        })
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> SocketStatus {
        self.status
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn queued_messages(&self) -> usize {
        self.queue.len()
    }

    pub fn last_error(&self) -> Option<&SocketError> {
        self.last_error.as_ref()
    }

    pub fn is_open(&self) -> bool {
        matches!(self.transport, Transport::Open(_))
    }

    pub fn snapshot(&self) -> SocketSnapshot {
        SocketSnapshot {
            status: self.status,
            last_error: self.last_error.as_ref().map(ToString::to_string),
            reconnect_attempts: self.reconnect_attempts,
            queued_messages: self.queue.len(),
            last_envelope_type: self.last_envelope_type,
        }
    }

    /// Opens a transport unless one is already opening or open. An explicit
    /// connect also clears a previous fatal rejection.
    pub fn connect(&mut self) -> Effects {
        let mut effects = Effects::default();
        if matches!(self.transport, Transport::Opening(_) | Transport::Open(_)) {
            return effects;
        }

        self.active = true;
        self.manual_close = false;
        self.fatal = false;
        self.last_error = None;
        self.cancel_timer(&mut effects);
        let status = if self.reconnect_attempts > 0 {
            SocketStatus::Reconnecting
        } else {
            SocketStatus::Connecting
        };
        self.set_status(status, &mut effects);

        self.generation = self.generation.wrapping_add(1);
        self.transport = Transport::Opening(self.generation);
        tracing::debug!(
            session_id = %self.config.session_id,
            generation = self.generation,
            attempt = self.reconnect_attempts,
            "opening session socket"
        );
        effects.commands.push(SocketCommand::OpenTransport {
            generation: self.generation,
            url: self.url.clone(),
        });
        effects
    }

    /// Sends a pre-serialized packet now, or queues it while not open. Returns
    /// `true` only when the packet went out immediately.
    pub fn send_text(&mut self, text: String) -> (bool, Effects) {
        let mut effects = Effects::default();
        if let Transport::Open(generation) = self.transport {
            effects
                .commands
                .push(SocketCommand::Transmit { generation, text });
            return (true, effects);
        }
        if self.config.queue_while_disconnected {
            self.queue.push_back(text);
        }
        (false, effects)
    }

    pub fn send_json(&mut self, value: &Value) -> Result<(bool, Effects), SocketError> {
        let text = serialize_value(value).map_err(SocketError::Serialization)?;
        Ok(self.send_text(text))
    }

    /// Wraps `payload` in an envelope stamped with this session and `now_ms`.
    pub fn send(
        &mut self,
        kind: EnvelopeType,
        payload: Map<String, Value>,
        overrides: EnvelopeOverrides,
        now_ms: u64,
    ) -> Result<(bool, Effects), SocketError> {
        let envelope = Envelope::outbound(
            kind,
            &self.config.session_id,
            now_ms,
            payload,
            overrides,
        );
        let text = serialize_envelope(&envelope).map_err(SocketError::Serialization)?;
        Ok(self.send_text(text))
    }

    /// Closes the transport without reconnecting. Status settles to `closed`,
    /// or stays `offline` when the host is offline.
    pub fn disconnect(&mut self, code: u16, reason: &str) -> Effects {
        let mut effects = Effects::default();
        self.active = false;
        self.manual_close = true;
        self.cancel_timer(&mut effects);
        if let Transport::Opening(generation) | Transport::Open(generation) = self.transport {
            effects.commands.push(SocketCommand::CloseTransport {
                generation,
                code,
                reason: reason.to_string(),
            });
            self.transport = Transport::Closing(generation);
        }
        self.settle_after_manual_close(&mut effects);
        effects
    }

    pub fn on_transport_open(&mut self, generation: u64) -> Effects {
        let mut effects = Effects::default();
        if self.transport != Transport::Opening(generation) {
            if generation != self.generation || !self.active {
                effects.commands.push(SocketCommand::CloseTransport {
                    generation,
                    code: crate::error::CLOSE_CODE_NORMAL,
                    reason: "Superseded connection".to_string(),
                });
            }
            return effects;
        }

        self.transport = Transport::Open(generation);
        self.reconnect_attempts = 0;
        if self.online {
            self.set_status(SocketStatus::Open, &mut effects);
        }
        let flushed = self.queue.len();
        while let Some(text) = self.queue.pop_front() {
            effects
                .commands
                .push(SocketCommand::Transmit { generation, text });
        }
        tracing::debug!(
            session_id = %self.config.session_id,
            generation,
            flushed,
            "session socket open"
        );
        effects.events.push(SocketEvent::Opened);
        effects
    }

    pub fn on_transport_text(&mut self, generation: u64, text: &str) -> Effects {
        if !self.is_current(generation) {
            return Effects::default();
        }
        self.accept_inbound(parse_envelope(text))
    }

    pub fn on_transport_binary(&mut self, generation: u64, bytes: &[u8]) -> Effects {
        if !self.is_current(generation) {
            return Effects::default();
        }
        self.accept_inbound(parse_envelope_bytes(bytes))
    }

    /// Records a transport failure. Status is left to the close that follows.
    pub fn on_transport_error(&mut self, generation: u64, message: &str) -> Effects {
        let mut effects = Effects::default();
        if !self.is_current(generation) {
            return effects;
        }
        tracing::debug!(
            session_id = %self.config.session_id,
            generation,
            error = message,
            "session socket transport error"
        );
        let error = SocketError::Transport(message.to_string());
        self.last_error = Some(error.clone());
        effects.events.push(SocketEvent::Error(error));
        effects
    }

    pub fn on_transport_closed(&mut self, generation: u64, code: u16, reason: &str) -> Effects {
        let mut effects = Effects::default();
        if !self.is_current(generation) {
            return effects;
        }
        self.transport = Transport::Absent;
        effects.events.push(SocketEvent::Closed {
            code,
            reason: reason.to_string(),
        });

        if let Some(error) = SocketError::from_close_code(code, reason) {
            tracing::warn!(
                session_id = %self.config.session_id,
                close_code = code,
                "session socket rejected by backend"
            );
            self.fatal = true;
            self.active = false;
            self.cancel_timer(&mut effects);
            self.last_error = Some(error.clone());
            self.set_status(SocketStatus::Error, &mut effects);
            effects.events.push(SocketEvent::Error(error));
            return effects;
        }

        if self.manual_close {
            self.settle_after_manual_close(&mut effects);
            return effects;
        }
        if !self.online {
            self.set_status(SocketStatus::Offline, &mut effects);
            return effects;
        }
        if !self.config.reconnect {
            self.active = false;
            self.set_status(SocketStatus::Closed, &mut effects);
            return effects;
        }

        let delay_ms = reconnect_delay_ms_with_jitter(
            self.reconnect_attempts,
            self.config.initial_reconnect_delay_ms,
            self.config.max_reconnect_delay_ms,
            self.config.jitter,
        );
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        self.set_status(SocketStatus::Reconnecting, &mut effects);
        self.cancel_timer(&mut effects);
        self.next_timer_id = self.next_timer_id.wrapping_add(1);
        self.reconnect_timer = Some(self.next_timer_id);
        tracing::info!(
            session_id = %self.config.session_id,
            close_code = code,
            attempt = self.reconnect_attempts,
            delay_ms,
            "scheduling session socket reconnect"
        );
        effects.commands.push(SocketCommand::ScheduleReconnect {
            timer_id: self.next_timer_id,
            delay_ms,
        });
        effects
    }

    pub fn on_reconnect_timer(&mut self, timer_id: u64) -> Effects {
        if self.reconnect_timer != Some(timer_id) {
            return Effects::default();
        }
        self.reconnect_timer = None;
        self.connect()
    }

    /// Host connectivity signal. Going offline cancels any pending reconnect;
    /// coming back reconnects when the session is still wanted and has no
    /// live transport.
    pub fn set_online(&mut self, online: bool) -> Effects {
        let mut effects = Effects::default();
        self.online = online;
        if !online {
            self.cancel_timer(&mut effects);
            self.set_status(SocketStatus::Offline, &mut effects);
            return effects;
        }

        match self.transport {
            Transport::Open(_) => self.set_status(SocketStatus::Open, &mut effects),
            Transport::Opening(_) => {
                let status = if self.reconnect_attempts > 0 {
                    SocketStatus::Reconnecting
                } else {
                    SocketStatus::Connecting
                };
                self.set_status(status, &mut effects);
            }
            Transport::Absent | Transport::Closing(_) => {
                if self.active && !self.fatal {
                    return self.connect();
                }
                if self.status == SocketStatus::Offline {
                    let status = if self.fatal {
                        SocketStatus::Error
                    } else if self.active {
                        SocketStatus::Reconnecting
                    } else {
                        SocketStatus::Closed
                    };
                    self.set_status(status, &mut effects);
                }
            }
        }
        effects
    }

    fn accept_inbound(&mut self, parsed: Result<Envelope, CodecError>) -> Effects {
        let mut effects = Effects::default();
        match parsed {
            Ok(envelope) => {
                self.last_envelope_type = Some(envelope.kind);
                effects.events.push(SocketEvent::Envelope(envelope));
            }
            Err(error) => {
                tracing::warn!(
                    session_id = %self.config.session_id,
                    %error,
                    "dropping malformed inbound envelope"
                );
                let error = SocketError::MalformedEnvelope(error);
                self.last_error = Some(error.clone());
                effects.events.push(SocketEvent::Error(error));
            }
        }
        effects
    }

    fn is_current(&self, generation: u64) -> bool {
        generation == self.generation && self.transport != Transport::Absent
    }

    fn settle_after_manual_close(&mut self, effects: &mut Effects) {
        let status = if self.status == SocketStatus::Offline || !self.online {
            SocketStatus::Offline
        } else {
            SocketStatus::Closed
        };
        self.set_status(status, effects);
    }

    fn cancel_timer(&mut self, effects: &mut Effects) {
        if let Some(timer_id) = self.reconnect_timer.take() {
            effects
                .commands
                .push(SocketCommand::CancelReconnect { timer_id });
        }
    }

    fn set_status(&mut self, status: SocketStatus, effects: &mut Effects) {
        if self.status == status {
            return;
        }
        tracing::debug!(
            session_id = %self.config.session_id,
            from = %self.status,
            to = %status,
            "session socket status"
        );
        self.status = status;
        effects.events.push(SocketEvent::StatusChanged(status));
    }
}
