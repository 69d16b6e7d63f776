//! Connection state machine for one channel.
//!
//! DESIGN
//! ======
//! The machine is pure: [`ChannelMachine::handle`] takes an [`Event`] and
//! returns the [`Effect`]s the driver must perform (open a socket, arm a
//! timer, deliver a message). It owns no sockets and no timers, so bounded
//! retry, manual-vs-unexpected close, and the environment signals are all
//! testable without a runtime.
//!
//! Every transport gets a fresh [`ConnId`]. Transport events carry the id
//! they were produced for; events from a superseded connection (the late
//! close of a socket replaced by `reconnect()`, say) are ignored.
//!
//! LIFECYCLE
//! =========
//! `Disconnected → Connecting → Connected → (Closing | Error) → Reconnecting
//! → Connecting → …`. Only a caller `Disconnect` (or `SetEnabled(false)`)
//! makes `Disconnected` sticky; exhausting the retry bound also settles there
//! until `Online` or an explicit `Reconnect`.

use std::fmt;
use std::time::Duration;

use frames::InboundKind;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::env::EnvSignal;
use crate::config::ChannelConfig;

/// Identifier of one transport instance within a channel.
pub type ConnId = u64;

/// Connection status surfaced to consumers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    /// A transport open is in flight.
    Connecting,
    Connected,
    /// A caller-initiated close is waiting for the transport to finish.
    Closing,
    /// The transport reported an error; a close usually follows.
    Error,
    /// Waiting out the reconnect interval.
    Reconnecting,
}

impl ConnectionStatus {
    #[must_use]
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Error => "error",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A valid application message received on a channel.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundMessage {
    pub kind: InboundKind,
    pub payload: Value,
    /// Local receive time.
    pub observed_at: OffsetDateTime,
    /// Sender timestamp from the envelope, if it parsed.
    pub sent_at: Option<OffsetDateTime>,
}

impl InboundMessage {
    #[must_use]
    pub fn from_frame(frame: frames::Frame) -> Self {
        let sent_at = frame.sent_at();
        Self {
            kind: InboundKind::parse(&frame.kind),
            payload: frame.data,
            observed_at: OffsetDateTime::now_utc(),
            sent_at,
        }
    }

    /// Build a message directly, stamped now. Handy for local relays.
    #[must_use]
    pub fn new(kind: InboundKind, payload: Value) -> Self {
        Self { kind, payload, observed_at: OffsetDateTime::now_utc(), sent_at: None }
    }
}

/// Inputs to the machine.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Caller asked to connect.
    Connect,
    /// Caller asked to disconnect; sticky until the next connect.
    Disconnect,
    /// Caller forced a fresh connection with a reset retry counter.
    Reconnect,
    /// Mount flag changed.
    SetEnabled(bool),
    Opened(ConnId),
    /// Raw text frame from the transport.
    Frame(ConnId, String),
    TransportError(ConnId, String),
    Closed(ConnId),
    /// The transport could not even be constructed.
    OpenFailed(ConnId, String),
    HeartbeatTick,
    ReconnectDue,
    Env(EnvSignal),
}

/// Work the driver must perform, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    Open(ConnId),
    Close(ConnId),
    StartHeartbeat(Duration),
    StopHeartbeat,
    SendPing,
    ScheduleReconnect(Duration),
    CancelReconnect,
    Deliver(InboundMessage),
}

#[derive(Debug)]
pub struct ChannelMachine {
    label: String,
    config: ChannelConfig,
    status: ConnectionStatus,
    retry_count: u32,
    manually_closed: bool,
    enabled: bool,
    page_visible: bool,
    heartbeat_running: bool,
    reconnect_pending: bool,
    next_conn: ConnId,
    current: Option<ConnId>,
    closing: Option<ConnId>,
}

impl ChannelMachine {
    /// A fresh machine in `Disconnected`. `label` only feeds log fields.
    #[must_use]
    pub fn new(label: impl Into<String>, config: ChannelConfig, enabled: bool) -> Self {
        Self {
            label: label.into(),
            config,
            status: ConnectionStatus::Disconnected,
            retry_count: 0,
            manually_closed: false,
            enabled,
            page_visible: true,
            heartbeat_running: false,
            reconnect_pending: false,
            next_conn: 0,
            current: None,
            closing: None,
        }
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    #[must_use]
    pub fn is_manually_closed(&self) -> bool {
        self.manually_closed
    }

    #[must_use]
    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat_running
    }

    #[must_use]
    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    /// Connection id whose events are currently honoured.
    #[must_use]
    pub fn current_conn(&self) -> Option<ConnId> {
        self.current
    }

    /// Advance the machine by one event.
    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        let mut fx = Vec::new();
        match event {
            Event::Connect => self.connect(&mut fx),
            Event::Disconnect => self.disconnect(&mut fx),
            Event::Reconnect => self.reconnect(&mut fx),
            Event::SetEnabled(enabled) => {
                if enabled == self.enabled {
                    return fx;
                }
                self.enabled = enabled;
                if enabled {
                    self.connect(&mut fx);
                } else {
                    self.disconnect(&mut fx);
                }
            }
            Event::Opened(conn) => self.on_opened(conn, &mut fx),
            Event::Frame(conn, text) => self.on_frame(conn, &text, &mut fx),
            Event::TransportError(conn, message) => self.on_error(conn, &message, &mut fx),
            Event::Closed(conn) => self.on_closed(conn, &mut fx),
            Event::OpenFailed(conn, message) => self.on_open_failed(conn, &message, &mut fx),
            Event::HeartbeatTick => {
                if self.status == ConnectionStatus::Connected && self.heartbeat_running {
                    fx.push(Effect::SendPing);
                }
            }
            Event::ReconnectDue => {
                self.reconnect_pending = false;
                if !self.manually_closed && self.enabled {
                    self.connect(&mut fx);
                }
            }
            Event::Env(signal) => self.on_env(signal, &mut fx),
        }
        fx
    }

    fn connect(&mut self, fx: &mut Vec<Effect>) {
        if !self.enabled {
            debug!(channel = %self.label, "connect ignored: channel disabled");
            return;
        }
        if matches!(self.status, ConnectionStatus::Connecting | ConnectionStatus::Connected) {
            return;
        }
        self.manually_closed = false;
        self.cancel_reconnect(fx);
        self.next_conn += 1;
        let conn = self.next_conn;
        self.current = Some(conn);
        self.status = ConnectionStatus::Connecting;
        debug!(channel = %self.label, conn, attempt = self.retry_count, "opening transport");
        fx.push(Effect::Open(conn));
    }

    fn disconnect(&mut self, fx: &mut Vec<Effect>) {
        self.manually_closed = true;
        self.cancel_reconnect(fx);
        self.stop_heartbeat(fx);
        if let Some(conn) = self.current.take() {
            fx.push(Effect::Close(conn));
            self.closing = Some(conn);
            self.status = ConnectionStatus::Closing;
        } else {
            self.status = ConnectionStatus::Disconnected;
        }
        info!(channel = %self.label, "channel disconnected by caller");
    }

    fn reconnect(&mut self, fx: &mut Vec<Effect>) {
        self.disconnect(fx);
        self.retry_count = 0;
        self.connect(fx);
    }

    fn on_opened(&mut self, conn: ConnId, fx: &mut Vec<Effect>) {
        if self.current != Some(conn) {
            return;
        }
        self.status = ConnectionStatus::Connected;
        self.retry_count = 0;
        info!(channel = %self.label, conn, "channel connected");
        if self.page_visible {
            self.start_heartbeat(fx);
        }
    }

    fn on_frame(&mut self, conn: ConnId, text: &str, fx: &mut Vec<Effect>) {
        if self.current != Some(conn) {
            return;
        }
        match frames::decode_frame(text) {
            Ok(frame) if frame.is_heartbeat() => {}
            Ok(frame) => fx.push(Effect::Deliver(InboundMessage::from_frame(frame))),
            Err(e) => warn!(channel = %self.label, error = %e, "dropping malformed frame"),
        }
    }

    fn on_error(&mut self, conn: ConnId, message: &str, fx: &mut Vec<Effect>) {
        if self.current != Some(conn) {
            return;
        }
        warn!(channel = %self.label, conn, error = message, "channel transport error");
        self.status = ConnectionStatus::Error;
        self.stop_heartbeat(fx);
    }

    fn on_closed(&mut self, conn: ConnId, fx: &mut Vec<Effect>) {
        if self.closing == Some(conn) {
            self.settle_closing();
            return;
        }
        if self.current != Some(conn) {
            return;
        }
        self.current = None;
        self.stop_heartbeat(fx);

        if !self.manually_closed && self.enabled && self.retry_count < self.config.max_reconnect_attempts {
            self.retry_count += 1;
            self.status = ConnectionStatus::Reconnecting;
            self.reconnect_pending = true;
            info!(
                channel = %self.label,
                attempt = self.retry_count,
                max = self.config.max_reconnect_attempts,
                "channel closed unexpectedly, scheduling reconnect"
            );
            fx.push(Effect::ScheduleReconnect(self.config.reconnect_interval));
        } else {
            if !self.manually_closed {
                warn!(channel = %self.label, attempts = self.retry_count, "channel reconnect attempts exhausted");
            }
            self.status = ConnectionStatus::Disconnected;
        }
    }

    fn on_open_failed(&mut self, conn: ConnId, message: &str, fx: &mut Vec<Effect>) {
        if self.closing == Some(conn) {
            self.settle_closing();
            return;
        }
        if self.current != Some(conn) {
            return;
        }
        warn!(channel = %self.label, error = message, "channel transport could not be constructed");
        self.current = None;
        self.stop_heartbeat(fx);
        self.status = ConnectionStatus::Error;
    }

    fn on_env(&mut self, signal: EnvSignal, fx: &mut Vec<Effect>) {
        match signal {
            EnvSignal::Hidden => {
                self.page_visible = false;
                self.stop_heartbeat(fx);
            }
            EnvSignal::Visible => {
                self.page_visible = true;
                match self.status {
                    ConnectionStatus::Connected => self.start_heartbeat(fx),
                    ConnectionStatus::Disconnected if self.enabled && !self.manually_closed => {
                        debug!(channel = %self.label, "view visible while disconnected, connecting");
                        self.connect(fx);
                    }
                    _ => {}
                }
            }
            EnvSignal::Offline => {
                info!(channel = %self.label, "network offline");
                self.cancel_reconnect(fx);
                self.stop_heartbeat(fx);
                if let Some(conn) = self.current.take() {
                    fx.push(Effect::Close(conn));
                }
                self.status = ConnectionStatus::Disconnected;
            }
            EnvSignal::Online => {
                if self.status == ConnectionStatus::Disconnected && self.enabled && !self.manually_closed {
                    info!(channel = %self.label, "network online, reconnecting");
                    self.reconnect(fx);
                }
            }
        }
    }

    fn settle_closing(&mut self) {
        self.closing = None;
        if self.status == ConnectionStatus::Closing {
            self.status = ConnectionStatus::Disconnected;
        }
    }

    fn start_heartbeat(&mut self, fx: &mut Vec<Effect>) {
        if self.heartbeat_running || !self.config.heartbeat_enabled() {
            return;
        }
        self.heartbeat_running = true;
        fx.push(Effect::StartHeartbeat(self.config.heartbeat_interval));
    }

    fn stop_heartbeat(&mut self, fx: &mut Vec<Effect>) {
        if self.heartbeat_running {
            self.heartbeat_running = false;
            fx.push(Effect::StopHeartbeat);
        }
    }

    fn cancel_reconnect(&mut self, fx: &mut Vec<Effect>) {
        if self.reconnect_pending {
            self.reconnect_pending = false;
            fx.push(Effect::CancelReconnect);
        }
    }
}

#[cfg(test)]
#[path = "machine_test.rs"]
mod tests;
