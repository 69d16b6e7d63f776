//! Tokio driver that executes a [`ChannelMachine`]'s effects.
//!
//! DESIGN
//! ======
//! One driver task per channel owns the machine, the heartbeat interval and
//! the reconnect timer, and is their only mutator. It `select!`s over:
//! - caller commands (connect, disconnect, reconnect, send, enable)
//! - transport events tagged with their connection id
//! - environment signals
//! - heartbeat ticks and the reconnect deadline
//!
//! Each transport lives in its own pump task, which owns the socket and
//! relays text both ways. Dropping a connection's outbound sender is how the
//! driver closes it; the pump then closes the socket and reports `Closed`.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, warn};

use super::env::{EnvSignal, Environment};
use super::machine::{ChannelMachine, ConnId, ConnectionStatus, Effect, Event, InboundMessage};
use super::transport::{Connector, Transport};
use crate::config::ChannelConfig;

enum Command {
    Machine(Event),
    Send(frames::Frame),
    Shutdown,
}

enum Outgoing {
    Text(String),
}

enum TransportEvent {
    Opened,
    Frame(String),
    Error(String),
    Closed,
    OpenFailed(String),
}

impl TransportEvent {
    fn into_event(self, conn: ConnId) -> Event {
        match self {
            Self::Opened => Event::Opened(conn),
            Self::Frame(text) => Event::Frame(conn, text),
            Self::Error(message) => Event::TransportError(conn, message),
            Self::Closed => Event::Closed(conn),
            Self::OpenFailed(message) => Event::OpenFailed(conn, message),
        }
    }
}

type Tagged = (ConnId, TransportEvent);

// =============================================================================
// HANDLE
// =============================================================================

/// Cheap, cloneable control surface for a running channel.
#[derive(Clone)]
pub struct ChannelHandle {
    label: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
}

impl ChannelHandle {
    pub fn connect(&self) {
        self.event(Event::Connect);
    }

    pub fn disconnect(&self) {
        self.event(Event::Disconnect);
    }

    pub fn reconnect(&self) {
        self.event(Event::Reconnect);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.event(Event::SetEnabled(enabled));
    }

    /// Queue a frame for the open connection.
    ///
    /// Returns `false` (and logs a warning) when the channel is not connected;
    /// nothing is sent in that case.
    pub fn send(&self, frame: frames::Frame) -> bool {
        if !self.status().is_connected() {
            warn!(channel = %self.label, kind = %frame.kind, "send while not connected; dropping");
            return false;
        }
        self.commands.send(Command::Send(frame)).is_ok()
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Watch status transitions.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    fn event(&self, event: Event) {
        if self.commands.send(Command::Machine(event)).is_err() {
            debug!(channel = %self.label, "channel driver already stopped");
        }
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// Owner of one channel's driver task.
///
/// Dropping the client aborts the driver, which drops the live connection's
/// outbound sender and so closes the socket.
pub struct ChannelClient {
    handle: ChannelHandle,
    inbound: Option<mpsc::UnboundedReceiver<InboundMessage>>,
    task: Option<JoinHandle<()>>,
}

impl ChannelClient {
    /// Start the driver for `url`. When `enabled`, a connect is issued at once.
    #[must_use]
    pub fn spawn(
        label: impl Into<String>,
        url: impl Into<String>,
        config: ChannelConfig,
        connector: Arc<dyn Connector>,
        env: &Environment,
        enabled: bool,
    ) -> Self {
        let label: String = label.into();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);

        let driver = Driver {
            url: url.into(),
            machine: ChannelMachine::new(label.clone(), config, enabled),
            connector,
            link: None,
            heartbeat: None,
            reconnect_at: None,
            events_tx,
            inbound_tx,
            status_tx,
        };
        let task = tokio::spawn(driver.run(cmd_rx, events_rx, env.subscribe()));

        let handle = ChannelHandle { label: label.into(), commands: cmd_tx, status: status_rx };
        if enabled {
            handle.connect();
        }
        Self { handle, inbound: Some(inbound_rx), task: Some(task) }
    }

    #[must_use]
    pub fn handle(&self) -> ChannelHandle {
        self.handle.clone()
    }

    /// Take the typed inbound stream. Only the first call returns `Some`.
    pub fn take_inbound(&mut self) -> Option<mpsc::UnboundedReceiver<InboundMessage>> {
        self.inbound.take()
    }

    /// Disconnect, clear timers and wait for the driver to exit.
    pub async fn shutdown(mut self) {
        let _ = self.handle.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ChannelClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// =============================================================================
// DRIVER
// =============================================================================

struct Link {
    conn: ConnId,
    outbound: mpsc::UnboundedSender<Outgoing>,
}

struct Driver {
    url: String,
    machine: ChannelMachine,
    connector: Arc<dyn Connector>,
    link: Option<Link>,
    heartbeat: Option<Interval>,
    reconnect_at: Option<Pin<Box<Sleep>>>,
    events_tx: mpsc::UnboundedSender<Tagged>,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Tagged>,
        mut env: broadcast::Receiver<EnvSignal>,
    ) {
        let mut env_open = true;
        loop {
            let event = tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Machine(event)) => event,
                    Some(Command::Send(frame)) => {
                        self.send_frame(&frame);
                        continue;
                    }
                    Some(Command::Shutdown) | None => break,
                },
                Some((conn, event)) = events.recv() => event.into_event(conn),
                signal = env.recv(), if env_open => match signal {
                    Ok(signal) => Event::Env(signal),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "environment signals lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        env_open = false;
                        continue;
                    }
                },
                () = heartbeat_tick(&mut self.heartbeat) => Event::HeartbeatTick,
                () = reconnect_due(&mut self.reconnect_at) => {
                    self.reconnect_at = None;
                    Event::ReconnectDue
                }
            };
            self.apply(event);
        }

        // Teardown: close the transport and clear every timer.
        self.apply(Event::Disconnect);
        self.heartbeat = None;
        self.reconnect_at = None;
        self.status_tx.send_replace(ConnectionStatus::Disconnected);
    }

    fn apply(&mut self, event: Event) {
        for effect in self.machine.handle(event) {
            self.perform(effect);
        }
        let status = self.machine.status();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::Open(conn) => self.open(conn),
            Effect::Close(conn) => {
                if self.link.as_ref().is_some_and(|link| link.conn == conn) {
                    // Dropping the sender makes the pump close the socket.
                    self.link = None;
                }
            }
            Effect::StartHeartbeat(period) => {
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.heartbeat = Some(interval);
            }
            Effect::StopHeartbeat => self.heartbeat = None,
            Effect::SendPing => self.send_frame(&frames::Frame::ping()),
            Effect::ScheduleReconnect(delay) => {
                self.reconnect_at = Some(Box::pin(tokio::time::sleep(delay)));
            }
            Effect::CancelReconnect => self.reconnect_at = None,
            Effect::Deliver(message) => {
                if self.inbound_tx.send(message).is_err() {
                    debug!(url = %self.url, "inbound consumer gone; message dropped");
                }
            }
        }
    }

    fn open(&mut self, conn: ConnId) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.link = Some(Link { conn, outbound: outbound_tx });
        tokio::spawn(open_connection(
            conn,
            self.url.clone(),
            Arc::clone(&self.connector),
            outbound_rx,
            self.events_tx.clone(),
        ));
    }

    fn send_frame(&self, frame: &frames::Frame) {
        let sent = self.machine.status().is_connected()
            && self
                .link
                .as_ref()
                .is_some_and(|link| link.outbound.send(Outgoing::Text(frames::encode_frame(frame))).is_ok());
        if !sent {
            warn!(url = %self.url, kind = %frame.kind, "send while not connected; dropping");
        }
    }
}

async fn heartbeat_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending::<()>().await,
    }
}

async fn reconnect_due(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => pending::<()>().await,
    }
}

// =============================================================================
// CONNECTION TASKS
// =============================================================================

async fn open_connection(
    conn: ConnId,
    url: String,
    connector: Arc<dyn Connector>,
    outbound: mpsc::UnboundedReceiver<Outgoing>,
    events: mpsc::UnboundedSender<Tagged>,
) {
    match connector.open(&url).await {
        Ok(transport) => pump(conn, transport, outbound, events).await,
        Err(e) if e.is_construction() => {
            let _ = events.send((conn, TransportEvent::OpenFailed(e.to_string())));
        }
        Err(e) => {
            // A refused handshake behaves like a browser socket: error, then close.
            let _ = events.send((conn, TransportEvent::Error(e.to_string())));
            let _ = events.send((conn, TransportEvent::Closed));
        }
    }
}

async fn pump(
    conn: ConnId,
    mut transport: Box<dyn Transport>,
    mut outbound: mpsc::UnboundedReceiver<Outgoing>,
    events: mpsc::UnboundedSender<Tagged>,
) {
    let _ = events.send((conn, TransportEvent::Opened));

    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = transport.send(text).await {
                        let _ = events.send((conn, TransportEvent::Error(e.to_string())));
                        break;
                    }
                }
                None => {
                    transport.close().await;
                    break;
                }
            },
            incoming = transport.recv() => match incoming {
                Some(Ok(text)) => {
                    let _ = events.send((conn, TransportEvent::Frame(text)));
                }
                Some(Err(e)) => {
                    let _ = events.send((conn, TransportEvent::Error(e.to_string())));
                    break;
                }
                None => break,
            },
        }
    }

    let _ = events.send((conn, TransportEvent::Closed));
}

#[cfg(test)]
#[path = "driver_test.rs"]
mod tests;
