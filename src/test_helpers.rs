//! In-memory fakes for the transport and snapshot seams.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::api::{ApiError, SnapshotSource};
use crate::channel::{Connector, Transport, TransportError};
use crate::state::LiveResults;

/// Let every spawned task run until idle. With paused time this advances the
/// clock by a millisecond, far below any timer under test.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// =============================================================================
// CONNECTOR
// =============================================================================

#[derive(Clone, Copy, Debug)]
pub enum Plan {
    Accept,
    Refuse,
    InvalidUrl,
}

/// Server side of one accepted fake connection.
struct Peer {
    url: String,
    to_client: Option<mpsc::UnboundedSender<String>>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

/// Connector that follows a script of accept/refuse decisions. Attempts past
/// the end of the script are refused, unless `accept_all` is set.
#[derive(Default)]
pub struct FakeConnector {
    plan: Mutex<VecDeque<Plan>>,
    accept_all: bool,
    attempts: AtomicUsize,
    peers: Mutex<Vec<Peer>>,
}

impl FakeConnector {
    pub fn scripted(plan: &[Plan]) -> Arc<Self> {
        Arc::new(Self { plan: Mutex::new(plan.iter().copied().collect()), ..Self::default() })
    }

    pub fn accepting() -> Arc<Self> {
        Arc::new(Self { accept_all: true, ..Self::default() })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Index of the newest peer whose URL ends with `suffix`.
    pub fn peer_for(&self, suffix: &str) -> usize {
        let peers = self.peers.lock().unwrap();
        peers.iter().rposition(|p| p.url.ends_with(suffix)).unwrap()
    }

    pub fn push(&self, peer: usize, text: &str) {
        let peers = self.peers.lock().unwrap();
        peers[peer].to_client.as_ref().unwrap().send(text.to_owned()).unwrap();
    }

    /// Server-initiated close.
    pub fn hang_up(&self, peer: usize) {
        self.peers.lock().unwrap()[peer].to_client = None;
    }

    pub fn sent(&self, peer: usize) -> Vec<String> {
        self.peers.lock().unwrap()[peer].sent.lock().unwrap().clone()
    }

    pub fn client_closed(&self, peer: usize) -> bool {
        self.peers.lock().unwrap()[peer].closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let fallback = if self.accept_all { Plan::Accept } else { Plan::Refuse };
        let plan = self.plan.lock().unwrap().pop_front().unwrap_or(fallback);
        match plan {
            Plan::Accept => {
                let (tx, rx) = mpsc::unbounded_channel();
                let sent = Arc::new(Mutex::new(Vec::new()));
                let closed = Arc::new(AtomicBool::new(false));
                self.peers.lock().unwrap().push(Peer {
                    url: url.to_owned(),
                    to_client: Some(tx),
                    sent: Arc::clone(&sent),
                    closed: Arc::clone(&closed),
                });
                Ok(Box::new(FakeTransport { incoming: rx, sent, closed }))
            }
            Plan::Refuse => Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))),
            Plan::InvalidUrl => Err(TransportError::InvalidUrl("bad host".into())),
        }
    }
}

struct FakeTransport {
    incoming: mpsc::UnboundedReceiver<String>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// =============================================================================
// SNAPSHOT SOURCE
// =============================================================================

pub type Step = (Duration, Result<LiveResults, String>);

/// Snapshot source that replays delayed results. Past the script it answers
/// an empty document at once.
#[derive(Default)]
pub struct ScriptedSource {
    calls: AtomicUsize,
    script: Mutex<VecDeque<Step>>,
}

impl ScriptedSource {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self { calls: AtomicUsize::new(0), script: Mutex::new(steps.into()) })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSource {
    async fn live_results(&self, _survey_id: &str) -> Result<LiveResults, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (delay, result) = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((Duration::ZERO, Ok(LiveResults::default())));
        tokio::time::sleep(delay).await;
        result.map_err(ApiError::Request)
    }
}
