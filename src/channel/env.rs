//! Injected environment signals (page visibility, network reachability).
//!
//! A browser would deliver these as global events. Here they are an explicit
//! broadcast source so every channel a surface owns sees the same signals,
//! and tests can simulate them.

use tokio::sync::broadcast;

const SIGNAL_BUFFER: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvSignal {
    /// The hosting view became hidden.
    Hidden,
    /// The hosting view became visible again.
    Visible,
    /// Network reachability was lost.
    Offline,
    /// Network reachability came back.
    Online,
}

/// Shared source of [`EnvSignal`]s.
#[derive(Clone, Debug)]
pub struct Environment {
    tx: broadcast::Sender<EnvSignal>,
}

impl Environment {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SIGNAL_BUFFER);
        Self { tx }
    }

    /// Deliver a signal to every subscribed channel. Returns the number of
    /// receivers reached.
    pub fn emit(&self, signal: EnvSignal) -> usize {
        self.tx.send(signal).unwrap_or(0)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EnvSignal> {
        self.tx.subscribe()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}
