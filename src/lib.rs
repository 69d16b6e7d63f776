//! Real-time synchronization layer for live survey sessions.
//!
//! - [`channel`]: reconnecting push channels (state machine, tokio driver,
//!   websocket transport)
//! - [`aggregator`]: the authoritative [`state::SessionSnapshot`], merged
//!   from polls and pushes
//! - [`dispatcher`]: presenter commands with optimistic local state
//! - [`state`]: snapshot, presenter state and the activity feed
//! - [`session`]: all of the above wired together for one survey

pub mod aggregator;
pub mod api;
pub mod channel;
pub mod config;
pub mod dispatcher;
mod payload;
pub mod session;
pub mod state;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use aggregator::{Aggregator, AggregatorView};
pub use api::{ApiError, HttpSnapshotSource, SnapshotSource};
pub use config::{ConfigError, SyncConfig};
pub use dispatcher::{CommandDispatcher, DispatchOutcome};
pub use session::{LiveSession, SessionMessage};
