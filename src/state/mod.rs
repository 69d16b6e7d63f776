//! Plain data owned by the aggregator and dispatcher.

pub mod activity;
pub mod presenter;
pub mod snapshot;

pub use activity::{ActivityEntry, ActivityFeed, ActivityKind, NewActivityIndicator};
pub use presenter::{Phase, PresenterState, clamp_index, requested_focus};
pub use snapshot::{CountUpdate, LiveResults, QuestionResult, SessionSnapshot};

