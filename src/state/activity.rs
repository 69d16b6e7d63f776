//! Bounded activity feed and the transient "N new" indicator.
//!
//! DESIGN
//! ======
//! The feed is a `VecDeque` with the newest entry at the front, so insert and
//! eviction are both O(1). The indicator does not diff the feed length, which
//! stops growing at capacity; it diffs the feed's monotonic insert counter
//! instead.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::time::Instant;
use uuid::Uuid;

use crate::payload::pick_str;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    #[serde(alias = "join", alias = "joined")]
    ParticipantJoined,
    #[serde(alias = "leave", alias = "left")]
    ParticipantLeft,
    #[serde(alias = "response", alias = "answer")]
    ResponseSubmitted,
    #[serde(alias = "completion", alias = "completed")]
    SurveyCompleted,
    QuestionChanged,
    SurveyStarted,
    SurveyPaused,
    SurveyResumed,
    SurveyStopped,
    #[serde(other)]
    Other,
}

impl ActivityKind {
    /// Map a server activity type. Unknown names become [`ActivityKind::Other`].
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        serde_json::from_value(Value::String(raw.trim().to_ascii_lowercase())).unwrap_or(Self::Other)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ActivityEntry {
    pub id: String,
    pub kind: ActivityKind,
    pub occurred_at: OffsetDateTime,
    pub actor_label: Option<String>,
    pub question_ref: Option<String>,
    pub metadata: Option<Value>,
}

impl ActivityEntry {
    /// Build an entry from an `activity` push. Missing ids get a fresh v4
    /// UUID; a missing or unparseable timestamp falls back to `observed_at`.
    #[must_use]
    pub fn from_payload(payload: &Value, observed_at: OffsetDateTime) -> Self {
        let id = match payload.get("id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        let kind = pick_str(payload, &["type", "kind", "activity_type", "activityType"])
            .map_or(ActivityKind::Other, ActivityKind::parse);
        let occurred_at = pick_str(payload, &["occurred_at", "occurredAt", "timestamp", "created_at"])
            .and_then(|raw| OffsetDateTime::parse(raw, &Rfc3339).ok())
            .unwrap_or(observed_at);
        let actor_label = pick_str(
            payload,
            &["actor_label", "actorLabel", "participant_name", "participantName", "actor", "participant_id"],
        )
        .map(str::to_owned);
        let question_ref = pick_str(payload, &["question_ref", "questionRef", "question_title", "question_id", "question"])
            .map(str::to_owned);
        let metadata = payload.get("metadata").filter(|m| !m.is_null()).cloned();

        Self { id, kind, occurred_at, actor_label, question_ref, metadata }
    }
}

// =============================================================================
// FEED
// =============================================================================

/// Capped, newest-first activity log.
#[derive(Clone, Debug)]
pub struct ActivityFeed {
    entries: VecDeque<ActivityEntry>,
    capacity: usize,
    total_inserted: u64,
}

impl ActivityFeed {
    /// Feed holding at most `capacity` entries (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { entries: VecDeque::with_capacity(capacity), capacity, total_inserted: 0 }
    }

    /// Insert at the front. Returns the evicted oldest entry, if any.
    pub fn push(&mut self, entry: ActivityEntry) -> Option<ActivityEntry> {
        self.entries.push_front(entry);
        self.total_inserted += 1;
        if self.entries.len() > self.capacity { self.entries.pop_back() } else { None }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries ever inserted, including evicted ones.
    #[must_use]
    pub fn total_inserted(&self) -> u64 {
        self.total_inserted
    }

    /// Newest first.
    pub fn iter(&self) -> impl Iterator<Item = &ActivityEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn newest(&self) -> Option<&ActivityEntry> {
        self.entries.front()
    }

    /// Display window of the `n` newest entries.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<ActivityEntry> {
        self.entries.iter().take(n).cloned().collect()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<ActivityEntry> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for ActivityFeed {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_ACTIVITY_CAPACITY)
    }
}

// =============================================================================
// NEW-ACTIVITY INDICATOR
// =============================================================================

/// "N new" badge that clears itself a fixed time after it was raised.
///
/// Further activity while the badge is up adds to the count but does not
/// extend its lifetime.
#[derive(Clone, Debug)]
pub struct NewActivityIndicator {
    ttl: Duration,
    last_seen: u64,
    count: u64,
    raised_at: Option<Instant>,
}

impl NewActivityIndicator {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, last_seen: 0, count: 0, raised_at: None }
    }

    /// Record the feed's current insert total. Returns the badge count.
    pub fn observe(&mut self, total_inserted: u64) -> u64 {
        self.observe_at(total_inserted, Instant::now())
    }

    pub fn observe_at(&mut self, total_inserted: u64, now: Instant) -> u64 {
        let fresh = total_inserted.saturating_sub(self.last_seen);
        self.last_seen = total_inserted;
        if fresh > 0 {
            if self.is_raised_at(now) {
                self.count += fresh;
            } else {
                self.count = fresh;
                self.raised_at = Some(now);
            }
        }
        self.count_at(now)
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count_at(Instant::now())
    }

    #[must_use]
    pub fn count_at(&self, now: Instant) -> u64 {
        if self.is_raised_at(now) { self.count } else { 0 }
    }

    /// When the current badge expires, if one is up.
    #[must_use]
    pub fn expires_at(&self) -> Option<Instant> {
        self.raised_at.map(|at| at + self.ttl)
    }

    /// Drop the badge without forgetting what has been seen.
    pub fn clear(&mut self) {
        self.count = 0;
        self.raised_at = None;
    }

    fn is_raised_at(&self, now: Instant) -> bool {
        self.raised_at.is_some_and(|at| now < at + self.ttl)
    }
}

impl Default for NewActivityIndicator {
    fn default() -> Self {
        Self::new(Duration::from_millis(crate::config::DEFAULT_NEW_ACTIVITY_TTL_MS))
    }
}

#[cfg(test)]
#[path = "activity_test.rs"]
mod tests;
