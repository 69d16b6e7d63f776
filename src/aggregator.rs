//! Session state aggregator.
//!
//! DESIGN
//! ======
//! One aggregator owns the [`SessionSnapshot`] for one survey. It merges
//! three inputs:
//! - snapshot fetches issued by `refresh()` (manual, timer or push signal)
//! - explicit counters from `participant_update` / `response_update`
//! - `activity` and `error` pushes
//!
//! Fetch ordering: every `refresh()` takes a new generation from the
//! [`RefreshGate`] and aborts the previous fetch task. A result is applied
//! only if its generation is still the newest issued, so a slow early fetch
//! can never overwrite a later one even if the abort loses the race.
//! Pushed counters record the newest generation issued when they landed; a
//! fetch issued at or before that generation keeps the pushed counters and
//! only contributes its per-question results.
//!
//! State sits behind a `std::sync::Mutex` that is never held across an
//! `.await`. Consumers read copies through a `watch` channel.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use frames::InboundKind;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::{ApiError, SnapshotSource};
use crate::channel::InboundMessage;
use crate::config::AggregatorConfig;
use crate::payload::pick_str;
use crate::state::{ActivityEntry, ActivityFeed, CountUpdate, LiveResults, NewActivityIndicator, SessionSnapshot};

const ERROR_KEYS: &[&str] = &["message", "error", "detail", "reason"];

type CountListener = Arc<dyn Fn(usize) + Send + Sync>;

// =============================================================================
// REFRESH GATE
// =============================================================================

/// Monotonic refresh ticket counter. Only the newest ticket may apply.
#[derive(Debug, Default)]
pub struct RefreshGate {
    issued: u64,
}

impl RefreshGate {
    pub fn issue(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    #[must_use]
    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.issued
    }

    #[must_use]
    pub fn latest(&self) -> u64 {
        self.issued
    }
}

// =============================================================================
// VIEW
// =============================================================================

/// Read-only copy of everything a surface renders.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AggregatorView {
    pub snapshot: SessionSnapshot,
    /// Last fetch failure or server-reported error; cleared by the next
    /// successful fetch.
    pub error: Option<String>,
    /// Newest first.
    pub activity: Vec<ActivityEntry>,
    /// "N new" badge; zero once it has expired.
    pub new_activity: u64,
    /// A fetch is in flight.
    pub refreshing: bool,
}

// =============================================================================
// AGGREGATOR
// =============================================================================

struct Inner {
    snapshot: SessionSnapshot,
    error: Option<String>,
    feed: ActivityFeed,
    badge: NewActivityIndicator,
    gate: RefreshGate,
    /// Newest generation issued when counters were last pushed.
    counts_pushed_at: u64,
    question_count_listener: Option<CountListener>,
    in_flight: Option<JoinHandle<()>>,
    auto_refresh: Option<JoinHandle<()>>,
    badge_expiry: Option<(Instant, JoinHandle<()>)>,
}

impl Inner {
    fn abort_tasks(&mut self) {
        if let Some(task) = self.in_flight.take() {
            task.abort();
        }
        if let Some(task) = self.auto_refresh.take() {
            task.abort();
        }
        if let Some((_, task)) = self.badge_expiry.take() {
            task.abort();
        }
    }
}

struct Shared {
    survey_id: String,
    config: AggregatorConfig,
    source: Arc<dyn SnapshotSource>,
    inner: Mutex<Inner>,
    view: watch::Sender<AggregatorView>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.inner.get_mut().unwrap_or_else(PoisonError::into_inner).abort_tasks();
    }
}

/// Cloneable handle to one survey's aggregator.
///
/// Background tasks hold only weak references. Once the last handle is
/// dropped, timers and any fetch in flight stop.
#[derive(Clone)]
pub struct Aggregator {
    shared: Arc<Shared>,
}

impl Aggregator {
    #[must_use]
    pub fn new(survey_id: impl Into<String>, config: AggregatorConfig, source: Arc<dyn SnapshotSource>) -> Self {
        let inner = Inner {
            snapshot: SessionSnapshot::default(),
            error: None,
            feed: ActivityFeed::new(config.activity_capacity),
            badge: NewActivityIndicator::new(config.new_activity_ttl),
            gate: RefreshGate::default(),
            counts_pushed_at: 0,
            question_count_listener: None,
            in_flight: None,
            auto_refresh: None,
            badge_expiry: None,
        };
        let (view, _) = watch::channel(AggregatorView::default());
        Self {
            shared: Arc::new(Shared { survey_id: survey_id.into(), config, source, inner: Mutex::new(inner), view }),
        }
    }

    #[must_use]
    pub fn survey_id(&self) -> &str {
        &self.shared.survey_id
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AggregatorView> {
        self.shared.view.subscribe()
    }

    #[must_use]
    pub fn view(&self) -> AggregatorView {
        self.shared.view.borrow().clone()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.view.borrow().snapshot.clone()
    }

    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.shared.view.borrow().error.clone()
    }

    /// Display window of the `n` newest activity entries.
    #[must_use]
    pub fn recent_activity(&self, n: usize) -> Vec<ActivityEntry> {
        self.lock().feed.recent(n)
    }

    /// Fetch a fresh snapshot, superseding any fetch still in flight.
    /// Returns the generation issued for this fetch.
    pub fn refresh(&self) -> u64 {
        let mut inner = self.lock();
        let generation = inner.gate.issue();
        if let Some(previous) = inner.in_flight.take() {
            previous.abort();
            debug!(survey_id = %self.shared.survey_id, generation, "superseded in-flight refresh");
        }

        let weak = Arc::downgrade(&self.shared);
        let source = Arc::clone(&self.shared.source);
        let survey_id = self.shared.survey_id.clone();
        inner.in_flight = Some(tokio::spawn(async move {
            let result = source.live_results(&survey_id).await;
            if let Some(aggregator) = upgrade(&weak) {
                aggregator.complete_refresh(generation, result);
            }
        }));
        self.publish(&inner);
        generation
    }

    fn complete_refresh(&self, generation: u64, result: Result<LiveResults, ApiError>) {
        let mut inner = self.lock();
        if !inner.gate.is_current(generation) {
            debug!(
                survey_id = %self.shared.survey_id,
                generation,
                latest = inner.gate.latest(),
                "discarding stale refresh"
            );
            return;
        }
        inner.in_flight = None;
        match result {
            Ok(results) => {
                let mut snapshot = SessionSnapshot::from_live_results(results, OffsetDateTime::now_utc());
                if generation <= inner.counts_pushed_at {
                    debug!(survey_id = %self.shared.survey_id, generation, "keeping counters pushed after this fetch was issued");
                    snapshot.participant_count = inner.snapshot.participant_count;
                    snapshot.response_count = inner.snapshot.response_count;
                    snapshot.completed_count = inner.snapshot.completed_count;
                }
                inner.snapshot = snapshot;
                inner.error = None;
            }
            Err(e) => {
                warn!(survey_id = %self.shared.survey_id, error = %e, "live-results fetch failed; keeping last snapshot");
                inner.error = Some(e.to_string());
            }
        }
        self.publish(&inner);
    }

    /// Run `refresh()` every `refresh_interval` until stopped. The first tick
    /// fires one interval from now.
    pub fn start_auto_refresh(&self) {
        let period = self.shared.config.refresh_interval;
        if period.is_zero() {
            warn!(survey_id = %self.shared.survey_id, "refresh interval is zero; auto refresh not started");
            return;
        }
        let mut inner = self.lock();
        if inner.auto_refresh.is_some() {
            return;
        }
        let weak = Arc::downgrade(&self.shared);
        inner.auto_refresh = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(aggregator) = upgrade(&weak) else {
                    break;
                };
                aggregator.refresh();
            }
        }));
        info!(survey_id = %self.shared.survey_id, ?period, "auto refresh started");
    }

    pub fn stop_auto_refresh(&self) {
        if let Some(task) = self.lock().auto_refresh.take() {
            task.abort();
            info!(survey_id = %self.shared.survey_id, "auto refresh stopped");
        }
    }

    #[must_use]
    pub fn auto_refresh_running(&self) -> bool {
        self.lock().auto_refresh.is_some()
    }

    /// Call `listener` with the snapshot's question count now and on every
    /// publish, before subscribers see the new view. Replaces any previous
    /// listener.
    pub fn watch_question_count(&self, listener: impl Fn(usize) + Send + Sync + 'static) {
        let mut inner = self.lock();
        let listener: CountListener = Arc::new(listener);
        listener(inner.snapshot.question_count());
        inner.question_count_listener = Some(listener);
    }

    /// Fold one inbound push into the aggregate.
    pub fn handle_message(&self, message: &InboundMessage) {
        match &message.kind {
            InboundKind::AnalyticsUpdated => {
                self.refresh();
            }
            InboundKind::ParticipantUpdate | InboundKind::ResponseUpdate => {
                let counts = CountUpdate::from_payload(&message.payload);
                if counts.is_empty() {
                    // No explicit counts: treat as a change signal.
                    self.refresh();
                } else {
                    let mut inner = self.lock();
                    inner.snapshot.apply_counts(counts, message.observed_at);
                    inner.counts_pushed_at = inner.gate.latest();
                    self.publish(&inner);
                }
            }
            InboundKind::Activity => {
                self.record_activity(ActivityEntry::from_payload(&message.payload, message.observed_at));
            }
            InboundKind::Error => {
                let text = pick_str(&message.payload, ERROR_KEYS).unwrap_or("server reported an error");
                warn!(survey_id = %self.shared.survey_id, error = text, "server error message");
                let mut inner = self.lock();
                inner.error = Some(text.to_owned());
                self.publish(&inner);
            }
            _ => {}
        }
    }

    /// Append an activity entry and raise the "N new" badge.
    pub fn record_activity(&self, entry: ActivityEntry) {
        let mut inner = self.lock();
        inner.feed.push(entry);
        let total = inner.feed.total_inserted();
        inner.badge.observe(total);
        self.schedule_badge_expiry(&mut inner);
        self.publish(&inner);
    }

    /// Clear the "N new" badge early (the surface rendered the new entries).
    pub fn acknowledge_activity(&self) {
        let mut inner = self.lock();
        inner.badge.clear();
        if let Some((_, task)) = inner.badge_expiry.take() {
            task.abort();
        }
        self.publish(&inner);
    }

    /// Abort every background task. The last snapshot stays readable.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        inner.abort_tasks();
        self.publish(&inner);
    }

    fn schedule_badge_expiry(&self, inner: &mut Inner) {
        let Some(deadline) = inner.badge.expires_at() else {
            return;
        };
        if inner.badge_expiry.as_ref().is_some_and(|(at, _)| *at == deadline) {
            return;
        }
        if let Some((_, task)) = inner.badge_expiry.take() {
            task.abort();
        }
        let weak = Arc::downgrade(&self.shared);
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(aggregator) = upgrade(&weak) {
                let mut inner = aggregator.lock();
                inner.badge_expiry = None;
                aggregator.publish(&inner);
            }
        });
        inner.badge_expiry = Some((deadline, task));
    }

    fn publish(&self, inner: &Inner) {
        if let Some(listener) = &inner.question_count_listener {
            listener(inner.snapshot.question_count());
        }
        self.shared.view.send_replace(AggregatorView {
            snapshot: inner.snapshot.clone(),
            error: inner.error.clone(),
            activity: inner.feed.to_vec(),
            new_activity: inner.badge.count(),
            refreshing: inner.in_flight.is_some(),
        });
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn upgrade(weak: &Weak<Shared>) -> Option<Aggregator> {
    weak.upgrade().map(|shared| Aggregator { shared })
}

#[cfg(test)]
#[path = "aggregator_test.rs"]
mod tests;
