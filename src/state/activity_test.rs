use serde_json::json;

use super::*;

fn entry(id: usize) -> ActivityEntry {
    ActivityEntry::from_payload(&json!({"id": format!("a-{id}"), "type": "response_submitted"}), OffsetDateTime::UNIX_EPOCH)
}

fn ids(feed: &ActivityFeed) -> Vec<String> {
    feed.iter().map(|e| e.id.clone()).collect()
}

// =============================================================================
// ActivityKind / ActivityEntry
// =============================================================================

#[test]
fn kind_parses_known_names_and_aliases() {
    assert_eq!(ActivityKind::parse("participant_joined"), ActivityKind::ParticipantJoined);
    assert_eq!(ActivityKind::parse("Join"), ActivityKind::ParticipantJoined);
    assert_eq!(ActivityKind::parse("response"), ActivityKind::ResponseSubmitted);
    assert_eq!(ActivityKind::parse("survey_paused"), ActivityKind::SurveyPaused);
}

#[test]
fn kind_falls_back_to_other() {
    assert_eq!(ActivityKind::parse("confetti"), ActivityKind::Other);
    assert_eq!(ActivityKind::parse(""), ActivityKind::Other);
}

#[test]
fn entry_reads_full_payload() {
    let payload = json!({
        "id": "act-9",
        "type": "participant_joined",
        "timestamp": "2025-03-01T10:00:00Z",
        "participant_name": "Guest 4",
        "question_title": "Favourite colour?",
        "metadata": {"device": "mobile"}
    });
    let e = ActivityEntry::from_payload(&payload, OffsetDateTime::UNIX_EPOCH);
    assert_eq!(e.id, "act-9");
    assert_eq!(e.kind, ActivityKind::ParticipantJoined);
    assert_eq!(e.occurred_at.year(), 2025);
    assert_eq!(e.actor_label.as_deref(), Some("Guest 4"));
    assert_eq!(e.question_ref.as_deref(), Some("Favourite colour?"));
    assert_eq!(e.metadata, Some(json!({"device": "mobile"})));
}

#[test]
fn entry_defaults_missing_fields() {
    let observed = OffsetDateTime::UNIX_EPOCH;
    let e = ActivityEntry::from_payload(&json!({"timestamp": "yesterday"}), observed);
    assert!(Uuid::parse_str(&e.id).is_ok());
    assert_eq!(e.kind, ActivityKind::Other);
    assert_eq!(e.occurred_at, observed);
    assert!(e.actor_label.is_none());
    assert!(e.question_ref.is_none());
    assert!(e.metadata.is_none());
}

#[test]
fn entry_accepts_numeric_id() {
    let e = ActivityEntry::from_payload(&json!({"id": 42}), OffsetDateTime::UNIX_EPOCH);
    assert_eq!(e.id, "42");
}

// =============================================================================
// ActivityFeed
// =============================================================================

#[test]
fn feed_is_newest_first() {
    let mut feed = ActivityFeed::new(5);
    feed.push(entry(1));
    feed.push(entry(2));
    feed.push(entry(3));
    assert_eq!(ids(&feed), vec!["a-3", "a-2", "a-1"]);
    assert_eq!(feed.newest().map(|e| e.id.as_str()), Some("a-3"));
}

#[test]
fn feed_fills_to_capacity_then_evicts_oldest() {
    let mut feed = ActivityFeed::new(50);
    for i in 1..=49 {
        assert!(feed.push(entry(i)).is_none());
    }
    assert_eq!(feed.len(), 49);

    assert!(feed.push(entry(50)).is_none());
    assert_eq!(feed.len(), 50);
    assert_eq!(feed.newest().map(|e| e.id.as_str()), Some("a-50"));

    let evicted = feed.push(entry(51)).unwrap();
    assert_eq!(evicted.id, "a-1");
    assert_eq!(feed.len(), 50);
    assert_eq!(feed.newest().map(|e| e.id.as_str()), Some("a-51"));
    assert!(feed.iter().all(|e| e.id != "a-1"));
    assert_eq!(feed.iter().last().map(|e| e.id.as_str()), Some("a-2"));
}

#[test]
fn feed_never_exceeds_capacity() {
    let mut feed = ActivityFeed::new(3);
    for i in 0..100 {
        feed.push(entry(i));
        assert!(feed.len() <= 3);
    }
    assert_eq!(feed.total_inserted(), 100);
}

#[test]
fn feed_capacity_is_at_least_one() {
    let mut feed = ActivityFeed::new(0);
    assert_eq!(feed.capacity(), 1);
    feed.push(entry(1));
    feed.push(entry(2));
    assert_eq!(ids(&feed), vec!["a-2"]);
}

#[test]
fn recent_is_a_separate_window() {
    let mut feed = ActivityFeed::new(10);
    for i in 1..=6 {
        feed.push(entry(i));
    }
    let window = feed.recent(4);
    assert_eq!(window.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["a-6", "a-5", "a-4", "a-3"]);
    assert_eq!(feed.len(), 6);
    assert_eq!(feed.recent(20).len(), 6);
}

#[test]
fn default_feed_holds_fifty() {
    assert_eq!(ActivityFeed::default().capacity(), 50);
}

// =============================================================================
// NewActivityIndicator
// =============================================================================

const TTL: Duration = Duration::from_secs(3);

#[test]
fn indicator_counts_new_entries() {
    let now = Instant::now();
    let mut badge = NewActivityIndicator::new(TTL);
    assert_eq!(badge.observe_at(2, now), 2);
    assert_eq!(badge.count_at(now), 2);
}

#[test]
fn indicator_clears_after_ttl() {
    let now = Instant::now();
    let mut badge = NewActivityIndicator::new(TTL);
    badge.observe_at(1, now);
    assert_eq!(badge.count_at(now + Duration::from_millis(2_999)), 1);
    assert_eq!(badge.count_at(now + TTL), 0);
}

#[test]
fn indicator_does_not_extend_on_further_activity() {
    let now = Instant::now();
    let mut badge = NewActivityIndicator::new(TTL);
    badge.observe_at(1, now);
    assert_eq!(badge.observe_at(3, now + Duration::from_secs(2)), 3);
    assert_eq!(badge.expires_at(), Some(now + TTL));
    assert_eq!(badge.count_at(now + TTL), 0);
}

#[test]
fn indicator_raises_fresh_badge_after_expiry() {
    let now = Instant::now();
    let mut badge = NewActivityIndicator::new(TTL);
    badge.observe_at(4, now);
    let later = now + Duration::from_secs(10);
    assert_eq!(badge.observe_at(5, later), 1);
    assert_eq!(badge.expires_at(), Some(later + TTL));
}

#[test]
fn indicator_ignores_unchanged_total() {
    let now = Instant::now();
    let mut badge = NewActivityIndicator::new(TTL);
    assert_eq!(badge.observe_at(0, now), 0);
    badge.observe_at(2, now);
    badge.clear();
    assert_eq!(badge.observe_at(2, now), 0);
    assert!(badge.expires_at().is_none());
}

#[test]
fn indicator_keeps_counting_past_feed_capacity() {
    let now = Instant::now();
    let mut feed = ActivityFeed::new(2);
    let mut badge = NewActivityIndicator::new(TTL);
    feed.push(entry(1));
    feed.push(entry(2));
    badge.observe_at(feed.total_inserted(), now);
    badge.clear();

    feed.push(entry(3));
    assert_eq!(feed.len(), 2);
    assert_eq!(badge.observe_at(feed.total_inserted(), now), 1);
}
