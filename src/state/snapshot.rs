//! Aggregated live-session results.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::payload::pick_count;

/// Results for one question, as served by the live-results endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionResult {
    #[serde(alias = "questionId", alias = "id")]
    pub question_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "questionType", alias = "type")]
    pub question_type: String,
    #[serde(default, alias = "totalResponses")]
    pub total_responses: u64,
    /// Option label to vote count, in server order.
    #[serde(default)]
    pub answers: IndexMap<String, u64>,
}

/// Wire document returned by `GET /api/surveys/{id}/live-results`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct LiveResults {
    #[serde(default, alias = "participantCount")]
    pub participant_count: u64,
    #[serde(default, alias = "responseCount", alias = "total_responses")]
    pub response_count: u64,
    #[serde(default, alias = "completedCount", alias = "completed_responses")]
    pub completed_count: u64,
    #[serde(default, alias = "perQuestionResults", alias = "questions")]
    pub question_results: Vec<QuestionResult>,
}

/// The authoritative view of one survey's live session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionSnapshot {
    pub participant_count: u64,
    pub response_count: u64,
    pub completed_count: u64,
    /// Keyed by question id, in question order.
    pub per_question_results: IndexMap<String, QuestionResult>,
    /// `None` until the first fetch or direct update lands.
    pub last_updated: Option<OffsetDateTime>,
}

impl SessionSnapshot {
    #[must_use]
    pub fn from_live_results(results: LiveResults, at: OffsetDateTime) -> Self {
        let per_question_results = results
            .question_results
            .into_iter()
            .map(|q| (q.question_id.clone(), q))
            .collect();
        Self {
            participant_count: results.participant_count,
            response_count: results.response_count,
            completed_count: results.completed_count.min(results.response_count),
            per_question_results,
            last_updated: Some(at),
        }
    }

    /// Percentage of responses that completed. Always derived from the
    /// counts, never taken from a payload.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn completion_rate(&self) -> f64 {
        if self.response_count == 0 {
            0.0
        } else {
            self.completed_count as f64 / self.response_count as f64 * 100.0
        }
    }

    #[must_use]
    pub fn question_count(&self) -> usize {
        self.per_question_results.len()
    }

    /// Apply explicit counts from a push. Returns `false` when nothing changed.
    pub fn apply_counts(&mut self, counts: CountUpdate, at: OffsetDateTime) -> bool {
        if counts.is_empty() {
            return false;
        }
        if let Some(n) = counts.participant_count {
            self.participant_count = n;
        }
        if let Some(n) = counts.response_count {
            self.response_count = n;
        }
        if let Some(n) = counts.completed_count {
            self.completed_count = n;
        }
        self.completed_count = self.completed_count.min(self.response_count);
        self.last_updated = Some(at);
        true
    }
}

/// Explicit counters carried by `participant_update` / `response_update`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CountUpdate {
    pub participant_count: Option<u64>,
    pub response_count: Option<u64>,
    pub completed_count: Option<u64>,
}

impl CountUpdate {
    #[must_use]
    pub fn from_payload(payload: &Value) -> Self {
        Self {
            participant_count: pick_count(payload, &["participant_count", "participantCount", "participants"]),
            response_count: pick_count(
                payload,
                &["response_count", "responseCount", "total_responses", "totalResponses"],
            ),
            completed_count: pick_count(
                payload,
                &["completed_count", "completedCount", "completed_responses", "completedResponses"],
            ),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participant_count.is_none() && self.response_count.is_none() && self.completed_count.is_none()
    }
}

#[cfg(test)]
#[path = "snapshot_test.rs"]
mod tests;
