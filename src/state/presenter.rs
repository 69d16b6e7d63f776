//! Presenter console state: session phase, results visibility, focus.
//!
//! The same struct holds both authoritative values (from server broadcasts)
//! and optimistic guesses (from local commands). Broadcasts always overwrite.

use std::fmt;

use frames::PresenterCommand;
use serde_json::Value;

use crate::payload::{pick_bool, pick_count, pick_str};

const PHASE_KEYS: &[&str] = &["phase", "status", "state"];
const VISIBLE_KEYS: &[&str] = &["results_visible", "resultsVisible", "show_results", "showResults", "visible"];
const FOCUS_KEYS: &[&str] = &[
    "focused_question_index",
    "focusedQuestionIndex",
    "current_question_index",
    "currentQuestionIndex",
    "question_index",
    "questionIndex",
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Phase {
    #[default]
    Idle,
    Live,
    Paused,
    Stopped,
}

impl Phase {
    /// Parse a server phase name, accepting the common synonyms.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "idle" | "waiting" | "draft" | "not_started" => Some(Self::Idle),
            "live" | "active" | "running" | "started" | "in_progress" => Some(Self::Live),
            "paused" => Some(Self::Paused),
            "stopped" | "ended" | "completed" | "closed" => Some(Self::Stopped),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Live => "live",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Focus index named by a broadcast payload, before clamping.
#[must_use]
pub fn requested_focus(payload: &Value) -> Option<usize> {
    pick_count(payload, FOCUS_KEYS).map(|index| usize::try_from(index).unwrap_or(usize::MAX))
}

/// Clamp `index` into `[0, len - 1]`, or 0 when there are no questions.
#[must_use]
pub fn clamp_index(index: usize, len: usize) -> usize {
    index.min(len.saturating_sub(1))
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PresenterState {
    pub phase: Phase,
    pub results_visible: bool,
    pub focused_question_index: usize,
}

impl PresenterState {
    /// Apply the expected post-condition of `command` locally.
    pub fn apply_command(&mut self, command: PresenterCommand, question_count: usize) {
        match command {
            PresenterCommand::StartSurvey | PresenterCommand::ResumeSurvey => self.phase = Phase::Live,
            PresenterCommand::PauseSurvey => self.phase = Phase::Paused,
            PresenterCommand::StopSurvey => self.phase = Phase::Stopped,
            PresenterCommand::ShowResults => self.results_visible = true,
            PresenterCommand::HideResults => self.results_visible = false,
            PresenterCommand::NextQuestion => {
                self.focused_question_index = clamp_index(self.focused_question_index + 1, question_count);
            }
            PresenterCommand::PrevQuestion => {
                self.focused_question_index = self.focused_question_index.saturating_sub(1);
            }
        }
    }

    /// Overwrite with an authoritative `presenter_status` broadcast. Fields
    /// absent from the payload keep their current value. Returns whether the
    /// payload carried any recognised field.
    pub fn apply_status(&mut self, payload: &Value, question_count: usize) -> bool {
        let mut recognised = false;
        if let Some(phase) = pick_str(payload, PHASE_KEYS).and_then(Phase::parse) {
            self.phase = phase;
            recognised = true;
        }
        recognised |= self.apply_visibility(payload);
        recognised |= self.apply_focus(payload, question_count);
        recognised
    }

    /// Authoritative `question_focus` broadcast.
    pub fn apply_focus(&mut self, payload: &Value, question_count: usize) -> bool {
        let Some(index) = requested_focus(payload) else {
            return false;
        };
        self.focused_question_index = clamp_index(index, question_count);
        true
    }

    /// Authoritative `visibility_change` broadcast.
    pub fn apply_visibility(&mut self, payload: &Value) -> bool {
        let Some(visible) = pick_bool(payload, VISIBLE_KEYS) else {
            return false;
        };
        self.results_visible = visible;
        true
    }
}

#[cfg(test)]
#[path = "presenter_test.rs"]
mod tests;
