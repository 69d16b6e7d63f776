//! Shared frame model and JSON codec for the live-session push channels.
//!
//! This crate owns the wire representation used by every channel concern
//! (presenter, analytics, display) in both directions. Payloads stay flexible
//! (`serde_json::Value`) while the envelope itself is fixed:
//!
//! ```text
//! { "type": "presenter_status", "data": { ... }, "timestamp": "2026-01-01T00:00:00Z" }
//! ```
//!
//! VOCABULARY
//! ==========
//! `ping`/`pong` are reserved for heartbeats and never reach application
//! logic. Inbound application kinds are modelled by [`InboundKind`]; the
//! closed set of outbound presenter commands by [`PresenterCommand`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Reserved heartbeat request type.
pub const PING: &str = "ping";
/// Reserved heartbeat acknowledgement type.
pub const PONG: &str = "pong";

/// Error returned by [`decode_frame`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The raw text is not a JSON envelope.
    #[error("failed to decode frame: {0}")]
    Decode(#[from] serde_json::Error),
    /// The envelope carried an empty `type`.
    #[error("frame is missing a message type")]
    MissingType,
    /// `data` was present but not a JSON object.
    #[error("frame data must be an object, got {0}")]
    InvalidData(&'static str),
}

/// A single message on the push-channel wire protocol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Message type, e.g. `"presenter_status"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Arbitrary JSON object payload.
    #[serde(default = "empty_object")]
    pub data: Value,
    /// RFC 3339 send time as stamped by the sender, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Frame {
    /// Build a frame stamped with the current UTC time.
    #[must_use]
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self { kind: kind.into(), data, timestamp: Some(now_rfc3339()) }
    }

    /// Heartbeat request frame.
    #[must_use]
    pub fn ping() -> Self {
        Self::new(PING, empty_object())
    }

    /// True for `ping`/`pong` frames.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.kind == PING || self.kind == PONG
    }

    /// Sender timestamp parsed as RFC 3339, when present and well formed.
    #[must_use]
    pub fn sent_at(&self) -> Option<OffsetDateTime> {
        self.timestamp
            .as_deref()
            .and_then(|raw| OffsetDateTime::parse(raw, &Rfc3339).ok())
    }
}

/// Encode a frame as JSON text.
#[must_use]
pub fn encode_frame(frame: &Frame) -> String {
    // Serializing a struct of String/Value fields cannot fail.
    serde_json::to_string(frame).unwrap_or_default()
}

/// Decode JSON text into a frame.
///
/// A missing `data` field decodes as an empty object; `null` is normalized
/// the same way.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed JSON or a missing `type`,
/// [`CodecError::MissingType`] for a blank `type`, and
/// [`CodecError::InvalidData`] when `data` is not an object.
pub fn decode_frame(text: &str) -> Result<Frame, CodecError> {
    let mut frame = serde_json::from_str::<Frame>(text)?;
    if frame.kind.trim().is_empty() {
        return Err(CodecError::MissingType);
    }
    match &frame.data {
        Value::Object(_) => {}
        Value::Null => frame.data = empty_object(),
        other => return Err(CodecError::InvalidData(json_type_name(other))),
    }
    Ok(frame)
}

/// Current UTC time formatted as RFC 3339.
#[must_use]
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// INBOUND KINDS
// =============================================================================

/// Application message kinds a channel may deliver to consumers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum InboundKind {
    /// Server-side analytics changed; consumers should re-fetch.
    AnalyticsUpdated,
    /// A session activity entry (join, response, ...).
    Activity,
    /// Authoritative presenter state broadcast.
    PresenterStatus,
    /// Explicit participant count update.
    ParticipantUpdate,
    /// Explicit response count update.
    ResponseUpdate,
    /// A presenter command relayed to display surfaces.
    PresenterCommand,
    /// Results visibility toggled by the presenter.
    VisibilityChange,
    /// Focused question changed.
    QuestionFocus,
    /// Server-reported error.
    Error,
    /// Any type outside the known vocabulary.
    Other(String),
}

impl InboundKind {
    /// Map a wire `type` to a kind.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "analytics_updated" => Self::AnalyticsUpdated,
            "activity" => Self::Activity,
            "presenter_status" => Self::PresenterStatus,
            "participant_update" => Self::ParticipantUpdate,
            "response_update" => Self::ResponseUpdate,
            "presenter_command" => Self::PresenterCommand,
            "visibility_change" => Self::VisibilityChange,
            "question_focus" => Self::QuestionFocus,
            "error" => Self::Error,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Wire `type` string for this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::AnalyticsUpdated => "analytics_updated",
            Self::Activity => "activity",
            Self::PresenterStatus => "presenter_status",
            Self::ParticipantUpdate => "participant_update",
            Self::ResponseUpdate => "response_update",
            Self::PresenterCommand => "presenter_command",
            Self::VisibilityChange => "visibility_change",
            Self::QuestionFocus => "question_focus",
            Self::Error => "error",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for InboundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// PRESENTER COMMANDS
// =============================================================================

/// Closed set of commands a presenter console can send.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PresenterCommand {
    StartSurvey,
    PauseSurvey,
    ResumeSurvey,
    StopSurvey,
    ShowResults,
    HideResults,
    NextQuestion,
    PrevQuestion,
}

impl PresenterCommand {
    /// Every command, in protocol order.
    pub const ALL: [Self; 8] = [
        Self::StartSurvey,
        Self::PauseSurvey,
        Self::ResumeSurvey,
        Self::StopSurvey,
        Self::ShowResults,
        Self::HideResults,
        Self::NextQuestion,
        Self::PrevQuestion,
    ];

    /// Wire `type` string for this command.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StartSurvey => "start_survey",
            Self::PauseSurvey => "pause_survey",
            Self::ResumeSurvey => "resume_survey",
            Self::StopSurvey => "stop_survey",
            Self::ShowResults => "show_results",
            Self::HideResults => "hide_results",
            Self::NextQuestion => "next_question",
            Self::PrevQuestion => "prev_question",
        }
    }

    /// Build the outbound frame for this command. `None` sends an empty object.
    #[must_use]
    pub fn to_frame(self, data: Option<Value>) -> Frame {
        Frame::new(self.as_str(), data.unwrap_or_else(empty_object))
    }
}

impl fmt::Display for PresenterCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown command name.
#[derive(Debug, thiserror::Error)]
#[error("unknown presenter command: {0}")]
pub struct UnknownCommand(pub String);

impl FromStr for PresenterCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|cmd| cmd.as_str() == s)
            .ok_or_else(|| UnknownCommand(s.to_owned()))
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
