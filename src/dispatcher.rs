//! Presenter command dispatcher.
//!
//! DESIGN
//! ======
//! A command is sent first and applied locally second. The local change is
//! an optimistic guess; the next authoritative broadcast (`presenter_status`,
//! `question_focus`, `visibility_change`) overwrites it without comparison.
//! When the presenter channel is down the command is dropped whole: nothing
//! is sent and nothing is applied.
//!
//! Focus is kept twice: the index the server (or the last command) asked
//! for, and the published index clamped to the current question count. A
//! focus that arrives before the questions load is restored once they do.

use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use frames::{Frame, InboundKind, PresenterCommand};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::channel::{ChannelHandle, InboundMessage};
use crate::payload::pick_str;
use crate::state::{PresenterState, clamp_index, requested_focus};

/// Where dispatched command frames go.
pub trait CommandSink: Send + Sync + 'static {
    /// Queue `frame` for delivery. `false` when the link is down.
    fn send(&self, frame: Frame) -> bool;
}

impl CommandSink for ChannelHandle {
    fn send(&self, frame: Frame) -> bool {
        ChannelHandle::send(self, frame)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Sent and optimistically applied.
    Sent,
    /// Channel not connected; neither sent nor applied.
    Suppressed,
}

struct Inner {
    state: PresenterState,
    question_count: usize,
    /// Unclamped focus last asked for.
    focus_target: usize,
}

#[derive(Clone)]
pub struct CommandDispatcher {
    sink: Arc<dyn CommandSink>,
    inner: Arc<Mutex<Inner>>,
    view: Arc<watch::Sender<PresenterState>>,
}

impl CommandDispatcher {
    #[must_use]
    pub fn new(sink: Arc<dyn CommandSink>) -> Self {
        let (view, _) = watch::channel(PresenterState::default());
        Self {
            sink,
            inner: Arc::new(Mutex::new(Inner { state: PresenterState::default(), question_count: 0, focus_target: 0 })),
            view: Arc::new(view),
        }
    }

    #[must_use]
    pub fn state(&self) -> PresenterState {
        *self.view.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PresenterState> {
        self.view.subscribe()
    }

    #[must_use]
    pub fn question_count(&self) -> usize {
        self.lock().question_count
    }

    /// Send `command` and apply its expected outcome locally.
    pub fn dispatch(&self, command: PresenterCommand, data: Option<Value>) -> DispatchOutcome {
        if !self.sink.send(command.to_frame(data)) {
            warn!(%command, "presenter channel not connected; command suppressed");
            return DispatchOutcome::Suppressed;
        }
        let mut inner = self.lock();
        let count = inner.question_count;
        inner.state.apply_command(command, count);
        inner.focus_target = inner.state.focused_question_index;
        debug!(%command, phase = %inner.state.phase, focus = inner.state.focused_question_index, "optimistic update");
        self.publish(&inner);
        DispatchOutcome::Sent
    }

    pub fn start_survey(&self) -> DispatchOutcome {
        self.dispatch(PresenterCommand::StartSurvey, None)
    }

    pub fn pause_survey(&self) -> DispatchOutcome {
        self.dispatch(PresenterCommand::PauseSurvey, None)
    }

    pub fn resume_survey(&self) -> DispatchOutcome {
        self.dispatch(PresenterCommand::ResumeSurvey, None)
    }

    pub fn stop_survey(&self) -> DispatchOutcome {
        self.dispatch(PresenterCommand::StopSurvey, None)
    }

    pub fn show_results(&self) -> DispatchOutcome {
        self.dispatch(PresenterCommand::ShowResults, None)
    }

    pub fn hide_results(&self) -> DispatchOutcome {
        self.dispatch(PresenterCommand::HideResults, None)
    }

    pub fn next_question(&self) -> DispatchOutcome {
        self.dispatch(PresenterCommand::NextQuestion, None)
    }

    pub fn prev_question(&self) -> DispatchOutcome {
        self.dispatch(PresenterCommand::PrevQuestion, None)
    }

    /// Apply an authoritative broadcast. Returns whether the state was touched.
    pub fn handle_message(&self, message: &InboundMessage) -> bool {
        let mut inner = self.lock();
        let count = inner.question_count;
        let applied = match &message.kind {
            InboundKind::PresenterStatus => inner.state.apply_status(&message.payload, count),
            InboundKind::QuestionFocus => inner.state.apply_focus(&message.payload, count),
            InboundKind::VisibilityChange => inner.state.apply_visibility(&message.payload),
            InboundKind::PresenterCommand => match relayed_command(&message.payload) {
                Some(command) => {
                    inner.state.apply_command(command, count);
                    inner.focus_target = inner.state.focused_question_index;
                    true
                }
                None => false,
            },
            _ => return false,
        };
        if matches!(message.kind, InboundKind::PresenterStatus | InboundKind::QuestionFocus) {
            if let Some(target) = requested_focus(&message.payload) {
                inner.focus_target = target;
            }
        }
        if applied {
            self.publish(&inner);
        } else {
            debug!(kind = %message.kind, "broadcast carried no presenter fields");
        }
        applied
    }

    /// Record a new question count and re-clamp the requested focus to it.
    pub fn set_question_count(&self, count: usize) {
        let mut inner = self.lock();
        if inner.question_count == count {
            return;
        }
        inner.question_count = count;
        inner.state.focused_question_index = clamp_index(inner.focus_target, count);
        self.publish(&inner);
    }

    fn publish(&self, inner: &Inner) {
        self.view.send_replace(inner.state);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Command named by a relayed `presenter_command` broadcast.
fn relayed_command(payload: &Value) -> Option<PresenterCommand> {
    pick_str(payload, &["command", "action", "type"]).and_then(|name| PresenterCommand::from_str(name).ok())
}

#[cfg(test)]
#[path = "dispatcher_test.rs"]
mod tests;
