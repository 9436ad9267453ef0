use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::parser::Signal;
use crate::event::ObserverEvent;
use crate::protocol::parse::summarize;
use crate::protocol::types::CurrentAction;

/// Iteration ceiling assumed until the worker reports its own.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Starting,
    Running,
    Complete,
    MaxIterations,
    Error,
    Stopped,
}

/// Which pipe a chunk of worker output arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// One chunk of worker output as it was delivered by the pipe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputRecord {
    #[serde(rename = "type")]
    pub stream: StreamKind,
    pub text: String,
    #[serde(rename = "time")]
    pub timestamp: DateTime<Utc>,
}

impl OutputRecord {
    pub fn new(stream: StreamKind, text: impl Into<String>) -> Self {
        Self {
            stream,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Progress of the current (or most recent) worker run.
///
/// This is the payload of every `state` event. The output buffer lives next
/// to it in [`Session`] so state broadcasts stay small.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub status: SessionStatus,
    pub iteration: u32,
    pub max_iterations: u32,
    pub current_story: Option<String>,
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_action: Option<CurrentAction>,
    pub start_time: Option<DateTime<Utc>>,
    /// Absent until the worker exits; `Some(None)` when it died from a signal.
    #[allow(clippy::option_option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<Option<i32>>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            status: SessionStatus::Idle,
            iteration: 0,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            current_story: None,
            branch: None,
            current_action: None,
            start_time: None,
            exit_code: None,
        }
    }
}

/// A supervised run: its state plus every output chunk seen so far.
#[derive(Debug, Default, Clone)]
pub struct Session {
    pub state: SessionState,
    pub output: Vec<OutputRecord>,
}

/// Full view returned by the state query, including the buffered output.
#[derive(Debug, Serialize)]
pub struct SessionSnapshot {
    #[serde(flatten)]
    pub state: SessionState,
    pub output: Vec<OutputRecord>,
}

impl Session {
    /// Fresh session for a run that is about to start.
    pub fn begin() -> Self {
        Self {
            state: SessionState {
                status: SessionStatus::Starting,
                start_time: Some(Utc::now()),
                ..SessionState::default()
            },
            output: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state.clone(),
            output: self.output.clone(),
        }
    }

    pub fn record_output(&mut self, record: OutputRecord) {
        self.output.push(record);
    }

    /// Apply one parser signal, returning the events it produces in order.
    pub fn apply(&mut self, signal: Signal) -> Vec<ObserverEvent> {
        match signal {
            // A stray lower count in agent prose never moves the run backwards.
            Signal::Iteration { current, max } => {
                self.state.iteration = self.state.iteration.max(current);
                self.state.max_iterations = max;
                self.state.status = SessionStatus::Running;
                vec![self.state_event()]
            }
            Signal::Branch(branch) => {
                self.state.branch = Some(branch);
                vec![self.state_event()]
            }
            Signal::Story(story) => {
                self.state.current_story = Some(story);
                vec![self.state_event()]
            }
            Signal::MaxIterationsReached => self.set_status(SessionStatus::MaxIterations),
            Signal::Completed => self.set_status(SessionStatus::Complete),
            Signal::Record(record) => self.apply_record(record),
        }
    }

    fn apply_record(&mut self, record: Value) -> Vec<ObserverEvent> {
        let actions = summarize(&record);
        let mut events = Vec::with_capacity(actions.len() + 1);
        events.push(ObserverEvent::ClaudeEvent(record));
        for action in actions {
            self.state.current_action = Some(action.clone());
            events.push(ObserverEvent::Action(action));
        }
        events
    }

    /// Set the status and return the resulting `state` event.
    pub fn set_status(&mut self, status: SessionStatus) -> Vec<ObserverEvent> {
        self.state.status = status;
        vec![self.state_event()]
    }

    /// Record how the worker exited. Only a zero exit code counts as success.
    pub fn finish(&mut self, code: Option<i32>) -> Vec<ObserverEvent> {
        self.state.status = if code == Some(0) {
            SessionStatus::Complete
        } else {
            SessionStatus::Error
        };
        self.state.exit_code = Some(code);
        vec![self.state_event(), ObserverEvent::Exit { code }]
    }

    pub fn state_event(&self) -> ObserverEvent {
        ObserverEvent::State(self.state.clone())
    }
}
