use serde_json::{Value, json};

use crate::protocol::types::CurrentAction;
use crate::session::state::{OutputRecord, SessionState};

/// A named event pushed to every connected viewer.
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverEvent {
    /// Full session state after a change.
    State(SessionState),
    /// A chunk of worker output.
    Output(OutputRecord),
    /// Summary of the agent's latest activity.
    Action(CurrentAction),
    /// A structured agent record, forwarded verbatim.
    ClaudeEvent(Value),
    Error { message: String },
    Exit { code: Option<i32> },
}

impl ObserverEvent {
    /// SSE event name the dashboard listens for.
    pub fn name(&self) -> &'static str {
        match self {
            ObserverEvent::State(_) => "state",
            ObserverEvent::Output(_) => "output",
            ObserverEvent::Action(_) => "action",
            ObserverEvent::ClaudeEvent(_) => "claude_event",
            ObserverEvent::Error { .. } => "error",
            ObserverEvent::Exit { .. } => "exit",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ObserverEvent::Error {
            message: message.into(),
        }
    }

    /// Serialize the event payload to the JSON carried in the SSE `data` field.
    pub fn to_json(&self) -> serde_json::Result<String> {
        match self {
            ObserverEvent::State(state) => serde_json::to_string(state),
            ObserverEvent::Output(record) => serde_json::to_string(record),
            ObserverEvent::Action(action) => serde_json::to_string(action),
            ObserverEvent::ClaudeEvent(record) => serde_json::to_string(record),
            ObserverEvent::Error { message } => serde_json::to_string(&json!({ "message": message })),
            ObserverEvent::Exit { code } => serde_json::to_string(&json!({ "code": code })),
        }
    }

    /// Serialize into a frame ready to be queued on viewer sinks.
    pub fn to_frame(&self) -> serde_json::Result<Frame> {
        Ok(Frame {
            event: self.name(),
            data: self.to_json()?,
        })
    }
}

/// A serialized event as it goes out on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: &'static str,
    pub data: String,
}
