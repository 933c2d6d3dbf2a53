//! Session lifecycle state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::event::{StreamEvent, TodoItem};

/// Compute tier selecting the cost/capability level of a dispatched session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeTier {
    Interactive,
    #[default]
    Standard,
    Advanced,
}

impl ComputeTier {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::Standard => "standard",
            Self::Advanced => "advanced",
        }
    }
}

impl fmt::Display for ComputeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComputeTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "interactive" => Ok(Self::Interactive),
            "standard" => Ok(Self::Standard),
            "advanced" => Ok(Self::Advanced),
            other => Err(format!("unknown compute tier: {other}")),
        }
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// A session id was returned; no event parsed yet.
    Dispatched,
    /// At least one event has been parsed.
    Streaming,
    /// Terminal success.
    Completed,
    /// Terminal; cancelled by the caller.
    Stopped,
    /// Terminal failure.
    Failed,
}

impl SessionState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }
}

/// Final result of monitoring a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Stopped,
    Failed(String),
}

impl Outcome {
    /// Lifecycle state matching this outcome.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        match self {
            Self::Completed => SessionState::Completed,
            Self::Stopped => SessionState::Stopped,
            Self::Failed(_) => SessionState::Failed,
        }
    }
}

/// One remote unit-of-work execution.
///
/// Mutated only by the monitor; once a terminal state is reached no further
/// events are applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Identifier assigned by the remote side.
    pub id: String,
    /// Owning execution context id.
    pub context_id: String,
    pub tier: ComputeTier,
    state: SessionState,
    response: String,
    todos: Vec<TodoItem>,
    failure: Option<String>,
}

impl Session {
    /// Create a session in the `Dispatched` state.
    #[must_use]
    pub fn dispatched(id: impl Into<String>, context_id: impl Into<String>, tier: ComputeTier) -> Self {
        Self {
            id: id.into(),
            context_id: context_id.into(),
            tier,
            state: SessionState::Dispatched,
            response: String::new(),
            todos: Vec::new(),
            failure: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Accumulated response text.
    #[must_use]
    pub fn response(&self) -> &str {
        &self.response
    }

    /// Last-seen todo list snapshot.
    #[must_use]
    pub fn todos(&self) -> &[TodoItem] {
        &self.todos
    }

    /// Failure reason, if the session failed.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Apply a decoded event.
    ///
    /// Returns `false` (and leaves the session untouched) if the session is
    /// already terminal.
    pub fn apply(&mut self, event: &StreamEvent) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = SessionState::Streaming;

        match event {
            StreamEvent::Content { text } => self.response.push_str(text),
            StreamEvent::TodoUpdate { items } => self.todos.clone_from(items),
            StreamEvent::Complete {} => self.state = SessionState::Completed,
            StreamEvent::Error { message } => {
                self.state = SessionState::Failed;
                self.failure = Some(message.clone());
            }
            StreamEvent::Progress { .. } | StreamEvent::StepComplete { .. } => {}
        }
        true
    }

    /// Move to a terminal state without an event (cancellation, transport loss).
    ///
    /// No-op if already terminal.
    pub fn finish(&mut self, outcome: &Outcome) {
        if self.state.is_terminal() {
            return;
        }
        self.state = outcome.state();
        if let Outcome::Failed(reason) = outcome {
            self.failure = Some(reason.clone());
        }
    }
}
