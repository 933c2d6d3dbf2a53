//! Stream events emitted by a running session, and the updates forwarded to sinks.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::session::Outcome;

/// Status of a single todo item reported by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

/// One entry of the agent's todo list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    pub status: TodoStatus,
}

impl TodoItem {
    #[must_use]
    pub fn new(content: impl Into<String>, status: TodoStatus) -> Self {
        Self {
            content: content.into(),
            status,
        }
    }
}

/// Application event decoded from one stream frame.
///
/// The wire payload is a JSON object whose `type` field selects the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Free-form progress note.
    Progress { message: String },
    /// Response text fragment; appended to the session's response buffer.
    Content { text: String },
    /// Full replacement of the session's todo list.
    TodoUpdate { items: Vec<TodoItem> },
    /// A named step finished.
    StepComplete {
        #[serde(deserialize_with = "string_or_number")]
        step: String,
    },
    /// Terminal success.
    Complete {},
    /// Terminal failure.
    Error { message: String },
}

impl StreamEvent {
    /// Whether this event ends the session.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete {} | Self::Error { .. })
    }

    /// Wire discriminator of this event.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Content { .. } => "content",
            Self::TodoUpdate { .. } => "todo_update",
            Self::StepComplete { .. } => "step_complete",
            Self::Complete {} => "complete",
            Self::Error { .. } => "error",
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

/// Update delivered to an [`EventSink`](crate::EventSink).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum SessionUpdate {
    /// A session was dispatched and has this id.
    SessionId(String),
    /// A decoded stream event, forwarded verbatim.
    Event(StreamEvent),
    /// The combined response text, flushed once on completion.
    Response(String),
    /// The monitor finished with this outcome.
    Finished(Outcome),
}

impl SessionUpdate {
    /// Rough in-memory size, used to bound history.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        const OVERHEAD: usize = 32;
        let payload = match self {
            Self::SessionId(s) | Self::Response(s) => s.len(),
            Self::Event(event) => match event {
                StreamEvent::Progress { message } | StreamEvent::Error { message } => message.len(),
                StreamEvent::Content { text } => text.len(),
                StreamEvent::StepComplete { step } => step.len(),
                StreamEvent::TodoUpdate { items } => {
                    items.iter().map(|i| i.content.len() + 8).sum()
                }
                StreamEvent::Complete {} => 0,
            },
            Self::Finished(outcome) => match outcome {
                Outcome::Failed(reason) => reason.len(),
                Outcome::Completed | Outcome::Stopped => 0,
            },
        };
        payload + OVERHEAD
    }
}
