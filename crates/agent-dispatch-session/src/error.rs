//! Session orchestration errors.

use agent_dispatch_core::{ErrorKind, Outcome, StorageError};
use agent_dispatch_transport::ApiError;

use crate::monitor::{CLOSED_UNEXPECTEDLY, TIMEOUT};

/// Session orchestration error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Message must not be empty")]
    EmptyMessage,
    #[error("Dispatch failed: {0}")]
    Dispatch(#[source] ApiError),
    #[error("Dispatch response did not include a session id")]
    MissingSessionId,
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("A session is already running for workspace {0}")]
    AlreadyRunning(String),
    #[error("No session has been dispatched for workspace {0}")]
    NoSession(String),
    #[error("Execution context {0} is no longer current")]
    StaleContext(String),
    #[error("Session was cancelled")]
    UserCancelled,
    #[error("Session failed: {0}")]
    Failed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Failures the monitor reports for a silent or dropped stream are
    /// classified as transport errors; any other failure came from the remote
    /// agent.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyMessage
            | Self::AlreadyRunning(_)
            | Self::NoSession(_)
            | Self::StaleContext(_) => ErrorKind::InvalidInput,
            Self::Dispatch(e) | Self::Api(e) => e.kind(),
            Self::MissingSessionId => ErrorKind::Protocol,
            Self::Storage(_) => ErrorKind::Storage,
            Self::UserCancelled => ErrorKind::UserCancelled,
            Self::Failed(reason) if reason == TIMEOUT || reason == CLOSED_UNEXPECTEDLY => {
                ErrorKind::Transport
            }
            Self::Failed(_) => ErrorKind::Remote,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Error for a non-successful monitor outcome, `None` for `Completed`.
    #[must_use]
    pub fn from_outcome(outcome: &Outcome) -> Option<Self> {
        match outcome {
            Outcome::Completed => None,
            Outcome::Stopped => Some(Self::UserCancelled),
            Outcome::Failed(reason) => Some(Self::Failed(reason.clone())),
        }
    }
}
