//! The remote service seam.

use agent_dispatch_core::ErrorKind;
use agent_dispatch_core::credentials::CredentialError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::protocol::{DispatchRequest, DispatchResponse, WireArtifact};

/// Raw body of the event stream.
pub type ByteStream = BoxStream<'static, Result<Bytes, ApiError>>;

/// Remote call error.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No credential is stored; sign in first")]
    MissingCredential,
    #[error("Credential expired or invalid; sign in again")]
    AuthExpired,
    #[error("Credential store unavailable: {0}")]
    Credential(#[source] CredentialError),
    #[error("Remote error {status}: {body}")]
    Remote { status: u16, body: String },
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ApiError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingCredential | Self::AuthExpired => ErrorKind::AuthExpired,
            Self::Credential(e) => e.kind(),
            Self::Remote { .. } => ErrorKind::Remote,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Transport(_) => ErrorKind::Transport,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Protocol(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Operations the orchestrator needs from the remote agent service.
///
/// Every call is single-attempt; retry policy belongs to the caller.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Create an ephemeral project and return its id.
    async fn create_project(&self) -> Result<String, ApiError>;

    /// Upload one input file into a project.
    async fn upload_file(&self, context_id: &str, path: &str, content: &[u8]) -> Result<(), ApiError>;

    /// Dispatch a unit of work.
    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchResponse, ApiError>;

    /// Ask the remote side to stop a session.
    async fn stop(&self, session_id: &str) -> Result<(), ApiError>;

    /// Open the event stream of a session.
    async fn open_events(&self, session_id: &str) -> Result<ByteStream, ApiError>;

    /// List the artifacts a session produced.
    async fn list_artifacts(&self, session_id: &str) -> Result<Vec<WireArtifact>, ApiError>;

    /// Tear down a project.
    async fn cleanup_project(&self, context_id: &str) -> Result<(), ApiError>;
}
