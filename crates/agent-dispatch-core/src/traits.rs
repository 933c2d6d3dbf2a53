//! Core traits for persisted state, credentials and event delivery.

use async_trait::async_trait;

use crate::credentials::CredentialError;
use crate::error::StorageError;
use crate::event::SessionUpdate;

/// Key under which the current execution context is persisted.
pub const CONTEXT_KEY: &str = "execution_context";

/// Key under which the current session id is persisted.
pub const SESSION_KEY: &str = "session_id";

/// Workspace-scoped key/value state that survives process restarts.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// Read a value.
    async fn get(&self, workspace: &str, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one.
    async fn set(&self, workspace: &str, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a value. Removing a missing key is not an error.
    async fn remove(&self, workspace: &str, key: &str) -> Result<(), StorageError>;
}

/// Storage for the bearer credential attached to every remote call.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the current token.
    async fn load(&self) -> Result<Option<String>, CredentialError>;

    /// Replace the current token.
    async fn save(&self, token: &str) -> Result<(), CredentialError>;

    /// Forget the current token.
    async fn clear(&self) -> Result<(), CredentialError>;
}

/// Receiver of session updates for presentation layers.
///
/// Implementations must not block; they are called inline from the monitor loop.
pub trait EventSink: Send + Sync {
    fn emit(&self, update: SessionUpdate);
}

impl<F> EventSink for F
where
    F: Fn(SessionUpdate) + Send + Sync,
{
    fn emit(&self, update: SessionUpdate) {
        self(update);
    }
}
