//! Core abstractions for remote agent session dispatch.
//!
//! This crate provides the fundamental building blocks:
//! - `ExecutionContext` - Remote, workspace-scoped holding area for a session's files
//! - `Session` - Lifecycle state machine driven by stream events
//! - `StreamEvent` / `SessionUpdate` - Typed progress events and sink messages
//! - `Artifact` - Files produced by a completed session
//! - `MsgStore` - Broadcast + history sink for presentation layers
//! - Storage, credential and sink traits

pub mod artifact;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod event;
pub mod msg_store;
pub mod session;
pub mod traits;

pub use artifact::{Artifact, ArtifactContent, is_binary_path};
pub use config::DispatchConfig;
pub use context::ExecutionContext;
pub use error::{ErrorKind, StorageError};
pub use event::{SessionUpdate, StreamEvent, TodoItem, TodoStatus};
pub use msg_store::MsgStore;
pub use session::{ComputeTier, Outcome, Session, SessionState};
pub use traits::{CredentialStore, EventSink, WorkspaceStore};
