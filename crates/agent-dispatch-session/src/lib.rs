//! Session orchestration and workspace state for remote agent dispatch.
//!
//! Provides:
//! - `ContextManager` - Lazily created, persisted execution contexts
//! - `Dispatcher` - Submits work and classifies dispatch failures
//! - `SessionMonitor` - Drives the event stream to a terminal outcome
//! - `ArtifactMaterializer` - Writes produced files to local storage
//! - `Orchestrator` - Ties the above together per workspace
//! - Workspace state backends (memory, JSON file, SQLite)

pub mod context_manager;
pub mod dispatcher;
pub mod error;
pub mod materializer;
pub mod monitor;
pub mod orchestrator;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;

pub use context_manager::ContextManager;
pub use dispatcher::Dispatcher;
pub use error::SessionError;
pub use materializer::{ArtifactFailure, ArtifactMaterializer, MaterializeReport};
pub use monitor::SessionMonitor;
pub use orchestrator::{InputFile, Orchestrator, RunReport, RunRequest};
pub use tokio_util::sync::CancellationToken;
