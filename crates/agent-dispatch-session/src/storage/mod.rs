//! Workspace state backends.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "file")]
pub mod file;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "memory")]
pub use memory::MemoryWorkspaceStore;

#[cfg(feature = "file")]
pub use file::FileWorkspaceStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteWorkspaceStore;
