//! In-memory workspace state.

use std::{collections::HashMap, sync::RwLock};

use agent_dispatch_core::{StorageError, WorkspaceStore};
use async_trait::async_trait;

/// In-memory storage implementation.
///
/// Useful for tests and single-process embedding.
/// Data is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryWorkspaceStore {
    values: RwLock<HashMap<(String, String), String>>,
}

impl MemoryWorkspaceStore {
    /// Create a new in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkspaceStore for MemoryWorkspaceStore {
    async fn get(&self, workspace: &str, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .values
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .get(&(workspace.to_string(), key.to_string()))
            .cloned())
    }

    async fn set(&self, workspace: &str, key: &str, value: &str) -> Result<(), StorageError> {
        self.values
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .insert((workspace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    async fn remove(&self, workspace: &str, key: &str) -> Result<(), StorageError> {
        self.values
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .remove(&(workspace.to_string(), key.to_string()));
        Ok(())
    }
}
