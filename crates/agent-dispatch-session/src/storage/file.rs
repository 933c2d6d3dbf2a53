//! JSON-file workspace state.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use agent_dispatch_core::{StorageError, WorkspaceStore};
use async_trait::async_trait;
use tokio::sync::Mutex;

type StateFile = BTreeMap<String, BTreeMap<String, String>>;

/// Workspace state persisted to a single JSON file.
///
/// Writes go to a sibling temp file that is renamed over the original, so a
/// crash never leaves a half-written state file behind.
#[derive(Debug)]
pub struct FileWorkspaceStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileWorkspaceStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Store at `<dir>/workspaces.json`.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("workspaces.json"))
    }

    async fn read(&self) -> Result<StateFile, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|source| StorageError::Corrupt {
                key: self.path.display().to_string(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StateFile::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, state: &StateFile) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_vec_pretty(state)
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl WorkspaceStore for FileWorkspaceStore {
    async fn get(&self, workspace: &str, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().await;
        let state = self.read().await?;
        Ok(state.get(workspace).and_then(|values| values.get(key)).cloned())
    }

    async fn set(&self, workspace: &str, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut state = self.read().await?;
        state
            .entry(workspace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self.write(&state).await
    }

    async fn remove(&self, workspace: &str, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut state = self.read().await?;
        let Some(values) = state.get_mut(workspace) else {
            return Ok(());
        };
        if values.remove(key).is_none() {
            return Ok(());
        }
        if values.is_empty() {
            state.remove(workspace);
        }
        self.write(&state).await
    }
}
