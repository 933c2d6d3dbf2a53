//! Execution context lifecycle.
//!
//! A workspace owns at most one remote project at a time. Its handle is
//! persisted so it survives restarts, and every read-modify-write of it runs
//! under a per-workspace lock so concurrent callers never create duplicates.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use agent_dispatch_core::traits::CONTEXT_KEY;
use agent_dispatch_core::{ExecutionContext, WorkspaceStore};
use agent_dispatch_transport::RemoteApi;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::SessionError;

/// Obtains, persists and disposes execution contexts per workspace.
pub struct ContextManager {
    api: Arc<dyn RemoteApi>,
    store: Arc<dyn WorkspaceStore>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ContextManager {
    #[must_use]
    pub fn new(api: Arc<dyn RemoteApi>, store: Arc<dyn WorkspaceStore>) -> Self {
        Self {
            api,
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock(&self, workspace: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(workspace.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    async fn load(&self, workspace: &str) -> Result<Option<ExecutionContext>, SessionError> {
        let Some(raw) = self.store.get(workspace, CONTEXT_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(ctx) => Ok(Some(ctx)),
            Err(e) if !raw.trim_start().starts_with('{') => {
                // Bare id, as written by older clients.
                debug!(workspace, error = %e, "treating stored context as a bare id");
                Ok(Some(ExecutionContext {
                    id: raw,
                    created_at: 0,
                    uploaded_file_count: 0,
                }))
            }
            Err(source) => Err(agent_dispatch_core::StorageError::Corrupt {
                key: CONTEXT_KEY.to_string(),
                source,
            }
            .into()),
        }
    }

    async fn save(&self, workspace: &str, ctx: &ExecutionContext) -> Result<(), SessionError> {
        let raw = serde_json::to_string(ctx)
            .map_err(|e| agent_dispatch_core::StorageError::Internal(e.to_string()))?;
        self.store.set(workspace, CONTEXT_KEY, &raw).await?;
        Ok(())
    }

    /// The persisted context of `workspace`, if any.
    ///
    /// # Errors
    /// Returns error if persisted state cannot be read.
    pub async fn current(&self, workspace: &str) -> Result<Option<ExecutionContext>, SessionError> {
        let _guard = self.lock(workspace).await;
        self.load(workspace).await
    }

    /// Return the workspace's context, creating it remotely on first use.
    ///
    /// # Errors
    /// Returns error if the remote creation call fails or state cannot be persisted.
    pub async fn acquire(&self, workspace: &str) -> Result<ExecutionContext, SessionError> {
        let _guard = self.lock(workspace).await;
        if let Some(ctx) = self.load(workspace).await? {
            debug!(workspace, context_id = %ctx.id, "reusing execution context");
            return Ok(ctx);
        }

        let id = self.api.create_project().await?;
        let ctx = ExecutionContext::new(id);
        self.save(workspace, &ctx).await?;
        info!(workspace, context_id = %ctx.id, "created execution context");
        Ok(ctx)
    }

    /// Add `count` to the uploaded-file counter of the current context.
    ///
    /// Only the persisted handle of `context_id` is updated; a handle is never
    /// created here.
    ///
    /// # Errors
    /// - `StaleContext` if `context_id` is not the workspace's current context
    /// - any failure to read or persist state
    pub async fn record_uploads(
        &self,
        workspace: &str,
        context_id: &str,
        count: u32,
    ) -> Result<ExecutionContext, SessionError> {
        let _guard = self.lock(workspace).await;
        let Some(mut ctx) = self
            .load(workspace)
            .await?
            .filter(|ctx| ctx.id == context_id)
        else {
            warn!(workspace, context_id, "upload recorded against a context that is no longer current");
            return Err(SessionError::StaleContext(context_id.to_string()));
        };
        ctx.record_uploads(count);
        self.save(workspace, &ctx).await?;
        Ok(ctx)
    }

    /// Best-effort remote teardown of `context_id`.
    ///
    /// Returns `true` if the context was disposed and the handle cleared. A
    /// remote failure is logged and leaves the handle intact so a later
    /// `acquire` reuses the still-live context.
    ///
    /// # Errors
    /// Returns error only if persisted state cannot be updated.
    pub async fn dispose(&self, workspace: &str, context_id: &str) -> Result<bool, SessionError> {
        let _guard = self.lock(workspace).await;
        if let Err(e) = self.api.cleanup_project(context_id).await {
            warn!(workspace, context_id, error = %e, "context cleanup failed, keeping handle");
            return Ok(false);
        }

        if self
            .load(workspace)
            .await?
            .is_some_and(|ctx| ctx.id == context_id)
        {
            self.store.remove(workspace, CONTEXT_KEY).await?;
        }
        info!(workspace, context_id, "disposed execution context");
        Ok(true)
    }

    /// Drop the persisted handle without contacting the remote side.
    ///
    /// # Errors
    /// Returns error if persisted state cannot be updated.
    pub async fn forget(&self, workspace: &str) -> Result<(), SessionError> {
        let _guard = self.lock(workspace).await;
        self.store.remove(workspace, CONTEXT_KEY).await?;
        Ok(())
    }
}
