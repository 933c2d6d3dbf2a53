//! Top-level orchestration of a workspace's sessions.
//!
//! The [`Orchestrator`] owns the components and the registry of running
//! sessions. Nothing here is process-global; embedders create one and share
//! it by reference.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use agent_dispatch_core::config::DisposePolicy;
use agent_dispatch_core::traits::SESSION_KEY;
use agent_dispatch_core::{
    ComputeTier, DispatchConfig, EventSink, ExecutionContext, Outcome, Session, SessionUpdate,
    WorkspaceStore,
};
use agent_dispatch_transport::{DecodeObserver, RemoteApi};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    ArtifactMaterializer, ContextManager, Dispatcher, MaterializeReport, SessionError,
    SessionMonitor,
};

/// A unit of work to run in a workspace.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Opaque workspace handle; scopes persisted state.
    pub workspace: String,
    pub message: String,
    pub tier: ComputeTier,
    /// Root directory artifacts are written under.
    pub destination: PathBuf,
}

impl RunRequest {
    #[must_use]
    pub fn new(
        workspace: impl Into<String>,
        message: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            message: message.into(),
            tier: ComputeTier::default(),
            destination: destination.into(),
        }
    }

    #[must_use]
    pub const fn with_tier(mut self, tier: ComputeTier) -> Self {
        self.tier = tier;
        self
    }
}

/// Result of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub session: Session,
    pub outcome: Outcome,
    /// Present only for completed sessions.
    pub artifacts: Option<MaterializeReport>,
    /// Whether the execution context was torn down afterwards.
    pub context_disposed: bool,
}

/// An input file to upload into the execution context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    /// Path relative to the context root.
    pub path: String,
    pub content: Vec<u8>,
}

impl InputFile {
    #[must_use]
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Running session state.
struct ActiveSession {
    session_id: Option<String>,
    cancel: CancellationToken,
}

type Registry = Mutex<HashMap<String, ActiveSession>>;

/// Removes a workspace from the registry when its run ends, however it ends.
struct Registration<'a> {
    registry: &'a Registry,
    workspace: String,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.workspace);
    }
}

/// Coordinates context acquisition, dispatch, monitoring, artifact retrieval
/// and context disposal for each workspace.
pub struct Orchestrator {
    api: Arc<dyn RemoteApi>,
    contexts: ContextManager,
    dispatcher: Dispatcher,
    monitor: SessionMonitor,
    materializer: ArtifactMaterializer,
    store: Arc<dyn WorkspaceStore>,
    dispose_policy: DisposePolicy,
    active_sessions: Registry,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        api: Arc<dyn RemoteApi>,
        store: Arc<dyn WorkspaceStore>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            contexts: ContextManager::new(Arc::clone(&api), Arc::clone(&store)),
            dispatcher: Dispatcher::new(Arc::clone(&api)),
            monitor: SessionMonitor::new(Arc::clone(&api), config.monitor.idle_timeout()),
            materializer: ArtifactMaterializer::new(
                Arc::clone(&api),
                config.artifacts.output_prefix.clone(),
            ),
            api,
            store,
            dispose_policy: config.dispose_policy,
            active_sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the hook notified about dropped stream frames.
    #[must_use]
    pub fn with_decode_observer(mut self, observer: Arc<dyn DecodeObserver>) -> Self {
        self.monitor = self.monitor.with_observer(observer);
        self
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashMap<String, ActiveSession>> {
        self.active_sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, workspace: &str) -> Result<(Registration<'_>, CancellationToken), SessionError> {
        let mut registry = self.registry();
        if registry.contains_key(workspace) {
            return Err(SessionError::AlreadyRunning(workspace.to_string()));
        }
        let cancel = CancellationToken::new();
        registry.insert(
            workspace.to_string(),
            ActiveSession {
                session_id: None,
                cancel: cancel.clone(),
            },
        );
        Ok((
            Registration {
                registry: &self.active_sessions,
                workspace: workspace.to_string(),
            },
            cancel,
        ))
    }

    fn ensure_idle(&self, workspace: &str) -> Result<(), SessionError> {
        if self.registry().contains_key(workspace) {
            return Err(SessionError::AlreadyRunning(workspace.to_string()));
        }
        Ok(())
    }

    /// Run one session end to end.
    ///
    /// Updates are delivered to `sink` as they happen, starting with the
    /// session id and ending with the outcome. Artifacts are written only for
    /// completed sessions, and the context is then disposed according to the
    /// configured policy.
    ///
    /// # Errors
    /// - `EmptyMessage` / `AlreadyRunning` before any remote call
    /// - `UserCancelled` if cancelled before dispatch
    /// - any dispatch, transport, storage or artifact listing failure
    pub async fn run(
        &self,
        request: RunRequest,
        sink: &dyn EventSink,
    ) -> Result<RunReport, SessionError> {
        if request.message.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let workspace = request.workspace.as_str();
        let (_registration, cancel) = self.register(workspace)?;

        let ctx = self.contexts.acquire(workspace).await?;
        if cancel.is_cancelled() {
            info!(workspace, context_id = %ctx.id, "cancelled before dispatch");
            sink.emit(SessionUpdate::Finished(Outcome::Stopped));
            return Err(SessionError::UserCancelled);
        }

        let mut session = self
            .dispatcher
            .dispatch(&ctx.id, &request.message, request.tier)
            .await?;
        self.store.set(workspace, SESSION_KEY, &session.id).await?;
        if let Some(active) = self.registry().get_mut(workspace) {
            active.session_id = Some(session.id.clone());
        }
        sink.emit(SessionUpdate::SessionId(session.id.clone()));

        let outcome = self.monitor.monitor(&mut session, sink, &cancel).await?;

        let artifacts = if outcome == Outcome::Completed {
            Some(
                self.materializer
                    .materialize(&session.id, &ctx.id, &request.destination)
                    .await?,
            )
        } else {
            None
        };

        let context_disposed = if self.should_dispose(&outcome, artifacts.as_ref()) {
            self.contexts.dispose(workspace, &ctx.id).await?
        } else {
            info!(workspace, context_id = %ctx.id, policy = ?self.dispose_policy, "keeping execution context");
            false
        };

        Ok(RunReport {
            session,
            outcome,
            artifacts,
            context_disposed,
        })
    }

    fn should_dispose(&self, outcome: &Outcome, artifacts: Option<&MaterializeReport>) -> bool {
        let retrieved = artifacts.is_none_or(MaterializeReport::is_complete);
        match self.dispose_policy {
            DisposePolicy::AfterTerminal => retrieved,
            DisposePolicy::AfterCompletion => *outcome == Outcome::Completed && retrieved,
            DisposePolicy::AfterArtifacts => artifacts.is_some_and(|report| report.count() > 0),
            DisposePolicy::Never => false,
        }
    }

    /// Request cancellation of the workspace's running session.
    ///
    /// Returns `false` if nothing is running. The session stops at the next
    /// read boundary.
    pub fn cancel(&self, workspace: &str) -> bool {
        let registry = self.registry();
        let Some(active) = registry.get(workspace) else {
            return false;
        };
        info!(workspace, session_id = ?active.session_id, "cancelling session");
        active.cancel.cancel();
        true
    }

    /// Id of the session currently running in `workspace`, once dispatched.
    #[must_use]
    pub fn active_session(&self, workspace: &str) -> Option<String> {
        self.registry()
            .get(workspace)
            .and_then(|active| active.session_id.clone())
    }

    /// The workspace's persisted execution context, if any.
    ///
    /// # Errors
    /// Returns error if persisted state cannot be read.
    pub async fn current_context(
        &self,
        workspace: &str,
    ) -> Result<Option<ExecutionContext>, SessionError> {
        self.contexts.current(workspace).await
    }

    /// Id of the last session dispatched from `workspace`, running or not.
    ///
    /// # Errors
    /// Returns error if persisted state cannot be read.
    pub async fn current_session_id(&self, workspace: &str) -> Result<Option<String>, SessionError> {
        Ok(self.store.get(workspace, SESSION_KEY).await?)
    }

    /// Upload input files into the workspace's context, creating it if needed.
    ///
    /// The workspace is held for the duration, like a run, so the context
    /// cannot be disposed underneath the uploads. Files are uploaded in
    /// order; on failure or cancellation, files already uploaded stay counted
    /// and the error is returned.
    ///
    /// # Errors
    /// - `AlreadyRunning` if a run or another upload holds the workspace
    /// - `UserCancelled` if cancelled between files
    /// - any failure to acquire the context or upload a file
    pub async fn upload_inputs(
        &self,
        workspace: &str,
        files: &[InputFile],
    ) -> Result<ExecutionContext, SessionError> {
        let (_registration, cancel) = self.register(workspace)?;
        let ctx = self.contexts.acquire(workspace).await?;

        let mut uploaded: u32 = 0;
        let mut failure = None;
        for file in files {
            if cancel.is_cancelled() {
                failure = Some(SessionError::UserCancelled);
                break;
            }
            if let Err(e) = self.api.upload_file(&ctx.id, &file.path, &file.content).await {
                warn!(workspace, context_id = %ctx.id, path = %file.path, error = %e, "upload failed");
                failure = Some(e.into());
                break;
            }
            uploaded = uploaded.saturating_add(1);
        }

        let ctx = self.contexts.record_uploads(workspace, &ctx.id, uploaded).await?;
        info!(workspace, context_id = %ctx.id, uploaded, total = ctx.uploaded_file_count, "uploaded inputs");
        match failure {
            Some(e) => Err(e),
            None => Ok(ctx),
        }
    }

    /// Start over: dispose the current context best-effort and forget both the
    /// context and session handles.
    ///
    /// # Errors
    /// Returns error if a session is running or persisted state cannot be updated.
    pub async fn new_session(&self, workspace: &str) -> Result<(), SessionError> {
        self.ensure_idle(workspace)?;
        if let Some(ctx) = self.contexts.current(workspace).await? {
            if !self.contexts.dispose(workspace, &ctx.id).await? {
                warn!(workspace, context_id = %ctx.id, "forgetting context that could not be disposed");
            }
        }
        self.contexts.forget(workspace).await?;
        self.store.remove(workspace, SESSION_KEY).await?;
        info!(workspace, "started new session");
        Ok(())
    }

    /// Dispose the workspace's context now.
    ///
    /// Returns `false` if there was no context or the remote teardown failed;
    /// in the latter case the handle is kept.
    ///
    /// # Errors
    /// Returns error if a session is running or persisted state cannot be updated.
    pub async fn cleanup(&self, workspace: &str) -> Result<bool, SessionError> {
        self.ensure_idle(workspace)?;
        match self.contexts.current(workspace).await? {
            Some(ctx) => self.contexts.dispose(workspace, &ctx.id).await,
            None => Ok(false),
        }
    }

    /// Write the artifacts of the last dispatched session again.
    ///
    /// # Errors
    /// Returns `NoSession` if nothing was dispatched, or any listing failure.
    pub async fn retrieve_artifacts(
        &self,
        workspace: &str,
        destination: &std::path::Path,
    ) -> Result<MaterializeReport, SessionError> {
        let session_id = self
            .current_session_id(workspace)
            .await?
            .ok_or_else(|| SessionError::NoSession(workspace.to_string()))?;
        let context_id = self
            .contexts
            .current(workspace)
            .await?
            .map(|ctx| ctx.id)
            .unwrap_or_default();
        self.materializer
            .materialize(&session_id, &context_id, destination)
            .await
    }
}

#[cfg(test)]
mod tests {
    use agent_dispatch_core::MsgStore;
    use agent_dispatch_core::traits::CONTEXT_KEY;
    use agent_dispatch_transport::{ApiError, WireArtifact};
    use bytes::Bytes;
    use futures::StreamExt;
    use serde_json::json;

    use super::*;
    use crate::storage::MemoryWorkspaceStore;
    use crate::test_support::{Call, FakeApi, frames};

    struct Harness {
        api: Arc<FakeApi>,
        store: Arc<MemoryWorkspaceStore>,
        orchestrator: Orchestrator,
        dir: tempfile::TempDir,
    }

    fn harness(policy: DisposePolicy) -> Harness {
        harness_with(FakeApi::new(), policy)
    }

    fn harness_with(api: FakeApi, policy: DisposePolicy) -> Harness {
        let api = Arc::new(api);
        let store = Arc::new(MemoryWorkspaceStore::new());
        let config = DispatchConfig {
            dispose_policy: policy,
            ..DispatchConfig::default()
        };
        let orchestrator = Orchestrator::new(
            Arc::clone(&api) as Arc<dyn RemoteApi>,
            Arc::clone(&store) as Arc<dyn WorkspaceStore>,
            &config,
        );
        Harness {
            api,
            store,
            orchestrator,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    impl Harness {
        fn request(&self) -> RunRequest {
            RunRequest::new("ws", "make a header", self.dir.path())
        }

        fn complete_stream(&self) {
            self.api.push_stream([frames(&[
                json!({"type": "content", "text": "done"}),
                json!({"type": "complete"}),
            ])]);
        }

        fn cleanups(&self) -> usize {
            self.api.count(|c| matches!(c, Call::Cleanup(_)))
        }
    }

    #[tokio::test]
    async fn completed_run_writes_artifacts_and_disposes() {
        let h = harness(DisposePolicy::AfterTerminal);
        h.complete_stream();
        h.api.set_artifacts(vec![WireArtifact::new("output/a.h", "x")]);
        let store = MsgStore::new();

        let report = h.orchestrator.run(h.request(), &store).await.unwrap();

        assert_eq!(report.outcome, Outcome::Completed);
        assert_eq!(report.artifacts.as_ref().map(MaterializeReport::count), Some(1));
        assert!(report.context_disposed);
        assert!(h.dir.path().join("a.h").is_file());
        assert_eq!(store.get_history().first(), Some(&SessionUpdate::SessionId("sess-1".into())));
        assert_eq!(
            h.store.get("ws", SESSION_KEY).await.unwrap().as_deref(),
            Some("sess-1")
        );
        assert_eq!(h.store.get("ws", CONTEXT_KEY).await.unwrap(), None);
        assert_eq!(h.orchestrator.active_session("ws"), None);
    }

    #[tokio::test]
    async fn after_terminal_disposes_failed_sessions_too() {
        let h = harness(DisposePolicy::AfterTerminal);
        h.api.push_stream([frames(&[json!({"type": "error", "message": "boom"})])]);

        let report = h.orchestrator.run(h.request(), &MsgStore::new()).await.unwrap();

        assert_eq!(report.outcome, Outcome::Failed("boom".into()));
        assert!(report.artifacts.is_none());
        assert!(report.context_disposed);
        assert_eq!(h.api.count(|c| matches!(c, Call::ListArtifacts(_))), 0);
    }

    #[tokio::test]
    async fn after_terminal_keeps_context_when_artifacts_failed() {
        let h = harness(DisposePolicy::AfterTerminal);
        h.complete_stream();
        h.api.set_artifacts(vec![WireArtifact::new("output/x.png", "%%%")]);

        let report = h.orchestrator.run(h.request(), &MsgStore::new()).await.unwrap();

        assert!(!report.context_disposed);
        assert_eq!(h.cleanups(), 0);
    }

    #[tokio::test]
    async fn after_artifacts_keeps_context_without_output() {
        let h = harness(DisposePolicy::AfterArtifacts);
        h.complete_stream();
        h.complete_stream();

        let first = h.orchestrator.run(h.request(), &MsgStore::new()).await.unwrap();
        let second = h.orchestrator.run(h.request(), &MsgStore::new()).await.unwrap();

        assert!(!first.context_disposed);
        assert_eq!(first.session.context_id, second.session.context_id);
        assert_eq!(h.api.count(|c| *c == Call::CreateProject), 1);
        assert_eq!(h.cleanups(), 0);
    }

    #[tokio::test]
    async fn after_completion_keeps_failed_context() {
        let h = harness(DisposePolicy::AfterCompletion);
        h.api.push_stream([frames(&[json!({"type": "error", "message": "boom"})])]);

        let report = h.orchestrator.run(h.request(), &MsgStore::new()).await.unwrap();
        assert!(!report.context_disposed);
    }

    #[tokio::test]
    async fn never_policy_only_disposes_on_cleanup() {
        let h = harness(DisposePolicy::Never);
        h.complete_stream();
        h.api.set_artifacts(vec![WireArtifact::new("output/a.h", "x")]);

        let report = h.orchestrator.run(h.request(), &MsgStore::new()).await.unwrap();
        assert!(!report.context_disposed);

        assert!(h.orchestrator.cleanup("ws").await.unwrap());
        assert!(!h.orchestrator.cleanup("ws").await.unwrap());
        assert_eq!(h.cleanups(), 1);
    }

    #[tokio::test]
    async fn second_run_is_rejected_while_first_is_running() {
        let h = harness(DisposePolicy::Never);
        let (tx, rx) = futures::channel::mpsc::unbounded::<Result<Bytes, ApiError>>();
        h.api.push_raw_stream(rx.boxed());
        let sink = MsgStore::new();

        let (first, ()) = tokio::join!(h.orchestrator.run(h.request(), &sink), async {
            let second = h.orchestrator.run(h.request(), &sink).await;
            assert!(matches!(second, Err(SessionError::AlreadyRunning(ws)) if ws == "ws"));
            assert_eq!(h.orchestrator.active_session("ws").as_deref(), Some("sess-1"));
            assert!(matches!(
                h.orchestrator.new_session("ws").await,
                Err(SessionError::AlreadyRunning(_))
            ));

            assert!(h.orchestrator.cancel("ws"));
            tx.unbounded_send(Ok(Bytes::from_static(b": ping\n\n"))).unwrap();
        });

        let first = first.unwrap();
        assert_eq!(first.outcome, Outcome::Stopped);
        assert_eq!(h.api.count(|c| matches!(c, Call::Stop(_))), 1);
        assert_eq!(h.orchestrator.active_session("ws"), None);
        assert!(!h.orchestrator.cancel("ws"));
    }

    #[tokio::test]
    async fn registry_is_cleared_after_errors() {
        let h = harness(DisposePolicy::AfterTerminal);
        h.api.fail_dispatch(ApiError::AuthExpired);

        let err = h.orchestrator.run(h.request(), &MsgStore::new()).await.unwrap_err();
        assert_eq!(err.kind(), agent_dispatch_core::ErrorKind::AuthExpired);
        assert_eq!(h.orchestrator.active_session("ws"), None);

        h.complete_stream();
        assert!(h.orchestrator.run(h.request(), &MsgStore::new()).await.is_ok());
    }

    #[tokio::test]
    async fn empty_message_touches_nothing() {
        let h = harness(DisposePolicy::AfterTerminal);
        let request = RunRequest::new("ws", "   ", h.dir.path());

        let err = h.orchestrator.run(request, &MsgStore::new()).await.unwrap_err();
        assert!(matches!(err, SessionError::EmptyMessage));
        assert!(h.api.calls().is_empty());
    }

    #[tokio::test]
    async fn uploads_are_counted_on_the_context() {
        let h = harness(DisposePolicy::AfterTerminal);
        let files = [InputFile::new("notes.md", "# notes"), InputFile::new("logo.png", vec![0u8, 1, 2])];

        h.orchestrator.upload_inputs("ws", &files).await.unwrap();
        let ctx = h.orchestrator.upload_inputs("ws", &files[..1]).await.unwrap();

        assert_eq!(ctx.uploaded_file_count, 3);
        assert_eq!(h.api.count(|c| matches!(c, Call::Upload { .. })), 3);
        assert_eq!(h.api.count(|c| *c == Call::CreateProject), 1);
    }

    #[tokio::test]
    async fn uploads_are_rejected_while_a_run_holds_the_workspace() {
        let h = harness(DisposePolicy::AfterTerminal);
        let (tx, rx) = futures::channel::mpsc::unbounded::<Result<Bytes, ApiError>>();
        h.api.push_raw_stream(rx.boxed());
        let files = [InputFile::new("notes.md", "# notes")];

        let store = MsgStore::new();
        let (run, ()) = tokio::join!(h.orchestrator.run(h.request(), &store), async {
            let upload = h.orchestrator.upload_inputs("ws", &files).await;
            assert!(matches!(upload, Err(SessionError::AlreadyRunning(ws)) if ws == "ws"));
            let chunk = frames(&[json!({"type": "complete"})]);
            tx.unbounded_send(Ok(Bytes::from(chunk))).unwrap();
        });

        assert!(run.unwrap().context_disposed);
        assert_eq!(h.api.count(|c| matches!(c, Call::Upload { .. })), 0);
        assert_eq!(h.store.get("ws", CONTEXT_KEY).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_dispatch_still_reports_finished() {
        let h = harness_with(
            FakeApi::new().with_create_delay(std::time::Duration::from_millis(50)),
            DisposePolicy::AfterTerminal,
        );
        let store = MsgStore::new();

        let (run, ()) = tokio::join!(h.orchestrator.run(h.request(), &store), async {
            tokio::task::yield_now().await;
            assert!(h.orchestrator.cancel("ws"));
        });

        assert!(matches!(run, Err(SessionError::UserCancelled)));
        assert_eq!(store.get_history(), vec![SessionUpdate::Finished(Outcome::Stopped)]);
        assert_eq!(h.api.count(|c| matches!(c, Call::Dispatch(_))), 0);
        assert_eq!(h.orchestrator.active_session("ws"), None);
    }

    #[tokio::test]
    async fn new_session_clears_both_handles() {
        let h = harness(DisposePolicy::Never);
        h.complete_stream();
        h.orchestrator.run(h.request(), &MsgStore::new()).await.unwrap();

        h.api.fail_cleanup(true);
        h.orchestrator.new_session("ws").await.unwrap();

        assert_eq!(h.cleanups(), 1);
        assert_eq!(h.store.get("ws", CONTEXT_KEY).await.unwrap(), None);
        assert_eq!(h.orchestrator.current_session_id("ws").await.unwrap(), None);
    }

    #[tokio::test]
    async fn retrieve_artifacts_uses_last_session() {
        let h = harness(DisposePolicy::Never);
        assert!(matches!(
            h.orchestrator.retrieve_artifacts("ws", h.dir.path()).await,
            Err(SessionError::NoSession(_))
        ));

        h.complete_stream();
        h.orchestrator.run(h.request(), &MsgStore::new()).await.unwrap();
        h.api.set_artifacts(vec![WireArtifact::new("output/late.txt", "hi")]);

        let report = h.orchestrator.retrieve_artifacts("ws", h.dir.path()).await.unwrap();
        assert_eq!(report.count(), 1);
        assert!(h.dir.path().join("late.txt").is_file());
    }
}
