//! In-process fake of the remote service.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use agent_dispatch_transport::{ApiError, ByteStream, DispatchRequest, DispatchResponse, RemoteApi, WireArtifact};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateProject,
    Upload { context_id: String, path: String },
    Dispatch(DispatchRequest),
    Stop(String),
    OpenEvents(String),
    ListArtifacts(String),
    Cleanup(String),
}

pub struct FakeApi {
    calls: Mutex<Vec<Call>>,
    projects: AtomicUsize,
    create_delay: Option<Duration>,
    open_delay: Option<Duration>,
    session_id: Mutex<Option<String>>,
    dispatch_error: Mutex<Option<ApiError>>,
    streams: Mutex<VecDeque<ByteStream>>,
    artifacts: Mutex<Vec<WireArtifact>>,
    fail_artifacts: AtomicBool,
    fail_cleanup: AtomicBool,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            projects: AtomicUsize::new(0),
            create_delay: None,
            open_delay: None,
            session_id: Mutex::new(Some("sess-1".to_string())),
            dispatch_error: Mutex::new(None),
            streams: Mutex::new(VecDeque::new()),
            artifacts: Mutex::new(Vec::new()),
            fail_artifacts: AtomicBool::new(false),
            fail_cleanup: AtomicBool::new(false),
        }
    }
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    pub fn set_session_id(&self, id: Option<&str>) {
        *self.session_id.lock().unwrap() = id.map(str::to_string);
    }

    pub fn fail_dispatch(&self, error: ApiError) {
        *self.dispatch_error.lock().unwrap() = Some(error);
    }

    /// Queue an event stream that yields `chunks` and then ends.
    pub fn push_stream<I, S>(&self, chunks: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let chunks: Vec<Result<Bytes, ApiError>> = chunks
            .into_iter()
            .map(|c| Ok(Bytes::from(c.into())))
            .collect();
        self.push_raw_stream(futures::stream::iter(chunks).boxed());
    }

    pub fn push_raw_stream(&self, stream: ByteStream) {
        self.streams.lock().unwrap().push_back(stream);
    }

    pub fn set_artifacts(&self, artifacts: Vec<WireArtifact>) {
        *self.artifacts.lock().unwrap() = artifacts;
    }

    pub fn fail_artifacts(&self) {
        self.fail_artifacts.store(true, Ordering::SeqCst);
    }

    pub fn fail_cleanup(&self, fail: bool) {
        self.fail_cleanup.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RemoteApi for FakeApi {
    async fn create_project(&self) -> Result<String, ApiError> {
        self.record(Call::CreateProject);
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        let n = self.projects.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("proj-{n}"))
    }

    async fn upload_file(&self, context_id: &str, path: &str, _content: &[u8]) -> Result<(), ApiError> {
        self.record(Call::Upload {
            context_id: context_id.to_string(),
            path: path.to_string(),
        });
        Ok(())
    }

    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchResponse, ApiError> {
        self.record(Call::Dispatch(request.clone()));
        if let Some(error) = self.dispatch_error.lock().unwrap().take() {
            return Err(error);
        }
        Ok(DispatchResponse {
            session_id: self.session_id.lock().unwrap().clone(),
        })
    }

    async fn stop(&self, session_id: &str) -> Result<(), ApiError> {
        self.record(Call::Stop(session_id.to_string()));
        Ok(())
    }

    async fn open_events(&self, session_id: &str) -> Result<ByteStream, ApiError> {
        self.record(Call::OpenEvents(session_id.to_string()));
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| futures::stream::empty().boxed()))
    }

    async fn list_artifacts(&self, session_id: &str) -> Result<Vec<WireArtifact>, ApiError> {
        self.record(Call::ListArtifacts(session_id.to_string()));
        if self.fail_artifacts.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("connection reset".into()));
        }
        Ok(self.artifacts.lock().unwrap().clone())
    }

    async fn cleanup_project(&self, context_id: &str) -> Result<(), ApiError> {
        self.record(Call::Cleanup(context_id.to_string()));
        if self.fail_cleanup.load(Ordering::SeqCst) {
            return Err(ApiError::Remote {
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(())
    }
}

/// Encode events as stream frames.
pub fn frames(events: &[serde_json::Value]) -> String {
    events.iter().map(|e| format!("data: {e}\n\n")).collect()
}
