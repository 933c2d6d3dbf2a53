//! Session monitoring.
//!
//! Drives one session's event stream to a terminal outcome. Reads happen one
//! at a time in an explicit loop; each chunk is framed, decoded, applied to
//! the session and forwarded to the sink in wire order.

use std::sync::Arc;
use std::time::Duration;

use agent_dispatch_core::{EventSink, Outcome, Session, SessionUpdate, StreamEvent};
use agent_dispatch_transport::{ByteStream, FrameDecoder, DecodeObserver, LogObserver, RemoteApi};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::SessionError;

pub(crate) const CLOSED_UNEXPECTEDLY: &str = "stream closed unexpectedly";
pub(crate) const TIMEOUT: &str = "timeout";

/// Reads a session's event stream until it reaches a terminal outcome.
pub struct SessionMonitor {
    api: Arc<dyn RemoteApi>,
    idle_timeout: Duration,
    observer: Arc<dyn DecodeObserver>,
}

impl SessionMonitor {
    /// Monitor that fails a session after `idle_timeout` without data.
    #[must_use]
    pub fn new(api: Arc<dyn RemoteApi>, idle_timeout: Duration) -> Self {
        Self {
            api,
            idle_timeout,
            observer: Arc::new(LogObserver),
        }
    }

    /// Replace the hook notified about dropped frames.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn DecodeObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Monitor `session` until it completes, fails or is cancelled.
    ///
    /// Cancellation is cooperative: `cancel` is checked before the stream is
    /// opened and around every read, but an in-flight read is never aborted.
    /// Once cancellation is observed a best-effort stop is sent and frames
    /// already buffered are discarded.
    ///
    /// Every call ends with a [`SessionUpdate::Finished`] on `sink`, including
    /// the error path.
    ///
    /// # Errors
    /// Returns error if the stream cannot be opened or the transport fails
    /// mid-stream.
    pub async fn monitor(
        &self,
        session: &mut Session,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<Outcome, SessionError> {
        let result = self.pump(session, sink, cancel).await;
        let outcome = match &result {
            Ok(outcome) => outcome.clone(),
            Err(e) => Outcome::Failed(e.to_string()),
        };
        session.finish(&outcome);
        info!(session_id = %session.id, outcome = ?outcome, "session finished");
        sink.emit(SessionUpdate::Finished(outcome));
        result
    }

    async fn pump(
        &self,
        session: &mut Session,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<Outcome, SessionError> {
        if cancel.is_cancelled() {
            return Ok(self.stop(&session.id).await);
        }

        let Ok(stream) = tokio::time::timeout(self.idle_timeout, self.api.open_events(&session.id)).await
        else {
            return Ok(self.timed_out(&session.id).await);
        };
        let mut stream: ByteStream = stream?;
        debug!(session_id = %session.id, "event stream opened");

        let mut decoder = FrameDecoder::new();
        loop {
            if cancel.is_cancelled() {
                return Ok(self.stop(&session.id).await);
            }

            let read = tokio::time::timeout(self.idle_timeout, stream.next()).await;

            if cancel.is_cancelled() {
                return Ok(self.stop(&session.id).await);
            }

            let chunk = match read {
                Err(_) => return Ok(self.timed_out(&session.id).await),
                Ok(None) => {
                    warn!(
                        session_id = %session.id,
                        buffered = decoder.buffered(),
                        "event stream ended without a terminal event"
                    );
                    return Ok(Outcome::Failed(CLOSED_UNEXPECTEDLY.to_string()));
                }
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(Some(Ok(chunk))) => chunk,
            };
            trace!(session_id = %session.id, len = chunk.len(), "read chunk");

            for decoded in decoder.push(&chunk) {
                let event = match decoded {
                    Ok(event) => event,
                    Err(e) => {
                        self.observer.frame_dropped(&session.id, &e);
                        continue;
                    }
                };

                session.apply(&event);
                let terminal = match &event {
                    StreamEvent::Complete {} => Some(Outcome::Completed),
                    StreamEvent::Error { message } => Some(Outcome::Failed(message.clone())),
                    _ => None,
                };
                sink.emit(SessionUpdate::Event(event));

                match terminal {
                    Some(Outcome::Completed) => {
                        sink.emit(SessionUpdate::Response(session.response().to_string()));
                        return Ok(Outcome::Completed);
                    }
                    Some(outcome) => return Ok(outcome),
                    None => {}
                }
            }
        }
    }

    /// Best-effort remote stop after cancellation.
    async fn stop(&self, session_id: &str) -> Outcome {
        info!(session_id, "cancellation requested, stopping session");
        self.send_stop(session_id).await;
        Outcome::Stopped
    }

    async fn timed_out(&self, session_id: &str) -> Outcome {
        warn!(session_id, timeout = ?self.idle_timeout, "no data on event stream");
        self.send_stop(session_id).await;
        Outcome::Failed(TIMEOUT.to_string())
    }

    async fn send_stop(&self, session_id: &str) {
        if let Err(e) = self.api.stop(session_id).await {
            warn!(session_id, error = %e, "stop request failed");
        }
    }
}
