//! Broadcast + history update store for presentation layers.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::{StreamExt, future};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{EventSink, SessionUpdate, StreamEvent};

/// Default history size limit (16 MB).
const HISTORY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
struct StoredUpdate {
    update: SessionUpdate,
    bytes: usize,
}

struct Inner {
    history: VecDeque<StoredUpdate>,
    total_bytes: usize,
}

/// Update store with broadcast and history support.
///
/// A presentation layer that attaches late receives the history first and
/// then follows live updates without gaps.
pub struct MsgStore {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<SessionUpdate>,
    history_limit: usize,
}

impl Default for MsgStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MsgStore {
    /// Create a new store with the default history limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_limit(HISTORY_BYTES)
    }

    /// Create a store that keeps at most `bytes` of approximate history.
    #[must_use]
    pub fn with_history_limit(bytes: usize) -> Self {
        let (sender, _) = broadcast::channel(10_000);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(32),
                total_bytes: 0,
            }),
            sender,
            history_limit: bytes,
        }
    }

    /// Push an update to both live listeners and history.
    pub fn push(&self, update: SessionUpdate) {
        let _ = self.sender.send(update.clone()); // live listeners
        let bytes = update.approx_bytes();

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        while inner.total_bytes.saturating_add(bytes) > self.history_limit {
            if let Some(front) = inner.history.pop_front() {
                inner.total_bytes = inner.total_bytes.saturating_sub(front.bytes);
            } else {
                break;
            }
        }
        inner.history.push_back(StoredUpdate { update, bytes });
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<SessionUpdate> {
        self.sender.subscribe()
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn get_history(&self) -> Vec<SessionUpdate> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .map(|s| s.update.clone())
            .collect()
    }

    /// Stream that yields history first, then live updates.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, SessionUpdate> {
        let (history, rx) = (self.get_history(), self.get_receiver());

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }

    /// Stream of decoded events (until Finished).
    #[must_use]
    pub fn event_stream(&self) -> futures::stream::BoxStream<'static, StreamEvent> {
        self.history_plus_stream()
            .take_while(|update| future::ready(!matches!(update, SessionUpdate::Finished(_))))
            .filter_map(|update| async move {
                match update {
                    SessionUpdate::Event(event) => Some(event),
                    _ => None,
                }
            })
            .boxed()
    }

    /// Combined response text, if the session has flushed one.
    #[must_use]
    pub fn final_response(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .rev()
            .find_map(|s| match &s.update {
                SessionUpdate::Response(text) => Some(text.clone()),
                _ => None,
            })
    }
}

impl EventSink for MsgStore {
    fn emit(&self, update: SessionUpdate) {
        self.push(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Outcome;

    #[tokio::test]
    async fn late_subscriber_replays_history_then_stops_at_finished() {
        let store = MsgStore::new();
        store.emit(SessionUpdate::SessionId("s-1".into()));
        store.emit(SessionUpdate::Event(StreamEvent::Progress {
            message: "one".into(),
        }));
        store.emit(SessionUpdate::Event(StreamEvent::Complete {}));
        store.emit(SessionUpdate::Finished(Outcome::Completed));

        let events: Vec<_> = store.event_stream().collect().await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Progress {
                    message: "one".into()
                },
                StreamEvent::Complete {},
            ]
        );
    }

    #[test]
    fn history_is_bounded() {
        let store = MsgStore::with_history_limit(100);
        for _ in 0..10 {
            store.push(SessionUpdate::Response("x".repeat(40)));
        }
        let history = store.get_history();
        assert!(history.len() < 10);
        assert!(!history.is_empty());
    }

    #[test]
    fn final_response_returns_latest() {
        let store = MsgStore::new();
        assert_eq!(store.final_response(), None);
        store.push(SessionUpdate::Response("first".into()));
        store.push(SessionUpdate::Response("second".into()));
        assert_eq!(store.final_response().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn live_receiver_sees_new_updates() {
        let store = MsgStore::new();
        let mut rx = store.get_receiver();
        store.push(SessionUpdate::SessionId("s-2".into()));
        assert_eq!(rx.recv().await.unwrap(), SessionUpdate::SessionId("s-2".into()));
    }
}
