//! Session dispatch.

use std::sync::Arc;

use agent_dispatch_core::{ComputeTier, Session};
use agent_dispatch_transport::{DispatchRequest, RemoteApi};
use tracing::{info, warn};

use crate::SessionError;

/// Submits a unit of work to an execution context.
///
/// Single attempt: a failure is returned as-is and the caller decides whether
/// to retry, possibly with a fresh context.
pub struct Dispatcher {
    api: Arc<dyn RemoteApi>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(api: Arc<dyn RemoteApi>) -> Self {
        Self { api }
    }

    /// Dispatch `message` and return the new session in the `Dispatched` state.
    ///
    /// # Errors
    /// - `EmptyMessage` if `message` is blank
    /// - `Dispatch` if the remote call fails
    /// - `MissingSessionId` if the response carries no session id
    pub async fn dispatch(
        &self,
        context_id: &str,
        message: &str,
        tier: ComputeTier,
    ) -> Result<Session, SessionError> {
        if message.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        let request = DispatchRequest {
            context_id: context_id.to_string(),
            message: message.to_string(),
            tier,
        };
        let response = self.api.dispatch(&request).await.map_err(|e| {
            warn!(context_id, error = %e, "dispatch failed");
            SessionError::Dispatch(e)
        })?;

        let session_id = response
            .session_id
            .filter(|id| !id.is_empty())
            .ok_or(SessionError::MissingSessionId)?;

        info!(context_id, session_id = %session_id, tier = %tier, "session dispatched");
        Ok(Session::dispatched(session_id, context_id, tier))
    }
}
