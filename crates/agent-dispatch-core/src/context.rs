//! Execution context for agent sessions.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Remote, workspace-scoped holding area for session inputs and outputs.
///
/// The remote side calls this a "project". One context exists per workspace
/// at a time and is reused across sessions until it is disposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Opaque identifier assigned by the remote service.
    pub id: String,

    /// Creation timestamp (Unix epoch seconds).
    pub created_at: i64,

    /// Number of input files uploaded into this context so far.
    #[serde(default)]
    pub uploaded_file_count: u32,
}

impl ExecutionContext {
    /// Create a context record for a freshly created remote project.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: now(),
            uploaded_file_count: 0,
        }
    }

    /// Record `count` additional uploaded files.
    pub const fn record_uploads(&mut self, count: u32) {
        self.uploaded_file_count = self.uploaded_file_count.saturating_add(count);
    }
}

/// Current time as Unix epoch seconds.
#[must_use]
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
