//! Failure classification shared by every crate in the workspace.

use std::fmt;

use thiserror::Error;

/// Failure classes surfaced to callers.
///
/// Each crate's error type maps onto one of these through a `kind()` method so
/// callers can branch on the class without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Credential missing, invalid or expired; re-authenticate and retry.
    AuthExpired,
    /// Non-2xx response unrelated to authentication.
    Remote,
    /// Well-formed response missing required fields.
    Protocol,
    /// Malformed stream frame. Recovered locally.
    Decode,
    /// Connection-level failure.
    Transport,
    /// The caller cancelled the session.
    UserCancelled,
    /// Persisted state could not be read or written.
    Storage,
    /// Local filesystem failure.
    Io,
    /// The caller supplied an unusable argument.
    InvalidInput,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AuthExpired => "auth_expired",
            Self::Remote => "remote",
            Self::Protocol => "protocol",
            Self::Decode => "decode",
            Self::Transport => "transport",
            Self::UserCancelled => "user_cancelled",
            Self::Storage => "storage",
            Self::Io => "io",
            Self::InvalidInput => "invalid_input",
        };
        f.write_str(name)
    }
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt stored value for {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Storage error: {0}")]
    Internal(String),
}

impl StorageError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::Storage
    }
}
