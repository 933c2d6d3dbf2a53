//! Wire protocol for the remote agent service.

use agent_dispatch_core::{Artifact, ArtifactContent, ComputeTier, is_binary_path};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

/// Response of `POST /projects/ephemeral`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProjectResponse {
    pub project: ProjectRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectRef {
    pub id: String,
}

/// Body of `POST /agent/dispatch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub context_id: String,
    pub message: String,
    pub tier: ComputeTier,
}

/// Response of `POST /agent/dispatch`.
///
/// The id is optional here so that a missing id surfaces as a protocol error
/// at the dispatcher rather than as an opaque JSON failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    #[serde(default, alias = "session_id")]
    pub session_id: Option<String>,
}

/// Body of `POST /agent/stop`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRequest<'a> {
    pub session_id: &'a str,
}

/// Content encoding of a file on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    Utf8,
    Base64,
}

impl Encoding {
    /// Encoding used for `path`, chosen by the binary extension allow-list.
    #[must_use]
    pub fn for_path(path: &str) -> Self {
        if is_binary_path(path) {
            Self::Base64
        } else {
            Self::Utf8
        }
    }
}

/// Body of `POST /projects/{id}/files`.
#[derive(Debug, Clone, Serialize)]
pub struct UploadRequest {
    pub path: String,
    pub content: String,
    pub encoding: Encoding,
}

impl UploadRequest {
    /// Build an upload, base64-encoding binary files.
    ///
    /// Content that is not valid UTF-8 is sent as base64 whatever its
    /// extension, so the remote side always receives the exact bytes.
    #[must_use]
    pub fn new(path: &str, content: &[u8]) -> Self {
        let text = match Encoding::for_path(path) {
            Encoding::Utf8 => std::str::from_utf8(content).ok(),
            Encoding::Base64 => None,
        };
        let (content, encoding) = match text {
            Some(text) => (text.to_string(), Encoding::Utf8),
            None => (BASE64.encode(content), Encoding::Base64),
        };
        Self {
            path: path.to_string(),
            content,
            encoding,
        }
    }
}

/// Response of `GET /sessions/{id}/artifacts`.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactListResponse {
    #[serde(default)]
    pub artifacts: Vec<WireArtifact>,
}

/// One artifact as listed by the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireArtifact {
    pub path: String,
    #[serde(default)]
    pub content: String,
}

/// Binary artifact content that is not valid base64.
#[derive(Debug, thiserror::Error)]
#[error("Artifact {path} is not valid base64: {source}")]
pub struct ArtifactDecodeError {
    pub path: String,
    #[source]
    pub source: base64::DecodeError,
}

impl WireArtifact {
    #[must_use]
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// Convert to a domain artifact, decoding binary content.
    ///
    /// # Errors
    /// Returns error if a binary artifact's content is not base64.
    pub fn into_artifact(self, session_id: &str) -> Result<Artifact, ArtifactDecodeError> {
        let content = if is_binary_path(&self.path) {
            let bytes = BASE64
                .decode(self.content.trim())
                .map_err(|source| ArtifactDecodeError {
                    path: self.path.clone(),
                    source,
                })?;
            ArtifactContent::Binary(bytes)
        } else {
            ArtifactContent::Text(self.content)
        };
        Ok(Artifact {
            path: self.path,
            content,
            session_id: session_id.to_string(),
        })
    }
}
