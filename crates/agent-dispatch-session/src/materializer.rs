//! Artifact materialization.
//!
//! Writes the files a session produced under a local destination root.
//! Individual failures are collected into the report instead of aborting the
//! batch, and re-running overwrites with identical bytes.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use agent_dispatch_transport::{RemoteApi, WireArtifact};
use tracing::{debug, info, warn};

use crate::SessionError;

/// One artifact that could not be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFailure {
    /// Remote path as listed.
    pub path: String,
    pub reason: String,
}

/// Result of one materialization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    /// Local paths written, in listing order.
    pub written: Vec<PathBuf>,
    pub failed: Vec<ArtifactFailure>,
}

impl MaterializeReport {
    /// Number of artifacts written.
    #[must_use]
    pub fn count(&self) -> usize {
        self.written.len()
    }

    /// Whether every listed artifact was written.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Fetches a session's artifacts and writes them to disk.
pub struct ArtifactMaterializer {
    api: Arc<dyn RemoteApi>,
    output_prefix: String,
}

impl ArtifactMaterializer {
    /// `output_prefix` is the remote directory stripped from artifact paths.
    #[must_use]
    pub fn new(api: Arc<dyn RemoteApi>, output_prefix: impl Into<String>) -> Self {
        Self {
            api,
            output_prefix: output_prefix.into(),
        }
    }

    /// Write every artifact of `session_id` under `destination`.
    ///
    /// An empty listing writes nothing.
    ///
    /// # Errors
    /// Returns error only if the artifact listing cannot be fetched; per-file
    /// failures are reported in [`MaterializeReport::failed`].
    pub async fn materialize(
        &self,
        session_id: &str,
        context_id: &str,
        destination: &Path,
    ) -> Result<MaterializeReport, SessionError> {
        let listed = self.api.list_artifacts(session_id).await?;
        let mut report = MaterializeReport::default();
        if listed.is_empty() {
            info!(session_id, "session produced no artifacts");
            return Ok(report);
        }

        for wire in listed {
            let remote_path = wire.path.clone();
            match self.write_one(wire, session_id, context_id, destination).await {
                Ok(target) => {
                    debug!(session_id, path = %target.display(), "wrote artifact");
                    report.written.push(target);
                }
                Err(reason) => {
                    warn!(session_id, path = %remote_path, reason = %reason, "artifact not written");
                    report.failed.push(ArtifactFailure {
                        path: remote_path,
                        reason,
                    });
                }
            }
        }

        info!(
            session_id,
            written = report.written.len(),
            failed = report.failed.len(),
            destination = %destination.display(),
            "materialized artifacts"
        );
        Ok(report)
    }

    async fn write_one(
        &self,
        wire: WireArtifact,
        session_id: &str,
        context_id: &str,
        destination: &Path,
    ) -> Result<PathBuf, String> {
        let relative = self
            .relative_path(&wire.path, context_id)
            .ok_or_else(|| "path escapes the destination".to_string())?;
        let target = destination.join(relative);
        let artifact = wire.into_artifact(session_id).map_err(|e| e.to_string())?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| e.to_string())?;
        }
        tokio::fs::write(&target, artifact.content.as_bytes())
            .await
            .map_err(|e| e.to_string())?;
        Ok(target)
    }

    /// Local path of `remote` relative to the destination root.
    ///
    /// Context and output prefixes are stripped. Returns `None` for paths that
    /// are empty or would leave the root.
    fn relative_path(&self, remote: &str, context_id: &str) -> Option<PathBuf> {
        let normalized = remote.replace('\\', "/");
        let mut rest = normalized.trim_start_matches('/');

        let prefixes = [
            format!("projects/{context_id}/"),
            format!("{context_id}/"),
            format!("{}/", self.output_prefix.trim_matches('/')),
        ];
        // An empty output prefix leaves just "/".
        for prefix in prefixes.iter().filter(|p| p.len() > 1) {
            if let Some(stripped) = rest.strip_prefix(prefix.as_str()) {
                rest = stripped;
            }
        }

        let mut relative = PathBuf::new();
        for component in Path::new(rest).components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        (!relative.as_os_str().is_empty()).then_some(relative)
    }
}
