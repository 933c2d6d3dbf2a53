//! Output files produced by a completed session.

use std::path::Path;

/// Extensions whose content is opaque binary rather than UTF-8 text.
///
/// Binary content travels base64-encoded on the wire.
pub const BINARY_EXTENSIONS: &[&str] = &[
    "7z", "a", "avi", "bin", "bmp", "class", "dll", "dylib", "elf", "eot", "exe", "gif", "gz",
    "hex", "ico", "jar", "jpeg", "jpg", "lib", "mov", "mp3", "mp4", "o", "obj", "ogg", "otf",
    "pdf", "png", "so", "tar", "tgz", "ttf", "wasm", "wav", "webm", "webp", "woff", "woff2",
    "xz", "zip",
];

/// Whether `path` names a binary file according to [`BINARY_EXTENSIONS`].
#[must_use]
pub fn is_binary_path(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            BINARY_EXTENSIONS.contains(&ext.as_str())
        })
}

/// Artifact payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactContent {
    Text(String),
    Binary(Vec<u8>),
}

impl ArtifactContent {
    /// Bytes to write to disk.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    #[must_use]
    pub const fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }
}

/// A named output file fetched from a completed session. Never mutated once fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Remote relative path; may contain directory separators.
    pub path: String,
    pub content: ArtifactContent,
    /// Session that produced this artifact.
    pub session_id: String,
}
