//! Transport layer for the remote agent service.
//!
//! Provides:
//! - `RemoteApi` - The seam between orchestration and the remote service
//! - Wire protocol DTOs (JSON + base64 for binary files)
//! - `FrameDecoder` - Event-stream framing into typed `StreamEvent`s
//! - `HttpApi` - reqwest implementation with auth-expiry classification

pub mod api;
pub mod auth;
pub mod client;
pub mod protocol;
pub mod sse;

pub use api::{ApiError, ByteStream, RemoteApi};
pub use client::HttpApi;
pub use protocol::{DispatchRequest, DispatchResponse, WireArtifact};
pub use sse::{DecodeCounter, DecodeError, DecodeObserver, FrameDecoder, LogObserver};
