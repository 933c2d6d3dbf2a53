//! reqwest implementation of [`RemoteApi`].

use std::sync::Arc;
use std::time::Duration;

use agent_dispatch_core::{CredentialStore, config::ApiConfig};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, Method, RequestBuilder, Response, header};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::{ApiError, ByteStream, RemoteApi};
use crate::auth;
use crate::protocol::{
    ArtifactListResponse, CreateProjectResponse, DispatchRequest, DispatchResponse, StopRequest,
    UploadRequest, WireArtifact,
};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// HTTP client for the remote agent service.
///
/// Every call carries the stored bearer credential. A 401/403 that reports an
/// expired or invalid credential clears the store.
pub struct HttpApi {
    client: Client,
    base_url: String,
    request_timeout: Duration,
    credentials: Arc<dyn CredentialStore>,
}

impl HttpApi {
    /// Create a client from configuration.
    ///
    /// # Errors
    /// Returns error if the underlying HTTP client cannot be built.
    pub fn new(config: &ApiConfig, credentials: Arc<dyn CredentialStore>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout(),
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Start an authorized request.
    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let token = match self.credentials.load().await {
            Ok(Some(token)) => token,
            Ok(None) => return Err(ApiError::MissingCredential),
            Err(e) => {
                warn!(error = %e, "failed to load credential");
                return Err(ApiError::Credential(e));
            }
        };

        let request_id = Uuid::new_v4();
        debug!(%method, path, %request_id, "remote call");
        Ok(self
            .client
            .request(method, self.url(path))
            .bearer_auth(token)
            .header(REQUEST_ID_HEADER, request_id.to_string()))
    }

    /// Send a request and classify non-success responses.
    async fn execute(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = auth::classify(status.as_u16(), body);
        if matches!(err, ApiError::AuthExpired) {
            warn!(status = status.as_u16(), "credential rejected, clearing stored credential");
            if let Err(e) = self.credentials.clear().await {
                warn!(error = %e, "failed to clear credential");
            }
        } else {
            debug!(status = status.as_u16(), "remote call failed");
        }
        Err(err)
    }

    async fn execute_json<T>(&self, builder: RequestBuilder) -> Result<T, ApiError>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self.execute(builder.timeout(self.request_timeout)).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Protocol(e.to_string()))
    }

    async fn execute_empty(&self, builder: RequestBuilder) -> Result<(), ApiError> {
        self.execute(builder.timeout(self.request_timeout)).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteApi for HttpApi {
    async fn create_project(&self) -> Result<String, ApiError> {
        let builder = self.request(Method::POST, "/projects/ephemeral").await?;
        let response: CreateProjectResponse = self.execute_json(builder).await?;
        Ok(response.project.id)
    }

    async fn upload_file(&self, context_id: &str, path: &str, content: &[u8]) -> Result<(), ApiError> {
        let builder = self
            .request(Method::POST, &format!("/projects/{context_id}/files"))
            .await?
            .json(&UploadRequest::new(path, content));
        self.execute_empty(builder).await
    }

    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchResponse, ApiError> {
        let builder = self.request(Method::POST, "/agent/dispatch").await?.json(request);
        self.execute_json(builder).await
    }

    async fn stop(&self, session_id: &str) -> Result<(), ApiError> {
        let builder = self
            .request(Method::POST, "/agent/stop")
            .await?
            .json(&StopRequest { session_id });
        self.execute_empty(builder).await
    }

    async fn open_events(&self, session_id: &str) -> Result<ByteStream, ApiError> {
        // No request timeout: the monitor bounds each read with its idle timeout.
        let builder = self
            .request(Method::GET, "/sse")
            .await?
            .query(&[("session_id", session_id)])
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache");
        let response = self.execute(builder).await?;
        Ok(response.bytes_stream().map_err(ApiError::from).boxed())
    }

    async fn list_artifacts(&self, session_id: &str) -> Result<Vec<WireArtifact>, ApiError> {
        let builder = self
            .request(Method::GET, &format!("/sessions/{session_id}/artifacts"))
            .await?;
        let response: ArtifactListResponse = self.execute_json(builder).await?;
        Ok(response.artifacts)
    }

    async fn cleanup_project(&self, context_id: &str) -> Result<(), ApiError> {
        let builder = self
            .request(Method::DELETE, &format!("/projects/{context_id}/cleanup"))
            .await?;
        self.execute_empty(builder).await
    }
}
