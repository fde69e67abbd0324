//! HTTP implementation of the agent backend (ADK web server API)

use super::decode::Utf8ChunkDecoder;
use super::types::{
    ArtifactDescriptor, ArtifactListing, BackendHealth, CreateSessionResponse, SendMessageRequest,
    SessionHandle,
};
use super::{AgentBackend, BackendError, ChunkStream};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, Url};
use serde_json::{json, Value};
use std::time::Duration;

/// Client for an ADK web server
pub struct HttpBackend {
    client: Client,
    base_url: Url,
}

impl HttpBackend {
    /// Create a client rooted at `base_url` (e.g. `http://localhost:8010`).
    ///
    /// Only connection setup is bounded here; whole-request bounds are applied
    /// by the caller so that streamed replies are not cut off by the client.
    pub fn new(base_url: &str, connect_timeout: Duration) -> Result<Self, BackendError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| BackendError::malformed(format!("Invalid backend URL {base_url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::malformed(format!(
                "Backend URL cannot be used as a base: {base_url}"
            )));
        }

        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| BackendError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build a URL from path segments, percent-encoding each one
    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| BackendError::malformed("Backend URL cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn session_url(&self, session: &SessionHandle, tail: &[&str]) -> Result<Url, BackendError> {
        if session.session_id.is_empty() {
            return Err(BackendError::client_error("Session id is empty"));
        }
        let mut segments = vec![
            "apps",
            session.app_name.as_str(),
            "users",
            session.user_id.as_str(),
            "sessions",
            session.session_id.as_str(),
        ];
        segments.extend_from_slice(tail);
        self.endpoint(&segments)
    }
}

/// Pass a success response through, turn anything else into a classified error
async fn ensure_success(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::from_status(status, &body))
}

/// Turn a streamed body into decoded text chunks in arrival order
fn decode_body(response: Response) -> ChunkStream {
    let bytes = response.bytes_stream().boxed();
    let stream = futures::stream::unfold(
        (bytes, Some(Utf8ChunkDecoder::new())),
        |(mut bytes, mut decoder)| async move {
            loop {
                let active = decoder.as_mut()?;
                match bytes.next().await {
                    Some(Ok(chunk)) => {
                        let text = active.push(&chunk);
                        if text.is_empty() {
                            continue;
                        }
                        return Some((Ok(text), (bytes, decoder)));
                    }
                    Some(Err(e)) => {
                        let err = BackendError::network(format!("Stream interrupted: {e}"));
                        return Some((Err(err), (bytes, None)));
                    }
                    None => {
                        let tail = decoder.take()?.finish();
                        if tail.is_empty() {
                            return None;
                        }
                        return Some((Ok(tail), (bytes, None)));
                    }
                }
            }
        },
    );
    Box::pin(stream)
}

#[async_trait]
impl AgentBackend for HttpBackend {
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
    ) -> Result<SessionHandle, BackendError> {
        let url = self.endpoint(&["apps", app_name, "users", user_id, "sessions"])?;
        let response = self
            .client
            .post(url)
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(&e))?;
        let response = ensure_success(response).await?;

        let body: CreateSessionResponse = response
            .json()
            .await
            .map_err(|e| BackendError::malformed(format!("Failed to parse session response: {e}")))?;

        match body.id {
            Some(id) if !id.is_empty() => Ok(SessionHandle {
                session_id: id,
                app_name: app_name.to_string(),
                user_id: user_id.to_string(),
            }),
            _ => Err(BackendError::malformed(
                "Session response did not contain an id",
            )),
        }
    }

    async fn send_message(
        &self,
        session: &SessionHandle,
        text: &str,
    ) -> Result<ChunkStream, BackendError> {
        let url = self.session_url(session, &[])?;
        let response = self
            .client
            .post(url)
            .json(&SendMessageRequest::user_text(text))
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(&e))?;
        let response = ensure_success(response).await?;
        Ok(decode_body(response))
    }

    async fn list_artifacts(
        &self,
        session: &SessionHandle,
    ) -> Result<Vec<ArtifactDescriptor>, BackendError> {
        let url = self.session_url(session, &["artifacts"])?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(&e))?;
        let response = ensure_success(response).await?;

        let listing: ArtifactListing = response
            .json()
            .await
            .map_err(|e| BackendError::malformed(format!("Failed to parse artifact list: {e}")))?;
        Ok(listing.into_descriptors())
    }

    async fn fetch_artifact(
        &self,
        session: &SessionHandle,
        filename: &str,
    ) -> Result<String, BackendError> {
        let url = self.session_url(session, &["artifacts", filename])?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(&e))?;
        let response = ensure_success(response).await?;

        response
            .text()
            .await
            .map_err(|e| BackendError::network(format!("Failed to read artifact: {e}")))
    }

    async fn health(&self) -> Result<BackendHealth, BackendError> {
        let url = self.endpoint(&["health"])?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(&e))?;
        let response = ensure_success(response).await?;

        response
            .json()
            .await
            .map_err(|e| BackendError::malformed(format!("Failed to parse health response: {e}")))
    }

    async fn info(&self) -> Result<Value, BackendError> {
        let url = self.endpoint(&["info"])?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(&e))?;
        let response = ensure_success(response).await?;

        response
            .json()
            .await
            .map_err(|e| BackendError::malformed(format!("Failed to parse info response: {e}")))
    }
}
