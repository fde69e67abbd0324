//! Agent backend abstraction
//!
//! The agent pipeline runs in an external ADK web server; this module is the
//! only place that talks to it.

mod decode;
mod error;
mod http;
mod types;

pub use error::{BackendError, BackendErrorKind};
pub use http::HttpBackend;
pub use types::{ArtifactDescriptor, BackendHealth, SessionHandle};

use async_trait::async_trait;
use futures::stream::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;

/// Decoded text chunks of a streamed agent reply, in arrival order
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, BackendError>> + Send>>;

/// Operations the interaction layer needs from the agent backend
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Create a backend session for `user_id` in `app_name`
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
    ) -> Result<SessionHandle, BackendError>;

    /// Submit a user message; resolves once the reply body starts
    async fn send_message(
        &self,
        session: &SessionHandle,
        text: &str,
    ) -> Result<ChunkStream, BackendError>;

    async fn list_artifacts(
        &self,
        session: &SessionHandle,
    ) -> Result<Vec<ArtifactDescriptor>, BackendError>;

    async fn fetch_artifact(
        &self,
        session: &SessionHandle,
        filename: &str,
    ) -> Result<String, BackendError>;

    /// Deployment probe, not used by the interaction flow
    async fn health(&self) -> Result<BackendHealth, BackendError>;

    async fn info(&self) -> Result<Value, BackendError>;
}

#[async_trait]
impl<T: AgentBackend + ?Sized> AgentBackend for Arc<T> {
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
    ) -> Result<SessionHandle, BackendError> {
        (**self).create_session(app_name, user_id).await
    }

    async fn send_message(
        &self,
        session: &SessionHandle,
        text: &str,
    ) -> Result<ChunkStream, BackendError> {
        (**self).send_message(session, text).await
    }

    async fn list_artifacts(
        &self,
        session: &SessionHandle,
    ) -> Result<Vec<ArtifactDescriptor>, BackendError> {
        (**self).list_artifacts(session).await
    }

    async fn fetch_artifact(
        &self,
        session: &SessionHandle,
        filename: &str,
    ) -> Result<String, BackendError> {
        (**self).fetch_artifact(session, filename).await
    }

    async fn health(&self) -> Result<BackendHealth, BackendError> {
        (**self).health().await
    }

    async fn info(&self) -> Result<Value, BackendError> {
        (**self).info().await
    }
}

/// Logging wrapper for backends
pub struct LoggingBackend {
    inner: Arc<dyn AgentBackend>,
}

impl LoggingBackend {
    pub fn new(inner: Arc<dyn AgentBackend>) -> Self {
        Self { inner }
    }
}

fn log_outcome<T>(operation: &'static str, start: std::time::Instant, result: &Result<T, BackendError>) {
    let duration_ms = start.elapsed().as_millis();
    match result {
        Ok(_) => tracing::info!(operation, duration_ms = %duration_ms, "Backend request completed"),
        Err(e) => tracing::error!(
            operation,
            duration_ms = %duration_ms,
            kind = ?e.kind,
            error = %e.message,
            "Backend request failed"
        ),
    }
}

#[async_trait]
impl AgentBackend for LoggingBackend {
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
    ) -> Result<SessionHandle, BackendError> {
        let start = std::time::Instant::now();
        let result = self.inner.create_session(app_name, user_id).await;
        log_outcome("create_session", start, &result);
        if let Ok(session) = &result {
            tracing::info!(session_id = %session.session_id, app_name, user_id, "Backend session created");
        }
        result
    }

    async fn send_message(
        &self,
        session: &SessionHandle,
        text: &str,
    ) -> Result<ChunkStream, BackendError> {
        let start = std::time::Instant::now();
        let result = self.inner.send_message(session, text).await;
        // Measures time until the reply body starts, not the whole stream
        log_outcome("send_message", start, &result);
        result
    }

    async fn list_artifacts(
        &self,
        session: &SessionHandle,
    ) -> Result<Vec<ArtifactDescriptor>, BackendError> {
        let start = std::time::Instant::now();
        let result = self.inner.list_artifacts(session).await;
        log_outcome("list_artifacts", start, &result);
        result
    }

    async fn fetch_artifact(
        &self,
        session: &SessionHandle,
        filename: &str,
    ) -> Result<String, BackendError> {
        let start = std::time::Instant::now();
        let result = self.inner.fetch_artifact(session, filename).await;
        log_outcome("fetch_artifact", start, &result);
        result
    }

    async fn health(&self) -> Result<BackendHealth, BackendError> {
        self.inner.health().await
    }

    async fn info(&self) -> Result<Value, BackendError> {
        self.inner.info().await
    }
}
