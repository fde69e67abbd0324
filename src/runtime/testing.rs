//! Mock implementations for testing
//!
//! These mocks enable integration testing without a running agent backend.

use super::{dispatch, Dispatch, DispatchError, SessionRuntime, UiEvent};
use crate::backend::{
    AgentBackend, ArtifactDescriptor, BackendError, BackendHealth, ChunkStream, SessionHandle,
};
use crate::state_machine::{Event, InteractionContext, InteractionSnapshot};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;

// ============================================================================
// Mock Backend
// ============================================================================

/// How the mock answers one `send_message` call
pub enum MockReply {
    /// Reply body arrives as these chunks, then ends
    Chunks(Vec<String>),
    /// Request is refused before any body arrives
    Fail(BackendError),
    /// Some chunks arrive, then the connection breaks
    ChunksThenFail(Vec<String>, BackendError),
    /// Body starts but never produces anything
    Hang,
    /// Chunks are pushed by the test through the sender half
    Channel(mpsc::Receiver<Result<String, BackendError>>),
    /// The request task panics
    Panic,
}

impl MockReply {
    pub fn chunks(chunks: &[&str]) -> Self {
        MockReply::Chunks(chunks.iter().map(|c| (*c).to_string()).collect())
    }

    /// Reply fed chunk by chunk from the returned sender
    pub fn channel() -> (mpsc::Sender<Result<String, BackendError>>, Self) {
        let (tx, rx) = mpsc::channel(16);
        (tx, MockReply::Channel(rx))
    }
}

/// A backend call as the mock received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    CreateSession { app_name: String, user_id: String },
    SendMessage { session_id: String, text: String },
    ListArtifacts { session_id: String },
    FetchArtifact { session_id: String, filename: String },
}

/// Mock backend that answers from queued responses and records every call
pub struct MockBackend {
    sessions: Mutex<VecDeque<Result<String, BackendError>>>,
    replies: Mutex<VecDeque<MockReply>>,
    listings: Mutex<VecDeque<Result<Vec<ArtifactDescriptor>, BackendError>>>,
    contents: Mutex<HashMap<String, String>>,
    fetch_delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<BackendCall>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(VecDeque::new()),
            replies: Mutex::new(VecDeque::new()),
            listings: Mutex::new(VecDeque::new()),
            contents: Mutex::new(HashMap::new()),
            fetch_delays: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue the outcome of the next session creation
    pub fn queue_session(&self, outcome: Result<&str, BackendError>) {
        self.sessions
            .lock()
            .unwrap()
            .push_back(outcome.map(str::to_string));
    }

    pub fn queue_reply(&self, reply: MockReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn queue_listing(&self, listing: Result<Vec<&str>, BackendError>) {
        let listing = listing.map(|names| names.into_iter().map(ArtifactDescriptor::new).collect());
        self.listings.lock().unwrap().push_back(listing);
    }

    pub fn with_artifact(self, filename: &str, content: &str) -> Self {
        self.contents
            .lock()
            .unwrap()
            .insert(filename.to_string(), content.to_string());
        self
    }

    /// Make fetches of `filename` answer only after `delay`
    pub fn with_fetch_delay(self, filename: &str, delay: Duration) -> Self {
        self.fetch_delays
            .lock()
            .unwrap()
            .insert(filename.to_string(), delay);
        self
    }

    pub fn recorded_calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_calls(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|&c| pred(c)).count()
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentBackend for MockBackend {
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
    ) -> Result<SessionHandle, BackendError> {
        self.record(BackendCall::CreateSession {
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
        });
        let session_id = self
            .sessions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("mock-session".to_string()))?;
        Ok(SessionHandle {
            session_id,
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
        })
    }

    async fn send_message(
        &self,
        session: &SessionHandle,
        text: &str,
    ) -> Result<ChunkStream, BackendError> {
        self.record(BackendCall::SendMessage {
            session_id: session.session_id.clone(),
            text: text.to_string(),
        });
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            None => Err(BackendError::network("No mock reply queued")),
            Some(MockReply::Fail(error)) => Err(error),
            Some(MockReply::Chunks(chunks)) => Ok(futures::stream::iter(chunks.into_iter().map(Ok)).boxed()),
            Some(MockReply::ChunksThenFail(chunks, error)) => Ok(futures::stream::iter(
                chunks.into_iter().map(Ok).chain(std::iter::once(Err(error))),
            )
            .boxed()),
            Some(MockReply::Hang) => Ok(futures::stream::pending().boxed()),
            Some(MockReply::Channel(rx)) => Ok(ReceiverStream::new(rx).boxed()),
            Some(MockReply::Panic) => panic!("mock backend panicked mid-request"),
        }
    }

    async fn list_artifacts(
        &self,
        session: &SessionHandle,
    ) -> Result<Vec<ArtifactDescriptor>, BackendError> {
        self.record(BackendCall::ListArtifacts {
            session_id: session.session_id.clone(),
        });
        self.listings
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn fetch_artifact(
        &self,
        session: &SessionHandle,
        filename: &str,
    ) -> Result<String, BackendError> {
        self.record(BackendCall::FetchArtifact {
            session_id: session.session_id.clone(),
            filename: filename.to_string(),
        });
        let delay = self.fetch_delays.lock().unwrap().get(filename).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.contents
            .lock()
            .unwrap()
            .get(filename)
            .cloned()
            .ok_or_else(|| BackendError::not_found(format!("HTTP 404 Not Found: {filename}")))
    }

    async fn health(&self) -> Result<BackendHealth, BackendError> {
        Ok(BackendHealth {
            status: "healthy".to_string(),
            environment: Some("test".to_string()),
            version: Some("0.0.0".to_string()),
            agents: vec!["movie_pitch_agent".to_string()],
        })
    }

    async fn info(&self) -> Result<Value, BackendError> {
        Ok(serde_json::json!({ "app_name": "movie_pitch_agent" }))
    }
}

// ============================================================================
// Test Runtime
// ============================================================================

/// A running session runtime wired to a mock backend
pub struct TestRuntime {
    pub event_tx: mpsc::Sender<Dispatch>,
    pub broadcast_rx: broadcast::Receiver<UiEvent>,
    pub snapshot_rx: watch::Receiver<InteractionSnapshot>,
    pub backend: Arc<MockBackend>,
    _runtime_handle: tokio::task::JoinHandle<()>,
}

pub struct TestRuntimeBuilder {
    backend: Option<MockBackend>,
    request_timeout: Option<Duration>,
}

impl TestRuntime {
    pub fn builder() -> TestRuntimeBuilder {
        TestRuntimeBuilder {
            backend: None,
            request_timeout: None,
        }
    }

    /// Submit a user message, returning whether it was accepted
    pub async fn send_message(&self, text: &str) -> Result<(), DispatchError> {
        dispatch(&self.event_tx, Event::user_message(text)).await
    }

    pub async fn refresh_artifacts(&self) -> Result<(), DispatchError> {
        dispatch(&self.event_tx, Event::RefreshArtifacts).await
    }

    pub async fn select_artifact(&self, filename: &str) -> Result<(), DispatchError> {
        dispatch(
            &self.event_tx,
            Event::SelectArtifact {
                filename: filename.to_string(),
            },
        )
        .await
    }

    pub fn snapshot(&self) -> InteractionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Wait until the snapshot satisfies `pred`
    pub async fn wait_until(
        &mut self,
        timeout: Duration,
        pred: impl FnMut(&InteractionSnapshot) -> bool,
    ) -> bool {
        tokio::time::timeout(timeout, self.snapshot_rx.wait_for(pred))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    /// Wait for the `AgentDone` notification
    pub async fn wait_for_done(&mut self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.broadcast_rx.recv()).await {
                Ok(Ok(UiEvent::AgentDone)) => return true,
                Ok(Ok(_)) => continue,
                _ => return false,
            }
        }
    }

    /// Wait for an error notification and return its message
    pub async fn wait_for_error(&mut self, timeout: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.broadcast_rx.recv()).await {
                Ok(Ok(UiEvent::Error { message })) => return Some(message),
                Ok(Ok(_)) => continue,
                _ => return None,
            }
        }
    }

    /// Every notification received so far, without waiting
    pub fn drain_events(&mut self) -> Vec<UiEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.broadcast_rx.try_recv() {
            events.push(event);
        }
        events
    }
}

impl TestRuntimeBuilder {
    pub fn backend(mut self, backend: MockBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> TestRuntime {
        let backend = Arc::new(self.backend.unwrap_or_default());
        let mut context = InteractionContext::new("ui-test", "movie_pitch_agent", "user");
        if let Some(timeout) = self.request_timeout {
            context = context.with_request_timeout(timeout);
        }

        let (event_tx, event_rx) = mpsc::channel(32);
        let (broadcast_tx, broadcast_rx) = broadcast::channel(128);

        let runtime = SessionRuntime::new(context, backend.clone(), event_rx, &event_tx, broadcast_tx);
        let snapshot_rx = runtime.subscribe_snapshots();

        let handle = tokio::spawn(async move {
            runtime.run().await;
        });

        TestRuntime {
            event_tx,
            broadcast_rx,
            snapshot_rx,
            backend,
            _runtime_handle: handle,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendErrorKind;
    use crate::runtime::{RuntimeManager, RuntimeSettings};
    use crate::state_machine::state::{Operation, SendPhase};
    use crate::state_machine::TransitionError;

    const WAIT: Duration = Duration::from_secs(2);

    fn is_create(call: &BackendCall) -> bool {
        matches!(call, BackendCall::CreateSession { .. })
    }

    fn is_send(call: &BackendCall) -> bool {
        matches!(call, BackendCall::SendMessage { .. })
    }

    fn is_fetch(call: &BackendCall) -> bool {
        matches!(call, BackendCall::FetchArtifact { .. })
    }

    /// First send creates the session, appends an empty turn, then streams
    #[tokio::test]
    async fn test_first_send_creates_session_then_streams() {
        let backend = MockBackend::new();
        backend.queue_session(Ok("sess-1"));
        let (chunk_tx, reply) = MockReply::channel();
        backend.queue_reply(reply);

        let mut rt = TestRuntime::builder().backend(backend).build();
        rt.send_message("Create a sci-fi pitch").await.unwrap();

        // Turn exists with an empty response before any chunk arrives
        let snapshot = rt.snapshot();
        assert!(snapshot.processing);
        assert_eq!(snapshot.turns.len(), 1);
        assert_eq!(snapshot.turns[0].user_message, "Create a sci-fi pitch");
        assert_eq!(snapshot.turns[0].agent_response, "");

        assert!(
            rt.wait_until(WAIT, |s| matches!(s.phase, SendPhase::Streaming { .. }))
                .await
        );
        assert_eq!(
            rt.backend.recorded_calls(),
            vec![
                BackendCall::CreateSession {
                    app_name: "movie_pitch_agent".to_string(),
                    user_id: "user".to_string(),
                },
                BackendCall::SendMessage {
                    session_id: "sess-1".to_string(),
                    text: "Create a sci-fi pitch".to_string(),
                },
            ]
        );

        chunk_tx.send(Ok("Once ".to_string())).await.unwrap();
        assert!(rt.wait_until(WAIT, |s| s.turns[0].agent_response == "Once ").await);

        chunk_tx.send(Ok("upon a time".to_string())).await.unwrap();
        drop(chunk_tx);
        assert!(rt.wait_for_done(WAIT).await);

        let snapshot = rt.snapshot();
        assert_eq!(snapshot.turns[0].agent_response, "Once upon a time");
        assert_eq!(snapshot.session_id.as_deref(), Some("sess-1"));
        assert!(!snapshot.processing);
        assert!(snapshot.last_error.is_none());
    }

    /// Each chunk is broadcast on arrival, in order
    #[tokio::test]
    async fn test_chunks_broadcast_in_order() {
        let backend = MockBackend::new();
        backend.queue_reply(MockReply::chunks(&["Once ", "upon ", "a time"]));

        let mut rt = TestRuntime::builder().backend(backend).build();
        rt.send_message("Pitch").await.unwrap();
        assert!(rt.wait_until(WAIT, |s| !s.processing).await);

        let chunks: Vec<String> = rt
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                UiEvent::Chunk { text, .. } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(chunks, vec!["Once ", "upon ", "a time"]);
    }

    /// Later sends reuse the session created by the first one
    #[tokio::test]
    async fn test_session_reused_across_sends() {
        let backend = MockBackend::new();
        backend.queue_session(Ok("sess-reuse"));
        backend.queue_reply(MockReply::chunks(&["First"]));
        backend.queue_reply(MockReply::chunks(&["Second"]));

        let mut rt = TestRuntime::builder().backend(backend).build();
        rt.send_message("one").await.unwrap();
        assert!(rt.wait_for_done(WAIT).await);
        rt.send_message("two").await.unwrap();
        assert!(rt.wait_for_done(WAIT).await);

        assert_eq!(rt.backend.count_calls(is_create), 1);
        assert_eq!(rt.backend.count_calls(is_send), 2);
        let snapshot = rt.snapshot();
        assert_eq!(snapshot.turns.len(), 2);
        assert_eq!(snapshot.turns[1].agent_response, "Second");
    }

    /// A send while one is in flight is rejected and nothing is sent
    #[tokio::test]
    async fn test_busy_rejects_second_message() {
        let backend = MockBackend::new();
        let (_chunk_tx, reply) = MockReply::channel();
        backend.queue_reply(reply);

        let mut rt = TestRuntime::builder().backend(backend).build();
        rt.send_message("first").await.unwrap();
        assert!(
            rt.wait_until(WAIT, |s| matches!(s.phase, SendPhase::Streaming { .. }))
                .await
        );

        let result = rt.send_message("second").await;
        assert!(matches!(
            result,
            Err(DispatchError::Rejected(TransitionError::Busy))
        ));
        assert_eq!(rt.snapshot().turns.len(), 1);
        assert_eq!(rt.backend.count_calls(is_send), 1);
    }

    #[tokio::test]
    async fn test_blank_message_rejected() {
        let rt = TestRuntime::builder().build();
        let result = rt.send_message("   ").await;
        assert!(matches!(
            result,
            Err(DispatchError::Rejected(TransitionError::EmptyMessage))
        ));
        assert!(rt.snapshot().turns.is_empty());
        assert!(rt.backend.recorded_calls().is_empty());
    }

    /// A reply that never finishes fails after the request timeout
    #[tokio::test(start_paused = true)]
    async fn test_reply_times_out_with_no_chunks() {
        let backend = MockBackend::new();
        backend.queue_reply(MockReply::Hang);

        let mut rt = TestRuntime::builder().backend(backend).build();
        let start = tokio::time::Instant::now();
        rt.send_message("Pitch").await.unwrap();

        let message = rt.wait_for_error(Duration::from_secs(300)).await;
        assert!(start.elapsed() >= Duration::from_secs(120));
        assert!(message.unwrap().contains("timed out after 120s"));

        let snapshot = rt.snapshot();
        assert!(!snapshot.processing);
        assert_eq!(snapshot.turns[0].agent_response, "");
        let error = snapshot.last_error.unwrap();
        assert_eq!(error.kind, BackendErrorKind::Timeout);
        assert_eq!(error.operation, Operation::SendMessage);
    }

    /// Text received before a timeout stays on the turn
    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_partial_response() {
        let backend = MockBackend::new();
        let (chunk_tx, reply) = MockReply::channel();
        backend.queue_reply(reply);

        let mut rt = TestRuntime::builder()
            .backend(backend)
            .request_timeout(Duration::from_secs(30))
            .build();
        rt.send_message("Pitch").await.unwrap();
        chunk_tx.send(Ok("Once ".to_string())).await.unwrap();

        assert!(rt.wait_for_error(Duration::from_secs(60)).await.is_some());
        let snapshot = rt.snapshot();
        assert!(!snapshot.processing);
        assert_eq!(snapshot.turns[0].agent_response, "Once ");
    }

    /// A stream that breaks mid-reply clears processing and keeps the text
    #[tokio::test]
    async fn test_stream_error_mid_reply() {
        let backend = MockBackend::new();
        backend.queue_reply(MockReply::ChunksThenFail(
            vec!["Half a ".to_string()],
            BackendError::network("connection reset"),
        ));

        let mut rt = TestRuntime::builder().backend(backend).build();
        rt.send_message("Pitch").await.unwrap();

        let message = rt.wait_for_error(WAIT).await.unwrap();
        assert!(message.contains("connection reset"));
        let snapshot = rt.snapshot();
        assert!(!snapshot.processing);
        assert_eq!(snapshot.turns[0].agent_response, "Half a ");
        assert_eq!(snapshot.last_error.unwrap().kind, BackendErrorKind::Network);
    }

    /// Failed session creation leaves no session and sends nothing; the next
    /// message tries again
    #[tokio::test]
    async fn test_session_creation_failure_then_retry() {
        let backend = MockBackend::new();
        backend.queue_session(Err(BackendError::server_error("HTTP 503 Service Unavailable")));
        backend.queue_session(Ok("sess-2"));
        backend.queue_reply(MockReply::chunks(&["Here it is"]));

        let mut rt = TestRuntime::builder().backend(backend).build();
        rt.send_message("Pitch").await.unwrap();
        assert!(rt.wait_for_error(WAIT).await.is_some());

        let snapshot = rt.snapshot();
        assert!(!snapshot.processing);
        assert!(snapshot.session_id.is_none());
        assert_eq!(snapshot.last_error.unwrap().operation, Operation::CreateSession);
        assert_eq!(rt.backend.count_calls(is_send), 0);

        rt.send_message("Pitch again").await.unwrap();
        assert!(rt.wait_for_done(WAIT).await);
        assert_eq!(rt.backend.count_calls(is_create), 2);
        let snapshot = rt.snapshot();
        assert_eq!(snapshot.session_id.as_deref(), Some("sess-2"));
        assert!(snapshot.last_error.is_none());
    }

    /// A request task that dies still clears processing
    #[tokio::test]
    async fn test_panicking_request_clears_processing() {
        let backend = MockBackend::new();
        backend.queue_reply(MockReply::Panic);

        let mut rt = TestRuntime::builder().backend(backend).build();
        rt.send_message("Pitch").await.unwrap();

        assert!(rt.wait_until(WAIT, |s| !s.processing).await);
        let error = rt.snapshot().last_error.unwrap();
        assert_eq!(error.kind, BackendErrorKind::Aborted);
    }

    /// Backend events arriving after the send completed change nothing
    #[tokio::test]
    async fn test_late_events_ignored() {
        let backend = MockBackend::new();
        backend.queue_reply(MockReply::chunks(&["Done"]));

        let mut rt = TestRuntime::builder().backend(backend).build();
        rt.send_message("Pitch").await.unwrap();
        assert!(rt.wait_for_done(WAIT).await);
        let before = rt.snapshot();

        rt.event_tx
            .send(Dispatch::internal(Event::chunk("late")))
            .await
            .unwrap();
        rt.event_tx
            .send(Dispatch::internal(Event::StreamFinished))
            .await
            .unwrap();
        // Round trip through the runtime so both events have been processed
        let result = dispatch(&rt.event_tx, Event::user_message("")).await;
        assert!(result.is_err());

        assert_eq!(rt.snapshot(), before);
    }

    #[tokio::test]
    async fn test_artifacts_require_session() {
        let rt = TestRuntime::builder().build();
        assert!(matches!(
            rt.refresh_artifacts().await,
            Err(DispatchError::Rejected(TransitionError::NoSession))
        ));
        assert!(matches!(
            rt.select_artifact("pitch.md").await,
            Err(DispatchError::Rejected(TransitionError::NoSession))
        ));
        assert!(rt.backend.recorded_calls().is_empty());
    }

    #[tokio::test]
    async fn test_list_and_select_artifacts() {
        let backend = MockBackend::new().with_artifact("pitch.md", "# Title\n\nA heist on Mars.");
        backend.queue_session(Ok("sess-art"));
        backend.queue_reply(MockReply::chunks(&["ok"]));
        backend.queue_listing(Ok(vec!["pitch.md", "notes.txt"]));

        let mut rt = TestRuntime::builder().backend(backend).build();
        rt.send_message("Pitch").await.unwrap();
        assert!(rt.wait_for_done(WAIT).await);

        rt.refresh_artifacts().await.unwrap();
        assert!(rt.wait_until(WAIT, |s| s.artifacts.len() == 2).await);
        assert_eq!(rt.snapshot().artifacts[0].filename, "pitch.md");

        rt.select_artifact("pitch.md").await.unwrap();
        assert!(
            rt.wait_until(WAIT, |s| s.selected_artifact.as_deref() == Some("pitch.md"))
                .await
        );
        assert_eq!(rt.snapshot().artifact_content, "# Title\n\nA heist on Mars.");
        assert!(rt.backend.recorded_calls().contains(&BackendCall::FetchArtifact {
            session_id: "sess-art".to_string(),
            filename: "pitch.md".to_string(),
        }));
    }

    /// A failed fetch reports the error and keeps the current artifact
    #[tokio::test]
    async fn test_artifact_failure_keeps_state() {
        let backend = MockBackend::new().with_artifact("pitch.md", "content");
        backend.queue_reply(MockReply::chunks(&["ok"]));
        backend.queue_listing(Ok(vec!["pitch.md"]));
        backend.queue_listing(Err(BackendError::server_error("HTTP 500 Internal Server Error")));

        let mut rt = TestRuntime::builder().backend(backend).build();
        rt.send_message("Pitch").await.unwrap();
        assert!(rt.wait_for_done(WAIT).await);
        rt.refresh_artifacts().await.unwrap();
        assert!(rt.wait_until(WAIT, |s| s.artifacts.len() == 1).await);
        rt.select_artifact("pitch.md").await.unwrap();
        assert!(rt.wait_until(WAIT, |s| s.selected_artifact.is_some()).await);
        let before = rt.snapshot();

        rt.select_artifact("missing.md").await.unwrap();
        let message = rt.wait_for_error(WAIT).await.unwrap();
        assert!(message.contains("missing.md"));

        rt.refresh_artifacts().await.unwrap();
        assert!(rt.wait_for_error(WAIT).await.is_some());

        let after = rt.snapshot();
        assert_eq!(after.artifacts, before.artifacts);
        assert_eq!(after.selected_artifact, before.selected_artifact);
        assert_eq!(after.artifact_content, before.artifact_content);
        assert_eq!(after.last_error.unwrap().operation, Operation::ListArtifacts);
    }

    /// A slow fetch that answers after a newer selection does not replace it
    #[tokio::test(start_paused = true)]
    async fn test_latest_selection_wins_over_slow_fetch() {
        let backend = MockBackend::new()
            .with_artifact("slow.md", "content of slow.md")
            .with_artifact("fast.md", "content of fast.md")
            .with_fetch_delay("slow.md", Duration::from_millis(200));
        backend.queue_reply(MockReply::chunks(&["ok"]));

        let mut rt = TestRuntime::builder().backend(backend).build();
        rt.send_message("Pitch").await.unwrap();
        assert!(rt.wait_for_done(WAIT).await);

        rt.select_artifact("slow.md").await.unwrap();
        rt.select_artifact("fast.md").await.unwrap();
        assert!(
            rt.wait_until(WAIT, |s| s.selected_artifact.as_deref() == Some("fast.md"))
                .await
        );

        // Let the slow response arrive
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(rt.backend.count_calls(is_fetch), 2);
        let snapshot = rt.snapshot();
        assert_eq!(snapshot.selected_artifact.as_deref(), Some("fast.md"));
        assert_eq!(snapshot.artifact_content, "content of fast.md");
        assert!(snapshot.last_error.is_none());
    }

    /// Artifact requests are allowed while a reply is streaming
    #[tokio::test]
    async fn test_artifacts_during_streaming() {
        let backend = MockBackend::new();
        let (chunk_tx, reply) = MockReply::channel();
        backend.queue_reply(reply);
        backend.queue_listing(Ok(vec!["draft.md"]));

        let mut rt = TestRuntime::builder().backend(backend).build();
        rt.send_message("Pitch").await.unwrap();
        assert!(
            rt.wait_until(WAIT, |s| matches!(s.phase, SendPhase::Streaming { .. }))
                .await
        );

        rt.refresh_artifacts().await.unwrap();
        assert!(rt.wait_until(WAIT, |s| s.artifacts.len() == 1).await);
        assert!(rt.snapshot().processing);

        drop(chunk_tx);
        assert!(rt.wait_for_done(WAIT).await);
    }

    // ========================================================================
    // Runtime manager
    // ========================================================================

    fn manager(backend: MockBackend) -> RuntimeManager {
        RuntimeManager::new(
            Arc::new(backend),
            RuntimeSettings {
                app_name: "movie_pitch_agent".to_string(),
                user_id: "user".to_string(),
                request_timeout: Duration::from_secs(120),
                session_idle_timeout: IDLE,
            },
        )
    }

    const IDLE: Duration = Duration::from_secs(1800);

    /// Poll until the session's reply has finished
    async fn wait_idle(manager: &RuntimeManager, id: &str) {
        for _ in 0..100 {
            if !manager.snapshot(id).await.unwrap().processing {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session {id} never became idle");
    }

    #[tokio::test]
    async fn test_manager_sessions_are_independent() {
        let backend = MockBackend::new();
        backend.queue_session(Ok("sess-a"));
        backend.queue_reply(MockReply::chunks(&["A"]));
        let manager = manager(backend);

        let (first, snapshot) = manager.create().await;
        let (second, _) = manager.create().await;
        assert_ne!(first, second);
        assert!(snapshot.turns.is_empty());
        assert_eq!(manager.session_count().await, 2);

        let mut rx = manager.subscribe(&first).await.unwrap().events;
        manager
            .send_event(&first, Event::user_message("Pitch"))
            .await
            .unwrap();
        loop {
            match tokio::time::timeout(WAIT, rx.recv()).await {
                Ok(Ok(UiEvent::AgentDone)) => break,
                Ok(Ok(_)) => continue,
                other => panic!("Expected AgentDone, got {other:?}"),
            }
        }

        let first_snapshot = manager.snapshot(&first).await.unwrap();
        assert_eq!(first_snapshot.session_id.as_deref(), Some("sess-a"));
        let second_snapshot = manager.snapshot(&second).await.unwrap();
        assert!(second_snapshot.session_id.is_none());
        assert!(second_snapshot.turns.is_empty());
    }

    #[tokio::test]
    async fn test_manager_unknown_session() {
        let manager = manager(MockBackend::new());
        let result = manager
            .send_event("nope", Event::user_message("hello"))
            .await;
        assert!(matches!(result, Err(DispatchError::NotFound(_))));
        assert!(manager.snapshot("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_removed_session_runtime_stops() {
        let manager = manager(MockBackend::new());
        let (id, _) = manager.create().await;
        let mut rx = manager.subscribe(&id).await.unwrap().events;

        manager.remove(&id).await.unwrap();
        assert_eq!(manager.session_count().await, 0);
        assert!(matches!(manager.snapshot(&id).await, Err(DispatchError::NotFound(_))));
        assert!(matches!(manager.remove(&id).await, Err(DispatchError::NotFound(_))));

        // The broadcast closes once the runtime task has ended
        let closed = tokio::time::timeout(WAIT, rx.recv()).await;
        assert!(matches!(
            closed,
            Ok(Err(broadcast::error::RecvError::Closed))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sessions_are_evicted() {
        let backend = MockBackend::new();
        backend.queue_reply(MockReply::chunks(&["ok"]));
        let manager = manager(backend);

        let (idle, _) = manager.create().await;
        let (watched, _) = manager.create().await;
        let (active, _) = manager.create().await;
        let _stream = manager.subscribe(&watched).await.unwrap();

        tokio::time::advance(IDLE / 2).await;
        manager
            .send_event(&active, Event::user_message("Pitch"))
            .await
            .unwrap();
        wait_idle(&manager, &active).await;

        // Not idle long enough yet
        assert_eq!(manager.evict_idle().await, 0);

        tokio::time::advance(IDLE / 2 + Duration::from_secs(1)).await;
        assert_eq!(manager.evict_idle().await, 1);
        assert!(matches!(manager.snapshot(&idle).await, Err(DispatchError::NotFound(_))));
        assert!(manager.snapshot(&watched).await.is_ok());
        assert!(manager.snapshot(&active).await.is_ok());

        // The active session's clock restarted at the first sweep
        tokio::time::advance(IDLE / 2).await;
        assert_eq!(manager.evict_idle().await, 1);
        assert!(manager.snapshot(&active).await.is_err());
        assert!(manager.snapshot(&watched).await.is_ok());
    }
}
