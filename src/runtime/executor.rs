//! Session runtime executor

use super::{Dispatch, UiEvent};
use crate::backend::{AgentBackend, BackendError, SessionHandle};
use crate::state_machine::{
    transition, Effect, Event, InteractionContext, InteractionSnapshot, InteractionState,
};
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

/// Runs one UI session: applies events in order and executes their effects
pub struct SessionRuntime<B>
where
    B: AgentBackend + ?Sized + 'static,
{
    context: InteractionContext,
    state: InteractionState,
    backend: Arc<B>,
    event_rx: mpsc::Receiver<Dispatch>,
    /// Weak so the runtime stops once every handle and request task is gone
    event_tx: mpsc::WeakSender<Dispatch>,
    broadcast_tx: broadcast::Sender<UiEvent>,
    snapshot_tx: watch::Sender<InteractionSnapshot>,
}

impl<B> SessionRuntime<B>
where
    B: AgentBackend + ?Sized + 'static,
{
    pub fn new(
        context: InteractionContext,
        backend: Arc<B>,
        event_rx: mpsc::Receiver<Dispatch>,
        event_tx: &mpsc::Sender<Dispatch>,
        broadcast_tx: broadcast::Sender<UiEvent>,
    ) -> Self {
        let state = InteractionState::new();
        let (snapshot_tx, _) = watch::channel(state.snapshot());
        Self {
            context,
            state,
            backend,
            event_rx,
            event_tx: event_tx.downgrade(),
            broadcast_tx,
            snapshot_tx,
        }
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<InteractionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub async fn run(mut self) {
        tracing::info!(ui_session = %self.context.ui_session_id, "Starting session runtime");

        // Each event runs to completion before the next is received
        while let Some(dispatch) = self.event_rx.recv().await {
            self.process(dispatch);
        }

        tracing::info!(ui_session = %self.context.ui_session_id, "Session runtime stopped");
    }

    fn process(&mut self, dispatch: Dispatch) {
        let Dispatch { event, reply } = dispatch;

        let outcome = match transition(&self.state, &self.context, event) {
            Ok(result) => {
                self.state = result.new_state;
                self.snapshot_tx.send_replace(self.state.snapshot());
                for effect in result.effects {
                    self.execute_effect(effect);
                }
                Ok(())
            }
            Err(e) => {
                if e.is_user_facing() {
                    tracing::info!(ui_session = %self.context.ui_session_id, error = %e, "User action rejected");
                    if reply.is_none() {
                        let _ = self.broadcast_tx.send(UiEvent::Error {
                            message: e.to_string(),
                        });
                    }
                } else {
                    tracing::warn!(ui_session = %self.context.ui_session_id, error = %e, "Ignoring stale event");
                }
                Err(e)
            }
        };

        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }
    }

    /// Execute an effect. Requests are spawned, never awaited here.
    fn execute_effect(&self, effect: Effect) {
        match effect {
            Effect::CreateSession => {
                let backend = self.backend.clone();
                let app_name = self.context.app_name.clone();
                let user_id = self.context.user_id.clone();
                let timeout = self.context.request_timeout;
                self.spawn_request(send_failed("Session request ended unexpectedly"), async move {
                    match tokio::time::timeout(timeout, backend.create_session(&app_name, &user_id)).await {
                        Ok(Ok(session)) => Event::SessionCreated { session },
                        Ok(Err(error)) => Event::SendFailed { error },
                        Err(_) => Event::SendFailed {
                            error: BackendError::timeout(timeout),
                        },
                    }
                });
            }

            Effect::SendMessage { session, text } => {
                let backend = self.backend.clone();
                let timeout = self.context.request_timeout;
                let ui_session = self.context.ui_session_id.clone();
                let Some(tx) = self.event_tx.upgrade() else {
                    return;
                };
                let chunk_tx = tx.clone();
                self.spawn_request_with(tx, send_failed("Reply task ended unexpectedly"), async move {
                    let start = std::time::Instant::now();
                    let outcome = tokio::time::timeout(
                        timeout,
                        stream_reply(backend.as_ref(), &session, &text, &chunk_tx),
                    )
                    .await;
                    match outcome {
                        Ok(Ok(chunks)) => {
                            tracing::info!(
                                ui_session = %ui_session,
                                session_id = %session.session_id,
                                chunks,
                                duration_ms = %start.elapsed().as_millis(),
                                "Agent reply complete"
                            );
                            Event::StreamFinished
                        }
                        Ok(Err(error)) => Event::SendFailed { error },
                        Err(_) => {
                            tracing::warn!(
                                ui_session = %ui_session,
                                session_id = %session.session_id,
                                timeout_secs = timeout.as_secs(),
                                "Agent reply timed out"
                            );
                            Event::SendFailed {
                                error: BackendError::timeout(timeout),
                            }
                        }
                    }
                });
            }

            Effect::ListArtifacts { session, request } => {
                let backend = self.backend.clone();
                let timeout = self.context.request_timeout;
                let fallback = Event::ArtifactListFailed {
                    request,
                    error: BackendError::aborted("Artifact request ended unexpectedly"),
                };
                self.spawn_request(fallback, async move {
                    match bounded(timeout, backend.list_artifacts(&session)).await {
                        Ok(artifacts) => Event::ArtifactsListed { request, artifacts },
                        Err(error) => Event::ArtifactListFailed { request, error },
                    }
                });
            }

            Effect::FetchArtifact {
                session,
                filename,
                request,
            } => {
                let backend = self.backend.clone();
                let timeout = self.context.request_timeout;
                let fallback = Event::ArtifactFetchFailed {
                    request,
                    filename: filename.clone(),
                    error: BackendError::aborted("Artifact request ended unexpectedly"),
                };
                self.spawn_request(fallback, async move {
                    match bounded(timeout, backend.fetch_artifact(&session, &filename)).await {
                        Ok(content) => Event::ArtifactFetched {
                            request,
                            filename,
                            content,
                        },
                        Err(error) => Event::ArtifactFetchFailed {
                            request,
                            filename,
                            error,
                        },
                    }
                });
            }

            Effect::NotifyState => {
                let _ = self.broadcast_tx.send(UiEvent::State {
                    snapshot: self.state.snapshot(),
                });
            }

            Effect::NotifyChunk { turn, index, text } => {
                let _ = self.broadcast_tx.send(UiEvent::Chunk { turn, index, text });
            }

            Effect::NotifyAgentDone => {
                let _ = self.broadcast_tx.send(UiEvent::AgentDone);
            }

            Effect::NotifyError { message } => {
                tracing::warn!(ui_session = %self.context.ui_session_id, error = %message, "Request failed");
                let _ = self.broadcast_tx.send(UiEvent::Error { message });
            }
        }
    }

    fn spawn_request<F>(&self, fallback: Event, request: F)
    where
        F: Future<Output = Event> + Send + 'static,
    {
        if let Some(tx) = self.event_tx.upgrade() {
            self.spawn_request_with(tx, fallback, request);
        }
    }

    /// Spawn a request whose final event is always delivered, even if the
    /// task panics or is torn down before finishing
    #[allow(clippy::unused_self)]
    fn spawn_request_with<F>(&self, tx: mpsc::Sender<Dispatch>, fallback: Event, request: F)
    where
        F: Future<Output = Event> + Send + 'static,
    {
        tokio::spawn(async move {
            let Some(guard) = TerminalGuard::arm(tx, fallback).await else {
                return; // Runtime already stopped
            };
            let event = request.await;
            guard.finish(event);
        });
    }
}

/// Stream a reply into the session, returning the number of chunks forwarded
async fn stream_reply<B>(
    backend: &B,
    session: &SessionHandle,
    text: &str,
    tx: &mpsc::Sender<Dispatch>,
) -> Result<u64, BackendError>
where
    B: AgentBackend + ?Sized,
{
    let mut stream = backend.send_message(session, text).await?;
    forward(tx, Event::StreamOpened).await?;

    let mut chunks = 0;
    while let Some(chunk) = stream.next().await {
        let text = chunk?;
        if text.is_empty() {
            continue;
        }
        chunks += 1;
        forward(tx, Event::chunk(text)).await?;
    }
    Ok(chunks)
}

async fn forward(tx: &mpsc::Sender<Dispatch>, event: Event) -> Result<(), BackendError> {
    tx.send(Dispatch::internal(event))
        .await
        .map_err(|_| BackendError::aborted("Session closed while streaming"))
}

async fn bounded<T, F>(timeout: Duration, request: F) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    tokio::time::timeout(timeout, request)
        .await
        .unwrap_or_else(|_| Err(BackendError::timeout(timeout)))
}

fn send_failed(message: &str) -> Event {
    Event::SendFailed {
        error: BackendError::aborted(message),
    }
}

/// Delivers a fallback terminal event if dropped before `finish`.
///
/// Holds a reserved channel slot from the start, so the terminal event is
/// delivered even when the session channel is full.
struct TerminalGuard {
    permit: Option<mpsc::OwnedPermit<Dispatch>>,
    fallback: Option<Event>,
}

impl TerminalGuard {
    /// Reserve the slot; `None` when the runtime has stopped
    async fn arm(tx: mpsc::Sender<Dispatch>, fallback: Event) -> Option<Self> {
        let permit = tx.reserve_owned().await.ok()?;
        Some(Self {
            permit: Some(permit),
            fallback: Some(fallback),
        })
    }

    fn finish(mut self, event: Event) {
        self.fallback = None;
        if let Some(permit) = self.permit.take() {
            permit.send(Dispatch::internal(event));
        }
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if let (Some(permit), Some(event)) = (self.permit.take(), self.fallback.take()) {
            tracing::error!(event = ?event, "Request task ended without an outcome");
            permit.send(Dispatch::internal(event));
        }
    }
}
