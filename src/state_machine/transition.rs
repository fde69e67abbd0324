//! Pure state transition function
//!
//! Given the same state and event this always produces the same new state and
//! effects. All I/O happens in the runtime that executes the effects.

use super::state::{InteractionError, Operation, SelectedArtifact, SendPhase, Turn};
use super::{Effect, Event, InteractionContext, InteractionState};
use crate::backend::{BackendError, SessionHandle};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: InteractionState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: InteractionState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Agent is busy, wait for the current reply to finish")]
    Busy,
    #[error("Message is empty")]
    EmptyMessage,
    #[error("No session yet, send a message first")]
    NoSession,
    #[error("Artifact filename is empty")]
    EmptyFilename,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

impl TransitionError {
    /// Rejections of user actions, as opposed to stale backend events
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, TransitionError::InvalidTransition(_))
    }
}

/// Pure transition function
#[allow(clippy::too_many_lines)] // One arm per event reads better than helpers
pub fn transition(
    state: &InteractionState,
    _context: &InteractionContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match event {
        // ============================================================
        // Message send
        // ============================================================
        Event::UserMessage { text, submitted_at } => {
            if state.is_processing() {
                return Err(TransitionError::Busy);
            }
            if text.trim().is_empty() {
                return Err(TransitionError::EmptyMessage);
            }

            let mut next = state.clone();
            next.turns.push(Turn::open(text.clone(), submitted_at));
            next.last_error = None;

            match &state.session {
                Some(session) => {
                    next.phase = SendPhase::Sending;
                    Ok(TransitionResult::new(next)
                        .with_effect(Effect::NotifyState)
                        .with_effect(Effect::send_message(session, text)))
                }
                None => {
                    next.phase = SendPhase::CreatingSession;
                    Ok(TransitionResult::new(next)
                        .with_effect(Effect::NotifyState)
                        .with_effect(Effect::CreateSession))
                }
            }
        }

        Event::SessionCreated { session } => {
            if state.phase != SendPhase::CreatingSession || state.session.is_some() {
                return Err(invalid(state, "SessionCreated"));
            }
            if session.session_id.is_empty() {
                let error = BackendError::malformed("Backend returned an empty session id");
                return Ok(fail_send(state, &error));
            }
            let Some(turn) = state.open_turn() else {
                return Err(invalid(state, "SessionCreated without an open turn"));
            };

            let mut next = state.clone();
            next.phase = SendPhase::Sending;
            let effect = Effect::send_message(&session, turn.user_message.clone());
            next.session = Some(session);

            Ok(TransitionResult::new(next)
                .with_effect(Effect::NotifyState)
                .with_effect(effect))
        }

        // ============================================================
        // Reply streaming
        // ============================================================
        Event::StreamOpened => {
            if state.phase != SendPhase::Sending {
                return Err(invalid(state, "StreamOpened"));
            }
            let mut next = state.clone();
            next.phase = SendPhase::Streaming { chunks_received: 0 };
            Ok(TransitionResult::new(next).with_effect(Effect::NotifyState))
        }

        Event::ChunkReceived { text } => {
            let SendPhase::Streaming { chunks_received } = state.phase else {
                return Err(invalid(state, "ChunkReceived"));
            };
            let mut next = state.clone();
            let turn = next.turns.len().saturating_sub(1);
            let Some(open) = next.turns.last_mut() else {
                return Err(invalid(state, "ChunkReceived without an open turn"));
            };
            open.agent_response.push_str(&text);
            let index = chunks_received + 1;
            next.phase = SendPhase::Streaming {
                chunks_received: index,
            };
            Ok(TransitionResult::new(next).with_effect(Effect::NotifyChunk { turn, index, text }))
        }

        Event::StreamFinished => match state.phase {
            SendPhase::Sending | SendPhase::Streaming { .. } => {
                let mut next = state.clone();
                next.phase = SendPhase::Idle;
                Ok(TransitionResult::new(next)
                    .with_effect(Effect::NotifyState)
                    .with_effect(Effect::NotifyAgentDone))
            }
            _ => Err(invalid(state, "StreamFinished")),
        },

        Event::SendFailed { error } => {
            if !state.is_processing() {
                return Err(invalid(state, "SendFailed"));
            }
            Ok(fail_send(state, &error))
        }

        // ============================================================
        // Artifacts
        // ============================================================
        Event::RefreshArtifacts => {
            let session = require_session(state)?.clone();
            let mut next = state.clone();
            let request = next.next_artifact_request();
            next.pending_list = Some(request);
            Ok(TransitionResult::new(next).with_effect(Effect::ListArtifacts { session, request }))
        }

        Event::SelectArtifact { filename } => {
            if filename.trim().is_empty() {
                return Err(TransitionError::EmptyFilename);
            }
            let session = require_session(state)?.clone();
            let mut next = state.clone();
            let request = next.next_artifact_request();
            next.pending_fetch = Some(request);
            Ok(TransitionResult::new(next).with_effect(Effect::FetchArtifact {
                session,
                filename,
                request,
            }))
        }

        // Only the response to the latest request of each kind is applied
        Event::ArtifactsListed { request, artifacts } => {
            if state.pending_list != Some(request) {
                return Err(superseded("ArtifactsListed", request));
            }
            let mut next = state.clone();
            next.pending_list = None;
            next.artifacts = artifacts;
            Ok(TransitionResult::new(next).with_effect(Effect::NotifyState))
        }

        Event::ArtifactFetched {
            request,
            filename,
            content,
        } => {
            if state.pending_fetch != Some(request) {
                return Err(superseded("ArtifactFetched", request));
            }
            let mut next = state.clone();
            next.pending_fetch = None;
            next.selected = Some(SelectedArtifact { filename, content });
            Ok(TransitionResult::new(next).with_effect(Effect::NotifyState))
        }

        Event::ArtifactListFailed { request, error } => {
            if state.pending_list != Some(request) {
                return Err(superseded("ArtifactListFailed", request));
            }
            let mut next = state.clone();
            next.pending_list = None;
            next.last_error = Some(InteractionError::new(Operation::ListArtifacts, &error));
            Ok(TransitionResult::new(next)
                .with_effect(Effect::NotifyState)
                .with_effect(Effect::notify_error(format!(
                    "Failed to list artifacts: {error}"
                ))))
        }

        Event::ArtifactFetchFailed {
            request,
            filename,
            error,
        } => {
            if state.pending_fetch != Some(request) {
                return Err(superseded("ArtifactFetchFailed", request));
            }
            let mut next = state.clone();
            next.pending_fetch = None;
            next.last_error = Some(InteractionError::new(Operation::FetchArtifact, &error));
            Ok(TransitionResult::new(next)
                .with_effect(Effect::NotifyState)
                .with_effect(Effect::notify_error(format!(
                    "Failed to fetch {filename}: {error}"
                ))))
        }
    }
}

// Helper functions

fn require_session(state: &InteractionState) -> Result<&SessionHandle, TransitionError> {
    state
        .session
        .as_ref()
        .filter(|s| !s.session_id.is_empty())
        .ok_or(TransitionError::NoSession)
}

/// Any busy phase -> Idle, keeping whatever the open turn already received
fn fail_send(state: &InteractionState, error: &BackendError) -> TransitionResult {
    let operation = if state.phase == SendPhase::CreatingSession {
        Operation::CreateSession
    } else {
        Operation::SendMessage
    };
    let mut next = state.clone();
    next.phase = SendPhase::Idle;
    next.last_error = Some(InteractionError::new(operation, error));

    let message = match operation {
        Operation::CreateSession => format!("Failed to create session: {error}"),
        _ => format!("Failed to get a reply: {error}"),
    };
    TransitionResult::new(next)
        .with_effect(Effect::NotifyState)
        .with_effect(Effect::notify_error(message))
}

fn superseded(event: &str, request: u64) -> TransitionError {
    TransitionError::InvalidTransition(format!(
        "{event} answers artifact request {request}, which is no longer pending"
    ))
}

fn invalid(state: &InteractionState, event: &str) -> TransitionError {
    TransitionError::InvalidTransition(format!(
        "No transition from {} with event {event}",
        state.phase.name()
    ))
}
