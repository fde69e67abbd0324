//! Effects produced by state transitions

use crate::backend::SessionHandle;

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Create the backend session (first send only)
    CreateSession,

    /// Submit a message and stream the reply (spawns as background task)
    SendMessage { session: SessionHandle, text: String },

    /// Fetch the artifact listing for the session
    ListArtifacts { session: SessionHandle, request: u64 },

    /// Fetch one artifact's content
    FetchArtifact {
        session: SessionHandle,
        filename: String,
        request: u64,
    },

    /// Publish the new state to connected clients
    NotifyState,

    /// Forward one reply chunk to connected clients
    NotifyChunk {
        turn: usize,
        index: u64,
        text: String,
    },

    /// The agent finished replying
    NotifyAgentDone,

    /// Report a failure to connected clients
    NotifyError { message: String },
}

impl Effect {
    pub fn send_message(session: &SessionHandle, text: impl Into<String>) -> Self {
        Effect::SendMessage {
            session: session.clone(),
            text: text.into(),
        }
    }

    pub fn notify_error(message: impl Into<String>) -> Self {
        Effect::NotifyError {
            message: message.into(),
        }
    }
}
