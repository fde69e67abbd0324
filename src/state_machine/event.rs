//! Events that can occur in an interaction

use crate::backend::{ArtifactDescriptor, BackendError, SessionHandle};
use chrono::{DateTime, Utc};

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    UserMessage {
        text: String,
        submitted_at: DateTime<Utc>,
    },
    RefreshArtifacts,
    SelectArtifact {
        filename: String,
    },

    // Session bootstrap
    SessionCreated {
        session: SessionHandle,
    },

    // Reply stream events
    StreamOpened,
    ChunkReceived {
        text: String,
    },
    StreamFinished,
    SendFailed {
        error: BackendError,
    },

    // Artifact events, tagged with the request they answer
    ArtifactsListed {
        request: u64,
        artifacts: Vec<ArtifactDescriptor>,
    },
    ArtifactFetched {
        request: u64,
        filename: String,
        content: String,
    },
    ArtifactListFailed {
        request: u64,
        error: BackendError,
    },
    ArtifactFetchFailed {
        request: u64,
        filename: String,
        error: BackendError,
    },
}

impl Event {
    pub fn user_message(text: impl Into<String>) -> Self {
        Event::UserMessage {
            text: text.into(),
            submitted_at: Utc::now(),
        }
    }

    pub fn chunk(text: impl Into<String>) -> Self {
        Event::ChunkReceived { text: text.into() }
    }
}
