//! Interaction state types

use crate::backend::{ArtifactDescriptor, BackendError, BackendErrorKind, SessionHandle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Conversation Turns
// ============================================================================

/// One user message paired with its (possibly partial) agent response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub user_message: String,
    pub agent_response: String,
    pub started_at: DateTime<Utc>,
}

impl Turn {
    pub fn open(user_message: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            user_message: user_message.into(),
            agent_response: String::new(),
            started_at,
        }
    }
}

// ============================================================================
// Send Phase
// ============================================================================

/// Where the current message send is in its lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SendPhase {
    /// Ready for user input, no request in flight
    #[default]
    Idle,

    /// First send of the UI session, backend session being created
    CreatingSession,

    /// Message submitted, waiting for the reply body to start
    Sending,

    /// Reply body arriving chunk by chunk
    Streaming { chunks_received: u64 },
}

impl SendPhase {
    pub fn is_processing(self) -> bool {
        !matches!(self, SendPhase::Idle)
    }

    pub fn name(self) -> &'static str {
        match self {
            SendPhase::Idle => "idle",
            SendPhase::CreatingSession => "creating_session",
            SendPhase::Sending => "sending",
            SendPhase::Streaming { .. } => "streaming",
        }
    }
}

// ============================================================================
// Artifacts and Errors
// ============================================================================

/// The artifact currently shown, filename and content as one value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedArtifact {
    pub filename: String,
    pub content: String,
}

/// Which request an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    CreateSession,
    SendMessage,
    ListArtifacts,
    FetchArtifact,
}

/// Most recent per-request failure, shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionError {
    pub operation: Operation,
    pub kind: BackendErrorKind,
    pub message: String,
}

impl InteractionError {
    pub fn new(operation: Operation, error: &BackendError) -> Self {
        Self {
            operation,
            kind: error.kind,
            message: error.message.clone(),
        }
    }
}

// ============================================================================
// Interaction State
// ============================================================================

/// Everything one UI session knows about its conversation with the agent
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InteractionState {
    pub session: Option<SessionHandle>,
    pub turns: Vec<Turn>,
    pub phase: SendPhase,
    pub artifacts: Vec<ArtifactDescriptor>,
    pub selected: Option<SelectedArtifact>,
    pub last_error: Option<InteractionError>,
    /// Id of the listing whose response will be applied, if one is in flight
    pub pending_list: Option<u64>,
    /// Id of the fetch whose response will be applied, if one is in flight
    pub pending_fetch: Option<u64>,
    /// Last artifact request id handed out
    pub artifact_requests: u64,
}

impl InteractionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True from the start of a send until its reply completes or fails
    pub fn is_processing(&self) -> bool {
        self.phase.is_processing()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.session_id.as_str())
    }

    /// Hand out the id for a new artifact request
    pub fn next_artifact_request(&mut self) -> u64 {
        self.artifact_requests += 1;
        self.artifact_requests
    }

    /// The turn still accumulating a response, if a send is in flight
    pub fn open_turn(&self) -> Option<&Turn> {
        if self.is_processing() {
            self.turns.last()
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> InteractionSnapshot {
        InteractionSnapshot {
            session_id: self.session_id().map(str::to_string),
            turns: self.turns.clone(),
            processing: self.is_processing(),
            phase: self.phase,
            artifacts: self.artifacts.clone(),
            selected_artifact: self.selected.as_ref().map(|s| s.filename.clone()),
            artifact_content: self
                .selected
                .as_ref()
                .map(|s| s.content.clone())
                .unwrap_or_default(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Serializable view of an interaction, as served to UIs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionSnapshot {
    pub session_id: Option<String>,
    pub turns: Vec<Turn>,
    pub processing: bool,
    pub phase: SendPhase,
    pub artifacts: Vec<ArtifactDescriptor>,
    pub selected_artifact: Option<String>,
    pub artifact_content: String,
    pub last_error: Option<InteractionError>,
}

impl InteractionSnapshot {
    /// Whether the chunk `index` of `turn` is already part of this snapshot
    pub fn includes_chunk(&self, turn: usize, index: u64) -> bool {
        let open_turn = self.turns.len().saturating_sub(1);
        let cursor = match self.phase {
            SendPhase::Idle => (self.turns.len(), 0),
            SendPhase::CreatingSession | SendPhase::Sending => (open_turn, 0),
            SendPhase::Streaming { chunks_received } => (open_turn, chunks_received),
        };
        (turn, index) <= cursor
    }
}

// ============================================================================
// Context
// ============================================================================

/// Default bound on a single message send
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Context for an interaction (immutable configuration)
#[derive(Debug, Clone)]
pub struct InteractionContext {
    /// Local id of the UI session, distinct from the backend session id
    pub ui_session_id: String,
    pub app_name: String,
    pub user_id: String,
    pub request_timeout: Duration,
}

impl InteractionContext {
    pub fn new(
        ui_session_id: impl Into<String>,
        app_name: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            ui_session_id: ui_session_id.into(),
            app_name: app_name.into(),
            user_id: user_id.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
