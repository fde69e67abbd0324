//! API request and response types

use crate::state_machine::InteractionSnapshot;
use serde::{Deserialize, Serialize};

/// Request to send a chat message
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

/// Request to show one artifact
#[derive(Debug, Deserialize)]
pub struct SelectArtifactRequest {
    pub filename: String,
}

/// Response for a newly created UI session
#[derive(Debug, Serialize)]
pub struct SessionCreatedResponse {
    pub id: String,
    pub state: InteractionSnapshot,
}

/// Response for actions whose outcome arrives over the stream
#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub queued: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub environment: &'static str,
    pub version: &'static str,
    pub backend_app: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
