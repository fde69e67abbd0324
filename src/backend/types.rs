//! Wire types for the agent backend API

use serde::{Deserialize, Serialize};

/// Client-held reference to a backend session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub session_id: String,
    pub app_name: String,
    pub user_id: String,
}

/// A named output file produced by the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub filename: String,
}

impl ArtifactDescriptor {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
        }
    }
}

/// Body of a session creation response
#[derive(Debug, Deserialize)]
pub(crate) struct CreateSessionResponse {
    #[serde(default, alias = "session_id")]
    pub id: Option<String>,
}

/// Body of a message submission
#[derive(Debug, Serialize)]
pub(crate) struct SendMessageRequest<'a> {
    pub message: OutgoingMessage<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct OutgoingMessage<'a> {
    pub role: &'static str,
    pub parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct TextPart<'a> {
    pub text: &'a str,
}

impl<'a> SendMessageRequest<'a> {
    pub fn user_text(text: &'a str) -> Self {
        Self {
            message: OutgoingMessage {
                role: "user",
                parts: vec![TextPart { text }],
            },
        }
    }
}

/// Artifact collection as returned by the backend.
///
/// The movie pitch server wraps descriptors in an object; stock ADK servers
/// return a bare array of filenames.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ArtifactListing {
    Wrapped { artifacts: Vec<ArtifactDescriptor> },
    Names(Vec<String>),
}

impl ArtifactListing {
    pub fn into_descriptors(self) -> Vec<ArtifactDescriptor> {
        match self {
            ArtifactListing::Wrapped { artifacts } => artifacts,
            ArtifactListing::Names(names) => names.into_iter().map(ArtifactDescriptor::new).collect(),
        }
    }
}

/// Backend `/health` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub status: String,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub agents: Vec<String>,
}

impl BackendHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}
