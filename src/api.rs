//! HTTP API for UI clients
//!
//! Each UI session is an independent interaction with the agent backend.

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;

use crate::config::Environment;
use crate::runtime::RuntimeManager;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<RuntimeManager>,
    pub environment: Environment,
    pub backend_url: String,
}

impl AppState {
    pub fn new(runtime: RuntimeManager, environment: Environment, backend_url: impl Into<String>) -> Self {
        Self {
            runtime: Arc::new(runtime),
            environment,
            backend_url: backend_url.into(),
        }
    }
}
