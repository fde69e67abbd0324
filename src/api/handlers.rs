//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    ErrorResponse, HealthResponse, QueuedResponse, SelectArtifactRequest, SendMessageRequest,
    SessionCreatedResponse,
};
use super::AppState;
use crate::backend::{BackendError, BackendHealth};
use crate::runtime::DispatchError;
use crate::state_machine::{Event, InteractionSnapshot, TransitionError};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Service probes
        .route("/health", get(health))
        .route("/info", get(info))
        .route("/api/backend/health", get(backend_health))
        .route("/api/backend/info", get(backend_info))
        // UI sessions
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(delete_session))
        .route("/api/sessions/:id/stream", get(stream_session))
        // User actions
        .route("/api/sessions/:id/messages", post(send_message))
        .route("/api/sessions/:id/artifacts/refresh", post(refresh_artifacts))
        .route("/api/sessions/:id/artifacts/select", post(select_artifact))
        .with_state(state)
}

// ============================================================
// Service Probes
// ============================================================

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        environment: state.environment.as_str(),
        version: env!("CARGO_PKG_VERSION"),
        backend_app: state.runtime.settings().app_name.clone(),
    })
}

async fn info(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Interaction layer for the movie pitch agent",
        "environment": state.environment.as_str(),
        "ui_sessions": state.runtime.session_count().await,
        "backend": {
            "url": state.backend_url,
            "app_name": state.runtime.settings().app_name,
            "user_id": state.runtime.settings().user_id,
        },
        "endpoints": {
            "health": "GET /health",
            "backend_health": "GET /api/backend/health",
            "backend_info": "GET /api/backend/info",
            "create_session": "POST /api/sessions",
            "session": "GET /api/sessions/:id",
            "delete_session": "DELETE /api/sessions/:id",
            "stream": "GET /api/sessions/:id/stream",
            "send_message": "POST /api/sessions/:id/messages",
            "refresh_artifacts": "POST /api/sessions/:id/artifacts/refresh",
            "select_artifact": "POST /api/sessions/:id/artifacts/select",
        }
    }))
}

async fn backend_health(State(state): State<AppState>) -> Result<Json<BackendHealth>, AppError> {
    let health = state.runtime.backend().health().await?;
    Ok(Json(health))
}

async fn backend_info(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let info = state.runtime.backend().info().await?;
    Ok(Json(info))
}

// ============================================================
// UI Sessions
// ============================================================

async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionCreatedResponse>) {
    let (id, snapshot) = state.runtime.create().await;
    (
        StatusCode::CREATED,
        Json(SessionCreatedResponse {
            id,
            state: snapshot,
        }),
    )
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InteractionSnapshot>, AppError> {
    let snapshot = state.runtime.snapshot(&id).await?;
    Ok(Json(snapshot))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.runtime.remove(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stream_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let subscription = state.runtime.subscribe(&id).await?;
    Ok(sse_stream(subscription))
}

// ============================================================
// User Actions
// ============================================================

async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<QueuedResponse>, AppError> {
    state
        .runtime
        .send_event(&id, Event::user_message(req.text))
        .await?;
    Ok(Json(QueuedResponse { queued: true }))
}

async fn refresh_artifacts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<QueuedResponse>, AppError> {
    state
        .runtime
        .send_event(&id, Event::RefreshArtifacts)
        .await?;
    Ok(Json(QueuedResponse { queued: true }))
}

async fn select_artifact(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SelectArtifactRequest>,
) -> Result<Json<QueuedResponse>, AppError> {
    state
        .runtime
        .send_event(
            &id,
            Event::SelectArtifact {
                filename: req.filename,
            },
        )
        .await?;
    Ok(Json(QueuedResponse { queued: true }))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    BadGateway(String),
    GatewayTimeout(String),
    Internal(String),
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        if err.is_timeout() {
            AppError::GatewayTimeout(err.to_string())
        } else {
            AppError::BadGateway(err.to_string())
        }
    }
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        let message = err.to_string();
        match err {
            DispatchError::NotFound(_) => AppError::NotFound(message),
            DispatchError::Rejected(
                TransitionError::EmptyMessage | TransitionError::EmptyFilename,
            ) => AppError::BadRequest(message),
            DispatchError::Rejected(
                TransitionError::Busy
                | TransitionError::NoSession
                | TransitionError::InvalidTransition(_),
            ) => AppError::Conflict(message),
            DispatchError::Closed => AppError::Internal(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::GatewayTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
