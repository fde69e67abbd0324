//! Pitchdesk - interaction layer for the movie pitch agent
//!
//! Hosts UI sessions that talk to an ADK agent backend: lazy session
//! creation, streamed replies, and artifact browsing.

mod api;
mod backend;
mod config;
mod runtime;
mod state_machine;

use api::{create_router, AppState};
use axum::http::HeaderValue;
use backend::{AgentBackend, HttpBackend, LoggingBackend};
use config::{AllowedOrigins, Config, LogFormat};
use runtime::{RuntimeManager, RuntimeSettings};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const STARTUP_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    init_logging(config.log_format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = config.environment.as_str(),
        bind = %config.bind_addr(),
        backend_url = %config.backend_url,
        app_name = %config.app_name,
        request_timeout_secs = config.request_timeout.as_secs(),
        session_idle_timeout_secs = config.session_idle_timeout.as_secs(),
        "Starting pitchdesk"
    );

    let http = HttpBackend::new(&config.backend_url, CONNECT_TIMEOUT)?;
    tracing::debug!(base_url = %http.base_url(), "Agent backend client ready");
    let backend: Arc<dyn AgentBackend> = Arc::new(LoggingBackend::new(Arc::new(http)));
    probe_backend(backend.as_ref()).await;

    let runtime = RuntimeManager::new(
        backend,
        RuntimeSettings {
            app_name: config.app_name.clone(),
            user_id: config.user_id.clone(),
            request_timeout: config.request_timeout,
            session_idle_timeout: config.session_idle_timeout,
        },
    );
    let state = AppState::new(runtime, config.environment, config.backend_url.clone());
    state.runtime.spawn_idle_sweeper();

    let app = create_router(state)
        .layer(cors_layer(&config.allowed_origins))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    tracing::info!("Pitchdesk listening on {}", config.bind_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "pitchdesk=info,tower_http=debug".into());

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_span_list(false),
            )
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init(),
    }
}

/// Check the backend once at startup; an unreachable backend is not fatal
async fn probe_backend(backend: &dyn AgentBackend) {
    match tokio::time::timeout(STARTUP_PROBE_TIMEOUT, backend.health()).await {
        Ok(Ok(health)) if health.is_healthy() => tracing::info!(
            status = %health.status,
            environment = ?health.environment,
            version = ?health.version,
            agents = ?health.agents,
            "Agent backend is healthy"
        ),
        Ok(Ok(health)) => tracing::warn!(status = %health.status, "Agent backend reports unhealthy"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Agent backend unreachable, sends will fail until it is up"),
        Err(_) => tracing::warn!(
            timeout_secs = STARTUP_PROBE_TIMEOUT.as_secs(),
            "Agent backend health check timed out"
        ),
    }
}

fn cors_layer(origins: &AllowedOrigins) -> CorsLayer {
    let allow_origin = match origins {
        AllowedOrigins::Any => AllowOrigin::from(Any),
        AllowedOrigins::List(list) => AllowOrigin::list(list.iter().filter_map(|origin| {
            match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            }
        })),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
