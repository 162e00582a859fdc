use crate::config::ApiConfig;
use crate::event::EventGridEvent;
use crate::router::{Invocation, TransientRouter};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<TransientRouter>,
}

/// Per-event result of a delivery
#[derive(Debug, Serialize)]
pub struct EventResult {
    pub id: String,
    #[serde(flatten)]
    pub invocation: Invocation,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub results: Vec<EventResult>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Create the HTTP router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/events", post(receive_events))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "transient-router"
    }))
}

/// Event Grid delivery endpoint.
///
/// Every event is handled, one after another. Any failed invocation turns the
/// whole delivery into a 500 so the publisher redelivers it.
#[instrument(skip(state, events), fields(count = events.len()))]
async fn receive_events(
    State(state): State<AppState>,
    Json(events): Json<Vec<EventGridEvent>>,
) -> Response {
    if let Some(code) = events.iter().find_map(EventGridEvent::validation_code) {
        info!("Answering subscription validation handshake");
        return Json(serde_json::json!({ "validationResponse": code })).into_response();
    }

    let mut results = Vec::with_capacity(events.len());
    let mut failed = 0usize;

    for (id, result) in state.router.handle_batch(&events).await {
        match result {
            Ok(invocation) => results.push(EventResult { id, invocation }),
            Err(e) => {
                error!(event_id = %id, error = %e, "Event routing failed");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "Error in function".to_string(),
                code: "ROUTING_FAILED".to_string(),
            }),
        )
            .into_response();
    }

    Json(EventsResponse { results }).into_response()
}

/// Serve the HTTP trigger until `shutdown` is cancelled
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let router = create_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting event webhook server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("API server error")?;

    Ok(())
}
