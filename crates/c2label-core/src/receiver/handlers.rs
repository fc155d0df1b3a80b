//! HTTP handlers for the CloudEvents receiver

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tracing::{error, warn, Instrument};

use crate::responder::Responder;

use super::cloudevent;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Handles every accepted event
    pub responder: Arc<Responder>,
    /// Prometheus renderer, when metrics are enabled
    pub metrics: Option<PrometheusHandle>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    /// Always `ok` while serving
    pub status: String,
    /// Crate version
    pub version: String,
}

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Event receipt response
#[derive(Debug, Serialize)]
pub struct ReceiveResponse {
    /// CloudEvent id
    pub id: String,
    /// What the responder did with the event
    pub outcome: &'static str,
}

/// Receive one CloudEvent
///
/// Any valid CloudEvent is acknowledged with `202`, whatever happened to it;
/// only requests that are not CloudEvents are rejected.
pub async fn receive_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<ReceiveResponse>), (StatusCode, String)> {
    let event = cloudevent::from_http(&headers, body).map_err(|e| {
        warn!(error = %e, "Rejecting request that is not a CloudEvent");
        (StatusCode::BAD_REQUEST, e.to_string())
    })?;

    // Run detached so a client hanging up does not cancel an in-flight patch.
    let responder = Arc::clone(&state.responder);
    let id = event.id.clone();
    let outcome = tokio::spawn(async move { responder.handle(&event).await }.in_current_span())
        .await
        .map_err(|e| {
            error!(event_id = %id, error = %e, "Event handler panicked");
            (StatusCode::INTERNAL_SERVER_ERROR, "event handler failed".to_string())
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ReceiveResponse {
            id,
            outcome: outcome.as_str(),
        }),
    ))
}

/// Prometheus scrape endpoint
pub async fn metrics(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .ok_or(StatusCode::NOT_FOUND)
}
