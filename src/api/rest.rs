// =============================================================================
// REST API — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Health probes are public; everything
// else requires a valid Bearer token checked via the `AuthBearer` extractor.
//
// CORS is configured permissively for development; tighten allowed origins
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::api::auth::AuthBearer;
use crate::api::{
    coordination_routes, execution_routes, journal_routes, risk_routes, settings_routes,
    signal_routes,
};
use crate::app_state::AppState;
use crate::broker::BrokerAdapter;

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        // ── Public health probes ────────────────────────────────────
        .route("/health", get(health))
        .route("/health/live", get(health_live))
        .route("/health/ready", get(health_ready))
        // ── Authenticated ───────────────────────────────────────────
        .route("/health/detailed", get(health_detailed))
        .merge(signal_routes::router())
        .merge(risk_routes::router())
        .merge(execution_routes::router())
        .merge(coordination_routes::router())
        .merge(journal_routes::router())
        .merge(settings_routes::router());

    Router::new()
        .nest("/api/v1", api)
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

async fn health_live() -> impl IntoResponse {
    Json(serde_json::json!({"status": "alive"}))
}

async fn health_ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // Ready when the default execution venue answers.
    if state.simulation.health_check().await {
        (
            StatusCode::OK,
            Json(serde_json::json!({"status": "ready"})),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "not_ready", "dependency": "simulated broker"})),
        )
    }
}

async fn health_detailed(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let settings = state.settings.settings();
    let risk_state = state.risk_monitor.account_state();

    Json(serde_json::json!({
        "status": "ok",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "state_version": state.current_state_version(),
        "mode": settings.mode,
        "execution_mode": settings.execution_mode,
        "emergency_shutdown_active": risk_state.emergency_shutdown_active,
        "open_positions": state.positions.open_count(),
        "journal_entries": state.journal.len(),
        "agents": state.health.check_all(),
        "server_time": chrono::Utc::now().timestamp_millis(),
    }))
}
