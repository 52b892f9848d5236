// =============================================================================
// Coordination endpoints
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::error::AppError;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/coordination/cycle", post(execute_cycle))
        .route("/coordination/halt", post(halt))
        .route("/coordination/cycle/:cycle_id", get(cycle_status))
        .route("/coordination/cycles", get(recent_cycles))
        .route("/coordination/messages", get(messages))
        .route("/coordination/health", get(health))
        .route("/coordination/health/:agent/:action", post(health_action))
}

#[derive(Deserialize)]
struct CycleRequest {
    symbol: String,
    strategies: Vec<String>,
    account_balance: Decimal,
    peak_balance: Decimal,
}

async fn execute_cycle(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CycleRequest>,
) -> impl IntoResponse {
    let mode = state.settings.mode();
    let result = state.pipeline.execute_cycle(
        &req.symbol,
        &req.strategies,
        req.account_balance,
        req.peak_balance,
        mode,
    );
    state.increment_version();
    Json(result)
}

#[derive(Deserialize)]
struct HaltRequest {
    cycle_id: String,
    reason: String,
    #[serde(default)]
    agent: Option<String>,
}

async fn halt(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<HaltRequest>,
) -> Result<impl IntoResponse, AppError> {
    if state.shared_state.get(&req.cycle_id).is_none() {
        return Err(AppError::NotFound(format!("Cycle {} not found", req.cycle_id)));
    }

    let agent = req.agent.as_deref().unwrap_or("supervisor");
    state.pipeline.halt_cycle(&req.cycle_id, &req.reason, agent);
    state.increment_version();

    Ok(Json(json!({
        "cycle_id": req.cycle_id,
        "halted": true,
    })))
}

async fn cycle_status(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(cycle_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let cycle = state
        .pipeline
        .cycle_status(&cycle_id)
        .ok_or_else(|| AppError::NotFound(format!("Cycle {cycle_id} not found")))?;
    Ok(Json(cycle))
}

#[derive(Deserialize)]
struct CyclesQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn recent_cycles(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(query): Query<CyclesQuery>,
) -> impl IntoResponse {
    Json(state.shared_state.recent_cycles(query.limit.unwrap_or(20)))
}

#[derive(Deserialize)]
struct MessagesQuery {
    agent: String,
    #[serde(default)]
    include_processed: bool,
    #[serde(default)]
    limit: Option<usize>,
}

async fn messages(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(query): Query<MessagesQuery>,
) -> impl IntoResponse {
    Json(state.bus.messages_for(
        &query.agent,
        query.include_processed,
        query.limit.unwrap_or(50),
    ))
}

async fn health(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "agents": state.health.all(),
        "status": state.health.check_all(),
    }))
}

#[derive(Deserialize)]
struct HeartbeatBody {
    #[serde(default)]
    response_time_ms: Option<f64>,
}

async fn health_action(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path((agent, action)): Path<(String, String)>,
    body: Option<Json<HeartbeatBody>>,
) -> Result<impl IntoResponse, AppError> {
    match action.as_str() {
        "heartbeat" => {
            let response_ms = body.and_then(|b| b.response_time_ms).unwrap_or(0.0);
            state.health.heartbeat(&agent, response_ms);
        }
        "initialize" => state.health.initialize(&agent),
        "reset" => {
            if !state.health.reset(&agent) {
                return Err(AppError::NotFound(format!("Agent {agent} not found")));
            }
        }
        other => {
            return Err(AppError::Validation(format!(
                "Unknown health action: {other}"
            )))
        }
    }

    state.increment_version();
    Ok(Json(json!({
        "agent": agent,
        "action": action,
        "health": state.health.get(&agent),
    })))
}
