// =============================================================================
// Settings, mode, and execution-mode endpoints
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use crate::api::auth::{verify_env_secret, AuthBearer};
use crate::app_state::AppState;
use crate::error::AppError;
use crate::risk::constants::HardCaps;
use crate::settings::execution_mode::ModeChangeRequest;
use crate::settings::SettingsUpdate;
use crate::types::{ExecutionMode, Mode};

/// Environment variable holding the LIVE-trading password.
const LIVE_PASSWORD_ENV: &str = "MERIDIAN_LIVE_PASSWORD";

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/settings", get(get_settings).post(update_settings))
        .route("/settings/mode", get(get_mode).post(set_mode))
        .route("/settings/audit", get(settings_audit))
        .route("/settings/constants", get(constants))
        .route("/execution-mode", get(get_execution_mode).post(change_execution_mode))
        .route("/execution-mode/audit", get(execution_mode_audit))
        .route("/execution-mode/simulation", get(simulation_stats))
        .route("/execution-mode/simulation/reset", post(simulation_reset))
        .route("/execution-mode/simulation/settings", post(simulation_settings))
        .route("/execution-mode/simulation/positions", get(simulation_positions))
}

async fn get_settings(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.settings.settings())
}

#[derive(Deserialize)]
struct UpdateSettingsRequest {
    #[serde(flatten)]
    updates: SettingsUpdate,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

async fn update_settings(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateSettingsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let updated = state
        .settings
        .update(&req.updates, req.user.as_deref(), req.reason.as_deref())?;
    state.increment_version();
    Ok(Json(updated))
}

async fn get_mode(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({"mode": state.settings.mode()}))
}

#[derive(Deserialize)]
struct SetModeRequest {
    mode: Mode,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

async fn set_mode(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetModeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let updated =
        state
            .settings
            .set_mode(req.mode, req.user.as_deref(), req.reason.as_deref())?;
    state.increment_version();
    Ok(Json(json!({"mode": updated.mode, "version": updated.version})))
}

#[derive(Deserialize)]
struct AuditQuery {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    change_type: Option<String>,
}

async fn settings_audit(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> impl IntoResponse {
    Json(
        state
            .settings
            .audit_trail(query.limit.unwrap_or(100), query.change_type.as_deref()),
    )
}

async fn constants(_auth: AuthBearer) -> impl IntoResponse {
    Json(HardCaps::snapshot())
}

async fn get_execution_mode(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(json!({"execution_mode": state.execution_mode.current_mode()}))
}

#[derive(Deserialize)]
struct ChangeExecutionModeRequest {
    execution_mode: ExecutionMode,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    confirmed: bool,
}

async fn change_execution_mode(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChangeExecutionModeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let password_verified = req
        .password
        .as_deref()
        .map(|p| verify_env_secret(LIVE_PASSWORD_ENV, p))
        .unwrap_or(false);

    let new_mode = state.execution_mode.change_mode(
        req.user.as_deref().unwrap_or("operator"),
        req.execution_mode,
        ModeChangeRequest {
            reason: req.reason,
            ip_address: None,
            user_agent: None,
            password_verified,
            confirmed: req.confirmed,
        },
    )?;

    state.increment_version();
    Ok(Json(json!({"execution_mode": new_mode})))
}

async fn execution_mode_audit(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> impl IntoResponse {
    Json(state.execution_mode.audit_history(query.limit.unwrap_or(50)))
}

async fn simulation_stats(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let account = state.simulation.account_snapshot();
    let positions = state.simulation.positions_snapshot();
    let unrealized: Decimal = positions.iter().map(|p| p.unrealized_pnl).sum();

    Json(json!({
        "account": account,
        "win_rate": state.simulation.account_snapshot().win_rate(),
        "open_positions": positions.len(),
        "unrealized_pnl": unrealized,
    }))
}

async fn simulation_reset(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let account = state.simulation.reset_account();
    state.increment_version();
    Json(account)
}

#[derive(Deserialize)]
struct SimulationSettingsRequest {
    #[serde(default)]
    initial_balance: Option<Decimal>,
    #[serde(default)]
    slippage_pips: Option<Decimal>,
    #[serde(default)]
    commission_per_lot: Option<Decimal>,
    #[serde(default)]
    latency_ms: Option<u64>,
    #[serde(default)]
    fill_probability: Option<f64>,
}

async fn simulation_settings(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SimulationSettingsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let account = state.simulation.update_settings(
        req.initial_balance,
        req.slippage_pips,
        req.commission_per_lot,
        req.latency_ms,
        req.fill_probability,
    )?;
    state.increment_version();
    Ok(Json(account))
}

async fn simulation_positions(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.simulation.positions_snapshot())
}
