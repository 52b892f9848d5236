// =============================================================================
// Risk endpoints
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

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::error::AppError;
use crate::risk::constants::HardCaps;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/risk/validate", post(validate))
        .route("/risk/state", get(state))
        .route("/risk/decisions", get(decisions))
        .route("/risk/budgets", get(budgets))
        .route("/risk/limits", get(limits))
        .route("/risk/emergency/reset", post(emergency_reset))
        .route("/risk/daily/reset", post(daily_reset))
        .route("/risk/strategy/enable", post(enable_strategy))
}

#[derive(Deserialize)]
struct ValidateRequest {
    signal_id: u64,
    account_balance: Decimal,
    peak_balance: Decimal,
}

async fn validate(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<ValidateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let signal = state
        .signals
        .get(req.signal_id)
        .ok_or_else(|| AppError::NotFound(format!("Signal {} not found", req.signal_id)))?;

    let verdict = state
        .risk_validator
        .validate(&signal, req.account_balance, req.peak_balance);
    state.increment_version();
    Ok(Json(verdict))
}

async fn state(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.risk_monitor.account_state())
}

#[derive(Deserialize)]
struct LimitQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn decisions(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    Json(state.risk_validator.decisions(query.limit.unwrap_or(50)))
}

async fn budgets(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.risk_monitor.budgets())
}

async fn limits(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let settings = state.settings.settings();
    Json(json!({
        "hard_caps": HardCaps::snapshot(),
        "soft_limits": {
            "max_risk_per_trade_pct": settings.max_risk_per_trade_pct,
            "max_daily_loss_pct": settings.max_daily_loss_pct,
            "emergency_drawdown_pct": settings.emergency_drawdown_pct,
            "max_open_positions": settings.max_open_positions,
            "max_trades_per_day": settings.max_trades_per_day,
            "strategy_disable_threshold": settings.strategy_disable_threshold,
        },
    }))
}

async fn emergency_reset(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let was_active = state.risk_monitor.reset_emergency_shutdown();
    state.increment_version();
    Json(json!({
        "reset": was_active,
        "message": if was_active {
            "Emergency shutdown has been reset"
        } else {
            "No emergency shutdown was active"
        },
    }))
}

async fn daily_reset(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.risk_monitor.reset_daily();
    state.increment_version();
    Json(json!({"message": "Daily risk metrics have been reset"}))
}

#[derive(Deserialize)]
struct EnableStrategyRequest {
    strategy_name: String,
    symbol: String,
}

async fn enable_strategy(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<EnableStrategyRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !state
        .risk_monitor
        .enable_strategy(&req.strategy_name, &req.symbol)
    {
        return Err(AppError::NotFound(format!(
            "Strategy budget not found for {} on {}",
            req.strategy_name, req.symbol
        )));
    }
    state.increment_version();
    Ok(Json(json!({
        "message": format!("Strategy {} re-enabled for {}", req.strategy_name, req.symbol),
    })))
}
