// =============================================================================
// Execution endpoints
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::error::AppError;
use crate::execution::orders::BrokerType;
use crate::types::Mode;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/execution/execute", post(execute))
        .route("/execution/cancel/:order_id", post(cancel))
        .route("/execution/orders/:order_id", get(order_status))
        .route("/execution/logs/:order_id", get(order_logs))
}

#[derive(Deserialize)]
struct ExecuteRequest {
    signal_id: u64,
    #[serde(default)]
    broker_type: Option<BrokerType>,
    #[serde(default)]
    force_mode: Option<Mode>,
}

async fn execute(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExecuteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let result = state
        .execution
        .execute_signal(
            req.signal_id,
            req.broker_type.unwrap_or_default(),
            req.force_mode,
        )
        .await?;
    state.increment_version();
    Ok(Json(result))
}

async fn cancel(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<u64>,
) -> Result<impl IntoResponse, AppError> {
    let result = state.execution.cancel_order(order_id).await?;
    state.increment_version();
    Ok(Json(result))
}

async fn order_status(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<u64>,
) -> Result<impl IntoResponse, AppError> {
    let order = state
        .execution
        .order_status(order_id)
        .ok_or_else(|| AppError::NotFound(format!("Order {order_id} not found")))?;
    Ok(Json(order))
}

async fn order_logs(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<u64>,
) -> impl IntoResponse {
    Json(state.execution.execution_logs(order_id))
}
