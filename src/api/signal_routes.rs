// =============================================================================
// Signal ingestion endpoints — the hand-off from external strategy producers
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

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::error::AppError;
use crate::signals::NewSignal;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/signals", post(create_signal).get(recent_signals))
}

async fn create_signal(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewSignal>,
) -> Result<impl IntoResponse, AppError> {
    if new.symbol.trim().is_empty() {
        return Err(AppError::Validation("Symbol is required".to_string()));
    }
    if new.strategy_name.trim().is_empty() {
        return Err(AppError::Validation("Strategy name is required".to_string()));
    }
    if (new.entry_price - new.stop_loss).abs() == Decimal::ZERO {
        return Err(AppError::Validation(
            "Entry and stop loss must differ".to_string(),
        ));
    }
    if new.risk_percent <= Decimal::ZERO {
        return Err(AppError::Validation("Risk percent must be positive".to_string()));
    }

    let signal = state.signals.insert(new);
    state.increment_version();
    Ok((axum::http::StatusCode::CREATED, Json(signal)))
}

#[derive(Deserialize)]
struct SignalsQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn recent_signals(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(query): Query<SignalsQuery>,
) -> impl IntoResponse {
    Json(state.signals.recent(query.limit.unwrap_or(50)))
}
