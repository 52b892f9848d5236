// =============================================================================
// Journal, analysis, and feedback endpoints
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::error::AppError;
use crate::types::TradeSource;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/journal/entries", get(entries))
        .route("/journal/entries/:entry_id", get(entry))
        .route("/journal/stats", get(stats))
        .route("/journal/analyze/:strategy/:symbol", get(analyze))
        .route(
            "/journal/underperformance/:strategy/:symbol",
            get(underperformance),
        )
        .route("/journal/feedback/:strategy/:symbol", post(feedback))
        .route("/journal/feedback/batch", post(feedback_batch))
        .route("/journal/feedback/decisions", get(feedback_decisions))
        .route("/journal/snapshots", get(snapshots))
        .route("/journal/snapshots/:strategy/:symbol", post(create_snapshot))
}

#[derive(Deserialize)]
struct LimitQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn entries(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    Json(state.journal.recent(query.limit.unwrap_or(100)))
}

async fn entry(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(entry_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let entry = state
        .journal
        .get(&entry_id)
        .ok_or_else(|| AppError::NotFound(format!("Journal entry {entry_id} not found")))?;
    Ok(Json(entry))
}

async fn stats(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let entries = state.journal.recent(usize::MAX);
    let total = entries.len();
    let winners = entries.iter().filter(|e| e.is_winner).count();
    let total_pnl: rust_decimal::Decimal = entries.iter().map(|e| e.pnl).sum();

    Json(json!({
        "total_entries": total,
        "winning_entries": winners,
        "win_rate": if total > 0 { winners as f64 / total as f64 * 100.0 } else { 0.0 },
        "total_pnl": total_pnl,
    }))
}

#[derive(Deserialize)]
struct AnalyzeQuery {
    #[serde(default)]
    lookback_days: Option<i64>,
}

async fn analyze(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path((strategy, symbol)): Path<(String, String)>,
    Query(query): Query<AnalyzeQuery>,
) -> impl IntoResponse {
    Json(
        state
            .analyzer
            .analyze_strategy(&strategy, &symbol, query.lookback_days.unwrap_or(30)),
    )
}

async fn underperformance(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path((strategy, symbol)): Path<(String, String)>,
) -> impl IntoResponse {
    Json(state.analyzer.detect_underperformance(&strategy, &symbol))
}

async fn feedback(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path((strategy, symbol)): Path<(String, String)>,
) -> impl IntoResponse {
    let outcome = state.feedback.run_cycle(&strategy, &symbol);
    state.increment_version();
    Json(outcome)
}

#[derive(Deserialize)]
struct BatchPair {
    strategy_name: String,
    symbol: String,
}

#[derive(Deserialize)]
struct BatchRequest {
    pairs: Vec<BatchPair>,
}

async fn feedback_batch(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchRequest>,
) -> impl IntoResponse {
    let pairs: Vec<(String, String)> = req
        .pairs
        .into_iter()
        .map(|p| (p.strategy_name, p.symbol))
        .collect();
    let result = state.feedback.run_batch(&pairs);
    state.increment_version();
    Json(result)
}

#[derive(Deserialize)]
struct DecisionsQuery {
    #[serde(default)]
    strategy_name: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn feedback_decisions(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(query): Query<DecisionsQuery>,
) -> impl IntoResponse {
    Json(state.feedback.decisions(
        query.strategy_name.as_deref(),
        query.symbol.as_deref(),
        query.limit.unwrap_or(50),
    ))
}

async fn snapshots(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    Json(state.analyzer.snapshots(query.limit.unwrap_or(50)))
}

#[derive(Deserialize)]
struct SnapshotRequest {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    period_start: Option<DateTime<Utc>>,
    #[serde(default)]
    period_end: Option<DateTime<Utc>>,
}

async fn create_snapshot(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path((strategy, symbol)): Path<(String, String)>,
    Json(req): Json<SnapshotRequest>,
) -> Result<impl IntoResponse, AppError> {
    let source = match req.source.as_deref() {
        Some(raw) => TradeSource::parse(raw)
            .ok_or_else(|| AppError::Validation(format!("Invalid trade source: {raw}")))?,
        None => TradeSource::Live,
    };
    let period_end = req.period_end.unwrap_or_else(Utc::now);
    let period_start = req
        .period_start
        .unwrap_or_else(|| period_end - Duration::days(30));

    let snapshot = state
        .analyzer
        .create_snapshot(&strategy, &symbol, source, period_start, period_end);
    state.increment_version();
    Ok(Json(snapshot))
}
