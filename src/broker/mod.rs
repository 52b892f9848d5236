// =============================================================================
// Broker adapter contract — the uniform capability set every venue exposes
// =============================================================================
//
// CRITICAL: adapters are only ever called by the execution engine. Every
// implementation must validate order shape before side effects and return the
// standardized result envelope.
// =============================================================================

pub mod simulated;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

/// Minimal price increment convention for the FX-flavored instruments this
/// engine trades.
pub const PIP_SIZE: Decimal = dec!(0.0001);

/// Units per lot (standard FX lot).
pub const CONTRACT_MULTIPLIER: Decimal = dec!(100000);

/// Margin requirement as a fraction of notional (100:1 leverage).
pub const MARGIN_RATE: Decimal = dec!(0.01);

/// Order side on the venue wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Supported order types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Market => write!(f, "MARKET"),
            Self::Limit => write!(f, "LIMIT"),
            Self::Stop => write!(f, "STOP"),
            Self::StopLimit => write!(f, "STOP_LIMIT"),
        }
    }
}

/// Standard order request format for all brokers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub client_order_id: Option<String>,
}

/// Result envelope returned by a broker after any order operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrderResult {
    pub success: bool,
    pub broker_order_id: Option<String>,
    pub filled_price: Option<Decimal>,
    pub filled_quantity: Option<Decimal>,
    pub commission: Option<Decimal>,
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl BrokerOrderResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            broker_order_id: None,
            filled_price: None,
            filled_quantity: None,
            commission: None,
            error_message: Some(message.into()),
            raw: None,
            timestamp: Utc::now(),
        }
    }

    pub fn accepted(broker_order_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            broker_order_id: Some(broker_order_id.into()),
            filled_price: None,
            filled_quantity: None,
            commission: None,
            error_message: Some(message.into()),
            raw: None,
            timestamp: Utc::now(),
        }
    }
}

/// Current position information from a broker.
#[derive(Debug, Clone, Serialize)]
pub struct BrokerPositionInfo {
    pub symbol: String,
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub current_price: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
}

/// Account information from a broker.
#[derive(Debug, Clone, Serialize)]
pub struct BrokerAccountInfo {
    pub balance: Decimal,
    pub equity: Decimal,
    pub margin_used: Decimal,
    pub margin_available: Decimal,
    pub currency: String,
}

/// Status of an order as known to the venue.
#[derive(Debug, Clone, Serialize)]
pub struct BrokerOrderStatus {
    pub broker_order_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Validate order shape before any side effect. Shared by all adapters.
pub fn validate_order(order: &OrderRequest) -> Result<(), String> {
    if order.symbol.is_empty() {
        return Err("Symbol is required".to_string());
    }
    if order.quantity <= Decimal::ZERO {
        return Err("Quantity must be positive".to_string());
    }
    if matches!(order.order_type, OrderType::Limit | OrderType::StopLimit)
        && order.limit_price.is_none()
    {
        return Err(format!("{} order requires limit_price", order.order_type));
    }
    if matches!(order.order_type, OrderType::Stop | OrderType::StopLimit)
        && order.stop_price.is_none()
    {
        return Err(format!("{} order requires stop_price", order.order_type));
    }
    Ok(())
}

/// The capability set every venue (simulated or live) must satisfy.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Human-readable broker identifier.
    fn broker_name(&self) -> &str;

    /// Whether this venue trades real money.
    fn is_paper(&self) -> bool;

    fn is_connected(&self) -> bool;

    async fn connect(&self) -> bool;

    async fn disconnect(&self);

    async fn submit_order(&self, order: &OrderRequest) -> BrokerOrderResult;

    async fn cancel_order(&self, broker_order_id: &str) -> BrokerOrderResult;

    async fn get_order_status(&self, broker_order_id: &str) -> Option<BrokerOrderStatus>;

    async fn get_positions(&self) -> Vec<BrokerPositionInfo>;

    async fn get_position(&self, symbol: &str) -> Option<BrokerPositionInfo>;

    async fn get_account_info(&self) -> AppResult<BrokerAccountInfo>;

    async fn get_current_price(&self, symbol: &str) -> Option<Decimal>;

    /// Whether the venue connection is working.
    async fn health_check(&self) -> bool {
        self.get_account_info().await.is_ok()
    }
}
