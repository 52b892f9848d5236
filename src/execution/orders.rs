// =============================================================================
// Execution orders — lifecycle records and the append-only event log
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::broker::{OrderSide, OrderType};
use crate::error::{AppError, AppResult};

/// Venue identifier for routing an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerType {
    Simulation,
    Paper,
    Mt5,
    Oanda,
}

impl Default for BrokerType {
    fn default() -> Self {
        Self::Simulation
    }
}

impl std::fmt::Display for BrokerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simulation => write!(f, "simulation"),
            Self::Paper => write!(f, "paper"),
            Self::Mt5 => write!(f, "mt5"),
            Self::Oanda => write!(f, "oanda"),
        }
    }
}

/// Order lifecycle status. Transitions are monotonic along the lifecycle DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Submitted,
    Accepted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
    Failed,
}

impl OrderStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Expired | Self::Failed
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Accepted => "accepted",
            Self::PartiallyFilled => "partially_filled",
            Self::Filled => "filled",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Execution order with full lifecycle tracking.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOrder {
    pub id: u64,
    pub client_order_id: String,
    pub broker_order_id: Option<String>,
    pub broker_type: BrokerType,
    pub symbol: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub average_fill_price: Option<Decimal>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
    pub signal_id: Option<u64>,
    pub strategy_name: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Audit row for a single execution event.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionLog {
    pub id: u64,
    pub order_id: u64,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub old_status: Option<OrderStatus>,
    pub new_status: Option<OrderStatus>,
    pub event_time: DateTime<Utc>,
}

/// Thread-safe store of execution orders and their audit logs.
pub struct OrderStore {
    orders: RwLock<Vec<ExecutionOrder>>,
    logs: RwLock<Vec<ExecutionLog>>,
    next_order_id: AtomicU64,
    next_log_id: AtomicU64,
}

impl OrderStore {
    pub fn new() -> Self {
        Self {
            orders: RwLock::new(Vec::new()),
            logs: RwLock::new(Vec::new()),
            next_order_id: AtomicU64::new(1),
            next_log_id: AtomicU64::new(1),
        }
    }

    /// Create a PENDING order record. Fails on a duplicate client order id.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &self,
        client_order_id: String,
        broker_type: BrokerType,
        symbol: String,
        order_type: OrderType,
        side: OrderSide,
        quantity: Decimal,
        price: Option<Decimal>,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        signal_id: Option<u64>,
        strategy_name: String,
    ) -> AppResult<ExecutionOrder> {
        let mut orders = self.orders.write();
        if orders.iter().any(|o| o.client_order_id == client_order_id) {
            return Err(AppError::Conflict(format!(
                "Duplicate client_order_id: {client_order_id}"
            )));
        }

        let now = Utc::now();
        let order = ExecutionOrder {
            id: self.next_order_id.fetch_add(1, Ordering::SeqCst),
            client_order_id,
            broker_order_id: None,
            broker_type,
            symbol,
            order_type,
            side,
            quantity,
            price,
            stop_price: None,
            stop_loss,
            take_profit,
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            average_fill_price: None,
            submitted_at: None,
            filled_at: None,
            signal_id,
            strategy_name,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        orders.push(order.clone());
        Ok(order)
    }

    pub fn get(&self, id: u64) -> Option<ExecutionOrder> {
        self.orders.read().iter().find(|o| o.id == id).cloned()
    }

    /// Apply a mutation to an order. Returns the updated order, or `None`
    /// if the id is unknown.
    pub fn update<F>(&self, id: u64, mutate: F) -> Option<ExecutionOrder>
    where
        F: FnOnce(&mut ExecutionOrder),
    {
        let mut orders = self.orders.write();
        let order = orders.iter_mut().find(|o| o.id == id)?;
        mutate(order);
        order.updated_at = Utc::now();
        Some(order.clone())
    }

    /// Append an audit row for `order_id`.
    pub fn log_event(
        &self,
        order_id: u64,
        event_type: &str,
        event_data: serde_json::Value,
        old_status: Option<OrderStatus>,
        new_status: Option<OrderStatus>,
    ) {
        let log = ExecutionLog {
            id: self.next_log_id.fetch_add(1, Ordering::SeqCst),
            order_id,
            event_type: event_type.to_string(),
            event_data,
            old_status,
            new_status,
            event_time: Utc::now(),
        };
        self.logs.write().push(log);
    }

    /// Audit rows for one order in event order.
    pub fn logs_for(&self, order_id: u64) -> Vec<ExecutionLog> {
        self.logs
            .read()
            .iter()
            .filter(|l| l.order_id == order_id)
            .cloned()
            .collect()
    }

    /// Most recent orders, newest first.
    pub fn recent(&self, limit: usize) -> Vec<ExecutionOrder> {
        let orders = self.orders.read();
        orders.iter().rev().take(limit).cloned().collect()
    }
}

impl Default for OrderStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn create_order(store: &OrderStore, client_id: &str) -> AppResult<ExecutionOrder> {
        store.create(
            client_id.to_string(),
            BrokerType::Simulation,
            "EURUSD".to_string(),
            OrderType::Limit,
            OrderSide::Buy,
            dec!(0.10),
            Some(dec!(1.1000)),
            Some(dec!(1.0950)),
            Some(dec!(1.1150)),
            Some(1),
            "NBB".to_string(),
        )
    }

    #[test]
    fn create_starts_pending_with_zero_fill() {
        let store = OrderStore::new();
        let order = create_order(&store, "FX-1-abc").unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.filled_quantity, Decimal::ZERO);
    }

    #[test]
    fn duplicate_client_order_id_conflicts() {
        let store = OrderStore::new();
        create_order(&store, "FX-1-abc").unwrap();
        let err = create_order(&store, "FX-1-abc").unwrap_err();
        assert_eq!(err.kind(), "ConflictError");
    }

    #[test]
    fn update_and_log_roundtrip() {
        let store = OrderStore::new();
        let order = create_order(&store, "FX-1-abc").unwrap();

        let updated = store
            .update(order.id, |o| {
                o.status = OrderStatus::Filled;
                o.filled_quantity = o.quantity;
                o.average_fill_price = Some(dec!(1.1001));
            })
            .unwrap();
        assert_eq!(updated.status, OrderStatus::Filled);

        store.log_event(
            order.id,
            "FILLED",
            serde_json::json!({"details": "filled"}),
            Some(OrderStatus::Submitted),
            Some(OrderStatus::Filled),
        );
        let logs = store.logs_for(order.id);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].event_type, "FILLED");
    }

    #[test]
    fn terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Submitted.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
    }
}
