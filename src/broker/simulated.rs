// =============================================================================
// Simulated broker — deterministic, stateful venue used as the default
// execution target
// =============================================================================
//
// Simulates realistic market conditions: configurable slippage, latency with
// ±20% jitter, fill probability, margin at 100:1 leverage, and SL/TP
// self-closes on every price update. Given the same price updates and
// submissions, fills reproduce exactly when the random source is seeded.
//
// Account state is serialized behind a single mutex; the latency sleep runs
// before the lock is taken so no lock is ever held across an await point.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::{
    validate_order, BrokerAccountInfo, BrokerAdapter, BrokerOrderResult, BrokerOrderStatus,
    BrokerPositionInfo, OrderRequest, OrderSide, OrderType, CONTRACT_MULTIPLIER, MARGIN_RATE,
    PIP_SIZE,
};
use crate::error::{AppError, AppResult};

/// Half-pip price offset applied per side when prices are set from a mid.
const HALF_SPREAD_PER_PIP: Decimal = dec!(0.00005);

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// Virtual account state. One per user.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationAccount {
    pub user: String,
    pub balance: Decimal,
    pub equity: Decimal,
    pub margin_used: Decimal,
    pub margin_available: Decimal,
    pub initial_balance: Decimal,
    pub currency: String,
    pub slippage_pips: Decimal,
    pub commission_per_lot: Decimal,
    pub latency_ms: u64,
    pub fill_probability: f64,
    pub total_trades: u64,
    pub winning_trades: u64,
    pub total_pnl: Decimal,
    pub last_reset_at: Option<DateTime<Utc>>,
}

impl SimulationAccount {
    fn new(user: &str) -> Self {
        Self {
            user: user.to_string(),
            balance: dec!(10000),
            equity: dec!(10000),
            margin_used: Decimal::ZERO,
            margin_available: dec!(10000),
            initial_balance: dec!(10000),
            currency: "USD".to_string(),
            slippage_pips: dec!(0.5),
            commission_per_lot: dec!(7.0),
            latency_ms: 100,
            fill_probability: 0.98,
            total_trades: 0,
            winning_trades: 0,
            total_pnl: Decimal::ZERO,
            last_reset_at: None,
        }
    }

    /// Restore the initial balance and wipe trading statistics.
    fn reset(&mut self) {
        self.balance = self.initial_balance;
        self.equity = self.initial_balance;
        self.margin_used = Decimal::ZERO;
        self.margin_available = self.initial_balance;
        self.total_trades = 0;
        self.winning_trades = 0;
        self.total_pnl = Decimal::ZERO;
        self.last_reset_at = Some(Utc::now());
    }

    /// Recompute equity from the current total unrealized PnL.
    fn update_equity(&mut self, unrealized_pnl: Decimal) {
        self.equity = self.balance + unrealized_pnl;
        self.margin_available = self.equity - self.margin_used;
    }

    /// Book a completed trade's realized PnL.
    fn record_trade(&mut self, pnl: Decimal, is_winner: bool) {
        self.balance += pnl;
        self.total_pnl += pnl;
        self.total_trades += 1;
        if is_winner {
            self.winning_trades += 1;
        }
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.winning_trades as f64 / self.total_trades as f64 * 100.0
    }
}

// ---------------------------------------------------------------------------
// Positions & pending orders
// ---------------------------------------------------------------------------

/// Open position inside the simulated venue.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationPosition {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub unrealized_pnl: Decimal,
    pub margin_required: Decimal,
    pub order_id: String,
    pub opened_at: DateTime<Utc>,
}

impl SimulationPosition {
    fn update_price(&mut self, price: Decimal) {
        self.current_price = price;
        self.unrealized_pnl = match self.side {
            OrderSide::Buy => (price - self.entry_price) * self.quantity * CONTRACT_MULTIPLIER,
            OrderSide::Sell => (self.entry_price - price) * self.quantity * CONTRACT_MULTIPLIER,
        };
    }

    fn stop_loss_hit(&self) -> bool {
        match (self.stop_loss, self.side) {
            (Some(sl), OrderSide::Buy) => self.current_price <= sl,
            (Some(sl), OrderSide::Sell) => self.current_price >= sl,
            (None, _) => false,
        }
    }

    fn take_profit_hit(&self) -> bool {
        match (self.take_profit, self.side) {
            (Some(tp), OrderSide::Buy) => self.current_price >= tp,
            (Some(tp), OrderSide::Sell) => self.current_price <= tp,
            (None, _) => false,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingOrder {
    order: OrderRequest,
    status: &'static str,
    created_at: DateTime<Utc>,
}

struct Inner {
    account: SimulationAccount,
    positions: Vec<SimulationPosition>,
    /// symbol -> (bid, ask)
    prices: HashMap<String, (Decimal, Decimal)>,
    pending: HashMap<String, PendingOrder>,
    rng: StdRng,
}

impl Inner {
    fn total_unrealized(&self) -> Decimal {
        self.positions.iter().map(|p| p.unrealized_pnl).sum()
    }

    fn sync_equity(&mut self) {
        let unrealized = self.total_unrealized();
        self.account.update_equity(unrealized);
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

/// The in-process venue. Safe to share behind an `Arc`.
pub struct SimulatedBroker {
    connected: AtomicBool,
    inner: Mutex<Inner>,
}

impl SimulatedBroker {
    /// Create a broker for `user`. Pass a seed for reproducible fills; with
    /// `None` the random source is seeded from entropy.
    pub fn new(user: &str, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            connected: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                account: SimulationAccount::new(user),
                positions: Vec::new(),
                prices: HashMap::new(),
                pending: HashMap::new(),
                rng,
            }),
        }
    }

    /// Set explicit bid/ask for a symbol and re-evaluate pending orders and
    /// SL/TP triggers.
    pub fn set_price(&self, symbol: &str, bid: Decimal, ask: Decimal) {
        let mut updates = HashMap::new();
        updates.insert(symbol.to_string(), (bid, ask));
        self.update_prices(updates);
    }

    /// Set price from a mid and a spread in pips.
    pub fn set_mid_price(&self, symbol: &str, mid: Decimal, spread_pips: Decimal) {
        let half = spread_pips * HALF_SPREAD_PER_PIP;
        self.set_price(symbol, mid - half, mid + half);
    }

    /// Apply a batch of price updates. Pending limit/stop orders are
    /// re-evaluated, then every position checks stop-loss before take-profit
    /// and self-closes at the trigger price.
    pub fn update_prices(&self, updates: HashMap<String, (Decimal, Decimal)>) {
        let mut inner = self.inner.lock();
        inner.prices.extend(updates);

        // Re-evaluate pending orders against the fresh book.
        let pending_ids: Vec<String> = inner
            .pending
            .iter()
            .filter(|(_, p)| p.status == "PENDING")
            .map(|(id, _)| id.clone())
            .collect();
        for order_id in pending_ids {
            Self::try_fill_pending(&mut inner, &order_id);
        }

        // SL before TP, per position, at the trigger price.
        let mut idx = 0;
        while idx < inner.positions.len() {
            let prices = match inner.prices.get(&inner.positions[idx].symbol) {
                Some(p) => *p,
                None => {
                    idx += 1;
                    continue;
                }
            };
            let (bid, ask) = prices;
            // Longs are marked (and closed) at the bid, shorts at the ask.
            let mark = match inner.positions[idx].side {
                OrderSide::Buy => bid,
                OrderSide::Sell => ask,
            };
            inner.positions[idx].update_price(mark);

            if inner.positions[idx].stop_loss_hit() {
                let trigger = inner.positions[idx].stop_loss.unwrap_or(mark);
                Self::close_position_at(&mut inner, idx, trigger, "stop loss");
                continue;
            }
            if inner.positions[idx].take_profit_hit() {
                let trigger = inner.positions[idx].take_profit.unwrap_or(mark);
                Self::close_position_at(&mut inner, idx, trigger, "take profit");
                continue;
            }
            idx += 1;
        }

        inner.sync_equity();
    }

    /// Atomically delete all positions, clear pending orders, and restore
    /// the initial balance.
    pub fn reset_account(&self) -> SimulationAccount {
        let mut inner = self.inner.lock();
        inner.positions.clear();
        inner.pending.clear();
        inner.account.reset();
        info!(user = %inner.account.user, "simulation account reset");
        inner.account.clone()
    }

    /// Snapshot the account state.
    pub fn account_snapshot(&self) -> SimulationAccount {
        self.inner.lock().account.clone()
    }

    /// Snapshot all open positions.
    pub fn positions_snapshot(&self) -> Vec<SimulationPosition> {
        self.inner.lock().positions.clone()
    }

    /// Update simulation parameters with bounds validation. Changing the
    /// initial balance resets the account.
    pub fn update_settings(
        &self,
        initial_balance: Option<Decimal>,
        slippage_pips: Option<Decimal>,
        commission_per_lot: Option<Decimal>,
        latency_ms: Option<u64>,
        fill_probability: Option<f64>,
    ) -> AppResult<SimulationAccount> {
        let mut inner = self.inner.lock();

        if let Some(balance) = initial_balance {
            if balance < dec!(100) {
                return Err(AppError::Validation(
                    "Initial balance must be at least $100".to_string(),
                ));
            }
            inner.account.initial_balance = balance;
            inner.positions.clear();
            inner.pending.clear();
            inner.account.reset();
        }
        if let Some(slippage) = slippage_pips {
            if slippage < Decimal::ZERO || slippage > dec!(10) {
                return Err(AppError::Validation(
                    "Slippage must be between 0 and 10 pips".to_string(),
                ));
            }
            inner.account.slippage_pips = slippage;
        }
        if let Some(commission) = commission_per_lot {
            if commission < Decimal::ZERO || commission > dec!(50) {
                return Err(AppError::Validation(
                    "Commission must be between $0 and $50 per lot".to_string(),
                ));
            }
            inner.account.commission_per_lot = commission;
        }
        if let Some(latency) = latency_ms {
            if latency > 5000 {
                return Err(AppError::Validation(
                    "Latency must be between 0 and 5000ms".to_string(),
                ));
            }
            inner.account.latency_ms = latency;
        }
        if let Some(prob) = fill_probability {
            if !(0.0..=1.0).contains(&prob) {
                return Err(AppError::Validation(
                    "Fill probability must be between 0 and 1".to_string(),
                ));
            }
            inner.account.fill_probability = prob;
        }

        Ok(inner.account.clone())
    }

    // -------------------------------------------------------------------------
    // Fill machinery
    // -------------------------------------------------------------------------

    /// Base price with unfavorable slippage applied: BUY lifts the ask,
    /// SELL hits the bid.
    fn fill_price(inner: &mut Inner, symbol: &str, side: OrderSide) -> Option<Decimal> {
        let (bid, ask) = *inner.prices.get(symbol)?;
        let base = match side {
            OrderSide::Buy => ask,
            OrderSide::Sell => bid,
        };

        let u: f64 = inner.rng.gen_range(0.0..1.0);
        let slip = inner.account.slippage_pips
            * Decimal::from_f64(u).unwrap_or(Decimal::ZERO)
            * PIP_SIZE;

        Some(match side {
            OrderSide::Buy => base + slip,
            OrderSide::Sell => base - slip,
        })
    }

    /// Gate a candidate fill by order type.
    fn should_fill(order: &OrderRequest, fill_price: Decimal) -> bool {
        match order.order_type {
            OrderType::Market => true,
            OrderType::Limit => match (order.side, order.limit_price) {
                (OrderSide::Buy, Some(limit)) => fill_price <= limit,
                (OrderSide::Sell, Some(limit)) => fill_price >= limit,
                _ => false,
            },
            OrderType::Stop => match (order.side, order.stop_price) {
                (OrderSide::Buy, Some(stop)) => fill_price >= stop,
                (OrderSide::Sell, Some(stop)) => fill_price <= stop,
                _ => false,
            },
            OrderType::StopLimit => {
                let stop_triggered = match (order.side, order.stop_price) {
                    (OrderSide::Buy, Some(stop)) => fill_price >= stop,
                    (OrderSide::Sell, Some(stop)) => fill_price <= stop,
                    _ => false,
                };
                stop_triggered
                    && match (order.side, order.limit_price) {
                        (OrderSide::Buy, Some(limit)) => fill_price <= limit,
                        (OrderSide::Sell, Some(limit)) => fill_price >= limit,
                        _ => false,
                    }
            }
        }
    }

    /// Re-evaluate one stored pending order; fills it when the book allows.
    fn try_fill_pending(inner: &mut Inner, broker_order_id: &str) {
        let order = match inner.pending.get(broker_order_id) {
            Some(p) if p.status == "PENDING" => p.order.clone(),
            _ => return,
        };

        let fill_price = match Self::fill_price(inner, &order.symbol, order.side) {
            Some(p) => p,
            None => return,
        };
        if !Self::should_fill(&order, fill_price) {
            return;
        }

        let commission = inner.account.commission_per_lot * order.quantity;
        if let Err(reason) = Self::check_margin(inner, &order, fill_price, commission) {
            // Cannot afford the triggered order; reject it rather than
            // leaving it armed forever.
            if let Some(p) = inner.pending.get_mut(broker_order_id) {
                p.status = "REJECTED";
            }
            warn!(broker_order_id, %reason, "pending order rejected on trigger");
            return;
        }

        Self::apply_fill(inner, &order, fill_price, commission);
        if let Some(p) = inner.pending.get_mut(broker_order_id) {
            p.status = "FILLED";
        }
        debug!(broker_order_id, price = %fill_price, "pending order filled on price update");
    }

    fn check_margin(
        inner: &Inner,
        order: &OrderRequest,
        fill_price: Decimal,
        commission: Decimal,
    ) -> Result<(), String> {
        if order.side != OrderSide::Buy {
            return Ok(());
        }
        let notional = fill_price * order.quantity * CONTRACT_MULTIPLIER;
        let required_margin = notional * MARGIN_RATE;
        if required_margin + commission > inner.account.margin_available {
            return Err(format!(
                "Insufficient margin. Required: {:.2}, Available: {:.2}",
                required_margin, inner.account.margin_available
            ));
        }
        Ok(())
    }

    /// Create/extend/reduce the position for a filled order and settle
    /// commission and margin against the account.
    fn apply_fill(inner: &mut Inner, order: &OrderRequest, fill_price: Decimal, commission: Decimal) {
        let existing = inner
            .positions
            .iter()
            .position(|p| p.symbol == order.symbol);

        match existing {
            Some(idx) if inner.positions[idx].side == order.side => {
                // Same-side add: weighted-average the entry.
                let pos = &mut inner.positions[idx];
                let total_qty = pos.quantity + order.quantity;
                pos.entry_price = (pos.entry_price * pos.quantity + fill_price * order.quantity)
                    / total_qty;
                pos.quantity = total_qty;
                let added_margin =
                    fill_price * order.quantity * CONTRACT_MULTIPLIER * MARGIN_RATE;
                pos.margin_required += added_margin;
                pos.update_price(fill_price);
                inner.account.margin_used += added_margin;
                inner.account.balance -= commission;
            }
            Some(idx) => {
                // Opposite side: reduce or close.
                inner.positions[idx].update_price(fill_price);
                let remaining = inner.positions[idx].quantity - order.quantity;

                if remaining <= Decimal::ZERO {
                    let pos = inner.positions.remove(idx);
                    let pnl = pos.unrealized_pnl - commission;
                    inner.account.margin_used -= pos.margin_required;
                    inner.account.record_trade(pnl, pnl > Decimal::ZERO);
                } else {
                    let pos = &mut inner.positions[idx];
                    let closed_qty = order.quantity;
                    let partial = pos.unrealized_pnl / pos.quantity * closed_qty;
                    let released_margin = pos.margin_required / pos.quantity * closed_qty;
                    let pnl = partial - commission;

                    pos.quantity = remaining;
                    pos.margin_required -= released_margin;
                    pos.update_price(fill_price);

                    inner.account.margin_used -= released_margin;
                    inner.account.record_trade(pnl, pnl > Decimal::ZERO);
                }
            }
            None => {
                let margin_required =
                    fill_price * order.quantity * CONTRACT_MULTIPLIER * MARGIN_RATE;
                let mut pos = SimulationPosition {
                    symbol: order.symbol.clone(),
                    side: order.side,
                    quantity: order.quantity,
                    entry_price: fill_price,
                    current_price: fill_price,
                    stop_loss: order.stop_loss,
                    take_profit: order.take_profit,
                    unrealized_pnl: Decimal::ZERO,
                    margin_required,
                    order_id: format!("SIM-{}", &Uuid::new_v4().simple().to_string()[..8].to_uppercase()),
                    opened_at: Utc::now(),
                };
                pos.update_price(fill_price);
                inner.positions.push(pos);
                inner.account.margin_used += margin_required;
                inner.account.balance -= commission;
            }
        }

        inner.sync_equity();
    }

    /// Close the position at `idx` at an explicit trigger price, realizing
    /// PnL net of the closing commission and releasing margin.
    fn close_position_at(inner: &mut Inner, idx: usize, trigger_price: Decimal, reason: &str) {
        let mut pos = inner.positions.remove(idx);
        pos.update_price(trigger_price);

        let commission = inner.account.commission_per_lot * pos.quantity;
        let net_pnl = pos.unrealized_pnl - commission;

        inner.account.margin_used -= pos.margin_required;
        inner.account.record_trade(net_pnl, net_pnl > Decimal::ZERO);
        inner.sync_equity();

        info!(
            symbol = %pos.symbol,
            reason,
            trigger = %trigger_price,
            net_pnl = %net_pnl,
            "simulated position self-closed"
        );
    }
}

#[async_trait]
impl BrokerAdapter for SimulatedBroker {
    fn broker_name(&self) -> &str {
        "Simulation"
    }

    fn is_paper(&self) -> bool {
        true
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> bool {
        self.connected.store(true, Ordering::SeqCst);
        true
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn submit_order(&self, order: &OrderRequest) -> BrokerOrderResult {
        if let Err(message) = validate_order(order) {
            return BrokerOrderResult::failure(message);
        }

        // Latency with ±20% jitter, slept before the account lock is taken.
        let latency = {
            let mut inner = self.inner.lock();
            let base = inner.account.latency_ms;
            if base > 0 {
                let jitter: f64 = inner.rng.gen_range(0.8..1.2);
                (base as f64 * jitter) as u64
            } else {
                0
            }
        };
        if latency > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(latency)).await;
        }

        let mut inner = self.inner.lock();

        // Market-conditions rejection.
        let draw: f64 = inner.rng.gen_range(0.0..1.0);
        if draw >= inner.account.fill_probability {
            return BrokerOrderResult::failure(
                "Order rejected - simulated market conditions unfavorable",
            );
        }

        let fill_price = match Self::fill_price(&mut inner, &order.symbol, order.side) {
            Some(p) => p,
            None => {
                return BrokerOrderResult::failure(format!(
                    "No price available for {}. Set a price first.",
                    order.symbol
                ))
            }
        };

        let broker_order_id =
            format!("SIM-{}", &Uuid::new_v4().simple().to_string()[..8].to_uppercase());

        if !Self::should_fill(order, fill_price) {
            inner.pending.insert(
                broker_order_id.clone(),
                PendingOrder {
                    order: order.clone(),
                    status: "PENDING",
                    created_at: Utc::now(),
                },
            );
            debug!(broker_order_id = %broker_order_id, "order stored pending trigger");
            return BrokerOrderResult::accepted(
                broker_order_id,
                "Order pending - limit/stop not triggered",
            );
        }

        let commission = inner.account.commission_per_lot * order.quantity;
        if let Err(reason) = Self::check_margin(&inner, order, fill_price, commission) {
            return BrokerOrderResult::failure(reason);
        }

        Self::apply_fill(&mut inner, order, fill_price, commission);

        info!(
            broker_order_id = %broker_order_id,
            symbol = %order.symbol,
            side = %order.side,
            price = %fill_price,
            quantity = %order.quantity,
            commission = %commission,
            "simulated fill"
        );

        BrokerOrderResult {
            success: true,
            broker_order_id: Some(broker_order_id),
            filled_price: Some(fill_price),
            filled_quantity: Some(order.quantity),
            commission: Some(commission),
            error_message: None,
            raw: None,
            timestamp: Utc::now(),
        }
    }

    async fn cancel_order(&self, broker_order_id: &str) -> BrokerOrderResult {
        let mut inner = self.inner.lock();
        match inner.pending.get_mut(broker_order_id) {
            None => BrokerOrderResult::failure(format!("Order {broker_order_id} not found")),
            Some(p) if p.status != "PENDING" => BrokerOrderResult::failure(format!(
                "Order {broker_order_id} cannot be cancelled - status: {}",
                p.status
            )),
            Some(p) => {
                p.status = "CANCELLED";
                BrokerOrderResult {
                    success: true,
                    broker_order_id: Some(broker_order_id.to_string()),
                    filled_price: None,
                    filled_quantity: None,
                    commission: None,
                    error_message: None,
                    raw: None,
                    timestamp: Utc::now(),
                }
            }
        }
    }

    async fn get_order_status(&self, broker_order_id: &str) -> Option<BrokerOrderStatus> {
        let inner = self.inner.lock();
        inner.pending.get(broker_order_id).map(|p| BrokerOrderStatus {
            broker_order_id: broker_order_id.to_string(),
            status: p.status.to_string(),
            created_at: p.created_at,
        })
    }

    async fn get_positions(&self) -> Vec<BrokerPositionInfo> {
        let inner = self.inner.lock();
        inner
            .positions
            .iter()
            .map(|p| BrokerPositionInfo {
                symbol: p.symbol.clone(),
                quantity: p.quantity,
                average_price: p.entry_price,
                current_price: Some(p.current_price),
                unrealized_pnl: Some(p.unrealized_pnl),
            })
            .collect()
    }

    async fn get_position(&self, symbol: &str) -> Option<BrokerPositionInfo> {
        let inner = self.inner.lock();
        inner.positions.iter().find(|p| p.symbol == symbol).map(|p| BrokerPositionInfo {
            symbol: p.symbol.clone(),
            quantity: p.quantity,
            average_price: p.entry_price,
            current_price: Some(p.current_price),
            unrealized_pnl: Some(p.unrealized_pnl),
        })
    }

    async fn get_account_info(&self) -> AppResult<BrokerAccountInfo> {
        let inner = self.inner.lock();
        Ok(BrokerAccountInfo {
            balance: inner.account.balance,
            equity: inner.account.equity,
            margin_used: inner.account.margin_used,
            margin_available: inner.account.margin_available,
            currency: inner.account.currency.clone(),
        })
    }

    async fn get_current_price(&self, symbol: &str) -> Option<Decimal> {
        let inner = self.inner.lock();
        inner.prices.get(symbol).map(|(bid, ask)| (*bid + *ask) / dec!(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A broker with deterministic fills, no latency, and no slippage.
    fn test_broker() -> SimulatedBroker {
        let broker = SimulatedBroker::new("tester", Some(42));
        broker
            .update_settings(None, Some(Decimal::ZERO), Some(dec!(7.0)), Some(0), Some(1.0))
            .unwrap();
        broker
    }

    fn buy(quantity: Decimal) -> OrderRequest {
        OrderRequest {
            symbol: "EURUSD".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            stop_price: None,
            stop_loss: None,
            take_profit: None,
            client_order_id: None,
        }
    }

    #[tokio::test]
    async fn market_buy_fills_at_ask_and_charges_commission_and_margin() {
        let broker = test_broker();
        broker.set_mid_price("EURUSD", dec!(1.1000), dec!(2));

        let result = broker.submit_order(&buy(dec!(0.10))).await;
        assert!(result.success);
        // 2-pip spread around 1.1000 puts the ask at 1.1001.
        assert_eq!(result.filled_price, Some(dec!(1.1001)));
        assert_eq!(result.commission, Some(dec!(0.70)));

        let account = broker.account_snapshot();
        assert_eq!(account.balance, dec!(10000) - dec!(0.70));
        // notional 1.1001 * 0.10 * 100000 = 11001; margin 1% = 110.01
        assert_eq!(account.margin_used, dec!(110.010));
    }

    #[tokio::test]
    async fn limit_buy_stays_pending_until_price_reaches_limit() {
        let broker = test_broker();
        broker.set_mid_price("EURUSD", dec!(1.1000), dec!(2));

        let mut order = buy(dec!(0.10));
        order.order_type = OrderType::Limit;
        order.limit_price = Some(dec!(1.0995));

        let result = broker.submit_order(&order).await;
        assert!(result.success);
        assert!(result.filled_price.is_none());
        let order_id = result.broker_order_id.unwrap();
        assert_eq!(
            broker.get_order_status(&order_id).await.unwrap().status,
            "PENDING"
        );

        // Move the mid down; the ask drops to 1.0991 <= 1.0995 and fills.
        broker.set_mid_price("EURUSD", dec!(1.0990), dec!(2));
        assert_eq!(
            broker.get_order_status(&order_id).await.unwrap().status,
            "FILLED"
        );

        let positions = broker.positions_snapshot();
        assert_eq!(positions.len(), 1);
        assert!(positions[0].entry_price <= dec!(1.0995));

        let account = broker.account_snapshot();
        assert!(account.margin_used > Decimal::ZERO);
    }

    #[tokio::test]
    async fn cancel_of_pending_order_restores_account() {
        let broker = test_broker();
        broker.set_mid_price("EURUSD", dec!(1.1000), dec!(2));
        let before = broker.account_snapshot();

        let mut order = buy(dec!(0.10));
        order.order_type = OrderType::Limit;
        order.limit_price = Some(dec!(1.0995));
        let submitted = broker.submit_order(&order).await;
        let order_id = submitted.broker_order_id.unwrap();

        let cancelled = broker.cancel_order(&order_id).await;
        assert!(cancelled.success);

        let after = broker.account_snapshot();
        assert_eq!(after.balance, before.balance);
        assert_eq!(after.margin_used, before.margin_used);
        assert!(broker.positions_snapshot().is_empty());

        // Cancelling again fails.
        assert!(!broker.cancel_order(&order_id).await.success);
    }

    #[tokio::test]
    async fn opposite_side_order_closes_position_and_realizes_pnl() {
        let broker = test_broker();
        broker.set_mid_price("EURUSD", dec!(1.1000), dec!(0));

        broker.submit_order(&buy(dec!(0.10))).await;
        broker.set_mid_price("EURUSD", dec!(1.1100), dec!(0));

        let mut sell = buy(dec!(0.10));
        sell.side = OrderSide::Sell;
        let result = broker.submit_order(&sell).await;
        assert!(result.success);

        let account = broker.account_snapshot();
        assert!(broker.positions_snapshot().is_empty());
        assert_eq!(account.total_trades, 1);
        assert_eq!(account.winning_trades, 1);
        // Gross 100, closing commission 0.70.
        assert_eq!(account.total_pnl, dec!(99.30));
        assert_eq!(account.margin_used, Decimal::ZERO);
    }

    #[tokio::test]
    async fn stop_loss_checked_before_take_profit_and_self_closes() {
        let broker = test_broker();
        broker.set_mid_price("EURUSD", dec!(1.1000), dec!(0));

        let mut order = buy(dec!(0.10));
        order.stop_loss = Some(dec!(1.0950));
        order.take_profit = Some(dec!(1.1150));
        broker.submit_order(&order).await;

        broker.set_mid_price("EURUSD", dec!(1.0940), dec!(0));

        let account = broker.account_snapshot();
        assert!(broker.positions_snapshot().is_empty());
        assert_eq!(account.total_trades, 1);
        assert_eq!(account.winning_trades, 0);
        // Closed at the 1.0950 trigger: gross -50, commission 0.70.
        assert_eq!(account.total_pnl, dec!(-50.70));
    }

    #[tokio::test]
    async fn equity_tracks_balance_plus_unrealized() {
        let broker = test_broker();
        broker.set_mid_price("EURUSD", dec!(1.1000), dec!(0));
        broker.submit_order(&buy(dec!(0.10))).await;

        broker.set_mid_price("EURUSD", dec!(1.1050), dec!(0));
        let account = broker.account_snapshot();
        let positions = broker.positions_snapshot();
        let unrealized: Decimal = positions.iter().map(|p| p.unrealized_pnl).sum();
        assert_eq!(account.equity, account.balance + unrealized);
        assert_eq!(account.margin_available, account.equity - account.margin_used);
    }

    #[tokio::test]
    async fn insufficient_margin_rejected() {
        let broker = test_broker();
        broker.set_mid_price("EURUSD", dec!(1.1000), dec!(0));

        // notional 1.1 * 100 * 100000 = 11,000,000; margin 110,000 > 10,000.
        let result = broker.submit_order(&buy(dec!(100))).await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("Insufficient margin"));
    }

    #[tokio::test]
    async fn reset_restores_initial_state() {
        let broker = test_broker();
        broker.set_mid_price("EURUSD", dec!(1.1000), dec!(0));
        broker.submit_order(&buy(dec!(0.10))).await;

        let account = broker.reset_account();
        assert_eq!(account.balance, account.initial_balance);
        assert_eq!(account.total_trades, 0);
        assert!(broker.positions_snapshot().is_empty());
        assert_eq!(account.margin_used, Decimal::ZERO);
    }

    #[tokio::test]
    async fn seeded_brokers_fill_identically() {
        let run = |seed: u64| async move {
            let broker = SimulatedBroker::new("tester", Some(seed));
            broker
                .update_settings(None, Some(dec!(1.0)), Some(dec!(7.0)), Some(0), Some(1.0))
                .unwrap();
            broker.set_mid_price("EURUSD", dec!(1.1000), dec!(2));
            broker.submit_order(&buy(dec!(0.10))).await.filled_price
        };

        let a = run(7).await;
        let b = run(7).await;
        assert_eq!(a, b);
    }
}
