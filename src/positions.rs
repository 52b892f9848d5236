// =============================================================================
// Position store — durable open/closed market exposures
// =============================================================================
//
// Life-cycle: Open -> Closed. A closed position is an immutable historical
// record; the risk monitor recomputes account state from this store and the
// journal writer snapshots closes.
//
// Thread-safety: all mutable state is behind `parking_lot::RwLock`.
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::broker::CONTRACT_MULTIPLIER;
use crate::types::{ExitReason, Side};

/// Current status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// A single tracked position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Unique identifier (UUID v4).
    pub id: String,
    pub strategy_name: String,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    /// Size in lots.
    pub position_size: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub status: PositionStatus,
    #[serde(default)]
    pub current_price: Decimal,
    #[serde(default)]
    pub unrealized_pnl: Decimal,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_price: Option<Decimal>,
    #[serde(default)]
    pub exit_reason: Option<ExitReason>,
    #[serde(default)]
    pub realized_pnl: Option<Decimal>,
    #[serde(default)]
    pub commission_paid: Decimal,
}

impl Position {
    fn direction(&self) -> Decimal {
        match self.side {
            Side::Long => Decimal::ONE,
            Side::Short => -Decimal::ONE,
        }
    }
}

/// Thread-safe owner of the open and closed position sets.
pub struct PositionStore {
    open: RwLock<Vec<Position>>,
    closed: RwLock<Vec<Position>>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self {
            open: RwLock::new(Vec::new()),
            closed: RwLock::new(Vec::new()),
        }
    }

    /// Open a new position and return it.
    #[allow(clippy::too_many_arguments)]
    pub fn open_position(
        &self,
        strategy_name: &str,
        symbol: &str,
        side: Side,
        entry_price: Decimal,
        position_size: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        commission: Decimal,
    ) -> Position {
        let pos = Position {
            id: Uuid::new_v4().to_string(),
            strategy_name: strategy_name.to_string(),
            symbol: symbol.to_string(),
            side,
            entry_price,
            position_size,
            stop_loss,
            take_profit,
            status: PositionStatus::Open,
            current_price: entry_price,
            unrealized_pnl: Decimal::ZERO,
            opened_at: Utc::now(),
            closed_at: None,
            exit_price: None,
            exit_reason: None,
            realized_pnl: None,
            commission_paid: commission,
        };

        info!(
            id = %pos.id,
            strategy = strategy_name,
            symbol,
            side = %side,
            entry = %entry_price,
            size = %position_size,
            "position opened"
        );

        self.open.write().push(pos.clone());
        pos
    }

    /// Update `current_price` and unrealized PnL for every open position on
    /// `symbol`.
    pub fn update_price(&self, symbol: &str, price: Decimal) {
        let mut open = self.open.write();
        for pos in open.iter_mut().filter(|p| p.symbol == symbol) {
            pos.current_price = price;
            pos.unrealized_pnl =
                pos.direction() * (price - pos.entry_price) * pos.position_size * CONTRACT_MULTIPLIER;
        }
    }

    /// Close a position at `exit_price` with an explicit reason. Extra
    /// commission charged on the closing fill is added to the position's
    /// running total. Returns the now-immutable closed record, or `None` if
    /// no matching open position exists.
    pub fn close_position(
        &self,
        id: &str,
        exit_price: Decimal,
        reason: ExitReason,
        close_commission: Decimal,
    ) -> Option<Position> {
        let mut open = self.open.write();
        let idx = open.iter().position(|p| p.id == id)?;
        let mut pos = open.remove(idx);
        drop(open);

        let gross = pos.direction() * (exit_price - pos.entry_price) * pos.position_size
            * CONTRACT_MULTIPLIER;
        pos.commission_paid += close_commission;
        pos.realized_pnl = Some(gross - pos.commission_paid);
        pos.exit_price = Some(exit_price);
        pos.exit_reason = Some(reason);
        pos.current_price = exit_price;
        pos.unrealized_pnl = Decimal::ZERO;
        pos.status = PositionStatus::Closed;
        pos.closed_at = Some(Utc::now());

        info!(
            id = %pos.id,
            reason = %reason,
            exit = %exit_price,
            realized_pnl = %pos.realized_pnl.unwrap_or_default(),
            "position closed"
        );

        self.closed.write().push(pos.clone());
        Some(pos)
    }

    /// Snapshot of all currently open positions.
    pub fn open_positions(&self) -> Vec<Position> {
        self.open.read().clone()
    }

    pub fn open_count(&self) -> usize {
        self.open.read().len()
    }

    /// Count of positions opened since `cutoff` (open or closed).
    pub fn opened_since(&self, cutoff: DateTime<Utc>) -> usize {
        let open = self.open.read().iter().filter(|p| p.opened_at >= cutoff).count();
        let closed = self.closed.read().iter().filter(|p| p.opened_at >= cutoff).count();
        open + closed
    }

    /// Closed positions whose close timestamp falls on or after `cutoff`.
    pub fn closed_since(&self, cutoff: DateTime<Utc>) -> Vec<Position> {
        self.closed
            .read()
            .iter()
            .filter(|p| p.closed_at.map(|t| t >= cutoff).unwrap_or(false))
            .cloned()
            .collect()
    }

    /// The most recent `count` closed positions, newest first.
    pub fn closed_positions(&self, count: usize) -> Vec<Position> {
        let closed = self.closed.read();
        closed.iter().rev().take(count).cloned().collect()
    }
}

impl Default for PositionStore {
    fn default() -> Self {
        Self::new()
    }
}
