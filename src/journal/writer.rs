// =============================================================================
// Journal writer — immutable trade records from any source
// =============================================================================
//
// The journal is the single source of truth for performance analysis. There
// is no update or delete path: once written, an entry never changes.
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::positions::Position;
use crate::types::{ExitReason, Side, TradeSource};

/// Immutable record of one completed trade, including the strategy config
/// snapshot so analysis never joins against live configs.
#[derive(Debug, Clone, Serialize)]
pub struct JournalEntry {
    pub id: u64,
    pub entry_id: String,
    pub source: TradeSource,
    pub strategy_name: String,
    pub strategy_config: serde_json::Value,
    pub symbol: String,
    pub timeframe: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub position_size: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub risk_percent: Decimal,
    pub risk_reward_ratio: Decimal,
    pub pnl: Decimal,
    pub pnl_percent: Decimal,
    pub is_winner: bool,
    pub exit_reason: ExitReason,
    pub entry_slippage: Decimal,
    pub exit_slippage: Decimal,
    pub commission: Decimal,
    pub market_context: serde_json::Value,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub execution_order_id: Option<u64>,
    pub signal_id: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// Append-only store of journal entries.
pub struct JournalStore {
    entries: RwLock<Vec<JournalEntry>>,
    next_id: AtomicU64,
}

impl JournalStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Record a closed position from any source. `parent_ref` scopes the
    /// entry id (execution order id, backtest id). Fails on an open
    /// position.
    #[allow(clippy::too_many_arguments)]
    pub fn record_trade(
        &self,
        source: TradeSource,
        position: &Position,
        strategy_config: serde_json::Value,
        parent_ref: &str,
        market_context: serde_json::Value,
        timeframe: &str,
        execution_order_id: Option<u64>,
        signal_id: Option<u64>,
    ) -> AppResult<JournalEntry> {
        let exit_price = position
            .exit_price
            .ok_or_else(|| AppError::Validation("Cannot journal open position".to_string()))?;
        let realized_pnl = position
            .realized_pnl
            .ok_or_else(|| AppError::Validation("Cannot journal open position".to_string()))?;
        let exit_time = position
            .closed_at
            .ok_or_else(|| AppError::Validation("Cannot journal open position".to_string()))?;
        let exit_reason = position.exit_reason.unwrap_or(ExitReason::Manual);

        let duration_seconds = (exit_time - position.opened_at).num_seconds();
        let duration_minutes = (duration_seconds as f64 / 60.0).round() as i64;

        let risk_amount = (position.entry_price - position.stop_loss).abs() * position.position_size;
        let reward_amount =
            (position.take_profit - position.entry_price).abs() * position.position_size;
        let risk_reward_ratio = if risk_amount > Decimal::ZERO {
            reward_amount / risk_amount
        } else {
            Decimal::ZERO
        };

        let notional = position.entry_price * position.position_size;
        let pnl_percent = if notional > Decimal::ZERO {
            realized_pnl / notional * Decimal::from(100)
        } else {
            Decimal::ZERO
        };

        let entry_id = format!(
            "{}_{}_{}",
            source.id_prefix(),
            parent_ref,
            &Uuid::new_v4().simple().to_string()[..8]
        );

        let entry = JournalEntry {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            entry_id: entry_id.clone(),
            source,
            strategy_name: position.strategy_name.clone(),
            strategy_config,
            symbol: position.symbol.clone(),
            timeframe: timeframe.to_string(),
            side: position.side,
            entry_price: position.entry_price,
            exit_price,
            position_size: position.position_size,
            stop_loss: position.stop_loss,
            take_profit: position.take_profit,
            risk_percent: Decimal::from(2),
            risk_reward_ratio,
            pnl: realized_pnl,
            pnl_percent,
            is_winner: realized_pnl > Decimal::ZERO,
            exit_reason,
            entry_slippage: Decimal::ZERO,
            exit_slippage: Decimal::ZERO,
            commission: position.commission_paid,
            market_context,
            entry_time: position.opened_at,
            exit_time,
            duration_minutes,
            execution_order_id,
            signal_id,
            created_at: Utc::now(),
        };

        info!(
            entry_id = %entry_id,
            source = %source,
            pnl = %realized_pnl,
            "journal entry recorded"
        );

        self.entries.write().push(entry.clone());
        Ok(entry)
    }

    pub fn get(&self, entry_id: &str) -> Option<JournalEntry> {
        self.entries
            .read()
            .iter()
            .find(|e| e.entry_id == entry_id)
            .cloned()
    }

    /// Entries for (strategy, symbol, source) with entry time on or after
    /// `cutoff`.
    pub fn query(
        &self,
        strategy_name: &str,
        symbol: &str,
        source: TradeSource,
        cutoff: DateTime<Utc>,
    ) -> Vec<JournalEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| {
                e.strategy_name == strategy_name
                    && e.symbol == symbol
                    && e.source == source
                    && e.entry_time >= cutoff
            })
            .cloned()
            .collect()
    }

    /// Entries for (strategy, symbol, source) regardless of age, newest
    /// exit first.
    pub fn latest_by_exit(
        &self,
        strategy_name: &str,
        symbol: &str,
        source: TradeSource,
        limit: usize,
    ) -> Vec<JournalEntry> {
        let mut matching: Vec<JournalEntry> = self
            .entries
            .read()
            .iter()
            .filter(|e| {
                e.strategy_name == strategy_name && e.symbol == symbol && e.source == source
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.exit_time.cmp(&a.exit_time));
        matching.truncate(limit);
        matching
    }

    /// Most recent entries across all strategies, newest first.
    pub fn recent(&self, limit: usize) -> Vec<JournalEntry> {
        let entries = self.entries.read();
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for JournalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::positions::PositionStore;
    use rust_decimal_macros::dec;

    fn closed_position(pnl_direction: i32) -> Position {
        let store = PositionStore::new();
        let pos = store.open_position(
            "NBB",
            "EURUSD",
            Side::Long,
            dec!(1.1000),
            dec!(0.10),
            dec!(1.0950),
            dec!(1.1150),
            dec!(0.70),
        );
        let (price, reason) = if pnl_direction > 0 {
            (dec!(1.1150), ExitReason::Tp)
        } else {
            (dec!(1.0950), ExitReason::Sl)
        };
        store.close_position(&pos.id, price, reason, dec!(0.70)).unwrap()
    }

    #[test]
    fn records_closed_position_with_unique_entry_id() {
        let journal = JournalStore::new();
        let pos = closed_position(1);

        let a = journal
            .record_trade(
                TradeSource::Live,
                &pos,
                serde_json::json!({"period": 20}),
                "42",
                serde_json::json!({}),
                "1h",
                Some(42),
                Some(7),
            )
            .unwrap();
        let b = journal
            .record_trade(
                TradeSource::Live,
                &pos,
                serde_json::json!({"period": 20}),
                "42",
                serde_json::json!({}),
                "1h",
                Some(42),
                Some(7),
            )
            .unwrap();

        assert!(a.entry_id.starts_with("LIVE_42_"));
        assert_ne!(a.entry_id, b.entry_id);
        assert!(a.is_winner);
        assert_eq!(a.exit_reason, ExitReason::Tp);
        assert_eq!(a.pnl, dec!(148.60));
    }

    #[test]
    fn is_winner_matches_pnl_sign() {
        let journal = JournalStore::new();
        let losing = closed_position(-1);
        let entry = journal
            .record_trade(
                TradeSource::Paper,
                &losing,
                serde_json::json!({}),
                "9",
                serde_json::json!({}),
                "1h",
                None,
                None,
            )
            .unwrap();
        assert!(!entry.is_winner);
        assert!(entry.pnl < Decimal::ZERO);
        assert!(entry.entry_id.starts_with("PAPER_9_"));
    }

    #[test]
    fn open_position_cannot_be_journaled() {
        let journal = JournalStore::new();
        let store = PositionStore::new();
        let open = store.open_position(
            "NBB",
            "EURUSD",
            Side::Long,
            dec!(1.1000),
            dec!(0.10),
            dec!(1.0950),
            dec!(1.1150),
            Decimal::ZERO,
        );
        let err = journal
            .record_trade(
                TradeSource::Live,
                &open,
                serde_json::json!({}),
                "1",
                serde_json::json!({}),
                "1h",
                None,
                None,
            )
            .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn query_filters_by_source_and_cutoff() {
        let journal = JournalStore::new();
        let pos = closed_position(1);
        journal
            .record_trade(
                TradeSource::Live,
                &pos,
                serde_json::json!({}),
                "1",
                serde_json::json!({}),
                "1h",
                None,
                None,
            )
            .unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(1);
        assert_eq!(journal.query("NBB", "EURUSD", TradeSource::Live, cutoff).len(), 1);
        assert!(journal.query("NBB", "EURUSD", TradeSource::Backtest, cutoff).is_empty());
        assert!(journal.query("MA", "EURUSD", TradeSource::Live, cutoff).is_empty());
    }
}
