// =============================================================================
// Signals — proposals from external strategy producers
// =============================================================================
//
// Signal generation itself lives outside this engine. Producers hand signals
// to the store via the API; the execution engine is the only component that
// transitions their status afterwards.
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use crate::types::Side;

/// Lifecycle status of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Pending,
    Executed,
    Cancelled,
    Expired,
}

/// A proposed trade with entry, stop, target, and intended risk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: u64,
    pub strategy_name: String,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    /// Intended risk as a percentage of account balance.
    pub risk_percent: Decimal,
    pub timeframe: String,
    pub status: SignalStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Signal {
    /// Reward distance over risk distance. Zero when the stop distance is
    /// zero (such a signal is rejected by validation).
    pub fn risk_reward_ratio(&self) -> Decimal {
        let risk = (self.entry_price - self.stop_loss).abs();
        if risk.is_zero() {
            return Decimal::ZERO;
        }
        (self.take_profit - self.entry_price).abs() / risk
    }

    /// Whether the signal has passed its expiry timestamp.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|t| t <= now).unwrap_or(false)
    }
}

/// New-signal payload accepted from a strategy producer.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSignal {
    pub strategy_name: String,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub risk_percent: Decimal,
    #[serde(default)]
    pub timeframe: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Thread-safe store of signals handed to the engine.
pub struct SignalStore {
    signals: RwLock<Vec<Signal>>,
    next_id: AtomicU64,
}

impl SignalStore {
    pub fn new() -> Self {
        Self {
            signals: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Record a new signal as PENDING and return it.
    pub fn insert(&self, new: NewSignal) -> Signal {
        let signal = Signal {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            strategy_name: new.strategy_name,
            symbol: new.symbol,
            side: new.side,
            entry_price: new.entry_price,
            stop_loss: new.stop_loss,
            take_profit: new.take_profit,
            risk_percent: new.risk_percent,
            timeframe: new.timeframe.unwrap_or_else(|| "1h".to_string()),
            status: SignalStatus::Pending,
            created_at: Utc::now(),
            expires_at: new.expires_at,
        };

        info!(
            signal_id = signal.id,
            strategy = %signal.strategy_name,
            symbol = %signal.symbol,
            side = %signal.side,
            "signal recorded"
        );

        self.signals.write().push(signal.clone());
        signal
    }

    pub fn get(&self, id: u64) -> Option<Signal> {
        self.signals.read().iter().find(|s| s.id == id).cloned()
    }

    /// Transition a signal's status. Returns false if the signal is unknown.
    pub fn set_status(&self, id: u64, status: SignalStatus) -> bool {
        let mut signals = self.signals.write();
        match signals.iter_mut().find(|s| s.id == id) {
            Some(s) => {
                s.status = status;
                true
            }
            None => false,
        }
    }

    /// Most recent signals, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Signal> {
        let signals = self.signals.read();
        signals.iter().rev().take(limit).cloned().collect()
    }
}

impl Default for SignalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample(entry: Decimal, sl: Decimal, tp: Decimal) -> NewSignal {
        NewSignal {
            strategy_name: "NBB".to_string(),
            symbol: "EURUSD".to_string(),
            side: Side::Long,
            entry_price: entry,
            stop_loss: sl,
            take_profit: tp,
            risk_percent: dec!(2.0),
            timeframe: None,
            expires_at: None,
        }
    }

    #[test]
    fn insert_assigns_sequential_ids_and_pending_status() {
        let store = SignalStore::new();
        let a = store.insert(sample(dec!(1.1000), dec!(1.0950), dec!(1.1150)));
        let b = store.insert(sample(dec!(1.1000), dec!(1.0950), dec!(1.1150)));
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(a.status, SignalStatus::Pending);
    }

    #[test]
    fn risk_reward_ratio_for_symmetric_signal() {
        let store = SignalStore::new();
        let s = store.insert(sample(dec!(1.1000), dec!(1.0950), dec!(1.1150)));
        assert_eq!(s.risk_reward_ratio(), dec!(3));
    }

    #[test]
    fn zero_stop_distance_yields_zero_ratio() {
        let store = SignalStore::new();
        let s = store.insert(sample(dec!(1.1000), dec!(1.1000), dec!(1.1150)));
        assert_eq!(s.risk_reward_ratio(), Decimal::ZERO);
    }

    #[test]
    fn status_transition() {
        let store = SignalStore::new();
        let s = store.insert(sample(dec!(1.1000), dec!(1.0950), dec!(1.1150)));
        assert!(store.set_status(s.id, SignalStatus::Executed));
        assert_eq!(store.get(s.id).unwrap().status, SignalStatus::Executed);
        assert!(!store.set_status(999, SignalStatus::Cancelled));
    }
}
