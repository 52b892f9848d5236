// =============================================================================
// Hard risk caps — frozen at build time, verified on startup
// =============================================================================
//
// These ceilings may NEVER be exceeded by any soft setting or runtime
// decision. The settings service validates every soft limit against them,
// and the validator sizes every trade inside them.
// =============================================================================

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

/// Maximum risk per trade as a percentage of account balance.
pub const MAX_RISK_PER_TRADE_PCT: Decimal = dec!(2.0);

/// Maximum cumulative daily loss as a percentage of account balance.
pub const MAX_DAILY_LOSS_PCT: Decimal = dec!(5.0);

/// Drawdown from peak balance that triggers emergency shutdown.
pub const EMERGENCY_DRAWDOWN_PCT: Decimal = dec!(15.0);

/// Maximum simultaneously open positions across all strategies.
pub const MAX_OPEN_POSITIONS: u32 = 10;

/// Maximum trades opened per calendar day (UTC).
pub const MAX_TRADES_PER_DAY: u32 = 20;

/// Maximum trades opened in any rolling hour.
pub const MAX_TRADES_PER_HOUR: u32 = 5;

/// Maximum position size in lots.
pub const MAX_POSITION_SIZE_LOTS: Decimal = dec!(1.0);

/// Minimum acceptable risk/reward ratio for a signal.
pub const MIN_RISK_REWARD_RATIO: Decimal = dec!(1.5);

/// Consecutive losses after which a strategy budget auto-disables.
pub const STRATEGY_AUTO_DISABLE_THRESHOLD: u32 = 5;

/// Default per-strategy exposure budget as a percentage of balance.
pub const MAX_RISK_PER_STRATEGY_PCT: Decimal = dec!(5.0);

/// Serializable snapshot of the hard caps for the read-only constants
/// endpoint and for decision audit rows.
#[derive(Debug, Clone, Serialize)]
pub struct HardCaps {
    pub max_risk_per_trade_pct: Decimal,
    pub max_daily_loss_pct: Decimal,
    pub emergency_drawdown_pct: Decimal,
    pub max_open_positions: u32,
    pub max_trades_per_day: u32,
    pub max_trades_per_hour: u32,
    pub max_position_size: Decimal,
    pub min_risk_reward: Decimal,
    pub strategy_auto_disable_threshold: u32,
}

impl HardCaps {
    pub fn snapshot() -> Self {
        Self {
            max_risk_per_trade_pct: MAX_RISK_PER_TRADE_PCT,
            max_daily_loss_pct: MAX_DAILY_LOSS_PCT,
            emergency_drawdown_pct: EMERGENCY_DRAWDOWN_PCT,
            max_open_positions: MAX_OPEN_POSITIONS,
            max_trades_per_day: MAX_TRADES_PER_DAY,
            max_trades_per_hour: MAX_TRADES_PER_HOUR,
            max_position_size: MAX_POSITION_SIZE_LOTS,
            min_risk_reward: MIN_RISK_REWARD_RATIO,
            strategy_auto_disable_threshold: STRATEGY_AUTO_DISABLE_THRESHOLD,
        }
    }
}

/// Verify the frozen values at startup. Panics if any invariant does not
/// hold — a process with corrupted ceilings must not trade.
pub fn verify_hard_caps() {
    assert!(MAX_RISK_PER_TRADE_PCT > Decimal::ZERO);
    assert!(MAX_DAILY_LOSS_PCT >= MAX_RISK_PER_TRADE_PCT);
    assert!(EMERGENCY_DRAWDOWN_PCT > MAX_DAILY_LOSS_PCT);
    assert!(MAX_OPEN_POSITIONS >= 1);
    assert!(MAX_TRADES_PER_HOUR >= 1);
    assert!(MAX_TRADES_PER_DAY >= MAX_TRADES_PER_HOUR);
    assert!(MAX_POSITION_SIZE_LOTS > Decimal::ZERO);
    assert!(MIN_RISK_REWARD_RATIO >= Decimal::ONE);
    assert!(STRATEGY_AUTO_DISABLE_THRESHOLD >= 1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_caps_verify() {
        verify_hard_caps();
    }

    #[test]
    fn snapshot_matches_constants() {
        let caps = HardCaps::snapshot();
        assert_eq!(caps.max_risk_per_trade_pct, dec!(2.0));
        assert_eq!(caps.emergency_drawdown_pct, dec!(15.0));
        assert_eq!(caps.max_open_positions, 10);
        assert_eq!(caps.strategy_auto_disable_threshold, 5);
    }
}
