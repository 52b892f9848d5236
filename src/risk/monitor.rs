// =============================================================================
// Risk Monitor — rolls the durable position set up into account and
// per-strategy risk state
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{info, warn};

use crate::broker::CONTRACT_MULTIPLIER;
use crate::positions::{Position, PositionStore};
use crate::risk::constants::{MAX_RISK_PER_STRATEGY_PCT, STRATEGY_AUTO_DISABLE_THRESHOLD};

/// Current account risk state. Logically a singleton per account.
#[derive(Debug, Clone, Serialize)]
pub struct AccountRiskState {
    pub account_balance: Decimal,
    pub peak_balance: Decimal,
    pub current_drawdown_pct: Decimal,
    pub daily_pnl: Decimal,
    pub daily_loss_pct: Decimal,
    pub trades_today: u32,
    pub trades_this_hour: u32,
    pub open_positions_count: u32,
    pub total_exposure: Decimal,
    pub total_exposure_pct: Decimal,
    pub emergency_shutdown_active: bool,
    pub throttling_active: bool,
    pub last_updated: DateTime<Utc>,
}

impl AccountRiskState {
    fn empty() -> Self {
        Self {
            account_balance: Decimal::ZERO,
            peak_balance: Decimal::ZERO,
            current_drawdown_pct: Decimal::ZERO,
            daily_pnl: Decimal::ZERO,
            daily_loss_pct: Decimal::ZERO,
            trades_today: 0,
            trades_this_hour: 0,
            open_positions_count: 0,
            total_exposure: Decimal::ZERO,
            total_exposure_pct: Decimal::ZERO,
            emergency_shutdown_active: false,
            throttling_active: false,
            last_updated: Utc::now(),
        }
    }
}

/// Per-(strategy, symbol) risk budget and performance tracking.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyBudget {
    pub strategy_name: String,
    pub symbol: String,
    pub max_exposure_pct: Decimal,
    pub max_daily_loss_pct: Decimal,
    pub current_exposure: Decimal,
    pub daily_pnl: Decimal,
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub total_pnl: Decimal,
    pub consecutive_losses: u32,
    pub max_consecutive_losses: u32,
    pub is_enabled: bool,
    pub disabled_reason: Option<String>,
    pub last_trade_time: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl StrategyBudget {
    fn new(strategy_name: &str, symbol: &str) -> Self {
        Self {
            strategy_name: strategy_name.to_string(),
            symbol: symbol.to_string(),
            max_exposure_pct: MAX_RISK_PER_STRATEGY_PCT,
            max_daily_loss_pct: dec!(2.0),
            current_exposure: Decimal::ZERO,
            daily_pnl: Decimal::ZERO,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            total_pnl: Decimal::ZERO,
            consecutive_losses: 0,
            max_consecutive_losses: STRATEGY_AUTO_DISABLE_THRESHOLD,
            is_enabled: true,
            disabled_reason: None,
            last_trade_time: None,
            last_updated: Utc::now(),
        }
    }
}

/// Continuous risk monitoring over the position store.
pub struct RiskMonitor {
    positions: Arc<PositionStore>,
    state: RwLock<AccountRiskState>,
    budgets: RwLock<Vec<StrategyBudget>>,
}

impl RiskMonitor {
    pub fn new(positions: Arc<PositionStore>) -> Self {
        Self {
            positions,
            state: RwLock::new(AccountRiskState::empty()),
            budgets: RwLock::new(Vec::new()),
        }
    }

    /// Recompute the account risk state from the position store. The
    /// emergency and throttling flags are preserved; `peak_balance` is
    /// monotonically non-decreasing.
    pub fn update_account(&self, account_balance: Decimal, peak_balance: Decimal) -> AccountRiskState {
        let now = Utc::now();
        let today_start = now
            .with_hour(0)
            .and_then(|t| t.with_minute(0))
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now);
        let hour_ago = now - Duration::hours(1);

        let closed_today = self.positions.closed_since(today_start);
        let daily_pnl: Decimal = closed_today
            .iter()
            .filter_map(|p| p.realized_pnl)
            .sum();
        let daily_loss_pct = if daily_pnl < Decimal::ZERO && account_balance > Decimal::ZERO {
            daily_pnl.abs() / account_balance * dec!(100)
        } else {
            Decimal::ZERO
        };

        let open = self.positions.open_positions();
        let total_exposure: Decimal = open
            .iter()
            .map(|p| p.entry_price * p.position_size * CONTRACT_MULTIPLIER)
            .sum();
        let total_exposure_pct = if account_balance > Decimal::ZERO {
            total_exposure / account_balance * dec!(100)
        } else {
            Decimal::ZERO
        };

        let mut state = self.state.write();
        let peak = state.peak_balance.max(peak_balance).max(account_balance);
        let drawdown = if peak > Decimal::ZERO {
            ((peak - account_balance) / peak * dec!(100)).max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        state.account_balance = account_balance;
        state.peak_balance = peak;
        state.current_drawdown_pct = drawdown;
        state.daily_pnl = daily_pnl;
        state.daily_loss_pct = daily_loss_pct;
        state.trades_today = self.positions.opened_since(today_start) as u32;
        state.trades_this_hour = self.positions.opened_since(hour_ago) as u32;
        state.open_positions_count = open.len() as u32;
        state.total_exposure = total_exposure;
        state.total_exposure_pct = total_exposure_pct;
        state.last_updated = now;

        state.clone()
    }

    /// Latest snapshot without recomputation.
    pub fn account_state(&self) -> AccountRiskState {
        self.state.read().clone()
    }

    pub fn is_emergency_active(&self) -> bool {
        self.state.read().emergency_shutdown_active
    }

    /// Arm the emergency shutdown flag. Only an explicit operator reset
    /// clears it.
    pub fn trigger_emergency_shutdown(&self, drawdown_pct: Decimal) {
        let mut state = self.state.write();
        state.emergency_shutdown_active = true;
        state.last_updated = Utc::now();
        warn!(drawdown_pct = %drawdown_pct, "EMERGENCY SHUTDOWN TRIGGERED");
    }

    /// Clear the emergency flag (manual intervention). Returns whether a
    /// shutdown was actually active.
    pub fn reset_emergency_shutdown(&self) -> bool {
        let mut state = self.state.write();
        if state.emergency_shutdown_active {
            state.emergency_shutdown_active = false;
            state.last_updated = Utc::now();
            warn!("emergency shutdown has been manually reset");
            true
        } else {
            false
        }
    }

    /// Update the budget for (strategy, symbol) after a trade. On a closed
    /// losing trade the consecutive-loss counter increments; crossing the
    /// threshold disables the budget.
    pub fn update_strategy_budget(
        &self,
        strategy_name: &str,
        symbol: &str,
        position: &Position,
        trade_closed: bool,
    ) {
        let mut budgets = self.budgets.write();
        let budget = Self::budget_mut(&mut budgets, strategy_name, symbol);

        budget.total_trades += 1;
        budget.last_trade_time = Some(Utc::now());
        budget.last_updated = Utc::now();

        if trade_closed {
            if let Some(pnl) = position.realized_pnl {
                budget.total_pnl += pnl;
                budget.daily_pnl += pnl;

                if pnl > Decimal::ZERO {
                    budget.winning_trades += 1;
                    budget.consecutive_losses = 0;
                } else {
                    budget.losing_trades += 1;
                    budget.consecutive_losses += 1;
                }

                if budget.consecutive_losses >= budget.max_consecutive_losses {
                    budget.is_enabled = false;
                    budget.disabled_reason =
                        Some(format!("{} consecutive losses", budget.consecutive_losses));
                    warn!(
                        strategy = strategy_name,
                        symbol,
                        reason = budget.disabled_reason.as_deref().unwrap_or(""),
                        "strategy auto-disabled"
                    );
                }
            }
        }
    }

    /// Get (creating on first touch) a budget snapshot.
    pub fn budget(&self, strategy_name: &str, symbol: &str) -> StrategyBudget {
        let mut budgets = self.budgets.write();
        Self::budget_mut(&mut budgets, strategy_name, symbol).clone()
    }

    pub fn budgets(&self) -> Vec<StrategyBudget> {
        self.budgets.read().clone()
    }

    /// Disable a strategy budget with an explicit reason (feedback loop
    /// path).
    pub fn disable_strategy(&self, strategy_name: &str, symbol: &str, reason: &str) -> bool {
        let mut budgets = self.budgets.write();
        match budgets
            .iter_mut()
            .find(|b| b.strategy_name == strategy_name && b.symbol == symbol)
        {
            Some(budget) => {
                budget.is_enabled = false;
                budget.disabled_reason = Some(reason.to_string());
                budget.last_updated = Utc::now();
                warn!(strategy = strategy_name, symbol, reason, "strategy disabled");
                true
            }
            None => false,
        }
    }

    /// Re-enable a disabled strategy, clearing its loss streak.
    pub fn enable_strategy(&self, strategy_name: &str, symbol: &str) -> bool {
        let mut budgets = self.budgets.write();
        match budgets
            .iter_mut()
            .find(|b| b.strategy_name == strategy_name && b.symbol == symbol)
        {
            Some(budget) => {
                budget.is_enabled = true;
                budget.disabled_reason = None;
                budget.consecutive_losses = 0;
                budget.last_updated = Utc::now();
                info!(strategy = strategy_name, symbol, "strategy re-enabled");
                true
            }
            None => false,
        }
    }

    /// Clear daily metrics (operator/scheduler call). Both locks are held
    /// so readers never observe a half-reset day.
    pub fn reset_daily(&self) {
        let mut state = self.state.write();
        let mut budgets = self.budgets.write();

        state.daily_pnl = Decimal::ZERO;
        state.daily_loss_pct = Decimal::ZERO;
        state.trades_today = 0;
        state.last_updated = Utc::now();

        for budget in budgets.iter_mut() {
            budget.daily_pnl = Decimal::ZERO;
            budget.last_updated = Utc::now();
        }
        info!("daily risk metrics have been reset");
    }

    fn budget_mut<'a>(
        budgets: &'a mut Vec<StrategyBudget>,
        strategy_name: &str,
        symbol: &str,
    ) -> &'a mut StrategyBudget {
        if let Some(idx) = budgets
            .iter()
            .position(|b| b.strategy_name == strategy_name && b.symbol == symbol)
        {
            &mut budgets[idx]
        } else {
            budgets.push(StrategyBudget::new(strategy_name, symbol));
            budgets.last_mut().expect("just pushed")
        }
    }
}
