// =============================================================================
// Risk Validator — the authoritative admission gate
// =============================================================================
//
// THIS ENGINE HAS ABSOLUTE VETO POWER. Checks run in severity order; the
// first failure short-circuits the rest and writes one decision row with the
// full limits snapshot. No other component may independently admit a trade.
// =============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::risk::constants::{
    EMERGENCY_DRAWDOWN_PCT, MAX_DAILY_LOSS_PCT, MAX_OPEN_POSITIONS, MAX_POSITION_SIZE_LOTS,
    MAX_RISK_PER_TRADE_PCT, MAX_TRADES_PER_DAY, MAX_TRADES_PER_HOUR, MIN_RISK_REWARD_RATIO,
};
use crate::risk::monitor::RiskMonitor;
use crate::signals::Signal;
use crate::types::RiskSeverity;

/// Kind of decision recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskDecisionType {
    TradeApproval,
    TradeRejection,
    EmergencyShutdown,
}

/// One audit row per validation invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RiskDecision {
    pub id: u64,
    pub decision_type: RiskDecisionType,
    pub subject: String,
    pub subject_id: Option<u64>,
    pub approved: bool,
    pub rejection_reason: Option<String>,
    pub risk_metrics: serde_json::Value,
    pub limits_checked: serde_json::Value,
    pub severity: RiskSeverity,
    pub decision_time: DateTime<Utc>,
}

/// Outcome returned to callers (the execution engine surfaces the reason
/// verbatim).
#[derive(Debug, Clone, Serialize)]
pub struct RiskVerdict {
    pub approved: bool,
    pub rejection_reason: Option<String>,
    /// Admitted position size in lots; zero when rejected before sizing.
    pub position_size: Decimal,
    pub decision_id: u64,
    pub risk_metrics: serde_json::Value,
}

struct CheckResult {
    passed: bool,
    reason: Option<String>,
    current: serde_json::Value,
    limit: serde_json::Value,
}

impl CheckResult {
    fn pass(current: serde_json::Value, limit: serde_json::Value) -> Self {
        Self { passed: true, reason: None, current, limit }
    }

    fn fail(reason: String, current: serde_json::Value, limit: serde_json::Value) -> Self {
        Self { passed: false, reason: Some(reason), current, limit }
    }

    fn as_json(&self) -> serde_json::Value {
        json!({
            "passed": self.passed,
            "reason": self.reason,
            "current": self.current,
            "limit": self.limit,
        })
    }
}

/// The single admission gate for trade signals.
pub struct RiskValidator {
    monitor: Arc<RiskMonitor>,
    decisions: RwLock<Vec<RiskDecision>>,
    next_id: AtomicU64,
}

impl RiskValidator {
    pub fn new(monitor: Arc<RiskMonitor>) -> Self {
        Self {
            monitor,
            decisions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Validate a signal against ALL risk limits in order. The first failed
    /// check rejects the trade and skips the remainder.
    pub fn validate(
        &self,
        signal: &Signal,
        account_balance: Decimal,
        peak_balance: Decimal,
    ) -> RiskVerdict {
        let mut checks_performed: Vec<&'static str> = Vec::new();
        let mut limits = serde_json::Map::new();

        let state = self.monitor.update_account(account_balance, peak_balance);

        let mut metrics = json!({
            "account_balance": account_balance,
            "peak_balance": peak_balance,
            "signal_id": signal.id,
            "strategy_name": signal.strategy_name,
            "symbol": signal.symbol,
        });

        macro_rules! run_check {
            ($name:literal, $check:expr, $severity:expr, $decision_type:expr, $subject:expr) => {{
                checks_performed.push($name);
                let result: CheckResult = $check;
                limits.insert($name.to_string(), result.as_json());
                if !result.passed {
                    let reason = result.reason.clone().unwrap_or_default();
                    metrics["checks_performed"] = json!(checks_performed);
                    let decision_id = self.log_decision(
                        $decision_type,
                        $subject,
                        Some(signal.id),
                        false,
                        Some(reason.clone()),
                        metrics.clone(),
                        serde_json::Value::Object(limits.clone()),
                        $severity,
                    );
                    return RiskVerdict {
                        approved: false,
                        rejection_reason: Some(reason),
                        position_size: Decimal::ZERO,
                        decision_id,
                        risk_metrics: metrics,
                    };
                }
            }};
        }

        let trade_subject = format!("Trade for {}", signal.symbol);

        // CHECK 1: Emergency shutdown status.
        run_check!(
            "emergency_shutdown",
            if state.emergency_shutdown_active {
                CheckResult::fail(
                    "Emergency shutdown is active - all trading halted".to_string(),
                    json!(true),
                    json!(false),
                )
            } else {
                CheckResult::pass(json!(false), json!(false))
            },
            RiskSeverity::Emergency,
            RiskDecisionType::TradeRejection,
            trade_subject.clone()
        );

        // CHECK 2: Account drawdown. A breach arms the shutdown flag before
        // the decision row is written.
        let drawdown = state.current_drawdown_pct;
        metrics["current_drawdown_pct"] = json!(drawdown);
        run_check!(
            "drawdown",
            if drawdown >= EMERGENCY_DRAWDOWN_PCT {
                self.monitor.trigger_emergency_shutdown(drawdown);
                CheckResult::fail(
                    format!(
                        "Emergency drawdown limit breached: {:.2}% >= {}%",
                        drawdown, EMERGENCY_DRAWDOWN_PCT
                    ),
                    json!(drawdown),
                    json!(EMERGENCY_DRAWDOWN_PCT),
                )
            } else {
                CheckResult::pass(json!(drawdown), json!(EMERGENCY_DRAWDOWN_PCT))
            },
            RiskSeverity::Emergency,
            RiskDecisionType::EmergencyShutdown,
            "Emergency Shutdown Triggered".to_string()
        );

        // CHECK 3: Maximum open positions.
        run_check!(
            "max_positions",
            if state.open_positions_count >= MAX_OPEN_POSITIONS {
                CheckResult::fail(
                    format!(
                        "Maximum open positions reached: {}/{}",
                        state.open_positions_count, MAX_OPEN_POSITIONS
                    ),
                    json!(state.open_positions_count),
                    json!(MAX_OPEN_POSITIONS),
                )
            } else {
                CheckResult::pass(json!(state.open_positions_count), json!(MAX_OPEN_POSITIONS))
            },
            RiskSeverity::Critical,
            RiskDecisionType::TradeRejection,
            trade_subject.clone()
        );

        // CHECK 4: Daily trade limit.
        run_check!(
            "daily_trade_limit",
            if state.trades_today >= MAX_TRADES_PER_DAY {
                CheckResult::fail(
                    format!(
                        "Daily trade limit reached: {}/{}",
                        state.trades_today, MAX_TRADES_PER_DAY
                    ),
                    json!(state.trades_today),
                    json!(MAX_TRADES_PER_DAY),
                )
            } else {
                CheckResult::pass(json!(state.trades_today), json!(MAX_TRADES_PER_DAY))
            },
            RiskSeverity::Warning,
            RiskDecisionType::TradeRejection,
            trade_subject.clone()
        );

        // CHECK 5: Hourly trade limit.
        run_check!(
            "hourly_trade_limit",
            if state.trades_this_hour >= MAX_TRADES_PER_HOUR {
                CheckResult::fail(
                    format!(
                        "Hourly trade limit reached: {}/{}",
                        state.trades_this_hour, MAX_TRADES_PER_HOUR
                    ),
                    json!(state.trades_this_hour),
                    json!(MAX_TRADES_PER_HOUR),
                )
            } else {
                CheckResult::pass(json!(state.trades_this_hour), json!(MAX_TRADES_PER_HOUR))
            },
            RiskSeverity::Warning,
            RiskDecisionType::TradeRejection,
            trade_subject.clone()
        );

        // CHECK 6: Position size inside the per-trade risk cap.
        let position_size = calculate_position_size(
            account_balance,
            signal.risk_percent.min(MAX_RISK_PER_TRADE_PCT),
            signal.entry_price,
            signal.stop_loss,
        );
        metrics["calculated_position_size"] = json!(position_size);
        run_check!(
            "position_size",
            if position_size <= Decimal::ZERO {
                CheckResult::fail(
                    format!("Invalid position size: {position_size}"),
                    json!(position_size),
                    json!(MAX_POSITION_SIZE_LOTS),
                )
            } else {
                CheckResult::pass(json!(position_size), json!(MAX_POSITION_SIZE_LOTS))
            },
            RiskSeverity::Critical,
            RiskDecisionType::TradeRejection,
            trade_subject.clone()
        );

        // CHECK 7: Risk/reward ratio.
        let rr_ratio = signal.risk_reward_ratio();
        metrics["risk_reward_ratio"] = json!(rr_ratio);
        run_check!(
            "risk_reward",
            if rr_ratio < MIN_RISK_REWARD_RATIO {
                CheckResult::fail(
                    format!(
                        "Risk/reward ratio too low: {:.2} < {}",
                        rr_ratio, MIN_RISK_REWARD_RATIO
                    ),
                    json!(rr_ratio),
                    json!(MIN_RISK_REWARD_RATIO),
                )
            } else {
                CheckResult::pass(json!(rr_ratio), json!(MIN_RISK_REWARD_RATIO))
            },
            RiskSeverity::Warning,
            RiskDecisionType::TradeRejection,
            trade_subject.clone()
        );

        // CHECK 8: Strategy budget.
        let budget = self.monitor.budget(&signal.strategy_name, &signal.symbol);
        run_check!(
            "strategy_budget",
            if !budget.is_enabled {
                CheckResult::fail(
                    format!(
                        "Strategy {} is disabled: {}",
                        signal.strategy_name,
                        budget.disabled_reason.as_deref().unwrap_or("no reason recorded")
                    ),
                    json!("disabled"),
                    json!("enabled"),
                )
            } else if budget.consecutive_losses >= budget.max_consecutive_losses {
                CheckResult::fail(
                    format!(
                        "Strategy {} has {} consecutive losses (max {})",
                        signal.strategy_name,
                        budget.consecutive_losses,
                        budget.max_consecutive_losses
                    ),
                    json!(budget.consecutive_losses),
                    json!(budget.max_consecutive_losses),
                )
            } else {
                CheckResult::pass(
                    json!(budget.consecutive_losses),
                    json!(budget.max_consecutive_losses),
                )
            },
            RiskSeverity::Warning,
            RiskDecisionType::TradeRejection,
            trade_subject.clone()
        );

        // CHECK 9: Daily loss limit.
        run_check!(
            "daily_loss_limit",
            if state.daily_loss_pct >= MAX_DAILY_LOSS_PCT {
                CheckResult::fail(
                    format!(
                        "Daily loss limit reached: {:.2}% >= {}%",
                        state.daily_loss_pct, MAX_DAILY_LOSS_PCT
                    ),
                    json!(state.daily_loss_pct),
                    json!(MAX_DAILY_LOSS_PCT),
                )
            } else {
                CheckResult::pass(json!(state.daily_loss_pct), json!(MAX_DAILY_LOSS_PCT))
            },
            RiskSeverity::Critical,
            RiskDecisionType::TradeRejection,
            trade_subject.clone()
        );

        // ALL CHECKS PASSED.
        metrics["checks_performed"] = json!(checks_performed);
        let decision_id = self.log_decision(
            RiskDecisionType::TradeApproval,
            trade_subject,
            Some(signal.id),
            true,
            None,
            metrics.clone(),
            serde_json::Value::Object(limits),
            RiskSeverity::Info,
        );

        info!(
            strategy = %signal.strategy_name,
            symbol = %signal.symbol,
            position_size = %position_size,
            "risk validation APPROVED"
        );

        RiskVerdict {
            approved: true,
            rejection_reason: None,
            position_size,
            decision_id,
            risk_metrics: metrics,
        }
    }

    /// Recent decisions, newest first.
    pub fn decisions(&self, limit: usize) -> Vec<RiskDecision> {
        let decisions = self.decisions.read();
        decisions.iter().rev().take(limit).cloned().collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn log_decision(
        &self,
        decision_type: RiskDecisionType,
        subject: String,
        subject_id: Option<u64>,
        approved: bool,
        rejection_reason: Option<String>,
        risk_metrics: serde_json::Value,
        limits_checked: serde_json::Value,
        severity: RiskSeverity,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.decisions.write().push(RiskDecision {
            id,
            decision_type,
            subject,
            subject_id,
            approved,
            rejection_reason,
            risk_metrics,
            limits_checked,
            severity,
            decision_time: Utc::now(),
        });
        id
    }
}

/// Position size from balance and risk parameters, capped at the hard
/// maximum, with deterministic banker's rounding to two fractional digits.
pub fn calculate_position_size(
    account_balance: Decimal,
    risk_percent: Decimal,
    entry_price: Decimal,
    stop_loss: Decimal,
) -> Decimal {
    let risk_per_unit = (entry_price - stop_loss).abs();
    if risk_per_unit.is_zero() {
        return Decimal::ZERO;
    }
    let risk_amount = account_balance * (risk_percent / dec!(100));
    let position_size = risk_amount / risk_per_unit;
    position_size
        .min(MAX_POSITION_SIZE_LOTS)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::positions::{Position, PositionStatus, PositionStore};
    use crate::signals::{NewSignal, SignalStore};
    use crate::types::{ExitReason, Side};

    fn validator() -> (RiskValidator, Arc<RiskMonitor>, Arc<PositionStore>) {
        let positions = Arc::new(PositionStore::new());
        let monitor = Arc::new(RiskMonitor::new(positions.clone()));
        (RiskValidator::new(monitor.clone()), monitor, positions)
    }

    fn signal(entry: Decimal, sl: Decimal, tp: Decimal) -> Signal {
        let store = SignalStore::new();
        store.insert(NewSignal {
            strategy_name: "NBB".to_string(),
            symbol: "EURUSD".to_string(),
            side: Side::Long,
            entry_price: entry,
            stop_loss: sl,
            take_profit: tp,
            risk_percent: dec!(2.0),
            timeframe: None,
            expires_at: None,
        })
    }

    #[test]
    fn healthy_signal_is_approved() {
        let (validator, _, _) = validator();
        let verdict = validator.validate(
            &signal(dec!(1.1000), dec!(1.0950), dec!(1.1150)),
            dec!(10000),
            dec!(10000),
        );
        assert!(verdict.approved, "{:?}", verdict.rejection_reason);
        assert!(verdict.position_size > Decimal::ZERO);
        assert!(verdict.position_size <= MAX_POSITION_SIZE_LOTS);

        let decisions = validator.decisions(10);
        assert_eq!(decisions.len(), 1);
        assert!(decisions[0].approved);
        assert_eq!(decisions[0].decision_type, RiskDecisionType::TradeApproval);
    }

    #[test]
    fn drawdown_breach_triggers_emergency_and_blocks_until_reset() {
        let (validator, monitor, _) = validator();

        // 16% drawdown >= 15% hard cap.
        let verdict = validator.validate(
            &signal(dec!(1.1000), dec!(1.0950), dec!(1.1150)),
            dec!(8400),
            dec!(10000),
        );
        assert!(!verdict.approved);
        assert!(verdict
            .rejection_reason
            .as_deref()
            .unwrap()
            .contains("Emergency drawdown limit breached"));
        assert!(monitor.is_emergency_active());

        // Subsequent validations fail at check 1 regardless of balance.
        let verdict = validator.validate(
            &signal(dec!(1.1000), dec!(1.0950), dec!(1.1150)),
            dec!(10000),
            dec!(10000),
        );
        assert_eq!(
            verdict.rejection_reason.as_deref(),
            Some("Emergency shutdown is active - all trading halted")
        );

        monitor.reset_emergency_shutdown();
        let verdict = validator.validate(
            &signal(dec!(1.1000), dec!(1.0950), dec!(1.1150)),
            dec!(10000),
            dec!(10000),
        );
        assert!(verdict.approved);
    }

    #[test]
    fn zero_stop_distance_is_rejected() {
        let (validator, _, _) = validator();
        let verdict = validator.validate(
            &signal(dec!(1.1000), dec!(1.1000), dec!(1.1150)),
            dec!(10000),
            dec!(10000),
        );
        assert!(!verdict.approved);
        assert!(verdict.rejection_reason.unwrap().contains("Invalid position size"));
    }

    #[test]
    fn risk_reward_boundary_is_inclusive() {
        let (validator, _, _) = validator();
        // RR exactly 1.5: accepted.
        let verdict = validator.validate(
            &signal(dec!(1.1000), dec!(1.0950), dec!(1.1075)),
            dec!(10000),
            dec!(10000),
        );
        assert!(verdict.approved, "{:?}", verdict.rejection_reason);

        // RR just below: rejected.
        let verdict = validator.validate(
            &signal(dec!(1.1000), dec!(1.0950), dec!(1.1074)),
            dec!(10000),
            dec!(10000),
        );
        assert!(!verdict.approved);
        assert!(verdict.rejection_reason.unwrap().contains("Risk/reward ratio too low"));
    }

    #[test]
    fn disabled_strategy_is_rejected_regardless_of_prices() {
        let (validator, monitor, _) = validator();

        // Five closed losers recorded against the budget without touching
        // the position store, so no trade-rate limit interferes.
        let losing = Position {
            id: "p1".to_string(),
            strategy_name: "NBB".to_string(),
            symbol: "EURUSD".to_string(),
            side: Side::Long,
            entry_price: dec!(1.1000),
            position_size: dec!(0.10),
            stop_loss: dec!(1.0950),
            take_profit: dec!(1.1150),
            status: PositionStatus::Closed,
            current_price: dec!(1.0950),
            unrealized_pnl: Decimal::ZERO,
            opened_at: chrono::Utc::now(),
            closed_at: Some(chrono::Utc::now()),
            exit_price: Some(dec!(1.0950)),
            exit_reason: Some(ExitReason::Sl),
            realized_pnl: Some(dec!(-50)),
            commission_paid: Decimal::ZERO,
        };
        for _ in 0..5 {
            monitor.update_strategy_budget("NBB", "EURUSD", &losing, true);
        }

        let verdict = validator.validate(
            &signal(dec!(1.1000), dec!(1.0950), dec!(1.1150)),
            dec!(10000),
            dec!(10000),
        );
        assert!(!verdict.approved);
        assert!(verdict.rejection_reason.unwrap().contains("is disabled"));
    }

    #[test]
    fn position_size_capped_and_bankers_rounded() {
        // Uncapped size: 10000 * 2% / 0.0050 = 40 lots, capped at 1.
        let size = calculate_position_size(dec!(10000), dec!(2.0), dec!(1.1000), dec!(1.0950));
        assert_eq!(size, dec!(1.00));

        // 20 * 2% / 0.64 = 0.625 -> banker's rounding to 0.62.
        let size = calculate_position_size(dec!(20), dec!(2.0), dec!(1.64), dec!(1.00));
        assert_eq!(size, dec!(0.62));
    }

    #[test]
    fn open_position_cap_rejects_eleventh_trade() {
        let (validator, _, store) = validator();
        for i in 0..10 {
            store.open_position(
                "NBB",
                &format!("PAIR{i}"),
                Side::Long,
                dec!(1.1000),
                dec!(0.10),
                dec!(1.0950),
                dec!(1.1150),
                Decimal::ZERO,
            );
        }

        let verdict = validator.validate(
            &signal(dec!(1.1000), dec!(1.0950), dec!(1.1150)),
            dec!(10000),
            dec!(10000),
        );
        assert!(!verdict.approved);
        assert!(verdict
            .rejection_reason
            .unwrap()
            .contains("Maximum open positions reached"));
    }
}
