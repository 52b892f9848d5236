// =============================================================================
// Performance analyzer — windowed metrics and deviation vs. the backtest
// baseline
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use tracing::info;

use crate::journal::writer::{JournalEntry, JournalStore};
use crate::types::TradeSource;

/// Live win rate below this (with enough trades) flags an issue.
const LOW_WIN_RATE_PCT: f64 = 40.0;
/// Minimum trades before win-rate / profit-factor issues are considered.
const MIN_TRADES_FOR_ISSUES: usize = 5;
/// Consecutive losses that flag an issue on their own.
const EXCESSIVE_CONSECUTIVE_LOSSES: u32 = 5;
/// Infinite profit factors clamp to this for deviation arithmetic.
const PROFIT_FACTOR_CLAMP: f64 = 99.0;

/// Windowed performance metrics for one (strategy, symbol, source).
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub max_consecutive_wins: u32,
    pub max_consecutive_losses: u32,
    pub avg_duration_minutes: i64,
}

impl PerformanceMetrics {
    fn empty() -> Self {
        Self {
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            total_pnl: 0.0,
            avg_pnl: 0.0,
            gross_profit: 0.0,
            gross_loss: 0.0,
            profit_factor: 0.0,
            avg_win: 0.0,
            avg_loss: 0.0,
            max_consecutive_wins: 0,
            max_consecutive_losses: 0,
            avg_duration_minutes: 0,
        }
    }
}

/// Deviation of live performance against the backtest baseline.
#[derive(Debug, Clone, Serialize)]
pub struct DeviationReport {
    pub status: String,
    pub win_rate_deviation_pct: f64,
    pub profit_factor_deviation: f64,
    pub avg_pnl_deviation: f64,
    pub severity: String,
}

impl DeviationReport {
    fn unavailable(status: &str) -> Self {
        Self {
            status: status.to_string(),
            win_rate_deviation_pct: 0.0,
            profit_factor_deviation: 0.0,
            avg_pnl_deviation: 0.0,
            severity: "normal".to_string(),
        }
    }
}

/// Full analysis result for one (strategy, symbol).
#[derive(Debug, Clone, Serialize)]
pub struct StrategyAnalysis {
    pub strategy_name: String,
    pub symbol: String,
    pub lookback_days: i64,
    pub live_performance: PerformanceMetrics,
    pub backtest_performance: PerformanceMetrics,
    pub paper_performance: PerformanceMetrics,
    pub deviation: DeviationReport,
    pub analysis_time: DateTime<Utc>,
}

/// Deterministic action derived from the issue set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackAction {
    TriggerOptimization,
    DisableStrategy,
    MonitorClosely,
    Continue,
}

impl std::fmt::Display for FeedbackAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TriggerOptimization => "trigger_optimization",
            Self::DisableStrategy => "disable_strategy",
            Self::MonitorClosely => "monitor_closely",
            Self::Continue => "continue",
        };
        write!(f, "{s}")
    }
}

/// Underperformance detection result.
#[derive(Debug, Clone, Serialize)]
pub struct UnderperformanceReport {
    pub underperforming: bool,
    pub issues: Vec<String>,
    pub recommendation: FeedbackAction,
    pub consecutive_losses: u32,
    pub live_metrics: PerformanceMetrics,
    pub deviation: DeviationReport,
}

/// Periodized metric row for trend analysis.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSnapshot {
    pub id: u64,
    pub strategy_name: String,
    pub symbol: String,
    pub source: TradeSource,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub metrics: PerformanceMetrics,
    pub snapshot_time: DateTime<Utc>,
}

/// Analyzes journal entries to detect patterns and performance deviations.
pub struct PerformanceAnalyzer {
    journal: Arc<JournalStore>,
    snapshots: RwLock<Vec<PerformanceSnapshot>>,
    next_snapshot_id: AtomicU64,
}

impl PerformanceAnalyzer {
    pub fn new(journal: Arc<JournalStore>) -> Self {
        Self {
            journal,
            snapshots: RwLock::new(Vec::new()),
            next_snapshot_id: AtomicU64::new(1),
        }
    }

    /// Compare live vs. backtest performance over a rolling window.
    pub fn analyze_strategy(
        &self,
        strategy_name: &str,
        symbol: &str,
        lookback_days: i64,
    ) -> StrategyAnalysis {
        let cutoff = Utc::now() - Duration::days(lookback_days);

        let live = self.metrics_for(strategy_name, symbol, TradeSource::Live, cutoff);
        let backtest = self.metrics_for(strategy_name, symbol, TradeSource::Backtest, cutoff);
        let paper = self.metrics_for(strategy_name, symbol, TradeSource::Paper, cutoff);
        let deviation = Self::deviation(&live, &backtest);

        info!(
            strategy = strategy_name,
            symbol,
            live_win_rate = format!("{:.1}", live.win_rate),
            backtest_win_rate = format!("{:.1}", backtest.win_rate),
            "strategy analyzed"
        );

        StrategyAnalysis {
            strategy_name: strategy_name.to_string(),
            symbol: symbol.to_string(),
            lookback_days,
            live_performance: live,
            backtest_performance: backtest,
            paper_performance: paper,
            deviation,
            analysis_time: Utc::now(),
        }
    }

    /// Combine thresholds into an issue set and map it to a recommendation.
    pub fn detect_underperformance(
        &self,
        strategy_name: &str,
        symbol: &str,
    ) -> UnderperformanceReport {
        let analysis = self.analyze_strategy(strategy_name, symbol, 30);
        let live = analysis.live_performance;
        let deviation = analysis.deviation;

        let mut issues: Vec<String> = Vec::new();

        if live.total_trades >= MIN_TRADES_FOR_ISSUES && live.win_rate < LOW_WIN_RATE_PCT {
            issues.push("low_win_rate".to_string());
        }
        if live.total_trades >= MIN_TRADES_FOR_ISSUES && live.profit_factor < 1.0 {
            issues.push("unprofitable".to_string());
        }
        if deviation.severity == "critical" {
            issues.push("critical_deviation_from_backtest".to_string());
        }

        let consecutive_losses = self.current_consecutive_losses(strategy_name, symbol);
        if consecutive_losses >= EXCESSIVE_CONSECUTIVE_LOSSES {
            issues.push("excessive_consecutive_losses".to_string());
        }

        let underperforming = !issues.is_empty();
        let recommendation = if underperforming {
            Self::recommendation(&issues)
        } else {
            FeedbackAction::Continue
        };

        UnderperformanceReport {
            underperforming,
            issues,
            recommendation,
            consecutive_losses,
            live_metrics: live,
            deviation,
        }
    }

    /// Persist a metrics snapshot for `[period_start, period_end]`.
    pub fn create_snapshot(
        &self,
        strategy_name: &str,
        symbol: &str,
        source: TradeSource,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> PerformanceSnapshot {
        let entries: Vec<JournalEntry> = self
            .journal
            .query(strategy_name, symbol, source, period_start)
            .into_iter()
            .filter(|e| e.entry_time <= period_end)
            .collect();
        let metrics = Self::compute_metrics(&entries);

        let snapshot = PerformanceSnapshot {
            id: self.next_snapshot_id.fetch_add(1, Ordering::SeqCst),
            strategy_name: strategy_name.to_string(),
            symbol: symbol.to_string(),
            source,
            period_start,
            period_end,
            metrics,
            snapshot_time: Utc::now(),
        };

        self.snapshots.write().push(snapshot.clone());
        snapshot
    }

    /// Stored snapshots, newest first.
    pub fn snapshots(&self, limit: usize) -> Vec<PerformanceSnapshot> {
        let snapshots = self.snapshots.read();
        snapshots.iter().rev().take(limit).cloned().collect()
    }

    fn metrics_for(
        &self,
        strategy_name: &str,
        symbol: &str,
        source: TradeSource,
        cutoff: DateTime<Utc>,
    ) -> PerformanceMetrics {
        let entries = self.journal.query(strategy_name, symbol, source, cutoff);
        Self::compute_metrics(&entries)
    }

    fn compute_metrics(entries: &[JournalEntry]) -> PerformanceMetrics {
        if entries.is_empty() {
            return PerformanceMetrics::empty();
        }

        let total_trades = entries.len();
        let winning_trades = entries.iter().filter(|e| e.is_winner).count();
        let losing_trades = total_trades - winning_trades;
        let win_rate = winning_trades as f64 / total_trades as f64 * 100.0;

        let pnl_of = |e: &JournalEntry| e.pnl.to_f64().unwrap_or(0.0);
        let total_pnl: f64 = entries.iter().map(pnl_of).sum();
        let avg_pnl = total_pnl / total_trades as f64;

        let gross_profit: f64 = entries.iter().filter(|e| e.is_winner).map(pnl_of).sum();
        let gross_loss: f64 = entries
            .iter()
            .filter(|e| !e.is_winner)
            .map(pnl_of)
            .sum::<f64>()
            .abs();
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let avg_win = if winning_trades > 0 {
            gross_profit / winning_trades as f64
        } else {
            0.0
        };
        let avg_loss = if losing_trades > 0 {
            gross_loss / losing_trades as f64
        } else {
            0.0
        };

        let (max_consecutive_wins, max_consecutive_losses) = Self::streaks(entries);

        let total_duration: i64 = entries.iter().map(|e| e.duration_minutes).sum();
        let avg_duration_minutes = total_duration / total_trades as i64;

        PerformanceMetrics {
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            total_pnl,
            avg_pnl,
            gross_profit,
            gross_loss,
            profit_factor,
            avg_win,
            avg_loss,
            max_consecutive_wins,
            max_consecutive_losses,
            avg_duration_minutes,
        }
    }

    /// Max win/loss streaks, walking entries ordered by exit time.
    fn streaks(entries: &[JournalEntry]) -> (u32, u32) {
        let mut ordered: Vec<&JournalEntry> = entries.iter().collect();
        ordered.sort_by(|a, b| a.exit_time.cmp(&b.exit_time));

        let mut max_wins = 0u32;
        let mut max_losses = 0u32;
        let mut current_wins = 0u32;
        let mut current_losses = 0u32;

        for entry in ordered {
            if entry.is_winner {
                current_wins += 1;
                current_losses = 0;
                max_wins = max_wins.max(current_wins);
            } else {
                current_losses += 1;
                current_wins = 0;
                max_losses = max_losses.max(current_losses);
            }
        }

        (max_wins, max_losses)
    }

    fn deviation(live: &PerformanceMetrics, backtest: &PerformanceMetrics) -> DeviationReport {
        if backtest.total_trades == 0 {
            return DeviationReport::unavailable("no_backtest_data");
        }
        if live.total_trades == 0 {
            return DeviationReport::unavailable("no_live_data");
        }

        let win_rate_deviation = live.win_rate - backtest.win_rate;

        let clamp = |pf: f64| if pf.is_infinite() { PROFIT_FACTOR_CLAMP } else { pf };
        let live_pf = clamp(live.profit_factor);
        let backtest_pf = clamp(backtest.profit_factor);
        let profit_factor_deviation = live_pf - backtest_pf;
        let avg_pnl_deviation = live.avg_pnl - backtest.avg_pnl;

        let mut severity = if win_rate_deviation.abs() > 20.0 {
            "critical"
        } else if win_rate_deviation.abs() > 10.0 {
            "warning"
        } else {
            "normal"
        };
        if live_pf < 1.0 && backtest_pf >= 1.0 {
            severity = "critical";
        }

        DeviationReport {
            status: "analyzed".to_string(),
            win_rate_deviation_pct: win_rate_deviation,
            profit_factor_deviation,
            avg_pnl_deviation,
            severity: severity.to_string(),
        }
    }

    /// Current loss streak from the most recent live exits.
    fn current_consecutive_losses(&self, strategy_name: &str, symbol: &str) -> u32 {
        let latest = self
            .journal
            .latest_by_exit(strategy_name, symbol, TradeSource::Live, 20);
        let mut consecutive = 0u32;
        for entry in latest {
            if entry.is_winner {
                break;
            }
            consecutive += 1;
        }
        consecutive
    }

    fn recommendation(issues: &[String]) -> FeedbackAction {
        let has = |name: &str| issues.iter().any(|i| i == name);

        if has("critical_deviation_from_backtest") {
            return FeedbackAction::TriggerOptimization;
        }
        if has("excessive_consecutive_losses") {
            return FeedbackAction::DisableStrategy;
        }
        if has("unprofitable") && has("low_win_rate") {
            return FeedbackAction::DisableStrategy;
        }
        if has("unprofitable") {
            return FeedbackAction::TriggerOptimization;
        }
        FeedbackAction::MonitorClosely
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::positions::PositionStore;
    use crate::types::{ExitReason, Side};
    use rust_decimal_macros::dec;

    fn record(journal: &JournalStore, source: TradeSource, winner: bool) {
        let store = PositionStore::new();
        let pos = store.open_position(
            "NBB",
            "EURUSD",
            Side::Long,
            dec!(1.1000),
            dec!(0.10),
            dec!(1.0950),
            dec!(1.1150),
            Decimal::ZERO,
        );
        let (price, reason) = if winner {
            (dec!(1.1150), ExitReason::Tp)
        } else {
            (dec!(1.0950), ExitReason::Sl)
        };
        let closed = store
            .close_position(&pos.id, price, reason, Decimal::ZERO)
            .unwrap();
        journal
            .record_trade(
                source,
                &closed,
                serde_json::json!({}),
                "1",
                serde_json::json!({}),
                "1h",
                None,
                None,
            )
            .unwrap();
    }

    use rust_decimal::Decimal;

    #[test]
    fn metrics_cover_win_rate_and_profit_factor() {
        let journal = Arc::new(JournalStore::new());
        for winner in [true, true, false, true] {
            record(&journal, TradeSource::Live, winner);
        }

        let analyzer = PerformanceAnalyzer::new(journal);
        let analysis = analyzer.analyze_strategy("NBB", "EURUSD", 30);
        let live = analysis.live_performance;

        assert_eq!(live.total_trades, 4);
        assert_eq!(live.winning_trades, 3);
        assert!((live.win_rate - 75.0).abs() < 1e-9);
        // 3 wins of 150 vs 1 loss of 50.
        assert!((live.profit_factor - 9.0).abs() < 1e-9);
        assert_eq!(live.max_consecutive_wins, 2);
        assert_eq!(live.max_consecutive_losses, 1);
    }

    #[test]
    fn deviation_severity_critical_on_large_win_rate_gap() {
        let journal = Arc::new(JournalStore::new());
        // Backtest: 4/4 winners. Live: 0/4.
        for _ in 0..4 {
            record(&journal, TradeSource::Backtest, true);
            record(&journal, TradeSource::Live, false);
        }

        let analyzer = PerformanceAnalyzer::new(journal);
        let analysis = analyzer.analyze_strategy("NBB", "EURUSD", 30);
        assert_eq!(analysis.deviation.status, "analyzed");
        assert_eq!(analysis.deviation.severity, "critical");
        assert!((analysis.deviation.win_rate_deviation_pct + 100.0).abs() < 1e-9);
    }

    #[test]
    fn underperformance_maps_to_disable_on_loss_streak() {
        let journal = Arc::new(JournalStore::new());
        for _ in 0..5 {
            record(&journal, TradeSource::Live, false);
        }

        let analyzer = PerformanceAnalyzer::new(journal);
        let report = analyzer.detect_underperformance("NBB", "EURUSD");

        assert!(report.underperforming);
        assert_eq!(report.consecutive_losses, 5);
        assert!(report.issues.iter().any(|i| i == "excessive_consecutive_losses"));
        assert_eq!(report.recommendation, FeedbackAction::DisableStrategy);
    }

    #[test]
    fn healthy_strategy_recommends_continue() {
        let journal = Arc::new(JournalStore::new());
        for _ in 0..6 {
            record(&journal, TradeSource::Live, true);
        }

        let analyzer = PerformanceAnalyzer::new(journal);
        let report = analyzer.detect_underperformance("NBB", "EURUSD");
        assert!(!report.underperforming);
        assert_eq!(report.recommendation, FeedbackAction::Continue);
    }

    #[test]
    fn snapshot_captures_period_metrics() {
        let journal = Arc::new(JournalStore::new());
        for winner in [true, false] {
            record(&journal, TradeSource::Live, winner);
        }

        let analyzer = PerformanceAnalyzer::new(journal);
        let snapshot = analyzer.create_snapshot(
            "NBB",
            "EURUSD",
            TradeSource::Live,
            Utc::now() - Duration::days(1),
            Utc::now() + Duration::days(1),
        );
        assert_eq!(snapshot.metrics.total_trades, 2);
        assert_eq!(analyzer.snapshots(10).len(), 1);
    }
}
