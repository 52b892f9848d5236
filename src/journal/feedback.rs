// =============================================================================
// Feedback loop — rule-based: analyze, log the decision, act
// =============================================================================
//
// Deterministic and auditable. Every decision is persisted; the executed
// flag and result string are stamped when the side effect completes. No
// decision is replayed automatically, and no action here ever submits an
// order to a broker.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::journal::analyzer::{FeedbackAction, PerformanceAnalyzer, UnderperformanceReport};
use crate::risk::monitor::RiskMonitor;

/// Audit row for one feedback decision.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackDecision {
    pub id: u64,
    pub decision_type: FeedbackAction,
    pub strategy_name: String,
    pub symbol: String,
    pub analysis: serde_json::Value,
    pub action_taken: String,
    pub action_params: Option<serde_json::Value>,
    pub executed: bool,
    pub execution_result: Option<String>,
    pub decision_time: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

/// Result of one feedback cycle.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackOutcome {
    pub action: FeedbackAction,
    pub decision_id: Option<u64>,
    pub execution_result: Option<String>,
    pub underperformance: UnderperformanceReport,
}

/// Batch feedback summary.
#[derive(Debug, Clone, Serialize)]
pub struct BatchFeedbackResult {
    pub total_analyzed: usize,
    pub actions_taken: usize,
    pub actions: Vec<serde_json::Value>,
    pub details: serde_json::Value,
}

/// The rule-based feedback loop closing the journal back into strategy
/// selection.
pub struct FeedbackLoop {
    analyzer: Arc<PerformanceAnalyzer>,
    monitor: Arc<RiskMonitor>,
    decisions: RwLock<Vec<FeedbackDecision>>,
    next_id: AtomicU64,
}

impl FeedbackLoop {
    pub fn new(analyzer: Arc<PerformanceAnalyzer>, monitor: Arc<RiskMonitor>) -> Self {
        Self {
            analyzer,
            monitor,
            decisions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Run one feedback cycle for a strategy: analyze, log, act.
    pub fn run_cycle(&self, strategy_name: &str, symbol: &str) -> FeedbackOutcome {
        info!(strategy = strategy_name, symbol, "running feedback cycle");

        let report = self.analyzer.detect_underperformance(strategy_name, symbol);

        if !report.underperforming {
            info!(strategy = strategy_name, symbol, "performance within acceptable range");
            return FeedbackOutcome {
                action: FeedbackAction::Continue,
                decision_id: None,
                execution_result: None,
                underperformance: report,
            };
        }

        let recommendation = report.recommendation;
        let decision_id = self.log_decision(strategy_name, symbol, &report, recommendation);
        let execution_result =
            self.execute_action(decision_id, strategy_name, symbol, recommendation);

        FeedbackOutcome {
            action: recommendation,
            decision_id: Some(decision_id),
            execution_result: Some(execution_result),
            underperformance: report,
        }
    }

    /// Run feedback over multiple (strategy, symbol) pairs.
    pub fn run_batch(&self, pairs: &[(String, String)]) -> BatchFeedbackResult {
        let mut details = serde_json::Map::new();
        let mut actions: Vec<serde_json::Value> = Vec::new();

        for (strategy_name, symbol) in pairs {
            let outcome = self.run_cycle(strategy_name, symbol);
            if outcome.action != FeedbackAction::Continue {
                actions.push(json!({
                    "strategy": strategy_name,
                    "symbol": symbol,
                    "action": outcome.action,
                }));
            }
            details.insert(format!("{strategy_name}:{symbol}"), json!(outcome));
        }

        BatchFeedbackResult {
            total_analyzed: pairs.len(),
            actions_taken: actions.len(),
            actions,
            details: serde_json::Value::Object(details),
        }
    }

    /// Decision history, newest first, optionally filtered.
    pub fn decisions(
        &self,
        strategy_name: Option<&str>,
        symbol: Option<&str>,
        limit: usize,
    ) -> Vec<FeedbackDecision> {
        let decisions = self.decisions.read();
        decisions
            .iter()
            .rev()
            .filter(|d| {
                strategy_name.map(|s| d.strategy_name == s).unwrap_or(true)
                    && symbol.map(|s| d.symbol == s).unwrap_or(true)
            })
            .take(limit)
            .cloned()
            .collect()
    }

    fn log_decision(
        &self,
        strategy_name: &str,
        symbol: &str,
        report: &UnderperformanceReport,
        recommendation: FeedbackAction,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.decisions.write().push(FeedbackDecision {
            id,
            decision_type: recommendation,
            strategy_name: strategy_name.to_string(),
            symbol: symbol.to_string(),
            analysis: json!(report),
            action_taken: format!("Recommendation: {recommendation}"),
            action_params: None,
            executed: false,
            execution_result: None,
            decision_time: Utc::now(),
            executed_at: None,
        });

        info!(decision_id = id, recommendation = %recommendation, "feedback decision logged");
        id
    }

    fn execute_action(
        &self,
        decision_id: u64,
        strategy_name: &str,
        symbol: &str,
        recommendation: FeedbackAction,
    ) -> String {
        let (result, params) = match recommendation {
            FeedbackAction::TriggerOptimization => {
                // Records the recommended job parameterization only; the
                // optimization service owns job creation.
                let result = format!(
                    "Optimization recommended for {strategy_name} on {symbol}. \
                     Create an optimization job via the optimization service."
                );
                let params = json!({
                    "recommended_action": "create_optimization_job",
                    "strategy_name": strategy_name,
                    "symbol": symbol,
                });
                info!(strategy = strategy_name, symbol, "optimization recommended");
                (result, params)
            }
            FeedbackAction::DisableStrategy => {
                let disabled = self.monitor.disable_strategy(
                    strategy_name,
                    symbol,
                    "Feedback loop: underperformance detected",
                );
                let result = if disabled {
                    format!("Strategy {strategy_name} disabled in risk budget for {symbol}")
                } else {
                    format!("Risk budget not found for {strategy_name} on {symbol}")
                };
                let params = json!({
                    "action_taken": "disable_strategy",
                    "strategy_name": strategy_name,
                    "symbol": symbol,
                    "budget_found": disabled,
                });
                warn!(strategy = strategy_name, symbol, "strategy disabled for underperformance");
                (result, params)
            }
            FeedbackAction::MonitorClosely => {
                let result = "Monitoring enabled - no immediate action taken".to_string();
                let params = json!({
                    "action_taken": "monitor_closely",
                    "note": "Strategy flagged for close monitoring",
                });
                (result, params)
            }
            FeedbackAction::Continue => ("No action required".to_string(), json!({})),
        };

        let mut decisions = self.decisions.write();
        if let Some(decision) = decisions.iter_mut().find(|d| d.id == decision_id) {
            decision.executed = true;
            decision.executed_at = Some(Utc::now());
            decision.execution_result = Some(result.clone());
            decision.action_params = Some(params);
        }

        result
    }
}
