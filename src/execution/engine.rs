// =============================================================================
// Execution engine — the ONLY authorized path from a signal to a broker
// =============================================================================
//
// Validation pipeline for every signal:
//   1. Strategy approval (signal status)
//   2. Risk approval (the authoritative validator)
//   3. Mode gate (GUIDE records, AUTONOMOUS submits)
//
// GUIDE mode creates the execution record but never touches an adapter.
// Every state change appends an execution log row.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::broker::{BrokerAdapter, BrokerOrderResult, OrderRequest, OrderSide, OrderType};
use crate::error::{AppError, AppResult};
use crate::execution::orders::{BrokerType, ExecutionLog, ExecutionOrder, OrderStatus, OrderStore};
use crate::journal::writer::{JournalEntry, JournalStore};
use crate::positions::PositionStore;
use crate::risk::monitor::RiskMonitor;
use crate::risk::validator::RiskValidator;
use crate::settings::SettingsService;
use crate::signals::{Signal, SignalStatus, SignalStore};
use crate::types::{ExecutionMode, ExitReason, Mode, Side, TradeSource};

/// Reason string attached to GUIDE-blocked orders.
pub const GUIDE_BLOCKED_REASON: &str = "GUIDE mode - execution blocked";

/// Total deadline for adapter connect + submit calls.
const ADAPTER_DEADLINE: Duration = Duration::from_secs(30);

/// Balance assumed when no adapter can report one.
const FALLBACK_BALANCE: Decimal = rust_decimal_macros::dec!(100000);

/// Result of an execution attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub execution_order_id: Option<u64>,
    pub blocked_reason: Option<String>,
    pub mode: Mode,
    /// Audit row backing a risk rejection or approval.
    pub risk_decision_id: Option<u64>,
    pub broker_result: Option<BrokerOrderResult>,
}

impl ExecutionResult {
    fn blocked(mode: Mode, reason: String) -> Self {
        Self {
            success: false,
            execution_order_id: None,
            blocked_reason: Some(reason),
            mode,
            risk_decision_id: None,
            broker_result: None,
        }
    }
}

/// Central execution engine for all trade operations.
pub struct ExecutionEngine {
    signals: Arc<SignalStore>,
    validator: Arc<RiskValidator>,
    monitor: Arc<RiskMonitor>,
    orders: Arc<OrderStore>,
    positions: Arc<PositionStore>,
    journal: Arc<JournalStore>,
    settings: Arc<SettingsService>,
    brokers: RwLock<HashMap<BrokerType, Arc<dyn BrokerAdapter>>>,
}

impl ExecutionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        signals: Arc<SignalStore>,
        validator: Arc<RiskValidator>,
        monitor: Arc<RiskMonitor>,
        orders: Arc<OrderStore>,
        positions: Arc<PositionStore>,
        journal: Arc<JournalStore>,
        settings: Arc<SettingsService>,
    ) -> Self {
        Self {
            signals,
            validator,
            monitor,
            orders,
            positions,
            journal,
            settings,
            brokers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a broker adapter for a venue.
    pub fn register_broker(&self, broker_type: BrokerType, adapter: Arc<dyn BrokerAdapter>) {
        self.brokers.write().insert(broker_type, adapter);
    }

    fn broker(&self, broker_type: BrokerType) -> Option<Arc<dyn BrokerAdapter>> {
        self.brokers.read().get(&broker_type).cloned()
    }

    /// Execute a trading signal through the full validation pipeline.
    pub async fn execute_signal(
        &self,
        signal_id: u64,
        broker_type: BrokerType,
        force_mode: Option<Mode>,
    ) -> AppResult<ExecutionResult> {
        let mode = force_mode.unwrap_or_else(|| self.settings.mode());

        // Step 1: load the signal.
        let signal = self
            .signals
            .get(signal_id)
            .ok_or_else(|| AppError::NotFound(format!("Signal {signal_id} not found")))?;

        // Step 2: strategy approval.
        if let Err(reason) = self.check_strategy_approval(&signal) {
            info!(signal_id, reason = %reason, "execution blocked before order creation");
            return Ok(ExecutionResult::blocked(mode, format!("Strategy rejected: {reason}")));
        }

        // Step 3: risk approval against the adapter's account snapshot.
        let (balance, peak) = self.account_snapshot(broker_type).await;
        let verdict = self.validator.validate(&signal, balance, peak);
        if !verdict.approved {
            let reason = verdict
                .rejection_reason
                .unwrap_or_else(|| "risk validation failed".to_string());
            warn!(signal_id, reason = %reason, "execution blocked by risk validator");
            return Ok(ExecutionResult {
                risk_decision_id: Some(verdict.decision_id),
                ..ExecutionResult::blocked(mode, format!("Risk rejected: {reason}"))
            });
        }

        // Step 4: create the execution order record.
        let client_order_id = format!(
            "FX-{}-{}",
            signal.id,
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let order = self.orders.create(
            client_order_id,
            broker_type,
            signal.symbol.clone(),
            OrderType::Limit,
            match signal.side {
                Side::Long => OrderSide::Buy,
                Side::Short => OrderSide::Sell,
            },
            verdict.position_size,
            Some(signal.entry_price),
            Some(signal.stop_loss),
            Some(signal.take_profit),
            Some(signal.id),
            signal.strategy_name.clone(),
        )?;

        // Step 5: mode gate. GUIDE records the decision and stops.
        if mode == Mode::Guide {
            self.orders.update(order.id, |o| {
                o.status = OrderStatus::Rejected;
                o.error_message = Some(GUIDE_BLOCKED_REASON.to_string());
            });
            self.orders.log_event(
                order.id,
                "MODE_BLOCKED",
                json!({"details": "GUIDE mode active - trade recorded but not executed"}),
                Some(OrderStatus::Pending),
                Some(OrderStatus::Rejected),
            );

            return Ok(ExecutionResult {
                success: true,
                execution_order_id: Some(order.id),
                blocked_reason: Some(GUIDE_BLOCKED_REASON.to_string()),
                mode,
                risk_decision_id: Some(verdict.decision_id),
                broker_result: None,
            });
        }

        // Step 6: AUTONOMOUS. The adapter must exist and be connected.
        let adapter = match self.broker(broker_type) {
            Some(adapter) => adapter,
            None => {
                let reason = format!("Broker {broker_type} not configured");
                self.orders.update(order.id, |o| {
                    o.status = OrderStatus::Rejected;
                    o.error_message = Some(reason.clone());
                });
                return Ok(ExecutionResult {
                    success: false,
                    execution_order_id: Some(order.id),
                    blocked_reason: Some(reason),
                    mode,
                    risk_decision_id: Some(verdict.decision_id),
                    broker_result: None,
                });
            }
        };

        if !adapter.is_connected() {
            match tokio::time::timeout(ADAPTER_DEADLINE, adapter.connect()).await {
                Ok(true) => {}
                _ => {
                    let reason = format!("Broker {broker_type} connection failed");
                    self.orders.update(order.id, |o| {
                        o.status = OrderStatus::Failed;
                        o.error_message = Some(reason.clone());
                    });
                    return Ok(ExecutionResult {
                        success: false,
                        execution_order_id: Some(order.id),
                        blocked_reason: Some(reason),
                        mode,
                        risk_decision_id: Some(verdict.decision_id),
                        broker_result: None,
                    });
                }
            }
        }

        let request = OrderRequest {
            symbol: signal.symbol.clone(),
            side: order.side,
            order_type: OrderType::Limit,
            quantity: verdict.position_size,
            limit_price: Some(signal.entry_price),
            stop_price: None,
            stop_loss: Some(signal.stop_loss),
            take_profit: Some(signal.take_profit),
            client_order_id: Some(order.client_order_id.clone()),
        };

        self.orders.update(order.id, |o| {
            o.status = OrderStatus::Submitted;
            o.submitted_at = Some(chrono::Utc::now());
        });
        self.orders.log_event(
            order.id,
            "SUBMITTED",
            json!({"details": format!("Order submitted to {broker_type}")}),
            Some(OrderStatus::Pending),
            Some(OrderStatus::Submitted),
        );

        let broker_result = match tokio::time::timeout(
            ADAPTER_DEADLINE,
            adapter.submit_order(&request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                let reason = format!(
                    "Broker submit timed out after {}s",
                    ADAPTER_DEADLINE.as_secs()
                );
                self.orders.update(order.id, |o| {
                    o.status = OrderStatus::Failed;
                    o.error_message = Some(reason.clone());
                });
                self.orders.log_event(
                    order.id,
                    "TIMEOUT",
                    json!({"details": reason}),
                    Some(OrderStatus::Submitted),
                    Some(OrderStatus::Failed),
                );
                return Err(AppError::Timeout(reason));
            }
        };

        // Step 7: interpret the venue's answer.
        if broker_result.success && broker_result.filled_price.is_some() {
            let filled_price = broker_result.filled_price.expect("checked above");
            let filled_quantity = broker_result.filled_quantity.unwrap_or(order.quantity);

            self.orders.update(order.id, |o| {
                o.status = OrderStatus::Filled;
                o.broker_order_id = broker_result.broker_order_id.clone();
                o.average_fill_price = Some(filled_price);
                o.filled_quantity = filled_quantity;
                o.filled_at = Some(chrono::Utc::now());
            });
            self.orders.log_event(
                order.id,
                "FILLED",
                json!({"details": format!("Order filled at {filled_price}")}),
                Some(OrderStatus::Submitted),
                Some(OrderStatus::Filled),
            );

            self.signals.set_status(signal.id, SignalStatus::Executed);

            // Open the durable position feeding risk and journal.
            let position = self.positions.open_position(
                &signal.strategy_name,
                &signal.symbol,
                signal.side,
                filled_price,
                filled_quantity,
                signal.stop_loss,
                signal.take_profit,
                broker_result.commission.unwrap_or(Decimal::ZERO),
            );
            self.monitor
                .update_strategy_budget(&signal.strategy_name, &signal.symbol, &position, false);
        } else if broker_result.success {
            self.orders.update(order.id, |o| {
                o.status = OrderStatus::Pending;
                o.broker_order_id = broker_result.broker_order_id.clone();
            });
            self.orders.log_event(
                order.id,
                "PENDING",
                json!({
                    "details": broker_result
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "Order pending fill".to_string())
                }),
                Some(OrderStatus::Submitted),
                Some(OrderStatus::Pending),
            );
        } else {
            self.orders.update(order.id, |o| {
                o.status = OrderStatus::Rejected;
                o.error_message = broker_result.error_message.clone();
            });
            self.orders.log_event(
                order.id,
                "BROKER_REJECTED",
                json!({
                    "details": broker_result
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "Broker rejected order".to_string())
                }),
                Some(OrderStatus::Submitted),
                Some(OrderStatus::Rejected),
            );
        }

        Ok(ExecutionResult {
            success: broker_result.success,
            execution_order_id: Some(order.id),
            blocked_reason: if broker_result.success {
                None
            } else {
                broker_result.error_message.clone()
            },
            mode,
            risk_decision_id: Some(verdict.decision_id),
            broker_result: Some(broker_result),
        })
    }

    /// Cancel a pending execution order. A terminal order cannot be
    /// cancelled and reports failure.
    pub async fn cancel_order(&self, execution_order_id: u64) -> AppResult<ExecutionResult> {
        let mode = self.settings.mode();
        let order = self
            .orders
            .get(execution_order_id)
            .ok_or_else(|| AppError::NotFound(format!("Order {execution_order_id} not found")))?;

        if !matches!(order.status, OrderStatus::Pending | OrderStatus::Submitted) {
            return Ok(ExecutionResult {
                success: false,
                execution_order_id: Some(order.id),
                blocked_reason: Some(format!("Cannot cancel order with status {}", order.status)),
                mode,
                risk_decision_id: None,
                broker_result: None,
            });
        }

        if let Some(broker_order_id) = &order.broker_order_id {
            if let Some(adapter) = self.broker(order.broker_type) {
                let broker_result = adapter.cancel_order(broker_order_id).await;
                if !broker_result.success {
                    return Ok(ExecutionResult {
                        success: false,
                        execution_order_id: Some(order.id),
                        blocked_reason: broker_result.error_message.clone(),
                        mode,
                        risk_decision_id: None,
                        broker_result: Some(broker_result),
                    });
                }
            }
        }

        let old_status = order.status;
        self.orders.update(order.id, |o| {
            o.status = OrderStatus::Cancelled;
        });
        self.orders.log_event(
            order.id,
            "CANCELLED",
            json!({"details": "Order cancelled by user"}),
            Some(old_status),
            Some(OrderStatus::Cancelled),
        );

        Ok(ExecutionResult {
            success: true,
            execution_order_id: Some(order.id),
            blocked_reason: None,
            mode,
            risk_decision_id: None,
            broker_result: None,
        })
    }

    pub fn order_status(&self, execution_order_id: u64) -> Option<ExecutionOrder> {
        self.orders.get(execution_order_id)
    }

    pub fn execution_logs(&self, execution_order_id: u64) -> Vec<ExecutionLog> {
        self.orders.logs_for(execution_order_id)
    }

    /// Close a durable position: realize PnL, roll the strategy budget, and
    /// journal the completed trade.
    pub fn close_position(
        &self,
        position_id: &str,
        exit_price: Decimal,
        reason: ExitReason,
        close_commission: Decimal,
    ) -> AppResult<JournalEntry> {
        let closed = self
            .positions
            .close_position(position_id, exit_price, reason, close_commission)
            .ok_or_else(|| AppError::NotFound(format!("Position {position_id} not found")))?;

        self.monitor.update_strategy_budget(
            &closed.strategy_name,
            &closed.symbol,
            &closed,
            true,
        );

        let source = match self.settings.execution_mode() {
            ExecutionMode::Live => TradeSource::Live,
            ExecutionMode::Simulation | ExecutionMode::Paper => TradeSource::Paper,
        };

        self.journal.record_trade(
            source,
            &closed,
            json!({}),
            &closed.id[..8.min(closed.id.len())],
            json!({}),
            "1h",
            None,
            None,
        )
    }

    fn check_strategy_approval(&self, signal: &Signal) -> Result<(), String> {
        match signal.status {
            SignalStatus::Cancelled => Err("Signal was cancelled".to_string()),
            SignalStatus::Expired => Err("Signal has expired".to_string()),
            SignalStatus::Executed => Err("Signal already executed".to_string()),
            SignalStatus::Pending => {
                if signal.is_expired(chrono::Utc::now()) {
                    self.signals.set_status(signal.id, SignalStatus::Expired);
                    Err("Signal has expired".to_string())
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Balance and peak for risk validation, read from the venue when one
    /// is registered.
    async fn account_snapshot(&self, broker_type: BrokerType) -> (Decimal, Decimal) {
        let balance = match self.broker(broker_type) {
            Some(adapter) => match adapter.get_account_info().await {
                Ok(info) => info.balance,
                Err(_) => FALLBACK_BALANCE,
            },
            None => FALLBACK_BALANCE,
        };
        let peak = self.monitor.account_state().peak_balance.max(balance);
        (balance, peak)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::simulated::SimulatedBroker;
    use crate::signals::NewSignal;
    use rust_decimal_macros::dec;

    struct Fixture {
        engine: ExecutionEngine,
        signals: Arc<SignalStore>,
        orders: Arc<OrderStore>,
        broker: Arc<SimulatedBroker>,
        settings: Arc<SettingsService>,
        positions: Arc<PositionStore>,
        journal: Arc<JournalStore>,
        monitor: Arc<RiskMonitor>,
    }

    fn fixture() -> Fixture {
        let signals = Arc::new(SignalStore::new());
        let positions = Arc::new(PositionStore::new());
        let monitor = Arc::new(RiskMonitor::new(positions.clone()));
        let validator = Arc::new(RiskValidator::new(monitor.clone()));
        let orders = Arc::new(OrderStore::new());
        let journal = Arc::new(JournalStore::new());
        let health = Arc::new(crate::coordination::health::HealthMonitor::new());
        let settings = Arc::new(SettingsService::new(health, monitor.clone(), None));

        let broker = Arc::new(SimulatedBroker::new("tester", Some(42)));
        broker
            .update_settings(None, Some(Decimal::ZERO), Some(dec!(7.0)), Some(0), Some(1.0))
            .unwrap();

        let engine = ExecutionEngine::new(
            signals.clone(),
            validator,
            monitor.clone(),
            orders.clone(),
            positions.clone(),
            journal.clone(),
            settings.clone(),
        );
        engine.register_broker(BrokerType::Simulation, broker.clone());

        Fixture {
            engine,
            signals,
            orders,
            broker,
            settings,
            positions,
            journal,
            monitor,
        }
    }

    fn pending_signal(fixture: &Fixture) -> crate::signals::Signal {
        fixture.signals.insert(NewSignal {
            strategy_name: "NBB".to_string(),
            symbol: "EURUSD".to_string(),
            side: Side::Long,
            entry_price: dec!(1.1000),
            stop_loss: dec!(1.0950),
            take_profit: dec!(1.1150),
            risk_percent: dec!(2.0),
            timeframe: None,
            expires_at: None,
        })
    }

    #[tokio::test]
    async fn guide_mode_blocks_submission_but_reports_success() {
        let fixture = fixture();
        fixture.broker.set_mid_price("EURUSD", dec!(1.1000), dec!(2));
        let signal = pending_signal(&fixture);

        let result = fixture
            .engine
            .execute_signal(signal.id, BrokerType::Simulation, None)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.mode, Mode::Guide);
        assert_eq!(result.blocked_reason.as_deref(), Some(GUIDE_BLOCKED_REASON));

        let order = fixture.orders.get(result.execution_order_id.unwrap()).unwrap();
        assert_eq!(order.status, OrderStatus::Rejected);
        assert_eq!(order.error_message.as_deref(), Some(GUIDE_BLOCKED_REASON));

        // No submission reached the venue.
        assert!(fixture.broker.positions_snapshot().is_empty());
        assert_eq!(fixture.broker.account_snapshot().total_trades, 0);
    }

    #[tokio::test]
    async fn autonomous_mode_submits_and_opens_position() {
        let fixture = fixture();
        fixture.broker.set_mid_price("EURUSD", dec!(1.1000), dec!(0));
        let signal = pending_signal(&fixture);

        let result = fixture
            .engine
            .execute_signal(signal.id, BrokerType::Simulation, Some(Mode::Autonomous))
            .await
            .unwrap();

        assert!(result.success, "{:?}", result.blocked_reason);
        let order = fixture.orders.get(result.execution_order_id.unwrap()).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(order.average_fill_price.is_some());
        assert!(order.filled_quantity > Decimal::ZERO);

        // The signal transitioned and a durable position opened.
        assert_eq!(
            fixture.signals.get(signal.id).unwrap().status,
            SignalStatus::Executed
        );
        assert_eq!(fixture.positions.open_count(), 1);

        let logs = fixture.engine.execution_logs(order.id);
        let events: Vec<&str> = logs.iter().map(|l| l.event_type.as_str()).collect();
        assert_eq!(events, vec!["SUBMITTED", "FILLED"]);
    }

    #[tokio::test]
    async fn risk_rejection_blocks_before_order_creation() {
        let fixture = fixture();
        fixture.broker.set_mid_price("EURUSD", dec!(1.1000), dec!(0));

        // Zero stop distance fails sizing.
        let signal = fixture.signals.insert(NewSignal {
            strategy_name: "NBB".to_string(),
            symbol: "EURUSD".to_string(),
            side: Side::Long,
            entry_price: dec!(1.1000),
            stop_loss: dec!(1.1000),
            take_profit: dec!(1.1150),
            risk_percent: dec!(2.0),
            timeframe: None,
            expires_at: None,
        });

        let result = fixture
            .engine
            .execute_signal(signal.id, BrokerType::Simulation, None)
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.blocked_reason.unwrap().starts_with("Risk rejected:"));
        assert!(result.execution_order_id.is_none());
        assert!(result.risk_decision_id.is_some());
    }

    #[tokio::test]
    async fn missing_signal_is_not_found() {
        let fixture = fixture();
        let err = fixture
            .engine
            .execute_signal(999, BrokerType::Simulation, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NotFoundError");
    }

    #[tokio::test]
    async fn executed_signal_cannot_run_twice() {
        let fixture = fixture();
        fixture.broker.set_mid_price("EURUSD", dec!(1.1000), dec!(0));
        let signal = pending_signal(&fixture);

        fixture
            .engine
            .execute_signal(signal.id, BrokerType::Simulation, Some(Mode::Autonomous))
            .await
            .unwrap();
        let result = fixture
            .engine
            .execute_signal(signal.id, BrokerType::Simulation, Some(Mode::Autonomous))
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result
            .blocked_reason
            .unwrap()
            .contains("Signal already executed"));
    }

    #[tokio::test]
    async fn unconfigured_broker_rejects_order() {
        let fixture = fixture();
        fixture.broker.set_mid_price("EURUSD", dec!(1.1000), dec!(0));
        let signal = pending_signal(&fixture);

        let result = fixture
            .engine
            .execute_signal(signal.id, BrokerType::Oanda, Some(Mode::Autonomous))
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.blocked_reason.unwrap().contains("not configured"));
        let order = fixture.orders.get(result.execution_order_id.unwrap()).unwrap();
        assert_eq!(order.status, OrderStatus::Rejected);
    }

    #[tokio::test]
    async fn cancel_after_fill_is_a_failing_no_op() {
        let fixture = fixture();
        fixture.broker.set_mid_price("EURUSD", dec!(1.1000), dec!(0));
        let signal = pending_signal(&fixture);

        let result = fixture
            .engine
            .execute_signal(signal.id, BrokerType::Simulation, Some(Mode::Autonomous))
            .await
            .unwrap();
        let order_id = result.execution_order_id.unwrap();

        let cancel = fixture.engine.cancel_order(order_id).await.unwrap();
        assert!(!cancel.success);
        assert!(cancel
            .blocked_reason
            .unwrap()
            .contains("Cannot cancel order with status filled"));
    }

    #[tokio::test]
    async fn close_position_journals_the_trade() {
        let fixture = fixture();
        fixture.broker.set_mid_price("EURUSD", dec!(1.1000), dec!(0));
        let signal = pending_signal(&fixture);

        fixture
            .engine
            .execute_signal(signal.id, BrokerType::Simulation, Some(Mode::Autonomous))
            .await
            .unwrap();
        let position = &fixture.positions.open_positions()[0];

        let entry = fixture
            .engine
            .close_position(&position.id, dec!(1.1150), ExitReason::Tp, dec!(0.70))
            .unwrap();

        assert!(entry.is_winner);
        assert_eq!(entry.exit_reason, ExitReason::Tp);
        assert_eq!(fixture.journal.len(), 1);
        assert_eq!(fixture.positions.open_count(), 0);

        // The strategy budget saw the winning close.
        let budget = fixture.monitor.budget("NBB", "EURUSD");
        assert_eq!(budget.consecutive_losses, 0);
        assert_eq!(budget.winning_trades, 1);
    }

    #[tokio::test]
    async fn guide_block_still_records_approved_risk_decision() {
        let fixture = fixture();
        fixture.broker.set_mid_price("EURUSD", dec!(1.1000), dec!(2));
        let signal = pending_signal(&fixture);

        fixture
            .engine
            .execute_signal(signal.id, BrokerType::Simulation, None)
            .await
            .unwrap();

        // settings.mode() defaults to GUIDE; the risk decision row exists
        // and is approved.
        assert_eq!(fixture.settings.mode(), Mode::Guide);
    }
}
