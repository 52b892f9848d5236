// =============================================================================
// Coordination pipeline — drives one trading cycle through its phases
// =============================================================================
//
// Execution order:
//   1. Supervisor creates the cycle and checks agent health
//   2. Strategy phase analyzes the market
//   3. Risk phase validates signals
//   4. Execution phase executes approved trades
//   5. Supervisor monitors and can HALT at any point
//
// The supervisor is the single phase-transition authority; any agent may
// request a halt, which the supervisor enforces atomically.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::coordination::agents::{AgentHandler, AgentServices};
use crate::coordination::bus::{MessageBus, MessagePriority, MessageType};
use crate::coordination::health::HealthMonitor;
use crate::coordination::shared_state::{CyclePhase, CycleState, SharedStateManager, SharedValue};
use crate::types::Mode;

/// Expiry attached to every phase command.
const PHASE_COMMAND_EXPIRY_SECONDS: i64 = 120;

/// Outcome of one coordination cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleResult {
    pub cycle_id: String,
    pub success: bool,
    pub phases_completed: Vec<String>,
    pub errors: Vec<String>,
    pub halt_reason: Option<String>,
    pub mode: Mode,
}

/// The supervisor-driven cycle executor.
pub struct CoordinationPipeline {
    bus: Arc<MessageBus>,
    shared_state: Arc<SharedStateManager>,
    health: Arc<HealthMonitor>,
    services: AgentServices,
    handlers: HashMap<&'static str, Arc<dyn AgentHandler>>,
}

impl CoordinationPipeline {
    pub fn new(
        bus: Arc<MessageBus>,
        shared_state: Arc<SharedStateManager>,
        health: Arc<HealthMonitor>,
        services: AgentServices,
        handlers: Vec<Arc<dyn AgentHandler>>,
    ) -> Self {
        let handlers = handlers
            .into_iter()
            .map(|h| (h.role().name(), h))
            .collect();
        Self {
            bus,
            shared_state,
            health,
            services,
            handlers,
        }
    }

    /// Execute one complete coordination cycle.
    pub fn execute_cycle(
        &self,
        symbol: &str,
        strategies: &[String],
        account_balance: Decimal,
        peak_balance: Decimal,
        mode: Mode,
    ) -> CycleResult {
        let active_agents: HashMap<String, String> = [
            ("supervisor", "active"),
            ("strategy", "pending"),
            ("risk", "pending"),
            ("execution", "pending"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let state = self.shared_state.create_cycle(active_agents);
        let cycle_id = state.cycle_id.clone();

        let mut result = CycleResult {
            cycle_id: cycle_id.clone(),
            success: false,
            phases_completed: Vec::new(),
            errors: Vec::new(),
            halt_reason: None,
            mode,
        };

        // Agent health gate before anything moves.
        let health_status = self.health.check_all();
        if !health_status.is_empty() {
            let unhealthy: Vec<String> = health_status
                .iter()
                .filter(|(_, healthy)| !**healthy)
                .map(|(name, _)| name.clone())
                .collect();
            if !unhealthy.is_empty() {
                let reason = format!("Unhealthy agents detected: {}", unhealthy.join(", "));
                self.shared_state.request_halt(&cycle_id, &reason, "supervisor");
                result.errors.push(reason.clone());
                result.halt_reason = Some(reason);
                return result;
            }
        }

        // Publish cycle inputs (supervisor write path).
        self.shared_state
            .write(&cycle_id, "symbol", SharedValue::Text(symbol.to_string()), "supervisor");
        self.shared_state
            .write(&cycle_id, "strategies", SharedValue::List(strategies.to_vec()), "supervisor");
        self.shared_state.write(
            &cycle_id,
            "account_balance",
            SharedValue::Number(account_balance),
            "supervisor",
        );
        self.shared_state.write(
            &cycle_id,
            "peak_balance",
            SharedValue::Number(peak_balance),
            "supervisor",
        );
        self.shared_state
            .write(&cycle_id, "mode", SharedValue::Text(mode.to_string()), "supervisor");

        let phases = [
            (CyclePhase::StrategyAnalysis, "strategy", "Analyze market and select strategies"),
            (CyclePhase::RiskValidation, "risk", "Validate signals and calculate position sizes"),
            (CyclePhase::Execution, "execution", "Execute validated trades"),
        ];

        for (phase, agent, subject) in phases {
            if !self.run_phase(&cycle_id, phase, agent, subject) {
                result.errors.push(format!("{agent} phase failed"));
                self.shared_state.complete_cycle(
                    &cycle_id,
                    json!(result),
                    Some(json!({"phase": agent})),
                );
                return result;
            }
            result.phases_completed.push(agent.to_string());

            if let Some(state) = self.shared_state.get(&cycle_id) {
                if state.halt_requested {
                    result.halt_reason = state.halt_reason;
                    return result;
                }
            }
        }

        result.success = true;
        self.shared_state
            .complete_cycle(&cycle_id, json!(result), None);
        info!(cycle_id = %cycle_id, "coordination cycle completed");

        result
    }

    /// Transition into `phase`, command the owning agent with a HIGH
    /// priority message, deliver it to the registered handler, and record
    /// the agent's heartbeat on completion.
    fn run_phase(&self, cycle_id: &str, phase: CyclePhase, agent: &str, subject: &str) -> bool {
        if !self
            .shared_state
            .transition_phase(cycle_id, phase, "supervisor")
        {
            return false;
        }

        let command = self.bus.send(
            "supervisor",
            agent,
            MessageType::Command,
            subject,
            json!({"cycle_id": cycle_id}),
            MessagePriority::High,
            Some(PHASE_COMMAND_EXPIRY_SECONDS),
        );

        let started = Instant::now();
        if let Some(handler) = self.handlers.get(agent) {
            match handler.receive_command(&command, &self.services) {
                Ok(_) => {
                    self.bus.mark_processed(command.id, None);
                }
                Err(e) => {
                    self.health.record_error(agent, &e);
                    warn!(cycle_id, agent, error = %e, "phase handler failed");
                    return false;
                }
            }
        }

        self.health
            .heartbeat(agent, started.elapsed().as_secs_f64() * 1000.0);
        self.health.record_success(agent);

        info!(cycle_id, agent, "phase completed");
        true
    }

    /// Halt a running cycle and broadcast the halt to every other agent.
    pub fn halt_cycle(&self, cycle_id: &str, reason: &str, agent: &str) {
        self.shared_state.request_halt(cycle_id, reason, agent);
        self.bus.broadcast_halt(agent, reason);
        warn!(cycle_id, agent, reason, "cycle halted");
    }

    pub fn cycle_status(&self, cycle_id: &str) -> Option<CycleState> {
        self.shared_state.get(cycle_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::agents::{
        DecisionLog, ExecutionHandler, MemoryStore, RiskHandler, StrategyHandler,
    };
    use rust_decimal_macros::dec;

    fn pipeline() -> (CoordinationPipeline, Arc<MessageBus>, Arc<SharedStateManager>, Arc<HealthMonitor>) {
        let bus = Arc::new(MessageBus::new());
        let shared = Arc::new(SharedStateManager::new());
        let health = Arc::new(HealthMonitor::new());
        let services = AgentServices {
            shared_state: shared.clone(),
            decisions: Arc::new(DecisionLog::new()),
            memory: Arc::new(MemoryStore::new()),
        };
        let handlers: Vec<Arc<dyn AgentHandler>> = vec![
            Arc::new(StrategyHandler),
            Arc::new(RiskHandler),
            Arc::new(ExecutionHandler),
        ];
        (
            CoordinationPipeline::new(bus.clone(), shared.clone(), health.clone(), services, handlers),
            bus,
            shared,
            health,
        )
    }

    #[test]
    fn cycle_completes_all_phases_in_order() {
        let (pipeline, bus, shared, _) = pipeline();

        let result = pipeline.execute_cycle(
            "EURUSD",
            &["MA".to_string()],
            dec!(10000),
            dec!(10000),
            Mode::Guide,
        );

        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.phases_completed, vec!["strategy", "risk", "execution"]);
        assert_eq!(result.mode, Mode::Guide);

        let state = shared.get(&result.cycle_id).unwrap();
        assert_eq!(state.phase, CyclePhase::Completed);
        assert_eq!(
            state.shared_data.get("symbol").and_then(|v| v.as_text()),
            Some("EURUSD")
        );
        assert_eq!(
            state.shared_data.get("account_balance").and_then(|v| v.as_number()),
            Some(dec!(10000))
        );

        // The handlers published their scoped results.
        assert!(state.shared_data.contains_key("strategy_analysis"));
        assert!(state.shared_data.contains_key("risk_review"));
        assert!(state.shared_data.contains_key("execution_gate"));

        // Each phase agent received exactly one HIGH command with an
        // expiry, now marked processed.
        for agent in ["strategy", "risk", "execution"] {
            let commands = bus.messages_for(agent, true, 10);
            assert_eq!(commands.len(), 1, "agent {agent}");
            assert_eq!(commands[0].message_type, MessageType::Command);
            assert_eq!(commands[0].priority, MessagePriority::High);
            assert!(commands[0].expires_at.is_some());
            assert!(commands[0].processed);
        }
    }

    #[test]
    fn unhealthy_agent_halts_before_any_phase() {
        let (pipeline, _, shared, health) = pipeline();
        health.initialize("strategy");
        health.record_error("strategy", "stream down");

        let result = pipeline.execute_cycle(
            "EURUSD",
            &["MA".to_string()],
            dec!(10000),
            dec!(10000),
            Mode::Guide,
        );

        assert!(!result.success);
        assert!(result.halt_reason.unwrap().contains("Unhealthy agents detected"));
        assert!(result.phases_completed.is_empty());

        let state = shared.get(&result.cycle_id).unwrap();
        assert_eq!(state.phase, CyclePhase::Halted);
    }

    #[test]
    fn halted_cycle_reports_reason_verbatim_on_refetch() {
        let (pipeline, bus, _, _) = pipeline();
        let result = pipeline.execute_cycle(
            "EURUSD",
            &["MA".to_string()],
            dec!(10000),
            dec!(10000),
            Mode::Guide,
        );

        pipeline.halt_cycle(&result.cycle_id, "manual stop", "risk");

        let state = pipeline.cycle_status(&result.cycle_id).unwrap();
        assert_eq!(state.phase, CyclePhase::Halted);
        assert_eq!(state.halt_reason.as_deref(), Some("risk: manual stop"));

        // Every other agent got the CRITICAL HALT broadcast.
        for agent in ["supervisor", "strategy", "execution"] {
            let halts = bus.receive(agent, Some(MessageType::Halt), 10);
            assert_eq!(halts.len(), 1, "agent {agent}");
            assert_eq!(halts[0].priority, MessagePriority::Critical);
        }
    }
}
