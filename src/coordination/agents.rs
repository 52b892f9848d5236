// =============================================================================
// Agent capability contract — plain handlers the coordinator invokes
// =============================================================================
//
// An agent is a role plus the operations the supervisor calls on it:
// receive_command, report_health, and scoped shared-data writes. Decision
// logging and learning memory are helper services injected by identity, not
// inherited behavior.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::coordination::bus::AgentMessage;
use crate::coordination::shared_state::{SharedStateManager, SharedValue};
use crate::risk::constants::HardCaps;

/// Roles participating in a coordination cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Supervisor,
    Strategy,
    Risk,
    Execution,
}

impl AgentRole {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Supervisor => "supervisor",
            Self::Strategy => "strategy",
            Self::Risk => "risk",
            Self::Execution => "execution",
        }
    }
}

/// One logged agent decision with its reasoning and context.
#[derive(Debug, Clone, Serialize)]
pub struct AgentDecision {
    pub id: u64,
    pub agent: AgentRole,
    pub decision_type: String,
    pub decision: String,
    pub reasoning: String,
    pub context: serde_json::Value,
    pub executed: bool,
    pub decision_time: DateTime<Utc>,
}

/// Append-only log of agent decisions with full reasoning.
pub struct DecisionLog {
    decisions: RwLock<Vec<AgentDecision>>,
    next_id: AtomicU64,
}

impl DecisionLog {
    pub fn new() -> Self {
        Self {
            decisions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn log(
        &self,
        agent: AgentRole,
        decision_type: &str,
        decision: &str,
        reasoning: &str,
        context: serde_json::Value,
        executed: bool,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.decisions.write().push(AgentDecision {
            id,
            agent,
            decision_type: decision_type.to_string(),
            decision: decision.to_string(),
            reasoning: reasoning.to_string(),
            context,
            executed,
            decision_time: Utc::now(),
        });

        if executed {
            info!(agent = agent.name(), decision_type, decision, "agent decision");
        } else {
            debug!(agent = agent.name(), decision_type, decision, "agent decision");
        }
        id
    }

    /// Recent decisions, newest first, optionally filtered by agent.
    pub fn recent(&self, agent: Option<AgentRole>, limit: usize) -> Vec<AgentDecision> {
        let decisions = self.decisions.read();
        decisions
            .iter()
            .rev()
            .filter(|d| agent.map(|a| d.agent == a).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for DecisionLog {
    fn default() -> Self {
        Self::new()
    }
}

/// One learned memory sample for an agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentMemory {
    pub agent: AgentRole,
    pub memory_type: String,
    pub memory_key: String,
    pub data: serde_json::Value,
    pub confidence: f64,
    pub sample_count: u64,
    pub last_updated: DateTime<Utc>,
}

/// Keyed learning memory, upserted per (agent, type, key).
pub struct MemoryStore {
    memories: RwLock<Vec<AgentMemory>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            memories: RwLock::new(Vec::new()),
        }
    }

    /// Store or update a memory; repeat stores bump the sample count.
    pub fn store(
        &self,
        agent: AgentRole,
        memory_type: &str,
        memory_key: &str,
        data: serde_json::Value,
        confidence: f64,
    ) {
        let mut memories = self.memories.write();
        match memories.iter_mut().find(|m| {
            m.agent == agent && m.memory_type == memory_type && m.memory_key == memory_key
        }) {
            Some(memory) => {
                memory.data = data;
                memory.confidence = confidence;
                memory.sample_count += 1;
                memory.last_updated = Utc::now();
            }
            None => memories.push(AgentMemory {
                agent,
                memory_type: memory_type.to_string(),
                memory_key: memory_key.to_string(),
                data,
                confidence,
                sample_count: 1,
                last_updated: Utc::now(),
            }),
        }
    }

    pub fn recall(
        &self,
        agent: AgentRole,
        memory_type: &str,
        memory_key: &str,
    ) -> Option<serde_json::Value> {
        self.memories
            .read()
            .iter()
            .find(|m| {
                m.agent == agent && m.memory_type == memory_type && m.memory_key == memory_key
            })
            .map(|m| m.data.clone())
    }

    pub fn recall_all(&self, agent: AgentRole, memory_type: &str) -> Vec<AgentMemory> {
        self.memories
            .read()
            .iter()
            .filter(|m| m.agent == agent && m.memory_type == memory_type)
            .cloned()
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper services handed to every handler, injected by identity.
pub struct AgentServices {
    pub shared_state: Arc<SharedStateManager>,
    pub decisions: Arc<DecisionLog>,
    pub memory: Arc<MemoryStore>,
}

/// The operations the coordinator invokes on a phase-owning agent.
pub trait AgentHandler: Send + Sync {
    fn role(&self) -> AgentRole;

    /// Process one COMMAND from the bus. Results land in the cycle
    /// scratchpad under the agent's own key prefix.
    fn receive_command(
        &self,
        command: &AgentMessage,
        services: &AgentServices,
    ) -> Result<serde_json::Value, String>;

    fn report_health(&self) -> bool {
        true
    }
}

fn command_cycle_id(command: &AgentMessage) -> Result<String, String> {
    command
        .payload
        .get("cycle_id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| "command payload missing cycle_id".to_string())
}

/// Strategy analysis handler. The actual indicator math lives in external
/// producers; this handler acknowledges the phase and publishes which
/// strategies the cycle considers.
pub struct StrategyHandler;

impl AgentHandler for StrategyHandler {
    fn role(&self) -> AgentRole {
        AgentRole::Strategy
    }

    fn receive_command(
        &self,
        command: &AgentMessage,
        services: &AgentServices,
    ) -> Result<serde_json::Value, String> {
        let cycle_id = command_cycle_id(command)?;

        let symbol = services
            .shared_state
            .read(&cycle_id, "symbol")
            .and_then(|v| v.as_text().map(str::to_string))
            .ok_or_else(|| "cycle is missing its symbol".to_string())?;
        let strategies = services
            .shared_state
            .read(&cycle_id, "strategies")
            .and_then(|v| v.as_list().map(<[String]>::to_vec))
            .unwrap_or_default();

        let summary = json!({
            "symbol": symbol,
            "strategies_considered": strategies,
        });
        if !services.shared_state.write(
            &cycle_id,
            "strategy_analysis",
            SharedValue::Json(summary.clone()),
            self.role().name(),
        ) {
            return Err("scoped write refused".to_string());
        }

        services.decisions.log(
            self.role(),
            "strategy_analysis",
            &format!("Analyzed {symbol} across {} strategies", strategies.len()),
            "Phase command from supervisor; candidate set published to shared state",
            json!({"cycle_id": cycle_id, "strategies": strategies}),
            true,
        );
        services.memory.store(
            self.role(),
            "cycle_symbols",
            &symbol,
            json!({"last_cycle_id": cycle_id}),
            0.5,
        );

        Ok(summary)
    }
}

/// Risk validation handler. Signals are admitted one-by-one through the
/// validator at execution time; the phase records the ceilings in force.
pub struct RiskHandler;

impl AgentHandler for RiskHandler {
    fn role(&self) -> AgentRole {
        AgentRole::Risk
    }

    fn receive_command(
        &self,
        command: &AgentMessage,
        services: &AgentServices,
    ) -> Result<serde_json::Value, String> {
        let cycle_id = command_cycle_id(command)?;

        let balance = services
            .shared_state
            .read(&cycle_id, "account_balance")
            .and_then(|v| v.as_number())
            .ok_or_else(|| "cycle is missing account_balance".to_string())?;

        let review = json!({
            "account_balance": balance,
            "hard_caps": HardCaps::snapshot(),
        });
        if !services.shared_state.write(
            &cycle_id,
            "risk_review",
            SharedValue::Json(review.clone()),
            self.role().name(),
        ) {
            return Err("scoped write refused".to_string());
        }

        services.decisions.log(
            self.role(),
            "risk_review",
            "Ceilings published for the execution phase",
            "Per-signal admission happens in the validator; the phase pins the limits snapshot",
            json!({"cycle_id": cycle_id}),
            true,
        );

        Ok(review)
    }
}

/// Execution handler. Records whether the current mode permits broker
/// submission; actual submissions go through the execution engine only.
pub struct ExecutionHandler;

impl AgentHandler for ExecutionHandler {
    fn role(&self) -> AgentRole {
        AgentRole::Execution
    }

    fn receive_command(
        &self,
        command: &AgentMessage,
        services: &AgentServices,
    ) -> Result<serde_json::Value, String> {
        let cycle_id = command_cycle_id(command)?;

        let mode = services
            .shared_state
            .read(&cycle_id, "mode")
            .and_then(|v| v.as_text().map(str::to_string))
            .ok_or_else(|| "cycle is missing its mode".to_string())?;
        let submission_permitted = mode == "autonomous";

        let gate = json!({
            "mode": mode,
            "submission_permitted": submission_permitted,
        });
        if !services.shared_state.write(
            &cycle_id,
            "execution_gate",
            SharedValue::Json(gate.clone()),
            self.role().name(),
        ) {
            return Err("scoped write refused".to_string());
        }

        services.decisions.log(
            self.role(),
            "mode_gate",
            if submission_permitted {
                "Submission permitted for this cycle"
            } else {
                "GUIDE mode: decisions recorded, no submission"
            },
            "Mode read from the cycle scratchpad published by the supervisor",
            json!({"cycle_id": cycle_id, "mode": mode}),
            true,
        );

        Ok(gate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::bus::{MessageBus, MessagePriority, MessageType};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn services() -> AgentServices {
        AgentServices {
            shared_state: Arc::new(SharedStateManager::new()),
            decisions: Arc::new(DecisionLog::new()),
            memory: Arc::new(MemoryStore::new()),
        }
    }

    fn seeded_cycle(services: &AgentServices) -> String {
        let cycle = services.shared_state.create_cycle(HashMap::new());
        services.shared_state.write(
            &cycle.cycle_id,
            "symbol",
            SharedValue::Text("EURUSD".to_string()),
            "supervisor",
        );
        services.shared_state.write(
            &cycle.cycle_id,
            "strategies",
            SharedValue::List(vec!["MA".to_string()]),
            "supervisor",
        );
        services.shared_state.write(
            &cycle.cycle_id,
            "account_balance",
            SharedValue::Number(dec!(10000)),
            "supervisor",
        );
        services.shared_state.write(
            &cycle.cycle_id,
            "mode",
            SharedValue::Text("guide".to_string()),
            "supervisor",
        );
        cycle.cycle_id
    }

    fn command_for(bus: &MessageBus, agent: &str, cycle_id: &str) -> AgentMessage {
        bus.send(
            "supervisor",
            agent,
            MessageType::Command,
            "phase command",
            serde_json::json!({"cycle_id": cycle_id}),
            MessagePriority::High,
            Some(120),
        )
    }

    #[test]
    fn strategy_handler_writes_scoped_analysis() {
        let services = services();
        let cycle_id = seeded_cycle(&services);
        let bus = MessageBus::new();
        let command = command_for(&bus, "strategy", &cycle_id);

        let result = StrategyHandler.receive_command(&command, &services).unwrap();
        assert_eq!(result["symbol"], "EURUSD");

        let stored = services.shared_state.read(&cycle_id, "strategy_analysis");
        assert!(matches!(stored, Some(SharedValue::Json(_))));
        assert_eq!(services.decisions.recent(Some(AgentRole::Strategy), 10).len(), 1);

        // Memory upserts bump the sample count.
        StrategyHandler.receive_command(&command, &services).unwrap();
        let memories = services.memory.recall_all(AgentRole::Strategy, "cycle_symbols");
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].sample_count, 2);
    }

    #[test]
    fn execution_handler_blocks_submission_in_guide() {
        let services = services();
        let cycle_id = seeded_cycle(&services);
        let bus = MessageBus::new();
        let command = command_for(&bus, "execution", &cycle_id);

        let gate = ExecutionHandler.receive_command(&command, &services).unwrap();
        assert_eq!(gate["submission_permitted"], false);
    }

    #[test]
    fn handler_fails_cleanly_on_missing_cycle_inputs() {
        let services = services();
        let cycle = services.shared_state.create_cycle(HashMap::new());
        let bus = MessageBus::new();
        let command = command_for(&bus, "risk", &cycle.cycle_id);

        let err = RiskHandler.receive_command(&command, &services).unwrap_err();
        assert!(err.contains("account_balance"));
    }

    #[test]
    fn memory_recall_roundtrip() {
        let store = MemoryStore::new();
        store.store(
            AgentRole::Risk,
            "limits",
            "EURUSD",
            serde_json::json!({"max": 1.0}),
            0.9,
        );
        let recalled = store.recall(AgentRole::Risk, "limits", "EURUSD").unwrap();
        assert_eq!(recalled["max"], 1.0);
        assert!(store.recall(AgentRole::Strategy, "limits", "EURUSD").is_none());
    }
}
