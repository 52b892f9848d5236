// =============================================================================
// Shared cycle state — per-cycle phase machine and access-controlled
// scratchpad
// =============================================================================
//
// Access rules:
//   - Only the supervisor transitions phases; refused while halt is pending.
//   - An agent may write key `k` iff it is the supervisor or `k` starts with
//     "<agent>_".
//   - Any agent may request halt; the write itself is the supervisor path.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// Phases in a coordination cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Initializing,
    StrategyAnalysis,
    RiskValidation,
    Execution,
    Halted,
    Failed,
    Completed,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::StrategyAnalysis => "strategy_analysis",
            Self::RiskValidation => "risk_validation",
            Self::Execution => "execution",
            Self::Halted => "halted",
            Self::Failed => "failed",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// Tagged scratchpad value. Readers type-check the kind before use instead
/// of trusting dynamic typing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum SharedValue {
    Text(String),
    Number(Decimal),
    Flag(bool),
    List(Vec<String>),
    Json(serde_json::Value),
}

impl SharedValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

/// State of one coordination cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleState {
    pub cycle_id: String,
    pub phase: CyclePhase,
    /// agent name -> status ("active" / "pending").
    pub active_agents: HashMap<String, String>,
    pub shared_data: HashMap<String, SharedValue>,
    pub halt_requested: bool,
    pub halt_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub errors: Option<serde_json::Value>,
}

/// Owner of all cycle states; enforces the phase-transition and write
/// access rules.
pub struct SharedStateManager {
    cycles: RwLock<Vec<CycleState>>,
}

impl SharedStateManager {
    pub fn new() -> Self {
        Self {
            cycles: RwLock::new(Vec::new()),
        }
    }

    /// Create a new coordination cycle in INITIALIZING.
    pub fn create_cycle(&self, active_agents: HashMap<String, String>) -> CycleState {
        let cycle_id = format!(
            "cycle_{}_{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            &Uuid::new_v4().simple().to_string()[..8]
        );

        let state = CycleState {
            cycle_id: cycle_id.clone(),
            phase: CyclePhase::Initializing,
            active_agents,
            shared_data: HashMap::new(),
            halt_requested: false,
            halt_reason: None,
            started_at: Utc::now(),
            completed_at: None,
            result: None,
            errors: None,
        };

        info!(cycle_id = %cycle_id, "coordination cycle created");
        self.cycles.write().push(state.clone());
        state
    }

    pub fn get(&self, cycle_id: &str) -> Option<CycleState> {
        self.cycles
            .read()
            .iter()
            .find(|c| c.cycle_id == cycle_id)
            .cloned()
    }

    /// Transition a cycle's phase. Supervisor only; refused while a halt is
    /// pending.
    pub fn transition_phase(&self, cycle_id: &str, new_phase: CyclePhase, agent: &str) -> bool {
        if agent != "supervisor" {
            warn!(agent, "phase transition refused (supervisor only)");
            return false;
        }

        let mut cycles = self.cycles.write();
        let state = match cycles.iter_mut().find(|c| c.cycle_id == cycle_id) {
            Some(s) => s,
            None => {
                warn!(cycle_id, "phase transition refused (cycle not found)");
                return false;
            }
        };

        if state.halt_requested {
            warn!(cycle_id, phase = %new_phase, "phase transition refused (halt requested)");
            return false;
        }

        let old_phase = state.phase;
        state.phase = new_phase;
        info!(cycle_id, old = %old_phase, new = %new_phase, "phase transition");
        true
    }

    /// Write a key into the cycle scratchpad. Non-supervisor agents may only
    /// write keys under their own prefix.
    pub fn write(&self, cycle_id: &str, key: &str, value: SharedValue, agent: &str) -> bool {
        if agent != "supervisor" && !key.starts_with(&format!("{agent}_")) {
            warn!(agent, key, "shared data write refused (prefix rule)");
            return false;
        }

        let mut cycles = self.cycles.write();
        match cycles.iter_mut().find(|c| c.cycle_id == cycle_id) {
            Some(state) => {
                state.shared_data.insert(key.to_string(), value);
                true
            }
            None => false,
        }
    }

    pub fn read(&self, cycle_id: &str, key: &str) -> Option<SharedValue> {
        self.cycles
            .read()
            .iter()
            .find(|c| c.cycle_id == cycle_id)
            .and_then(|c| c.shared_data.get(key).cloned())
    }

    /// Consistent snapshot of the whole scratchpad.
    pub fn read_all(&self, cycle_id: &str) -> HashMap<String, SharedValue> {
        self.cycles
            .read()
            .iter()
            .find(|c| c.cycle_id == cycle_id)
            .map(|c| c.shared_data.clone())
            .unwrap_or_default()
    }

    /// Any agent may request halt; the cycle moves to HALTED with the
    /// reason attributed to the requester.
    pub fn request_halt(&self, cycle_id: &str, reason: &str, agent: &str) {
        let mut cycles = self.cycles.write();
        if let Some(state) = cycles.iter_mut().find(|c| c.cycle_id == cycle_id) {
            state.halt_requested = true;
            state.halt_reason = Some(format!("{agent}: {reason}"));
            state.phase = CyclePhase::Halted;
            warn!(cycle_id, agent, reason, "HALT requested");
        }
    }

    /// Mark a cycle COMPLETED, or FAILED when errors are present.
    pub fn complete_cycle(
        &self,
        cycle_id: &str,
        result: serde_json::Value,
        errors: Option<serde_json::Value>,
    ) {
        let mut cycles = self.cycles.write();
        if let Some(state) = cycles.iter_mut().find(|c| c.cycle_id == cycle_id) {
            state.phase = if errors.is_some() {
                CyclePhase::Failed
            } else {
                CyclePhase::Completed
            };
            state.completed_at = Some(Utc::now());
            state.result = Some(result);
            state.errors = errors;
            info!(cycle_id, phase = %state.phase, "cycle completed");
        }
    }

    /// Recent cycles, newest first.
    pub fn recent_cycles(&self, limit: usize) -> Vec<CycleState> {
        let cycles = self.cycles.read();
        cycles.iter().rev().take(limit).cloned().collect()
    }
}

impl Default for SharedStateManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn agents() -> HashMap<String, String> {
        [
            ("supervisor", "active"),
            ("strategy", "pending"),
            ("risk", "pending"),
            ("execution", "pending"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn only_supervisor_transitions_phases() {
        let manager = SharedStateManager::new();
        let cycle = manager.create_cycle(agents());

        assert!(!manager.transition_phase(&cycle.cycle_id, CyclePhase::StrategyAnalysis, "strategy"));
        assert!(manager.transition_phase(&cycle.cycle_id, CyclePhase::StrategyAnalysis, "supervisor"));
        assert_eq!(
            manager.get(&cycle.cycle_id).unwrap().phase,
            CyclePhase::StrategyAnalysis
        );
    }

    #[test]
    fn write_access_enforces_agent_prefix() {
        let manager = SharedStateManager::new();
        let cycle = manager.create_cycle(agents());

        assert!(manager.write(
            &cycle.cycle_id,
            "strategy_signal_count",
            SharedValue::Number(dec!(3)),
            "strategy"
        ));
        assert!(!manager.write(
            &cycle.cycle_id,
            "risk_budget",
            SharedValue::Flag(true),
            "strategy"
        ));
        assert!(manager.write(
            &cycle.cycle_id,
            "symbol",
            SharedValue::Text("EURUSD".to_string()),
            "supervisor"
        ));

        let value = manager.read(&cycle.cycle_id, "strategy_signal_count").unwrap();
        assert_eq!(value.as_number(), Some(dec!(3)));
        assert!(value.as_text().is_none());
    }

    #[test]
    fn halt_blocks_further_transitions_and_keeps_reason() {
        let manager = SharedStateManager::new();
        let cycle = manager.create_cycle(agents());

        manager.request_halt(&cycle.cycle_id, "drawdown breach", "risk");

        let state = manager.get(&cycle.cycle_id).unwrap();
        assert_eq!(state.phase, CyclePhase::Halted);
        assert_eq!(state.halt_reason.as_deref(), Some("risk: drawdown breach"));

        assert!(!manager.transition_phase(&cycle.cycle_id, CyclePhase::Execution, "supervisor"));
    }

    #[test]
    fn complete_with_errors_fails_the_cycle() {
        let manager = SharedStateManager::new();
        let cycle = manager.create_cycle(agents());

        manager.complete_cycle(
            &cycle.cycle_id,
            serde_json::json!({"success": false}),
            Some(serde_json::json!({"exception": "boom"})),
        );
        let state = manager.get(&cycle.cycle_id).unwrap();
        assert_eq!(state.phase, CyclePhase::Failed);
        assert!(state.completed_at.is_some());
    }

    #[test]
    fn shared_value_roundtrips_through_json() {
        let value = SharedValue::List(vec!["MA".to_string(), "NBB".to_string()]);
        let encoded = serde_json::to_string(&value).unwrap();
        assert!(encoded.contains("\"kind\""));
        let decoded: SharedValue = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.as_list().unwrap().len(), 2);
    }
}
