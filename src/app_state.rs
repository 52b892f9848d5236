// =============================================================================
// Central application state — Meridian trading engine
// =============================================================================
//
// The single source of truth for the whole engine. Every service owns its
// own interior mutability; AppState ties them together behind one Arc for
// the API layer and background tasks.
// =============================================================================

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::broker::simulated::SimulatedBroker;
use crate::coordination::agents::{
    AgentHandler, AgentServices, DecisionLog, ExecutionHandler, MemoryStore, RiskHandler,
    StrategyHandler,
};
use crate::coordination::bus::{MessageBus, KNOWN_AGENTS};
use crate::coordination::health::HealthMonitor;
use crate::coordination::pipeline::CoordinationPipeline;
use crate::coordination::shared_state::SharedStateManager;
use crate::execution::engine::ExecutionEngine;
use crate::execution::orders::{BrokerType, OrderStore};
use crate::journal::analyzer::PerformanceAnalyzer;
use crate::journal::feedback::FeedbackLoop;
use crate::journal::writer::JournalStore;
use crate::positions::PositionStore;
use crate::risk::monitor::RiskMonitor;
use crate::risk::validator::RiskValidator;
use crate::settings::execution_mode::ExecutionModeService;
use crate::settings::SettingsService;
use crate::signals::SignalStore;

/// Central application state shared across all async tasks via
/// `Arc<AppState>`.
pub struct AppState {
    /// Monotonically increasing version counter, bumped on meaningful
    /// mutations so pollers can detect fresh data.
    pub state_version: AtomicU64,

    pub signals: Arc<SignalStore>,
    pub positions: Arc<PositionStore>,
    pub orders: Arc<OrderStore>,

    pub risk_monitor: Arc<RiskMonitor>,
    pub risk_validator: Arc<RiskValidator>,

    pub journal: Arc<JournalStore>,
    pub analyzer: Arc<PerformanceAnalyzer>,
    pub feedback: Arc<FeedbackLoop>,

    pub bus: Arc<MessageBus>,
    pub shared_state: Arc<SharedStateManager>,
    pub health: Arc<HealthMonitor>,
    pub pipeline: Arc<CoordinationPipeline>,

    pub settings: Arc<SettingsService>,
    pub execution_mode: Arc<ExecutionModeService>,

    pub simulation: Arc<SimulatedBroker>,
    pub execution: Arc<ExecutionEngine>,

    pub start_time: std::time::Instant,
}

impl AppState {
    /// Wire the full engine. `settings_path` enables settings persistence;
    /// `sim_seed` makes simulated fills reproducible.
    pub fn new(settings_path: Option<PathBuf>, sim_seed: Option<u64>) -> Self {
        let signals = Arc::new(SignalStore::new());
        let positions = Arc::new(PositionStore::new());
        let orders = Arc::new(OrderStore::new());

        let risk_monitor = Arc::new(RiskMonitor::new(positions.clone()));
        let risk_validator = Arc::new(RiskValidator::new(risk_monitor.clone()));

        let journal = Arc::new(JournalStore::new());
        let analyzer = Arc::new(PerformanceAnalyzer::new(journal.clone()));
        let feedback = Arc::new(FeedbackLoop::new(analyzer.clone(), risk_monitor.clone()));

        let bus = Arc::new(MessageBus::new());
        let shared_state = Arc::new(SharedStateManager::new());
        let health = Arc::new(HealthMonitor::new());
        for agent in KNOWN_AGENTS {
            health.initialize(agent);
        }
        let agent_services = AgentServices {
            shared_state: shared_state.clone(),
            decisions: Arc::new(DecisionLog::new()),
            memory: Arc::new(MemoryStore::new()),
        };
        let phase_handlers: Vec<Arc<dyn AgentHandler>> = vec![
            Arc::new(StrategyHandler),
            Arc::new(RiskHandler),
            Arc::new(ExecutionHandler),
        ];
        let pipeline = Arc::new(CoordinationPipeline::new(
            bus.clone(),
            shared_state.clone(),
            health.clone(),
            agent_services,
            phase_handlers,
        ));

        let settings = Arc::new(SettingsService::new(
            health.clone(),
            risk_monitor.clone(),
            settings_path,
        ));

        let simulation = Arc::new(SimulatedBroker::new("operator", sim_seed));
        let execution_mode = Arc::new(ExecutionModeService::new(
            settings.clone(),
            simulation.clone(),
        ));

        let execution = Arc::new(ExecutionEngine::new(
            signals.clone(),
            risk_validator.clone(),
            risk_monitor.clone(),
            orders.clone(),
            positions.clone(),
            journal.clone(),
            settings.clone(),
        ));
        execution.register_broker(BrokerType::Simulation, simulation.clone());

        Self {
            state_version: AtomicU64::new(1),
            signals,
            positions,
            orders,
            risk_monitor,
            risk_validator,
            journal,
            analyzer,
            feedback,
            bus,
            shared_state,
            health,
            pipeline,
            settings,
            execution_mode,
            simulation,
            execution,
            start_time: std::time::Instant::now(),
        }
    }

    /// Bump the state version after a meaningful mutation.
    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wiring_registers_agents_and_simulated_broker() {
        let state = AppState::new(None, Some(7));

        let health = state.health.check_all();
        for agent in KNOWN_AGENTS {
            assert_eq!(health.get(agent), Some(&true), "agent {agent}");
        }

        let account = state.simulation.account_snapshot();
        assert_eq!(account.balance, account.initial_balance);
    }

    #[test]
    fn version_counter_increments() {
        let state = AppState::new(None, None);
        let before = state.current_state_version();
        state.increment_version();
        assert_eq!(state.current_state_version(), before + 1);
    }
}
