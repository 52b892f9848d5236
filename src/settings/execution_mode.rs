// =============================================================================
// Execution mode service — SIMULATION / PAPER / LIVE transitions with full
// safety enforcement
// =============================================================================
//
// LIVE is the only mode that touches real money: switching to it requires a
// verified password, an explicit confirmation, and a non-empty reason. Every
// transition writes an audit row with the client context.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::broker::simulated::SimulatedBroker;
use crate::error::{AppError, AppResult};
use crate::settings::SettingsService;
use crate::types::ExecutionMode;

/// Audit row for one execution-mode transition.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionModeAudit {
    pub id: u64,
    pub user: String,
    pub old_mode: ExecutionMode,
    pub new_mode: ExecutionMode,
    pub reason: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub confirmation_required: bool,
    pub password_verified: bool,
    pub had_open_positions: bool,
    pub created_at: DateTime<Utc>,
}

/// Request context for a mode change.
#[derive(Debug, Clone, Default)]
pub struct ModeChangeRequest {
    pub reason: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub password_verified: bool,
    pub confirmed: bool,
}

/// Manages execution-mode transitions and the simulation account subtree.
pub struct ExecutionModeService {
    settings: Arc<SettingsService>,
    simulation: Arc<SimulatedBroker>,
    audits: RwLock<Vec<ExecutionModeAudit>>,
    next_id: AtomicU64,
}

impl ExecutionModeService {
    pub fn new(settings: Arc<SettingsService>, simulation: Arc<SimulatedBroker>) -> Self {
        Self {
            settings,
            simulation,
            audits: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn current_mode(&self) -> ExecutionMode {
        self.settings.execution_mode()
    }

    /// Change the execution mode. LIVE requires password verification,
    /// explicit confirmation, and a reason.
    pub fn change_mode(
        &self,
        user: &str,
        new_mode: ExecutionMode,
        request: ModeChangeRequest,
    ) -> AppResult<ExecutionMode> {
        let current = self.current_mode();
        if current == new_mode {
            return Ok(current);
        }

        if new_mode == ExecutionMode::Live {
            if !request.password_verified {
                return Err(AppError::Policy(
                    "Password verification required to enable live trading".to_string(),
                ));
            }
            if !request.confirmed {
                return Err(AppError::PreconditionRequired(
                    "Explicit confirmation required to enable live trading. \
                     This will use REAL MONEY."
                        .to_string(),
                ));
            }
            if request.reason.as_deref().map(str::trim).unwrap_or("").is_empty() {
                return Err(AppError::Validation(
                    "A reason is required when enabling live trading".to_string(),
                ));
            }
            warn!(user, "LIVE trading enabled");
        }

        let had_open_positions = !self.simulation.positions_snapshot().is_empty();

        self.settings
            .set_execution_mode(new_mode, Some(user), request.reason.as_deref());

        self.audits.write().push(ExecutionModeAudit {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            user: user.to_string(),
            old_mode: current,
            new_mode,
            reason: request.reason,
            ip_address: request.ip_address,
            user_agent: request.user_agent,
            confirmation_required: new_mode == ExecutionMode::Live,
            password_verified: request.password_verified,
            had_open_positions,
            created_at: Utc::now(),
        });

        info!(user, old = %current, new = %new_mode, "execution mode transition");
        Ok(new_mode)
    }

    /// Mode transition audit history, newest first.
    pub fn audit_history(&self, limit: usize) -> Vec<ExecutionModeAudit> {
        let audits = self.audits.read();
        audits.iter().rev().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::health::HealthMonitor;
    use crate::positions::PositionStore;
    use crate::risk::monitor::RiskMonitor;

    fn service() -> ExecutionModeService {
        let health = Arc::new(HealthMonitor::new());
        let monitor = Arc::new(RiskMonitor::new(Arc::new(PositionStore::new())));
        let settings = Arc::new(SettingsService::new(health, monitor, None));
        let simulation = Arc::new(SimulatedBroker::new("tester", Some(1)));
        ExecutionModeService::new(settings, simulation)
    }

    #[test]
    fn defaults_to_simulation() {
        let service = service();
        assert_eq!(service.current_mode(), ExecutionMode::Simulation);
    }

    #[test]
    fn paper_switch_needs_no_confirmation() {
        let service = service();
        let mode = service
            .change_mode("ops", ExecutionMode::Paper, ModeChangeRequest::default())
            .unwrap();
        assert_eq!(mode, ExecutionMode::Paper);
        assert_eq!(service.audit_history(10).len(), 1);
    }

    #[test]
    fn live_requires_password_then_confirmation_then_reason() {
        let service = service();

        let err = service
            .change_mode("ops", ExecutionMode::Live, ModeChangeRequest::default())
            .unwrap_err();
        assert_eq!(err.kind(), "PolicyError");

        let err = service
            .change_mode(
                "ops",
                ExecutionMode::Live,
                ModeChangeRequest {
                    password_verified: true,
                    ..ModeChangeRequest::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), "PreconditionRequiredError");

        let err = service
            .change_mode(
                "ops",
                ExecutionMode::Live,
                ModeChangeRequest {
                    password_verified: true,
                    confirmed: true,
                    ..ModeChangeRequest::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");

        let mode = service
            .change_mode(
                "ops",
                ExecutionMode::Live,
                ModeChangeRequest {
                    password_verified: true,
                    confirmed: true,
                    reason: Some("controlled rollout".to_string()),
                    ip_address: Some("10.0.0.1".to_string()),
                    ..ModeChangeRequest::default()
                },
            )
            .unwrap();
        assert_eq!(mode, ExecutionMode::Live);

        let audits = service.audit_history(10);
        assert_eq!(audits.len(), 1);
        assert!(audits[0].confirmation_required);
        assert!(audits[0].password_verified);
    }

    #[test]
    fn same_mode_change_is_a_no_op() {
        let service = service();
        let mode = service
            .change_mode("ops", ExecutionMode::Simulation, ModeChangeRequest::default())
            .unwrap();
        assert_eq!(mode, ExecutionMode::Simulation);
        assert!(service.audit_history(10).is_empty());
    }
}
