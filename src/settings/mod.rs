// =============================================================================
// Settings & mode service — the single writable source for soft limits and
// the current operating modes
// =============================================================================
//
// Every update revalidates soft <= hard against the frozen risk caps; an
// invalid update is rejected with no mutation and no version bump. Every
// accepted change appends an audit row and increments the version.
//
// Persistence uses the atomic tmp + rename pattern so a crash mid-write
// never corrupts the settings file.
// =============================================================================

pub mod execution_mode;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::coordination::health::HealthMonitor;
use crate::error::{AppError, AppResult};
use crate::execution::orders::BrokerType;
use crate::risk::constants::{
    EMERGENCY_DRAWDOWN_PCT, MAX_DAILY_LOSS_PCT, MAX_OPEN_POSITIONS, MAX_RISK_PER_TRADE_PCT,
    MAX_TRADES_PER_DAY, STRATEGY_AUTO_DISABLE_THRESHOLD,
};
use crate::risk::monitor::RiskMonitor;
use crate::types::{ExecutionMode, Mode};

fn default_version() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

fn default_max_risk_per_trade_pct() -> Decimal {
    dec!(2.0)
}

fn default_max_daily_loss_pct() -> Decimal {
    dec!(5.0)
}

fn default_emergency_drawdown_pct() -> Decimal {
    dec!(15.0)
}

fn default_max_open_positions() -> u32 {
    10
}

fn default_max_trades_per_day() -> u32 {
    20
}

fn default_strategy_disable_threshold() -> u32 {
    5
}

fn default_health_check_interval() -> u64 {
    30
}

fn default_agent_timeout() -> u64 {
    60
}

/// Centralized system settings. Soft limits here can never exceed the
/// hard caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSettings {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub broker_type: BrokerType,
    #[serde(default)]
    pub broker_connected: bool,
    #[serde(default = "default_max_risk_per_trade_pct")]
    pub max_risk_per_trade_pct: Decimal,
    #[serde(default = "default_max_daily_loss_pct")]
    pub max_daily_loss_pct: Decimal,
    #[serde(default = "default_emergency_drawdown_pct")]
    pub emergency_drawdown_pct: Decimal,
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: u32,
    #[serde(default = "default_max_trades_per_day")]
    pub max_trades_per_day: u32,
    #[serde(default = "default_true")]
    pub auto_disable_strategies: bool,
    #[serde(default = "default_strategy_disable_threshold")]
    pub strategy_disable_threshold: u32,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_seconds: u64,
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout_seconds: u64,
    #[serde(default = "default_version")]
    pub version: u64,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            mode: Mode::Guide,
            execution_mode: ExecutionMode::Simulation,
            broker_type: BrokerType::Simulation,
            broker_connected: false,
            max_risk_per_trade_pct: default_max_risk_per_trade_pct(),
            max_daily_loss_pct: default_max_daily_loss_pct(),
            emergency_drawdown_pct: default_emergency_drawdown_pct(),
            max_open_positions: default_max_open_positions(),
            max_trades_per_day: default_max_trades_per_day(),
            auto_disable_strategies: true,
            strategy_disable_threshold: default_strategy_disable_threshold(),
            health_check_interval_seconds: default_health_check_interval(),
            agent_timeout_seconds: default_agent_timeout(),
            version: 1,
        }
    }
}

impl SystemSettings {
    /// Validate soft limits against the hard caps and basic consistency.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_risk_per_trade_pct > MAX_RISK_PER_TRADE_PCT {
            return Err(format!(
                "max_risk_per_trade_pct cannot exceed {MAX_RISK_PER_TRADE_PCT}%"
            ));
        }
        if self.max_daily_loss_pct > MAX_DAILY_LOSS_PCT {
            return Err(format!("max_daily_loss_pct cannot exceed {MAX_DAILY_LOSS_PCT}%"));
        }
        if self.emergency_drawdown_pct > EMERGENCY_DRAWDOWN_PCT {
            return Err(format!(
                "emergency_drawdown_pct cannot exceed {EMERGENCY_DRAWDOWN_PCT}%"
            ));
        }
        if self.max_open_positions > MAX_OPEN_POSITIONS {
            return Err(format!("max_open_positions cannot exceed {MAX_OPEN_POSITIONS}"));
        }
        if self.max_trades_per_day > MAX_TRADES_PER_DAY {
            return Err(format!("max_trades_per_day cannot exceed {MAX_TRADES_PER_DAY}"));
        }
        if self.strategy_disable_threshold > STRATEGY_AUTO_DISABLE_THRESHOLD {
            return Err(format!(
                "strategy_disable_threshold cannot exceed {STRATEGY_AUTO_DISABLE_THRESHOLD}"
            ));
        }

        if self.max_risk_per_trade_pct <= Decimal::ZERO {
            return Err("max_risk_per_trade_pct must be positive".to_string());
        }
        if self.max_daily_loss_pct <= Decimal::ZERO {
            return Err("max_daily_loss_pct must be positive".to_string());
        }
        if self.max_daily_loss_pct < self.max_risk_per_trade_pct {
            return Err("max_daily_loss_pct should be >= max_risk_per_trade_pct".to_string());
        }
        if self.max_open_positions < 1 {
            return Err("max_open_positions must be at least 1".to_string());
        }
        if self.max_trades_per_day < 1 {
            return Err("max_trades_per_day must be at least 1".to_string());
        }
        if self.strategy_disable_threshold < 1 {
            return Err("strategy_disable_threshold must be at least 1".to_string());
        }
        if self.health_check_interval_seconds < 10 {
            return Err("health_check_interval_seconds must be at least 10".to_string());
        }
        if self.agent_timeout_seconds < 10 {
            return Err("agent_timeout_seconds must be at least 10".to_string());
        }
        Ok(())
    }
}

/// Partial update accepted by the settings endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub broker_type: Option<BrokerType>,
    #[serde(default)]
    pub broker_connected: Option<bool>,
    #[serde(default)]
    pub max_risk_per_trade_pct: Option<Decimal>,
    #[serde(default)]
    pub max_daily_loss_pct: Option<Decimal>,
    #[serde(default)]
    pub emergency_drawdown_pct: Option<Decimal>,
    #[serde(default)]
    pub max_open_positions: Option<u32>,
    #[serde(default)]
    pub max_trades_per_day: Option<u32>,
    #[serde(default)]
    pub auto_disable_strategies: Option<bool>,
    #[serde(default)]
    pub strategy_disable_threshold: Option<u32>,
    #[serde(default)]
    pub health_check_interval_seconds: Option<u64>,
    #[serde(default)]
    pub agent_timeout_seconds: Option<u64>,
}

/// Audit row preserving the history of every settings change.
#[derive(Debug, Clone, Serialize)]
pub struct SettingsAudit {
    pub id: u64,
    pub settings_version: u64,
    pub changed_by: Option<String>,
    pub change_type: String,
    pub old_value: serde_json::Value,
    pub new_value: serde_json::Value,
    pub reason: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// The centralized service every settings change must go through.
pub struct SettingsService {
    health: Arc<HealthMonitor>,
    monitor: Arc<RiskMonitor>,
    inner: RwLock<SystemSettings>,
    audits: RwLock<Vec<SettingsAudit>>,
    next_audit_id: AtomicU64,
    path: Option<PathBuf>,
}

impl SettingsService {
    /// Build the service, loading persisted settings from `path` when it
    /// exists.
    pub fn new(health: Arc<HealthMonitor>, monitor: Arc<RiskMonitor>, path: Option<PathBuf>) -> Self {
        let settings = match path.as_deref() {
            Some(p) if p.exists() => match Self::load(p) {
                Ok(loaded) => loaded,
                Err(e) => {
                    warn!(error = %e, "failed to load settings, using defaults");
                    SystemSettings::default()
                }
            },
            _ => SystemSettings::default(),
        };

        Self {
            health,
            monitor,
            inner: RwLock::new(settings),
            audits: RwLock::new(Vec::new()),
            next_audit_id: AtomicU64::new(1),
            path,
        }
    }

    pub fn settings(&self) -> SystemSettings {
        self.inner.read().clone()
    }

    pub fn mode(&self) -> Mode {
        self.inner.read().mode
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.inner.read().execution_mode
    }

    /// Apply a partial update with validation and audit. Returns the new
    /// snapshot; an invalid update mutates nothing.
    pub fn update(
        &self,
        updates: &SettingsUpdate,
        user: Option<&str>,
        reason: Option<&str>,
    ) -> AppResult<SystemSettings> {
        let current = self.inner.read().clone();
        let mut candidate = current.clone();
        let mut old_values = serde_json::Map::new();
        let mut new_values = serde_json::Map::new();

        macro_rules! apply {
            ($field:ident) => {
                if let Some(value) = &updates.$field {
                    if candidate.$field != *value {
                        old_values.insert(stringify!($field).to_string(), json!(candidate.$field));
                        new_values.insert(stringify!($field).to_string(), json!(value));
                        candidate.$field = value.clone();
                    }
                }
            };
        }

        apply!(mode);
        apply!(broker_type);
        apply!(broker_connected);
        apply!(max_risk_per_trade_pct);
        apply!(max_daily_loss_pct);
        apply!(emergency_drawdown_pct);
        apply!(max_open_positions);
        apply!(max_trades_per_day);
        apply!(auto_disable_strategies);
        apply!(strategy_disable_threshold);
        apply!(health_check_interval_seconds);
        apply!(agent_timeout_seconds);

        if new_values.is_empty() {
            return Ok(current);
        }

        candidate
            .validate()
            .map_err(AppError::Validation)?;

        if let Some(new_mode) = updates.mode {
            if new_mode != current.mode {
                self.validate_mode_switch(current.mode, new_mode, &candidate)?;
            }
        }

        candidate.version = current.version + 1;

        let change_type = if new_values.contains_key("mode") {
            "mode_change"
        } else if ["max_risk_per_trade_pct", "max_daily_loss_pct", "emergency_drawdown_pct", "max_open_positions", "max_trades_per_day"]
            .iter()
            .any(|k| new_values.contains_key(*k))
        {
            "risk_update"
        } else if new_values.contains_key("broker_type") || new_values.contains_key("broker_connected") {
            "broker_update"
        } else {
            "settings_update"
        };

        self.push_audit(
            candidate.version,
            user,
            change_type,
            serde_json::Value::Object(old_values),
            serde_json::Value::Object(new_values),
            reason,
        );

        *self.inner.write() = candidate.clone();
        self.persist(&candidate);

        info!(change_type, version = candidate.version, "settings updated");
        Ok(candidate)
    }

    /// Change the top-level operating mode with transition rules.
    pub fn set_mode(&self, mode: Mode, user: Option<&str>, reason: Option<&str>) -> AppResult<SystemSettings> {
        self.update(
            &SettingsUpdate {
                mode: Some(mode),
                ..SettingsUpdate::default()
            },
            user,
            reason,
        )
    }

    /// Store a new execution mode. Callers (the execution-mode service)
    /// enforce the LIVE preconditions before this point.
    pub fn set_execution_mode(&self, new_mode: ExecutionMode, user: Option<&str>, reason: Option<&str>) -> SystemSettings {
        let mut settings = self.inner.write();
        let old_mode = settings.execution_mode;
        if old_mode == new_mode {
            return settings.clone();
        }

        settings.execution_mode = new_mode;
        settings.version += 1;
        let snapshot = settings.clone();
        drop(settings);

        self.push_audit(
            snapshot.version,
            user,
            "execution_mode_change",
            json!({"execution_mode": old_mode}),
            json!({"execution_mode": new_mode}),
            reason,
        );
        self.persist(&snapshot);

        info!(old = %old_mode, new = %new_mode, "execution mode changed");
        snapshot
    }

    /// Settings audit trail, newest first.
    pub fn audit_trail(&self, limit: usize, change_type: Option<&str>) -> Vec<SettingsAudit> {
        let audits = self.audits.read();
        audits
            .iter()
            .rev()
            .filter(|a| change_type.map(|t| a.change_type == t).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect()
    }

    /// GUIDE -> AUTONOMOUS needs a healthy system, a usable broker, and no
    /// active emergency. AUTONOMOUS -> GUIDE is always allowed.
    fn validate_mode_switch(&self, old: Mode, new: Mode, candidate: &SystemSettings) -> AppResult<()> {
        if old == Mode::Guide && new == Mode::Autonomous {
            let health = self.health.check_all();
            if health.values().any(|healthy| !healthy) {
                return Err(AppError::Policy(
                    "Mode switch denied: system health check failed".to_string(),
                ));
            }

            if candidate.broker_type != BrokerType::Simulation && !candidate.broker_connected {
                return Err(AppError::Policy(
                    "Mode switch denied: broker not connected (required for non-simulated trading)"
                        .to_string(),
                ));
            }

            if self.monitor.is_emergency_active() {
                return Err(AppError::Policy(
                    "Mode switch denied: emergency shutdown is active".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn push_audit(
        &self,
        settings_version: u64,
        user: Option<&str>,
        change_type: &str,
        old_value: serde_json::Value,
        new_value: serde_json::Value,
        reason: Option<&str>,
    ) {
        self.audits.write().push(SettingsAudit {
            id: self.next_audit_id.fetch_add(1, Ordering::SeqCst),
            settings_version,
            changed_by: user.map(str::to_string),
            change_type: change_type.to_string(),
            old_value,
            new_value,
            reason: reason.map(str::to_string),
            changed_at: Utc::now(),
        });
    }

    fn load(path: &Path) -> anyhow::Result<SystemSettings> {
        let content = std::fs::read_to_string(path)?;
        let settings: SystemSettings = serde_json::from_str(&content)?;
        info!(path = %path.display(), version = settings.version, "settings loaded");
        Ok(settings)
    }

    /// Best-effort atomic save (tmp + rename).
    fn persist(&self, settings: &SystemSettings) {
        let Some(path) = self.path.as_deref() else {
            return;
        };
        let content = match serde_json::to_string_pretty(settings) {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "failed to serialize settings");
                return;
            }
        };
        let tmp_path = path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&tmp_path, &content)
            .and_then(|_| std::fs::rename(&tmp_path, path))
        {
            warn!(error = %e, "failed to save settings");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::positions::PositionStore;

    fn service() -> (SettingsService, Arc<HealthMonitor>, Arc<RiskMonitor>) {
        let health = Arc::new(HealthMonitor::new());
        let monitor = Arc::new(RiskMonitor::new(Arc::new(PositionStore::new())));
        (
            SettingsService::new(health.clone(), monitor.clone(), None),
            health,
            monitor,
        )
    }

    #[test]
    fn defaults_are_safe_and_valid() {
        let (service, _, _) = service();
        let settings = service.settings();
        assert_eq!(settings.mode, Mode::Guide);
        assert_eq!(settings.execution_mode, ExecutionMode::Simulation);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn soft_limit_above_hard_cap_is_rejected_without_mutation() {
        let (service, _, _) = service();
        let before = service.settings();

        let err = service
            .update(
                &SettingsUpdate {
                    max_risk_per_trade_pct: Some(dec!(3.0)),
                    ..SettingsUpdate::default()
                },
                Some("ops"),
                Some("raise risk"),
            )
            .unwrap_err();

        assert_eq!(err.kind(), "ValidationError");
        let after = service.settings();
        assert_eq!(after.max_risk_per_trade_pct, before.max_risk_per_trade_pct);
        assert_eq!(after.version, before.version);
        assert!(service.audit_trail(10, None).is_empty());
    }

    #[test]
    fn soft_limit_below_hard_cap_bumps_version_and_audits() {
        let (service, _, _) = service();
        let before = service.settings();

        let updated = service
            .update(
                &SettingsUpdate {
                    max_risk_per_trade_pct: Some(dec!(1.5)),
                    ..SettingsUpdate::default()
                },
                Some("ops"),
                Some("tighten risk"),
            )
            .unwrap();

        assert_eq!(updated.max_risk_per_trade_pct, dec!(1.5));
        assert!(updated.version > before.version);

        let audits = service.audit_trail(10, None);
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].change_type, "risk_update");
        assert_eq!(audits[0].changed_by.as_deref(), Some("ops"));
    }

    #[test]
    fn autonomous_switch_requires_healthy_agents() {
        let (service, health, _) = service();
        health.initialize("strategy");
        health.record_error("strategy", "stream down");

        let err = service.set_mode(Mode::Autonomous, Some("ops"), None).unwrap_err();
        assert_eq!(err.kind(), "PolicyError");
        assert_eq!(service.mode(), Mode::Guide);
    }

    #[test]
    fn autonomous_switch_denied_during_emergency() {
        let (service, _, monitor) = service();
        monitor.trigger_emergency_shutdown(dec!(16));

        let err = service.set_mode(Mode::Autonomous, Some("ops"), None).unwrap_err();
        assert!(err.detail().contains("emergency shutdown"));
    }

    #[test]
    fn autonomous_switch_allowed_on_simulated_broker() {
        let (service, _, _) = service();
        let updated = service.set_mode(Mode::Autonomous, Some("ops"), Some("go live")).unwrap();
        assert_eq!(updated.mode, Mode::Autonomous);

        // Back to GUIDE is always allowed.
        let updated = service.set_mode(Mode::Guide, Some("ops"), None).unwrap();
        assert_eq!(updated.mode, Mode::Guide);
    }

    #[test]
    fn non_simulated_broker_requires_connection() {
        let (service, _, _) = service();
        service
            .update(
                &SettingsUpdate {
                    broker_type: Some(BrokerType::Oanda),
                    ..SettingsUpdate::default()
                },
                Some("ops"),
                None,
            )
            .unwrap();

        let err = service.set_mode(Mode::Autonomous, Some("ops"), None).unwrap_err();
        assert!(err.detail().contains("broker not connected"));

        service
            .update(
                &SettingsUpdate {
                    broker_connected: Some(true),
                    ..SettingsUpdate::default()
                },
                Some("ops"),
                None,
            )
            .unwrap();
        assert!(service.set_mode(Mode::Autonomous, Some("ops"), None).is_ok());
    }

    #[test]
    fn settings_roundtrip_through_disk() {
        let dir = std::env::temp_dir().join(format!("meridian-settings-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("system_settings.json");

        {
            let health = Arc::new(HealthMonitor::new());
            let monitor = Arc::new(RiskMonitor::new(Arc::new(PositionStore::new())));
            let service = SettingsService::new(health, monitor, Some(path.clone()));
            service
                .update(
                    &SettingsUpdate {
                        max_trades_per_day: Some(15),
                        ..SettingsUpdate::default()
                    },
                    None,
                    None,
                )
                .unwrap();
        }

        let health = Arc::new(HealthMonitor::new());
        let monitor = Arc::new(RiskMonitor::new(Arc::new(PositionStore::new())));
        let service = SettingsService::new(health, monitor, Some(path.clone()));
        assert_eq!(service.settings().max_trades_per_day, 15);
        assert_eq!(service.settings().version, 2);

        let _ = std::fs::remove_file(&path);
    }
}
