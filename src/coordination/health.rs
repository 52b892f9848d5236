// =============================================================================
// Health monitor — heartbeats, error rates, responsiveness
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{error, info, warn};

/// Heartbeats older than this make an agent unresponsive in `check_all`.
const HEARTBEAT_TIMEOUT_SECONDS: i64 = 60;

/// Health record for one agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentHealth {
    pub agent_name: String,
    pub is_healthy: bool,
    pub last_heartbeat: DateTime<Utc>,
    pub avg_response_time_ms: f64,
    pub error_count: u64,
    pub success_count: u64,
    pub status_message: Option<String>,
}

impl AgentHealth {
    fn new(agent_name: &str) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            is_healthy: true,
            last_heartbeat: Utc::now(),
            avg_response_time_ms: 0.0,
            error_count: 0,
            success_count: 0,
            status_message: None,
        }
    }
}

/// Tracks health for every registered agent.
pub struct HealthMonitor {
    agents: RwLock<Vec<AgentHealth>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(Vec::new()),
        }
    }

    /// Record a heartbeat and fold `response_time_ms` into the running mean
    /// over total operations.
    pub fn heartbeat(&self, agent_name: &str, response_time_ms: f64) {
        let mut agents = self.agents.write();
        let health = Self::record_mut(&mut agents, agent_name);
        health.last_heartbeat = Utc::now();
        health.is_healthy = true;

        let total_ops = health.success_count + health.error_count;
        if total_ops > 0 {
            health.avg_response_time_ms = (health.avg_response_time_ms * total_ops as f64
                + response_time_ms)
                / (total_ops + 1) as f64;
        } else {
            health.avg_response_time_ms = response_time_ms;
        }
    }

    pub fn record_success(&self, agent_name: &str) {
        let mut agents = self.agents.write();
        if let Some(health) = agents.iter_mut().find(|a| a.agent_name == agent_name) {
            health.success_count += 1;
        }
    }

    /// Record an error; an error rate above 50% marks the agent unhealthy.
    pub fn record_error(&self, agent_name: &str, message: &str) {
        let mut agents = self.agents.write();
        if let Some(health) = agents.iter_mut().find(|a| a.agent_name == agent_name) {
            health.error_count += 1;
            health.status_message = Some(message.to_string());

            let total_ops = health.success_count + health.error_count;
            let error_rate = health.error_count as f64 / total_ops as f64;
            if error_rate > 0.5 {
                health.is_healthy = false;
                error!(
                    agent = agent_name,
                    error_rate = format!("{:.0}%", error_rate * 100.0),
                    "agent marked unhealthy"
                );
            }
        }
    }

    /// Health of every registered agent: healthy flag AND a recent
    /// heartbeat.
    pub fn check_all(&self) -> HashMap<String, bool> {
        let cutoff = Utc::now() - Duration::seconds(HEARTBEAT_TIMEOUT_SECONDS);
        let agents = self.agents.read();

        let mut status = HashMap::new();
        for health in agents.iter() {
            let responsive = health.last_heartbeat > cutoff;
            let healthy = health.is_healthy && responsive;
            if !healthy {
                warn!(agent = %health.agent_name, "agent unhealthy or unresponsive");
            }
            status.insert(health.agent_name.clone(), healthy);
        }
        status
    }

    pub fn get(&self, agent_name: &str) -> Option<AgentHealth> {
        self.agents
            .read()
            .iter()
            .find(|a| a.agent_name == agent_name)
            .cloned()
    }

    pub fn all(&self) -> Vec<AgentHealth> {
        self.agents.read().clone()
    }

    /// Create a health record for a new agent; no-op if already known.
    pub fn initialize(&self, agent_name: &str) {
        let mut agents = self.agents.write();
        if !agents.iter().any(|a| a.agent_name == agent_name) {
            agents.push(AgentHealth::new(agent_name));
            info!(agent = agent_name, "health record initialized");
        }
    }

    /// Reset statistics for an agent back to a healthy baseline.
    pub fn reset(&self, agent_name: &str) -> bool {
        let mut agents = self.agents.write();
        match agents.iter_mut().find(|a| a.agent_name == agent_name) {
            Some(health) => {
                *health = AgentHealth::new(agent_name);
                info!(agent = agent_name, "health record reset");
                true
            }
            None => false,
        }
    }

    fn record_mut<'a>(agents: &'a mut Vec<AgentHealth>, agent_name: &str) -> &'a mut AgentHealth {
        if let Some(idx) = agents.iter().position(|a| a.agent_name == agent_name) {
            &mut agents[idx]
        } else {
            agents.push(AgentHealth::new(agent_name));
            agents.last_mut().expect("just pushed")
        }
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_creates_record_and_tracks_running_mean() {
        let monitor = HealthMonitor::new();
        monitor.heartbeat("strategy", 100.0);
        monitor.record_success("strategy");
        monitor.heartbeat("strategy", 200.0);

        let health = monitor.get("strategy").unwrap();
        // One prior operation: (100 * 1 + 200) / 2 = 150.
        assert!((health.avg_response_time_ms - 150.0).abs() < f64::EPSILON);
    }

    #[test]
    fn error_rate_over_half_marks_unhealthy() {
        let monitor = HealthMonitor::new();
        monitor.initialize("execution");
        monitor.record_success("execution");
        monitor.record_error("execution", "broker timeout");
        assert!(monitor.get("execution").unwrap().is_healthy); // rate == 0.5

        monitor.record_error("execution", "broker timeout");
        let health = monitor.get("execution").unwrap();
        assert!(!health.is_healthy);
        assert_eq!(health.status_message.as_deref(), Some("broker timeout"));
    }

    #[test]
    fn check_all_reflects_health_flags() {
        let monitor = HealthMonitor::new();
        monitor.heartbeat("strategy", 10.0);
        monitor.initialize("risk");
        monitor.record_error("risk", "boom");

        let status = monitor.check_all();
        assert_eq!(status.get("strategy"), Some(&true));
        assert_eq!(status.get("risk"), Some(&false));
    }

    #[test]
    fn reset_restores_baseline() {
        let monitor = HealthMonitor::new();
        monitor.initialize("risk");
        monitor.record_error("risk", "boom");
        assert!(monitor.reset("risk"));

        let health = monitor.get("risk").unwrap();
        assert!(health.is_healthy);
        assert_eq!(health.error_count, 0);
        assert!(!monitor.reset("unknown"));
    }
}
