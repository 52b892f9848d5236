// =============================================================================
// Shared types used across the Meridian trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Top-level operating mode. GUIDE records decisions but never submits to a
/// broker; AUTONOMOUS may submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Guide,
    Autonomous,
}

impl Default for Mode {
    fn default() -> Self {
        Self::Guide
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Guide => write!(f, "guide"),
            Self::Autonomous => write!(f, "autonomous"),
        }
    }
}

impl Mode {
    /// Parse from the lowercase wire form.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "guide" => Some(Self::Guide),
            "autonomous" => Some(Self::Autonomous),
            _ => None,
        }
    }
}

/// Execution target. SIMULATION is the default and safest; LIVE requires
/// explicit confirmation at the transition boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Simulation,
    Paper,
    Live,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Simulation
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simulation => write!(f, "simulation"),
            Self::Paper => write!(f, "paper"),
            Self::Live => write!(f, "live"),
        }
    }
}

impl ExecutionMode {
    /// Parse from the lowercase wire form.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "simulation" => Some(Self::Simulation),
            "paper" => Some(Self::Paper),
            "live" => Some(Self::Live),
            _ => None,
        }
    }
}

/// Direction of a signal or position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

impl Side {
    /// Broker order side for opening a position in this direction.
    pub fn order_side(&self) -> &'static str {
        match self {
            Self::Long => "BUY",
            Self::Short => "SELL",
        }
    }
}

/// Origin of a journaled trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSource {
    Backtest,
    Live,
    Paper,
}

impl std::fmt::Display for TradeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backtest => write!(f, "backtest"),
            Self::Live => write!(f, "live"),
            Self::Paper => write!(f, "paper"),
        }
    }
}

impl TradeSource {
    /// Prefix used when building journal entry ids.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Backtest => "BT",
            Self::Live => "LIVE",
            Self::Paper => "PAPER",
        }
    }

    /// Parse from the lowercase wire form.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "backtest" => Some(Self::Backtest),
            "live" => Some(Self::Live),
            "paper" => Some(Self::Paper),
            _ => None,
        }
    }
}

/// Severity attached to a risk decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskSeverity {
    Info,
    Warning,
    Critical,
    Emergency,
}

impl std::fmt::Display for RiskSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
            Self::Emergency => write!(f, "emergency"),
        }
    }
}

/// Why a position was closed. Emitted explicitly by the component that
/// performs the close; never inferred from price proximity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitReason {
    Tp,
    Sl,
    Manual,
    Expired,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tp => write!(f, "tp"),
            Self::Sl => write!(f, "sl"),
            Self::Manual => write!(f, "manual"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_default_to_safest() {
        assert_eq!(Mode::default(), Mode::Guide);
        assert_eq!(ExecutionMode::default(), ExecutionMode::Simulation);
    }

    #[test]
    fn execution_mode_parse_roundtrip() {
        for mode in [ExecutionMode::Simulation, ExecutionMode::Paper, ExecutionMode::Live] {
            assert_eq!(ExecutionMode::parse(&mode.to_string()), Some(mode));
        }
        assert_eq!(ExecutionMode::parse("demo"), None);
    }

    #[test]
    fn side_maps_to_order_side() {
        assert_eq!(Side::Long.order_side(), "BUY");
        assert_eq!(Side::Short.order_side(), "SELL");
    }

    #[test]
    fn serde_uses_lowercase_wire_form() {
        assert_eq!(serde_json::to_string(&Mode::Autonomous).unwrap(), "\"autonomous\"");
        assert_eq!(serde_json::to_string(&TradeSource::Backtest).unwrap(), "\"backtest\"");
        assert_eq!(serde_json::to_string(&Side::Long).unwrap(), "\"LONG\"");
    }
}
