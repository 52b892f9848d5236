// =============================================================================
// Multi-agent coordination: message bus, shared cycle state, health
// monitoring, and the supervisor pipeline
// =============================================================================

pub mod agents;
pub mod bus;
pub mod health;
pub mod pipeline;
pub mod shared_state;
