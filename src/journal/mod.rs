// =============================================================================
// Journal: immutable trade records, performance analysis, and the feedback
// loop that closes the control loop
// =============================================================================

pub mod analyzer;
pub mod feedback;
pub mod writer;
