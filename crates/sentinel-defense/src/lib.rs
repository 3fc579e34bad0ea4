//! Defensive state machine.
//!
//! Each ticket carries a defensive state cycling
//! HEALTHY → WARNING_L1 → WARNING_L2 → HEDGED → RECOVERING → HEALTHY, with
//! single-step de-escalations back toward HEALTHY. The states
//! `WARNING_L2` and `HEDGED` grant the defensive manager an ownership
//! override; once the state drops to `WARNING_L1` or below, displaced
//! managers re-acquire normally (the state machine never hands ownership
//! back by itself).
//!
//! Transitions are proposed from an external risk-scoring feed. When that
//! feed goes quiet the last known state is held with a staleness flag,
//! never silently reset to HEALTHY.

pub mod tracker;
pub mod transitions;

pub use tracker::{Assessment, DefenseConfig, DefenseTracker};
pub use transitions::{can_transition, step_toward, target_for_score};
