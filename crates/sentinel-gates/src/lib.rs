//! Trailing gate evaluation.
//!
//! One critical gate decides whether trailing may run at all; five
//! advisory gates only tune how wide the trailing distance is. The
//! evaluator is a pure function of the trade record and a market context
//! snapshot, so the same inputs always produce the same decision.

pub mod evaluator;

pub use evaluator::{GateConfig, GateDecision, GateEvaluator, MarketContext};
