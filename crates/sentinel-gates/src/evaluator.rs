//! Gate evaluation for trailing-stop activation.
//!
//! # Gate types
//!
//! ## Critical gate
//! - ProfitFloor: the trade has locked in something worth protecting
//!   (breakeven moved, 0.2R reached, or a partial profit taken). The only
//!   gate that can block trailing outright.
//!
//! ## Advisory gates
//! - VolatilitySqueeze: compression regime detected
//! - TimeframeAlignment: aligned timeframe count below 1
//! - MeanReversionStretch: price stretched past 1.5x the symbol threshold
//! - PriceZoneExtremity: always passes, recorded for diagnostics only
//! - HvnProximity: stop would sit closer than 0.2x ATR to a high-volume node
//!
//! Advisory failures never block; they only widen the trailing distance.
//! Missing advisory inputs default to the passing value, so absent
//! analytics can never prevent exit protection from engaging.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sentinel_core::{ManagedTrade, Price};
use serde::{Deserialize, Serialize};
use tracing::debug;

// ============================================================================
// Configuration
// ============================================================================

/// Gate evaluator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Minimum risk multiple for the critical gate.
    #[serde(default = "default_min_risk_multiple")]
    pub min_risk_multiple: f64,
    /// Widening factor applied to the symbol's mean-reversion threshold.
    #[serde(default = "default_stretch_widening")]
    pub stretch_widening: f64,
    /// Minimum stop distance to a high-volume node, as a fraction of ATR.
    #[serde(default = "default_hvn_atr_fraction")]
    pub hvn_atr_fraction: f64,
    /// Trailing multiplier with up to two advisory failures.
    #[serde(default = "default_base_multiplier")]
    pub base_multiplier: f64,
    /// Trailing multiplier once advisory failures reach the widen count.
    #[serde(default = "default_widened_multiplier")]
    pub widened_multiplier: f64,
    /// Advisory failure count at which the widened multiplier applies.
    #[serde(default = "default_widen_failure_count")]
    pub widen_failure_count: usize,
}

fn default_min_risk_multiple() -> f64 {
    0.2
}

fn default_stretch_widening() -> f64 {
    1.5
}

fn default_hvn_atr_fraction() -> f64 {
    0.2
}

fn default_base_multiplier() -> f64 {
    1.5
}

fn default_widened_multiplier() -> f64 {
    2.0
}

fn default_widen_failure_count() -> usize {
    3
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_risk_multiple: default_min_risk_multiple(),
            stretch_widening: default_stretch_widening(),
            hvn_atr_fraction: default_hvn_atr_fraction(),
            base_multiplier: default_base_multiplier(),
            widened_multiplier: default_widened_multiplier(),
            widen_failure_count: default_widen_failure_count(),
        }
    }
}

// ============================================================================
// Inputs / outputs
// ============================================================================

/// Market analytics snapshot for one symbol.
///
/// Every field is optional: the analytics feed may be partial or absent,
/// and missing values take the passing default for their gate
/// (`aligned_timeframes` defaults to 1, which passes the >= 1 check).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    /// Current market price, used for the live risk-multiple reading.
    pub current_price: Option<Price>,
    /// Volatility compression detected.
    pub volatility_squeeze: Option<bool>,
    /// Number of aligned higher timeframes.
    pub aligned_timeframes: Option<u32>,
    /// Mean-reversion stretch reading (ATR multiples from the mean).
    pub mean_reversion_stretch: Option<f64>,
    /// Symbol-specific stretch threshold the strict analytics would use.
    pub stretch_threshold: Option<f64>,
    /// Price sits at a structural zone extreme.
    pub price_zone_extreme: Option<bool>,
    /// Distance from the candidate stop to the nearest high-volume node.
    pub hvn_distance: Option<Decimal>,
    /// Current average true range.
    pub atr: Option<Decimal>,
}

/// Evaluation result.
#[derive(Debug, Clone, PartialEq)]
pub struct GateDecision {
    /// Whether the critical gate passed and trailing may run.
    pub allow_trailing: bool,
    /// Trailing distance multiplier selected from advisory failures.
    pub multiplier: f64,
    /// Names of every failed gate (critical first when it failed).
    pub failed_gates: Vec<&'static str>,
}

// ============================================================================
// Evaluator
// ============================================================================

/// Pure gate evaluator. Deterministic for a given `(trade, context)`.
#[derive(Debug, Clone, Default)]
pub struct GateEvaluator {
    config: GateConfig,
}

impl GateEvaluator {
    #[must_use]
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    /// Evaluate all gates for one trade.
    ///
    /// The critical gate is the only one that can set
    /// `allow_trailing = false`; advisory failures only raise the
    /// multiplier.
    #[must_use]
    pub fn evaluate(&self, trade: &ManagedTrade, ctx: &MarketContext) -> GateDecision {
        let mut failed: Vec<&'static str> = Vec::new();

        if !self.critical_passes(trade, ctx) {
            failed.push("profit_floor");
        }
        let allow_trailing = failed.is_empty();

        let mut advisory_failures = 0usize;

        // Volatility squeeze: only an explicit squeeze reading fails.
        if ctx.volatility_squeeze == Some(true) {
            advisory_failures += 1;
            failed.push("volatility_squeeze");
        }

        // Missing alignment data counts as one aligned timeframe.
        if ctx.aligned_timeframes.unwrap_or(1) < 1 {
            advisory_failures += 1;
            failed.push("timeframe_alignment");
        }

        // Stretch check runs against the widened threshold; either input
        // missing means pass.
        if let (Some(stretch), Some(threshold)) =
            (ctx.mean_reversion_stretch, ctx.stretch_threshold)
        {
            if stretch > threshold * self.config.stretch_widening {
                advisory_failures += 1;
                failed.push("mean_reversion_stretch");
            }
        }

        // Price-zone extremity is diagnostic only and never fails.
        let _ = ctx.price_zone_extreme;

        if let (Some(distance), Some(atr)) = (ctx.hvn_distance, ctx.atr) {
            let min_distance =
                atr.to_f64().unwrap_or(0.0) * self.config.hvn_atr_fraction;
            if distance.to_f64().unwrap_or(f64::MAX) < min_distance {
                advisory_failures += 1;
                failed.push("hvn_proximity");
            }
        }

        let multiplier = if advisory_failures >= self.config.widen_failure_count {
            self.config.widened_multiplier
        } else {
            self.config.base_multiplier
        };

        if !failed.is_empty() {
            debug!(
                ticket = %trade.ticket,
                allow_trailing,
                multiplier,
                failed = ?failed,
                "Gate evaluation with failures"
            );
        }

        GateDecision {
            allow_trailing,
            multiplier,
            failed_gates: failed,
        }
    }

    /// Critical gate: the trade must have something worth protecting.
    fn critical_passes(&self, trade: &ManagedTrade, ctx: &MarketContext) -> bool {
        if trade.breakeven_triggered || trade.partial_profit_taken {
            return true;
        }
        let live_r = ctx
            .current_price
            .and_then(|p| trade.risk_multiple_at(p))
            .unwrap_or(f64::NEG_INFINITY);
        // The persisted ratchet counts too: once reached, 0.2R stays
        // reached even if price pulled back.
        live_r >= self.config.min_risk_multiple
            || trade.risk_multiple_achieved >= self.config.min_risk_multiple
    }
}
