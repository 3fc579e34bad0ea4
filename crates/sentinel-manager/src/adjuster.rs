//! External seams: broker position reads, exit modification, analytics.
//!
//! The managers only see these traits. The binary wires real HTTP-backed
//! implementations or the dry-run adjuster; tests plug in hand mocks.

use sentinel_core::{ExitTarget, Position, Ticket};
use sentinel_gates::MarketContext;
use std::pin::Pin;
use thiserror::Error;
use tracing::info;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum AdjusterError {
    /// The broker does not know the ticket (closed or never existed).
    #[error("Unknown ticket at broker: {0}")]
    UnknownTicket(Ticket),

    /// The broker rejected the modification.
    #[error("Modification rejected: {0}")]
    Rejected(String),

    /// Transport failure talking to the broker bridge.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Read-only view of broker positions.
pub trait PositionSource: Send + Sync {
    /// All currently open positions.
    fn positions(&self) -> BoxFuture<'_, Result<Vec<Position>, AdjusterError>>;

    /// One position by ticket; `Ok(None)` when the broker reports it
    /// closed.
    fn position(&self, ticket: Ticket) -> BoxFuture<'_, Result<Option<Position>, AdjusterError>>;
}

/// Capability to modify a position's exit parameters at the broker.
pub trait ExitAdjuster: Send + Sync {
    fn modify_exit(
        &self,
        ticket: Ticket,
        target: ExitTarget,
    ) -> BoxFuture<'_, Result<(), AdjusterError>>;
}

/// Per-symbol market analytics lookup for the gate evaluator.
///
/// Implementations read from a local cache; missing analytics are
/// expressed as `None` fields in the returned context, which the gates
/// treat as passing.
pub trait AnalyticsSource: Send + Sync {
    fn market_context(&self, symbol: &str) -> MarketContext;
}

/// Analytics source for deployments without an analytics feed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAnalytics;

impl AnalyticsSource for NoAnalytics {
    fn market_context(&self, _symbol: &str) -> MarketContext {
        MarketContext::default()
    }
}

/// Observation-mode adjuster: logs the modification it would have sent
/// and reports success.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunExitAdjuster;

impl ExitAdjuster for DryRunExitAdjuster {
    fn modify_exit(
        &self,
        ticket: Ticket,
        target: ExitTarget,
    ) -> BoxFuture<'_, Result<(), AdjusterError>> {
        Box::pin(async move {
            info!(
                ticket = %ticket,
                stop_loss = ?target.stop_loss,
                take_profit = ?target.take_profit,
                "Dry run: exit modification skipped"
            );
            Ok(())
        })
    }
}
