//! Boot-time reconciliation of the registry against broker positions.
//!
//! Runs once before readiness is announced. Three cases:
//! local-only records are removed (the position closed while the service
//! was down), broker-only positions are registered, and records whose
//! identity fields diverge from the broker view are replaced atomically.
//! When the position source itself fails, nothing is removed; a partial
//! broker view must never empty the registry.

use crate::error::AppResult;
use chrono::Utc;
use sentinel_core::{ManagedTrade, Position, Ticket};
use sentinel_manager::PositionSource;
use sentinel_queue::{WriteKind, WriteQueue, DEFAULT_WAIT_TIMEOUT};
use sentinel_registry::Registry;
use std::collections::HashMap;
use tracing::{info, warn};

/// Counts of the actions taken by one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Registered records examined.
    pub examined: usize,
    /// Broker-only positions registered.
    pub registered: usize,
    /// Local-only records removed.
    pub removed: usize,
    /// Diverging records replaced.
    pub replaced: usize,
    /// True when the position source failed and removals were skipped.
    pub source_unavailable: bool,
}

/// Reconcile the registry with the broker's open positions.
pub async fn reconcile(
    registry: &Registry,
    queue: &WriteQueue,
    source: &dyn PositionSource,
) -> AppResult<ReconcileSummary> {
    let mut summary = ReconcileSummary {
        examined: registry.len(),
        ..ReconcileSummary::default()
    };

    let external = match source.positions().await {
        Ok(positions) => positions,
        Err(e) => {
            warn!(error = %e, "Position source unavailable, skipping reconciliation removals");
            summary.source_unavailable = true;
            return Ok(summary);
        }
    };
    let by_ticket: HashMap<Ticket, Position> =
        external.into_iter().map(|p| (p.ticket, p)).collect();

    for trade in registry.snapshot() {
        match by_ticket.get(&trade.ticket) {
            None => {
                info!(ticket = %trade.ticket, "Position closed at broker, removing record");
                queue
                    .submit(WriteKind::RemoveTrade {
                        ticket: trade.ticket,
                    })?
                    .wait(DEFAULT_WAIT_TIMEOUT)
                    .await?;
                summary.removed += 1;
            }
            Some(position) if diverges(&trade, position) => {
                info!(
                    ticket = %trade.ticket,
                    "Record diverges from broker position, replacing"
                );
                queue
                    .submit(WriteKind::CompositeReplace {
                        trade: rebuilt(&trade, position),
                    })?
                    .wait(DEFAULT_WAIT_TIMEOUT)
                    .await?;
                summary.replaced += 1;
            }
            Some(_) => {}
        }
    }

    for (ticket, position) in &by_ticket {
        if !registry.contains(*ticket) {
            info!(ticket = %ticket, symbol = %position.symbol, "Registering broker position");
            queue
                .submit(WriteKind::RegisterTrade {
                    trade: ManagedTrade::from_position(position, Utc::now()),
                })?
                .wait(DEFAULT_WAIT_TIMEOUT)
                .await?;
            summary.registered += 1;
        }
    }

    info!(
        examined = summary.examined,
        registered = summary.registered,
        removed = summary.removed,
        replaced = summary.replaced,
        "Reconciliation complete"
    );
    Ok(summary)
}

/// Whether the record's identity fields disagree with the broker view.
fn diverges(trade: &ManagedTrade, position: &Position) -> bool {
    trade.symbol != position.symbol
        || trade.direction != position.direction
        || trade.entry_price != position.entry_price
}

/// Replacement record: broker identity fields, existing coordination
/// state. Monotonic flags and the registration timestamp are preserved
/// by the replace apply itself.
fn rebuilt(existing: &ManagedTrade, position: &Position) -> ManagedTrade {
    let mut trade = ManagedTrade::from_position(position, Utc::now());
    trade.owner = existing.owner;
    trade.defensive_state = existing.defensive_state;
    trade.trailing_active = existing.trailing_active;
    trade.trailing_multiplier = existing.trailing_multiplier;
    trade.last_modification = existing.last_modification;
    trade
}
