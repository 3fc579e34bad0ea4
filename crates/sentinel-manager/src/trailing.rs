//! Primary trailing-stop manager.

use crate::adjuster::{AdjusterError, AnalyticsSource, ExitAdjuster, PositionSource};
use crate::error::{ManagerError, ManagerResult};
use crate::locks::TicketLockSet;
use chrono::Utc;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sentinel_core::{Direction, ExitTarget, ManagedTrade, Owner, Position, Price, Ticket};
use sentinel_gates::GateEvaluator;
use sentinel_queue::{OperationOutcome, QueueError, WriteKind, WriteQueue, DEFAULT_WAIT_TIMEOUT};
use sentinel_registry::{Registry, ZoneUpdate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingConfig {
    /// Cycle interval in seconds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Minimum seconds between exit modifications per trade.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Per-ticket execution lock timeout in milliseconds.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_interval_secs() -> u64 {
    30
}

fn default_cooldown_secs() -> u64 {
    15
}

fn default_lock_timeout_ms() -> u64 {
    2000
}

impl Default for TrailingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            cooldown_secs: default_cooldown_secs(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

/// Trails the stop-loss behind price once the gates allow it.
///
/// Per ticket and cycle: snapshot → existence re-check → gate evaluation
/// → ownership acquisition through the queue → execution lock →
/// double-check → adjuster call. Conflicts and missing tickets are skips,
/// never errors.
#[derive(Clone)]
pub struct TrailingManager {
    registry: Arc<Registry>,
    queue: WriteQueue,
    evaluator: Arc<GateEvaluator>,
    source: Arc<dyn PositionSource>,
    adjuster: Arc<dyn ExitAdjuster>,
    analytics: Arc<dyn AnalyticsSource>,
    locks: TicketLockSet,
    config: TrailingConfig,
}

impl TrailingManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<Registry>,
        queue: WriteQueue,
        evaluator: Arc<GateEvaluator>,
        source: Arc<dyn PositionSource>,
        adjuster: Arc<dyn ExitAdjuster>,
        analytics: Arc<dyn AnalyticsSource>,
        locks: TicketLockSet,
        config: TrailingConfig,
    ) -> Self {
        Self {
            registry,
            queue,
            evaluator,
            source,
            adjuster,
            analytics,
            locks,
            config,
        }
    }

    /// Periodic loop until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval_secs,
            "Trailing manager started"
        );
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_cycle().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Trailing manager stopped");
                        return;
                    }
                }
            }
        }
    }

    /// One pass over every registered ticket.
    pub async fn run_cycle(&self) {
        for ticket in self.registry.tickets() {
            if let Err(e) = self.process_ticket(ticket).await {
                warn!(ticket = %ticket, error = %e, "Trailing cycle error for ticket");
            }
        }
    }

    async fn process_ticket(&self, ticket: Ticket) -> ManagerResult<()> {
        // Concurrent removal between snapshot and here is a skip.
        let Some(trade) = self.registry.get(ticket) else {
            return Ok(());
        };

        let position = match self.source.position(ticket).await {
            Ok(Some(p)) => p,
            Ok(None) | Err(AdjusterError::UnknownTicket(_)) => {
                info!(ticket = %ticket, "Position closed at broker, removing");
                self.submit_skip_validation(WriteKind::RemoveTrade { ticket })?;
                return Ok(());
            }
            Err(e) => {
                // Transport trouble: never remove on uncertainty.
                warn!(ticket = %ticket, error = %e, "Position lookup failed, skipping");
                return Ok(());
            }
        };

        let mut ctx = self.analytics.market_context(&trade.symbol);
        ctx.current_price = Some(position.current_price);
        let decision = self.evaluator.evaluate(&trade, &ctx);
        if !decision.allow_trailing {
            trace!(ticket = %ticket, failed = ?decision.failed_gates, "Trailing gated off");
            return Ok(());
        }

        // Fast-path check; the worker re-arbitrates authoritatively.
        if !self.registry.would_grant(ticket, Owner::PrimaryTrailing) {
            debug!(ticket = %ticket, "Ownership held elsewhere, skipping");
            return Ok(());
        }
        let Some(write) = self.submit_skip_validation(WriteKind::UpdateOwnership {
            ticket,
            candidate: Owner::PrimaryTrailing,
        })?
        else {
            return Ok(());
        };
        if write.wait(DEFAULT_WAIT_TIMEOUT).await? != OperationOutcome::Applied {
            debug!(ticket = %ticket, "Ownership not granted, skipping cycle");
            return Ok(());
        }

        let _guard = self
            .locks
            .acquire(ticket, Duration::from_millis(self.config.lock_timeout_ms))
            .await?;

        // Double-check after the lock: the authoritative state may have
        // moved between the fast path and here.
        let Some(trade) = self.registry.get(ticket) else {
            return Ok(());
        };
        if trade.owner != Owner::PrimaryTrailing {
            debug!(ticket = %ticket, owner = %trade.owner, "Lost ownership before adjusting");
            return Ok(());
        }
        let position = match self.source.position(ticket).await {
            Ok(Some(p)) => p,
            _ => {
                debug!(ticket = %ticket, "Position gone before adjusting, aborting");
                return Ok(());
            }
        };

        let now = Utc::now();
        if !trade.cooldown_elapsed(now, self.config.cooldown_secs) {
            trace!(ticket = %ticket, "Modification cooldown active");
            return Ok(());
        }

        let Some(target) = trailing_stop(&trade, &position, decision.multiplier) else {
            return Ok(());
        };

        self.adjuster.modify_exit(ticket, target).await?;
        info!(
            ticket = %ticket,
            stop_loss = ?target.stop_loss,
            multiplier = decision.multiplier,
            "Trailing stop adjusted"
        );

        self.submit_skip_validation(WriteKind::UpdateZoneState {
            ticket,
            update: ZoneUpdate {
                trailing_active: Some(true),
                trailing_multiplier: Some(decision.multiplier),
                risk_multiple: trade.risk_multiple_at(position.current_price),
                touch_modification: true,
                ..Default::default()
            },
        })?;
        Ok(())
    }

    /// Submit, treating a validation rejection (ticket removed
    /// concurrently) as a skip instead of an error.
    fn submit_skip_validation(
        &self,
        kind: WriteKind,
    ) -> ManagerResult<Option<sentinel_queue::EnqueuedWrite>> {
        match self.queue.submit(kind) {
            Ok(w) => Ok(Some(w)),
            Err(QueueError::Validation(reason)) => {
                debug!(reason = %reason, "Write rejected by validation, skipping");
                Ok(None)
            }
            Err(e) => Err(ManagerError::Queue(e)),
        }
    }
}

/// Candidate trailing stop, `None` when no tightening move exists.
///
/// The stop trails `multiplier * initial_risk` behind the current price
/// and only ever moves in the protective direction.
fn trailing_stop(
    trade: &ManagedTrade,
    position: &Position,
    multiplier: f64,
) -> Option<ExitTarget> {
    if trade.initial_risk.is_zero() {
        return None;
    }
    let distance = trade.initial_risk * Decimal::from_f64(multiplier)?;

    let candidate = match trade.direction {
        Direction::Long => Price::new(position.current_price.inner() - distance),
        Direction::Short => Price::new(position.current_price.inner() + distance),
    };

    let improves = match (trade.direction, position.stop_loss) {
        (_, None) => true,
        (Direction::Long, Some(current)) => candidate > current,
        (Direction::Short, Some(current)) => candidate < current,
    };
    improves.then(|| ExitTarget::stop_only(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{harness, long_position, Harness};
    use rust_decimal_macros::dec;

    fn manager(h: &Harness, config: TrailingConfig) -> TrailingManager {
        TrailingManager::new(
            Arc::clone(&h.registry),
            h.queue.clone(),
            Arc::new(GateEvaluator::default()),
            h.broker.clone(),
            h.broker.clone(),
            Arc::new(crate::adjuster::NoAnalytics),
            TicketLockSet::new(),
            config,
        )
    }

    fn no_cooldown() -> TrailingConfig {
        TrailingConfig {
            cooldown_secs: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_gated_trade_is_not_adjusted() {
        let h = harness().await;
        // Flat position at entry: critical gate fails.
        h.register(long_position(1001, dec!(100), dec!(95), dec!(100)))
            .await;

        manager(&h, no_cooldown()).run_cycle().await;
        assert!(h.broker.modifications().is_empty());
        h.finish().await;
    }

    #[tokio::test]
    async fn test_trailing_moves_stop_and_persists_flags() {
        let h = harness().await;
        // Price at 103 is 0.6R: critical gate passes on the live reading.
        let ticket = h
            .register(long_position(1001, dec!(100), dec!(95), dec!(103)))
            .await;

        let m = manager(&h, no_cooldown());
        m.run_cycle().await;

        let mods = h.broker.modifications();
        assert_eq!(mods.len(), 1);
        // Distance 1.5 * 5 = 7.5 below price 103, above the old stop at 95.
        assert_eq!(mods[0].1.stop_loss, Some(Price::new(dec!(95.5))));

        h.queue
            .flush_pending_for(ticket, Duration::from_secs(5))
            .await
            .unwrap();
        let trade = h.registry.get(ticket).unwrap();
        assert!(trade.trailing_active);
        assert_eq!(trade.owner, Owner::PrimaryTrailing);
        assert!(trade.last_modification.is_some());
        h.finish().await;
    }

    #[tokio::test]
    async fn test_stop_is_never_loosened() {
        let h = harness().await;
        // Existing stop at 98 already tighter than 102 - 7.5 = 94.5.
        let mut position = long_position(1001, dec!(100), dec!(95), dec!(102));
        position.stop_loss = Some(Price::new(dec!(98)));
        h.register(position).await;

        manager(&h, no_cooldown()).run_cycle().await;
        assert!(h.broker.modifications().is_empty());
        h.finish().await;
    }

    #[tokio::test]
    async fn test_skips_when_another_manager_owns() {
        let h = harness().await;
        let ticket = h
            .register(long_position(1001, dec!(100), dec!(95), dec!(102)))
            .await;
        h.own(ticket, Owner::ProfitProtection).await;

        manager(&h, no_cooldown()).run_cycle().await;
        assert!(h.broker.modifications().is_empty());
        assert_eq!(h.registry.get(ticket).unwrap().owner, Owner::ProfitProtection);
        h.finish().await;
    }

    #[tokio::test]
    async fn test_closed_position_is_removed() {
        let h = harness().await;
        let ticket = h
            .register(long_position(1001, dec!(100), dec!(95), dec!(102)))
            .await;
        h.broker.close(ticket);

        manager(&h, no_cooldown()).run_cycle().await;
        h.queue
            .flush_pending_for(ticket, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!h.registry.contains(ticket));
        h.finish().await;
    }

    #[tokio::test]
    async fn test_cooldown_blocks_repeat_modification() {
        let h = harness().await;
        let ticket = h
            .register(long_position(1001, dec!(100), dec!(95), dec!(103)))
            .await;

        let m = manager(&h, TrailingConfig::default());
        m.run_cycle().await;
        assert_eq!(h.broker.modifications().len(), 1);
        h.queue
            .flush_pending_for(ticket, Duration::from_secs(5))
            .await
            .unwrap();

        // Second pass inside the 15s cooldown changes nothing.
        m.run_cycle().await;
        assert_eq!(h.broker.modifications().len(), 1);
        h.finish().await;
    }

    #[test]
    fn test_trailing_stop_short_direction() {
        let now = Utc::now();
        let position = long_position(1, dec!(100), dec!(105), dec!(97));
        let mut position = Position {
            direction: Direction::Short,
            ..position
        };
        let trade = ManagedTrade::from_position(&position, now);
        position.stop_loss = Some(Price::new(dec!(105)));

        // Risk 5, multiplier 1.5: stop 7.5 above price 97 = 104.5.
        let target = trailing_stop(&trade, &position, 1.5).unwrap();
        assert_eq!(target.stop_loss, Some(Price::new(dec!(104.5))));
    }
}
