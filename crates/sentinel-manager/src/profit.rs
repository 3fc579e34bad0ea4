//! Profit-protection (breakeven) manager.

use crate::adjuster::{ExitAdjuster, PositionSource};
use crate::error::{ManagerError, ManagerResult};
use crate::locks::TicketLockSet;
use chrono::Utc;
use sentinel_core::{ExitTarget, Owner, Ticket};
use sentinel_queue::{OperationOutcome, QueueError, WriteKind, WriteQueue, DEFAULT_WAIT_TIMEOUT};
use sentinel_registry::{Registry, ZoneUpdate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitProtectionConfig {
    /// Cycle interval in seconds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Risk multiple at which the stop moves to entry.
    #[serde(default = "default_breakeven_r")]
    pub breakeven_r: f64,
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

fn default_breakeven_r() -> f64 {
    1.0
}

fn default_cooldown_secs() -> u64 {
    15
}

fn default_lock_timeout_ms() -> u64 {
    2000
}

impl Default for ProfitProtectionConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            breakeven_r: default_breakeven_r(),
            cooldown_secs: default_cooldown_secs(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

/// Moves the stop-loss to entry once the trade reaches the configured
/// risk multiple, sets the monotonic breakeven flag and releases
/// ownership again so the trailing manager can take over.
#[derive(Clone)]
pub struct ProfitProtectionManager {
    registry: Arc<Registry>,
    queue: WriteQueue,
    source: Arc<dyn PositionSource>,
    adjuster: Arc<dyn ExitAdjuster>,
    locks: TicketLockSet,
    config: ProfitProtectionConfig,
}

impl ProfitProtectionManager {
    pub fn new(
        registry: Arc<Registry>,
        queue: WriteQueue,
        source: Arc<dyn PositionSource>,
        adjuster: Arc<dyn ExitAdjuster>,
        locks: TicketLockSet,
        config: ProfitProtectionConfig,
    ) -> Self {
        Self {
            registry,
            queue,
            source,
            adjuster,
            locks,
            config,
        }
    }

    /// Periodic loop until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval_secs,
            breakeven_r = self.config.breakeven_r,
            "Profit protection manager started"
        );
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_cycle().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Profit protection manager stopped");
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
                warn!(ticket = %ticket, error = %e, "Profit protection cycle error");
            }
        }
    }

    async fn process_ticket(&self, ticket: Ticket) -> ManagerResult<()> {
        let Some(trade) = self.registry.get(ticket) else {
            return Ok(());
        };
        // The flag is monotonic: once triggered there is nothing left to
        // protect here.
        if trade.breakeven_triggered {
            return Ok(());
        }

        let position = match self.source.position(ticket).await {
            Ok(Some(p)) => p,
            Ok(None) => {
                trace!(ticket = %ticket, "Position closed, skipping");
                return Ok(());
            }
            Err(e) => {
                warn!(ticket = %ticket, error = %e, "Position lookup failed, skipping");
                return Ok(());
            }
        };

        let Some(live_r) = trade.risk_multiple_at(position.current_price) else {
            // No initial risk distance: breakeven by R is undefined.
            return Ok(());
        };
        if live_r < self.config.breakeven_r {
            return Ok(());
        }

        if !self.registry.would_grant(ticket, Owner::ProfitProtection) {
            debug!(ticket = %ticket, "Ownership held elsewhere, skipping");
            return Ok(());
        }
        let granted = match self.queue.submit(WriteKind::UpdateOwnership {
            ticket,
            candidate: Owner::ProfitProtection,
        }) {
            Ok(w) => w.wait(DEFAULT_WAIT_TIMEOUT).await? == OperationOutcome::Applied,
            Err(QueueError::Validation(_)) => false,
            Err(e) => return Err(ManagerError::Queue(e)),
        };
        if !granted {
            debug!(ticket = %ticket, "Ownership not granted, skipping cycle");
            return Ok(());
        }

        let _guard = self
            .locks
            .acquire(ticket, Duration::from_millis(self.config.lock_timeout_ms))
            .await?;

        // Double-check after the lock.
        let Some(trade) = self.registry.get(ticket) else {
            return Ok(());
        };
        if trade.owner != Owner::ProfitProtection || trade.breakeven_triggered {
            return Ok(());
        }
        if self.source.position(ticket).await.ok().flatten().is_none() {
            debug!(ticket = %ticket, "Position gone before adjusting, aborting");
            return Ok(());
        }
        if !trade.cooldown_elapsed(Utc::now(), self.config.cooldown_secs) {
            trace!(ticket = %ticket, "Modification cooldown active");
            return Ok(());
        }

        self.adjuster
            .modify_exit(ticket, ExitTarget::stop_only(trade.entry_price))
            .await?;
        info!(ticket = %ticket, entry = %trade.entry_price, live_r, "Stop moved to breakeven");

        self.queue
            .submit(WriteKind::UpdateZoneState {
                ticket,
                update: ZoneUpdate {
                    breakeven_triggered: Some(true),
                    risk_multiple: Some(live_r),
                    touch_modification: true,
                    ..Default::default()
                },
            })?
            .wait(DEFAULT_WAIT_TIMEOUT)
            .await?;

        // Hand the ticket back so trailing can pick it up next cycle.
        self.queue.submit(WriteKind::UpdateOwnership {
            ticket,
            candidate: Owner::None,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{harness, long_position, Harness};
    use rust_decimal_macros::dec;
    use sentinel_core::Price;

    fn manager(h: &Harness, config: ProfitProtectionConfig) -> ProfitProtectionManager {
        ProfitProtectionManager::new(
            Arc::clone(&h.registry),
            h.queue.clone(),
            h.broker.clone(),
            h.broker.clone(),
            TicketLockSet::new(),
            config,
        )
    }

    #[tokio::test]
    async fn test_breakeven_below_threshold_does_nothing() {
        let h = harness().await;
        // 0.6R, below the 1.0R default.
        h.register(long_position(1001, dec!(100), dec!(95), dec!(103)))
            .await;

        manager(&h, ProfitProtectionConfig::default()).run_cycle().await;
        assert!(h.broker.modifications().is_empty());
        h.finish().await;
    }

    #[tokio::test]
    async fn test_breakeven_triggers_once_and_releases_ownership() {
        let h = harness().await;
        // 1.0R exactly.
        let ticket = h
            .register(long_position(1001, dec!(100), dec!(95), dec!(105)))
            .await;

        let m = manager(&h, ProfitProtectionConfig::default());
        m.run_cycle().await;

        let mods = h.broker.modifications();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].1.stop_loss, Some(Price::new(dec!(100))));

        h.queue
            .flush_pending_for(ticket, Duration::from_secs(5))
            .await
            .unwrap();
        let trade = h.registry.get(ticket).unwrap();
        assert!(trade.breakeven_triggered);
        assert_eq!(trade.owner, Owner::None);
        assert!(trade.risk_multiple_achieved >= 1.0);

        // Second cycle is a no-op: the flag is monotonic.
        m.run_cycle().await;
        assert_eq!(h.broker.modifications().len(), 1);
        h.finish().await;
    }

    #[tokio::test]
    async fn test_skips_when_defensive_owns() {
        let h = harness().await;
        let ticket = h
            .register(long_position(1001, dec!(100), dec!(95), dec!(105)))
            .await;
        h.own(ticket, Owner::Defensive).await;

        manager(&h, ProfitProtectionConfig::default()).run_cycle().await;
        assert!(h.broker.modifications().is_empty());
        h.finish().await;
    }

    #[tokio::test]
    async fn test_unknown_initial_risk_is_skipped() {
        let h = harness().await;
        let mut position = long_position(1001, dec!(100), dec!(95), dec!(110));
        position.stop_loss = None;
        h.register(position).await;

        manager(&h, ProfitProtectionConfig::default()).run_cycle().await;
        assert!(h.broker.modifications().is_empty());
        h.finish().await;
    }
}
