//! Defensive manager: state transitions and protective tightening.

use crate::adjuster::{ExitAdjuster, PositionSource};
use crate::error::{ManagerError, ManagerResult};
use crate::locks::TicketLockSet;
use chrono::Utc;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sentinel_core::{DefensiveState, Direction, ExitTarget, Owner, Price, Ticket};
use sentinel_defense::DefenseTracker;
use sentinel_queue::{OperationOutcome, QueueError, WriteKind, WriteQueue, DEFAULT_WAIT_TIMEOUT};
use sentinel_registry::Registry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefensiveManagerConfig {
    /// Cycle interval in seconds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Fraction of the initial risk distance kept when tightening the
    /// stop under an override.
    #[serde(default = "default_tighten_fraction")]
    pub tighten_fraction: f64,
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

fn default_tighten_fraction() -> f64 {
    0.5
}

fn default_cooldown_secs() -> u64 {
    15
}

fn default_lock_timeout_ms() -> u64 {
    2000
}

impl Default for DefensiveManagerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            tighten_fraction: default_tighten_fraction(),
            cooldown_secs: default_cooldown_secs(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

/// Drives each ticket's defensive state from the risk-score feed and
/// takes over exit management while the state grants the override.
///
/// Ownership is released once the state drops to WARNING_L1 or below;
/// the displaced manager re-acquires through normal arbitration, never by
/// automatic hand-back.
#[derive(Clone)]
pub struct DefensiveManager {
    registry: Arc<Registry>,
    queue: WriteQueue,
    tracker: Arc<DefenseTracker>,
    source: Arc<dyn PositionSource>,
    adjuster: Arc<dyn ExitAdjuster>,
    locks: TicketLockSet,
    config: DefensiveManagerConfig,
}

impl DefensiveManager {
    pub fn new(
        registry: Arc<Registry>,
        queue: WriteQueue,
        tracker: Arc<DefenseTracker>,
        source: Arc<dyn PositionSource>,
        adjuster: Arc<dyn ExitAdjuster>,
        locks: TicketLockSet,
        config: DefensiveManagerConfig,
    ) -> Self {
        Self {
            registry,
            queue,
            tracker,
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
            "Defensive manager started"
        );
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_cycle().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Defensive manager stopped");
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
                warn!(ticket = %ticket, error = %e, "Defensive cycle error");
            }
        }
    }

    async fn process_ticket(&self, ticket: Ticket) -> ManagerResult<()> {
        let Some(trade) = self.registry.get(ticket) else {
            return Ok(());
        };

        // Advance the state machine first; a stale feed holds the current
        // state and changes nothing else.
        let assessment = self.tracker.assess(ticket, trade.defensive_state, Utc::now());
        let state = match assessment.proposed {
            Some(next) => {
                self.submit_wait(WriteKind::UpdateState {
                    ticket,
                    state: next,
                })
                .await?;
                next
            }
            None => trade.defensive_state,
        };
        if assessment.stale {
            debug!(ticket = %ticket, state = %state, "Risk feed stale, holding state");
        }

        if state.grants_override() {
            self.protect(ticket, state).await
        } else {
            self.release_if_held(ticket, state).await
        }
    }

    /// Take the ticket over and tighten its stop.
    async fn protect(&self, ticket: Ticket, state: DefensiveState) -> ManagerResult<()> {
        let granted = self
            .submit_wait(WriteKind::UpdateOwnership {
                ticket,
                candidate: Owner::Defensive,
            })
            .await?;
        if granted != Some(OperationOutcome::Applied) {
            // With the override active this only happens when the ticket
            // vanished mid-cycle.
            debug!(ticket = %ticket, "Defensive takeover not applied, skipping");
            return Ok(());
        }

        let _guard = self
            .locks
            .acquire(ticket, Duration::from_millis(self.config.lock_timeout_ms))
            .await?;

        let Some(trade) = self.registry.get(ticket) else {
            return Ok(());
        };
        if trade.owner != Owner::Defensive {
            return Ok(());
        }
        let position = match self.source.position(ticket).await {
            Ok(Some(p)) => p,
            _ => {
                debug!(ticket = %ticket, "Position gone before tightening, aborting");
                return Ok(());
            }
        };
        if !trade.cooldown_elapsed(Utc::now(), self.config.cooldown_secs) {
            return Ok(());
        }

        let Some(target) = tightened_stop(
            trade.direction,
            trade.entry_price,
            trade.initial_risk,
            position.stop_loss,
            self.config.tighten_fraction,
        ) else {
            return Ok(());
        };

        self.adjuster.modify_exit(ticket, target).await?;
        info!(
            ticket = %ticket,
            state = %state,
            stop_loss = ?target.stop_loss,
            "Defensive stop tightened"
        );
        self.submit_wait(WriteKind::UpdateZoneState {
            ticket,
            update: sentinel_registry::ZoneUpdate {
                touch_modification: true,
                ..Default::default()
            },
        })
        .await?;
        Ok(())
    }

    /// Release ownership once the override has lapsed.
    async fn release_if_held(&self, ticket: Ticket, state: DefensiveState) -> ManagerResult<()> {
        let Some(trade) = self.registry.get(ticket) else {
            return Ok(());
        };
        if trade.owner != Owner::Defensive {
            return Ok(());
        }
        info!(ticket = %ticket, state = %state, "Defensive override lapsed, releasing");
        self.submit_wait(WriteKind::UpdateOwnership {
            ticket,
            candidate: Owner::None,
        })
        .await?;
        Ok(())
    }

    async fn submit_wait(&self, kind: WriteKind) -> ManagerResult<Option<OperationOutcome>> {
        match self.queue.submit(kind) {
            Ok(w) => Ok(Some(w.wait(DEFAULT_WAIT_TIMEOUT).await?)),
            Err(QueueError::Validation(reason)) => {
                debug!(reason = %reason, "Write rejected by validation, skipping");
                Ok(None)
            }
            Err(e) => Err(ManagerError::Queue(e)),
        }
    }
}

/// Defensive stop: keep only `fraction` of the initial risk beyond entry.
///
/// Long at 100 with 5 risk and fraction 0.5 gives a stop at 97.5. Only
/// returned when it tightens the existing stop.
fn tightened_stop(
    direction: Direction,
    entry: Price,
    initial_risk: Decimal,
    current_stop: Option<Price>,
    fraction: f64,
) -> Option<ExitTarget> {
    if initial_risk.is_zero() {
        return None;
    }
    let kept = initial_risk * Decimal::from_f64(fraction)?;
    let candidate = match direction {
        Direction::Long => Price::new(entry.inner() - kept),
        Direction::Short => Price::new(entry.inner() + kept),
    };
    let improves = match (direction, current_stop) {
        (_, None) => true,
        (Direction::Long, Some(stop)) => candidate > stop,
        (Direction::Short, Some(stop)) => candidate < stop,
    };
    improves.then(|| ExitTarget::stop_only(candidate))
}
