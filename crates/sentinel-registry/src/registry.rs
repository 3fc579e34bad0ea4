//! In-memory registry view with durable write-through and ownership
//! arbitration.
//!
//! # Mutation discipline
//!
//! Every `apply_*` method persists to the [`TradeStore`] first and only
//! then updates the in-memory map, so the durable record stays
//! authoritative: a `StoreBusy` failure leaves memory untouched and the
//! write queue retries the whole operation.

use crate::error::{RegistryError, RegistryResult};
use crate::store::TradeStore;
use chrono::Utc;
use dashmap::DashMap;
use sentinel_core::{DefensiveState, ManagedTrade, Owner, Ticket};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default TTL for the ownership read cache.
pub const OWNERSHIP_CACHE_TTL: Duration = Duration::from_secs(5);

// ============================================================================
// Arbitration
// ============================================================================

/// Ownership arbitration rule.
///
/// Acquisition succeeds when:
/// - the ticket is unowned, or
/// - the candidate already owns it (idempotent re-acquire), or
/// - the candidate is the defensive manager and the defensive state grants
///   the override (`WARNING_L2` / `HEDGED`) — defensive action always wins.
///
/// `Owner::None` as candidate is an explicit release and is always allowed.
#[must_use]
pub fn ownership_allows(trade: &ManagedTrade, candidate: Owner) -> bool {
    if candidate == Owner::None {
        return true;
    }
    if trade.owner == Owner::None || trade.owner == candidate {
        return true;
    }
    candidate == Owner::Defensive && trade.defensive_state.grants_override()
}

// ============================================================================
// Views
// ============================================================================

/// Lightweight ownership answer for cross-process callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipView {
    pub ticket: Ticket,
    pub owner: Owner,
    pub breakeven_triggered: bool,
    pub defensive_state: DefensiveState,
}

/// Outcome of an idempotent registration.
#[derive(Debug, Clone)]
pub enum RegisterOutcome {
    /// A new record was created.
    Registered(ManagedTrade),
    /// The ticket was already registered; the existing record is returned
    /// unchanged.
    AlreadyRegistered(ManagedTrade),
}

impl RegisterOutcome {
    #[must_use]
    pub fn trade(&self) -> &ManagedTrade {
        match self {
            RegisterOutcome::Registered(t) | RegisterOutcome::AlreadyRegistered(t) => t,
        }
    }

    #[must_use]
    pub fn already_registered(&self) -> bool {
        matches!(self, RegisterOutcome::AlreadyRegistered(_))
    }
}

/// Partial update of exit-zone flags.
///
/// `None` fields are left untouched. Monotonic fields are clamped:
/// `breakeven_triggered` never reverts to false and `risk_multiple` only
/// ratchets upward.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneUpdate {
    pub breakeven_triggered: Option<bool>,
    pub trailing_active: Option<bool>,
    pub trailing_multiplier: Option<f64>,
    pub risk_multiple: Option<f64>,
    pub partial_profit_taken: Option<bool>,
    /// Stamp `last_modification` (cooldown clock) with the apply time.
    #[serde(default)]
    pub touch_modification: bool,
}

// ============================================================================
// Registry
// ============================================================================

/// Ownership registry: authoritative map of managed trades.
pub struct Registry {
    trades: DashMap<Ticket, ManagedTrade>,
    store: TradeStore,
    ownership_cache: DashMap<Ticket, (OwnershipView, Instant)>,
    cache_ttl: Duration,
}

impl Registry {
    /// Open the registry, loading persisted records from `path`.
    pub fn open(path: impl AsRef<Path>) -> RegistryResult<Self> {
        Self::open_with_cache_ttl(path, OWNERSHIP_CACHE_TTL)
    }

    /// Open with an explicit ownership-cache TTL (tests use short TTLs).
    pub fn open_with_cache_ttl(
        path: impl AsRef<Path>,
        cache_ttl: Duration,
    ) -> RegistryResult<Self> {
        let (store, records) = TradeStore::open(path)?;
        let trades = DashMap::new();
        for trade in records {
            trades.insert(trade.ticket, trade);
        }
        info!(records = trades.len(), "Registry loaded");
        Ok(Self {
            trades,
            store,
            ownership_cache: DashMap::new(),
            cache_ttl,
        })
    }

    // === Read API ===

    /// Get a snapshot of one trade.
    #[must_use]
    pub fn get(&self, ticket: Ticket) -> Option<ManagedTrade> {
        self.trades.get(&ticket).map(|r| r.value().clone())
    }

    /// Whether the ticket is registered.
    #[must_use]
    pub fn contains(&self, ticket: Ticket) -> bool {
        self.trades.contains_key(&ticket)
    }

    /// All registered tickets.
    #[must_use]
    pub fn tickets(&self) -> Vec<Ticket> {
        self.trades.iter().map(|r| *r.key()).collect()
    }

    /// Snapshot of all trades.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ManagedTrade> {
        self.trades.iter().map(|r| r.value().clone()).collect()
    }

    /// Number of registered trades.
    #[must_use]
    pub fn len(&self) -> usize {
        self.trades.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    /// Ownership query with a short read-side cache.
    ///
    /// The cache bounds call volume from the periodic managers and the
    /// remote facade; staleness up to the TTL is acceptable because the
    /// worker re-verifies ownership at apply time.
    #[must_use]
    pub fn ownership(&self, ticket: Ticket) -> Option<OwnershipView> {
        if let Some(entry) = self.ownership_cache.get(&ticket) {
            let (view, cached_at) = *entry;
            if cached_at.elapsed() < self.cache_ttl {
                return Some(view);
            }
        }

        let view = self.trades.get(&ticket).map(|r| OwnershipView {
            ticket,
            owner: r.owner,
            breakeven_triggered: r.breakeven_triggered,
            defensive_state: r.defensive_state,
        })?;
        self.ownership_cache.insert(ticket, (view, Instant::now()));
        Some(view)
    }

    /// Fast-path arbitration check against the current snapshot.
    ///
    /// Advisory only: the authoritative check runs again inside the write
    /// queue worker when the `UpdateOwnership` operation executes
    /// (double-check pattern).
    #[must_use]
    pub fn would_grant(&self, ticket: Ticket, candidate: Owner) -> bool {
        self.trades
            .get(&ticket)
            .map(|r| ownership_allows(&r, candidate))
            .unwrap_or(false)
    }

    // === Mutation API (write-queue worker only) ===

    /// Idempotent registration: an existing ticket returns the stored
    /// record instead of creating a duplicate.
    pub fn apply_register(&self, trade: ManagedTrade) -> RegistryResult<RegisterOutcome> {
        if let Some(existing) = self.get(trade.ticket) {
            debug!(ticket = %trade.ticket, "Register: already registered");
            return Ok(RegisterOutcome::AlreadyRegistered(existing));
        }

        self.store.upsert(&trade)?;
        self.trades.insert(trade.ticket, trade.clone());
        self.invalidate(trade.ticket);
        info!(ticket = %trade.ticket, symbol = %trade.symbol, "Trade registered");
        Ok(RegisterOutcome::Registered(trade))
    }

    /// Apply an ownership change under the arbitration rule.
    ///
    /// Returns `Ok(true)` when granted, `Ok(false)` on an ownership
    /// conflict (not an error: the caller skips its cycle).
    pub fn apply_ownership(&self, ticket: Ticket, candidate: Owner) -> RegistryResult<bool> {
        let current = self.get(ticket).ok_or(RegistryError::UnknownTicket(ticket))?;

        if !ownership_allows(&current, candidate) {
            debug!(
                ticket = %ticket,
                holder = %current.owner,
                candidate = %candidate,
                "Ownership conflict, not granted"
            );
            return Ok(false);
        }

        if current.owner == candidate {
            // Idempotent re-acquire, nothing to persist.
            return Ok(true);
        }

        let mut updated = current;
        updated.owner = candidate;
        updated.last_updated = Utc::now();

        self.store.upsert(&updated)?;
        self.trades.insert(ticket, updated);
        self.invalidate(ticket);
        info!(ticket = %ticket, owner = %candidate, "Ownership updated");
        Ok(true)
    }

    /// Apply a partial zone update, enforcing monotonic flags.
    pub fn apply_zone_update(&self, ticket: Ticket, update: &ZoneUpdate) -> RegistryResult<()> {
        let mut trade = self.get(ticket).ok_or(RegistryError::UnknownTicket(ticket))?;
        let now = Utc::now();

        if update.breakeven_triggered == Some(true) {
            trade.breakeven_triggered = true;
        }
        if let Some(active) = update.trailing_active {
            trade.trailing_active = active;
        }
        if let Some(mult) = update.trailing_multiplier {
            trade.trailing_multiplier = mult;
        }
        if let Some(r) = update.risk_multiple {
            // Profit-side ratchet only.
            if r > trade.risk_multiple_achieved {
                trade.risk_multiple_achieved = r;
            }
        }
        if update.partial_profit_taken == Some(true) {
            trade.partial_profit_taken = true;
        }
        if update.touch_modification {
            trade.last_modification = Some(now);
        }
        trade.last_updated = now;

        self.store.upsert(&trade)?;
        self.trades.insert(ticket, trade);
        self.invalidate(ticket);
        Ok(())
    }

    /// Apply a defensive state change.
    pub fn apply_state(&self, ticket: Ticket, state: DefensiveState) -> RegistryResult<()> {
        let mut trade = self.get(ticket).ok_or(RegistryError::UnknownTicket(ticket))?;
        if trade.defensive_state == state {
            return Ok(());
        }
        trade.defensive_state = state;
        trade.last_updated = Utc::now();

        self.store.upsert(&trade)?;
        self.trades.insert(ticket, trade);
        self.invalidate(ticket);
        info!(ticket = %ticket, state = %state, "Defensive state updated");
        Ok(())
    }

    /// Remove a trade (position closed or cancelled).
    ///
    /// Requires no ownership: position closure is authoritative regardless
    /// of which manager holds the ticket. Returns whether a record existed.
    pub fn apply_remove(&self, ticket: Ticket) -> RegistryResult<bool> {
        if !self.contains(ticket) {
            return Ok(false);
        }
        self.store.remove(ticket)?;
        self.trades.remove(&ticket);
        self.invalidate(ticket);
        info!(ticket = %ticket, "Trade removed");
        Ok(true)
    }

    /// Replace a record wholesale (composite replace).
    ///
    /// Executes as one store write so the replacement can never partially
    /// commit. Monotonic fields from the existing record are preserved.
    pub fn apply_replace(&self, mut trade: ManagedTrade) -> RegistryResult<()> {
        if let Some(existing) = self.get(trade.ticket) {
            trade.breakeven_triggered |= existing.breakeven_triggered;
            trade.partial_profit_taken |= existing.partial_profit_taken;
            if existing.risk_multiple_achieved > trade.risk_multiple_achieved {
                trade.risk_multiple_achieved = existing.risk_multiple_achieved;
            }
            trade.registered_at = existing.registered_at;
        }
        trade.last_updated = Utc::now();

        self.store.upsert(&trade)?;
        self.trades.insert(trade.ticket, trade.clone());
        self.invalidate(trade.ticket);
        info!(ticket = %trade.ticket, "Trade replaced");
        Ok(())
    }

    fn invalidate(&self, ticket: Ticket) {
        self.ownership_cache.remove(&ticket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use sentinel_core::{Direction, Position, Price, Volume};
    use tempfile::TempDir;

    fn sample_position(ticket: u64) -> Position {
        Position {
            ticket: Ticket::new(ticket),
            symbol: "EURUSD".to_string(),
            direction: Direction::Long,
            entry_price: Price::new(dec!(100)),
            volume: Volume::new(dec!(1)),
            stop_loss: Some(Price::new(dec!(95))),
            take_profit: None,
            current_price: Price::new(dec!(100)),
        }
    }

    fn open_registry(dir: &TempDir) -> Registry {
        Registry::open(dir.path().join("trades.jsonl")).unwrap()
    }

    fn register(registry: &Registry, ticket: u64) -> ManagedTrade {
        let trade = ManagedTrade::from_position(&sample_position(ticket), Utc::now());
        registry
            .apply_register(trade)
            .unwrap()
            .trade()
            .clone()
    }

    #[test]
    fn test_register_idempotent() {
        let dir = TempDir::new().unwrap();
        let registry = open_registry(&dir);

        let first = register(&registry, 1001);
        let outcome = registry
            .apply_register(ManagedTrade::from_position(
                &sample_position(1001),
                Utc::now(),
            ))
            .unwrap();

        assert!(outcome.already_registered());
        assert_eq!(outcome.trade().registered_at, first.registered_at);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ownership_acquire_and_conflict() {
        let dir = TempDir::new().unwrap();
        let registry = open_registry(&dir);
        let ticket = register(&registry, 1001).ticket;

        // NONE -> PrimaryTrailing succeeds.
        assert!(registry
            .apply_ownership(ticket, Owner::PrimaryTrailing)
            .unwrap());
        // Idempotent re-acquire.
        assert!(registry
            .apply_ownership(ticket, Owner::PrimaryTrailing)
            .unwrap());
        // Another manager fails.
        assert!(!registry
            .apply_ownership(ticket, Owner::ProfitProtection)
            .unwrap());
        assert_eq!(registry.get(ticket).unwrap().owner, Owner::PrimaryTrailing);
    }

    #[test]
    fn test_defensive_override_in_escalated_states() {
        let dir = TempDir::new().unwrap();
        let registry = open_registry(&dir);
        let ticket = register(&registry, 1001).ticket;

        assert!(registry
            .apply_ownership(ticket, Owner::PrimaryTrailing)
            .unwrap());
        // Healthy: defensive cannot take over.
        assert!(!registry.apply_ownership(ticket, Owner::Defensive).unwrap());

        registry
            .apply_state(ticket, DefensiveState::Hedged)
            .unwrap();
        // Hedged: defensive wins despite the existing owner.
        assert!(registry.apply_ownership(ticket, Owner::Defensive).unwrap());
        assert_eq!(registry.get(ticket).unwrap().owner, Owner::Defensive);

        // The displaced manager cannot re-acquire while defensive holds.
        registry
            .apply_state(ticket, DefensiveState::Recovering)
            .unwrap();
        assert!(!registry
            .apply_ownership(ticket, Owner::PrimaryTrailing)
            .unwrap());
    }

    #[test]
    fn test_zone_update_monotonic() {
        let dir = TempDir::new().unwrap();
        let registry = open_registry(&dir);
        let ticket = register(&registry, 1001).ticket;

        registry
            .apply_zone_update(
                ticket,
                &ZoneUpdate {
                    breakeven_triggered: Some(true),
                    risk_multiple: Some(1.2),
                    ..Default::default()
                },
            )
            .unwrap();

        // Attempt to revert both: must be ignored.
        registry
            .apply_zone_update(
                ticket,
                &ZoneUpdate {
                    breakeven_triggered: Some(false),
                    risk_multiple: Some(0.5),
                    ..Default::default()
                },
            )
            .unwrap();

        let trade = registry.get(ticket).unwrap();
        assert!(trade.breakeven_triggered);
        assert!((trade.risk_multiple_achieved - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_remove_unknown_is_false() {
        let dir = TempDir::new().unwrap();
        let registry = open_registry(&dir);
        assert!(!registry.apply_remove(Ticket::new(42)).unwrap());
    }

    #[test]
    fn test_ownership_unknown_ticket_errors() {
        let dir = TempDir::new().unwrap();
        let registry = open_registry(&dir);
        let err = registry
            .apply_ownership(Ticket::new(42), Owner::Defensive)
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownTicket(_)));
    }

    #[test]
    fn test_replace_preserves_monotonic_flags() {
        let dir = TempDir::new().unwrap();
        let registry = open_registry(&dir);
        let ticket = register(&registry, 1001).ticket;

        registry
            .apply_zone_update(
                ticket,
                &ZoneUpdate {
                    breakeven_triggered: Some(true),
                    risk_multiple: Some(2.0),
                    ..Default::default()
                },
            )
            .unwrap();

        let replacement = ManagedTrade::from_position(&sample_position(1001), Utc::now());
        registry.apply_replace(replacement).unwrap();

        let trade = registry.get(ticket).unwrap();
        assert!(trade.breakeven_triggered);
        assert!((trade.risk_multiple_achieved - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trades.jsonl");

        {
            let registry = Registry::open(&path).unwrap();
            let trade = ManagedTrade::from_position(&sample_position(1001), Utc::now());
            registry.apply_register(trade).unwrap();
            registry
                .apply_ownership(Ticket::new(1001), Owner::ProfitProtection)
                .unwrap();
        }

        let registry = Registry::open(&path).unwrap();
        assert_eq!(
            registry.get(Ticket::new(1001)).unwrap().owner,
            Owner::ProfitProtection
        );
    }

    #[test]
    fn test_ownership_view_served_and_cached() {
        let dir = TempDir::new().unwrap();
        let registry = open_registry(&dir);
        let ticket = register(&registry, 1001).ticket;

        let view = registry.ownership(ticket).unwrap();
        assert_eq!(view.owner, Owner::None);

        registry
            .apply_ownership(ticket, Owner::PrimaryTrailing)
            .unwrap();
        // apply_* invalidates the cache, so the change is visible at once.
        let view = registry.ownership(ticket).unwrap();
        assert_eq!(view.owner, Owner::PrimaryTrailing);
    }
}
