//! The write queue itself: bounded priority tiers in front of a single
//! worker task that owns the registry's mutation path.
//!
//! Callers enqueue and receive an [`EnqueuedWrite`] completion future.
//! Every accepted operation is journaled before it is queued and
//! acknowledged after it executes, so a crash never silently loses an
//! accepted write.

use crate::error::{QueueError, QueueResult};
use crate::journal::OperationJournal;
use crate::operation::{OperationOutcome, Priority, WriteKind, WriteOperation};
use dashmap::DashMap;
use parking_lot::Mutex;
use sentinel_core::Ticket;
use sentinel_registry::{RegisterOutcome, Registry, RegistryError};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default completion-wait timeout. Callers must always bound their wait;
/// this is the bound used when they have no better one.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Fallback poll interval for the worker when no notification arrives.
const WORKER_IDLE_POLL: Duration = Duration::from_millis(250);

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum operations held across all tiers.
    pub capacity: usize,
    /// Retry attempts for transient store failures.
    pub max_retries: u32,
    /// Base delay for exponential retry backoff.
    pub retry_base: Duration,
    /// Default bound for completion waits.
    pub default_wait: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            max_retries: 3,
            retry_base: Duration::from_secs(1),
            default_wait: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

// ============================================================================
// Completion handle
// ============================================================================

/// Completion future for an accepted operation.
#[derive(Debug)]
pub struct EnqueuedWrite {
    /// Operation correlation id.
    pub id: Uuid,
    rx: oneshot::Receiver<OperationOutcome>,
}

impl EnqueuedWrite {
    /// Wait for the outcome, bounded by `timeout`.
    pub async fn wait(self, timeout: Duration) -> QueueResult<OperationOutcome> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(QueueError::CompletionLost),
            Err(_) => Err(QueueError::WaitTimeout(timeout)),
        }
    }
}

// ============================================================================
// Queue
// ============================================================================

type Completion = Option<oneshot::Sender<OperationOutcome>>;

#[derive(Default)]
struct Tiers {
    high: VecDeque<(WriteOperation, Completion)>,
    medium: VecDeque<(WriteOperation, Completion)>,
    low: VecDeque<(WriteOperation, Completion)>,
}

impl Tiers {
    fn len(&self) -> usize {
        self.high.len() + self.medium.len() + self.low.len()
    }

    fn pop_next(&mut self) -> Option<(WriteOperation, Completion)> {
        self.high
            .pop_front()
            .or_else(|| self.medium.pop_front())
            .or_else(|| self.low.pop_front())
    }

    fn push(&mut self, op: WriteOperation, completion: Completion) {
        let queue = match op.priority {
            Priority::High => &mut self.high,
            Priority::Medium => &mut self.medium,
            Priority::Low => &mut self.low,
        };
        queue.push_back((op, completion));
    }
}

struct Inner {
    registry: Arc<Registry>,
    journal: OperationJournal,
    tiers: Mutex<Tiers>,
    notify: Notify,
    pending_by_ticket: DashMap<Ticket, usize>,
    accepting: AtomicBool,
    config: QueueConfig,
    #[cfg(test)]
    inject_transient: std::sync::atomic::AtomicU32,
}

/// Serialized write queue in front of the [`Registry`].
///
/// Cheap to clone; all clones share the same worker and tiers.
#[derive(Clone)]
pub struct WriteQueue {
    inner: Arc<Inner>,
}

impl WriteQueue {
    /// Open the queue, replaying any journaled operations that were
    /// accepted before a previous shutdown or crash but never executed.
    ///
    /// Replayed operations re-enter their original tiers (no completion
    /// channel; the original caller is gone) and run before new work once
    /// the worker starts.
    pub fn open(
        registry: Arc<Registry>,
        journal_path: impl AsRef<Path>,
        config: QueueConfig,
    ) -> QueueResult<Self> {
        let (journal, pending) = OperationJournal::open(journal_path)?;

        let queue = Self {
            inner: Arc::new(Inner {
                registry,
                journal,
                tiers: Mutex::new(Tiers::default()),
                notify: Notify::new(),
                pending_by_ticket: DashMap::new(),
                accepting: AtomicBool::new(true),
                config,
                #[cfg(test)]
                inject_transient: std::sync::atomic::AtomicU32::new(0),
            }),
        };

        if !pending.is_empty() {
            info!(count = pending.len(), "Replaying journaled operations");
            let mut tiers = queue.inner.tiers.lock();
            for op in pending {
                queue.track(op.kind.ticket(), 1);
                tiers.push(op, None);
            }
        }

        Ok(queue)
    }

    /// Validate and accept an operation.
    ///
    /// Validation happens before journaling: a malformed operation is
    /// rejected synchronously and never enters the queue.
    pub fn enqueue(&self, kind: WriteKind, priority: Priority) -> QueueResult<EnqueuedWrite> {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(QueueError::ShuttingDown);
        }
        self.validate(&kind)?;

        let op = WriteOperation::new(kind, priority);
        let (tx, rx) = oneshot::channel();
        let id = op.id;
        let ticket = op.kind.ticket();

        {
            let mut tiers = self.inner.tiers.lock();
            if tiers.len() >= self.inner.config.capacity {
                self.make_room(&mut tiers, priority)?;
            }
            // Journal inside the lock so journal order matches queue order.
            self.inner.journal.record(&op)?;
            // Count before push: the worker may pop and finish the op the
            // moment the lock drops, and its decrement must find this
            // increment already in place.
            self.track(ticket, 1);
            tiers.push(op, Some(tx));
        }

        self.inner.notify.notify_one();
        Ok(EnqueuedWrite { id, rx })
    }

    /// Enqueue with the priority conventions baked in: registrations and
    /// removals are high, ownership and state changes medium, zone flag
    /// updates low.
    pub fn submit(&self, kind: WriteKind) -> QueueResult<EnqueuedWrite> {
        let priority = match kind {
            WriteKind::RegisterTrade { .. } | WriteKind::RemoveTrade { .. } => Priority::High,
            WriteKind::UpdateOwnership { .. }
            | WriteKind::UpdateState { .. }
            | WriteKind::CompositeReplace { .. } => Priority::Medium,
            WriteKind::UpdateZoneState { .. } => Priority::Low,
        };
        self.enqueue(kind, priority)
    }

    /// Wait until no queued operation references `ticket`.
    ///
    /// Used by managers before acting on a fresh registry snapshot.
    pub async fn flush_pending_for(&self, ticket: Ticket, timeout: Duration) -> QueueResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let pending = self
                .inner
                .pending_by_ticket
                .get(&ticket)
                .map(|c| *c)
                .unwrap_or(0);
            if pending == 0 {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(QueueError::WaitTimeout(timeout));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Queued operation count across all tiers.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.inner.tiers.lock().len()
    }

    /// Stop accepting new work. The worker drains the remaining queue and
    /// exits.
    pub fn shutdown(&self) {
        self.inner.accepting.store(false, Ordering::SeqCst);
        self.inner.notify.notify_one();
        info!("Write queue shutting down, draining remaining operations");
    }

    /// Spawn the single worker task that executes queued operations.
    pub fn spawn_worker(&self) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            info!("Write queue worker started");
            loop {
                let next = queue.inner.tiers.lock().pop_next();
                match next {
                    Some((op, completion)) => queue.process(op, completion).await,
                    None => {
                        if !queue.inner.accepting.load(Ordering::SeqCst) {
                            break;
                        }
                        tokio::select! {
                            _ = queue.inner.notify.notified() => {}
                            _ = tokio::time::sleep(WORKER_IDLE_POLL) => {}
                        }
                    }
                }
            }
            info!("Write queue worker stopped");
        })
    }

    // === Internals ===

    fn validate(&self, kind: &WriteKind) -> QueueResult<()> {
        match kind {
            WriteKind::RegisterTrade { trade } | WriteKind::CompositeReplace { trade } => {
                trade
                    .validate()
                    .map_err(|e| QueueError::Validation(e.to_string()))?;
            }
            WriteKind::UpdateZoneState { update, .. } => {
                if let Some(mult) = update.trailing_multiplier {
                    if !mult.is_finite() || mult <= 0.0 {
                        return Err(QueueError::Validation(format!(
                            "trailing multiplier must be finite and positive, got {mult}"
                        )));
                    }
                }
            }
            WriteKind::UpdateOwnership { .. }
            | WriteKind::UpdateState { .. }
            | WriteKind::RemoveTrade { .. } => {}
        }

        if kind.requires_existing() && !self.inner.registry.contains(kind.ticket()) {
            return Err(QueueError::Validation(format!(
                "ticket {} is not registered",
                kind.ticket()
            )));
        }
        Ok(())
    }

    /// At capacity: a high-priority arrival evicts the newest low-priority
    /// operation; anything else is rejected synchronously.
    fn make_room(&self, tiers: &mut Tiers, incoming: Priority) -> QueueResult<()> {
        if incoming == Priority::High {
            if let Some((evicted, completion)) = tiers.low.pop_back() {
                warn!(
                    op = evicted.kind.name(),
                    ticket = %evicted.kind.ticket(),
                    "Queue full, evicting low-priority operation"
                );
                // The evicted op never executes; close out its journal
                // entry so it is not replayed on restart.
                self.inner.journal.acknowledge(evicted.id)?;
                self.track(evicted.kind.ticket(), -1);
                if let Some(tx) = completion {
                    let _ = tx.send(OperationOutcome::Dropped);
                }
                return Ok(());
            }
        }
        Err(QueueError::QueueFull {
            capacity: self.inner.config.capacity,
            priority: incoming,
        })
    }

    async fn process(&self, op: WriteOperation, completion: Completion) {
        let outcome = self.execute_with_retries(&op).await;

        if let Err(e) = self.inner.journal.acknowledge(op.id) {
            // The op executed; replay after a crash is harmless because
            // every apply is idempotent. Log and move on.
            error!(op = op.kind.name(), error = %e, "Failed to acknowledge journal entry");
        }
        self.track(op.kind.ticket(), -1);

        if let OperationOutcome::Failed(reason) = &outcome {
            error!(
                op = op.kind.name(),
                ticket = %op.kind.ticket(),
                reason = %reason,
                "Write operation failed"
            );
        }

        if let Some(tx) = completion {
            let _ = tx.send(outcome);
        }
    }

    async fn execute_with_retries(&self, op: &WriteOperation) -> OperationOutcome {
        let mut attempt = 0;
        loop {
            match self.execute(op) {
                Ok(outcome) => return outcome,
                Err(e) if e.is_transient() && attempt < self.inner.config.max_retries => {
                    let delay = self.inner.config.retry_base * 2u32.pow(attempt);
                    attempt += 1;
                    debug!(
                        op = op.kind.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient store failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return OperationOutcome::Failed(e.to_string()),
            }
        }
    }

    fn execute(&self, op: &WriteOperation) -> Result<OperationOutcome, RegistryError> {
        #[cfg(test)]
        if self
            .inner
            .inject_transient
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RegistryError::StoreBusy(
                "injected writer contention".to_string(),
            ));
        }

        let registry = &self.inner.registry;
        match &op.kind {
            WriteKind::RegisterTrade { trade } => {
                match registry.apply_register(trade.clone())? {
                    RegisterOutcome::Registered(_) => Ok(OperationOutcome::Applied),
                    RegisterOutcome::AlreadyRegistered(_) => {
                        Ok(OperationOutcome::AlreadyRegistered)
                    }
                }
            }
            WriteKind::UpdateOwnership { ticket, candidate } => {
                // Authoritative arbitration check: the fast-path check the
                // caller ran may be stale by now.
                match registry.apply_ownership(*ticket, *candidate) {
                    Ok(true) => Ok(OperationOutcome::Applied),
                    Ok(false) => Ok(OperationOutcome::Conflict),
                    // The trade was removed between enqueue and execute.
                    Err(RegistryError::UnknownTicket(_)) => Ok(OperationOutcome::Conflict),
                    Err(e) => Err(e),
                }
            }
            WriteKind::UpdateZoneState { ticket, update } => {
                match registry.apply_zone_update(*ticket, update) {
                    Ok(()) => Ok(OperationOutcome::Applied),
                    Err(RegistryError::UnknownTicket(_)) => Ok(OperationOutcome::Conflict),
                    Err(e) => Err(e),
                }
            }
            WriteKind::UpdateState { ticket, state } => {
                match registry.apply_state(*ticket, *state) {
                    Ok(()) => Ok(OperationOutcome::Applied),
                    Err(RegistryError::UnknownTicket(_)) => Ok(OperationOutcome::Conflict),
                    Err(e) => Err(e),
                }
            }
            WriteKind::RemoveTrade { ticket } => {
                registry.apply_remove(*ticket)?;
                Ok(OperationOutcome::Applied)
            }
            WriteKind::CompositeReplace { trade } => {
                match registry.apply_replace(trade.clone()) {
                    Ok(()) => Ok(OperationOutcome::Applied),
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Force the next `count` executions to fail with a transient store
    /// error, as if another writer held the store lock.
    #[cfg(test)]
    fn force_transient_failures(&self, count: u32) {
        self.inner.inject_transient.store(count, Ordering::SeqCst);
    }

    fn track(&self, ticket: Ticket, delta: i64) {
        let mut entry = self.inner.pending_by_ticket.entry(ticket).or_insert(0);
        let next = (*entry as i64 + delta).max(0) as usize;
        if next == 0 {
            drop(entry);
            self.inner.pending_by_ticket.remove(&ticket);
        } else {
            *entry = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use sentinel_core::{Direction, ManagedTrade, Owner, Position, Price, Volume};
    use sentinel_registry::ZoneUpdate;
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

    fn sample_trade(ticket: u64) -> ManagedTrade {
        ManagedTrade::from_position(&sample_position(ticket), Utc::now())
    }

    fn open_queue(dir: &TempDir, config: QueueConfig) -> WriteQueue {
        let registry = Arc::new(Registry::open(dir.path().join("trades.jsonl")).unwrap());
        WriteQueue::open(registry, dir.path().join("ops.jsonl"), config).unwrap()
    }

    #[tokio::test]
    async fn test_priority_ordering_fifo_within_tier() {
        let dir = TempDir::new().unwrap();
        let queue = open_queue(&dir, QueueConfig::default());

        queue
            .enqueue(
                WriteKind::RemoveTrade {
                    ticket: Ticket::new(1),
                },
                Priority::Low,
            )
            .unwrap();
        queue
            .enqueue(
                WriteKind::RemoveTrade {
                    ticket: Ticket::new(2),
                },
                Priority::High,
            )
            .unwrap();
        queue
            .enqueue(
                WriteKind::RemoveTrade {
                    ticket: Ticket::new(3),
                },
                Priority::Medium,
            )
            .unwrap();
        queue
            .enqueue(
                WriteKind::RemoveTrade {
                    ticket: Ticket::new(4),
                },
                Priority::High,
            )
            .unwrap();

        let mut tiers = queue.inner.tiers.lock();
        let order: Vec<u64> = std::iter::from_fn(|| tiers.pop_next())
            .map(|(op, _)| op.kind.ticket().inner())
            .collect();
        assert_eq!(order, vec![2, 4, 3, 1]);
    }

    #[tokio::test]
    async fn test_validation_rejects_unregistered_reference() {
        let dir = TempDir::new().unwrap();
        let queue = open_queue(&dir, QueueConfig::default());

        let err = queue
            .submit(WriteKind::UpdateOwnership {
                ticket: Ticket::new(99),
                candidate: Owner::PrimaryTrailing,
            })
            .unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn test_validation_rejects_bad_register() {
        let dir = TempDir::new().unwrap();
        let queue = open_queue(&dir, QueueConfig::default());

        let mut trade = sample_trade(1);
        trade.symbol = "  ".to_string();
        let err = queue
            .submit(WriteKind::RegisterTrade { trade })
            .unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));

        let mut trade = sample_trade(1);
        trade.entry_price = Price::ZERO;
        let err = queue
            .submit(WriteKind::RegisterTrade { trade })
            .unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));
    }

    #[tokio::test]
    async fn test_full_queue_evicts_low_for_high() {
        let dir = TempDir::new().unwrap();
        let queue = open_queue(
            &dir,
            QueueConfig {
                capacity: 2,
                ..Default::default()
            },
        );

        queue
            .enqueue(
                WriteKind::RemoveTrade {
                    ticket: Ticket::new(1),
                },
                Priority::Medium,
            )
            .unwrap();
        let evicted = queue
            .enqueue(
                WriteKind::RemoveTrade {
                    ticket: Ticket::new(2),
                },
                Priority::Low,
            )
            .unwrap();

        // High arrival evicts the newest low-priority entry.
        queue
            .enqueue(
                WriteKind::RemoveTrade {
                    ticket: Ticket::new(3),
                },
                Priority::High,
            )
            .unwrap();
        assert_eq!(queue.depth(), 2);
        assert_eq!(
            evicted.wait(Duration::from_secs(1)).await.unwrap(),
            OperationOutcome::Dropped
        );

        // No low-priority entry left: the next high arrival is rejected.
        let err = queue
            .enqueue(
                WriteKind::RemoveTrade {
                    ticket: Ticket::new(4),
                },
                Priority::High,
            )
            .unwrap_err();
        assert!(matches!(err, QueueError::QueueFull { .. }));
    }

    #[tokio::test]
    async fn test_medium_rejected_when_full() {
        let dir = TempDir::new().unwrap();
        let queue = open_queue(
            &dir,
            QueueConfig {
                capacity: 1,
                ..Default::default()
            },
        );

        queue
            .enqueue(
                WriteKind::RemoveTrade {
                    ticket: Ticket::new(1),
                },
                Priority::Low,
            )
            .unwrap();
        let err = queue
            .enqueue(
                WriteKind::RemoveTrade {
                    ticket: Ticket::new(2),
                },
                Priority::Medium,
            )
            .unwrap_err();
        assert!(matches!(err, QueueError::QueueFull { .. }));
    }

    #[tokio::test]
    async fn test_worker_applies_operations() {
        let dir = TempDir::new().unwrap();
        let queue = open_queue(&dir, QueueConfig::default());
        let worker = queue.spawn_worker();

        let outcome = queue
            .submit(WriteKind::RegisterTrade {
                trade: sample_trade(1001),
            })
            .unwrap()
            .wait(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome, OperationOutcome::Applied);

        // Second registration of the same ticket is idempotent.
        let outcome = queue
            .submit(WriteKind::RegisterTrade {
                trade: sample_trade(1001),
            })
            .unwrap()
            .wait(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome, OperationOutcome::AlreadyRegistered);

        let outcome = queue
            .submit(WriteKind::UpdateZoneState {
                ticket: Ticket::new(1001),
                update: ZoneUpdate {
                    breakeven_triggered: Some(true),
                    ..Default::default()
                },
            })
            .unwrap()
            .wait(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome, OperationOutcome::Applied);
        assert!(
            queue
                .inner
                .registry
                .get(Ticket::new(1001))
                .unwrap()
                .breakeven_triggered
        );

        queue.shutdown();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_ownership_conflict_is_outcome_not_error() {
        let dir = TempDir::new().unwrap();
        let queue = open_queue(&dir, QueueConfig::default());
        let worker = queue.spawn_worker();

        queue
            .submit(WriteKind::RegisterTrade {
                trade: sample_trade(1001),
            })
            .unwrap()
            .wait(Duration::from_secs(5))
            .await
            .unwrap();

        let ticket = Ticket::new(1001);
        let outcome = queue
            .submit(WriteKind::UpdateOwnership {
                ticket,
                candidate: Owner::PrimaryTrailing,
            })
            .unwrap()
            .wait(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome, OperationOutcome::Applied);

        let outcome = queue
            .submit(WriteKind::UpdateOwnership {
                ticket,
                candidate: Owner::ProfitProtection,
            })
            .unwrap()
            .wait(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome, OperationOutcome::Conflict);

        queue.shutdown();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_journaled_operations_replay_after_restart() {
        let dir = TempDir::new().unwrap();
        let journal_path = dir.path().join("ops.jsonl");
        let store_path = dir.path().join("trades.jsonl");

        // First life: accept an operation but never start the worker.
        {
            let registry = Arc::new(Registry::open(&store_path).unwrap());
            let queue =
                WriteQueue::open(registry, &journal_path, QueueConfig::default()).unwrap();
            queue
                .submit(WriteKind::RegisterTrade {
                    trade: sample_trade(1001),
                })
                .unwrap();
            assert_eq!(queue.depth(), 1);
        }

        // Second life: the operation replays and executes.
        let registry = Arc::new(Registry::open(&store_path).unwrap());
        let queue =
            WriteQueue::open(registry.clone(), &journal_path, QueueConfig::default()).unwrap();
        assert_eq!(queue.depth(), 1);
        let worker = queue.spawn_worker();
        queue
            .flush_pending_for(Ticket::new(1001), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(registry.contains(Ticket::new(1001)));

        queue.shutdown();
        worker.await.unwrap();

        // Third life: the executed operation was acknowledged, nothing
        // replays again.
        let registry = Arc::new(Registry::open(&store_path).unwrap());
        let queue = WriteQueue::open(registry, &journal_path, QueueConfig::default()).unwrap();
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn test_pending_counter_pairs_with_running_worker() {
        let dir = TempDir::new().unwrap();
        let queue = open_queue(&dir, QueueConfig::default());
        let worker = queue.spawn_worker();

        queue
            .submit(WriteKind::RegisterTrade {
                trade: sample_trade(1001),
            })
            .unwrap()
            .wait(Duration::from_secs(5))
            .await
            .unwrap();

        // The worker races each enqueue; every increment must pair with
        // the worker's decrement even when the op finishes immediately.
        let ticket = Ticket::new(1001);
        for _ in 0..100 {
            queue
                .submit(WriteKind::UpdateZoneState {
                    ticket,
                    update: ZoneUpdate {
                        breakeven_triggered: Some(true),
                        ..Default::default()
                    },
                })
                .unwrap();
            tokio::task::yield_now().await;
        }

        queue
            .flush_pending_for(ticket, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!queue.inner.pending_by_ticket.contains_key(&ticket));

        queue.shutdown();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_transient_store_failure_retried_until_applied() {
        let dir = TempDir::new().unwrap();
        let queue = open_queue(
            &dir,
            QueueConfig {
                retry_base: Duration::from_millis(10),
                ..Default::default()
            },
        );
        queue.force_transient_failures(2);
        let worker = queue.spawn_worker();

        let outcome = queue
            .submit(WriteKind::RegisterTrade {
                trade: sample_trade(1001),
            })
            .unwrap()
            .wait(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome, OperationOutcome::Applied);
        assert!(queue.inner.registry.contains(Ticket::new(1001)));

        queue.shutdown();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_persistent_transient_failure_exhausts_retries() {
        let dir = TempDir::new().unwrap();
        let queue = open_queue(
            &dir,
            QueueConfig {
                max_retries: 2,
                retry_base: Duration::from_millis(10),
                ..Default::default()
            },
        );
        queue.force_transient_failures(u32::MAX);
        let worker = queue.spawn_worker();

        let outcome = queue
            .submit(WriteKind::RegisterTrade {
                trade: sample_trade(1001),
            })
            .unwrap()
            .wait(Duration::from_secs(5))
            .await
            .unwrap();
        assert!(matches!(outcome, OperationOutcome::Failed(_)));
        assert!(!queue.inner.registry.contains(Ticket::new(1001)));

        queue.force_transient_failures(0);
        queue.shutdown();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_enqueue_rejected_after_shutdown() {
        let dir = TempDir::new().unwrap();
        let queue = open_queue(&dir, QueueConfig::default());
        queue.shutdown();

        let err = queue
            .submit(WriteKind::RemoveTrade {
                ticket: Ticket::new(1),
            })
            .unwrap_err();
        assert!(matches!(err, QueueError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_flush_pending_for_times_out_when_stuck() {
        let dir = TempDir::new().unwrap();
        let queue = open_queue(&dir, QueueConfig::default());
        // No worker running: the operation stays pending.
        queue
            .submit(WriteKind::RemoveTrade {
                ticket: Ticket::new(1),
            })
            .unwrap();

        let err = queue
            .flush_pending_for(Ticket::new(1), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::WaitTimeout(_)));
    }
}
