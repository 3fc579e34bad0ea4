//! Per-ticket execution locks.
//!
//! A manager takes the ticket's execution lock for the short window
//! between its post-acquisition double-check and the external adjuster
//! call. The guard releases on drop, so a panic or early return can never
//! leave a ticket permanently locked.

use crate::error::{ManagerError, ManagerResult};
use dashmap::DashMap;
use sentinel_core::Ticket;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

const ACQUIRE_POLL: Duration = Duration::from_millis(10);

/// Set of in-process per-ticket execution locks.
#[derive(Clone, Default)]
pub struct TicketLockSet {
    held: Arc<DashMap<Ticket, ()>>,
}

impl TicketLockSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `ticket`, waiting up to `timeout`.
    pub async fn acquire(
        &self,
        ticket: Ticket,
        timeout: Duration,
    ) -> ManagerResult<TicketLockGuard> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.try_acquire(ticket) {
                trace!(ticket = %ticket, "Execution lock acquired");
                return Ok(TicketLockGuard {
                    held: Arc::clone(&self.held),
                    ticket,
                });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ManagerError::LockTimeout(ticket));
            }
            tokio::time::sleep(ACQUIRE_POLL).await;
        }
    }

    fn try_acquire(&self, ticket: Ticket) -> bool {
        match self.held.entry(ticket) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(());
                true
            }
        }
    }

    /// Whether the ticket is currently locked (diagnostics only).
    #[must_use]
    pub fn is_locked(&self, ticket: Ticket) -> bool {
        self.held.contains_key(&ticket)
    }
}

/// RAII guard for one ticket's execution lock.
#[derive(Debug)]
pub struct TicketLockGuard {
    held: Arc<DashMap<Ticket, ()>>,
    ticket: Ticket,
}

impl Drop for TicketLockGuard {
    fn drop(&mut self) {
        self.held.remove(&self.ticket);
        trace!(ticket = %self.ticket, "Execution lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release_on_drop() {
        let locks = TicketLockSet::new();
        let ticket = Ticket::new(1);

        let guard = locks.acquire(ticket, Duration::from_millis(50)).await.unwrap();
        assert!(locks.is_locked(ticket));
        drop(guard);
        assert!(!locks.is_locked(ticket));
    }

    #[tokio::test]
    async fn test_second_acquire_times_out() {
        let locks = TicketLockSet::new();
        let ticket = Ticket::new(1);

        let _guard = locks.acquire(ticket, Duration::from_millis(50)).await.unwrap();
        let err = locks
            .acquire(ticket, Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::LockTimeout(_)));
    }

    #[tokio::test]
    async fn test_released_when_holding_task_panics() {
        let locks = TicketLockSet::new();
        let ticket = Ticket::new(1);

        let task_locks = locks.clone();
        let handle = tokio::spawn(async move {
            let _guard = task_locks
                .acquire(ticket, Duration::from_millis(50))
                .await
                .unwrap();
            panic!("boom");
        });
        assert!(handle.await.is_err());

        // The panicked task's guard dropped; the lock is free again.
        let _guard = locks.acquire(ticket, Duration::from_millis(50)).await.unwrap();
    }

    #[tokio::test]
    async fn test_independent_tickets_do_not_contend() {
        let locks = TicketLockSet::new();
        let _a = locks
            .acquire(Ticket::new(1), Duration::from_millis(50))
            .await
            .unwrap();
        let _b = locks
            .acquire(Ticket::new(2), Duration::from_millis(50))
            .await
            .unwrap();
    }
}
