//! Shared fixtures for manager tests.

use crate::adjuster::{AdjusterError, BoxFuture, ExitAdjuster, PositionSource};
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use sentinel_core::{
    Direction, ExitTarget, ManagedTrade, Owner, Position, Price, Ticket, Volume,
};
use sentinel_queue::{QueueConfig, WriteKind, WriteQueue};
use sentinel_registry::Registry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// In-memory broker double implementing both external seams.
#[derive(Default)]
pub(crate) struct MockBroker {
    positions: Mutex<HashMap<Ticket, Position>>,
    modifications: Mutex<Vec<(Ticket, ExitTarget)>>,
}

impl MockBroker {
    pub fn insert(&self, position: Position) {
        self.positions.lock().insert(position.ticket, position);
    }

    pub fn close(&self, ticket: Ticket) {
        self.positions.lock().remove(&ticket);
    }

    pub fn set_price(&self, ticket: Ticket, price: Price) {
        if let Some(p) = self.positions.lock().get_mut(&ticket) {
            p.current_price = price;
        }
    }

    pub fn modifications(&self) -> Vec<(Ticket, ExitTarget)> {
        self.modifications.lock().clone()
    }
}

impl PositionSource for MockBroker {
    fn positions(&self) -> BoxFuture<'_, Result<Vec<Position>, AdjusterError>> {
        Box::pin(async move { Ok(self.positions.lock().values().cloned().collect()) })
    }

    fn position(&self, ticket: Ticket) -> BoxFuture<'_, Result<Option<Position>, AdjusterError>> {
        Box::pin(async move { Ok(self.positions.lock().get(&ticket).cloned()) })
    }
}

impl ExitAdjuster for MockBroker {
    fn modify_exit(
        &self,
        ticket: Ticket,
        target: ExitTarget,
    ) -> BoxFuture<'_, Result<(), AdjusterError>> {
        Box::pin(async move {
            let mut positions = self.positions.lock();
            let position = positions
                .get_mut(&ticket)
                .ok_or(AdjusterError::UnknownTicket(ticket))?;
            if let Some(sl) = target.stop_loss {
                position.stop_loss = Some(sl);
            }
            if let Some(tp) = target.take_profit {
                position.take_profit = Some(tp);
            }
            drop(positions);
            self.modifications.lock().push((ticket, target));
            Ok(())
        })
    }
}

pub(crate) struct Harness {
    pub registry: Arc<Registry>,
    pub queue: WriteQueue,
    pub broker: Arc<MockBroker>,
    worker: JoinHandle<()>,
    _dir: TempDir,
}

impl Harness {
    /// Register the position at the broker and in the registry.
    pub async fn register(&self, position: Position) -> Ticket {
        let ticket = position.ticket;
        self.broker.insert(position.clone());
        let trade = ManagedTrade::from_position(&position, Utc::now());
        self.queue
            .submit(WriteKind::RegisterTrade { trade })
            .unwrap()
            .wait(Duration::from_secs(5))
            .await
            .unwrap();
        ticket
    }

    /// Force an ownership assignment through the queue.
    pub async fn own(&self, ticket: Ticket, owner: Owner) {
        self.queue
            .submit(WriteKind::UpdateOwnership {
                ticket,
                candidate: owner,
            })
            .unwrap()
            .wait(Duration::from_secs(5))
            .await
            .unwrap();
    }

    /// Drain the queue and stop its worker.
    pub async fn finish(self) {
        self.queue.shutdown();
        self.worker.await.unwrap();
    }
}

pub(crate) async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(Registry::open(dir.path().join("trades.jsonl")).unwrap());
    let queue = WriteQueue::open(
        Arc::clone(&registry),
        dir.path().join("ops.jsonl"),
        QueueConfig::default(),
    )
    .unwrap();
    let worker = queue.spawn_worker();
    Harness {
        registry,
        queue,
        broker: Arc::new(MockBroker::default()),
        worker,
        _dir: dir,
    }
}

pub(crate) fn long_position(
    ticket: u64,
    entry: Decimal,
    stop: Decimal,
    current: Decimal,
) -> Position {
    Position {
        ticket: Ticket::new(ticket),
        symbol: "EURUSD".to_string(),
        direction: Direction::Long,
        entry_price: Price::new(entry),
        volume: Volume::new(Decimal::ONE),
        stop_loss: Some(Price::new(stop)),
        take_profit: None,
        current_price: Price::new(current),
    }
}
