//! Write operation model.

use chrono::{DateTime, Utc};
use sentinel_core::{DefensiveState, ManagedTrade, Owner, Ticket};
use sentinel_registry::ZoneUpdate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Queue priority tier. Operations execute strictly in priority order,
/// FIFO within a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Mutation payload.
///
/// Multi-step changes are modeled as a single composite variant
/// (`CompositeReplace`) so they cannot partially commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WriteKind {
    RegisterTrade { trade: ManagedTrade },
    UpdateOwnership { ticket: Ticket, candidate: Owner },
    UpdateZoneState { ticket: Ticket, update: ZoneUpdate },
    UpdateState { ticket: Ticket, state: DefensiveState },
    RemoveTrade { ticket: Ticket },
    CompositeReplace { trade: ManagedTrade },
}

impl WriteKind {
    /// Ticket the operation refers to.
    #[must_use]
    pub fn ticket(&self) -> Ticket {
        match self {
            WriteKind::RegisterTrade { trade } | WriteKind::CompositeReplace { trade } => {
                trade.ticket
            }
            WriteKind::UpdateOwnership { ticket, .. }
            | WriteKind::UpdateZoneState { ticket, .. }
            | WriteKind::UpdateState { ticket, .. }
            | WriteKind::RemoveTrade { ticket } => *ticket,
        }
    }

    /// Whether the referenced ticket must already be registered.
    ///
    /// Registration is idempotent and removal tolerates unknown tickets,
    /// so neither requires an existing record.
    #[must_use]
    pub fn requires_existing(&self) -> bool {
        matches!(
            self,
            WriteKind::UpdateOwnership { .. }
                | WriteKind::UpdateZoneState { .. }
                | WriteKind::UpdateState { .. }
                | WriteKind::CompositeReplace { .. }
        )
    }

    /// Short name for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            WriteKind::RegisterTrade { .. } => "register_trade",
            WriteKind::UpdateOwnership { .. } => "update_ownership",
            WriteKind::UpdateZoneState { .. } => "update_zone_state",
            WriteKind::UpdateState { .. } => "update_state",
            WriteKind::RemoveTrade { .. } => "remove_trade",
            WriteKind::CompositeReplace { .. } => "composite_replace",
        }
    }
}

/// A journaled write operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteOperation {
    /// Correlation id, unique per operation.
    pub id: Uuid,
    #[serde(flatten)]
    pub kind: WriteKind,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
}

impl WriteOperation {
    #[must_use]
    pub fn new(kind: WriteKind, priority: Priority) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            priority,
            enqueued_at: Utc::now(),
        }
    }
}

/// Result delivered to the caller's completion future.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// The mutation was applied.
    Applied,
    /// Idempotent registration hit an existing record; nothing changed.
    AlreadyRegistered,
    /// Ownership arbitration denied the change. Not an error: the caller
    /// skips its cycle.
    Conflict,
    /// The operation was evicted from a full queue to make room for a
    /// higher-priority one.
    Dropped,
    /// Execution failed after retries (or permanently).
    Failed(String),
}

impl OperationOutcome {
    /// Whether the store reflects the requested change.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(
            self,
            OperationOutcome::Applied | OperationOutcome::AlreadyRegistered
        )
    }
}
