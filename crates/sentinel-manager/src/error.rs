//! Manager error types.

use sentinel_core::Ticket;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    /// The broker-side adjuster rejected or failed a modification.
    #[error("Adjuster error: {0}")]
    Adjuster(#[from] crate::adjuster::AdjusterError),

    /// A per-ticket execution lock could not be acquired in time.
    #[error("Execution lock timeout for ticket {0}")]
    LockTimeout(Ticket),

    /// A write queue submission or completion wait failed.
    #[error("Write queue error: {0}")]
    Queue(#[from] sentinel_queue::QueueError),
}

pub type ManagerResult<T> = Result<T, ManagerError>;
