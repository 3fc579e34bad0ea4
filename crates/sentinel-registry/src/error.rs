//! Registry error types.

use sentinel_core::Ticket;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// The backing store is locked by another writer. Transient;
    /// the write queue retries these with backoff.
    #[error("Store busy: {0}")]
    StoreBusy(String),

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store record error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Unknown ticket: {0}")]
    UnknownTicket(Ticket),
}

impl RegistryError {
    /// Whether the error is transient and worth retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, RegistryError::StoreBusy(_))
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
