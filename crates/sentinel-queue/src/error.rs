//! Write queue error types.

use crate::operation::Priority;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Malformed or unreferenced payload. Rejected synchronously,
    /// never queued, never retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The queue is at capacity and no lower-priority operation could be
    /// evicted to make room. High-priority callers receive this
    /// synchronously, never a silent drop.
    #[error("Queue full (capacity {capacity}), {priority:?} operation rejected")]
    QueueFull { capacity: usize, priority: Priority },

    /// The queue no longer accepts work (shutdown in progress).
    #[error("Queue is shutting down")]
    ShuttingDown,

    /// Journal persistence failure at enqueue time.
    #[error("Journal error: {0}")]
    Journal(String),

    /// A completion wait exceeded its timeout.
    #[error("Timed out after {0:?} waiting for operation completion")]
    WaitTimeout(std::time::Duration),

    /// The worker dropped the completion channel (worker died).
    #[error("Completion channel closed before the operation finished")]
    CompletionLost,
}

pub type QueueResult<T> = Result<T, QueueError>;
