//! Serialized durable write path for the registry store.
//!
//! The backing store supports one writer at a time (file-level locking,
//! not row-level). Funneling every mutation through a single worker task
//! converts that concurrency hazard into a pure ordering problem:
//! operations execute strictly in priority order, FIFO within a tier, and
//! each one is journaled before execution so pending work survives a
//! process crash.

pub mod error;
pub mod journal;
pub mod operation;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use journal::OperationJournal;
pub use operation::{OperationOutcome, Priority, WriteKind, WriteOperation};
pub use queue::{EnqueuedWrite, QueueConfig, WriteQueue, DEFAULT_WAIT_TIMEOUT};
