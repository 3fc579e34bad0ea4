//! Durable ownership registry for managed trades.
//!
//! The registry store is the single shared mutable resource of the system.
//! Reads are served from an in-memory map backed by a durable JSON Lines
//! store; all mutations arrive through the write queue's worker, which calls
//! the `apply_*` methods on [`Registry`]. Managers never mutate records
//! directly.

pub mod error;
pub mod registry;
pub mod store;

pub use error::{RegistryError, RegistryResult};
pub use registry::{ownership_allows, OwnershipView, RegisterOutcome, Registry, ZoneUpdate};
pub use store::TradeStore;
