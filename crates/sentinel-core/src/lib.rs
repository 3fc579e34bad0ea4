//! Core domain types for the Sentinel exit coordination service.
//!
//! This crate provides the fundamental types shared across the system:
//! - `Ticket`: Unique identifier of one open broker position
//! - `Price`, `Volume`: Precision-safe numeric types
//! - `Position`: Read-only view of a broker position
//! - `ManagedTrade`: The registry record tracked per ticket
//! - `Owner`, `DefensiveState`: Ownership and risk-state enums

pub mod decimal;
pub mod error;
pub mod trade;
pub mod types;

pub use decimal::{Price, Volume};
pub use error::{CoreError, Result};
pub use trade::{DefensiveState, ManagedTrade, Owner};
pub use types::{Direction, ExitTarget, Position, Ticket};
