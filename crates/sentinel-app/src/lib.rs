//! Sentinel exit-parameter coordination service.
//!
//! Orchestrates the core: registry store, write queue, gate evaluator,
//! defensive state machine, the three exit managers under a watchdog,
//! the remote registry facade and boot-time reconciliation against the
//! external position source.

pub mod app;
pub mod broker;
pub mod config;
pub mod error;
pub mod reconcile;

pub use app::Application;
pub use config::{AppConfig, OperatingMode};
pub use error::{AppError, AppResult};
