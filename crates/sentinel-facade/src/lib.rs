//! Remote registry facade.
//!
//! HTTP surface over the registry for out-of-process callers: an axum
//! server exposing registration, trade and ownership queries plus health
//! endpoints, and a reqwest client with a short ownership cache and a
//! bounded last-known-state fallback.

pub mod api;
pub mod client;
pub mod error;
pub mod server;

pub use api::{ApiError, HealthResponse, OwnershipResponse, RegisterRequest, RegisterResponse};
pub use client::{OwnershipAnswer, RegistryClient, RegistryClientConfig};
pub use error::{FacadeError, FacadeResult};
pub use server::{serve, AppState, FacadeConfig};
