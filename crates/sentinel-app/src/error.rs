//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registry error: {0}")]
    Registry(#[from] sentinel_registry::RegistryError),

    #[error("Queue error: {0}")]
    Queue(#[from] sentinel_queue::QueueError),

    #[error("Facade error: {0}")]
    Facade(#[from] sentinel_facade::FacadeError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] sentinel_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
