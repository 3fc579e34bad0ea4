//! Facade error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FacadeError {
    /// Transport failure talking to the facade server.
    #[error("HTTP transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success status.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The response body could not be decoded.
    #[error("Response decode error: {0}")]
    Decode(String),

    /// The server could not be started.
    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}

pub type FacadeResult<T> = Result<T, FacadeError>;
