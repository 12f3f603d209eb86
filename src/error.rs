//! Error types for the Turnstile engine.

use thiserror::Error;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum ThrottleError {
    /// An IP address (or address-with-port) that could not be parsed
    #[error("Invalid IP address: {0}")]
    InvalidAddress(String),

    /// Policy-related errors
    #[error("Policy error: {0}")]
    Policy(String),

    /// Counter store read or write failures
    #[error("Counter store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ThrottleError {
    /// Wrap an arbitrary counter-store backend error.
    pub fn store<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ThrottleError::Store(Box::new(err))
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, ThrottleError>;
