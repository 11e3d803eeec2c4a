//! Errors raised by host functions.
//!
//! A host function error traps the guest function that made the call. It
//! never takes the host down.

use thiserror::Error;

/// Errors returned by providers and intrinsics.
#[derive(Debug, Error)]
pub enum HostCallError {
    /// An argument was missing or had the wrong type.
    #[error("Argument {index}: expected {expected}")]
    InvalidArgument {
        /// Zero-based argument position.
        index: usize,
        /// The expected type.
        expected: &'static str,
    },

    /// An argument had the right type but an unusable value.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The provider refused the operation (outside its scope or allow-list).
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The provider is not available in this host.
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// A named resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Cryptographic operation failed.
    #[error("Crypto error: {0}")]
    Crypto(String),
}

/// Result type alias for host calls.
pub type HostCallResult<T> = std::result::Result<T, HostCallError>;
