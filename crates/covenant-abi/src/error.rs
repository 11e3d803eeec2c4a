//! Error types for marshalling across the guest boundary.

use thiserror::Error;

/// Errors raised while reading or writing guest linear memory.
#[derive(Debug, Error)]
pub enum AbiError {
    /// A fat pointer or header referenced bytes outside linear memory.
    #[error("Memory access out of bounds: offset={offset}, len={len}, memory_size={memory_size}")]
    OutOfBounds {
        /// The offset attempted.
        offset: usize,
        /// The length attempted.
        len: usize,
        /// The actual memory size.
        memory_size: usize,
    },

    /// Bytes referenced as a string are not valid UTF-8.
    #[error("Invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// A collection header is truncated or inconsistent.
    #[error("Malformed collection: {0}")]
    Malformed(String),

    /// The arena cannot satisfy an allocation inside a 32-bit address space.
    #[error("Arena exhausted: cursor={cursor}, requested={requested}")]
    ArenaExhausted {
        /// Arena cursor at the time of the request.
        cursor: u32,
        /// Number of bytes requested.
        requested: u32,
    },

    /// Linear memory could not be grown to fit an allocation.
    #[error("Failed to grow linear memory: {0}")]
    GrowFailed(String),

    /// A value did not have the type its signature declares.
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// The declared type.
        expected: String,
        /// What was actually supplied.
        found: String,
    },
}

/// Result type alias for marshalling operations.
pub type AbiResult<T> = std::result::Result<T, AbiError>;
