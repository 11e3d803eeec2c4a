//! Error types for the capability system.

use thiserror::Error;

/// Errors related to capability metadata.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// Embedded symbol metadata is not a valid JSON symbol array.
    #[error("Failed to parse symbol metadata: {0}")]
    MetadataParse(#[from] serde_json::Error),

    /// An import identifier is not of the form `namespace.function`.
    #[error("Invalid import identifier: {0}")]
    InvalidImportId(String),
}

/// Result type for capability operations.
pub type CapabilityResult<T> = std::result::Result<T, CapabilityError>;
