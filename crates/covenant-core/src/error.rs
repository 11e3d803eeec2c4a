//! Core error types.
//!
//! Compilation and I/O failures here are the "load errors" of the host:
//! they abort loading of one module and leave every other module alone.

use thiserror::Error;

/// Errors during engine creation and configuration.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid engine configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Underlying Wasmtime error.
    #[error("Wasmtime error: {0}")]
    Wasmtime(#[from] wasmtime::Error),
}

/// Errors during module loading and compilation.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// The bytes are not a WebAssembly module (or WAT failed to parse).
    #[error("Invalid WASM module: {0}")]
    Invalid(String),

    /// The module failed to compile.
    #[error("Compilation failed: {0}")]
    Compile(#[source] wasmtime::Error),

    /// IO error reading the module.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Result type alias for module operations.
pub type ModuleResult<T> = std::result::Result<T, ModuleError>;
