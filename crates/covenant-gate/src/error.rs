//! Link errors and guest traps.
//!
//! [`GateError`] is returned while building an import table and fails the
//! load of one module. [`CapabilityDenied`] and [`HostTrap`] are raised
//! inside guest calls and surface as traps of the guest function that made
//! the call.

use covenant_abi::AbiError;
use covenant_capability::ImportId;
use covenant_providers::HostCallError;
use thiserror::Error;

/// Errors building an import table.
#[derive(Debug, Error)]
pub enum GateError {
    /// The guest declared an import type that does not lower the host
    /// function's signature.
    #[error("Import {import} has type {found}, expected a lowering of {expected}")]
    SignatureMismatch {
        /// The import.
        import: ImportId,
        /// The host function's ABI signature.
        expected: String,
        /// The guest's declared wasm type.
        found: String,
    },

    /// Nothing can satisfy the import.
    #[error("Unresolved import: {import}")]
    UnresolvedImport {
        /// The import.
        import: ImportId,
    },

    /// The import is of a kind the host never provides.
    #[error("Unsupported {kind} import: {import}")]
    UnsupportedImport {
        /// The import.
        import: ImportId,
        /// `global`, `table` or another extern kind.
        kind: &'static str,
    },

    /// A peer module does not export what the import names.
    #[error("Module {module} has no function export {export}")]
    PeerExportMissing {
        /// The peer module.
        module: String,
        /// The missing export.
        export: String,
    },

    /// Defining an import in the linker failed.
    #[error("Failed to define {import}: {reason}")]
    Define {
        /// The import.
        import: ImportId,
        /// Engine message.
        reason: String,
    },

    /// Instantiation against the table failed.
    #[error("Instantiation failed: {0}")]
    Instantiate(#[source] wasmtime::Error),
}

/// Result type for gate operations.
pub type GateResult<T> = std::result::Result<T, GateError>;

/// A guest called an import its manifest does not grant.
///
/// This is the trap payload in strict mode. Downcast a call error to it to
/// recover the denied import.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Capability denied: {import}")]
pub struct CapabilityDenied {
    /// The fully-qualified import.
    pub import: ImportId,
}

/// A bound import failed while serving a guest call.
#[derive(Debug, Error)]
pub enum HostTrap {
    /// The host function returned an error.
    #[error("Host function {import} failed: {source}")]
    Call {
        /// The import.
        import: ImportId,
        /// The provider error.
        #[source]
        source: HostCallError,
    },

    /// Arguments or results could not be moved across the boundary.
    #[error("Marshalling for {import} failed: {source}")]
    Abi {
        /// The import.
        import: ImportId,
        /// The ABI error.
        #[source]
        source: AbiError,
    },

    /// The peer a bridge points at is no longer loaded.
    #[error("Module {module} is not loaded")]
    PeerUnavailable {
        /// The peer module.
        module: String,
    },

    /// A stub was asked to produce a value of a type with no zero.
    #[error("Import {import} returns a type the host cannot default")]
    NoDefault {
        /// The import.
        import: ImportId,
    },
}
