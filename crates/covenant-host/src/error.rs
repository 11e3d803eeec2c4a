//! Host errors.
//!
//! Load errors fail one `load_*`/`swap_*` call and leave every other module
//! as it was. Call errors fail one call. Metadata problems are never errors:
//! they degrade the module's manifest instead.

use covenant_abi::AbiError;
use covenant_capability::ImportId;
use covenant_core::{EngineError, ModuleError};
use covenant_gate::GateError;
use thiserror::Error;

/// Errors returned by [`Host`](crate::Host).
#[derive(Debug, Error)]
pub enum HostError {
    /// The engine could not be created.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// The module could not be read or compiled.
    #[error("Failed to load module {module}: {source}")]
    Load {
        /// Registry name.
        module: String,
        /// Compile or I/O error.
        #[source]
        source: ModuleError,
    },

    /// The module does not export its linear memory.
    #[error("Module {module} does not export `memory`")]
    MissingMemory {
        /// Registry name.
        module: String,
    },

    /// An import table could not be built or instantiated.
    #[error("Failed to link module {module}: {source}")]
    Link {
        /// Registry name.
        module: String,
        /// Gate error.
        #[source]
        source: GateError,
    },

    /// The `_initialize` export trapped.
    #[error("Module {module} failed to initialize: {source}")]
    Initialize {
        /// Registry name.
        module: String,
        /// The trap.
        #[source]
        source: wasmtime::Error,
    },

    /// A module name is empty, malformed or shadows a host namespace.
    #[error("Invalid module name: {0:?}")]
    InvalidName(String),

    /// A module with this name is already loaded.
    #[error("Module {0} is already loaded")]
    AlreadyLoaded(String),

    /// No module with this name is loaded.
    #[error("Module {0} is not loaded")]
    NotLoaded(String),

    /// The handle refers to an instance that has since been swapped out.
    #[error("Stale handle for {module}: held generation {held}, current {current}")]
    StaleHandle {
        /// Registry name.
        module: String,
        /// Generation the handle was issued for.
        held: u64,
        /// Generation now live.
        current: u64,
    },

    /// The module has no function export with this name.
    #[error("Module {module} has no function export {export}")]
    ExportNotFound {
        /// Registry name.
        module: String,
        /// Export name.
        export: String,
    },

    /// A guest call reached an import its manifest does not grant.
    #[error("Capability denied in {module}: {import}")]
    CapabilityDenied {
        /// Registry name of the module whose call was denied.
        module: String,
        /// The denied import.
        import: ImportId,
    },

    /// A guest call trapped for any other reason.
    #[error("Call to {module}.{export} trapped: {source}")]
    Trap {
        /// Registry name.
        module: String,
        /// Export name.
        export: String,
        /// The trap.
        #[source]
        source: wasmtime::Error,
    },

    /// Values could not be moved across the boundary.
    #[error("Marshalling for {module} failed: {source}")]
    Abi {
        /// Registry name.
        module: String,
        /// ABI error.
        #[source]
        source: AbiError,
    },

    /// A provider could not be constructed.
    #[error("Provider error: {0}")]
    Provider(String),

    /// The host configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    /// The denied import, when this error is a capability denial.
    pub fn denied_import(&self) -> Option<&ImportId> {
        match self {
            HostError::CapabilityDenied { import, .. } => Some(import),
            _ => None,
        }
    }

    /// True for errors raised while loading or swapping a module.
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            HostError::Load { .. }
                | HostError::MissingMemory { .. }
                | HostError::Link { .. }
                | HostError::Initialize { .. }
        )
    }
}

/// Result type alias for host operations.
pub type HostResult<T> = std::result::Result<T, HostError>;
