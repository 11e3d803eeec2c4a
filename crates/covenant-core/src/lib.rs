//! Covenant Core
//!
//! Engine and module plumbing shared by every layer of the Covenant host:
//!
//! - [`CovenantEngine`]: the Wasmtime engine all guest modules compile against
//! - [`ModuleLoader`]: compiles guest binaries into reusable [`CompiledModule`]s
//! - [`new_store`]: creates stores with resource limits applied
//! - Configuration types for the engine and per-store limits

pub mod config;
pub mod engine;
pub mod error;
pub mod module;
pub mod store;

pub use config::{EngineConfig, ResourceLimits};
pub use engine::{CovenantEngine, IntoShared, SharedEngine};
pub use error::{EngineError, EngineResult, ModuleError, ModuleResult};
pub use module::{CompiledModule, ExportInfo, ExternKind, ImportInfo, MEMORY_EXPORT, ModuleLoader};
pub use store::{StoreData, StoreId, StorePurpose, new_store};
