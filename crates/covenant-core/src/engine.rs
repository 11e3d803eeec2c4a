//! Wasmtime engine wrapper.

use std::sync::Arc;

use tracing::info;
use wasmtime::{Config, Engine};

use crate::config::EngineConfig;
use crate::error::EngineResult;

/// The engine every module of a host is compiled against.
///
/// Compiled modules are engine-specific, and instances can only be wired
/// together when they were compiled by the same engine, so a host keeps
/// exactly one.
///
/// # Example
///
/// ```
/// use covenant_core::{CovenantEngine, EngineConfig};
///
/// let engine = CovenantEngine::new(EngineConfig::default()).unwrap();
/// assert!(!engine.config().debug_info);
/// ```
pub struct CovenantEngine {
    /// The underlying Wasmtime engine.
    inner: Engine,
    /// Configuration used to create this engine.
    config: EngineConfig,
}

impl CovenantEngine {
    /// Create a new engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the Wasmtime engine cannot be created with
    /// the given configuration.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        let mut wasmtime_config = Config::new();

        wasmtime_config.max_wasm_stack(config.max_wasm_stack);
        wasmtime_config.debug_info(config.debug_info);

        // Guests are synchronous; every import shares the caller's stack.
        wasmtime_config.async_support(false);

        wasmtime_config.wasm_bulk_memory(true);
        wasmtime_config.wasm_multi_value(true);
        wasmtime_config.wasm_reference_types(true);
        wasmtime_config.wasm_simd(config.simd);

        let inner = Engine::new(&wasmtime_config)?;

        info!(
            max_wasm_stack = config.max_wasm_stack,
            debug_info = config.debug_info,
            "Created Covenant engine"
        );

        Ok(Self { inner, config })
    }

    /// Create a new engine with default configuration.
    pub fn default_engine() -> EngineResult<Self> {
        Self::new(EngineConfig::default())
    }

    /// Get a reference to the underlying Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.inner
    }

    /// Get the configuration used to create this engine.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl std::fmt::Debug for CovenantEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CovenantEngine")
            .field("config", &self.config)
            .finish()
    }
}

/// A shared reference to an engine.
pub type SharedEngine = Arc<CovenantEngine>;

/// Extension trait for creating shared engines.
pub trait IntoShared {
    /// Convert into a shared engine reference.
    fn into_shared(self) -> SharedEngine;
}

impl IntoShared for CovenantEngine {
    fn into_shared(self) -> SharedEngine {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_creation() {
        let engine = CovenantEngine::new(EngineConfig::default()).unwrap();
        assert_eq!(engine.config().max_wasm_stack, 1024 * 1024);
    }

    #[test]
    fn test_shared_engine() {
        let engine = CovenantEngine::default_engine().unwrap().into_shared();
        let engine2 = Arc::clone(&engine);

        assert!(Engine::same(engine.inner(), engine2.inner()));
    }
}
