//! Configuration types for the Covenant engine and guest stores.

use serde::{Deserialize, Serialize};

/// Configuration for the underlying Wasmtime engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum WASM stack size in bytes.
    ///
    /// Defaults to 1MB.
    pub max_wasm_stack: usize,

    /// Enable debug information in compiled code.
    ///
    /// This increases compilation time and memory usage but provides
    /// better backtraces when a guest traps.
    pub debug_info: bool,

    /// Enable the SIMD proposal.
    pub simd: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_wasm_stack: 1024 * 1024, // 1MB
            debug_info: false,
            simd: true,
        }
    }
}

impl EngineConfig {
    /// Create a new engine configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum WASM stack size.
    pub fn with_max_wasm_stack(mut self, bytes: usize) -> Self {
        self.max_wasm_stack = bytes;
        self
    }

    /// Enable debug information.
    pub fn with_debug_info(mut self, enabled: bool) -> Self {
        self.debug_info = enabled;
        self
    }

    /// Enable or disable SIMD.
    pub fn with_simd(mut self, enabled: bool) -> Self {
        self.simd = enabled;
        self
    }
}

/// Resource limits applied to every store the host creates.
///
/// A store holds every live module instance of one host, so the instance
/// and memory counts bound the number of co-resident modules (including
/// the instances left behind by hot swaps).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Maximum size of a single linear memory in bytes.
    ///
    /// Defaults to 64MB.
    pub max_memory_bytes: usize,

    /// Maximum table elements.
    ///
    /// Defaults to 10,000.
    pub max_table_elements: usize,

    /// Maximum number of instances per store.
    pub max_instances: usize,

    /// Maximum number of linear memories per store.
    pub max_memories: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_bytes: 64 * 1024 * 1024, // 64MB
            max_table_elements: 10_000,
            max_instances: 64,
            max_memories: 64,
        }
    }
}

impl ResourceLimits {
    /// Create resource limits with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum memory limit.
    pub fn with_max_memory(mut self, bytes: usize) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    /// Set the maximum number of instances.
    pub fn with_max_instances(mut self, count: usize) -> Self {
        self.max_instances = count;
        self
    }

    /// Create minimal resource limits for testing.
    pub fn minimal() -> Self {
        Self {
            max_memory_bytes: 4 * 1024 * 1024, // 4MB
            max_table_elements: 1_000,
            max_instances: 8,
            max_memories: 8,
        }
    }

    /// Create generous resource limits for large module sets.
    pub fn generous() -> Self {
        Self {
            max_memory_bytes: 256 * 1024 * 1024, // 256MB
            max_table_elements: 100_000,
            max_instances: 1_000,
            max_memories: 1_000,
        }
    }
}
