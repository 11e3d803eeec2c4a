//! Store construction and per-store data.
//!
//! A host owns one long-lived store holding all of its live instances, and
//! creates a short-lived one for each probe instantiation.

use tracing::debug;
use uuid::Uuid;
use wasmtime::{Store, StoreLimits, StoreLimitsBuilder};

use crate::config::ResourceLimits;
use crate::engine::CovenantEngine;

/// Unique identifier for a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreId(Uuid);

impl StoreId {
    /// Create a new random store ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StoreId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a store is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorePurpose {
    /// Inert instantiation used only to read embedded metadata.
    Probe,
    /// The host's live store.
    Live,
}

/// Data stored in every Wasmtime store the host creates.
pub struct StoreData {
    /// Unique identifier for this store.
    pub id: StoreId,
    /// Why the store exists.
    pub purpose: StorePurpose,
    /// Resource limits enforced by the store limiter.
    pub limits: StoreLimits,
}

impl std::fmt::Debug for StoreData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreData")
            .field("id", &self.id)
            .field("purpose", &self.purpose)
            .finish()
    }
}

/// Create a store with the limiter configured from `limits`.
pub fn new_store(
    engine: &CovenantEngine,
    purpose: StorePurpose,
    limits: &ResourceLimits,
) -> Store<StoreData> {
    let store_limits = StoreLimitsBuilder::new()
        .memory_size(limits.max_memory_bytes)
        .table_elements(limits.max_table_elements)
        .instances(limits.max_instances)
        .tables(limits.max_instances)
        .memories(limits.max_memories)
        .build();

    let data = StoreData {
        id: StoreId::new(),
        purpose,
        limits: store_limits,
    };

    let id = data.id;
    let mut store = Store::new(engine.inner(), data);
    store.limiter(|data| &mut data.limits);

    debug!(store_id = %id, purpose = ?purpose, "Created store");
    store
}
