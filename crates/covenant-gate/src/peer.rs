//! Live instances visible to cross-module bridges.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use covenant_abi::SharedArena;
use parking_lot::RwLock;
use wasmtime::{Instance, Memory};

/// One live instance, as seen by the modules that import from it.
#[derive(Debug, Clone)]
pub struct LiveInstance {
    /// The instance.
    pub instance: Instance,
    /// Its exported memory.
    pub memory: Memory,
    /// Its arena.
    pub arena: SharedArena,
    /// Registry generation.
    pub generation: u64,
    /// Exports whose `i64` arguments and results are fat pointers to be
    /// copied across instances.
    pub copy_fat_pointers: Arc<BTreeSet<String>>,
}

impl LiveInstance {
    /// True when calls to `export` copy fat pointers.
    pub fn copies(&self, export: &str) -> bool {
        self.copy_fat_pointers.contains(export)
    }
}

/// Name-to-instance map shared between a host and its bridges.
///
/// Bridges look the peer up on every call, so repointing an entry here
/// reroutes every dependent module at once.
#[derive(Debug, Clone, Default)]
pub struct PeerDirectory {
    inner: Arc<RwLock<HashMap<String, LiveInstance>>>,
}

impl PeerDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current instance for `name`.
    pub fn get(&self, name: &str) -> Option<LiveInstance> {
        self.inner.read().get(name).cloned()
    }

    /// Check whether `name` is live.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().contains_key(name)
    }

    /// Publish `instance` under `name`, returning the one it replaces.
    pub fn insert(&self, name: impl Into<String>, instance: LiveInstance) -> Option<LiveInstance> {
        self.inner.write().insert(name.into(), instance)
    }

    /// Withdraw `name`.
    pub fn remove(&self, name: &str) -> Option<LiveInstance> {
        self.inner.write().remove(name)
    }

    /// Names of every live instance, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of live instances.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True when nothing is live.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
