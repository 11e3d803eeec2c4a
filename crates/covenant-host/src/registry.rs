//! The registry of live modules owned by one host.

use std::collections::HashMap;
use std::sync::Arc;

use covenant_capability::{CapabilityManifest, is_reserved_namespace};
use covenant_core::CompiledModule;
use covenant_gate::{LiveInstance, PeerDirectory};
use covenant_observe::LoadReport;
use tracing::debug;

use crate::error::{HostError, HostResult};

/// Separator between a module name and its staging suffix. Never valid in
/// a module name, so staged entries cannot collide with live ones.
const STAGING_SEPARATOR: char = '#';

/// One loaded module.
#[derive(Debug, Clone)]
pub struct ModuleEntry {
    /// Registry name.
    pub name: String,
    /// Generation, unique across every load of this host.
    pub generation: u64,
    /// The compiled module both phases instantiated.
    pub module: CompiledModule,
    /// The live instance.
    pub live: LiveInstance,
    /// The manifest the instance runs under.
    pub manifest: Arc<CapabilityManifest>,
    /// How every import was bound.
    pub report: Arc<LoadReport>,
}

/// Module entries by name.
///
/// Published entries are mirrored into a [`PeerDirectory`] so that cross
/// module bridges see the same instance the registry does. Staged entries
/// are kept out of it until promoted.
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<String, ModuleEntry>,
    peers: PeerDirectory,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The directory bridges resolve peers through.
    pub fn peers(&self) -> &PeerDirectory {
        &self.peers
    }

    /// Check that `name` can be used as a registry name.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::InvalidName`] for empty names, names containing
    /// the staging separator or whitespace, and names that would shadow a
    /// host namespace.
    pub fn validate_name(name: &str) -> HostResult<()> {
        let malformed = name.is_empty()
            || name.contains(STAGING_SEPARATOR)
            || name.chars().any(char::is_whitespace);
        if malformed || is_reserved_namespace(name) {
            return Err(HostError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    /// The key a replacement for `name` is staged under.
    pub fn staging_key(name: &str, generation: u64) -> String {
        format!("{name}{STAGING_SEPARATOR}{generation}")
    }

    /// Look up a published or staged entry.
    pub fn get(&self, name: &str) -> Option<&ModuleEntry> {
        self.entries.get(name)
    }

    /// Check whether `name` is published.
    pub fn contains(&self, name: &str) -> bool {
        self.peers.contains(name)
    }

    /// Publish a freshly loaded module.
    pub fn publish(&mut self, entry: ModuleEntry) {
        debug!(module = %entry.name, generation = entry.generation, "Publishing module");
        self.peers.insert(entry.name.clone(), entry.live.clone());
        self.entries.insert(entry.name.clone(), entry);
    }

    /// Hold a replacement under `key` without making it visible.
    pub fn stage(&mut self, key: String, entry: ModuleEntry) {
        debug!(key = %key, generation = entry.generation, "Staging module");
        self.entries.insert(key, entry);
    }

    /// Drop a staged entry after a failed swap.
    pub fn discard(&mut self, key: &str) -> Option<ModuleEntry> {
        self.entries.remove(key)
    }

    /// Move the entry staged under `key` to its own name, returning the
    /// entry it replaced.
    ///
    /// The registry and the peer directory are repointed together, so the
    /// next call through either reaches the new instance.
    pub fn promote(&mut self, key: &str) -> Option<ModuleEntry> {
        let entry = self.entries.remove(key)?;
        let name = entry.name.clone();

        self.peers.insert(name.clone(), entry.live.clone());
        let previous = self.entries.insert(name, entry);

        debug!(key = %key, replaced = previous.is_some(), "Promoted staged module");
        previous
    }

    /// Remove a published module.
    pub fn remove(&mut self, name: &str) -> Option<ModuleEntry> {
        self.peers.remove(name);
        self.entries.remove(name)
    }

    /// Names of every published module, sorted.
    pub fn names(&self) -> Vec<String> {
        self.peers.names()
    }

    /// Number of published modules.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// True when nothing is published.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
