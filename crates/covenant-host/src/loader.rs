//! The two load phases.
//!
//! 1. Probe: instantiate in a throwaway store against inert imports and
//!    read the embedded metadata.
//! 2. Live: instantiate in the host's store against the filtered table and
//!    run `_initialize`.

use std::collections::BTreeSet;
use std::sync::Arc;

use covenant_abi::shared_arena;
use covenant_capability::CapabilityManifest;
use covenant_core::{CompiledModule, CovenantEngine, MEMORY_EXPORT, ResourceLimits, StoreData, StorePurpose, new_store};
use covenant_gate::{CapabilityGate, GateError, LinkContext, LiveInstance, PeerDirectory};
use covenant_observe::BindingRecord;
use tracing::{debug, info};
use wasmtime::Store;

use crate::error::{HostError, HostResult};
use crate::extract::{INITIALIZE_EXPORT, extract_manifest};

pub(crate) fn link_error(module: &str) -> impl Fn(GateError) -> HostError + '_ {
    move |source| HostError::Link {
        module: module.to_string(),
        source,
    }
}

/// Fail unless `module` exports its linear memory.
pub(crate) fn require_memory(name: &str, module: &CompiledModule) -> HostResult<()> {
    if module.exports_memory() {
        Ok(())
    } else {
        Err(HostError::MissingMemory {
            module: name.to_string(),
        })
    }
}

/// Run the probe phase and return the module's manifest.
///
/// The probe store is dropped on return, taking the probe instance with it.
pub(crate) fn probe(
    engine: &CovenantEngine,
    limits: &ResourceLimits,
    gate: &CapabilityGate,
    name: &str,
    module: &CompiledModule,
) -> HostResult<CapabilityManifest> {
    let mut store = new_store(engine, StorePurpose::Probe, limits);
    let table = gate.inert_table(&mut store, module).map_err(link_error(name))?;
    let instance = table.instantiate(&mut store, module).map_err(link_error(name))?;

    let manifest = extract_manifest(&mut store, &instance);
    debug!(
        module = %name,
        source = ?manifest.source(),
        imports = manifest.len(),
        "Probe finished"
    );
    Ok(manifest)
}

/// What the live phase produced.
pub(crate) struct Instantiated {
    pub live: LiveInstance,
    pub bindings: Vec<BindingRecord>,
    pub initialized: bool,
}

/// Everything the live phase needs besides the module itself.
pub(crate) struct LivePhase<'a> {
    pub gate: &'a CapabilityGate,
    pub peers: &'a PeerDirectory,
    pub arena_base: u32,
    pub generation: u64,
    pub copy_fat_pointers: &'a [String],
}

impl LivePhase<'_> {
    /// Instantiate `module` under `manifest` and run its initializer.
    pub fn run(
        &self,
        store: &mut Store<StoreData>,
        name: &str,
        module: &CompiledModule,
        manifest: &CapabilityManifest,
    ) -> HostResult<Instantiated> {
        let arena = shared_arena(self.arena_base);
        let link = LinkContext {
            module: name,
            manifest,
            arena: arena.clone(),
            peers: self.peers,
        };

        let table = self
            .gate
            .filtered_table(store, module, &link)
            .map_err(link_error(name))?;
        let instance = table.instantiate(store, module).map_err(link_error(name))?;

        let memory = instance
            .get_memory(&mut *store, MEMORY_EXPORT)
            .ok_or_else(|| HostError::MissingMemory {
                module: name.to_string(),
            })?;

        let initialized = match instance.get_func(&mut *store, INITIALIZE_EXPORT) {
            Some(func) => {
                func.typed::<(), ()>(&*store)
                    .and_then(|init| init.call(&mut *store, ()))
                    .map_err(|source| HostError::Initialize {
                        module: name.to_string(),
                        source,
                    })?;
                info!(module = %name, "Ran {INITIALIZE_EXPORT}");
                true
            }
            None => false,
        };

        let copy_fat_pointers: BTreeSet<String> = self.copy_fat_pointers.iter().cloned().collect();

        Ok(Instantiated {
            live: LiveInstance {
                instance,
                memory,
                arena,
                generation: self.generation,
                copy_fat_pointers: Arc::new(copy_fat_pointers),
            },
            bindings: table.into_bindings(),
            initialized,
        })
    }
}
