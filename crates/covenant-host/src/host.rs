//! The host: a registry of live modules and the store they run in.

use std::path::Path;
use std::sync::Arc;

use covenant_abi::{AbiType, AbiValue, FatPtr, Marshaller, WasmMemory, lift_result, lower_params};
use covenant_capability::{CapabilityManifest, GatePolicy, ImportId, ManifestSource, is_reserved_namespace};
use covenant_core::{
    CompiledModule, ModuleLoader, ModuleResult, ResourceLimits, SharedEngine, StoreData,
};
use covenant_gate::{CapabilityDenied, CapabilityGate, GateError, LiveInstance, MEM_ALLOC};
use covenant_observe::{
    BindingKind, BindingRecord, EventDispatcher, EventSubscriber, HostEvent, LoadReport,
    MetricsCollector, MetricsSnapshot,
};
use tracing::{debug, info, warn};
use wasmtime::{ExternType, Func, FuncType, Store, Val, ValType};

use crate::config::LinkSpec;
use crate::error::{HostError, HostResult};
use crate::handle::ModuleHandle;
use crate::loader::{self, LivePhase, require_memory};
use crate::registry::{ModuleEntry, Registry};

/// Loads, links and runs Covenant modules under their capability manifests.
///
/// A host owns one store holding every live instance, the registry that
/// names them, and the arena of each. Hosts share nothing, so any number
/// can run side by side.
///
/// Wasmtime never frees an instance before its store, so the instances a
/// swap replaces stay allocated (but unreachable) until the host is
/// dropped.
pub struct Host {
    engine: SharedEngine,
    loader: ModuleLoader,
    limits: ResourceLimits,
    store: Store<StoreData>,
    gate: CapabilityGate,
    registry: Registry,
    events: Arc<EventDispatcher>,
    metrics: Arc<MetricsCollector>,
    arena_base: u32,
    generation: u64,
}

impl Host {
    pub(crate) fn from_parts(
        engine: SharedEngine,
        limits: ResourceLimits,
        store: Store<StoreData>,
        gate: CapabilityGate,
        events: Arc<EventDispatcher>,
        metrics: Arc<MetricsCollector>,
        arena_base: u32,
    ) -> Self {
        Self {
            loader: ModuleLoader::new(Arc::clone(&engine)),
            engine,
            limits,
            store,
            gate,
            registry: Registry::new(),
            events,
            metrics,
            arena_base,
            generation: 0,
        }
    }

    /// The engine modules are compiled against.
    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    /// The enforcement policy.
    pub fn policy(&self) -> GatePolicy {
        self.gate.policy()
    }

    /// The event dispatcher.
    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.events
    }

    /// Add an event subscriber.
    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.events.subscribe(subscriber);
    }

    /// A snapshot of the host's metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    // Loading

    /// Compile a module file without loading it.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Load`] if the file cannot be read or compiled.
    pub fn compile_file(&self, name: &str, path: impl AsRef<Path>) -> HostResult<CompiledModule> {
        self.compile(name, |l| l.load_file(path.as_ref()))
    }

    /// Compile module bytes without loading them.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Load`] if the bytes do not compile.
    pub fn compile_bytes(&self, name: &str, bytes: &[u8]) -> HostResult<CompiledModule> {
        self.compile(name, |l| l.load_bytes(bytes))
    }

    /// Load the module at `path` under `name`.
    ///
    /// # Errors
    ///
    /// Fails when the name is taken or invalid, the module does not compile,
    /// does not export `memory`, cannot be linked, or its `_initialize`
    /// traps. Nothing is registered on failure.
    pub fn load_module(&mut self, name: &str, path: impl AsRef<Path>) -> HostResult<ModuleHandle> {
        let module = self.compile_file(name, path);
        self.load_result(name, module, &[])
    }

    /// Load a module from bytes.
    ///
    /// # Errors
    ///
    /// See [`Host::load_module`].
    pub fn load_bytes(&mut self, name: &str, bytes: &[u8]) -> HostResult<ModuleHandle> {
        let module = self.compile_bytes(name, bytes);
        self.load_result(name, module, &[])
    }

    /// Load a module from WAT.
    ///
    /// # Errors
    ///
    /// See [`Host::load_module`].
    pub fn load_wat(&mut self, name: &str, wat: &str) -> HostResult<ModuleHandle> {
        let module = self.compile(name, |l| l.load_wat(wat));
        self.load_result(name, module, &[])
    }

    /// Load an already compiled module.
    ///
    /// `copy_fat_pointers` names exports whose fat pointer arguments and
    /// results are copied when other modules call them.
    ///
    /// # Errors
    ///
    /// See [`Host::load_module`].
    pub fn load_compiled(
        &mut self,
        name: &str,
        module: CompiledModule,
        copy_fat_pointers: &[String],
    ) -> HostResult<ModuleHandle> {
        self.load_result(name, Ok(module), copy_fat_pointers)
    }

    /// Load a set of co-resident modules in order.
    ///
    /// Each module's imports from a module loaded before it are wired
    /// straight to that module's exports, without passing the gate.
    ///
    /// # Errors
    ///
    /// Stops at the first module that fails to load. Modules loaded before
    /// it stay loaded.
    pub fn load_linked(&mut self, specs: &[LinkSpec]) -> HostResult<Vec<ModuleHandle>> {
        let mut handles = Vec::with_capacity(specs.len());
        for spec in specs {
            let module = self.compile_file(&spec.name, &spec.path);
            handles.push(self.load_result(&spec.name, module, &spec.copy_fat_pointers)?);
        }

        info!(
            modules = ?specs.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            "Linked modules"
        );
        Ok(handles)
    }

    // Hot swap

    /// Replace the module loaded as `name` with the one at `path`.
    ///
    /// The replacement goes through both load phases under a staging key.
    /// Only when it has fully loaded, and still exports everything other
    /// loaded modules import from `name`, is the registry repointed. On
    /// failure the old instance stays live and untouched.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::NotLoaded`] if nothing is loaded as `name`, and
    /// any error [`Host::load_module`] can return.
    pub fn swap_module(&mut self, name: &str, path: impl AsRef<Path>) -> HostResult<ModuleHandle> {
        let module = self.compile_file(name, path);
        self.swap_result(name, module)
    }

    /// Swap in a module from bytes.
    ///
    /// # Errors
    ///
    /// See [`Host::swap_module`].
    pub fn swap_bytes(&mut self, name: &str, bytes: &[u8]) -> HostResult<ModuleHandle> {
        let module = self.compile_bytes(name, bytes);
        self.swap_result(name, module)
    }

    /// Swap in a module from WAT.
    ///
    /// # Errors
    ///
    /// See [`Host::swap_module`].
    pub fn swap_wat(&mut self, name: &str, wat: &str) -> HostResult<ModuleHandle> {
        let module = self.compile(name, |l| l.load_wat(wat));
        self.swap_result(name, module)
    }

    /// Swap in an already compiled module.
    ///
    /// # Errors
    ///
    /// See [`Host::swap_module`].
    pub fn swap_compiled(&mut self, name: &str, module: CompiledModule) -> HostResult<ModuleHandle> {
        self.swap_result(name, Ok(module))
    }

    /// Remove a module from the registry.
    ///
    /// Modules that import from it trap on their next call into it.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::NotLoaded`] if nothing is loaded as `name`.
    pub fn unload(&mut self, name: &str) -> HostResult<()> {
        let entry = self
            .registry
            .remove(name)
            .ok_or_else(|| HostError::NotLoaded(name.to_string()))?;
        entry.live.arena.lock().reset();
        info!(module = %name, generation = entry.generation, "Unloaded module");
        Ok(())
    }

    // Registry

    /// A handle to the live generation of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::NotLoaded`] if nothing is loaded as `name`.
    pub fn module(&self, name: &str) -> HostResult<ModuleHandle> {
        self.entry(name)
            .map(|entry| ModuleHandle::new(name, entry.generation))
    }

    /// Names of every loaded module, sorted.
    pub fn modules(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Check whether `name` is loaded.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// The manifest `name` runs under.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::NotLoaded`] if nothing is loaded as `name`.
    pub fn manifest(&self, name: &str) -> HostResult<Arc<CapabilityManifest>> {
        self.entry(name).map(|entry| Arc::clone(&entry.manifest))
    }

    /// How each import of `name` was bound.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::NotLoaded`] if nothing is loaded as `name`.
    pub fn report(&self, name: &str) -> HostResult<Arc<LoadReport>> {
        self.entry(name).map(|entry| Arc::clone(&entry.report))
    }

    // Inspection

    /// Run the probe phase alone and return the manifest `module` would
    /// run under.
    ///
    /// # Errors
    ///
    /// Fails when the module does not export `memory` or cannot be
    /// instantiated against inert imports.
    pub fn probe(&self, name: &str, module: &CompiledModule) -> HostResult<CapabilityManifest> {
        require_memory(name, module)?;
        loader::probe(&self.engine, &self.limits, &self.gate, name, module)
    }

    /// How each import of `module` would be bound under `manifest`,
    /// given the modules loaded now.
    pub fn plan(&self, name: &str, module: &CompiledModule, manifest: &CapabilityManifest) -> Vec<BindingRecord> {
        module
            .imports()
            .iter()
            .map(|import| {
                let id = ImportId::from_parts(&import.module, &import.name);
                let kind = if import.module != name
                    && !is_reserved_namespace(&import.module)
                    && self.registry.contains(&import.module)
                {
                    BindingKind::Peer
                } else if id.as_str() == MEM_ALLOC {
                    BindingKind::Intrinsic
                } else {
                    self.gate.classify(&id, manifest)
                };
                BindingRecord::new(id, kind)
            })
            .collect()
    }

    /// Probe `module` and report how it would be bound, without loading it.
    ///
    /// # Errors
    ///
    /// See [`Host::probe`].
    pub fn inspect(&self, name: &str, module: &CompiledModule) -> HostResult<LoadReport> {
        let manifest = self.probe(name, module)?;
        let bindings = self.plan(name, module, &manifest);
        Ok(LoadReport::new(name, 0, manifest, bindings, function_exports(module)))
    }

    // Calls

    /// Call an export with raw wasm values.
    ///
    /// # Errors
    ///
    /// Fails for stale handles and missing exports. A trap in strict mode
    /// caused by an ungranted import surfaces as
    /// [`HostError::CapabilityDenied`]; any other trap as
    /// [`HostError::Trap`].
    pub fn call(&mut self, handle: &ModuleHandle, export: &str, args: &[Val]) -> HostResult<Vec<Val>> {
        let live = self.live(handle)?;
        let func = self.export_func(&live, handle.name(), export)?;
        self.invoke(&live, handle.name(), export, func, args)
    }

    /// Call an export with host values, decoding its result as `result`.
    ///
    /// Strings and collections are written into the module's arena and
    /// passed as whatever the export declares: a `(ptr, len)` pair or a
    /// single `i64` fat pointer.
    ///
    /// # Errors
    ///
    /// See [`Host::call`]. Marshalling failures are [`HostError::Abi`].
    pub fn call_with(
        &mut self,
        handle: &ModuleHandle,
        export: &str,
        args: &[AbiValue],
        result: AbiType,
    ) -> HostResult<AbiValue> {
        let live = self.live(handle)?;
        let func = self.export_func(&live, handle.name(), export)?;
        let slots: Vec<ValType> = func.ty(&self.store).params().collect();

        let params = {
            let mut arena = live.arena.lock();
            let mut view = WasmMemory::new(live.memory, &mut self.store);
            let mut m = Marshaller::new(&mut view, &mut arena);
            lower_params(&mut m, args, &slots).map_err(|source| HostError::Abi {
                module: handle.name().to_string(),
                source,
            })?
        };

        let results = self.invoke(&live, handle.name(), export, func, &params)?;

        let mut arena = live.arena.lock();
        let mut view = WasmMemory::new(live.memory, &mut self.store);
        let m = Marshaller::new(&mut view, &mut arena);
        lift_result(&m, result, &results).map_err(|source| HostError::Abi {
            module: handle.name().to_string(),
            source,
        })
    }

    /// Write a string into a module's arena.
    ///
    /// # Errors
    ///
    /// Fails for stale handles, or when the arena cannot grow.
    pub fn write_string(&mut self, handle: &ModuleHandle, s: &str) -> HostResult<FatPtr> {
        let live = self.live(handle)?;
        let mut arena = live.arena.lock();
        let mut view = WasmMemory::new(live.memory, &mut self.store);
        Marshaller::new(&mut view, &mut arena)
            .write_string(s)
            .map_err(|source| HostError::Abi {
                module: handle.name().to_string(),
                source,
            })
    }

    /// Read a string out of a module's memory.
    ///
    /// # Errors
    ///
    /// Fails for stale handles, out of bounds pointers and invalid UTF-8.
    pub fn read_string(&mut self, handle: &ModuleHandle, fp: FatPtr) -> HostResult<String> {
        let live = self.live(handle)?;
        let mut arena = live.arena.lock();
        let mut view = WasmMemory::new(live.memory, &mut self.store);
        Marshaller::new(&mut view, &mut arena)
            .read_string(fp)
            .map_err(|source| HostError::Abi {
                module: handle.name().to_string(),
                source,
            })
    }

    /// Bytes allocated in a module's arena.
    ///
    /// # Errors
    ///
    /// Fails for stale handles.
    pub fn arena_bytes(&self, handle: &ModuleHandle) -> HostResult<u32> {
        Ok(self.live(handle)?.arena.lock().bytes_used())
    }

    // Internals

    fn compile(
        &self,
        name: &str,
        f: impl FnOnce(&ModuleLoader) -> ModuleResult<CompiledModule>,
    ) -> HostResult<CompiledModule> {
        f(&self.loader).map_err(|source| HostError::Load {
            module: name.to_string(),
            source,
        })
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn entry(&self, name: &str) -> HostResult<&ModuleEntry> {
        if !self.registry.contains(name) {
            return Err(HostError::NotLoaded(name.to_string()));
        }
        self.registry
            .get(name)
            .ok_or_else(|| HostError::NotLoaded(name.to_string()))
    }

    fn live(&self, handle: &ModuleHandle) -> HostResult<LiveInstance> {
        let entry = self.entry(handle.name())?;
        if entry.generation != handle.generation() {
            return Err(HostError::StaleHandle {
                module: handle.name().to_string(),
                held: handle.generation(),
                current: entry.generation,
            });
        }
        Ok(entry.live.clone())
    }

    fn export_func(&mut self, live: &LiveInstance, module: &str, export: &str) -> HostResult<Func> {
        live.instance
            .get_func(&mut self.store, export)
            .ok_or_else(|| HostError::ExportNotFound {
                module: module.to_string(),
                export: export.to_string(),
            })
    }

    fn invoke(
        &mut self,
        live: &LiveInstance,
        module: &str,
        export: &str,
        func: Func,
        params: &[Val],
    ) -> HostResult<Vec<Val>> {
        let mut results = vec![Val::I32(0); func.ty(&self.store).results().len()];

        debug!(module = %module, export = %export, generation = live.generation, "Calling export");
        let outcome = func.call(&mut self.store, params, &mut results);
        self.metrics.record_arena_bytes(module, live.arena.lock().bytes_used());

        outcome.map_err(|e| call_error(module, export, e))?;
        Ok(results)
    }

    fn load_result(
        &mut self,
        name: &str,
        module: HostResult<CompiledModule>,
        copy_fat_pointers: &[String],
    ) -> HostResult<ModuleHandle> {
        let result = module.and_then(|module| self.try_load(name, module, copy_fat_pointers));
        self.finish(name, result)
    }

    fn swap_result(&mut self, name: &str, module: HostResult<CompiledModule>) -> HostResult<ModuleHandle> {
        let result = module.and_then(|module| self.try_swap(name, module));
        self.finish(name, result)
    }

    fn finish(&self, name: &str, result: HostResult<ModuleHandle>) -> HostResult<ModuleHandle> {
        if let Err(e) = &result {
            warn!(module = %name, error = %e, "Module load failed");
            self.events.emit(HostEvent::LoadFailed {
                module: name.to_string(),
                reason: e.to_string(),
            });
        }
        result
    }

    fn try_load(
        &mut self,
        name: &str,
        module: CompiledModule,
        copy_fat_pointers: &[String],
    ) -> HostResult<ModuleHandle> {
        Registry::validate_name(name)?;
        if self.registry.contains(name) {
            return Err(HostError::AlreadyLoaded(name.to_string()));
        }

        let entry = self.build_entry(name, module, copy_fat_pointers)?;
        let handle = ModuleHandle::new(name, entry.generation);
        let event = loaded_event(&entry);

        self.registry.publish(entry);
        info!(module = %name, generation = handle.generation(), "Loaded module");
        self.events.emit(event);
        Ok(handle)
    }

    fn try_swap(&mut self, name: &str, module: CompiledModule) -> HostResult<ModuleHandle> {
        let previous = self.entry(name)?;
        let from_generation = previous.generation;
        let copy_fat_pointers: Vec<String> = previous.live.copy_fat_pointers.iter().cloned().collect();

        let entry = self.build_entry(name, module, &copy_fat_pointers)?;
        let handle = ModuleHandle::new(name, entry.generation);
        let event = loaded_event(&entry);

        let key = Registry::staging_key(name, entry.generation);
        self.registry.stage(key.clone(), entry);

        if let Err(e) = self.check_dependents(name, &key) {
            self.registry.discard(&key);
            return Err(e);
        }
        if let Some(previous) = self.registry.promote(&key) {
            previous.live.arena.lock().reset();
        }

        info!(
            module = %name,
            from_generation,
            to_generation = handle.generation(),
            "Swapped module"
        );
        self.events.emit(event);
        self.events.emit(HostEvent::ModuleSwapped {
            module: name.to_string(),
            from_generation,
            to_generation: handle.generation(),
        });
        Ok(handle)
    }

    /// Run both load phases and assemble the registry entry.
    fn build_entry(
        &mut self,
        name: &str,
        module: CompiledModule,
        copy_fat_pointers: &[String],
    ) -> HostResult<ModuleEntry> {
        require_memory(name, &module)?;

        let manifest = loader::probe(&self.engine, &self.limits, &self.gate, name, &module)?;
        if let ManifestSource::Degraded { reason } = manifest.source() {
            self.events.emit(HostEvent::ManifestDegraded {
                module: name.to_string(),
                reason: reason.clone(),
            });
        }

        let generation = self.next_generation();
        let phase = LivePhase {
            gate: &self.gate,
            peers: self.registry.peers(),
            arena_base: self.arena_base,
            generation,
            copy_fat_pointers,
        };
        let instantiated = phase.run(&mut self.store, name, &module, &manifest)?;

        if instantiated.initialized {
            self.events.emit(HostEvent::ModuleInitialized {
                module: name.to_string(),
            });
        }

        let report = LoadReport::new(
            name,
            generation,
            manifest.clone(),
            instantiated.bindings,
            function_exports(&module),
        );

        Ok(ModuleEntry {
            name: name.to_string(),
            generation,
            module,
            live: instantiated.live,
            manifest: Arc::new(manifest),
            report: Arc::new(report),
        })
    }

    /// Check that the instance staged under `key` still provides every
    /// function other loaded modules import from `name`, with the same type.
    fn check_dependents(&mut self, name: &str, key: &str) -> HostResult<()> {
        let Some(staged) = self.registry.get(key) else {
            return Ok(());
        };
        let instance = staged.live.instance;

        for dependent in self.registry.names() {
            if dependent == name {
                continue;
            }
            let Some(entry) = self.registry.get(&dependent) else {
                continue;
            };

            for import in entry.module.inner().imports() {
                if import.module() != name {
                    continue;
                }
                let ExternType::Func(expected) = import.ty() else {
                    continue;
                };

                let found = instance
                    .get_func(&mut self.store, import.name())
                    .map(|func| func.ty(&self.store));

                if !found.is_some_and(|found| same_signature(&found, &expected)) {
                    warn!(
                        module = %name,
                        dependent = %dependent,
                        export = import.name(),
                        "Replacement no longer provides an export a dependent imports"
                    );
                    return Err(HostError::Link {
                        module: name.to_string(),
                        source: GateError::PeerExportMissing {
                            module: name.to_string(),
                            export: import.name().to_string(),
                        },
                    });
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("modules", &self.registry.names())
            .field("policy", &self.gate.policy())
            .field("arena_base", &self.arena_base)
            .finish()
    }
}

fn call_error(module: &str, export: &str, error: wasmtime::Error) -> HostError {
    if let Some(denied) = error.downcast_ref::<CapabilityDenied>() {
        warn!(module = %module, export = %export, import = %denied.import, "Call denied");
        return HostError::CapabilityDenied {
            module: module.to_string(),
            import: denied.import.clone(),
        };
    }
    HostError::Trap {
        module: module.to_string(),
        export: export.to_string(),
        source: error,
    }
}

fn loaded_event(entry: &ModuleEntry) -> HostEvent {
    HostEvent::ModuleLoaded {
        module: entry.name.clone(),
        generation: entry.generation,
        granted: entry.report.count(BindingKind::Granted),
        denied: entry.report.denied_count(),
    }
}

fn function_exports(module: &CompiledModule) -> Vec<String> {
    module.function_exports().map(String::from).collect()
}

fn signature_text(ty: &FuncType) -> (Vec<String>, Vec<String>) {
    (
        ty.params().map(|t| t.to_string()).collect(),
        ty.results().map(|t| t.to_string()).collect(),
    )
}

fn same_signature(a: &FuncType, b: &FuncType) -> bool {
    signature_text(a) == signature_text(b)
}
