//! The capability gate: binds each guest import to a real host function, a
//! stub, a runtime intrinsic or a peer module's export.

use std::sync::Arc;
use std::time::Instant;

use covenant_abi::{
    AbiError, AbiType, FatPtr, SharedArena, Signature, lift_params, lower_result, zero_val,
};
use covenant_capability::{
    CapabilityManifest, ENV_MEMORY, EnforcementMode, GatePolicy, ImportId, is_gated, is_intrinsic,
    is_reserved_namespace,
};
use covenant_core::{CompiledModule, StoreData};
use covenant_observe::{BindingKind, BindingRecord, EventDispatcher, HostEvent};
use covenant_providers::{FunctionKind, HostFunction, HostFunctionTable};
use tracing::{debug, info, trace, warn};
use wasmtime::{Caller, ExternType, FuncType, Linker, Memory, Store, Val, ValType};

use crate::context::{caller_memory, copy_fat_ptr, with_marshaller};
use crate::error::{CapabilityDenied, GateError, GateResult, HostTrap};
use crate::peer::{LiveInstance, PeerDirectory};
use crate::table::ImportTable;

/// The arena allocator import.
pub const MEM_ALLOC: &str = "mem.alloc";

/// Called with the import name on every denied call.
pub type DeniedCallback = Arc<dyn Fn(&ImportId) + Send + Sync>;

/// What the gate needs to know about the module being linked.
pub struct LinkContext<'a> {
    /// Registry name of the module.
    pub module: &'a str,
    /// Its manifest.
    pub manifest: &'a CapabilityManifest,
    /// Its arena, shared by `mem.alloc` and host-side writes.
    pub arena: SharedArena,
    /// Modules its peer imports may resolve to.
    pub peers: &'a PeerDirectory,
}

/// Builds import tables for guest modules.
///
/// # Example
///
/// ```
/// use covenant_capability::{CapabilityManifest, GatePolicy, ImportId};
/// use covenant_gate::CapabilityGate;
/// use covenant_observe::BindingKind;
/// use covenant_providers::ProviderSet;
///
/// let gate = CapabilityGate::new(ProviderSet::new().host_functions())
///     .with_policy(GatePolicy::warn_only());
/// let manifest = CapabilityManifest::builder().with_effect("console").build();
///
/// assert_eq!(gate.classify(&ImportId::new("console.println"), &manifest), BindingKind::Granted);
/// assert_eq!(gate.classify(&ImportId::new("http.get"), &manifest), BindingKind::Warned);
/// assert_eq!(gate.classify(&ImportId::new("text.upper"), &manifest), BindingKind::Intrinsic);
/// ```
#[derive(Clone)]
pub struct CapabilityGate {
    policy: GatePolicy,
    functions: Arc<HostFunctionTable>,
    on_denied: Option<DeniedCallback>,
    events: Arc<EventDispatcher>,
}

impl CapabilityGate {
    /// Create a strict gate over `functions`.
    pub fn new(functions: HostFunctionTable) -> Self {
        Self {
            policy: GatePolicy::default(),
            functions: Arc::new(functions),
            on_denied: None,
            events: Arc::new(EventDispatcher::new()),
        }
    }

    /// Set the enforcement policy.
    pub fn with_policy(mut self, policy: GatePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Observe every denied call.
    pub fn with_on_denied(mut self, callback: DeniedCallback) -> Self {
        self.on_denied = Some(callback);
        self
    }

    /// Emit denial and host call events to `events`.
    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = events;
        self
    }

    /// The enforcement policy.
    pub fn policy(&self) -> GatePolicy {
        self.policy
    }

    /// The host functions imports are bound to.
    pub fn functions(&self) -> &HostFunctionTable {
        &self.functions
    }

    /// True when binding `import` to a real function needs a grant.
    ///
    /// Anything that is neither a runtime intrinsic nor an intrinsic host
    /// function is gated, so unknown imports fail closed.
    pub fn requires_grant(&self, import: &ImportId) -> bool {
        if import.as_str() == MEM_ALLOC || import.as_str() == ENV_MEMORY {
            return false;
        }
        match self.functions.get(import) {
            Some(function) => function.kind() == FunctionKind::Effect || is_gated(import),
            None => !is_intrinsic(import),
        }
    }

    /// How a non-peer function import would be bound for `manifest`.
    pub fn classify(&self, import: &ImportId, manifest: &CapabilityManifest) -> BindingKind {
        if !self.requires_grant(import) {
            return BindingKind::Intrinsic;
        }
        if manifest.permits(import) {
            return BindingKind::Granted;
        }
        match self.policy.mode() {
            EnforcementMode::Deny => BindingKind::Denied,
            EnforcementMode::Warn => BindingKind::Warned,
            EnforcementMode::Permissive => BindingKind::Permitted,
        }
    }

    /// Build the probe-phase table: every function import is a stub that
    /// returns zeros and touches nothing.
    ///
    /// # Errors
    ///
    /// Fails for global and table imports, and for memory imports other
    /// than `env.memory`.
    pub fn inert_table(
        &self,
        store: &mut Store<StoreData>,
        module: &CompiledModule,
    ) -> GateResult<ImportTable> {
        let mut linker = Linker::new(store.engine());
        linker.allow_shadowing(true);
        let mut bindings = Vec::new();

        for import in module.inner().imports() {
            let at = (import.module(), import.name());
            let id = ImportId::from_parts(at.0, at.1);
            let kind = match import.ty() {
                ExternType::Func(ty) => {
                    let results: Vec<ValType> = ty.results().collect();
                    let stub_id = id.clone();
                    define_func(&mut linker, &id, at, ty, move |_caller, _params, out| {
                        fill_zeros(&stub_id, &results, out)
                    })?;
                    BindingKind::Inert
                }
                other => define_non_func(&mut linker, store, &id, other)?,
            };
            bindings.push(BindingRecord::new(id, kind));
        }

        debug!(imports = bindings.len(), "Built inert import table");
        Ok(ImportTable::new(linker, bindings))
    }

    /// Build the live table for a module running under `link.manifest`.
    ///
    /// # Errors
    ///
    /// Fails when an import that would be bound to a real function has no
    /// provider or a mismatched type, when a peer lacks the named export,
    /// and for unsupported import kinds.
    pub fn filtered_table(
        &self,
        store: &mut Store<StoreData>,
        module: &CompiledModule,
        link: &LinkContext<'_>,
    ) -> GateResult<ImportTable> {
        let mut linker = Linker::new(store.engine());
        linker.allow_shadowing(true);
        let mut bindings = Vec::new();
        let module_name: Arc<str> = Arc::from(link.module);

        for import in module.inner().imports() {
            let at = (import.module(), import.name());
            let id = ImportId::from_parts(at.0, at.1);
            let kind = match import.ty() {
                ExternType::Func(ty) => {
                    if let Some(peer) = self.peer_for(import.module(), link) {
                        self.bind_peer(&mut linker, store, &id, ty, &peer, at, link)?;
                        BindingKind::Peer
                    } else if id.as_str() == MEM_ALLOC {
                        bind_alloc(&mut linker, &id, at, ty, link.arena.clone())?;
                        BindingKind::Intrinsic
                    } else {
                        let kind = self.classify(&id, link.manifest);
                        match kind {
                            BindingKind::Denied | BindingKind::Warned => {
                                self.bind_denied(&mut linker, &id, at, ty, &module_name)?;
                            }
                            _ => {
                                let function = self.resolve(&id, &ty)?;
                                bind_real(
                                    &mut linker,
                                    &id,
                                    at,
                                    ty,
                                    function,
                                    link.arena.clone(),
                                    Arc::clone(&module_name),
                                    Arc::clone(&self.events),
                                )?;
                            }
                        }
                        debug!(module = %link.module, import = %id, binding = %kind, "Bound import");
                        kind
                    }
                }
                other => define_non_func(&mut linker, store, &id, other)?,
            };
            bindings.push(BindingRecord::new(id, kind));
        }

        info!(
            module = %link.module,
            imports = bindings.len(),
            denied = bindings.iter().filter(|b| b.kind.is_denial()).count(),
            mode = ?self.policy.mode(),
            "Built filtered import table"
        );
        Ok(ImportTable::new(linker, bindings))
    }

    fn peer_for(&self, namespace: &str, link: &LinkContext<'_>) -> Option<LiveInstance> {
        if namespace == link.module || is_reserved_namespace(namespace) {
            return None;
        }
        link.peers.get(namespace)
    }

    fn resolve(&self, id: &ImportId, ty: &FuncType) -> GateResult<HostFunction> {
        let function = self
            .functions
            .get(id)
            .cloned()
            .ok_or_else(|| GateError::UnresolvedImport { import: id.clone() })?;

        if !function.signature().accepts(ty) {
            return Err(GateError::SignatureMismatch {
                import: id.clone(),
                expected: function.signature().to_string(),
                found: describe(ty),
            });
        }
        Ok(function)
    }

    fn bind_denied(
        &self,
        linker: &mut Linker<StoreData>,
        id: &ImportId,
        at: (&str, &str),
        ty: FuncType,
        module: &Arc<str>,
    ) -> GateResult<()> {
        let mode = self.policy.mode();
        let results: Vec<ValType> = ty.results().collect();
        let import = id.clone();
        let module = Arc::clone(module);
        let on_denied = self.on_denied.clone();
        let events = Arc::clone(&self.events);

        define_func(linker, id, at, ty, move |_caller, _params, out| {
            warn!(module = %module, import = %import, mode = ?mode, "Capability denied");
            if let Some(callback) = &on_denied {
                callback(&import);
            }
            events.emit(HostEvent::CapabilityDenied {
                module: module.to_string(),
                import: import.clone(),
                mode,
            });

            match mode {
                EnforcementMode::Warn => fill_zeros(&import, &results, out),
                _ => Err(wasmtime::Error::new(CapabilityDenied {
                    import: import.clone(),
                })),
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn bind_peer(
        &self,
        linker: &mut Linker<StoreData>,
        store: &mut Store<StoreData>,
        id: &ImportId,
        ty: FuncType,
        peer: &LiveInstance,
        at: (&str, &str),
        link: &LinkContext<'_>,
    ) -> GateResult<()> {
        let (peer_name, export) = at;
        let func = peer
            .instance
            .get_func(&mut *store, export)
            .ok_or_else(|| GateError::PeerExportMissing {
                module: peer_name.to_string(),
                export: export.to_string(),
            })?;

        let export_ty = func.ty(&*store);
        if !same_shape(&export_ty, &ty) {
            return Err(GateError::SignatureMismatch {
                import: id.clone(),
                expected: describe(&export_ty),
                found: describe(&ty),
            });
        }

        let peers = link.peers.clone();
        let caller_arena = link.arena.clone();
        let peer_name = peer_name.to_string();
        let export = export.to_string();
        let import = id.clone();

        debug!(module = %link.module, import = %id, peer = %peer_name, "Bound peer import");

        define_func(linker, id, at, ty, move |mut caller, params, results| {
            // Resolve on every call so dependents follow a swap.
            let target = peers.get(&peer_name).ok_or_else(|| HostTrap::PeerUnavailable {
                module: peer_name.clone(),
            })?;
            let func = target.instance.get_func(&mut caller, &export).ok_or_else(|| {
                HostTrap::PeerUnavailable {
                    module: peer_name.clone(),
                }
            })?;

            trace!(import = %import, generation = target.generation, "Peer call");

            if !target.copies(&export) {
                return func.call(&mut caller, params, results);
            }

            let own = caller_memory(&mut caller);
            let abi = |source: AbiError| HostTrap::Abi {
                import: import.clone(),
                source,
            };

            let mut args = params.to_vec();
            if let Some(own) = own {
                for arg in &mut args {
                    if let Val::I64(raw) = arg {
                        let fp = copy_fat_ptr(&mut caller, own, target.memory, &target.arena, FatPtr::from_i64(*raw))
                            .map_err(abi)?;
                        *raw = fp.to_i64();
                    }
                }
            }

            func.call(&mut caller, &args, results)?;

            if let Some(own) = own {
                for result in results.iter_mut() {
                    if let Val::I64(raw) = result {
                        let fp = copy_fat_ptr(&mut caller, target.memory, own, &caller_arena, FatPtr::from_i64(*raw))
                            .map_err(abi)?;
                        *raw = fp.to_i64();
                    }
                }
            }
            Ok(())
        })
    }
}

impl std::fmt::Debug for CapabilityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityGate")
            .field("policy", &self.policy)
            .field("functions", &self.functions.len())
            .field("on_denied", &self.on_denied.is_some())
            .finish()
    }
}

fn define_func<F>(
    linker: &mut Linker<StoreData>,
    id: &ImportId,
    at: (&str, &str),
    ty: FuncType,
    f: F,
) -> GateResult<()>
where
    F: Fn(Caller<'_, StoreData>, &[Val], &mut [Val]) -> wasmtime::Result<()> + Send + Sync + 'static,
{
    linker
        .func_new(at.0, at.1, ty, f)
        .map_err(|e| GateError::Define {
            import: id.clone(),
            reason: e.to_string(),
        })?;
    Ok(())
}

fn define_non_func(
    linker: &mut Linker<StoreData>,
    store: &mut Store<StoreData>,
    id: &ImportId,
    ty: ExternType,
) -> GateResult<BindingKind> {
    let kind = match ty {
        ExternType::Memory(memory_ty) if id.as_str() == ENV_MEMORY => {
            let memory = Memory::new(&mut *store, memory_ty).map_err(|e| GateError::Define {
                import: id.clone(),
                reason: e.to_string(),
            })?;
            linker
                .define(&*store, id.namespace(), id.function(), memory)
                .map_err(|e| GateError::Define {
                    import: id.clone(),
                    reason: e.to_string(),
                })?;
            return Ok(BindingKind::Intrinsic);
        }
        ExternType::Memory(_) => "memory",
        ExternType::Global(_) => "global",
        ExternType::Table(_) => "table",
        #[allow(unreachable_patterns)]
        _ => "extern",
    };

    Err(GateError::UnsupportedImport {
        import: id.clone(),
        kind,
    })
}

fn fill_zeros(import: &ImportId, types: &[ValType], out: &mut [Val]) -> wasmtime::Result<()> {
    for (slot, ty) in out.iter_mut().zip(types) {
        *slot = zero_val(ty).ok_or_else(|| HostTrap::NoDefault {
            import: import.clone(),
        })?;
    }
    Ok(())
}

fn bind_alloc(
    linker: &mut Linker<StoreData>,
    id: &ImportId,
    at: (&str, &str),
    ty: FuncType,
    arena: SharedArena,
) -> GateResult<()> {
    let signature = Signature::new([AbiType::Int], AbiType::Int);
    if !signature.accepts(&ty) {
        return Err(GateError::SignatureMismatch {
            import: id.clone(),
            expected: signature.to_string(),
            found: describe(&ty),
        });
    }

    let result_ty: Option<ValType> = ty.results().next();
    let import = id.clone();
    define_func(linker, id, at, ty, move |mut caller, params, results| {
        let size = match params.first() {
            Some(Val::I32(n)) => *n as u32,
            Some(Val::I64(n)) => *n as u32,
            _ => 0,
        };

        let ptr = with_marshaller(&mut caller, &arena, |m| m.alloc(size)).map_err(|source| {
            HostTrap::Abi {
                import: import.clone(),
                source,
            }
        })?;

        trace!(size, ptr, "mem.alloc");
        if let Some(slot) = results.first_mut() {
            *slot = match result_ty {
                Some(ValType::I64) => Val::I64(i64::from(ptr)),
                _ => Val::I32(ptr as i32),
            };
        }
        Ok(())
    })
}

#[allow(clippy::too_many_arguments)]
fn bind_real(
    linker: &mut Linker<StoreData>,
    id: &ImportId,
    at: (&str, &str),
    ty: FuncType,
    function: HostFunction,
    arena: SharedArena,
    module: Arc<str>,
    events: Arc<EventDispatcher>,
) -> GateResult<()> {
    let result_ty: Option<ValType> = ty.results().next();
    let import = id.clone();

    define_func(linker, id, at, ty, move |mut caller, params, results| {
        let abi = |source: AbiError| HostTrap::Abi {
            import: import.clone(),
            source,
        };

        let args = with_marshaller(&mut caller, &arena, |m| {
            lift_params(m, function.signature(), params)
        })
        .map_err(abi)?;

        let started = Instant::now();
        let outcome = function.call(&args);
        let duration = started.elapsed();

        trace!(import = %import, ok = outcome.is_ok(), duration_us = duration.as_micros(), "Host call");
        events.emit(HostEvent::HostCall {
            module: module.to_string(),
            import: import.clone(),
            duration,
            ok: outcome.is_ok(),
        });

        let value = outcome.map_err(|source| HostTrap::Call {
            import: import.clone(),
            source,
        })?;

        let lowered = with_marshaller(&mut caller, &arena, |m| {
            lower_result(m, &value, result_ty.as_ref())
        })
        .map_err(abi)?;

        if let (Some(val), Some(slot)) = (lowered, results.first_mut()) {
            *slot = val;
        }
        Ok(())
    })
}

fn same_valtype(a: &ValType, b: &ValType) -> bool {
    matches!(
        (a, b),
        (ValType::I32, ValType::I32)
            | (ValType::I64, ValType::I64)
            | (ValType::F32, ValType::F32)
            | (ValType::F64, ValType::F64)
            | (ValType::V128, ValType::V128)
            | (ValType::Ref(_), ValType::Ref(_))
    )
}

fn same_shape(a: &FuncType, b: &FuncType) -> bool {
    a.params().len() == b.params().len()
        && a.results().len() == b.results().len()
        && a.params().zip(b.params()).all(|(x, y)| same_valtype(&x, &y))
        && a.results().zip(b.results()).all(|(x, y)| same_valtype(&x, &y))
}

fn join_types(types: impl Iterator<Item = ValType>) -> String {
    types.map(|t| t.to_string()).collect::<Vec<_>>().join(", ")
}

fn describe(ty: &FuncType) -> String {
    format!("({}) -> ({})", join_types(ty.params()), join_types(ty.results()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use covenant_abi::{Marshaller, WasmMemory, shared_arena};
    use covenant_core::{CovenantEngine, IntoShared, ModuleLoader, ResourceLimits, StorePurpose, new_store};
    use covenant_providers::{BufferedConsole, ProviderSet};
    use wasmtime::Instance;

    const GUEST: &str = r#"
        (module
            (import "console" "println" (func $println (param i32 i32)))
            (import "http" "get" (func $get (param i32 i32) (result i64)))
            (import "text" "upper" (func $upper (param i32 i32) (result i64)))
            (import "mem" "alloc" (func $alloc (param i32) (result i32)))
            (memory (export "memory") 1)
            (data (i32.const 16) "hello")
            (func (export "greet") (call $println (i32.const 16) (i32.const 5)))
            (func (export "fetch") (result i64) (call $get (i32.const 16) (i32.const 5)))
            (func (export "shout") (result i64) (call $upper (i32.const 16) (i32.const 5)))
            (func (export "alloc") (param i32) (result i32) (call $alloc (local.get 0)))
        )
    "#;

    struct Fixture {
        store: Store<StoreData>,
        module: CompiledModule,
        arena: SharedArena,
        peers: PeerDirectory,
    }

    impl Fixture {
        fn new(wat: &str) -> Self {
            let engine = CovenantEngine::default_engine().unwrap().into_shared();
            let module = ModuleLoader::new(Arc::clone(&engine)).load_wat(wat).unwrap();
            let store = new_store(&engine, StorePurpose::Live, &ResourceLimits::default());
            Self {
                store,
                module,
                arena: shared_arena(4096),
                peers: PeerDirectory::new(),
            }
        }

        fn link(&mut self, gate: &CapabilityGate, manifest: &CapabilityManifest) -> GateResult<Instance> {
            let link = LinkContext {
                module: "guest",
                manifest,
                arena: self.arena.clone(),
                peers: &self.peers,
            };
            let table = gate.filtered_table(&mut self.store, &self.module, &link)?;
            table.instantiate(&mut self.store, &self.module)
        }

        fn read_string(&mut self, instance: Instance, raw: i64) -> String {
            let memory = instance.get_memory(&mut self.store, "memory").unwrap();
            let mut arena = self.arena.lock();
            let mut view = WasmMemory::new(memory, &mut self.store);
            Marshaller::new(&mut view, &mut arena)
                .read_string(FatPtr::from_i64(raw))
                .unwrap()
        }
    }

    fn console_gate(console: Arc<BufferedConsole>) -> CapabilityGate {
        CapabilityGate::new(ProviderSet::new().with_console(console).host_functions())
    }

    fn counting(counter: &Arc<AtomicUsize>, seen: &Arc<parking_lot::Mutex<Vec<ImportId>>>) -> DeniedCallback {
        let counter = Arc::clone(counter);
        let seen = Arc::clone(seen);
        Arc::new(move |import: &ImportId| {
            counter.fetch_add(1, Ordering::SeqCst);
            seen.lock().push(import.clone());
        })
    }

    #[test]
    fn test_granted_import_reaches_provider() {
        let console = Arc::new(BufferedConsole::new());
        let gate = console_gate(Arc::clone(&console));
        let manifest = CapabilityManifest::builder().with_effect("console").build();

        let mut fx = Fixture::new(GUEST);
        let instance = fx.link(&gate, &manifest).unwrap();
        let greet = instance.get_typed_func::<(), ()>(&mut fx.store, "greet").unwrap();
        greet.call(&mut fx.store, ()).unwrap();

        assert_eq!(console.lines(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_denied_import_traps() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let gate = console_gate(Arc::new(BufferedConsole::new()))
            .with_on_denied(counting(&counter, &seen));
        let manifest = CapabilityManifest::builder().with_effect("console").build();

        let mut fx = Fixture::new(GUEST);
        let instance = fx.link(&gate, &manifest).unwrap();
        let fetch = instance.get_typed_func::<(), i64>(&mut fx.store, "fetch").unwrap();
        let err = fetch.call(&mut fx.store, ()).unwrap_err();

        let denied = err.downcast_ref::<CapabilityDenied>().unwrap();
        assert_eq!(denied.import, ImportId::new("http.get"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock(), vec![ImportId::new("http.get")]);
    }

    #[test]
    fn test_warn_mode_returns_zero() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let gate = console_gate(Arc::new(BufferedConsole::new()))
            .with_policy(GatePolicy::warn_only())
            .with_on_denied(counting(&counter, &seen));

        let mut fx = Fixture::new(GUEST);
        let instance = fx.link(&gate, &CapabilityManifest::no_metadata()).unwrap();
        let fetch = instance.get_typed_func::<(), i64>(&mut fx.store, "fetch").unwrap();

        assert_eq!(fetch.call(&mut fx.store, ()).unwrap(), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bindings_record_decisions() {
        let gate = console_gate(Arc::new(BufferedConsole::new()));
        let manifest = CapabilityManifest::builder().with_effect("console").build();

        let mut fx = Fixture::new(GUEST);
        let link = LinkContext {
            module: "guest",
            manifest: &manifest,
            arena: fx.arena.clone(),
            peers: &fx.peers,
        };
        let table = gate.filtered_table(&mut fx.store, &fx.module, &link).unwrap();

        let kinds: Vec<_> = table.bindings().iter().map(|b| (b.import.to_string(), b.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("console.println".to_string(), BindingKind::Granted),
                ("http.get".to_string(), BindingKind::Denied),
                ("text.upper".to_string(), BindingKind::Intrinsic),
                ("mem.alloc".to_string(), BindingKind::Intrinsic),
            ]
        );
    }

    #[test]
    fn test_intrinsic_result_lands_in_arena() {
        let gate = console_gate(Arc::new(BufferedConsole::new()));

        let mut fx = Fixture::new(GUEST);
        let instance = fx.link(&gate, &CapabilityManifest::no_metadata()).unwrap();
        let shout = instance.get_typed_func::<(), i64>(&mut fx.store, "shout").unwrap();
        let raw = shout.call(&mut fx.store, ()).unwrap();

        assert_eq!(FatPtr::from_i64(raw).ptr, 4096);
        assert_eq!(fx.read_string(instance, raw), "HELLO");
    }

    #[test]
    fn test_mem_alloc_is_aligned_and_shared() {
        let gate = console_gate(Arc::new(BufferedConsole::new()));

        let mut fx = Fixture::new(GUEST);
        let instance = fx.link(&gate, &CapabilityManifest::no_metadata()).unwrap();
        let alloc = instance.get_typed_func::<i32, i32>(&mut fx.store, "alloc").unwrap();

        assert_eq!(alloc.call(&mut fx.store, 3).unwrap(), 4096);
        assert_eq!(alloc.call(&mut fx.store, 8).unwrap(), 4104);
        assert_eq!(fx.arena.lock().allocations(), 2);
    }

    #[test]
    fn test_permissive_binds_real_functions() {
        let gate = console_gate(Arc::new(BufferedConsole::new())).with_policy(GatePolicy::permissive());

        let mut fx = Fixture::new(GUEST);
        let instance = fx.link(&gate, &CapabilityManifest::no_metadata()).unwrap();
        let fetch = instance.get_typed_func::<(), i64>(&mut fx.store, "fetch").unwrap();
        let err = fetch.call(&mut fx.store, ()).unwrap_err();

        // The offline network refuses, but the call got past the gate.
        assert!(err.downcast_ref::<CapabilityDenied>().is_none());
        assert!(matches!(err.downcast_ref::<HostTrap>(), Some(HostTrap::Call { .. })));
    }

    #[test]
    fn test_signature_mismatch_fails_link() {
        let gate = console_gate(Arc::new(BufferedConsole::new()));
        let manifest = CapabilityManifest::builder().with_effect("console").build();

        let mut fx = Fixture::new(
            r#"(module
                (import "console" "println" (func (param i64)))
                (memory (export "memory") 1))"#,
        );
        let err = fx.link(&gate, &manifest).unwrap_err();
        assert!(matches!(err, GateError::SignatureMismatch { .. }));
    }

    #[test]
    fn test_denied_stub_adopts_any_type() {
        let gate = console_gate(Arc::new(BufferedConsole::new()));

        let mut fx = Fixture::new(
            r#"(module
                (import "console" "println" (func (param i64)))
                (memory (export "memory") 1))"#,
        );
        assert!(fx.link(&gate, &CapabilityManifest::no_metadata()).is_ok());
    }

    #[test]
    fn test_unknown_intrinsic_is_unresolved() {
        let gate = console_gate(Arc::new(BufferedConsole::new()));

        let mut fx = Fixture::new(
            r#"(module
                (import "text" "no_such_function" (func))
                (memory (export "memory") 1))"#,
        );
        let err = fx.link(&gate, &CapabilityManifest::no_metadata()).unwrap_err();
        assert!(matches!(err, GateError::UnresolvedImport { .. }));
    }

    #[test]
    fn test_global_import_is_unsupported() {
        let gate = console_gate(Arc::new(BufferedConsole::new()));

        let mut fx = Fixture::new(
            r#"(module
                (import "env" "base" (global i32))
                (memory (export "memory") 1))"#,
        );
        let err = fx.link(&gate, &CapabilityManifest::no_metadata()).unwrap_err();
        assert!(matches!(err, GateError::UnsupportedImport { kind: "global", .. }));
    }

    #[test]
    fn test_inert_table_stubs_everything() {
        let gate = console_gate(Arc::new(BufferedConsole::new()));

        let mut fx = Fixture::new(GUEST);
        let table = gate.inert_table(&mut fx.store, &fx.module).unwrap();
        assert!(table.bindings().iter().all(|b| b.kind == BindingKind::Inert));

        let instance = table.instantiate(&mut fx.store, &fx.module).unwrap();
        let alloc = instance.get_typed_func::<i32, i32>(&mut fx.store, "alloc").unwrap();
        let shout = instance.get_typed_func::<(), i64>(&mut fx.store, "shout").unwrap();

        assert_eq!(alloc.call(&mut fx.store, 16).unwrap(), 0);
        assert_eq!(shout.call(&mut fx.store, ()).unwrap(), 0);
        assert_eq!(fx.arena.lock().allocations(), 0);
    }

    #[test]
    fn test_peer_bridge_copies_fat_pointers() {
        let gate = console_gate(Arc::new(BufferedConsole::new()));
        let manifest = CapabilityManifest::no_metadata();

        let engine = CovenantEngine::default_engine().unwrap().into_shared();
        let loader = ModuleLoader::new(Arc::clone(&engine));
        let mut store = new_store(&engine, StorePurpose::Live, &ResourceLimits::default());
        let peers = PeerDirectory::new();

        let symbols = loader
            .load_wat(
                r#"(module
                    (memory (export "memory") 1)
                    (func (export "lookup") (param i64) (result i64) (local.get 0)))"#,
            )
            .unwrap();
        let symbols_arena = shared_arena(8192);
        let link = LinkContext {
            module: "symbols",
            manifest: &manifest,
            arena: symbols_arena.clone(),
            peers: &peers,
        };
        let symbols_instance = gate
            .filtered_table(&mut store, &symbols, &link)
            .unwrap()
            .instantiate(&mut store, &symbols)
            .unwrap();
        let symbols_memory = symbols_instance.get_memory(&mut store, "memory").unwrap();
        peers.insert(
            "symbols",
            LiveInstance {
                instance: symbols_instance,
                memory: symbols_memory,
                arena: symbols_arena.clone(),
                generation: 1,
                copy_fat_pointers: Arc::new(BTreeSet::from(["lookup".to_string()])),
            },
        );

        let query = loader
            .load_wat(
                r#"(module
                    (import "symbols" "lookup" (func $lookup (param i64) (result i64)))
                    (memory (export "memory") 1)
                    (data (i32.const 32) "abc")
                    (func (export "run") (result i64)
                        (call $lookup (i64.or (i64.shl (i64.const 32) (i64.const 32)) (i64.const 3)))))"#,
            )
            .unwrap();
        let query_arena = shared_arena(4096);
        let link = LinkContext {
            module: "query",
            manifest: &manifest,
            arena: query_arena.clone(),
            peers: &peers,
        };
        let table = gate.filtered_table(&mut store, &query, &link).unwrap();
        assert_eq!(table.count(BindingKind::Peer), 1);

        let query_instance = table.instantiate(&mut store, &query).unwrap();
        let run = query_instance.get_typed_func::<(), i64>(&mut store, "run").unwrap();
        let fp = FatPtr::from_i64(run.call(&mut store, ()).unwrap());

        // Copied into the callee's arena, then back into the caller's.
        assert_eq!(symbols_arena.lock().allocations(), 1);
        assert_eq!(fp, FatPtr::new(4096, 3));

        let memory = query_instance.get_memory(&mut store, "memory").unwrap();
        let mut out = [0u8; 3];
        memory.read(&store, fp.ptr as usize, &mut out).unwrap();
        assert_eq!(&out, b"abc");
    }
}
