//! A built import table, ready to instantiate against.

use covenant_core::{CompiledModule, StoreData};
use covenant_observe::{BindingKind, BindingRecord};
use tracing::debug;
use wasmtime::{Instance, Linker, Store};

use crate::error::{GateError, GateResult};

/// Every import of one module bound to a callable, plus a record of how.
///
/// Built twice per load: once inert for the probe, once filtered by the
/// manifest for the live instance.
pub struct ImportTable {
    linker: Linker<StoreData>,
    bindings: Vec<BindingRecord>,
}

impl ImportTable {
    pub(crate) fn new(linker: Linker<StoreData>, bindings: Vec<BindingRecord>) -> Self {
        Self { linker, bindings }
    }

    /// How each import was bound, in declaration order.
    pub fn bindings(&self) -> &[BindingRecord] {
        &self.bindings
    }

    /// Consume the table, keeping only the binding records.
    pub fn into_bindings(self) -> Vec<BindingRecord> {
        self.bindings
    }

    /// Number of imports bound with `kind`.
    pub fn count(&self, kind: BindingKind) -> usize {
        self.bindings.iter().filter(|b| b.kind == kind).count()
    }

    /// Instantiate `module` against this table.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Instantiate`] when the engine rejects the
    /// instantiation or the start function traps.
    pub fn instantiate(
        &self,
        store: &mut Store<StoreData>,
        module: &CompiledModule,
    ) -> GateResult<Instance> {
        let instance = self
            .linker
            .instantiate(&mut *store, module.inner())
            .map_err(GateError::Instantiate)?;

        debug!(
            store_id = %store.data().id,
            imports = self.bindings.len(),
            "Instantiated module"
        );
        Ok(instance)
    }
}

impl std::fmt::Debug for ImportTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportTable")
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}
