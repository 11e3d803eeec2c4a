//! Reading a module's embedded capability metadata.
//!
//! Runs against the probe instance. Nothing here returns an error: any
//! problem yields a deny-all manifest that records why.

use covenant_abi::{Arena, FatPtr, Marshaller, WasmMemory};
use covenant_capability::CapabilityManifest;
use covenant_core::{MEMORY_EXPORT, StoreData};
use tracing::debug;
use wasmtime::{Instance, Store};

/// Export returning a fat pointer to the module's symbol metadata JSON.
pub const METADATA_EXPORT: &str = "_cov_get_symbol_metadata";

/// Export invoked once after real instantiation.
pub const INITIALIZE_EXPORT: &str = "_initialize";

/// Derive the manifest of a probe instance.
///
/// Without the metadata export or a memory export the result is an empty
/// [`ManifestSource::NoMetadata`](covenant_capability::ManifestSource)
/// manifest. A metadata export that traps, has the wrong type, or returns
/// unreadable JSON yields a degraded one.
pub fn extract_manifest(store: &mut Store<StoreData>, instance: &Instance) -> CapabilityManifest {
    let Some(memory) = instance.get_memory(&mut *store, MEMORY_EXPORT) else {
        debug!("Probe instance has no memory export");
        return CapabilityManifest::no_metadata();
    };
    let Some(func) = instance.get_func(&mut *store, METADATA_EXPORT) else {
        debug!("Module has no embedded metadata");
        return CapabilityManifest::no_metadata();
    };

    let func = match func.typed::<(), i64>(&*store) {
        Ok(func) => func,
        Err(e) => return CapabilityManifest::degraded(format!("{METADATA_EXPORT} has the wrong type: {e}")),
    };

    let fp = match func.call(&mut *store, ()) {
        Ok(raw) => FatPtr::from_i64(raw),
        Err(e) => return CapabilityManifest::degraded(format!("{METADATA_EXPORT} trapped: {e}")),
    };

    // Reads never allocate, so a throwaway arena is enough.
    let mut arena = Arena::default();
    let mut view = WasmMemory::new(memory, &mut *store);
    let json = match Marshaller::new(&mut view, &mut arena).read_string(fp) {
        Ok(json) => json,
        Err(e) => return CapabilityManifest::degraded(format!("unreadable metadata at {fp}: {e}")),
    };

    debug!(bytes = json.len(), "Read embedded metadata");
    CapabilityManifest::from_json(&json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_capability::{ImportId, ManifestSource};
    use covenant_core::{CovenantEngine, ModuleLoader, ResourceLimits, StorePurpose, new_store};
    use std::sync::Arc;

    fn probe(wat: &str) -> CapabilityManifest {
        let engine = Arc::new(CovenantEngine::default_engine().unwrap());
        let module = ModuleLoader::new(Arc::clone(&engine)).load_wat(wat).unwrap();
        let mut store = new_store(&engine, StorePurpose::Probe, &ResourceLimits::default());
        let instance = Instance::new(&mut store, module.inner(), &[]).unwrap();
        extract_manifest(&mut store, &instance)
    }

    fn metadata_module(json: &str) -> String {
        let fp = (1024i64 << 32) | json.len() as i64;
        format!(
            r#"(module
                (memory (export "memory") 1)
                (data (i32.const 1024) "{}")
                (func (export "_cov_get_symbol_metadata") (result i64) (i64.const {fp})))"#,
            json.replace('"', "\\\"")
        )
    }

    #[test]
    fn test_reads_embedded_effects() {
        let manifest = probe(&metadata_module(
            r#"[{"id":"fetch_page","kind":"fn","effects":["network"]}]"#,
        ));

        assert_eq!(manifest.source(), &ManifestSource::Embedded { symbols: 1 });
        assert!(manifest.permits(&ImportId::new("http.get")));
        assert!(!manifest.permits(&ImportId::new("db.execute_query")));
    }

    #[test]
    fn test_missing_export_is_deny_all() {
        let manifest = probe(r#"(module (memory (export "memory") 1))"#);

        assert!(manifest.is_empty());
        assert_eq!(manifest.source(), &ManifestSource::NoMetadata);
    }

    #[test]
    fn test_missing_memory_is_deny_all() {
        let manifest = probe(r#"(module (func (export "_cov_get_symbol_metadata") (result i64) (i64.const 0)))"#);
        assert_eq!(manifest.source(), &ManifestSource::NoMetadata);
    }

    #[test]
    fn test_trapping_export_degrades() {
        let manifest = probe(
            r#"(module
                (memory (export "memory") 1)
                (func (export "_cov_get_symbol_metadata") (result i64) unreachable))"#,
        );

        assert!(manifest.is_degraded());
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_wrong_type_degrades() {
        let manifest = probe(
            r#"(module
                (memory (export "memory") 1)
                (func (export "_cov_get_symbol_metadata") (result i32) (i32.const 0)))"#,
        );
        assert!(manifest.is_degraded());
    }

    #[test]
    fn test_invalid_json_degrades() {
        let manifest = probe(&metadata_module("not json"));
        assert!(manifest.is_degraded());
    }

    #[test]
    fn test_out_of_bounds_pointer_degrades() {
        let manifest = probe(
            r#"(module
                (memory (export "memory") 1)
                (func (export "_cov_get_symbol_metadata") (result i64)
                    (i64.const 0x0010000000000010)))"#,
        );
        assert!(manifest.is_degraded());
    }
}
