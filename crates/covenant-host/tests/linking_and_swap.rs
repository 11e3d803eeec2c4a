//! Co-resident modules calling each other, and hot swapping them.

use covenant_host::covenant_gate::GateError;
use covenant_host::prelude::*;

fn symbols(case: &str) -> String {
    format!(
        r#"(module
            (import "text" "{case}" (func $convert (param i32 i32) (result i64)))
            (memory (export "memory") 1)
            (func (export "lookup") (param i64) (result i64)
                (call $convert
                    (i32.wrap_i64 (i64.shr_u (local.get 0) (i64.const 32)))
                    (i32.wrap_i64 (local.get 0)))))"#
    )
}

const QUERY: &str = r#"(module
    (import "symbols" "lookup" (func $lookup (param i64) (result i64)))
    (memory (export "memory") 1)
    (func (export "run") (param i32 i32) (result i64)
        (call $lookup
            (i64.or
                (i64.shl (i64.extend_i32_u (local.get 0)) (i64.const 32))
                (i64.extend_i32_u (local.get 1))))))"#;

fn versioned(version: i32) -> String {
    format!(
        r#"(module
            (memory (export "memory") 1)
            (func (export "version") (result i32) (i32.const {version})))"#
    )
}

fn linked_host() -> (Host, ModuleHandle, ModuleHandle) {
    let mut host = Host::with_defaults().unwrap();
    let module = host
        .compile_bytes("symbols", &wat::parse_str(symbols("upper")).unwrap())
        .unwrap();
    let symbols = host
        .load_compiled("symbols", module, &["lookup".to_string()])
        .unwrap();

    let query = host.load_wat("query", QUERY).unwrap();
    (host, symbols, query)
}

fn run(host: &mut Host, query: &ModuleHandle, input: &str) -> HostResult<AbiValue> {
    host.call_with(query, "run", &[AbiValue::Str(input.into())], AbiType::Str)
}

#[test]
fn test_peer_call_copies_strings_across_memories() {
    let (mut host, symbols, query) = linked_host();

    assert_eq!(run(&mut host, &query, "abc").unwrap(), AbiValue::Str("ABC".into()));

    let report = host.report("query").unwrap();
    assert_eq!(report.count(BindingKind::Peer), 1);
    assert!(host.arena_bytes(&symbols).unwrap() > 0);
}

#[test]
fn test_peer_import_without_peer_fails_closed() {
    let mut host = Host::with_defaults().unwrap();
    let query = host.load_wat("query", QUERY).unwrap();

    let err = run(&mut host, &query, "abc").unwrap_err();
    assert_eq!(err.denied_import(), Some(&ImportId::new("symbols.lookup")));
}

#[test]
fn test_swap_makes_old_handle_stale() {
    let mut host = Host::with_defaults().unwrap();
    let v1 = host.load_wat("app", &versioned(1)).unwrap();
    let v2 = host.swap_wat("app", &versioned(2)).unwrap();

    assert!(v2.generation() > v1.generation());
    assert!(matches!(
        host.call(&v1, "version", &[]),
        Err(HostError::StaleHandle { .. })
    ));
    assert_eq!(host.call(&v2, "version", &[]).unwrap()[0].unwrap_i32(), 2);
    assert_eq!(host.module("app").unwrap(), v2);
    assert_eq!(host.metrics().swaps, 1);
}

#[test]
fn test_failed_swap_keeps_old_instance() {
    let mut host = Host::with_defaults().unwrap();
    let v1 = host.load_wat("app", &versioned(1)).unwrap();

    let err = host.swap_wat("app", r#"(module (func (export "version") (result i32) (i32.const 2)))"#);
    assert!(matches!(err, Err(HostError::MissingMemory { .. })));

    assert_eq!(host.module("app").unwrap(), v1);
    assert_eq!(host.call(&v1, "version", &[]).unwrap()[0].unwrap_i32(), 1);
    assert_eq!(host.modules(), vec!["app".to_string()]);
}

#[test]
fn test_swap_module_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app-v2.wasm");
    std::fs::write(&path, wat::parse_str(versioned(2)).unwrap()).unwrap();

    let mut host = Host::with_defaults().unwrap();
    let v1 = host.load_wat("app", &versioned(1)).unwrap();
    let v2 = host.swap_module("app", &path).unwrap();

    assert_eq!(v2.name(), "app");
    assert!(v2.generation() > v1.generation());
    assert_eq!(host.call(&v2, "version", &[]).unwrap()[0].unwrap_i32(), 2);
    assert!(matches!(
        host.call(&v1, "version", &[]),
        Err(HostError::StaleHandle { .. })
    ));
}

#[test]
fn test_swap_module_from_bad_file_keeps_old_instance() {
    let dir = tempfile::tempdir().unwrap();
    let garbage = dir.path().join("garbage.wasm");
    std::fs::write(&garbage, b"\0asm not really").unwrap();

    let mut host = Host::with_defaults().unwrap();
    let v1 = host.load_wat("app", &versioned(1)).unwrap();

    let missing = host.swap_module("app", dir.path().join("missing.wasm")).unwrap_err();
    assert!(matches!(missing, HostError::Load { .. }));

    let invalid = host.swap_module("app", &garbage).unwrap_err();
    assert!(matches!(invalid, HostError::Load { .. }));

    assert_eq!(host.module("app").unwrap(), v1);
    assert_eq!(host.call(&v1, "version", &[]).unwrap()[0].unwrap_i32(), 1);
    assert_eq!(host.metrics().swaps, 0);
}

#[test]
fn test_swap_of_unknown_module_fails() {
    let mut host = Host::with_defaults().unwrap();
    assert!(matches!(
        host.swap_wat("app", &versioned(1)),
        Err(HostError::NotLoaded(_))
    ));
}

#[test]
fn test_dependents_follow_a_swapped_peer() {
    let (mut host, _, query) = linked_host();
    assert_eq!(run(&mut host, &query, "AbC").unwrap(), AbiValue::Str("ABC".into()));

    host.swap_wat("symbols", &symbols("lower")).unwrap();

    // The dependent keeps its handle; its bridge resolves the new peer.
    assert_eq!(run(&mut host, &query, "AbC").unwrap(), AbiValue::Str("abc".into()));
}

#[test]
fn test_swap_that_breaks_a_dependent_is_rejected() {
    let (mut host, symbols, query) = linked_host();

    let err = host.swap_wat("symbols", &versioned(3)).unwrap_err();
    assert!(matches!(
        err,
        HostError::Link {
            source: GateError::PeerExportMissing { .. },
            ..
        }
    ));

    assert_eq!(host.module("symbols").unwrap(), symbols);
    assert_eq!(run(&mut host, &query, "xy").unwrap(), AbiValue::Str("XY".into()));
}

#[test]
fn test_swap_with_changed_signature_is_rejected() {
    let (mut host, _, _) = linked_host();
    let changed = r#"(module
        (memory (export "memory") 1)
        (func (export "lookup") (param i32) (result i32) (local.get 0)))"#;

    assert!(host.swap_wat("symbols", changed).is_err());
}

#[test]
fn test_unload_removes_module() {
    let mut host = Host::with_defaults().unwrap();
    let handle = host.load_wat("app", &versioned(1)).unwrap();

    host.unload("app").unwrap();
    assert!(!host.is_loaded("app"));
    assert!(host.call(&handle, "version", &[]).is_err());
    assert!(matches!(host.unload("app"), Err(HostError::NotLoaded(_))));

    // The name is free again.
    host.load_wat("app", &versioned(2)).unwrap();
}

#[test]
fn test_missing_export() {
    let mut host = Host::with_defaults().unwrap();
    let handle = host.load_wat("app", &versioned(1)).unwrap();

    assert!(matches!(
        host.call(&handle, "nope", &[]),
        Err(HostError::ExportNotFound { .. })
    ));
}

#[test]
fn test_load_linked_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let symbols_path = dir.path().join("symbols.wasm");
    let query_path = dir.path().join("query.wasm");
    std::fs::write(&symbols_path, wat::parse_str(symbols("upper")).unwrap()).unwrap();
    std::fs::write(&query_path, wat::parse_str(QUERY).unwrap()).unwrap();

    let mut host = Host::with_defaults().unwrap();
    let handles = host
        .load_linked(&[
            LinkSpec::new("symbols", &symbols_path).copying("lookup"),
            LinkSpec::new("query", &query_path),
        ])
        .unwrap();

    assert_eq!(handles.len(), 2);
    assert_eq!(run(&mut host, &handles[1], "ok").unwrap(), AbiValue::Str("OK".into()));
}

#[test]
fn test_load_linked_stops_at_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.wasm");
    std::fs::write(&good, wat::parse_str(versioned(1)).unwrap()).unwrap();

    let mut host = Host::with_defaults().unwrap();
    let err = host
        .load_linked(&[
            LinkSpec::new("first", &good),
            LinkSpec::new("second", dir.path().join("missing.wasm")),
            LinkSpec::new("third", &good),
        ])
        .unwrap_err();

    assert!(err.is_load_error());
    assert_eq!(host.modules(), vec!["first".to_string()]);
}
