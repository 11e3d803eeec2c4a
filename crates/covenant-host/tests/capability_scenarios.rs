//! End to end capability scenarios against WAT guests.

use std::sync::Arc;

use covenant_host::covenant_capability::ManifestSource;
use covenant_host::covenant_gate::GateError;
use covenant_host::covenant_providers::BufferedConsole;
use covenant_host::prelude::*;
use parking_lot::Mutex;

const METADATA_OFFSET: u64 = 1024;

/// A guest with `memory`, `"hello"` at offset 16 and, when `metadata` is
/// given, a `_cov_get_symbol_metadata` export pointing at it.
fn guest(imports: &str, metadata: Option<&str>, body: &str) -> String {
    let metadata = metadata
        .map(|json| {
            let fp = (METADATA_OFFSET << 32) | json.len() as u64;
            format!(
                r#"(data (i32.const {METADATA_OFFSET}) "{}")
                   (func (export "_cov_get_symbol_metadata") (result i64) (i64.const {}))"#,
                json.replace('"', "\\\""),
                fp as i64
            )
        })
        .unwrap_or_default();

    format!(
        r#"(module
            {imports}
            (memory (export "memory") 1)
            (data (i32.const 16) "hello")
            {metadata}
            {body})"#
    )
}

fn effects(list: &[&str]) -> String {
    let quoted: Vec<String> = list.iter().map(|e| format!("\"{e}\"")).collect();
    format!(r#"[{{"id":"main","kind":"function","effects":[{}]}}]"#, quoted.join(","))
}

const NET_AND_CONSOLE: &str = r#"
    (import "console" "println" (func $println (param i32 i32)))
    (import "http" "get" (func $get (param i32 i32) (result i64)))
    (import "db" "execute_query" (func $query (param i32 i32) (result i64)))
"#;

const GREET_AND_FETCH: &str = r#"
    (func (export "greet") (call $println (i32.const 16) (i32.const 5)))
    (func (export "fetch") (result i64) (call $get (i32.const 16) (i32.const 5)))
    (func (export "query") (result i64) (call $query (i32.const 16) (i32.const 5)))
"#;

struct Fixture {
    host: Host,
    console: Arc<BufferedConsole>,
    denied: Arc<Mutex<Vec<String>>>,
    events: Arc<CollectingSubscriber>,
}

fn fixture(policy: GatePolicy) -> Fixture {
    let console = Arc::new(BufferedConsole::new());
    let denied = Arc::new(Mutex::new(Vec::new()));
    let events = Arc::new(CollectingSubscriber::default());

    let seen = Arc::clone(&denied);
    let host = Host::builder()
        .with_policy(policy)
        .with_providers(ProviderSet::new().with_console(console.clone()))
        .with_on_denied(move |import| seen.lock().push(import.to_string()))
        .with_event_subscriber(events.clone())
        .build()
        .unwrap();

    Fixture {
        host,
        console,
        denied,
        events,
    }
}

#[test]
fn test_console_granted_network_denied() {
    let mut fx = fixture(GatePolicy::strict());
    let wat = guest(NET_AND_CONSOLE, Some(&effects(&["console"])), GREET_AND_FETCH);
    let handle = fx.host.load_wat("app", &wat).unwrap();

    fx.host.call(&handle, "greet", &[]).unwrap();
    assert_eq!(fx.console.lines(), vec!["hello".to_string()]);

    let err = fx.host.call(&handle, "fetch", &[]).unwrap_err();
    assert_eq!(err.denied_import(), Some(&ImportId::new("http.get")));
    assert_eq!(*fx.denied.lock(), vec!["http.get".to_string()]);
}

#[test]
fn test_no_metadata_denies_every_gated_import() {
    let mut fx = fixture(GatePolicy::strict());
    let wat = guest(NET_AND_CONSOLE, None, GREET_AND_FETCH);
    let handle = fx.host.load_wat("app", &wat).unwrap();

    let manifest = fx.host.manifest("app").unwrap();
    assert!(manifest.is_empty());
    assert_eq!(manifest.source(), &ManifestSource::NoMetadata);

    for export in ["greet", "fetch", "query"] {
        let err = fx.host.call(&handle, export, &[]).unwrap_err();
        assert!(matches!(err, HostError::CapabilityDenied { .. }), "{export}: {err}");
    }
    assert!(fx.console.lines().is_empty());
    assert_eq!(fx.denied.lock().len(), 3);
}

#[test]
fn test_network_effect_grants_exactly_http() {
    let mut fx = fixture(GatePolicy::strict());
    let wat = guest(NET_AND_CONSOLE, Some(&effects(&["network"])), GREET_AND_FETCH);
    fx.host.load_wat("app", &wat).unwrap();

    let manifest = fx.host.manifest("app").unwrap();
    let granted: Vec<&str> = manifest.imports().map(|i| i.as_str()).collect();
    assert_eq!(granted, vec!["http.fetch", "http.get", "http.post"]);

    let report = fx.host.report("app").unwrap();
    let denied: Vec<String> = report.imports_with(BindingKind::Denied).map(|i| i.to_string()).collect();
    assert_eq!(denied, vec!["console.println", "db.execute_query"]);
    assert_eq!(report.count(BindingKind::Granted), 1);
}

#[test]
fn test_granted_provider_failure_is_a_trap_not_a_denial() {
    let mut fx = fixture(GatePolicy::strict());
    let wat = guest(NET_AND_CONSOLE, Some(&effects(&["network"])), GREET_AND_FETCH);
    let handle = fx.host.load_wat("app", &wat).unwrap();

    // The default network provider is offline.
    let err = fx.host.call(&handle, "fetch", &[]).unwrap_err();
    assert!(matches!(err, HostError::Trap { .. }));
    assert!(fx.denied.lock().is_empty());
}

#[test]
fn test_warn_only_returns_default_and_reports_once() {
    let mut fx = fixture(GatePolicy::warn_only());
    let wat = guest(NET_AND_CONSOLE, Some(&effects(&["console"])), GREET_AND_FETCH);
    let handle = fx.host.load_wat("app", &wat).unwrap();

    let results = fx.host.call(&handle, "fetch", &[]).unwrap();
    assert_eq!(results[0].unwrap_i64(), 0);
    assert_eq!(*fx.denied.lock(), vec!["http.get".to_string()]);

    let fp = FatPtr::from_i64(results[0].unwrap_i64());
    assert_eq!(fx.host.read_string(&handle, fp).unwrap(), "");

    assert_eq!(fx.host.metrics().denials.get("http.get"), Some(&1));
    assert_eq!(fx.events.denied_imports(), vec![ImportId::new("http.get")]);
}

#[test]
fn test_permissive_binds_everything() {
    let mut fx = fixture(GatePolicy::permissive());
    let wat = guest(NET_AND_CONSOLE, None, GREET_AND_FETCH);
    let handle = fx.host.load_wat("app", &wat).unwrap();

    fx.host.call(&handle, "greet", &[]).unwrap();
    assert_eq!(fx.console.lines(), vec!["hello".to_string()]);
    assert!(fx.denied.lock().is_empty());

    let report = fx.host.report("app").unwrap();
    assert_eq!(report.count(BindingKind::Permitted), 3);
}

#[test]
fn test_missing_memory_is_fatal() {
    let mut fx = fixture(GatePolicy::strict());
    let err = fx
        .host
        .load_wat("app", r#"(module (func (export "main")))"#)
        .unwrap_err();

    assert!(matches!(err, HostError::MissingMemory { .. }));
    assert!(err.is_load_error());
    assert!(!fx.host.is_loaded("app"));
    assert_eq!(fx.events.of_type("load_failed").len(), 1);
}

#[test]
fn test_compile_failure_leaves_other_modules_alone() {
    let mut fx = fixture(GatePolicy::strict());
    let ok = fx.host.load_wat("good", &guest("", None, "")).unwrap();

    let err = fx.host.load_bytes("bad", &[0, 97, 115, 109, 9, 9]).unwrap_err();
    assert!(matches!(err, HostError::Load { .. }));

    assert_eq!(fx.host.modules(), vec!["good".to_string()]);
    assert_eq!(fx.host.module("good").unwrap(), ok);
    assert_eq!(fx.host.metrics().failed_loads, 1);
}

#[test]
fn test_degraded_metadata_loads_deny_all() {
    let mut fx = fixture(GatePolicy::strict());
    let wat = guest(NET_AND_CONSOLE, Some("{not json"), GREET_AND_FETCH);
    let handle = fx.host.load_wat("app", &wat).unwrap();

    let manifest = fx.host.manifest("app").unwrap();
    assert!(manifest.is_degraded());
    assert!(matches!(
        fx.host.call(&handle, "greet", &[]),
        Err(HostError::CapabilityDenied { .. })
    ));
    assert_eq!(fx.events.of_type("manifest_degraded").len(), 1);
    assert_eq!(fx.host.metrics().degraded_manifests, 1);
}

#[test]
fn test_invalid_and_duplicate_names() {
    let mut fx = fixture(GatePolicy::strict());
    let wat = guest("", None, "");

    assert!(matches!(fx.host.load_wat("http", &wat), Err(HostError::InvalidName(_))));
    assert!(matches!(fx.host.load_wat("", &wat), Err(HostError::InvalidName(_))));

    fx.host.load_wat("app", &wat).unwrap();
    assert!(matches!(fx.host.load_wat("app", &wat), Err(HostError::AlreadyLoaded(_))));
}

#[test]
fn test_initialize_runs_once() {
    let mut fx = fixture(GatePolicy::strict());
    let wat = guest(
        "",
        None,
        r#"
        (global $count (mut i32) (i32.const 0))
        (func (export "_initialize") (global.set $count (i32.add (global.get $count) (i32.const 1))))
        (func (export "count") (result i32) (global.get $count))
        "#,
    );
    let handle = fx.host.load_wat("app", &wat).unwrap();

    let results = fx.host.call(&handle, "count", &[]).unwrap();
    assert_eq!(results[0].unwrap_i32(), 1);
    assert_eq!(fx.events.of_type("module_initialized").len(), 1);
}

#[test]
fn test_trapping_initialize_fails_the_load() {
    let mut fx = fixture(GatePolicy::strict());
    let wat = guest("", None, r#"(func (export "_initialize") unreachable)"#);

    let err = fx.host.load_wat("app", &wat).unwrap_err();
    assert!(matches!(err, HostError::Initialize { .. }));
    assert!(!fx.host.is_loaded("app"));
}

#[test]
fn test_call_with_strings_uses_the_arena() {
    let mut fx = fixture(GatePolicy::strict());
    let wat = guest(
        r#"(import "text" "upper" (func $upper (param i32 i32) (result i64)))"#,
        None,
        r#"(func (export "shout") (param i32 i32) (result i64)
            (call $upper (local.get 0) (local.get 1)))"#,
    );
    let handle = fx.host.load_wat("app", &wat).unwrap();

    let value = fx
        .host
        .call_with(&handle, "shout", &[AbiValue::Str("ünïcode".into())], AbiType::Str)
        .unwrap();
    assert_eq!(value, AbiValue::Str("ÜNÏCODE".into()));
    assert!(fx.host.arena_bytes(&handle).unwrap() > 0);
}

#[test]
fn test_host_strings_round_trip_through_guest_memory() {
    let mut fx = fixture(GatePolicy::strict());
    let handle = fx.host.load_wat("app", &guest("", None, "")).unwrap();

    for s in ["", "symbols", "日本語 text", "emoji 🦀"] {
        let fp = fx.host.write_string(&handle, s).unwrap();
        assert_eq!(fx.host.read_string(&handle, fp).unwrap(), s);
    }
}

#[test]
fn test_hosts_do_not_share_state() {
    let mut a = fixture(GatePolicy::strict());
    let mut b = fixture(GatePolicy::warn_only());
    let wat = guest(NET_AND_CONSOLE, Some(&effects(&["console"])), GREET_AND_FETCH);

    let ha = a.host.load_wat("app", &wat).unwrap();
    let hb = b.host.load_wat("app", &wat).unwrap();

    a.host.call(&ha, "greet", &[]).unwrap();
    assert_eq!(a.console.lines().len(), 1);
    assert!(b.console.lines().is_empty());
    assert!(b.host.call(&hb, "fetch", &[]).is_ok());
    assert!(a.host.call(&ha, "fetch", &[]).is_err());
}

#[test]
fn test_inspect_does_not_register() {
    let fx = fixture(GatePolicy::strict());
    let wat = guest(NET_AND_CONSOLE, Some(&effects(&["console"])), GREET_AND_FETCH);
    let module = fx.host.compile_bytes("app", &wat::parse_str(&wat).unwrap()).unwrap();

    let report = fx.host.inspect("app", &module).unwrap();
    assert_eq!(report.count(BindingKind::Granted), 1);
    assert_eq!(report.denied_count(), 2);
    assert!(report.exports.contains(&"greet".to_string()));
    assert!(fx.host.modules().is_empty());
}

#[test]
fn test_unknown_import_does_not_link() {
    let mut fx = fixture(GatePolicy::permissive());
    let wat = guest(r#"(import "text" "frobnicate" (func (param i32 i32)))"#, None, "");

    let err = fx.host.load_wat("app", &wat).unwrap_err();
    assert!(matches!(
        err,
        HostError::Link {
            source: GateError::UnresolvedImport { .. },
            ..
        }
    ));
}
