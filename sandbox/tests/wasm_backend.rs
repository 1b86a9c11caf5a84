//! End-to-end tests on the Wasmtime backend with real modules.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rampart::{BackendError, Null, Ptr, SandboxBackend, SandboxError, WasmBackend, WasmConfig};

use common::*;

// ── Test: a guest loop calls a host callback through its table ──

#[test]
fn test_counting_loop_through_table() {
    let sbx = created_wasm(WAT_COUNTING_LOOP);
    let cb = sbx.register_callback(|_: &WasmSbx, x: W<i32>| x + 1).unwrap();
    let ok = sbx.invoke::<i32, _>("run", (&cb, 1024i32)).unwrap();
    assert_eq!(ok.unsafe_unverified(), 1024);
}

#[test]
fn test_released_callback_no_longer_callable() {
    let sbx = created_wasm(WAT_COUNTING_LOOP);
    let cb = sbx.register_callback(|_: &WasmSbx, x: W<i32>| x + 1).unwrap();
    let stale = cb.trampoline() as i32;
    cb.unregister().unwrap();
    let err = sbx.invoke::<i32, _>("run", (stale, 1i32)).unwrap_err();
    assert!(matches!(err, SandboxError::Backend(BackendError::Trap(_))), "got {:?}", err);
}

// ── Test: strings in and out of linear memory ──

#[test]
fn test_strlen_of_host_string() {
    let sbx = created_wasm(WAT_STRINGS);
    let s = sbx.copy_to_sandbox(b"hello, wasm\0").unwrap();
    let len = sbx.invoke::<i32, _>("strlen", (s,)).unwrap();
    assert_eq!(len.unsafe_unverified(), 11);
    // Address 0 holds a zero byte, so a null string is empty.
    assert_eq!(sbx.invoke::<i32, _>("strlen", (Null,)).unwrap().unsafe_unverified(), 0);
}

#[test]
fn test_guest_allocated_string() {
    let sbx = created_wasm(WAT_STRINGS);
    let p = sbx.invoke::<Ptr<u8>, _>("repeat", (b'z' as i32, 6i32)).unwrap();
    assert!(sbx.is_in_sandbox_memory(p.unsafe_unverified().addr()));
    assert_eq!(sbx.backend().live_allocations(), 1);

    let text = p
        .copy_and_verify_string(&sbx, 32, |s| s.and_then(|b| String::from_utf8(b).ok()))
        .unwrap();
    assert_eq!(text.as_deref(), Some("zzzzzz"));

    sbx.invoke_void("release", (p,)).unwrap();
    assert_eq!(sbx.backend().live_allocations(), 0);
}

#[test]
fn test_host_and_guest_share_the_heap() {
    let sbx = created_wasm(WAT_STRINGS);
    let host = sbx.malloc_in_sandbox::<u8>(16).unwrap();
    let guest = sbx.invoke::<Ptr<u8>, _>("repeat", (b'a' as i32, 3i32)).unwrap();
    assert_ne!(host, guest);
    assert_eq!(sbx.backend().live_allocations(), 2);
    // The guest may free what the host allocated.
    sbx.invoke_void("release", (host,)).unwrap();
    sbx.free_in_sandbox(guest).unwrap();
    assert_eq!(sbx.backend().live_allocations(), 0);
}

// ── Test: one call at a time per instance ──

#[test]
fn test_reentrant_invoke_is_busy() {
    let sbx = created_wasm(WAT_COUNTING_LOOP);
    let saw_busy = Arc::new(AtomicBool::new(false));
    let seen = Arc::clone(&saw_busy);
    let cb = sbx
        .register_callback(move |sbx: &WasmSbx, x: W<i32>| {
            let inner = sbx.invoke::<i32, _>("run", (0i32, 0i32));
            if matches!(inner, Err(SandboxError::Backend(BackendError::Busy(_)))) {
                seen.store(true, Ordering::SeqCst);
            }
            x + 1
        })
        .unwrap();
    let ok = sbx.invoke::<i32, _>("run", (&cb, 2i32)).unwrap();
    assert_eq!(ok.unsafe_unverified(), 2);
    assert!(saw_busy.load(Ordering::SeqCst));
    // The instance is usable again once the outer call returns.
    assert_eq!(sbx.invoke::<i32, _>("run", (&cb, 3i32)).unwrap().unsafe_unverified(), 3);
}

#[test]
fn test_register_inside_callback_is_busy() {
    let sbx = created_wasm(WAT_COUNTING_LOOP);
    let cb = sbx
        .register_callback(|sbx: &WasmSbx, x: W<i32>| -> Result<W<i32>, SandboxError> {
            let _nested = sbx.register_callback(|_: &WasmSbx| ())?;
            Ok(x + 1)
        })
        .unwrap();
    let err = sbx.invoke::<i32, _>("run", (&cb, 1i32)).unwrap_err();
    assert!(matches!(err, SandboxError::Backend(BackendError::Busy(_))), "got {:?}", err);
}

// ── Test: fuel bounds every call ──

#[test]
fn test_fuel_exhaustion_traps() {
    let config = WasmConfig {
        fuel_limit: 50_000,
        ..WasmConfig::default()
    };
    let sbx = created_wasm_with(WAT_COUNTING_LOOP, config);
    let err = sbx.invoke_void("spin", ()).unwrap_err();
    assert!(matches!(err, SandboxError::Backend(BackendError::Trap(_))), "got {:?}", err);

    // Fuel is granted per call.
    let cb = sbx.register_callback(|_: &WasmSbx, x: W<i32>| x + 1).unwrap();
    assert_eq!(sbx.invoke::<i32, _>("run", (&cb, 10i32)).unwrap().unsafe_unverified(), 10);
}

// ── Test: module admission ──

#[test]
fn test_wasi_module_rejected() {
    let wat = r#"
        (module
            (import "wasi_snapshot_preview1" "fd_write"
                (func (param i32 i32 i32 i32) (result i32)))
            (memory (export "memory") 1))
    "#;
    let err = WasmBackend::new(wat.as_bytes(), WasmConfig::default()).err().unwrap();
    assert!(matches!(err, SandboxError::Validation(_)), "got {:?}", err);
}

#[test]
fn test_digest_pin() {
    let pinned = WasmConfig {
        expected_digest: Some(*blake3::hash(WAT_STRINGS.as_bytes()).as_bytes()),
        ..WasmConfig::default()
    };
    let sbx = created_wasm_with(WAT_STRINGS, pinned);
    assert!(sbx.is_created());

    let wrong = WasmConfig {
        expected_digest: Some([7; 32]),
        ..WasmConfig::default()
    };
    let err = WasmBackend::new(WAT_STRINGS.as_bytes(), wrong).err().unwrap();
    assert!(matches!(err, SandboxError::Validation(_)));
}

#[test]
fn test_unknown_export() {
    let sbx = created_wasm(WAT_STRINGS);
    let err = sbx.invoke::<i32, _>("missing", ()).unwrap_err();
    assert!(matches!(err, SandboxError::Backend(BackendError::UnknownFunction(_))), "got {:?}", err);
    let err = sbx.invoke::<i32, _>("strlen", (1i64,)).unwrap_err();
    assert!(matches!(err, SandboxError::Backend(BackendError::SignatureMismatch { .. })));
}

// ── Test: repeated instances stay bounded ──

#[test]
fn test_create_destroy_cycles() {
    let sbx = created_wasm(WAT_COUNTING_LOOP);
    for _ in 0..10 {
        let a = sbx.register_callback(|_: &WasmSbx, x: W<i32>| x + 1).unwrap();
        assert_eq!(sbx.invoke::<i32, _>("run", (&a, 5i32)).unwrap().unsafe_unverified(), 5);
        drop(a);
        let b = sbx.register_callback(|_: &WasmSbx, x: W<i32>| x + 1).unwrap();
        assert_eq!(sbx.invoke::<i32, _>("run", (&b, 5i32)).unwrap().unsafe_unverified(), 5);
        assert_eq!(sbx.backend().function_table_capacity(), 1);

        sbx.destroy_sandbox().unwrap();
        assert_eq!(sbx.backend().memory_base(), 0);
        sbx.create_sandbox().unwrap();
    }
    assert!(matches!(sbx.create_sandbox(), Err(SandboxError::Usage(_))));
}
