//! Host callbacks called from sandboxed code through function pointers.

mod common;

use rampart::{ArenaBackend, BackendError, Ptr, SandboxBackend, SandboxError, SandboxValue, Tainted};

use common::*;

fn counting_sandbox() -> Sbx {
    created_with(with_counting_loop(ArenaBackend::builder()).build().unwrap())
}

// ── Test: a guest loop calls back into the host ──

#[test]
fn test_counting_loop() {
    let sbx = counting_sandbox();
    let cb = sbx.register_callback(|_: &Sbx, x: T<i32>| x + 1).unwrap();
    let ok = sbx.invoke::<i32, _>("run", (&cb, 1024i32)).unwrap();
    assert_eq!(ok.unsafe_unverified(), 1024);
}

#[test]
fn test_callback_result_is_counted_by_guest() {
    let sbx = counting_sandbox();
    // Right for even inputs only.
    let cb = sbx
        .register_callback(|_: &Sbx, x: T<i32>| -> T<i32> {
            Tainted::new(x.copy_and_verify(|v| if v % 2 == 0 { v + 1 } else { v }))
        })
        .unwrap();
    let ok = sbx.invoke::<i32, _>("run", (&cb, 10i32)).unwrap();
    assert_eq!(ok.unsafe_unverified(), 5);
}

// ── Test: callbacks receive tainted pointers they can follow ──

#[test]
fn test_callback_reads_sandbox_memory() {
    let backend = ArenaBackend::builder()
        .function("apply", |call, args| match args {
            [SandboxValue::I32(f), p] => call.call_indirect(*f as u32 as u64, &[*p]),
            _ => Err(BackendError::Internal("bad args".into())),
        })
        .build()
        .unwrap();
    let sbx = created_with(backend);
    let data = sbx.copy_to_sandbox(&[5u32, 6, 7]).unwrap();

    let cb = sbx
        .register_callback(|sbx: &Sbx, p: T<Ptr<u32>>| -> Result<T<u32>, SandboxError> {
            let sum = p.copy_and_verify_range(sbx, 3, |v| v.map_or(0, |v| v.iter().sum()))?;
            Ok(Tainted::new(sum))
        })
        .unwrap();
    let sum = sbx.invoke::<u32, _>("apply", (&cb, data)).unwrap();
    assert_eq!(sum.unsafe_unverified(), 18);
}

#[test]
fn test_callback_error_reaches_caller() {
    let sbx = counting_sandbox();
    let cb = sbx
        .register_callback(|_: &Sbx, _x: T<i32>| -> Result<T<i32>, SandboxError> { Err(SandboxError::usage("refused")) })
        .unwrap();
    let err = sbx.invoke::<i32, _>("run", (&cb, 3i32)).unwrap_err();
    assert!(matches!(err, SandboxError::Backend(_)), "got {:?}", err);
}

#[test]
fn test_callback_argument_wider_than_slot_rejected() {
    let backend = ArenaBackend::builder()
        .function("pass", |call, args| match args {
            [SandboxValue::I32(f), v] => call.call_indirect(*f as u32 as u64, &[*v]),
            _ => Err(BackendError::Internal("bad args".into())),
        })
        .build()
        .unwrap();
    let sbx = created_with(backend);
    let cb = sbx.register_callback(|_: &Sbx, b: T<u8>| -> T<u32> { Tainted::new(b.unsafe_unverified() as u32) }).unwrap();
    assert_eq!(sbx.invoke::<u32, _>("pass", (&cb, 200i32)).unwrap().unsafe_unverified(), 200);
    // 300 is rejected rather than cut to 44.
    let err = sbx.invoke::<u32, _>("pass", (&cb, 300i32)).unwrap_err();
    match err {
        SandboxError::Backend(BackendError::Internal(msg)) => assert!(msg.contains("conversion error"), "{}", msg),
        other => panic!("got {:?}", other),
    }
}

// ── Test: released callbacks stop dispatching ──

#[test]
fn test_unregistered_trampoline_rejected() {
    let sbx = counting_sandbox();
    let cb = sbx.register_callback(|_: &Sbx, x: T<i32>| x + 1).unwrap();
    let stale = cb.trampoline() as i32;
    cb.unregister().unwrap();
    assert_eq!(sbx.callback_count(), 0);
    let err = sbx.invoke::<i32, _>("run", (stale, 1i32)).unwrap_err();
    assert!(matches!(err, SandboxError::Backend(BackendError::UnknownFunction(_))), "got {:?}", err);
}

// ── Test: the function table stays bounded ──

#[test]
fn test_register_unregister_cycles_reuse_slots() {
    let sbx = counting_sandbox();
    for i in 0..200 {
        let cb = sbx.register_callback(|_: &Sbx, x: T<i32>| x + 1).unwrap();
        if i % 50 == 0 {
            assert_eq!(sbx.invoke::<i32, _>("run", (&cb, 4i32)).unwrap().unsafe_unverified(), 4);
        }
    }
    assert_eq!(sbx.callback_count(), 0);
    assert_eq!(sbx.backend().function_table_capacity(), 1);
}

#[test]
fn test_create_destroy_cycles_bound_table() {
    let sbx = counting_sandbox();
    sbx.destroy_sandbox().unwrap();
    for _ in 0..20 {
        sbx.create_sandbox().unwrap();
        let a = sbx.register_callback(|_: &Sbx, x: T<i32>| x + 1).unwrap();
        let b = sbx.register_callback(|_: &Sbx, x: T<i32>| x - 1).unwrap();
        assert_ne!(a.trampoline(), b.trampoline());
        assert_eq!(sbx.invoke::<i32, _>("run", (&a, 8i32)).unwrap().unsafe_unverified(), 8);
        // Destroying with live handles releases every registration.
        sbx.destroy_sandbox().unwrap();
        assert_eq!(sbx.callback_count(), 0);
        assert!(sbx.backend().function_table_capacity() <= 2);
    }
}

#[test]
fn test_register_requires_created() {
    let sbx = sandbox_with(ArenaBackend::builder().build().unwrap());
    let err = sbx.register_callback(|_: &Sbx| ()).err().unwrap();
    assert!(matches!(err, SandboxError::Usage(_)));
}
