//! Shared test helpers for integration tests.
//!
//! Provides fixture structs, arena builders with guest functions, WAT
//! modules, and sandbox factory functions used across all integration test
//! files. Every factory uses `ViolationPolicy::ReturnError` so integrity
//! violations show up as errors instead of aborting the test binary.

#![allow(dead_code)]

use rampart::{
    sandbox_struct, ArenaBackend, BackendError, MachineModel, Ptr, Sandbox, SandboxConfig, SandboxFn, SandboxValue,
    Tainted, ViolationPolicy, WasmBackend, WasmConfig,
};
use rampart_backend::ArenaBuilder;

pub type Sbx = Sandbox<ArenaBackend>;
pub type T<V> = Tainted<V, ArenaBackend>;
pub type WasmSbx = Sandbox<WasmBackend>;
pub type W<V> = Tainted<V, WasmBackend>;

// ── Fixture Structs ──

/// Every field kind at its natural wasm32 alignment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mixed {
    pub a: u64,
    pub p: Ptr<u8>,
    pub b: u32,
    pub bytes: [u8; 8],
    pub f: SandboxFn,
}

sandbox_struct!(Mixed { a: u64, p: Ptr<u8>, b: u32, bytes: [u8; 8], f: SandboxFn });

/// Singly-linked list node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    pub value: i32,
    pub next: Ptr<Node>,
}

sandbox_struct!(Node { value: i32, next: Ptr<Node> });

/// Two nodes held by value, for nested conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pair {
    pub tag: u16,
    pub left: Node,
    pub right: Node,
}

sandbox_struct!(Pair { tag: u16, left: Node, right: Node });

/// A header whose magic number the host must never overwrite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub magic: u32,
    pub len: u16,
    pub payload: Ptr<u8>,
}

sandbox_struct!(Header { #[frozen] magic: u32, len: u16, payload: Ptr<u8> });

// ── Sandbox Factories ──

/// Test configuration: violations are returned, not fatal.
pub fn test_config() -> SandboxConfig {
    SandboxConfig {
        violation_policy: ViolationPolicy::ReturnError,
        ..SandboxConfig::default()
    }
}

/// Wrap `backend` in a handle without creating it.
pub fn sandbox_with(backend: ArenaBackend) -> Sbx {
    Sandbox::new(backend, test_config()).unwrap()
}

/// Wrap and create.
pub fn created_with(backend: ArenaBackend) -> Sbx {
    let sbx = sandbox_with(backend);
    sbx.create_sandbox().unwrap();
    sbx
}

/// A created arena sandbox with no guest functions.
pub fn created() -> Sbx {
    created_with(ArenaBackend::builder().build().unwrap())
}

/// A created arena sandbox using `model` for its primitive widths.
pub fn created_with_model(model: MachineModel) -> Sbx {
    created_with(ArenaBackend::builder().model(model).build().unwrap())
}

// ── Arena Guest Functions ──

/// `run(f, n)`: calls the callback `f` with 0..n and counts results equal
/// to input + 1, as a compiled loop calling through a function pointer would.
pub fn with_counting_loop(builder: ArenaBuilder) -> ArenaBuilder {
    builder.function("run", |call, args| {
        let (f, n) = match args {
            [SandboxValue::I32(f), SandboxValue::I32(n)] => (*f as u32 as u64, *n),
            _ => {
                return Err(BackendError::SignatureMismatch {
                    name: "run".into(),
                    detail: format!("{:?}", args),
                })
            }
        };
        let mut ok = 0;
        for i in 0..n {
            if call.call_indirect(f, &[SandboxValue::I32(i)])? == Some(SandboxValue::I32(i + 1)) {
                ok += 1;
            }
        }
        Ok(Some(SandboxValue::I32(ok)))
    })
}

/// `sum(p, n)`: sums `n` little 32-bit integers starting at sandbox address `p`.
pub fn with_sum(builder: ArenaBuilder) -> ArenaBuilder {
    builder.function("sum", |call, args| {
        let (p, n) = match args {
            [SandboxValue::I32(p), SandboxValue::I32(n)] => (*p as u32 as u64, *n as u64),
            _ => return Err(BackendError::SignatureMismatch { name: "sum".into(), detail: format!("{:?}", args) }),
        };
        let mut total = 0i32;
        for i in 0..n {
            total = total.wrapping_add(call.read_u32(p + 4 * i)? as i32);
        }
        Ok(Some(SandboxValue::I32(total)))
    })
}

// ── Wasm Modules ──

/// Calls a table function `f` with 0..n, counting results equal to input + 1.
pub const WAT_COUNTING_LOOP: &str = r#"
    (module
        (type $cb (func (param i32) (result i32)))
        (memory (export "memory") 1)
        (table (export "__indirect_function_table") 1 funcref)
        (func (export "run") (param $f i32) (param $n i32) (result i32)
            (local $i i32)
            (local $ok i32)
            (block $done
                (loop $next
                    (br_if $done (i32.ge_s (local.get $i) (local.get $n)))
                    (if (i32.eq
                            (call_indirect (type $cb) (local.get $i) (local.get $f))
                            (i32.add (local.get $i) (i32.const 1)))
                        (then (local.set $ok (i32.add (local.get $ok) (i32.const 1)))))
                    (local.set $i (i32.add (local.get $i) (i32.const 1)))
                    (br $next)))
            (local.get $ok))
        (func (export "spin")
            (loop $l (br $l)))
    )
"#;

/// Strings and guest-side allocation through the host imports.
pub const WAT_STRINGS: &str = r#"
    (module
        (import "rampart_host" "malloc" (func $malloc (param i32) (result i32)))
        (import "rampart_host" "free" (func $free (param i32)))
        (memory (export "memory") 1)
        (func (export "strlen") (param $p i32) (result i32)
            (local $n i32)
            (block $done
                (loop $next
                    (br_if $done (i32.eqz (i32.load8_u (i32.add (local.get $p) (local.get $n)))))
                    (local.set $n (i32.add (local.get $n) (i32.const 1)))
                    (br $next)))
            (local.get $n))
        ;; Returns a fresh NUL-terminated run of `n` copies of `c`.
        (func (export "repeat") (param $c i32) (param $n i32) (result i32)
            (local $p i32)
            (local.set $p (call $malloc (i32.add (local.get $n) (i32.const 1))))
            (memory.fill (local.get $p) (local.get $c) (local.get $n))
            (i32.store8 (i32.add (local.get $p) (local.get $n)) (i32.const 0))
            (local.get $p))
        (func (export "release") (param $p i32)
            (call $free (local.get $p)))
    )
"#;

/// A wasm sandbox over `wat`, created.
pub fn created_wasm(wat: &str) -> WasmSbx {
    created_wasm_with(wat, WasmConfig::default())
}

pub fn created_wasm_with(wat: &str, config: WasmConfig) -> WasmSbx {
    let backend = WasmBackend::new(wat.as_bytes(), config).unwrap();
    let sbx = Sandbox::new(backend, test_config()).unwrap();
    sbx.create_sandbox().unwrap();
    sbx
}

// ── Raw Memory Helpers ──

/// Bytes of sandbox memory at a tainted pointer, read without conversion.
pub fn sandbox_bytes<P>(sbx: &Sbx, p: T<Ptr<P>>, len: usize) -> Vec<u8> {
    p.cast::<u8>()
        .copy_and_verify_range(sbx, len, |v| v.unwrap_or_default())
        .unwrap()
}
