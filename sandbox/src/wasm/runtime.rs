//! Wasmtime backend: engine, module loading, and instance lifecycle.
//!
//! `WasmBackend` compiles and validates a module once. `create` instantiates
//! it in a fresh `Store`, grows linear memory by the configured heap pages,
//! and hands that range to the shared heap allocator. `destroy` drops the
//! store and with it the linear memory.
//!
//! Sandbox addresses are offsets into linear memory. Wasmtime does not
//! place memories at size-aligned addresses, so the handle-free conversions
//! go through the process-wide region registry.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use rampart_backend::{
    region, BackendError, CallbackHost, CallbackSignature, HeapAllocator, IndirectionTable, MachineModel,
    SandboxBackend, SandboxValue, TAIL_GUARD,
};
use tracing::{debug, info};
use wasmtime::{Config, Engine, Func, Instance, Linker, Memory, Module, Ref, Store, StoreLimitsBuilder, Table, Trap, Val};

use super::linker::{from_val, register_host_functions, to_val, trampoline, value_kind};
use super::state::{GuestState, HostGuard, SharedHeap};
use super::validation::{validate_module, MEMORY_EXPORT, TABLE_EXPORT};
use crate::config::WasmConfig;
use crate::error::SandboxError;

const PAGE_SIZE: usize = 65536;

/// Offsets below this are never allocated, so offset 0 stays the null pointer.
const HEAP_FLOOR: u64 = 16;

/// One live instance.
struct Runtime {
    store: Store<GuestState>,
    instance: Instance,
    memory: Memory,
    table: Option<Table>,
    exports: HashMap<String, Func>,
}

impl Runtime {
    fn export(&mut self, name: &str) -> Result<Func, BackendError> {
        if let Some(func) = self.exports.get(name) {
            return Ok(*func);
        }
        let func = self
            .instance
            .get_func(&mut self.store, name)
            .ok_or_else(|| BackendError::UnknownFunction(name.to_string()))?;
        self.exports.insert(name.to_string(), func);
        Ok(func)
    }
}

/// A sandbox backed by a Wasmtime instance of one validated module.
pub struct WasmBackend {
    engine: Engine,
    module: Module,
    config: WasmConfig,
    model: MachineModel,
    heap: SharedHeap,
    runtime: Mutex<Option<Runtime>>,
    table: Mutex<IndirectionTable>,
    base: AtomicUsize,
    size: AtomicUsize,
}

impl WasmBackend {
    /// Compile a module from wasm bytes (or WAT text).
    ///
    /// Checks the digest pin, if any, then validates the module's imports
    /// and exports before accepting it.
    pub fn new(wasm_bytes: &[u8], config: WasmConfig) -> Result<Self, SandboxError> {
        let digest = blake3::hash(wasm_bytes);
        if let Some(expected) = config.expected_digest {
            if digest.as_bytes() != &expected {
                return Err(SandboxError::Validation(format!(
                    "module digest {} does not match the pinned digest",
                    digest.to_hex()
                )));
            }
        }
        let engine = create_engine(&config)?;
        let module = Module::new(&engine, wasm_bytes)?;
        validate_module(&module)?;
        info!(digest = %digest.to_hex(), size = wasm_bytes.len(), "wasm module loaded");
        Ok(Self {
            engine,
            module,
            config,
            model: MachineModel::wasm32(),
            heap: Arc::new(Mutex::new(None)),
            runtime: Mutex::new(None),
            table: Mutex::new(IndirectionTable::new(1)),
            base: AtomicUsize::new(0),
            size: AtomicUsize::new(0),
        })
    }

    /// Load from a `.wasm` file path.
    pub fn from_file(path: &Path, config: WasmConfig) -> Result<Self, SandboxError> {
        let bytes = std::fs::read(path)
            .map_err(|e| SandboxError::Validation(format!("cannot read {}: {}", path.display(), e)))?;
        Self::new(&bytes, config)
    }

    pub fn config(&self) -> &WasmConfig {
        &self.config
    }

    /// Live blocks in the shared heap, for leak checks.
    pub fn live_allocations(&self) -> usize {
        match self.heap.lock() {
            Ok(heap) => heap.as_ref().map_or(0, HeapAllocator::live_blocks),
            Err(_) => 0,
        }
    }

    /// The runtime, unless guest code is running on it right now.
    fn try_lock_runtime(&self) -> Result<MutexGuard<'_, Option<Runtime>>, BackendError> {
        match self.runtime.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(BackendError::Busy("a sandboxed call is already running")),
            Err(TryLockError::Poisoned(_)) => Err(BackendError::Internal("wasm runtime lock poisoned".into())),
        }
    }

    fn lock_heap(&self) -> Result<MutexGuard<'_, Option<HeapAllocator>>, BackendError> {
        self.heap
            .lock()
            .map_err(|_| BackendError::Internal("wasm heap lock poisoned".into()))
    }

    fn lock_table(&self) -> Result<MutexGuard<'_, IndirectionTable>, BackendError> {
        self.table
            .lock()
            .map_err(|_| BackendError::Internal("wasm table lock poisoned".into()))
    }

    fn instantiate(&self) -> Result<Runtime, BackendError> {
        let max_bytes = self.config.max_memory_pages as usize * PAGE_SIZE;
        let limits = StoreLimitsBuilder::new().memory_size(max_bytes).build();
        let mut store = Store::new(&self.engine, GuestState::new(Arc::clone(&self.heap), limits));
        store.limiter(|state| &mut state.limits);
        store.set_fuel(self.config.fuel_limit).map_err(internal)?;

        let mut linker = Linker::new(&self.engine);
        register_host_functions(&mut linker).map_err(|e| BackendError::Internal(e.to_string()))?;
        let instance = handle_trap(linker.instantiate(&mut store, &self.module))?;

        let memory = instance
            .get_memory(&mut store, MEMORY_EXPORT)
            .ok_or_else(|| BackendError::Internal("no memory export".into()))?;
        let table = instance.get_table(&mut store, TABLE_EXPORT);

        Ok(Runtime {
            store,
            instance,
            memory,
            table,
            exports: HashMap::new(),
        })
    }

    /// Publish the current memory placement and keep the region registry in step.
    fn publish_memory(&self, rt: &Runtime) {
        let base = rt.memory.data_ptr(&rt.store) as usize;
        let size = rt.memory.data_size(&rt.store);
        let old_base = self.base.swap(base, Ordering::AcqRel);
        let old_size = self.size.swap(size, Ordering::AcqRel);
        if old_base != base || old_size != size {
            if old_base != 0 {
                region::unregister(old_base);
            }
            region::register(base, size);
        }
    }
}

impl SandboxBackend for WasmBackend {
    fn machine_model(&self) -> MachineModel {
        self.model
    }

    fn create(&self) -> Result<(), BackendError> {
        let mut guard = self.try_lock_runtime()?;
        if guard.is_some() {
            return Err(BackendError::AlreadyCreated);
        }
        let mut rt = self.instantiate()?;

        let current_pages = rt.memory.size(&rt.store);
        rt.memory
            .grow(&mut rt.store, u64::from(self.config.heap_pages))
            .map_err(|_| BackendError::OutOfMemory(self.config.heap_pages as usize * PAGE_SIZE))?;
        let alloc_base = (current_pages as usize * PAGE_SIZE) as u64;
        let end = rt.memory.data_size(&rt.store) as u64;
        let start = alloc_base.max(HEAP_FLOOR);
        let capacity = (end.saturating_sub(start) as usize).saturating_sub(TAIL_GUARD);
        *self.lock_heap()? = Some(HeapAllocator::new(start, capacity));

        let first = match rt.table {
            Some(table) => table.size(&rt.store).max(1),
            None => 1,
        };
        *self.lock_table()? = IndirectionTable::new(first);

        self.publish_memory(&rt);
        info!(
            base = self.base.load(Ordering::Acquire),
            size = self.size.load(Ordering::Acquire),
            heap_start = start,
            heap_capacity = capacity,
            "wasm instance created"
        );
        *guard = Some(rt);
        Ok(())
    }

    fn destroy(&self) -> Result<(), BackendError> {
        let mut guard = self.try_lock_runtime()?;
        let rt = guard.take().ok_or(BackendError::NotCreated)?;
        let base = self.base.swap(0, Ordering::AcqRel);
        self.size.store(0, Ordering::Release);
        region::unregister(base);
        *self.lock_heap()? = None;
        self.lock_table()?.clear();
        drop(rt);
        debug!(base, "wasm instance dropped");
        Ok(())
    }

    fn memory_base(&self) -> usize {
        self.base.load(Ordering::Acquire)
    }

    fn total_memory_size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    fn malloc(&self, size: usize) -> Result<u64, BackendError> {
        let mut heap = self.lock_heap()?;
        heap.as_mut().ok_or(BackendError::NotCreated)?.alloc(size)
    }

    fn free(&self, addr: u64) -> Result<(), BackendError> {
        let mut heap = self.lock_heap()?;
        heap.as_mut().ok_or(BackendError::NotCreated)?.free(addr)
    }

    fn host_pointer(&self, addr: u64) -> usize {
        self.memory_base().wrapping_add(addr as usize)
    }

    fn sandbox_pointer(&self, host: usize) -> u64 {
        host.wrapping_sub(self.memory_base()) as u64
    }

    fn host_pointer_from_example(addr: u64, example: usize) -> Option<usize> {
        let region = region::find(example)?;
        let offset = usize::try_from(addr).ok()?;
        (offset < region.len).then(|| region.start + offset)
    }

    fn sandbox_pointer_from_example(host: usize) -> Option<u64> {
        region::find(host).map(|r| (host - r.start) as u64)
    }

    fn is_same_sandbox(a: usize, b: usize) -> bool {
        region::same_region(a, b)
    }

    fn is_in_sandbox_memory(&self, host: usize) -> bool {
        let base = self.memory_base();
        base != 0 && host >= base && host - base < self.total_memory_size()
    }

    fn function_to_sandbox(&self, key: u64, sig: &CallbackSignature) -> Result<u64, BackendError> {
        let mut guard = self.try_lock_runtime()?;
        let rt = guard.as_mut().ok_or(BackendError::NotCreated)?;
        let table = rt
            .table
            .ok_or(BackendError::Unsupported("module exports no function table"))?;
        let func = trampoline(&mut rt.store, &self.engine, key, sig);

        let mut slots = self.lock_table()?;
        let (index, grew) = slots.insert(key, sig);
        let placed = if grew {
            table
                .grow(&mut rt.store, 1, Ref::Func(Some(func)))
                .and_then(|old| {
                    if old == index {
                        Ok(())
                    } else {
                        Err(anyhow::anyhow!("table grew at {} instead of {}", old, index))
                    }
                })
        } else {
            table.set(&mut rt.store, index, Ref::Func(Some(func)))
        };
        if let Err(e) = placed {
            let _ = slots.release(index);
            return Err(BackendError::Internal(format!("function table update: {}", e)));
        }
        Ok(index)
    }

    fn function_to_host(&self, trampoline: u64) -> Option<u64> {
        let table = self.lock_table().ok()?;
        table.lookup(trampoline).map(|(key, _)| key)
    }

    fn release_function(&self, trampoline: u64) -> Result<(), BackendError> {
        self.lock_table()?.release(trampoline)?;
        // From inside a running call the slot keeps its Func until reused;
        // the released key no longer dispatches.
        if let Ok(mut guard) = self.runtime.try_lock() {
            if let Some(rt) = guard.as_mut() {
                if let Some(table) = rt.table {
                    let _ = table.set(&mut rt.store, trampoline, Ref::Func(None));
                }
            }
        }
        Ok(())
    }

    fn function_table_capacity(&self) -> usize {
        self.lock_table().map_or(0, |t| t.capacity())
    }

    fn invoke(
        &self,
        name: &str,
        args: &[SandboxValue],
        host: &dyn CallbackHost,
    ) -> Result<Option<SandboxValue>, BackendError> {
        let mut guard = self.try_lock_runtime()?;
        let rt = guard.as_mut().ok_or(BackendError::NotCreated)?;
        let func = rt.export(name)?;

        let ty = func.ty(&rt.store);
        let params: Vec<_> = ty.params().map(|t| value_kind(&t)).collect();
        let results: Vec<_> = ty.results().map(|t| value_kind(&t)).collect();
        let arg_kinds: Vec<_> = args.iter().map(|a| Some(a.kind())).collect();
        if params != arg_kinds || results.len() > 1 || results.contains(&None) {
            return Err(BackendError::SignatureMismatch {
                name: name.to_string(),
                detail: format!("function takes {:?} -> {:?}, called with {:?}", params, results, args),
            });
        }

        let vals: Vec<Val> = args.iter().copied().map(to_val).collect();
        let mut out: Vec<Val> = results.iter().map(|_| Val::I32(0)).collect();
        rt.store.set_fuel(self.config.fuel_limit).map_err(internal)?;

        let called = {
            let mut installed = HostGuard::install(&mut rt.store, host);
            func.call(installed.store(), &vals, &mut out)
        };

        self.publish_memory(rt);
        handle_trap(called)?;
        Ok(out.first().and_then(from_val))
    }
}

impl Drop for WasmBackend {
    fn drop(&mut self) {
        if self.memory_base() != 0 {
            let _ = self.destroy();
        }
    }
}

/// Create a Wasmtime engine with deterministic configuration.
fn create_engine(config: &WasmConfig) -> Result<Engine, SandboxError> {
    let mut wasm_config = Config::new();

    // Fuel metering bounds every guest call
    wasm_config.consume_fuel(true);

    // Determinism enforcement
    wasm_config.wasm_threads(false);
    wasm_config.wasm_simd(false);
    wasm_config.wasm_relaxed_simd(false);
    wasm_config.wasm_multi_memory(false);
    wasm_config.cranelift_nan_canonicalization(true);

    // Memory limits
    let max_bytes = (config.max_memory_pages as u64) * PAGE_SIZE as u64;
    wasm_config.memory_guaranteed_dense_image_size(max_bytes.min(16 * 1024 * 1024));

    Ok(Engine::new(&wasm_config)?)
}

fn internal(e: anyhow::Error) -> BackendError {
    BackendError::Internal(e.to_string())
}

/// Convert a guest call result into a backend error.
///
/// Errors raised by callbacks come back unchanged; fuel exhaustion and
/// every other trap become [`BackendError::Trap`].
fn handle_trap<R>(result: Result<R, anyhow::Error>) -> Result<R, BackendError> {
    match result {
        Ok(val) => Ok(val),
        Err(e) => {
            if let Some(err) = e.downcast_ref::<BackendError>() {
                return Err(err.clone());
            }
            match e.downcast_ref::<Trap>() {
                Some(Trap::OutOfFuel) => Err(BackendError::Trap("out of fuel".into())),
                Some(trap) => Err(BackendError::Trap(trap.to_string())),
                None => Err(BackendError::Trap(format!("{:#}", e))),
            }
        }
    }
}
