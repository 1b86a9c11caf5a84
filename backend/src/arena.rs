//! In-process test backend.
//!
//! `ArenaBackend` carves a 1 MiB region out of host memory, aligned to its
//! own size, and treats it as sandbox memory. Sandbox pointers are offsets
//! from the region base, so the handle-free conversions can recover the
//! base from any interior address by masking.
//!
//! There is no real isolation. "Sandboxed" functions are Rust closures
//! registered on the builder; they see the region only through the
//! bounds-checked [`GuestCall`] context and reach host callbacks through the
//! indirection table, the way compiled guest code would.

use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::BackendError;
use crate::heap::{HeapAllocator, TAIL_GUARD};
use crate::memory;
use crate::model::MachineModel;
use crate::table::IndirectionTable;
use crate::traits::{CallbackHost, SandboxBackend};
use crate::value::{CallbackSignature, SandboxValue};

/// Size and alignment of every arena region.
pub const ARENA_SIZE: usize = 1 << 20;

const ARENA_MASK: usize = ARENA_SIZE - 1;

/// Offsets below this are never allocated, so offset 0 stays the null pointer.
const HEAP_START: u64 = 16;

/// A guest function body.
pub type GuestFn =
    dyn Fn(&mut GuestCall<'_>, &[SandboxValue]) -> Result<Option<SandboxValue>, BackendError>
        + Send
        + Sync;

/// Builder for [`ArenaBackend`].
pub struct ArenaBuilder {
    model: MachineModel,
    functions: HashMap<String, Arc<GuestFn>>,
}

impl ArenaBuilder {
    /// Use `model` for the sandbox's primitive widths. Pointers are always
    /// offsets, whatever width the model gives them.
    pub fn model(mut self, model: MachineModel) -> Self {
        self.model = model;
        self
    }

    /// Export a guest function under `name`.
    pub fn function<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&mut GuestCall<'_>, &[SandboxValue]) -> Result<Option<SandboxValue>, BackendError>
            + Send
            + Sync
            + 'static,
    {
        self.functions.insert(name.to_string(), Arc::new(f));
        self
    }

    pub fn build(self) -> Result<ArenaBackend, BackendError> {
        let mut model = self.model;
        model.pointer.distinct = true;
        model.validate()?;
        Ok(ArenaBackend {
            model,
            functions: self.functions,
            base: AtomicUsize::new(0),
            heap: Mutex::new(None),
            table: Mutex::new(IndirectionTable::new(1)),
        })
    }
}

/// Test backend over an aligned host allocation.
pub struct ArenaBackend {
    model: MachineModel,
    functions: HashMap<String, Arc<GuestFn>>,
    base: AtomicUsize,
    heap: Mutex<Option<HeapAllocator>>,
    table: Mutex<IndirectionTable>,
}

impl ArenaBackend {
    pub fn builder() -> ArenaBuilder {
        ArenaBuilder {
            model: MachineModel::wasm32(),
            functions: HashMap::new(),
        }
    }

    fn region_layout() -> Result<Layout, BackendError> {
        Layout::from_size_align(ARENA_SIZE, ARENA_SIZE)
            .map_err(|e| BackendError::Internal(format!("arena layout: {}", e)))
    }

    fn created_base(&self) -> Result<usize, BackendError> {
        match self.base.load(Ordering::Acquire) {
            0 => Err(BackendError::NotCreated),
            base => Ok(base),
        }
    }

    fn lock_heap(&self) -> Result<std::sync::MutexGuard<'_, Option<HeapAllocator>>, BackendError> {
        self.heap
            .lock()
            .map_err(|_| BackendError::Internal("arena heap lock poisoned".into()))
    }

    fn lock_table(&self) -> Result<std::sync::MutexGuard<'_, IndirectionTable>, BackendError> {
        self.table
            .lock()
            .map_err(|_| BackendError::Internal("arena table lock poisoned".into()))
    }

    /// Live heap blocks, for leak checks.
    pub fn live_allocations(&self) -> usize {
        match self.lock_heap() {
            Ok(heap) => heap.as_ref().map_or(0, HeapAllocator::live_blocks),
            Err(_) => 0,
        }
    }
}

impl SandboxBackend for ArenaBackend {
    fn machine_model(&self) -> MachineModel {
        self.model
    }

    fn create(&self) -> Result<(), BackendError> {
        let mut heap = self.lock_heap()?;
        if self.base.load(Ordering::Acquire) != 0 {
            return Err(BackendError::AlreadyCreated);
        }
        let layout = Self::region_layout()?;
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(BackendError::OutOfMemory(ARENA_SIZE));
        }
        *heap = Some(HeapAllocator::new(
            HEAP_START,
            ARENA_SIZE - HEAP_START as usize - TAIL_GUARD,
        ));
        self.lock_table()?.clear();
        self.base.store(ptr as usize, Ordering::Release);
        debug!(base = ptr as usize, size = ARENA_SIZE, "arena region allocated");
        Ok(())
    }

    fn destroy(&self) -> Result<(), BackendError> {
        let mut heap = self.lock_heap()?;
        let base = self.base.swap(0, Ordering::AcqRel);
        if base == 0 {
            return Err(BackendError::NotCreated);
        }
        *heap = None;
        self.lock_table()?.clear();
        let layout = Self::region_layout()?;
        // SAFETY: base came from alloc_zeroed with this layout and is freed once.
        unsafe { alloc::dealloc(base as *mut u8, layout) };
        Ok(())
    }

    fn memory_base(&self) -> usize {
        self.base.load(Ordering::Acquire)
    }

    fn total_memory_size(&self) -> usize {
        ARENA_SIZE
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
        Some((example & !ARENA_MASK).wrapping_add(usize::try_from(addr).ok()?))
    }

    fn sandbox_pointer_from_example(host: usize) -> Option<u64> {
        Some((host & ARENA_MASK) as u64)
    }

    fn is_same_sandbox(a: usize, b: usize) -> bool {
        a & !ARENA_MASK == b & !ARENA_MASK
    }

    fn is_in_sandbox_memory(&self, host: usize) -> bool {
        let base = self.memory_base();
        base != 0 && host >= base && host - base < ARENA_SIZE
    }

    fn function_to_sandbox(&self, key: u64, sig: &CallbackSignature) -> Result<u64, BackendError> {
        self.created_base()?;
        let (trampoline, _) = self.lock_table()?.insert(key, sig);
        Ok(trampoline)
    }

    fn function_to_host(&self, trampoline: u64) -> Option<u64> {
        let table = self.lock_table().ok()?;
        table.lookup(trampoline).map(|(key, _)| key)
    }

    fn release_function(&self, trampoline: u64) -> Result<(), BackendError> {
        self.lock_table()?.release(trampoline).map(|_| ())
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
        self.created_base()?;
        let func = self
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| BackendError::UnknownFunction(name.to_string()))?;
        let mut call = GuestCall { arena: self, host };
        func(&mut call, args)
    }
}

impl Drop for ArenaBackend {
    fn drop(&mut self) {
        if self.memory_base() != 0 {
            let _ = self.destroy();
        }
    }
}

/// The sandbox-side view of the arena during one guest call.
pub struct GuestCall<'a> {
    arena: &'a ArenaBackend,
    host: &'a dyn CallbackHost,
}

impl GuestCall<'_> {
    pub fn model(&self) -> MachineModel {
        self.arena.model
    }

    fn with_memory<R>(
        &mut self,
        f: impl FnOnce(&mut [u8]) -> Result<R, BackendError>,
    ) -> Result<R, BackendError> {
        let base = self.arena.created_base()?;
        // SAFETY: the region stays allocated while the arena is created and
        // this slice does not outlive the closure.
        let mem = unsafe { std::slice::from_raw_parts_mut(base as *mut u8, ARENA_SIZE) };
        f(mem)
    }

    pub fn read_bytes(&mut self, addr: u64, len: usize) -> Result<Vec<u8>, BackendError> {
        self.with_memory(|mem| memory::read_bytes(mem, addr, len))
    }

    pub fn write_bytes(&mut self, addr: u64, data: &[u8]) -> Result<(), BackendError> {
        self.with_memory(|mem| memory::write_bytes(mem, addr, data))
    }

    pub fn read_u32(&mut self, addr: u64) -> Result<u32, BackendError> {
        self.with_memory(|mem| memory::read_u32(mem, addr))
    }

    pub fn write_u32(&mut self, addr: u64, value: u32) -> Result<(), BackendError> {
        self.with_memory(|mem| memory::write_u32(mem, addr, value))
    }

    pub fn read_u64(&mut self, addr: u64) -> Result<u64, BackendError> {
        self.with_memory(|mem| memory::read_u64(mem, addr))
    }

    pub fn write_u64(&mut self, addr: u64, value: u64) -> Result<(), BackendError> {
        self.with_memory(|mem| memory::write_u64(mem, addr, value))
    }

    /// Read a pointer-sized slot using the model's pointer width.
    pub fn read_pointer(&mut self, addr: u64) -> Result<u64, BackendError> {
        match self.arena.model.pointer.bytes {
            4 => self.read_u32(addr).map(u64::from),
            _ => self.read_u64(addr),
        }
    }

    pub fn write_pointer(&mut self, addr: u64, value: u64) -> Result<(), BackendError> {
        match self.arena.model.pointer.bytes {
            4 => {
                let value = u32::try_from(value).map_err(|_| BackendError::InvalidAddress(value))?;
                self.write_u32(addr, value)
            }
            _ => self.write_u64(addr, value),
        }
    }

    pub fn malloc(&mut self, size: usize) -> Result<u64, BackendError> {
        self.arena.malloc(size)
    }

    pub fn free(&mut self, addr: u64) -> Result<(), BackendError> {
        self.arena.free(addr)
    }

    /// Call through a function pointer, as `call_indirect` would.
    pub fn call_indirect(
        &mut self,
        trampoline: u64,
        args: &[SandboxValue],
    ) -> Result<Option<SandboxValue>, BackendError> {
        let (key, sig) = {
            let table = self.arena.lock_table()?;
            let (key, sig) = table
                .lookup(trampoline)
                .ok_or_else(|| BackendError::UnknownFunction(format!("table slot {}", trampoline)))?;
            (key, sig.clone())
        };
        if !sig.accepts(args) {
            return Err(BackendError::SignatureMismatch {
                name: format!("table slot {}", trampoline),
                detail: format!("expected {:?}, got {:?}", sig.params, args),
            });
        }
        let result = self.host.dispatch(key, args)?;
        if result.map(|v| v.kind()) != sig.result {
            return Err(BackendError::SignatureMismatch {
                name: format!("table slot {}", trampoline),
                detail: format!("expected result {:?}, got {:?}", sig.result, result),
            });
        }
        Ok(result)
    }
}
