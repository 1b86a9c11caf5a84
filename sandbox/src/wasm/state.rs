//! Per-instance mutable state held in the Wasmtime `Store`.
//!
//! `GuestState` carries what host imports and callback trampolines need
//! while guest code runs: the shared heap allocator, the memory limiter, and
//! for the duration of one `invoke`, the callback host to re-enter.

use std::sync::{Arc, Mutex};

use rampart_backend::{BackendError, CallbackHost, HeapAllocator};
use wasmtime::{Store, StoreLimits};

/// Heap shared between the backend (host-side `malloc`) and the guest's
/// `rampart_host.malloc` import.
pub(crate) type SharedHeap = Arc<Mutex<Option<HeapAllocator>>>;

/// A callback host borrowed for one `invoke`.
#[derive(Clone, Copy)]
pub(crate) struct HostRef(*const (dyn CallbackHost + 'static));

// SAFETY: a HostRef is only dereferenced by trampolines running inside the
// `invoke` that installed it, on that invoke's thread, while the borrow it
// was made from is live.
unsafe impl Send for HostRef {}

impl HostRef {
    fn new(host: &dyn CallbackHost) -> Self {
        let ptr: *const (dyn CallbackHost + '_) = host;
        // SAFETY: only the trait-object lifetime changes. The only caller is
        // `HostGuard::install`, whose drop clears the reference before the
        // borrow ends, on unwind too.
        Self(unsafe { std::mem::transmute::<*const (dyn CallbackHost + '_), *const (dyn CallbackHost + 'static)>(ptr) })
    }

    /// # Safety
    ///
    /// The `invoke` that installed this reference must still be running.
    pub(crate) unsafe fn get(&self) -> &dyn CallbackHost {
        &*self.0
    }
}

/// Keeps a callback host installed in a store for the guard's lifetime.
pub(crate) struct HostGuard<'a> {
    store: &'a mut Store<GuestState>,
}

impl<'a> HostGuard<'a> {
    pub(crate) fn install(store: &'a mut Store<GuestState>, host: &'a dyn CallbackHost) -> Self {
        store.data_mut().host = Some(HostRef::new(host));
        Self { store }
    }

    pub(crate) fn store(&mut self) -> &mut Store<GuestState> {
        self.store
    }
}

impl Drop for HostGuard<'_> {
    fn drop(&mut self) {
        self.store.data_mut().host = None;
    }
}

/// State stored in every `Store<GuestState>`.
pub struct GuestState {
    pub(crate) heap: SharedHeap,
    pub(crate) host: Option<HostRef>,
    pub(crate) limits: StoreLimits,
}

impl GuestState {
    pub(crate) fn new(heap: SharedHeap, limits: StoreLimits) -> Self {
        Self {
            heap,
            host: None,
            limits,
        }
    }

    /// Allocate from the shared heap. Returns 0 on failure, as C `malloc` does.
    pub(crate) fn guest_malloc(&self, size: usize) -> u64 {
        let Ok(mut heap) = self.heap.lock() else {
            return 0;
        };
        match heap.as_mut().map(|h| h.alloc(size)) {
            Some(Ok(addr)) => addr,
            _ => 0,
        }
    }

    pub(crate) fn guest_free(&self, addr: u64) -> Result<(), BackendError> {
        let mut heap = self
            .heap
            .lock()
            .map_err(|_| BackendError::Internal("wasm heap lock poisoned".into()))?;
        heap.as_mut().ok_or(BackendError::NotCreated)?.free(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rampart_backend::SandboxValue;
    use std::panic::{self, AssertUnwindSafe};
    use wasmtime::{Engine, StoreLimitsBuilder};

    fn state() -> GuestState {
        let heap = Arc::new(Mutex::new(Some(HeapAllocator::new(64, 256))));
        GuestState::new(heap, StoreLimitsBuilder::new().build())
    }

    #[test]
    fn test_guest_malloc_and_free() {
        let s = state();
        let a = s.guest_malloc(16);
        assert_eq!(a, 64);
        s.guest_free(a).unwrap();
        assert!(s.guest_free(a).is_err());
    }

    #[test]
    fn test_guest_malloc_exhausted_returns_null() {
        let s = state();
        assert_eq!(s.guest_malloc(4096), 0);
        *s.heap.lock().unwrap() = None;
        assert_eq!(s.guest_malloc(8), 0);
        assert_eq!(s.guest_free(64), Err(BackendError::NotCreated));
    }

    struct NoCallbacks;

    impl CallbackHost for NoCallbacks {
        fn dispatch(&self, key: u64, _args: &[SandboxValue]) -> Result<Option<SandboxValue>, BackendError> {
            Err(BackendError::UnknownFunction(format!("callback {}", key)))
        }
    }

    #[test]
    fn test_host_cleared_after_call() {
        let mut store = Store::new(&Engine::default(), state());
        let host = NoCallbacks;
        {
            let mut installed = HostGuard::install(&mut store, &host);
            assert!(installed.store().data().host.is_some());
        }
        assert!(store.data().host.is_none());
    }

    #[test]
    fn test_host_cleared_on_unwind() {
        let mut store = Store::new(&Engine::default(), state());
        let host = NoCallbacks;
        let unwound = panic::catch_unwind(AssertUnwindSafe(|| {
            let _installed = HostGuard::install(&mut store, &host);
            panic!("callback panicked");
        }));
        assert!(unwound.is_err());
        assert!(store.data().host.is_none());
    }
}
