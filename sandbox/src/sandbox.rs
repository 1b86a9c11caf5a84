//! The sandbox handle.
//!
//! `Sandbox<B>` owns one backend instance and everything the mediation layer
//! keeps per instance: the creation status, the struct registry, and the
//! registered callbacks. All other modules hang their operations off it.
//!
//! Creation status is a four-state atomic. `create_sandbox` moves
//! not-created → initializing → created, `destroy_sandbox` moves
//! created → destructing → not-created. A call that finds the handle in any
//! other state is rejected rather than waiting.

use std::any::TypeId;
use std::collections::HashMap;
use std::process;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rampart_backend::{BackendError, MachineModel, SandboxBackend, SandboxValue};
use tracing::{debug, error, info, warn};

use crate::config::{SandboxConfig, ViolationPolicy};
use crate::error::SandboxError;
use crate::tainted::Tainted;
use crate::types::{Boundary, Layout, Ptr, Side, TypeDesc, TypeRegistry};

const NOT_CREATED: u8 = 0;
const INITIALIZING: u8 = 1;
const CREATED: u8 = 2;
const DESTRUCTING: u8 = 3;

/// Lifecycle state of a sandbox handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    NotCreated,
    Initializing,
    Created,
    Destructing,
}

/// Sandbox-facing entry point of a registered callback.
pub(crate) type Interceptor<B> =
    dyn Fn(&Sandbox<B>, &[SandboxValue]) -> Result<Option<SandboxValue>, SandboxError> + Send + Sync;

pub(crate) struct Registration<B: SandboxBackend> {
    pub(crate) interceptor: Arc<Interceptor<B>>,
    pub(crate) trampoline: u64,
}

/// Handle to one sandbox instance.
pub struct Sandbox<B: SandboxBackend> {
    backend: B,
    config: SandboxConfig,
    model: MachineModel,
    state: AtomicU8,
    /// Bumped on every successful create; live views remember the value.
    generation: AtomicU64,
    types: TypeRegistry,
    pub(crate) callbacks: Mutex<HashMap<u64, Registration<B>>>,
    pub(crate) next_key: AtomicU64,
}

impl<B: SandboxBackend> Sandbox<B> {
    /// Wrap a backend. The sandbox is not created yet.
    pub fn new(backend: B, config: SandboxConfig) -> Result<Self, SandboxError> {
        let model = backend.machine_model();
        model.validate()?;
        Ok(Self {
            backend,
            config,
            model,
            state: AtomicU8::new(NOT_CREATED),
            generation: AtomicU64::new(0),
            types: TypeRegistry::new(),
            callbacks: Mutex::new(HashMap::new()),
            next_key: AtomicU64::new(1),
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn machine_model(&self) -> &MachineModel {
        &self.model
    }

    pub fn state(&self) -> SandboxState {
        match self.state.load(Ordering::Acquire) {
            INITIALIZING => SandboxState::Initializing,
            CREATED => SandboxState::Created,
            DESTRUCTING => SandboxState::Destructing,
            _ => SandboxState::NotCreated,
        }
    }

    pub fn is_created(&self) -> bool {
        self.state.load(Ordering::Acquire) == CREATED
    }

    pub(crate) fn ensure_created(&self) -> Result<(), SandboxError> {
        if self.is_created() {
            Ok(())
        } else {
            Err(SandboxError::usage("sandbox is not created"))
        }
    }

    /// Instance generation of the current (or last) created backend.
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Created, and still the instance that was live at `generation`.
    pub(crate) fn ensure_live(&self, generation: u64) -> Result<(), SandboxError> {
        self.ensure_created()?;
        if self.generation() != generation {
            return Err(self.violation(format!(
                "view from sandbox instance {} used on instance {}",
                generation,
                self.generation()
            )));
        }
        Ok(())
    }

    /// Bring the backend up. Only valid from the not-created state.
    pub fn create_sandbox(&self) -> Result<(), SandboxError> {
        if let Err(current) =
            self.state
                .compare_exchange(NOT_CREATED, INITIALIZING, Ordering::AcqRel, Ordering::Acquire)
        {
            warn!(state = current, "sandbox create rejected");
            return Err(SandboxError::usage("sandbox create called while not in the not-created state"));
        }
        match self.backend.create() {
            Ok(()) => {
                self.generation.fetch_add(1, Ordering::AcqRel);
                self.state.store(CREATED, Ordering::Release);
                info!(
                    base = self.backend.memory_base(),
                    size = self.backend.total_memory_size(),
                    "sandbox created"
                );
                Ok(())
            }
            Err(e) => {
                self.state.store(NOT_CREATED, Ordering::Release);
                Err(e.into())
            }
        }
    }

    /// Tear the backend down. Only valid from the created state.
    ///
    /// Every outstanding callback registration is dropped; handles to them
    /// report a usage error if unregistered afterwards.
    pub fn destroy_sandbox(&self) -> Result<(), SandboxError> {
        if let Err(current) =
            self.state
                .compare_exchange(CREATED, DESTRUCTING, Ordering::AcqRel, Ordering::Acquire)
        {
            warn!(state = current, "sandbox destroy rejected");
            return Err(SandboxError::usage("sandbox destroy called while not created"));
        }
        let dropped = match self.lock_callbacks() {
            Ok(mut callbacks) => {
                let n = callbacks.len();
                for (_, reg) in callbacks.drain() {
                    let _ = self.backend.release_function(reg.trampoline);
                }
                n
            }
            Err(_) => 0,
        };
        let result = self.backend.destroy();
        self.state.store(NOT_CREATED, Ordering::Release);
        info!(callbacks_dropped = dropped, "sandbox destroyed");
        result.map_err(SandboxError::from)
    }

    pub(crate) fn lock_callbacks(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<u64, Registration<B>>>, SandboxError> {
        self.callbacks
            .lock()
            .map_err(|_| SandboxError::Backend(BackendError::Internal("callback table lock poisoned".into())))
    }

    /// The single enforcement point for integrity violations.
    ///
    /// Under [`ViolationPolicy::Abort`] this does not return.
    pub(crate) fn violation(&self, msg: impl Into<String>) -> SandboxError {
        let msg = msg.into();
        error!(violation = %msg, "sandbox integrity violation");
        match self.config.violation_policy {
            ViolationPolicy::Abort => process::abort(),
            ViolationPolicy::ReturnError => SandboxError::Integrity(msg),
        }
    }

    /// Register a struct, and every struct it holds by value, so it can be
    /// used inside `Tainted` and `TaintedVolatile`.
    pub fn register_struct<T: Boundary>(&self) -> Result<(), SandboxError> {
        let desc = match T::type_desc() {
            TypeDesc::Struct(desc) => desc,
            other => {
                return Err(SandboxError::usage(format!(
                    "{} is not a struct",
                    other.name()
                )));
            }
        };
        if self.types.register(&desc, &self.model)? {
            debug!(name = desc.name, fields = desc.fields.len(), "struct registered");
        }
        Ok(())
    }

    pub fn is_registered<T: Boundary>(&self) -> bool {
        self.types.is_registered(TypeId::of::<T>())
    }

    pub(crate) fn layout_of<T: Boundary>(&self, side: Side) -> Result<Layout, SandboxError> {
        self.types.layout(&T::type_desc(), side, &self.model)
    }

    /// Size of `T` as sandboxed code lays it out.
    pub fn sandbox_size_of<T: Boundary>(&self) -> Result<usize, SandboxError> {
        Ok(self.layout_of::<T>(Side::Sandbox)?.size())
    }

    /// Allocate room for `count` values of `T` in sandbox memory.
    ///
    /// The block is checked to lie entirely inside this sandbox before it is
    /// handed out.
    pub fn malloc_in_sandbox<T: Boundary>(&self, count: usize) -> Result<Tainted<Ptr<T>, B>, SandboxError> {
        self.ensure_created()?;
        let size = self
            .sandbox_size_of::<T>()?
            .checked_mul(count)
            .ok_or_else(|| SandboxError::usage(format!("allocation of {} elements overflows", count)))?;
        let addr = self.backend.malloc(size).map_err(|e| {
            warn!(size, error = %e, "sandbox allocation failed");
            SandboxError::from(e)
        })?;
        let host = self.to_host_address(addr);
        let last = host.checked_add(size.max(1) - 1);
        match last {
            Some(last)
                if host != 0
                    && self.is_in_sandbox_memory(host)
                    && self.is_in_sandbox_memory(last)
                    && B::is_same_sandbox(host, last) => {}
            _ => {
                return Err(self.violation(format!(
                    "allocation of {} bytes at sandbox address {:#x} is outside sandbox memory",
                    size, addr
                )));
            }
        }
        Ok(Tainted::new(Ptr::from_addr(host)))
    }

    /// Release a block from [`malloc_in_sandbox`](Self::malloc_in_sandbox).
    /// Freeing null does nothing.
    pub fn free_in_sandbox<T: Boundary>(&self, ptr: Tainted<Ptr<T>, B>) -> Result<(), SandboxError> {
        self.ensure_created()?;
        let host = ptr.unsafe_unverified().addr();
        if host == 0 {
            return Ok(());
        }
        if !self.is_in_sandbox_memory(host) {
            return Err(SandboxError::usage(format!(
                "free of {:#x}, which is not in sandbox memory",
                host
            )));
        }
        let addr = self.backend.sandbox_pointer(host);
        self.backend.free(addr)?;
        Ok(())
    }
}

impl<B: SandboxBackend> Drop for Sandbox<B> {
    fn drop(&mut self) {
        if self.is_created() {
            let _ = self.destroy_sandbox();
        }
    }
}
