//! The isolation-backend interface.
//!
//! A backend owns the sandbox memory region and runs sandboxed code. The
//! mediation layer never touches the isolation technology directly: it goes
//! through this trait for lifecycle, allocation, address translation, range
//! queries, the function indirection table, and calls into the sandbox.
//!
//! Addresses come in two forms. A *host address* (`usize`) is a location in
//! the host process. A *sandbox address* (`u64`) is whatever sandboxed code
//! stores in a pointer slot: an offset, a table index, or a raw address,
//! depending on the backend.

use crate::error::BackendError;
use crate::model::MachineModel;
use crate::value::{CallbackSignature, SandboxValue};

/// Re-entry point for sandbox-to-host calls.
///
/// Backends hold one of these for the duration of [`SandboxBackend::invoke`]
/// and route every indirect call through a host trampoline to it.
pub trait CallbackHost {
    /// Run the host callback registered under `key`.
    fn dispatch(&self, key: u64, args: &[SandboxValue]) -> Result<Option<SandboxValue>, BackendError>;
}

/// An isolation technology, as seen by the mediation layer.
///
/// All methods take `&self`; implementations use interior mutability so one
/// backend can be shared by a sandbox handle and the callbacks it runs.
pub trait SandboxBackend: Send + Sync + 'static {
    /// Primitive widths inside the sandbox. Fixed for the backend's lifetime.
    fn machine_model(&self) -> MachineModel;

    /// Bring the sandbox up. Called at most once between destroys.
    fn create(&self) -> Result<(), BackendError>;

    /// Tear the sandbox down and release its memory.
    fn destroy(&self) -> Result<(), BackendError>;

    /// Host address of the first byte of sandbox memory, or 0 when not created.
    fn memory_base(&self) -> usize;

    /// Size in bytes of the sandbox memory region.
    fn total_memory_size(&self) -> usize;

    /// Allocate `size` bytes in sandbox memory and return the sandbox address.
    fn malloc(&self, size: usize) -> Result<u64, BackendError>;

    /// Release a block returned by [`malloc`](Self::malloc).
    fn free(&self, addr: u64) -> Result<(), BackendError>;

    /// Translate a non-null sandbox address to a host address.
    fn host_pointer(&self, addr: u64) -> usize;

    /// Translate a non-null host address inside sandbox memory.
    fn sandbox_pointer(&self, host: usize) -> u64;

    /// Translate a sandbox address using `example`, a host address already
    /// known to lie in the same sandbox, instead of a handle.
    fn host_pointer_from_example(addr: u64, example: usize) -> Option<usize>;

    /// Translate a host address inside some sandbox without a handle.
    fn sandbox_pointer_from_example(host: usize) -> Option<u64>;

    /// True if both host addresses belong to the same sandbox region.
    fn is_same_sandbox(a: usize, b: usize) -> bool;

    /// True if `host` lies in this sandbox's memory.
    fn is_in_sandbox_memory(&self, host: usize) -> bool;

    /// Make the callback `key` callable from the sandbox and return the
    /// value sandboxed code uses to call it.
    fn function_to_sandbox(&self, key: u64, sig: &CallbackSignature) -> Result<u64, BackendError>;

    /// Resolve a trampoline value back to its callback key.
    fn function_to_host(&self, trampoline: u64) -> Option<u64>;

    /// Drop the table entry behind a trampoline so the slot can be reused.
    fn release_function(&self, trampoline: u64) -> Result<(), BackendError>;

    /// Number of indirection-table slots ever handed out, live or free.
    fn function_table_capacity(&self) -> usize;

    /// Call the exported sandbox function `name`.
    fn invoke(
        &self,
        name: &str,
        args: &[SandboxValue],
        host: &dyn CallbackHost,
    ) -> Result<Option<SandboxValue>, BackendError>;
}
