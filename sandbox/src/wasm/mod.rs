//! Wasmtime isolation backend.
//!
//! Runs a validated wasm32 module as the sandbox. Linear memory is the
//! sandbox memory, the module's `__indirect_function_table` holds callback
//! trampolines, and `rampart_host.malloc`/`free` share the host's heap
//! allocator with [`Sandbox::malloc_in_sandbox`](crate::Sandbox::malloc_in_sandbox).

mod linker;
mod runtime;
mod state;
pub mod validation;

pub use crate::config::WasmConfig;
pub use runtime::WasmBackend;
pub use state::GuestState;
