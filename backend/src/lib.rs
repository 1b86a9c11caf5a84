//! `rampart-backend`: the isolation-backend interface for the rampart
//! sandbox boundary.
//!
//! The mediation layer in `rampart` is written against the
//! [`SandboxBackend`] trait defined here. This crate provides:
//!
//! - `MachineModel`: primitive widths and pointer representation inside a sandbox
//! - `SandboxBackend` / `CallbackHost`: the backend contract and the re-entry hook
//! - `SandboxValue`: argument and return words
//! - `HeapAllocator`: first-fit allocator shared by backends
//! - `IndirectionTable`: function-pointer slots with reuse
//! - `region`: process-wide region registry for handle-free address lookups
//! - `ArenaBackend`: an in-process backend for tests

pub mod arena;
pub mod error;
pub mod heap;
pub mod memory;
pub mod model;
pub mod region;
pub mod table;
pub mod traits;
pub mod value;

pub use arena::{ArenaBackend, ArenaBuilder, GuestCall, ARENA_SIZE};
pub use error::BackendError;
pub use heap::{HeapAllocator, TAIL_GUARD};
pub use model::{CInt, IntRepr, MachineModel, PointerRepr};
pub use table::IndirectionTable;
pub use traits::{CallbackHost, SandboxBackend};
pub use value::{CallbackSignature, SandboxValue, ValueKind};
