//! `rampart`: tainted-value mediation of a sandbox boundary.
//!
//! Every value that comes out of, or goes into, an untrusted sandbox is
//! wrapped so host code cannot use it by accident. This crate enforces:
//!
//! - **Tainting:** sandbox data is `Tainted<T>` until verified or explicitly unwrapped
//! - **ABI conversion:** values are converted between the host and sandbox
//!   machine models, and narrowing that loses information is an error
//! - **Pointer swizzling:** sandbox addresses are translated and bounds-checked
//!   before any dereference
//! - **Copy-then-verify:** verification predicates only ever see a host-owned snapshot
//! - **Callback mediation:** host functions reachable from the sandbox take and
//!   return tainted values only
//!
//! The entry point is [`Sandbox`], over any [`SandboxBackend`]. Two backends
//! ship with the workspace: `rampart_backend::ArenaBackend` for tests and
//! [`wasm::WasmBackend`] on Wasmtime.

pub mod bulk;
pub mod callback;
pub mod config;
pub(crate) mod convert;
pub mod error;
pub mod hint;
pub mod invoke;
pub mod ops;
pub(crate) mod raw;
pub mod sandbox;
pub mod swizzle;
pub mod tainted;
pub mod types;
pub mod verify;
pub mod volatile;
pub mod wasm;

pub use bulk::ByteSource;
pub use callback::{Callback, CallbackFn, CallbackReturn};
pub use config::{SandboxConfig, ViolationPolicy, WasmConfig};
pub use error::SandboxError;
pub use hint::{TaintedBooleanHint, TaintedIntHint};
pub use invoke::{IntoArg, InvokeArgs, Null};
pub use ops::{Arith, Bits, Float, Integer};
pub use sandbox::{Sandbox, SandboxState};
pub use swizzle::{to_host_address_from_example, to_sandbox_address_from_example};
pub use tainted::Tainted;
pub use types::{Boundary, FieldDesc, Layout, Ptr, SandboxFn, Scalar, StructDesc, TypeDesc};
pub use verify::CChar;
pub use volatile::TaintedVolatile;
pub use wasm::WasmBackend;

pub use rampart_backend::{
    ArenaBackend, BackendError, CallbackHost, CallbackSignature, MachineModel, SandboxBackend, SandboxValue,
    ValueKind,
};
