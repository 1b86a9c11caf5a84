//! Sandbox error types.

use rampart_backend::BackendError;

/// Top-level error type for the mediation layer.
///
/// A predicate rejecting data during verification is not an error: it is
/// the verification result the caller chose.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Failed bounds check, out-of-range allocation, or pointer arithmetic
    /// crossing the sandbox boundary. Only returned under
    /// [`ViolationPolicy::ReturnError`](crate::ViolationPolicy::ReturnError).
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// A value does not fit the target representation.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// Malformed registration, stale handle, or out-of-order lifecycle call.
    #[error("usage error: {0}")]
    Usage(String),

    /// An aggregate was used before `register_struct`.
    #[error("struct type not registered: {0}")]
    UnregisteredType(&'static str),

    /// String verification found no terminator within the bound.
    #[error("no terminator within {max} bytes")]
    Unterminated { max: usize },

    /// Error reported by the isolation backend.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Wasmtime engine, compilation, or instantiation error.
    #[error("wasmtime error: {0}")]
    Wasmtime(#[from] anyhow::Error),

    /// Module validation failed (missing exports, bad imports, digest).
    #[error("validation error: {0}")]
    Validation(String),
}

impl SandboxError {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    pub(crate) fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion(msg.into())
    }

    /// Collapse into a backend error for reporting across a trampoline.
    pub(crate) fn into_backend(self) -> BackendError {
        match self {
            Self::Backend(e) => e,
            other => BackendError::Internal(other.to_string()),
        }
    }
}
