//! Backend error types.
//!
//! `BackendError` is what an isolation backend reports to the mediation
//! layer. The mediation layer decides which of these are integrity
//! violations and which are ordinary usage errors.

/// Error reported by a [`SandboxBackend`](crate::SandboxBackend).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The sandbox heap cannot satisfy an allocation.
    #[error("sandbox heap exhausted (requested {0} bytes)")]
    OutOfMemory(usize),

    /// An address does not refer to valid sandbox memory or to a live
    /// allocation.
    #[error("invalid sandbox address: {0:#x}")]
    InvalidAddress(u64),

    /// The operation needs a created sandbox instance.
    #[error("sandbox instance has not been created")]
    NotCreated,

    /// `create` was called on a live instance.
    #[error("sandbox instance already created")]
    AlreadyCreated,

    /// No sandboxed function with this name exists.
    #[error("unknown sandboxed function: {0}")]
    UnknownFunction(String),

    /// Arguments or results do not match the sandboxed function's signature.
    #[error("signature mismatch calling {name}: {detail}")]
    SignatureMismatch { name: String, detail: String },

    /// A single-threaded backend resource is already in use, e.g. a
    /// re-entrant call from inside a callback.
    #[error("sandbox busy: {0}")]
    Busy(&'static str),

    /// The backend does not support this operation.
    #[error("unsupported by backend: {0}")]
    Unsupported(&'static str),

    /// Sandboxed code trapped or faulted.
    #[error("sandboxed code trapped: {0}")]
    Trap(String),

    /// Internal backend failure.
    #[error("internal backend error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = BackendError::InvalidAddress(0x40);
        assert_eq!(err.to_string(), "invalid sandbox address: 0x40");

        let err = BackendError::SignatureMismatch {
            name: "add".into(),
            detail: "expected 2 params, got 1".into(),
        };
        assert!(err.to_string().contains("add"));
        assert!(err.to_string().contains("expected 2 params"));
    }
}
