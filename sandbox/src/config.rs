//! Sandbox configuration.

/// What to do when an integrity check fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViolationPolicy {
    /// Log and abort the process. Continuing would mean acting on state the
    /// sandbox may control.
    #[default]
    Abort,
    /// Return [`SandboxError::Integrity`](crate::SandboxError::Integrity).
    /// Intended for tests.
    ReturnError,
}

/// Configuration for a sandbox handle.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Response to failed bounds checks and escaping pointers.
    pub violation_policy: ViolationPolicy,

    /// Upper bound on any string copied out by `copy_and_verify_string`,
    /// whatever bound the caller passes.
    /// Default: 64 KiB.
    pub max_string_len: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            violation_policy: ViolationPolicy::Abort,
            max_string_len: 64 * 1024,
        }
    }
}

/// Configuration for the Wasmtime backend.
///
/// Controls memory limits, the host heap reservation, and instruction fuel.
#[derive(Debug, Clone)]
pub struct WasmConfig {
    /// Maximum linear memory pages (1 page = 64 KiB).
    /// Default: 256 pages = 16 MiB.
    pub max_memory_pages: u32,

    /// Pages appended to linear memory at instantiation for the host heap.
    /// Default: 16 pages = 1 MiB.
    pub heap_pages: u32,

    /// Wasmtime fuel granted to each top-level invoke.
    pub fuel_limit: u64,

    /// If set, the module bytes must hash (blake3) to this digest.
    pub expected_digest: Option<[u8; 32]>,
}

impl Default for WasmConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: 256, // 16 MiB
            heap_pages: 16,
            fuel_limit: 100_000_000,
            expected_digest: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SandboxConfig::default();
        assert_eq!(config.violation_policy, ViolationPolicy::Abort);
        assert_eq!(config.max_string_len, 65536);
    }

    #[test]
    fn test_default_wasm_config() {
        let config = WasmConfig::default();
        assert_eq!(config.max_memory_pages, 256);
        assert_eq!(config.heap_pages, 16);
        assert_eq!(config.fuel_limit, 100_000_000);
        assert!(config.expected_digest.is_none());
    }
}
