//! Pointer swizzling and bounds checks.
//!
//! Converts between host addresses and sandbox addresses, and answers the
//! two range questions everything else is built on: is this address in the
//! sandbox, and are these two addresses in the same sandbox. Null maps to
//! null in both directions without asking the backend.

use rampart_backend::SandboxBackend;

use crate::convert::PointerMap;
use crate::error::SandboxError;
use crate::sandbox::Sandbox;

/// Translate a sandbox address using an address already known to be in the
/// same sandbox instance. No handle needed.
pub fn to_host_address_from_example<B: SandboxBackend>(addr: u64, example: usize) -> Option<usize> {
    if addr == 0 {
        return Some(0);
    }
    B::host_pointer_from_example(addr, example)
}

/// Translate a host address inside some sandbox of backend `B`. No handle needed.
pub fn to_sandbox_address_from_example<B: SandboxBackend>(host: usize) -> Option<u64> {
    if host == 0 {
        return Some(0);
    }
    B::sandbox_pointer_from_example(host)
}

impl<B: SandboxBackend> Sandbox<B> {
    /// Host address for a sandbox address. Does not check the result; the
    /// range check happens when the address is dereferenced.
    pub fn to_host_address(&self, addr: u64) -> usize {
        if addr == 0 {
            return 0;
        }
        self.backend().host_pointer(addr)
    }

    /// Sandbox address for a host address, which must lie in this sandbox.
    pub fn to_sandbox_address(&self, host: usize) -> Result<u64, SandboxError> {
        if host == 0 {
            return Ok(0);
        }
        if !self.is_in_sandbox_memory(host) {
            return Err(self.violation(format!(
                "host address {:#x} passed to the sandbox is outside sandbox memory",
                host
            )));
        }
        Ok(self.backend().sandbox_pointer(host))
    }

    pub fn is_in_sandbox_memory(&self, host: usize) -> bool {
        self.is_created() && self.backend().is_in_sandbox_memory(host)
    }

    pub fn is_same_sandbox(a: usize, b: usize) -> bool {
        B::is_same_sandbox(a, b)
    }

    /// Require `[base, base + len]` to lie inside this sandbox.
    ///
    /// The one-past-the-end address must be in the same sandbox as `base`,
    /// so a range that straddles the region boundary is rejected.
    pub fn check_range_in_sandbox(&self, base: usize, len: usize) -> Result<(), SandboxError> {
        let end = match base.checked_add(len) {
            Some(end) => end,
            None => {
                return Err(self.violation(format!(
                    "range {:#x}+{} wraps the address space",
                    base, len
                )));
            }
        };
        if !self.is_in_sandbox_memory(base) || !B::is_same_sandbox(base, end) {
            return Err(self.violation(format!(
                "range {:#x}..{:#x} is not inside the sandbox",
                base, end
            )));
        }
        Ok(())
    }

    /// A pointer map for the conversion engine. With an `example`, sandbox
    /// addresses resolve through the handle-free form.
    pub(crate) fn swizzler(&self, example: Option<usize>) -> Swizzler<'_, B> {
        Swizzler { sbx: self, example }
    }
}

pub(crate) struct Swizzler<'a, B: SandboxBackend> {
    sbx: &'a Sandbox<B>,
    example: Option<usize>,
}

impl<B: SandboxBackend> PointerMap for Swizzler<'_, B> {
    fn to_sandbox(&self, host: usize) -> Result<u64, SandboxError> {
        self.sbx.to_sandbox_address(host)
    }

    fn to_host(&self, addr: u64) -> Result<usize, SandboxError> {
        match self.example {
            Some(example) => to_host_address_from_example::<B>(addr, example).ok_or_else(|| {
                self.sbx
                    .violation(format!("sandbox address {:#x} has no host mapping", addr))
            }),
            None => Ok(self.sbx.to_host_address(addr)),
        }
    }
}
