//! Bulk memory operations on sandbox memory.
//!
//! `memcpy`, `memset` and `memcmp` range-check every operand before touching
//! a byte: a tainted pointer operand must have all `n` bytes inside the
//! sandbox, and a host slice operand must be at least `n` bytes long. No
//! count may exceed the sandbox's total memory size.

use std::mem;

use rampart_backend::SandboxBackend;

use crate::convert::{convert, Direction};
use crate::error::SandboxError;
use crate::hint::TaintedIntHint;
use crate::raw;
use crate::sandbox::Sandbox;
use crate::tainted::Tainted;
use crate::types::{Boundary, Ptr, Side};

/// A byte range that bulk operations may read from.
pub trait ByteSource<B: SandboxBackend> {
    /// Host address of `n` readable bytes, after checking they exist.
    fn source_addr(&self, sbx: &Sandbox<B>, n: usize) -> Result<usize, SandboxError>;
}

impl<T, B: SandboxBackend> ByteSource<B> for Tainted<Ptr<T>, B> {
    fn source_addr(&self, sbx: &Sandbox<B>, n: usize) -> Result<usize, SandboxError> {
        let addr = self.as_raw().addr();
        sbx.check_range_in_sandbox(addr, n)?;
        Ok(addr)
    }
}

impl<B: SandboxBackend> ByteSource<B> for &[u8] {
    fn source_addr(&self, _sbx: &Sandbox<B>, n: usize) -> Result<usize, SandboxError> {
        if n > self.len() {
            return Err(SandboxError::usage(format!(
                "host buffer of {} bytes used for a {} byte operation",
                self.len(),
                n
            )));
        }
        Ok(self.as_ptr() as usize)
    }
}

impl<B: SandboxBackend> Sandbox<B> {
    fn check_count(&self, n: usize) -> Result<(), SandboxError> {
        if n > self.backend().total_memory_size() {
            return Err(self.violation(format!(
                "bulk operation of {} bytes exceeds sandbox memory",
                n
            )));
        }
        Ok(())
    }

    /// Copy `n` bytes from `src` into sandbox memory at `dest`. Returns `dest`.
    pub fn memcpy<T, S: ByteSource<B>>(
        &self,
        dest: Tainted<Ptr<T>, B>,
        src: S,
        n: usize,
    ) -> Result<Tainted<Ptr<T>, B>, SandboxError> {
        self.ensure_created()?;
        self.check_count(n)?;
        let to = dest.as_raw().addr();
        self.check_range_in_sandbox(to, n)?;
        let from = src.source_addr(self, n)?;
        // SAFETY: both ranges checked above.
        unsafe { raw::copy(from as *const u8, to as *mut u8, n) };
        Ok(dest)
    }

    /// Set `n` bytes of sandbox memory at `dest` to `value`. Returns `dest`.
    pub fn memset<T>(&self, dest: Tainted<Ptr<T>, B>, value: u8, n: usize) -> Result<Tainted<Ptr<T>, B>, SandboxError> {
        self.ensure_created()?;
        self.check_count(n)?;
        let to = dest.as_raw().addr();
        self.check_range_in_sandbox(to, n)?;
        // SAFETY: range checked above.
        unsafe { raw::fill(to as *mut u8, value, n) };
        Ok(dest)
    }

    /// Compare `n` bytes. Sandbox operands are live memory, so the result
    /// is a hint.
    pub fn memcmp<S1: ByteSource<B>, S2: ByteSource<B>>(&self, a: S1, b: S2, n: usize) -> Result<TaintedIntHint, SandboxError> {
        self.ensure_created()?;
        self.check_count(n)?;
        let pa = a.source_addr(self, n)?;
        let pb = b.source_addr(self, n)?;
        for i in 0..n {
            let (mut x, mut y) = ([0u8], [0u8]);
            // SAFETY: both ranges checked above.
            unsafe {
                raw::read((pa + i) as *const u8, &mut x);
                raw::read((pb + i) as *const u8, &mut y);
            }
            if x != y {
                return Ok(TaintedIntHint::new(x[0] as i32 - y[0] as i32));
            }
        }
        Ok(TaintedIntHint::new(0))
    }

    /// Allocate room for `data` in the sandbox and copy it in, converting
    /// each element to the sandbox layout.
    pub fn copy_to_sandbox<T: Boundary>(&self, data: &[T]) -> Result<Tainted<Ptr<T>, B>, SandboxError> {
        let dest = self.malloc_in_sandbox::<T>(data.len())?;
        let host = self.layout_of::<T>(Side::Host)?;
        let sandbox = self.layout_of::<T>(Side::Sandbox)?;
        let base = dest.as_raw().addr();
        if host.is_plain() && host.same_repr(&sandbox) {
            // SAFETY: plain layouts have no padding, so every byte of `data`
            // is initialised; the destination was just allocated.
            unsafe {
                let bytes = std::slice::from_raw_parts(data.as_ptr().cast::<u8>(), mem::size_of_val(data));
                raw::write(base as *mut u8, bytes);
            }
            return Ok(dest);
        }
        let map = self.swizzler(None);
        for (i, value) in data.iter().enumerate() {
            // SAFETY: element `i` of the allocation is in range.
            let result = unsafe {
                convert(
                    (value as *const T).cast(),
                    &host,
                    (base + i * sandbox.size()) as *mut u8,
                    &sandbox,
                    Direction::ToSandbox,
                    &map,
                )
            };
            if let Err(e) = result {
                let _ = self.free_in_sandbox(dest);
                return Err(e);
            }
        }
        Ok(dest)
    }
}
