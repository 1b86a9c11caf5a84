//! Copy-out verification for tainted pointers.
//!
//! Each method takes exactly one snapshot of the sandbox data into host
//! memory and runs the caller's predicate on that snapshot, so the data the
//! predicate accepts is the data the caller gets. A null pointer reaches the
//! predicate as `None`.

use std::mem::MaybeUninit;

use rampart_backend::SandboxBackend;

use crate::convert::{convert, Direction};
use crate::error::SandboxError;
use crate::raw;
use crate::sandbox::Sandbox;
use crate::tainted::Tainted;
use crate::types::{Boundary, Ptr, Side};

/// Character types a C string can be made of.
pub trait CChar: Boundary {}

impl CChar for u8 {}
impl CChar for i8 {}

impl<T, B> Tainted<Ptr<T>, B> {
    /// Run `verify` on the pointer's address without touching the pointee.
    pub fn copy_and_verify_address<R>(self, verify: impl FnOnce(usize) -> R) -> R {
        verify(self.unsafe_unverified().addr())
    }
}

impl<T: Boundary, B: SandboxBackend> Tainted<Ptr<T>, B> {
    /// Copy the pointee out and run `verify` on the copy.
    pub fn copy_and_verify_pointee<R>(
        self,
        sbx: &Sandbox<B>,
        verify: impl FnOnce(Option<T>) -> R,
    ) -> Result<R, SandboxError> {
        if self.is_null() {
            return Ok(verify(None));
        }
        let value = self.deref(sbx)?.get()?;
        Ok(verify(Some(value.unsafe_unverified())))
    }

    /// Copy `count` consecutive elements out and run `verify` on the copy.
    ///
    /// The whole range is checked, then read once into a host buffer before
    /// any element is converted.
    pub fn copy_and_verify_range<R>(
        self,
        sbx: &Sandbox<B>,
        count: usize,
        verify: impl FnOnce(Option<Vec<T>>) -> R,
    ) -> Result<R, SandboxError> {
        if self.is_null() {
            return Ok(verify(None));
        }
        sbx.ensure_created()?;
        let base = self.unsafe_unverified().addr();
        let from = sbx.layout_of::<T>(Side::Sandbox)?;
        let to = sbx.layout_of::<T>(Side::Host)?;
        let elem = from.size();
        let total = elem
            .checked_mul(count)
            .ok_or_else(|| sbx.violation(format!("range of {} elements overflows", count)))?;
        sbx.check_range_in_sandbox(base, total)?;

        let mut snapshot = vec![0u8; total];
        // SAFETY: range checked above.
        unsafe { raw::read(base as *const u8, &mut snapshot) };

        let map = sbx.swizzler(Some(base));
        let mut out = Vec::with_capacity(count);
        for chunk in snapshot.chunks_exact(elem.max(1)).take(count) {
            let mut value = MaybeUninit::<T>::zeroed();
            // SAFETY: `chunk` holds one sandbox-layout T; `value` is a host T.
            unsafe {
                convert(chunk.as_ptr(), &from, value.as_mut_ptr().cast(), &to, Direction::ToHost, &map)?;
                out.push(value.assume_init());
            }
        }
        Ok(verify(Some(out)))
    }
}

impl<C: CChar, B: SandboxBackend> Tainted<Ptr<C>, B> {
    /// Copy a NUL-terminated string out, without its terminator.
    ///
    /// Reads at most `max_len` bytes, further capped by
    /// [`SandboxConfig::max_string_len`](crate::SandboxConfig::max_string_len).
    /// Fails with [`SandboxError::Unterminated`] if no terminator is found in
    /// that bound. The bytes are read in a single pass and never re-read.
    pub fn copy_and_verify_string<R>(
        self,
        sbx: &Sandbox<B>,
        max_len: usize,
        verify: impl FnOnce(Option<Vec<u8>>) -> R,
    ) -> Result<R, SandboxError> {
        if self.is_null() {
            return Ok(verify(None));
        }
        sbx.ensure_created()?;
        let base = self.unsafe_unverified().addr();
        if !sbx.is_in_sandbox_memory(base) {
            return Err(sbx.violation(format!("string at {:#x} is outside the sandbox", base)));
        }
        let limit = max_len.min(sbx.config().max_string_len);
        let mut bytes = Vec::new();
        for i in 0..=limit {
            let addr = base.checked_add(i).filter(|a| Sandbox::<B>::is_same_sandbox(base, *a));
            let Some(addr) = addr else {
                return Err(sbx.violation(format!(
                    "string at {:#x} runs past the end of the sandbox",
                    base
                )));
            };
            let mut byte = [0u8; 1];
            // SAFETY: addr is inside the same sandbox region as base.
            unsafe { raw::read(addr as *const u8, &mut byte) };
            if byte[0] == 0 {
                return Ok(verify(Some(bytes)));
            }
            if i == limit {
                break;
            }
            bytes.push(byte[0]);
        }
        Err(SandboxError::Unterminated { max: limit })
    }
}
