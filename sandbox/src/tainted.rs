//! Host-owned tainted values.
//!
//! A [`Tainted`] is a host copy of data that came from, or is headed to,
//! the sandbox. It has the same byte layout as `T`, but the only ways to
//! get at the `T` are [`copy_and_verify`](Tainted::copy_and_verify) and the
//! explicitly named unwrapping accessors. Arithmetic and comparison work on
//! the wrapped form and re-wrap their results (see [`crate::ops`]).
//!
//! Tainted pointers carry host addresses inside sandbox memory. Pointer
//! arithmetic is checked so the result never leaves the region of the base
//! pointer, and dereferencing yields a live [`TaintedVolatile`] view.

use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use std::mem::MaybeUninit;

use rampart_backend::SandboxBackend;

use crate::convert::{convert, Direction, NoPointers};
use crate::error::SandboxError;
use crate::sandbox::Sandbox;
use crate::types::{Boundary, Ptr};
use crate::volatile::TaintedVolatile;

/// A host-owned value that sandboxed code may have influenced.
///
/// `B` ties the value to one backend type so values from different
/// isolation technologies never mix.
#[repr(transparent)]
pub struct Tainted<T, B> {
    value: T,
    _sandbox: PhantomData<fn() -> B>,
}

impl<T, B> Tainted<T, B> {
    /// Wrap a host value, typically a literal headed for the sandbox.
    pub const fn new(value: T) -> Self {
        Self {
            value,
            _sandbox: PhantomData,
        }
    }

    /// Take the value without any check.
    pub fn unsafe_unverified(self) -> T {
        self.value
    }

    /// Take the value without any check, recording why that is sound here.
    pub fn unverified_safe_because(self, _reason: &str) -> T {
        self.value
    }

    /// Hand the value to `verify` and return whatever it returns.
    ///
    /// The predicate sees a private copy; its result is an ordinary host
    /// value. Returning a sanitized replacement, or a default on rejection,
    /// is up to the predicate.
    pub fn copy_and_verify<R>(self, verify: impl FnOnce(T) -> R) -> R {
        verify(self.value)
    }

    /// Map the wrapped value without unwrapping it.
    pub fn project<U>(&self, f: impl FnOnce(&T) -> U) -> Tainted<U, B> {
        Tainted::new(f(&self.value))
    }

    pub(crate) fn as_raw(&self) -> &T {
        &self.value
    }
}

impl<T: Boundary, B> Tainted<T, B> {
    /// Numeric cast under the conversion rules: integers are range checked,
    /// floats coerce, and enums only cast to themselves.
    pub fn checked_cast<U: Boundary>(self) -> Result<Tainted<U, B>, SandboxError> {
        let (from_desc, to_desc) = (T::type_desc(), U::type_desc());
        let (from, to) = match (from_desc.host_scalar_layout(), to_desc.host_scalar_layout()) {
            (Some(from), Some(to)) => (from, to),
            _ => {
                return Err(SandboxError::usage(format!(
                    "checked_cast from {} to {} needs scalar types",
                    from_desc.name(),
                    to_desc.name()
                )));
            }
        };
        let mut out = MaybeUninit::<U>::zeroed();
        // SAFETY: both layouts are host scalar layouts of exactly T and U.
        unsafe {
            convert(
                (&self.value as *const T).cast(),
                &from,
                out.as_mut_ptr().cast(),
                &to,
                Direction::ToHost,
                &NoPointers,
            )?;
            Ok(Tainted::new(out.assume_init()))
        }
    }
}

impl<T, B> From<T> for Tainted<T, B> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: Clone, B> Clone for Tainted<T, B> {
    fn clone(&self) -> Self {
        Self::new(self.value.clone())
    }
}

impl<T: Copy, B> Copy for Tainted<T, B> {}

impl<T: Default, B> Default for Tainted<T, B> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug, B> fmt::Debug for Tainted<T, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Tainted").field(&self.value).finish()
    }
}

// Both operands are host copies, so comparing them leaks nothing that can
// change underneath the caller.
impl<T: PartialEq, B> PartialEq for Tainted<T, B> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: Eq, B> Eq for Tainted<T, B> {}

impl<T: PartialOrd, B> PartialOrd for Tainted<T, B> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.value.partial_cmp(&other.value)
    }
}

impl<T: Boundary, B, const N: usize> Tainted<[T; N], B> {
    /// Element `i`, still tainted.
    pub fn get(&self, i: usize) -> Option<Tainted<T, B>> {
        self.value.get(i).copied().map(Tainted::new)
    }

    pub const fn len(&self) -> usize {
        N
    }

    pub const fn is_empty(&self) -> bool {
        N == 0
    }
}

impl<T, B> Tainted<Ptr<T>, B> {
    pub const fn null() -> Self {
        Self::new(Ptr::null())
    }

    /// Null tests are allowed directly: nullness reveals nothing.
    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// Reinterpret the pointee type. No data moves.
    pub fn cast<U>(self) -> Tainted<Ptr<U>, B> {
        Tainted::new(Ptr::from_addr(self.value.addr()))
    }
}

impl<T: Boundary, B: SandboxBackend> Tainted<Ptr<T>, B> {
    /// Advance by `n` elements of `T` in its sandbox layout.
    pub fn add(self, sbx: &Sandbox<B>, n: usize) -> Result<Self, SandboxError> {
        self.offset(sbx, n, true)
    }

    /// Step back by `n` elements of `T` in its sandbox layout.
    pub fn sub(self, sbx: &Sandbox<B>, n: usize) -> Result<Self, SandboxError> {
        self.offset(sbx, n, false)
    }

    fn offset(self, sbx: &Sandbox<B>, n: usize, forward: bool) -> Result<Self, SandboxError> {
        let base = self.value.addr();
        if base == 0 {
            return Err(sbx.violation("pointer arithmetic on a null tainted pointer"));
        }
        let elem = sbx.sandbox_size_of::<T>()?;
        let target = n.checked_mul(elem).and_then(|delta| {
            if forward {
                base.checked_add(delta)
            } else {
                base.checked_sub(delta)
            }
        });
        match target {
            Some(target) if sbx.is_in_sandbox_memory(base) && Sandbox::<B>::is_same_sandbox(base, target) => {
                Ok(Self::new(Ptr::from_addr(target)))
            }
            _ => Err(sbx.violation(format!(
                "pointer arithmetic from {:#x} by {}{} elements leaves the sandbox",
                base,
                if forward { "+" } else { "-" },
                n
            ))),
        }
    }

    /// Live view of the pointee. The whole pointee must lie in the sandbox.
    pub fn deref<'s>(self, sbx: &'s Sandbox<B>) -> Result<TaintedVolatile<'s, T, B>, SandboxError> {
        let addr = self.value.addr();
        if addr == 0 {
            return Err(sbx.violation("dereference of a null tainted pointer"));
        }
        TaintedVolatile::new(sbx, addr)
    }

    /// Live view of element `i`, as `*(p + i)`.
    pub fn index<'s>(self, sbx: &'s Sandbox<B>, i: usize) -> Result<TaintedVolatile<'s, T, B>, SandboxError> {
        self.add(sbx, i)?.deref(sbx)
    }
}
