//! Live views of sandbox memory.
//!
//! A [`TaintedVolatile`] names a location inside the sandbox and holds no
//! copy of it. Every [`get`](TaintedVolatile::get) re-reads sandbox memory
//! and converts from the sandbox layout; every
//! [`set`](TaintedVolatile::set) converts into it. Sandboxed code may change
//! the location between any two accesses, so comparisons against a view
//! produce hints rather than tainted booleans.
//!
//! Freezing is a property of a view, not of memory. A frozen field cannot
//! be written through its field view or by a whole-struct `set` on its
//! parent. A pointer taken with `address_of` is an ordinary sandbox pointer,
//! and views reached through it are not frozen. Sandboxed code can write the
//! field at any time regardless.

use std::any::TypeId;
use std::marker::PhantomData;
use std::mem::MaybeUninit;

use rampart_backend::SandboxBackend;

use crate::convert::{convert, Direction};
use crate::error::SandboxError;
use crate::hint::{TaintedBooleanHint, TaintedIntHint};
use crate::raw;
use crate::sandbox::Sandbox;
use crate::tainted::Tainted;
use crate::types::{Boundary, Layout, Ptr, Side};

/// A view of a `T` stored in sandbox memory, in the sandbox's layout.
pub struct TaintedVolatile<'s, T, B: SandboxBackend> {
    sbx: &'s Sandbox<B>,
    addr: usize,
    layout: Layout,
    generation: u64,
    frozen: bool,
    _ty: PhantomData<fn() -> T>,
}

impl<'s, T: Boundary, B: SandboxBackend> TaintedVolatile<'s, T, B> {
    /// View the `T` at host address `addr`, which must be fully inside `sbx`.
    pub(crate) fn new(sbx: &'s Sandbox<B>, addr: usize) -> Result<Self, SandboxError> {
        let layout = sbx.layout_of::<T>(Side::Sandbox)?;
        sbx.check_range_in_sandbox(addr, layout.size())?;
        Ok(Self {
            sbx,
            addr,
            layout,
            generation: sbx.generation(),
            frozen: false,
            _ty: PhantomData,
        })
    }

    fn child<U>(&self, addr: usize, layout: Layout, frozen: bool) -> TaintedVolatile<'s, U, B> {
        TaintedVolatile {
            sbx: self.sbx,
            addr,
            layout,
            generation: self.generation,
            frozen: self.frozen || frozen,
            _ty: PhantomData,
        }
    }

    /// Size of the viewed value in the sandbox layout.
    pub fn sandbox_size(&self) -> usize {
        self.layout.size()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Read the current value into a host copy.
    pub fn get(&self) -> Result<Tainted<T, B>, SandboxError> {
        self.sbx.ensure_live(self.generation)?;
        let host = self.sbx.layout_of::<T>(Side::Host)?;
        let mut out = MaybeUninit::<T>::zeroed();
        // SAFETY: the range was checked at construction against this same
        // instance, and `out` holds a host-layout T. Every bit pattern
        // convert writes is a valid T.
        unsafe {
            convert(
                self.addr as *const u8,
                &self.layout,
                out.as_mut_ptr().cast(),
                &host,
                Direction::ToHost,
                &self.sbx.swizzler(Some(self.addr)),
            )?;
            Ok(Tainted::new(out.assume_init()))
        }
    }

    /// Write `value` into sandbox memory.
    ///
    /// Frozen struct fields keep their sandbox contents. On a conversion
    /// error the location may be partly written.
    pub fn set(&self, value: impl Into<Tainted<T, B>>) -> Result<(), SandboxError> {
        if self.frozen {
            return Err(SandboxError::usage("write to a frozen field"));
        }
        self.sbx.ensure_live(self.generation)?;
        let value = value.into();
        let host = self.sbx.layout_of::<T>(Side::Host)?;
        // SAFETY: as in `get`, with the directions swapped.
        unsafe {
            convert(
                (value.as_raw() as *const T).cast(),
                &host,
                self.addr as *mut u8,
                &self.layout,
                Direction::ToSandbox,
                &self.sbx.swizzler(None),
            )
        }
    }

    /// A tainted pointer to this location. The freeze flag does not travel
    /// with it.
    pub fn address_of(&self) -> Tainted<Ptr<T>, B> {
        Tainted::new(Ptr::from_addr(self.addr))
    }

    /// Snapshot the value once, then run `verify` on the copy.
    pub fn copy_and_verify<R>(&self, verify: impl FnOnce(T) -> R) -> Result<R, SandboxError> {
        Ok(self.get()?.copy_and_verify(verify))
    }

    /// Compare the live value for equality.
    pub fn eq_hint(&self, other: impl Into<Tainted<T, B>>) -> Result<TaintedBooleanHint, SandboxError>
    where
        T: PartialEq,
    {
        let current = self.get()?;
        Ok(TaintedBooleanHint::new(current == other.into()))
    }

    /// Three-way compare of the live value: negative, zero, or positive.
    pub fn cmp_hint(&self, other: impl Into<Tainted<T, B>>) -> Result<TaintedIntHint, SandboxError>
    where
        T: Ord,
    {
        let current = self.get()?.unsafe_unverified();
        let other = other.into().unsafe_unverified();
        Ok(TaintedIntHint::new(current.cmp(&other) as i32))
    }

    /// View of the struct field `name`, which must have type `F`.
    pub fn field<F: Boundary>(&self, name: &str) -> Result<TaintedVolatile<'s, F, B>, SandboxError> {
        let Layout::Struct(s) = &self.layout else {
            return Err(SandboxError::usage(format!(
                "field {} on non-struct {}",
                name,
                self.layout.describe()
            )));
        };
        let field = s
            .field(name)
            .ok_or_else(|| SandboxError::usage(format!("{} has no field {}", s.name, name)))?;
        if field.id != TypeId::of::<F>() {
            return Err(SandboxError::usage(format!(
                "field {}.{} is {}, not {}",
                s.name,
                name,
                field.layout.describe(),
                F::type_desc().name()
            )));
        }
        Ok(self.child(self.addr + field.offset, field.layout.clone(), field.frozen))
    }
}

impl<'s, T: Boundary, B: SandboxBackend, const N: usize> TaintedVolatile<'s, [T; N], B> {
    /// View of element `i`. Out-of-range indices are integrity violations.
    pub fn index(&self, i: usize) -> Result<TaintedVolatile<'s, T, B>, SandboxError> {
        let Layout::Array { elem, .. } = &self.layout else {
            return Err(SandboxError::usage("array view without an array layout"));
        };
        if i >= N {
            return Err(self
                .sbx
                .violation(format!("index {} out of bounds for sandbox array of {}", i, N)));
        }
        Ok(self.child(self.addr + i * elem.size(), (**elem).clone(), false))
    }

    pub const fn len(&self) -> usize {
        N
    }

    pub const fn is_empty(&self) -> bool {
        N == 0
    }
}

impl<'s, T: Boundary, B: SandboxBackend> TaintedVolatile<'s, Ptr<T>, B> {
    /// Follow the stored pointer to another live view.
    pub fn deref(&self) -> Result<TaintedVolatile<'s, T, B>, SandboxError> {
        self.get()?.deref(self.sbx)
    }

    /// Store the sandbox's null pointer: all-zero bytes of the sandbox
    /// pointer width.
    pub fn set_null(&self) -> Result<(), SandboxError> {
        if self.frozen {
            return Err(SandboxError::usage("write to a frozen field"));
        }
        self.sbx.ensure_live(self.generation)?;
        // SAFETY: range checked at construction, same instance.
        unsafe { raw::fill(self.addr as *mut u8, 0, self.layout.size()) };
        Ok(())
    }

    pub fn is_null(&self) -> Result<TaintedBooleanHint, SandboxError> {
        self.sbx.ensure_live(self.generation)?;
        let mut bytes = [0u8; 8];
        let n = self.layout.size().min(8);
        // SAFETY: range checked at construction, same instance.
        unsafe { raw::read(self.addr as *const u8, &mut bytes[..n]) };
        Ok(TaintedBooleanHint::new(bytes.iter().all(|b| *b == 0)))
    }
}
