//! Calling into the sandbox.
//!
//! Arguments are converted to the sandbox machine model and packed into
//! words; the result word is unpacked and converted back into a tainted
//! host value. Aggregates cannot be passed or returned by value, and that is
//! rejected before the backend runs any sandboxed code.

use std::mem::MaybeUninit;

use rampart_backend::{BackendError, SandboxBackend, SandboxValue};
use tracing::trace;

use crate::callback::Callback;
use crate::convert::{convert, decode_word, encode_word, value_kind, Direction};
use crate::error::SandboxError;
use crate::sandbox::Sandbox;
use crate::tainted::Tainted;
use crate::types::{Boundary, Ptr, SandboxFn, Side};

/// The null pointer as a call argument, whatever the parameter's pointee.
#[derive(Debug, Clone, Copy)]
pub struct Null;

/// A value that can be passed to a sandboxed function.
pub trait IntoArg<B: SandboxBackend> {
    fn into_arg(self, sbx: &Sandbox<B>) -> Result<SandboxValue, SandboxError>;
}

impl<T: Boundary, B: SandboxBackend> IntoArg<B> for Tainted<T, B> {
    fn into_arg(self, sbx: &Sandbox<B>) -> Result<SandboxValue, SandboxError> {
        sbx.encode_scalar(self.as_raw())
    }
}

macro_rules! plain_arg {
    ($($ty:ty),*) => {$(
        impl<B: SandboxBackend> IntoArg<B> for $ty {
            fn into_arg(self, sbx: &Sandbox<B>) -> Result<SandboxValue, SandboxError> {
                sbx.encode_scalar(&self)
            }
        }
    )*};
}

plain_arg!(bool, i8, u8, i16, u16, i32, u32, i64, u64, isize, usize, f32, f64);

impl<B: SandboxBackend> IntoArg<B> for &Callback<'_, B> {
    fn into_arg(self, sbx: &Sandbox<B>) -> Result<SandboxValue, SandboxError> {
        sbx.encode_scalar(&SandboxFn::from_raw(self.trampoline()))
    }
}

impl<B: SandboxBackend> IntoArg<B> for Null {
    fn into_arg(self, sbx: &Sandbox<B>) -> Result<SandboxValue, SandboxError> {
        sbx.encode_scalar(&Ptr::<u8>::null())
    }
}

/// A tuple of up to eight [`IntoArg`] values.
pub trait InvokeArgs<B: SandboxBackend> {
    fn into_words(self, sbx: &Sandbox<B>) -> Result<Vec<SandboxValue>, SandboxError>;
}

macro_rules! invoke_args {
    ($($A:ident $a:ident),*) => {
        impl<B: SandboxBackend, $($A: IntoArg<B>),*> InvokeArgs<B> for ($($A,)*) {
            #[allow(unused_variables)]
            fn into_words(self, sbx: &Sandbox<B>) -> Result<Vec<SandboxValue>, SandboxError> {
                let ($($a,)*) = self;
                Ok(vec![$($a.into_arg(sbx)?),*])
            }
        }
    };
}

invoke_args!();
invoke_args!(A1 a1);
invoke_args!(A1 a1, A2 a2);
invoke_args!(A1 a1, A2 a2, A3 a3);
invoke_args!(A1 a1, A2 a2, A3 a3, A4 a4);
invoke_args!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5);
invoke_args!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6);
invoke_args!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7);
invoke_args!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7, A8 a8);

fn scalar_only<T: Boundary>() -> Result<(), SandboxError> {
    let desc = T::type_desc();
    if desc.is_aggregate() {
        return Err(SandboxError::usage(format!(
            "{} cannot be passed by value across the boundary",
            desc.name()
        )));
    }
    Ok(())
}

impl<B: SandboxBackend> Sandbox<B> {
    /// Call the sandboxed function `name` and wrap its result.
    pub fn invoke<R: Boundary, A: InvokeArgs<B>>(&self, name: &str, args: A) -> Result<Tainted<R, B>, SandboxError> {
        self.ensure_created()?;
        scalar_only::<R>()?;
        value_kind(&self.layout_of::<R>(Side::Sandbox)?)?;
        let words = args.into_words(self)?;
        match self.call(name, &words)? {
            Some(word) => self.decode_scalar(word),
            None => Err(BackendError::SignatureMismatch {
                name: name.to_string(),
                detail: "expected a result, function returned none".into(),
            }
            .into()),
        }
    }

    /// Call the sandboxed function `name`, discarding any result.
    pub fn invoke_void<A: InvokeArgs<B>>(&self, name: &str, args: A) -> Result<(), SandboxError> {
        self.ensure_created()?;
        let words = args.into_words(self)?;
        self.call(name, &words).map(|_| ())
    }

    fn call(&self, name: &str, words: &[SandboxValue]) -> Result<Option<SandboxValue>, SandboxError> {
        trace!(function = name, args = words.len(), "invoke");
        let base = self.backend().memory_base();
        let result = self.backend().invoke(name, words, self);
        if self.backend().memory_base() != base {
            return Err(self.violation(format!(
                "sandbox memory moved from {:#x} during call to {}",
                base, name
            )));
        }
        Ok(result?)
    }

    /// Convert a host scalar to the sandbox model and pack it in a word.
    pub(crate) fn encode_scalar<T: Boundary>(&self, value: &T) -> Result<SandboxValue, SandboxError> {
        scalar_only::<T>()?;
        let host = self.layout_of::<T>(Side::Host)?;
        let sandbox = self.layout_of::<T>(Side::Sandbox)?;
        let mut bytes = [0u8; 8];
        // SAFETY: T is a scalar, so both layouts are at most eight bytes.
        unsafe {
            convert(
                (value as *const T).cast(),
                &host,
                bytes.as_mut_ptr(),
                &sandbox,
                Direction::ToSandbox,
                &self.swizzler(None),
            )?;
        }
        encode_word(&bytes, &sandbox)
    }

    /// Unpack a word in the sandbox model into a tainted host scalar.
    pub(crate) fn decode_scalar<T: Boundary>(&self, word: SandboxValue) -> Result<Tainted<T, B>, SandboxError> {
        scalar_only::<T>()?;
        let host = self.layout_of::<T>(Side::Host)?;
        let sandbox = self.layout_of::<T>(Side::Sandbox)?;
        let bytes = decode_word(word, &sandbox)?;
        let mut out = MaybeUninit::<T>::zeroed();
        // SAFETY: as in `encode_scalar`; `out` is a host-layout T.
        unsafe {
            convert(
                bytes.as_ptr(),
                &sandbox,
                out.as_mut_ptr().cast(),
                &host,
                Direction::ToHost,
                &self.swizzler(None),
            )?;
            Ok(Tainted::new(out.assume_init()))
        }
    }
}
