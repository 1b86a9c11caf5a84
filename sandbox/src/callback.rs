//! Host callbacks callable from the sandbox.
//!
//! A registration ties together the host function, an interceptor that
//! decodes sandbox argument words into tainted values and encodes the
//! result, and the trampoline value sandboxed code calls through. The
//! backend reaches the interceptor through [`CallbackHost::dispatch`] on the
//! sandbox handle, so the handle is passed explicitly on every re-entry.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use rampart_backend::{BackendError, CallbackHost, CallbackSignature, SandboxBackend, SandboxValue, ValueKind};
use tracing::debug;

use crate::convert::value_kind;
use crate::error::SandboxError;
use crate::sandbox::{Interceptor, Registration, Sandbox};
use crate::tainted::Tainted;
use crate::types::{Boundary, SandboxFn, Side};

/// What a callback may return: nothing, a tainted scalar, or either of those
/// wrapped in a `Result`.
pub trait CallbackReturn<B: SandboxBackend> {
    fn result_kind(sbx: &Sandbox<B>) -> Result<Option<ValueKind>, SandboxError>;
    fn into_word(self, sbx: &Sandbox<B>) -> Result<Option<SandboxValue>, SandboxError>;
}

impl<B: SandboxBackend> CallbackReturn<B> for () {
    fn result_kind(_sbx: &Sandbox<B>) -> Result<Option<ValueKind>, SandboxError> {
        Ok(None)
    }

    fn into_word(self, _sbx: &Sandbox<B>) -> Result<Option<SandboxValue>, SandboxError> {
        Ok(None)
    }
}

impl<R: Boundary, B: SandboxBackend> CallbackReturn<B> for Tainted<R, B> {
    fn result_kind(sbx: &Sandbox<B>) -> Result<Option<ValueKind>, SandboxError> {
        word_kind::<R, B>(sbx, "return").map(Some)
    }

    fn into_word(self, sbx: &Sandbox<B>) -> Result<Option<SandboxValue>, SandboxError> {
        sbx.encode_scalar(self.as_raw()).map(Some)
    }
}

impl<R: CallbackReturn<B>, B: SandboxBackend> CallbackReturn<B> for Result<R, SandboxError> {
    fn result_kind(sbx: &Sandbox<B>) -> Result<Option<ValueKind>, SandboxError> {
        R::result_kind(sbx)
    }

    fn into_word(self, sbx: &Sandbox<B>) -> Result<Option<SandboxValue>, SandboxError> {
        self?.into_word(sbx)
    }
}

fn word_kind<T: Boundary, B: SandboxBackend>(sbx: &Sandbox<B>, role: &str) -> Result<ValueKind, SandboxError> {
    let desc = T::type_desc();
    if desc.is_aggregate() {
        return Err(SandboxError::usage(format!(
            "callback {} type {} is passed by value; only scalars and pointers may cross",
            role,
            desc.name()
        )));
    }
    value_kind(&sbx.layout_of::<T>(Side::Sandbox)?)
}

fn next_arg<T: Boundary, B: SandboxBackend>(
    sbx: &Sandbox<B>,
    words: &mut std::slice::Iter<'_, SandboxValue>,
) -> Result<Tainted<T, B>, SandboxError> {
    let word = words
        .next()
        .ok_or_else(|| SandboxError::usage("callback called with too few arguments"))?;
    sbx.decode_scalar(*word)
}

/// A host function that can be registered as a callback.
///
/// Implemented for `Fn(&Sandbox<B>, Tainted<A1, B>, ...) -> R` with up to
/// eight tainted parameters, where `R` is a [`CallbackReturn`].
pub trait CallbackFn<B: SandboxBackend, Args>: Send + Sync + 'static {
    fn signature(sbx: &Sandbox<B>) -> Result<CallbackSignature, SandboxError>;
    fn into_interceptor(self) -> Arc<Interceptor<B>>;
}

macro_rules! callback_fn {
    ($($A:ident $a:ident),*) => {
        impl<B, F, R, $($A),*> CallbackFn<B, ($($A,)*)> for F
        where
            B: SandboxBackend,
            F: Fn(&Sandbox<B>, $(Tainted<$A, B>),*) -> R + Send + Sync + 'static,
            R: CallbackReturn<B>,
            $($A: Boundary,)*
        {
            fn signature(sbx: &Sandbox<B>) -> Result<CallbackSignature, SandboxError> {
                let params = vec![$(word_kind::<$A, B>(sbx, "parameter")?),*];
                Ok(CallbackSignature::new(params, R::result_kind(sbx)?))
            }

            #[allow(unused_variables, unused_mut)]
            fn into_interceptor(self) -> Arc<Interceptor<B>> {
                Arc::new(move |sbx: &Sandbox<B>, args: &[SandboxValue]| {
                    let mut words = args.iter();
                    $(let $a = next_arg::<$A, B>(sbx, &mut words)?;)*
                    if words.next().is_some() {
                        return Err(SandboxError::usage("callback called with too many arguments"));
                    }
                    (self)(sbx, $($a),*).into_word(sbx)
                })
            }
        }
    };
}

callback_fn!();
callback_fn!(A1 a1);
callback_fn!(A1 a1, A2 a2);
callback_fn!(A1 a1, A2 a2, A3 a3);
callback_fn!(A1 a1, A2 a2, A3 a3, A4 a4);
callback_fn!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5);
callback_fn!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6);
callback_fn!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7);
callback_fn!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7, A8 a8);

/// Owner of one callback registration.
///
/// Dropping the handle unregisters the callback. Use
/// [`unregister`](Callback::unregister) to observe the outcome.
#[must_use = "dropping a Callback unregisters it"]
pub struct Callback<'s, B: SandboxBackend> {
    sbx: &'s Sandbox<B>,
    key: u64,
    trampoline: u64,
    released: bool,
}

impl<B: SandboxBackend> Callback<'_, B> {
    /// The value sandboxed code calls through.
    pub fn trampoline(&self) -> u64 {
        self.trampoline
    }

    /// The trampoline as a function pointer, for storing in sandbox memory.
    pub fn as_sandbox_fn(&self) -> Tainted<SandboxFn, B> {
        Tainted::new(SandboxFn::from_raw(self.trampoline))
    }

    pub fn unregister(mut self) -> Result<(), SandboxError> {
        self.released = true;
        self.sbx.release_callback(self.key)
    }
}

impl<B: SandboxBackend> Drop for Callback<'_, B> {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.sbx.release_callback(self.key);
        }
    }
}

impl<B: SandboxBackend> Sandbox<B> {
    /// Make `f` callable from the sandbox.
    ///
    /// Aggregate parameter or return types are rejected here, before any
    /// sandboxed code can call the function. Registering the same function
    /// twice yields two independent registrations.
    pub fn register_callback<Args, F>(&self, f: F) -> Result<Callback<'_, B>, SandboxError>
    where
        F: CallbackFn<B, Args>,
    {
        self.ensure_created()?;
        let sig = F::signature(self)?;
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        let interceptor = f.into_interceptor();

        let mut callbacks = self.lock_callbacks()?;
        let trampoline = self.backend().function_to_sandbox(key, &sig)?;
        callbacks.insert(key, Registration { interceptor, trampoline });
        debug!(key, trampoline, params = sig.params.len(), "callback registered");
        Ok(Callback {
            sbx: self,
            key,
            trampoline,
            released: false,
        })
    }

    /// Same as [`Callback::unregister`].
    pub fn unregister_callback(&self, callback: Callback<'_, B>) -> Result<(), SandboxError> {
        callback.unregister()
    }

    fn release_callback(&self, key: u64) -> Result<(), SandboxError> {
        let mut callbacks = self.lock_callbacks()?;
        let reg = callbacks
            .remove(&key)
            .ok_or_else(|| SandboxError::usage(format!("callback {} is no longer registered", key)))?;
        self.backend().release_function(reg.trampoline)?;
        debug!(key, trampoline = reg.trampoline, "callback unregistered");
        Ok(())
    }

    /// Number of live callback registrations.
    pub fn callback_count(&self) -> usize {
        self.lock_callbacks().map_or(0, |c| c.len())
    }
}

impl<B: SandboxBackend> CallbackHost for Sandbox<B> {
    fn dispatch(&self, key: u64, args: &[SandboxValue]) -> Result<Option<SandboxValue>, BackendError> {
        let interceptor = {
            let callbacks = self.lock_callbacks().map_err(SandboxError::into_backend)?;
            callbacks
                .get(&key)
                .map(|reg| Arc::clone(&reg.interceptor))
                .ok_or_else(|| BackendError::UnknownFunction(format!("callback {}", key)))?
        };
        interceptor(self, args).map_err(SandboxError::into_backend)
    }
}
