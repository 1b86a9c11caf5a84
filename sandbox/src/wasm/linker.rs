//! Host function registration and callback trampolines.
//!
//! Registers the two `rampart_host` imports with the Wasmtime `Linker`, and
//! builds the `Func`s that stand in for host callbacks in the guest's
//! function table. Guest code sees both as ordinary wasm functions taking
//! and returning machine words.

use anyhow::{anyhow, bail};
use rampart_backend::{BackendError, CallbackSignature, SandboxValue, ValueKind};
use tracing::warn;
use wasmtime::{Caller, Engine, Func, FuncType, Linker, Store, Val, ValType};

use super::state::GuestState;
use super::validation::HOST_MODULE;
use crate::error::SandboxError;

/// Register all `rampart_host` functions with the linker.
pub fn register_host_functions(linker: &mut Linker<GuestState>) -> Result<(), SandboxError> {
    register_malloc(linker)?;
    register_free(linker)?;
    Ok(())
}

fn register_malloc(linker: &mut Linker<GuestState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        "malloc",
        |caller: Caller<'_, GuestState>, size: i32| -> i32 {
            if size < 0 {
                return 0;
            }
            caller.data().guest_malloc(size as usize) as i32
        },
    )?;
    Ok(())
}

fn register_free(linker: &mut Linker<GuestState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        "free",
        |caller: Caller<'_, GuestState>, ptr: i32| {
            if ptr == 0 {
                return;
            }
            if let Err(e) = caller.data().guest_free(ptr as u32 as u64) {
                warn!(ptr, error = %e, "guest free rejected");
            }
        },
    )?;
    Ok(())
}

pub(crate) fn val_type(kind: ValueKind) -> ValType {
    match kind {
        ValueKind::I32 => ValType::I32,
        ValueKind::I64 => ValType::I64,
        ValueKind::F32 => ValType::F32,
        ValueKind::F64 => ValType::F64,
    }
}

pub(crate) fn value_kind(ty: &ValType) -> Option<ValueKind> {
    match ty {
        ValType::I32 => Some(ValueKind::I32),
        ValType::I64 => Some(ValueKind::I64),
        ValType::F32 => Some(ValueKind::F32),
        ValType::F64 => Some(ValueKind::F64),
        _ => None,
    }
}

pub(crate) fn to_val(value: SandboxValue) -> Val {
    match value {
        SandboxValue::I32(v) => Val::I32(v),
        SandboxValue::I64(v) => Val::I64(v),
        SandboxValue::F32(v) => Val::F32(v.to_bits()),
        SandboxValue::F64(v) => Val::F64(v.to_bits()),
    }
}

pub(crate) fn from_val(val: &Val) -> Option<SandboxValue> {
    match *val {
        Val::I32(v) => Some(SandboxValue::I32(v)),
        Val::I64(v) => Some(SandboxValue::I64(v)),
        Val::F32(bits) => Some(SandboxValue::F32(f32::from_bits(bits))),
        Val::F64(bits) => Some(SandboxValue::F64(f64::from_bits(bits))),
        _ => None,
    }
}

/// Build the wasm function that guest code calls in place of callback `key`.
///
/// The function forwards to the callback host installed by the running
/// `invoke`. Outside an `invoke` it traps.
pub(crate) fn trampoline(
    store: &mut Store<GuestState>,
    engine: &Engine,
    key: u64,
    sig: &CallbackSignature,
) -> Func {
    let ty = FuncType::new(
        engine,
        sig.params.iter().copied().map(val_type),
        sig.result.into_iter().map(val_type),
    );
    let sig = sig.clone();
    Func::new(
        store,
        ty,
        move |caller: Caller<'_, GuestState>, params: &[Val], results: &mut [Val]| -> anyhow::Result<()> {
            let host = caller
                .data()
                .host
                .ok_or_else(|| anyhow!(BackendError::Internal("callback reached outside of invoke".into())))?;
            let args = params
                .iter()
                .map(|v| from_val(v).ok_or_else(|| anyhow!("reference value passed to a host callback")))
                .collect::<anyhow::Result<Vec<_>>>()?;
            // SAFETY: `host` is only set while the installing invoke runs.
            let result = unsafe { host.get() }.dispatch(key, &args)?;
            match (result, results.first_mut()) {
                (Some(v), Some(slot)) if Some(v.kind()) == sig.result => *slot = to_val(v),
                (None, None) => {}
                (got, _) => bail!(BackendError::SignatureMismatch {
                    name: format!("callback {}", key),
                    detail: format!("expected result {:?}, got {:?}", sig.result, got),
                }),
            }
            Ok(())
        },
    )
}
