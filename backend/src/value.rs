//! Machine words exchanged with sandboxed code.
//!
//! Every argument and return value that crosses a call boundary is carried
//! as one of four word kinds. Integers narrower than 32 bits travel in an
//! `I32`, sign- or zero-extended according to their sandbox type.

/// One argument or return word.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SandboxValue {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl SandboxValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::I32(_) => ValueKind::I32,
            Self::I64(_) => ValueKind::I64,
            Self::F32(_) => ValueKind::F32,
            Self::F64(_) => ValueKind::F64,
        }
    }

    /// The integer payload, if this is an integer word.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::I32(v) => Some(v as i64),
            Self::I64(v) => Some(v),
            _ => None,
        }
    }
}

/// The kind of a word, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    I32,
    I64,
    F32,
    F64,
}

/// The word-level signature of a host callback as sandboxed code sees it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CallbackSignature {
    pub params: Vec<ValueKind>,
    pub result: Option<ValueKind>,
}

impl CallbackSignature {
    pub fn new(params: Vec<ValueKind>, result: Option<ValueKind>) -> Self {
        Self { params, result }
    }

    /// True if `args` has exactly the parameter kinds of this signature.
    pub fn accepts(&self, args: &[SandboxValue]) -> bool {
        args.len() == self.params.len()
            && args.iter().zip(&self.params).all(|(a, k)| a.kind() == *k)
    }
}
