//! Machine-model descriptors.
//!
//! A `MachineModel` fixes the width and signedness of the C primitive types
//! as the sandboxed code sees them, plus the sandbox pointer representation.
//! It is immutable for the life of a backend instance.

use crate::error::BackendError;

/// Width and signedness of one sandbox integer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntRepr {
    /// Width in bytes: 1, 2, 4 or 8.
    pub bytes: u8,
    /// Whether the slot is signed.
    pub signed: bool,
}

impl IntRepr {
    pub const fn signed(bytes: u8) -> Self {
        Self { bytes, signed: true }
    }

    pub const fn unsigned(bytes: u8) -> Self {
        Self {
            bytes,
            signed: false,
        }
    }

    /// The same width with the signedness of the host type it stands for.
    ///
    /// A signed host type uses the slot as declared; an unsigned host type
    /// always maps to the unsigned integer of the slot's width.
    pub const fn for_host_sign(self, host_signed: bool) -> Self {
        if host_signed {
            self
        } else {
            Self::unsigned(self.bytes)
        }
    }

    /// Smallest representable value, widened to `i128`.
    pub fn min(self) -> i128 {
        if self.signed {
            -(1i128 << (self.bytes as u32 * 8 - 1))
        } else {
            0
        }
    }

    /// Largest representable value, widened to `i128`.
    pub fn max(self) -> i128 {
        if self.signed {
            (1i128 << (self.bytes as u32 * 8 - 1)) - 1
        } else {
            (1i128 << (self.bytes as u32 * 8)) - 1
        }
    }
}

/// Sandbox pointer representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointerRepr {
    /// Width in bytes: 4 or 8.
    pub bytes: u8,
    /// True when sandbox pointers are a different kind of value from host
    /// pointers (offsets or table indices) and not just a different width.
    pub distinct: bool,
}

/// The C integer slots a host integer type can stand for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CInt {
    Short,
    Int,
    Long,
    LongLong,
    Size,
}

/// Per-backend primitive widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MachineModel {
    pub short: IntRepr,
    pub int: IntRepr,
    pub long: IntRepr,
    pub long_long: IntRepr,
    pub size: IntRepr,
    pub pointer: PointerRepr,
}

impl MachineModel {
    /// The model of the process this crate is compiled into.
    pub const fn host() -> Self {
        let word = std::mem::size_of::<usize>() as u8;
        Self {
            short: IntRepr::signed(2),
            int: IntRepr::signed(4),
            long: IntRepr::signed(word),
            long_long: IntRepr::signed(8),
            size: IntRepr::unsigned(word),
            pointer: PointerRepr {
                bytes: word,
                distinct: false,
            },
        }
    }

    /// ILP32 as used by `wasm32` toolchains: 32-bit long, size and pointers,
    /// pointers are offsets into linear memory.
    pub const fn wasm32() -> Self {
        Self {
            short: IntRepr::signed(2),
            int: IntRepr::signed(4),
            long: IntRepr::signed(4),
            long_long: IntRepr::signed(8),
            size: IntRepr::unsigned(4),
            pointer: PointerRepr {
                bytes: 4,
                distinct: true,
            },
        }
    }

    /// The slot for a C integer type.
    pub const fn slot(&self, ty: CInt) -> IntRepr {
        match ty {
            CInt::Short => self.short,
            CInt::Int => self.int,
            CInt::Long => self.long,
            CInt::LongLong => self.long_long,
            CInt::Size => self.size,
        }
    }

    /// Reject widths this crate cannot represent.
    pub fn validate(&self) -> Result<(), BackendError> {
        let slots = [
            ("short", self.short),
            ("int", self.int),
            ("long", self.long),
            ("long long", self.long_long),
            ("size", self.size),
        ];
        for (name, slot) in slots {
            if !matches!(slot.bytes, 1 | 2 | 4 | 8) {
                return Err(BackendError::Internal(format!(
                    "machine model: {} has unsupported width {}",
                    name, slot.bytes
                )));
            }
        }
        if !matches!(self.pointer.bytes, 4 | 8) {
            return Err(BackendError::Internal(format!(
                "machine model: pointer has unsupported width {}",
                self.pointer.bytes
            )));
        }
        Ok(())
    }
}

impl Default for MachineModel {
    fn default() -> Self {
        Self::host()
    }
}
