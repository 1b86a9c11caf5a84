//! ABI conversion engine.
//!
//! Moves a value between two layouts of the same type: the host layout and
//! the sandbox layout. Rules, in priority order:
//!
//! 1. Enums convert only to the same enum.
//! 2. Floats convert to floats by ordinary coercion.
//! 3. Integers convert to integers. Widening with matching sign always
//!    succeeds; narrowing or sign changes are range checked and fail with
//!    [`SandboxError::Conversion`] instead of truncating.
//! 4. Pointers are swizzled through a [`PointerMap`] and never mix with
//!    non-pointer layouts.
//! 5. Arrays and structs convert element by element. Arrays of plain
//!    elements with identical representation are moved in one byte copy.
//!
//! Only pointer conversion depends on the direction of travel.

use rampart_backend::{IntRepr, SandboxValue, ValueKind};

use crate::error::SandboxError;
use crate::raw;
use crate::types::Layout;

/// Which way a value is crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    ToSandbox,
    ToHost,
}

/// Address translation used for pointer-typed values. Never called for null.
pub(crate) trait PointerMap {
    fn to_sandbox(&self, host: usize) -> Result<u64, SandboxError>;
    fn to_host(&self, addr: u64) -> Result<usize, SandboxError>;
}

/// A map for conversions that must not contain pointers.
pub(crate) struct NoPointers;

impl PointerMap for NoPointers {
    fn to_sandbox(&self, _host: usize) -> Result<u64, SandboxError> {
        Err(SandboxError::conversion("pointer in a pointer-free conversion"))
    }

    fn to_host(&self, _addr: u64) -> Result<usize, SandboxError> {
        Err(SandboxError::conversion("pointer in a pointer-free conversion"))
    }
}

/// Interpret the first `repr.bytes` bytes of `b` as an integer.
pub(crate) fn int_from_bytes(b: &[u8; 8], repr: IntRepr) -> i128 {
    match (repr.bytes, repr.signed) {
        (1, true) => i8::from_ne_bytes([b[0]]) as i128,
        (1, false) => u8::from_ne_bytes([b[0]]) as i128,
        (2, true) => i16::from_ne_bytes([b[0], b[1]]) as i128,
        (2, false) => u16::from_ne_bytes([b[0], b[1]]) as i128,
        (4, true) => i32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as i128,
        (4, false) => u32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as i128,
        (_, true) => i64::from_ne_bytes(*b) as i128,
        (_, false) => u64::from_ne_bytes(*b) as i128,
    }
}

/// Encode `v` in `repr`. `v` must already be in range.
fn int_to_bytes(v: i128, repr: IntRepr) -> [u8; 8] {
    let mut out = [0u8; 8];
    match repr.bytes {
        1 => out[..1].copy_from_slice(&(v as u8).to_ne_bytes()),
        2 => out[..2].copy_from_slice(&(v as u16).to_ne_bytes()),
        4 => out[..4].copy_from_slice(&(v as u32).to_ne_bytes()),
        _ => out.copy_from_slice(&(v as u64).to_ne_bytes()),
    }
    out
}

/// Whether `v`, read as `from`, is representable in `to`.
pub(crate) fn int_fits(v: i128, from: IntRepr, to: IntRepr) -> bool {
    if to.bytes >= from.bytes && to.signed == from.signed {
        return true;
    }
    match (from.signed, to.signed) {
        // unsigned <- unsigned: upper bound only
        (false, false) => v <= to.max(),
        // signed <- signed: both bounds
        (true, true) => v >= to.min() && v <= to.max(),
        // unsigned <- signed: non-negative, then upper bound
        (true, false) => v >= 0 && v <= to.max(),
        // signed <- unsigned: upper bound in the unsigned domain
        (false, true) => v <= to.max(),
    }
}

/// Convert one integer, checking range.
pub(crate) fn convert_int(v: i128, from: IntRepr, to: IntRepr) -> Result<[u8; 8], SandboxError> {
    if !int_fits(v, from, to) {
        return Err(SandboxError::conversion(format!(
            "{} does not fit in {}",
            v,
            Layout::Int(to).describe()
        )));
    }
    Ok(int_to_bytes(v, to))
}

fn uint_repr(bytes: u8) -> IntRepr {
    IntRepr::unsigned(bytes)
}

unsafe fn load(src: *const u8, n: usize) -> [u8; 8] {
    let mut buf = [0u8; 8];
    raw::read(src, &mut buf[..n]);
    buf
}

unsafe fn store(dst: *mut u8, bytes: &[u8; 8], n: usize) {
    raw::write(dst, &bytes[..n]);
}

/// Convert the value at `src` (laid out as `from`) into `dst` (laid out as `to`).
///
/// Frozen struct fields are left untouched in `dst` when converting toward
/// the sandbox.
///
/// # Safety
///
/// `src` must be readable for `from.size()` bytes and `dst` writable for
/// `to.size()` bytes.
pub(crate) unsafe fn convert(
    src: *const u8,
    from: &Layout,
    dst: *mut u8,
    to: &Layout,
    dir: Direction,
    map: &dyn PointerMap,
) -> Result<(), SandboxError> {
    match (from, to) {
        (Layout::Enum { id: a, name, repr: ra }, Layout::Enum { id: b, repr: rb, .. }) => {
            if a != b {
                return Err(SandboxError::conversion(format!(
                    "enum {} cannot convert to {}",
                    name,
                    to.describe()
                )));
            }
            let v = int_from_bytes(&load(src, ra.bytes as usize), *ra);
            store(dst, &convert_int(v, *ra, *rb)?, rb.bytes as usize);
        }
        (Layout::Float(a), Layout::Float(b)) => {
            let bytes = load(src, *a as usize);
            let out = match (a, b) {
                (4, 4) | (8, 8) => bytes,
                (4, _) => {
                    let f = f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                    (f as f64).to_ne_bytes()
                }
                _ => {
                    let f = f64::from_ne_bytes(bytes);
                    let mut out = [0u8; 8];
                    out[..4].copy_from_slice(&(f as f32).to_ne_bytes());
                    out
                }
            };
            store(dst, &out, *b as usize);
        }
        (Layout::Int(a), Layout::Int(b)) => {
            let v = int_from_bytes(&load(src, a.bytes as usize), *a);
            store(dst, &convert_int(v, *a, *b)?, b.bytes as usize);
        }
        (Layout::Bool, Layout::Bool) => {
            let b = load(src, 1);
            raw::write(dst, &[(b[0] != 0) as u8]);
        }
        (Layout::Pointer(a), Layout::Pointer(b)) => {
            let v = int_from_bytes(&load(src, *a as usize), uint_repr(*a)) as u64;
            let out = match (v, dir) {
                (0, _) => 0,
                (v, Direction::ToSandbox) => {
                    let host = usize::try_from(v)
                        .map_err(|_| SandboxError::conversion("host pointer wider than usize"))?;
                    map.to_sandbox(host)?
                }
                (v, Direction::ToHost) => map.to_host(v)? as u64,
            };
            store(dst, &convert_int(out as i128, uint_repr(8), uint_repr(*b))?, *b as usize);
        }
        (Layout::Function(a), Layout::Function(b)) => {
            let v = int_from_bytes(&load(src, *a as usize), uint_repr(*a));
            store(dst, &convert_int(v, uint_repr(*a), uint_repr(*b))?, *b as usize);
        }
        (Layout::Array { elem: ea, len: la }, Layout::Array { elem: eb, len: lb }) => {
            if la != lb {
                return Err(SandboxError::conversion(format!(
                    "array length {} does not match {}",
                    la, lb
                )));
            }
            if ea.is_plain() && ea.same_repr(eb) {
                raw::copy(src, dst, ea.size() * la);
            } else {
                let (sa, sb) = (ea.size(), eb.size());
                for i in 0..*la {
                    convert(src.add(i * sa), ea, dst.add(i * sb), eb, dir, map)?;
                }
            }
        }
        (Layout::Struct(a), Layout::Struct(b)) => {
            if a.id != b.id || a.fields.len() != b.fields.len() {
                return Err(SandboxError::conversion(format!(
                    "struct {} cannot convert to {}",
                    a.name, b.name
                )));
            }
            for (fa, fb) in a.fields.iter().zip(&b.fields) {
                if fb.frozen && dir == Direction::ToSandbox {
                    continue;
                }
                convert(
                    src.add(fa.offset),
                    &fa.layout,
                    dst.add(fb.offset),
                    &fb.layout,
                    dir,
                    map,
                )?;
            }
        }
        _ => {
            return Err(SandboxError::conversion(format!(
                "cannot convert {} to {}",
                from.describe(),
                to.describe()
            )));
        }
    }
    Ok(())
}

/// The word kind a scalar layout travels in.
pub(crate) fn value_kind(layout: &Layout) -> Result<ValueKind, SandboxError> {
    Ok(match layout {
        Layout::Bool => ValueKind::I32,
        Layout::Int(r) | Layout::Enum { repr: r, .. } if r.bytes <= 4 => ValueKind::I32,
        Layout::Int(_) | Layout::Enum { .. } => ValueKind::I64,
        Layout::Float(4) => ValueKind::F32,
        Layout::Float(_) => ValueKind::F64,
        Layout::Pointer(b) | Layout::Function(b) if *b <= 4 => ValueKind::I32,
        Layout::Pointer(_) | Layout::Function(_) => ValueKind::I64,
        Layout::Array { .. } | Layout::Struct(_) => {
            return Err(SandboxError::usage(format!(
                "{} cannot be passed by value",
                layout.describe()
            )));
        }
    })
}

/// Pack a sandbox-layout scalar into an argument word.
pub(crate) fn encode_word(bytes: &[u8; 8], layout: &Layout) -> Result<SandboxValue, SandboxError> {
    let int = |repr: IntRepr| int_from_bytes(bytes, repr);
    Ok(match layout {
        Layout::Bool => SandboxValue::I32((bytes[0] != 0) as i32),
        Layout::Int(r) | Layout::Enum { repr: r, .. } => match value_kind(layout)? {
            ValueKind::I32 => SandboxValue::I32(int(*r) as i32),
            _ => SandboxValue::I64(int(*r) as i64),
        },
        Layout::Float(4) => SandboxValue::F32(f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        Layout::Float(_) => SandboxValue::F64(f64::from_ne_bytes(*bytes)),
        Layout::Pointer(b) | Layout::Function(b) => match value_kind(layout)? {
            ValueKind::I32 => SandboxValue::I32(int(uint_repr(*b)) as u32 as i32),
            _ => SandboxValue::I64(int(uint_repr(*b)) as u64 as i64),
        },
        Layout::Array { .. } | Layout::Struct(_) => {
            return Err(SandboxError::usage(format!(
                "{} cannot be passed by value",
                layout.describe()
            )));
        }
    })
}

/// Unpack a word into sandbox-layout bytes.
///
/// A 32-bit word is read as signed or unsigned to match its target and must
/// fit the declared width; high bits are never dropped.
pub(crate) fn decode_word(value: SandboxValue, layout: &Layout) -> Result<[u8; 8], SandboxError> {
    let kind = value_kind(layout)?;
    if value.kind() != kind {
        return Err(SandboxError::conversion(format!(
            "expected {:?} word for {}, got {:?}",
            kind,
            layout.describe(),
            value
        )));
    }
    let mut out = [0u8; 8];
    match (value, layout) {
        (SandboxValue::F32(f), _) => out[..4].copy_from_slice(&f.to_ne_bytes()),
        (SandboxValue::F64(f), _) => out = f.to_ne_bytes(),
        (SandboxValue::I32(v), Layout::Bool) => out[0] = (v != 0) as u8,
        (SandboxValue::I32(v), Layout::Int(r) | Layout::Enum { repr: r, .. }) => {
            let word = IntRepr { bytes: 4, signed: r.signed };
            let v = if r.signed { v as i128 } else { v as u32 as i128 };
            out = convert_int(v, word, *r)?;
        }
        (SandboxValue::I32(v), _) => {
            out = convert_int(v as u32 as i128, uint_repr(4), uint_repr(layout.size() as u8))?;
        }
        (SandboxValue::I64(v), _) => out = int_to_bytes(v as i128, uint_repr(8)),
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::TypeId;

    /// Sandbox addresses are host addresses minus a fixed base.
    struct Offset(usize);

    impl PointerMap for Offset {
        fn to_sandbox(&self, host: usize) -> Result<u64, SandboxError> {
            Ok((host - self.0) as u64)
        }

        fn to_host(&self, addr: u64) -> Result<usize, SandboxError> {
            Ok(self.0 + addr as usize)
        }
    }

    fn int(bytes: u8, signed: bool) -> Layout {
        Layout::Int(IntRepr { bytes, signed })
    }

    fn conv<const A: usize, const B: usize>(src: [u8; A], from: &Layout, to: &Layout) -> Result<[u8; B], SandboxError> {
        let mut out = [0u8; B];
        unsafe {
            convert(src.as_ptr(), from, out.as_mut_ptr(), to, Direction::ToSandbox, &NoPointers)?;
        }
        Ok(out)
    }

    #[test]
    fn test_widening_always_succeeds() {
        let out: [u8; 8] = conv((-5i32).to_ne_bytes(), &int(4, true), &int(8, true)).unwrap();
        assert_eq!(i64::from_ne_bytes(out), -5);
        let out: [u8; 4] = conv(200u8.to_ne_bytes(), &int(1, false), &int(4, false)).unwrap();
        assert_eq!(u32::from_ne_bytes(out), 200);
    }

    #[test]
    fn test_narrowing_range_checked() {
        let r: Result<[u8; 1], _> = conv(30000i16.to_ne_bytes(), &int(2, true), &int(1, true));
        assert!(matches!(r, Err(SandboxError::Conversion(_))));
        let out: [u8; 1] = conv(100i16.to_ne_bytes(), &int(2, true), &int(1, true)).unwrap();
        assert_eq!(i8::from_ne_bytes(out), 100);
        let out: [u8; 1] = conv((-128i16).to_ne_bytes(), &int(2, true), &int(1, true)).unwrap();
        assert_eq!(i8::from_ne_bytes(out), -128);
        let r: Result<[u8; 1], _> = conv((-129i16).to_ne_bytes(), &int(2, true), &int(1, true));
        assert!(r.is_err());
    }

    #[test]
    fn test_sign_changes() {
        // unsigned <- signed
        let r: Result<[u8; 4], _> = conv((-1i32).to_ne_bytes(), &int(4, true), &int(4, false));
        assert!(r.is_err());
        let out: [u8; 4] = conv(7i64.to_ne_bytes(), &int(8, true), &int(4, false)).unwrap();
        assert_eq!(u32::from_ne_bytes(out), 7);
        // signed <- unsigned
        let r: Result<[u8; 4], _> = conv(u32::MAX.to_ne_bytes(), &int(4, false), &int(4, true));
        assert!(r.is_err());
        let out: [u8; 8] = conv(u32::MAX.to_ne_bytes(), &int(4, false), &int(8, true)).unwrap();
        assert_eq!(i64::from_ne_bytes(out), u32::MAX as i64);
        // unsigned <- unsigned
        let r: Result<[u8; 2], _> = conv(70000u32.to_ne_bytes(), &int(4, false), &int(2, false));
        assert!(r.is_err());
    }

    #[test]
    fn test_int_fits_boundaries() {
        let u8r = IntRepr::unsigned(1);
        let i8r = IntRepr::signed(1);
        let i16r = IntRepr::signed(2);
        assert!(int_fits(255, IntRepr::unsigned(2), u8r));
        assert!(!int_fits(256, IntRepr::unsigned(2), u8r));
        assert!(int_fits(127, i16r, i8r));
        assert!(!int_fits(128, i16r, i8r));
        assert!(int_fits(-128, i16r, i8r));
        assert!(!int_fits(-1, i16r, u8r));
        assert!(int_fits(200, i16r, u8r));
    }

    #[test]
    fn test_float_coercion() {
        let out: [u8; 8] = conv(1.5f32.to_ne_bytes(), &Layout::Float(4), &Layout::Float(8)).unwrap();
        assert_eq!(f64::from_ne_bytes(out), 1.5);
        let out: [u8; 4] = conv(2.25f64.to_ne_bytes(), &Layout::Float(8), &Layout::Float(4)).unwrap();
        assert_eq!(f32::from_ne_bytes(out), 2.25);
    }

    #[test]
    fn test_enum_identity() {
        struct A;
        struct B;
        let ea = Layout::Enum { id: TypeId::of::<A>(), name: "A", repr: IntRepr::signed(4) };
        let eb = Layout::Enum { id: TypeId::of::<B>(), name: "B", repr: IntRepr::signed(4) };
        let out: [u8; 4] = conv(3i32.to_ne_bytes(), &ea, &ea).unwrap();
        assert_eq!(i32::from_ne_bytes(out), 3);
        let r: Result<[u8; 4], _> = conv(3i32.to_ne_bytes(), &ea, &eb);
        assert!(r.is_err());
    }

    #[test]
    fn test_pointer_never_mixes_with_integers() {
        let r: Result<[u8; 4], _> = conv(0u32.to_ne_bytes(), &Layout::Pointer(4), &int(4, false));
        assert!(matches!(r, Err(SandboxError::Conversion(_))));
    }

    #[test]
    fn test_pointer_swizzle_both_ways() {
        let map = Offset(0x10_0000);
        let host = 0x10_0040usize.to_ne_bytes();
        let mut sbx = [0u8; 4];
        unsafe {
            convert(host.as_ptr(), &Layout::Pointer(8), sbx.as_mut_ptr(), &Layout::Pointer(4), Direction::ToSandbox, &map)
                .unwrap();
        }
        assert_eq!(u32::from_ne_bytes(sbx), 0x40);

        let mut back = [0u8; 8];
        unsafe {
            convert(sbx.as_ptr(), &Layout::Pointer(4), back.as_mut_ptr(), &Layout::Pointer(8), Direction::ToHost, &map)
                .unwrap();
        }
        assert_eq!(usize::from_ne_bytes(back), 0x10_0040);
    }

    #[test]
    fn test_null_pointer_bypasses_map() {
        let mut out = [0xffu8; 4];
        let null = 0usize.to_ne_bytes();
        unsafe {
            convert(null.as_ptr(), &Layout::Pointer(8), out.as_mut_ptr(), &Layout::Pointer(4), Direction::ToSandbox, &NoPointers)
                .unwrap();
        }
        assert_eq!(out, [0, 0, 0, 0]);
    }

    #[test]
    fn test_array_elementwise_and_bulk() {
        let src: [i32; 3] = [1, -2, 3];
        let mut wide = [0i64; 3];
        let from = Layout::Array { elem: Box::new(int(4, true)), len: 3 };
        let to = Layout::Array { elem: Box::new(int(8, true)), len: 3 };
        unsafe {
            convert(src.as_ptr().cast(), &from, wide.as_mut_ptr().cast(), &to, Direction::ToSandbox, &NoPointers)
                .unwrap();
        }
        assert_eq!(wide, [1, -2, 3]);

        let mut same = [0i32; 3];
        unsafe {
            convert(src.as_ptr().cast(), &from, same.as_mut_ptr().cast(), &from, Direction::ToHost, &NoPointers)
                .unwrap();
        }
        assert_eq!(same, src);
    }

    #[test]
    fn test_bool_normalised() {
        let out: [u8; 1] = conv([7u8], &Layout::Bool, &Layout::Bool).unwrap();
        assert_eq!(out, [1]);
    }

    #[test]
    fn test_words() {
        let layout = int(1, true);
        let bytes = int_to_bytes(-3, IntRepr::signed(1));
        assert_eq!(encode_word(&bytes, &layout).unwrap(), SandboxValue::I32(-3));

        // A narrow word that does not fit its slot is rejected.
        let err = decode_word(SandboxValue::I32(0x1_02), &int(1, false)).unwrap_err();
        assert!(matches!(err, SandboxError::Conversion(_)));
        let err = decode_word(SandboxValue::I32(70_000), &int(2, true)).unwrap_err();
        assert!(matches!(err, SandboxError::Conversion(_)));
        let err = decode_word(SandboxValue::I32(-1), &int(1, false)).unwrap_err();
        assert!(matches!(err, SandboxError::Conversion(_)));
        assert_eq!(decode_word(SandboxValue::I32(0xFE), &int(1, false)).unwrap()[0], 0xFE);
        assert_eq!(decode_word(SandboxValue::I32(-2), &int(1, true)).unwrap()[0], 0xFE);
        // Unsigned 32-bit values travel as negative words.
        let full = decode_word(SandboxValue::I32(-1), &int(4, false)).unwrap();
        assert_eq!(&full[..4], &u32::MAX.to_ne_bytes());
        assert_eq!(decode_word(SandboxValue::I32(0x100), &Layout::Bool).unwrap()[0], 1);

        let err = decode_word(SandboxValue::I64(1), &int(4, true)).unwrap_err();
        assert!(matches!(err, SandboxError::Conversion(_)));

        let word = encode_word(&int_to_bytes(u32::MAX as i128, IntRepr::unsigned(4)), &Layout::Pointer(4)).unwrap();
        assert_eq!(word, SandboxValue::I32(-1));

        let arr = Layout::Array { elem: Box::new(int(1, false)), len: 2 };
        assert!(matches!(value_kind(&arr), Err(SandboxError::Usage(_))));
    }
}
