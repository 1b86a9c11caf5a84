//! Operators on tainted values.
//!
//! Every operator re-wraps its result, so taint survives arithmetic.
//! Integer operators wrap on overflow like C's unsigned arithmetic, and
//! division is only available in checked form because a sandbox-chosen
//! divisor may be zero.

use std::ops::{Add, BitAnd, BitOr, BitXor, Div, Mul, Neg, Not, Shl, Shr, Sub};

use crate::tainted::Tainted;
use crate::types::Boundary;

/// Scalars with `+ - *` and negation.
pub trait Arith: Boundary {
    fn arith_add(self, rhs: Self) -> Self;
    fn arith_sub(self, rhs: Self) -> Self;
    fn arith_mul(self, rhs: Self) -> Self;
    fn arith_neg(self) -> Self;
}

/// Scalars with bitwise operators.
pub trait Bits: Boundary {
    fn bit_and(self, rhs: Self) -> Self;
    fn bit_or(self, rhs: Self) -> Self;
    fn bit_xor(self, rhs: Self) -> Self;
    fn bit_not(self) -> Self;
}

/// Integers: shifts and checked division.
pub trait Integer: Arith + Bits {
    fn shift_left(self, n: u32) -> Self;
    fn shift_right(self, n: u32) -> Self;
    fn div_checked(self, rhs: Self) -> Option<Self>;
    fn rem_checked(self, rhs: Self) -> Option<Self>;
}

/// Floating point, which also gets `/`.
pub trait Float: Arith {
    fn arith_div(self, rhs: Self) -> Self;
}

macro_rules! integer {
    ($($ty:ty),*) => {$(
        impl Arith for $ty {
            fn arith_add(self, rhs: Self) -> Self { self.wrapping_add(rhs) }
            fn arith_sub(self, rhs: Self) -> Self { self.wrapping_sub(rhs) }
            fn arith_mul(self, rhs: Self) -> Self { self.wrapping_mul(rhs) }
            fn arith_neg(self) -> Self { self.wrapping_neg() }
        }

        impl Bits for $ty {
            fn bit_and(self, rhs: Self) -> Self { self & rhs }
            fn bit_or(self, rhs: Self) -> Self { self | rhs }
            fn bit_xor(self, rhs: Self) -> Self { self ^ rhs }
            fn bit_not(self) -> Self { !self }
        }

        impl Integer for $ty {
            fn shift_left(self, n: u32) -> Self { self.wrapping_shl(n) }
            fn shift_right(self, n: u32) -> Self { self.wrapping_shr(n) }
            fn div_checked(self, rhs: Self) -> Option<Self> { self.checked_div(rhs) }
            fn rem_checked(self, rhs: Self) -> Option<Self> { self.checked_rem(rhs) }
        }

        scalar_rhs!($ty: Add add arith_add, Sub sub arith_sub, Mul mul arith_mul,
            BitAnd bitand bit_and, BitOr bitor bit_or, BitXor bitxor bit_xor);
    )*};
}

macro_rules! float {
    ($($ty:ty),*) => {$(
        impl Arith for $ty {
            fn arith_add(self, rhs: Self) -> Self { self + rhs }
            fn arith_sub(self, rhs: Self) -> Self { self - rhs }
            fn arith_mul(self, rhs: Self) -> Self { self * rhs }
            fn arith_neg(self) -> Self { -self }
        }

        impl Float for $ty {
            fn arith_div(self, rhs: Self) -> Self { self / rhs }
        }

        scalar_rhs!($ty: Add add arith_add, Sub sub arith_sub, Mul mul arith_mul, Div div arith_div);
    )*};
}

/// `Tainted<T> op T` for one concrete scalar.
macro_rules! scalar_rhs {
    ($ty:ty: $($Trait:ident $method:ident $via:ident),*) => {$(
        impl<B> $Trait<$ty> for Tainted<$ty, B> {
            type Output = Tainted<$ty, B>;

            fn $method(self, rhs: $ty) -> Self::Output {
                Tainted::new(self.unsafe_unverified().$via(rhs))
            }
        }
    )*};
}

/// `Tainted<T> op Tainted<T>` for every `T` with the capability.
macro_rules! tainted_rhs {
    ($($Bound:ident: $Trait:ident $method:ident $via:ident),*) => {$(
        impl<T: $Bound, B> $Trait for Tainted<T, B> {
            type Output = Tainted<T, B>;

            fn $method(self, rhs: Self) -> Self::Output {
                Tainted::new(self.unsafe_unverified().$via(rhs.unsafe_unverified()))
            }
        }
    )*};
}

integer!(i8, u8, i16, u16, i32, u32, i64, u64, isize, usize);
float!(f32, f64);

impl Bits for bool {
    fn bit_and(self, rhs: Self) -> Self {
        self & rhs
    }

    fn bit_or(self, rhs: Self) -> Self {
        self | rhs
    }

    fn bit_xor(self, rhs: Self) -> Self {
        self ^ rhs
    }

    fn bit_not(self) -> Self {
        !self
    }
}

tainted_rhs!(
    Arith: Add add arith_add,
    Arith: Sub sub arith_sub,
    Arith: Mul mul arith_mul,
    Float: Div div arith_div,
    Bits: BitAnd bitand bit_and,
    Bits: BitOr bitor bit_or,
    Bits: BitXor bitxor bit_xor
);

impl<T: Arith, B> Neg for Tainted<T, B> {
    type Output = Tainted<T, B>;

    fn neg(self) -> Self::Output {
        Tainted::new(self.unsafe_unverified().arith_neg())
    }
}

impl<T: Bits, B> Not for Tainted<T, B> {
    type Output = Tainted<T, B>;

    fn not(self) -> Self::Output {
        Tainted::new(self.unsafe_unverified().bit_not())
    }
}

impl<T: Integer, B> Shl<u32> for Tainted<T, B> {
    type Output = Tainted<T, B>;

    fn shl(self, n: u32) -> Self::Output {
        Tainted::new(self.unsafe_unverified().shift_left(n))
    }
}

impl<T: Integer, B> Shr<u32> for Tainted<T, B> {
    type Output = Tainted<T, B>;

    fn shr(self, n: u32) -> Self::Output {
        Tainted::new(self.unsafe_unverified().shift_right(n))
    }
}

impl<T: Integer, B> Tainted<T, B> {
    /// `None` on a zero divisor or `MIN / -1`.
    pub fn checked_div(self, rhs: impl Into<Tainted<T, B>>) -> Option<Tainted<T, B>> {
        let rhs = rhs.into().unsafe_unverified();
        self.unsafe_unverified().div_checked(rhs).map(Tainted::new)
    }

    pub fn checked_rem(self, rhs: impl Into<Tainted<T, B>>) -> Option<Tainted<T, B>> {
        let rhs = rhs.into().unsafe_unverified();
        self.unsafe_unverified().rem_checked(rhs).map(Tainted::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type T<V> = Tainted<V, ()>;

    #[test]
    fn test_integer_ops_wrap() {
        let a: T<u8> = Tainted::new(250);
        assert_eq!((a + 10u8).unsafe_unverified(), 4);
        assert_eq!((a - Tainted::new(251)).unsafe_unverified(), 255);
        assert_eq!((a * 2u8).unsafe_unverified(), 244);
        assert_eq!((-Tainted::<i32, ()>::new(i32::MIN)).unsafe_unverified(), i32::MIN);
        assert_eq!((Tainted::<i32, ()>::new(1) << 4).unsafe_unverified(), 16);
        assert_eq!((Tainted::<u32, ()>::new(0x80) >> 7).unsafe_unverified(), 1);
    }

    #[test]
    fn test_bitwise() {
        let a: T<u16> = Tainted::new(0b1100);
        assert_eq!((a & 0b1010u16).unsafe_unverified(), 0b1000);
        assert_eq!((a | Tainted::new(0b0011)).unsafe_unverified(), 0b1111);
        assert_eq!((a ^ 0b0100u16).unsafe_unverified(), 0b1000);
        assert_eq!((!a).unsafe_unverified(), !0b1100u16);
        let t: T<bool> = Tainted::new(true);
        assert!(!(!t).unsafe_unverified());
        assert!((t & Tainted::new(true)).unsafe_unverified());
    }

    #[test]
    fn test_checked_division() {
        let a: T<i32> = Tainted::new(17);
        assert_eq!(a.checked_div(5).unwrap().unsafe_unverified(), 3);
        assert_eq!(a.checked_rem(Tainted::new(5)).unwrap().unsafe_unverified(), 2);
        assert!(a.checked_div(0).is_none());
        assert!(Tainted::<i32, ()>::new(i32::MIN).checked_div(-1).is_none());
    }

    #[test]
    fn test_float_ops() {
        let x: T<f64> = Tainted::new(3.0);
        assert_eq!((x / 2.0).unsafe_unverified(), 1.5);
        assert_eq!((x * Tainted::new(2.0)).unsafe_unverified(), 6.0);
        assert_eq!((-x).unsafe_unverified(), -3.0);
    }
}
