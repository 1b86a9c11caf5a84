//! Results of comparisons against live sandbox memory.
//!
//! The memory may change right after the comparison, so these are not
//! tainted values and cannot be verified: the only ways out are an explicit
//! reason or an explicitly unsafe accessor.

use std::ops::{Neg, Not};

/// Outcome of an equality or nullness test on sandbox memory.
#[derive(Debug, Clone, Copy)]
#[must_use]
pub struct TaintedBooleanHint(bool);

impl TaintedBooleanHint {
    pub(crate) fn new(value: bool) -> Self {
        Self(value)
    }

    /// Take the value, recording why acting on a stale result is harmless.
    pub fn unverified_safe_because(self, _reason: &str) -> bool {
        self.0
    }

    pub fn unsafe_unverified(self) -> bool {
        self.0
    }
}

impl Not for TaintedBooleanHint {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0)
    }
}

/// Outcome of an ordering comparison on sandbox memory: negative, zero, or
/// positive.
#[derive(Debug, Clone, Copy)]
#[must_use]
pub struct TaintedIntHint(i32);

impl TaintedIntHint {
    pub(crate) fn new(value: i32) -> Self {
        Self(value)
    }

    pub fn unverified_safe_because(self, _reason: &str) -> i32 {
        self.0
    }

    pub fn unsafe_unverified(self) -> i32 {
        self.0
    }
}

impl Neg for TaintedIntHint {
    type Output = Self;

    fn neg(self) -> Self {
        Self(self.0.wrapping_neg())
    }
}

impl Not for TaintedIntHint {
    type Output = TaintedBooleanHint;

    /// Like C's `!x`: true when the comparison found equality.
    fn not(self) -> TaintedBooleanHint {
        TaintedBooleanHint(self.0 == 0)
    }
}
