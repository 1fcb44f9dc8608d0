//! Address type for binary analysis.
//!
//! `Addr` is a plain virtual address. It is kept distinct from `u64` so that
//! AuxData can tell an `Address` payload apart from a `uint64` one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// A virtual address in a module's address space.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Addr(pub u64);

impl Addr {
    pub const fn new(value: u64) -> Self {
        Addr(value)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Add an unsigned displacement, returning `None` on overflow.
    pub fn checked_add(&self, offset: u64) -> Option<Addr> {
        self.0.checked_add(offset).map(Addr)
    }

    /// Subtract an unsigned displacement, returning `None` on underflow.
    pub fn checked_sub(&self, offset: u64) -> Option<Addr> {
        self.0.checked_sub(offset).map(Addr)
    }

    /// Add a signed displacement, returning `None` on overflow.
    pub fn checked_offset(&self, delta: i64) -> Option<Addr> {
        self.0.checked_add_signed(delta).map(Addr)
    }

    /// Distance from `other` up to `self`, if `self >= other`.
    pub fn distance_from(&self, other: Addr) -> Option<u64> {
        self.0.checked_sub(other.0)
    }
}

impl From<u64> for Addr {
    fn from(value: u64) -> Self {
        Addr(value)
    }
}

impl From<Addr> for u64 {
    fn from(addr: Addr) -> Self {
        addr.0
    }
}

impl Add<u64> for Addr {
    type Output = Addr;

    fn add(self, rhs: u64) -> Addr {
        Addr(self.0.wrapping_add(rhs))
    }
}

impl Sub<Addr> for Addr {
    type Output = i128;

    fn sub(self, rhs: Addr) -> i128 {
        self.0 as i128 - rhs.0 as i128
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
