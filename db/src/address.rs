//! Native virtual addresses.

use core::fmt;

/// A virtual address in the address space of the loaded program.
///
/// Lookups that can miss return `Option<Address>`; there is no in-band
/// "invalid" value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address {
    /// Address zero.
    pub const ZERO: Address = Address(0);

    /// Create an address from a raw value.
    pub const fn new(value: u64) -> Self {
        Address(value)
    }

    /// Raw value of the address.
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Check if this is address zero
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Add a byte offset, returning `None` on overflow.
    pub fn checked_add(self, offset: u64) -> Option<Self> {
        self.0.checked_add(offset).map(Address)
    }

    /// Add a byte offset with wraparound.
    pub fn wrapping_add(self, offset: u64) -> Self {
        Address(self.0.wrapping_add(offset))
    }

    /// Distance from `base` up to this address, or `None` if below `base`.
    pub fn offset_from(self, base: Address) -> Option<u64> {
        self.0.checked_sub(base.0)
    }

    /// Round up to a multiple of `align` (a power of two).
    pub fn align_up(self, align: u64) -> Option<Self> {
        if align <= 1 {
            return Some(self);
        }
        let mask = align - 1;
        self.0.checked_add(mask).map(|v| Address(v & !mask))
    }
}

impl From<u32> for Address {
    fn from(value: u32) -> Self {
        Address(value as u64)
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Address(value)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}
