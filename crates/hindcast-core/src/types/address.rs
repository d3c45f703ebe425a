//! Target memory address type.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed address in the target's address space
///
/// This wrapper around `u64` provides type safety when working with remote
/// addresses. It prevents accidentally mixing addresses with sizes, counts or
/// other numeric values that travel alongside them in debug events.
///
/// The width is always 64 bits, even for WOW64 targets; a 32-bit target's
/// addresses are simply zero-extended.
///
/// ## Example
///
/// ```rust
/// use hindcast_core::types::Address;
///
/// let addr = Address::from(0x1000);
/// let next = addr + 0x100;
/// assert_eq!(next.value(), 0x1100);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0), used as a sentinel.
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value, usable in const contexts.
    #[must_use]
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address.
    #[must_use]
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Add an offset, checking for overflow.
    #[must_use]
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Offset of this address relative to `base`, or `None` when it lies
    /// below it.
    #[must_use]
    pub fn offset_from(self, base: Address) -> Option<u64>
    {
        self.0.checked_sub(base.0)
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:x}", self.0)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}
