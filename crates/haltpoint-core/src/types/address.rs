//! Virtual addresses in the target's address space.

use std::fmt;
use std::ops::{Add, Sub};

/// A virtual address inside the debuggee.
///
/// Addresses handed to the engine always refer to the *target's* address
/// space, never to the controlling process. Wrapping them keeps sizes,
/// register values and addresses from being mixed up at call sites.
///
/// ## Example
///
/// ```rust
/// use haltpoint_core::types::Address;
///
/// let entry = Address::from(0x40_1000);
/// assert_eq!((entry + 6).value(), 0x40_1006);
/// assert!(Address::ZERO.is_null());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// The null address. Never accepted for breakpoints or memory writes.
    pub const ZERO: Self = Address(0);

    /// Wrap a raw value (usable in const contexts).
    #[must_use]
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Raw numeric value, for handing to OS interfaces.
    #[must_use]
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Whether this is address zero.
    #[must_use]
    pub const fn is_null(self) -> bool
    {
        self.0 == 0
    }

    /// Add an offset, returning `None` on overflow.
    ///
    /// ```rust
    /// use haltpoint_core::types::Address;
    ///
    /// assert_eq!(Address::new(0x1000).checked_add(0x10), Some(Address::new(0x1010)));
    /// assert_eq!(Address::new(u64::MAX).checked_add(1), None);
    /// ```
    #[must_use]
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Subtract an offset, returning `None` on underflow.
    #[must_use]
    pub fn checked_sub(self, offset: u64) -> Option<Self>
    {
        self.0.checked_sub(offset).map(Address)
    }

    /// End of the half-open range `[self, self + len)`, or `None` when the
    /// range would wrap around the address space.
    #[must_use]
    pub fn range_end(self, len: usize) -> Option<Self>
    {
        self.checked_add(len as u64)
    }

    /// Round down to a multiple of `alignment` (which must be a power of two).
    #[must_use]
    pub const fn align_down(self, alignment: u64) -> Self
    {
        Address(self.0 & !(alignment - 1))
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
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
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
