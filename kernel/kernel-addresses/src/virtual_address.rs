use core::fmt;
use core::ops::{Add, AddAssign};

/// Number of implemented virtual-address bits (4-level paging).
const VA_BITS: u32 = 48;

/// A **virtual** memory address.
///
/// Newtype over `u64` to prevent mixing with physical addresses. Construction
/// through [`try_new`](Self::try_new) additionally guarantees canonicality;
/// [`new`](Self::new) carries no such guarantee and is meant for values that
/// are canonical by construction (constants, pointers read from the CPU).
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u64);

/// Error produced when a virtual address fails the canonical check.
///
/// Carries the offending value for diagnostics.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct NonCanonical(pub u64);

impl fmt::Display for NonCanonical {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "non-canonical virtual address 0x{:016x}", self.0)
    }
}

impl core::error::Error for NonCanonical {}

impl VirtualAddress {
    /// Create an address without a canonical check.
    #[inline]
    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Create an address, rejecting non-canonical values.
    ///
    /// # Errors
    /// Returns [`NonCanonical`] if bits 63..48 are not the sign-extension of
    /// bit 47.
    #[inline]
    pub const fn try_new(addr: u64) -> Result<Self, NonCanonical> {
        if Self::is_canonical_u64(addr) {
            Ok(Self(addr))
        } else {
            Err(NonCanonical(addr))
        }
    }

    /// Create an address, sign-extending bit 47 into bits 63..48.
    ///
    /// The low 48 bits are preserved exactly; only the sign-extension region
    /// is normalized. Prefer [`try_new`](Self::try_new) when an unexpected
    /// upper half should be treated as an error instead.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    pub const fn canonicalize(addr: u64) -> Self {
        Self(((addr << (64 - VA_BITS)) as i64 >> (64 - VA_BITS)) as u64)
    }

    #[inline]
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as u64)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// True if bits 63..48 replicate bit 47.
    #[inline]
    #[must_use]
    pub const fn is_canonical(self) -> bool {
        Self::is_canonical_u64(self.0)
    }

    const fn is_canonical_u64(addr: u64) -> bool {
        let sign = (addr >> 47) & 1;
        (addr >> VA_BITS) == if sign == 0 { 0 } else { 0xFFFF }
    }

    /// True if the address lies in the low (user) half of the address space.
    #[inline]
    #[must_use]
    pub const fn is_lower_half(self) -> bool {
        (self.0 >> 47) & 1 == 0
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned_to(self, align: u64) -> bool {
        self.0 & (align - 1) == 0
    }

    /// Required by `bitfield-struct` field embedding.
    #[inline]
    #[must_use]
    #[doc(hidden)]
    pub const fn from_bits(v: u64) -> Self {
        Self(v)
    }

    /// Required by `bitfield-struct` field embedding.
    #[inline]
    #[must_use]
    #[doc(hidden)]
    pub const fn into_bits(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:016x})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

impl From<u64> for VirtualAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl Add<u64> for VirtualAddress {
    type Output = Self;

    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0.checked_add(rhs).expect("VirtualAddress add"))
    }
}

impl AddAssign<u64> for VirtualAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        *self = *self + rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_low_and_high_half() {
        assert!(VirtualAddress::new(0).is_canonical());
        assert!(VirtualAddress::new(0x0000_7fff_ffff_ffff).is_canonical());
        assert!(VirtualAddress::new(0xffff_8000_0000_0000).is_canonical());
        assert!(VirtualAddress::new(0xffff_ffff_ffff_ffff).is_canonical());
    }

    #[test]
    fn non_canonical_is_rejected() {
        // Bit 47 set but sign-extension field not all-ones.
        assert_eq!(
            VirtualAddress::try_new(0x0000_8000_0000_0000),
            Err(NonCanonical(0x0000_8000_0000_0000))
        );
        // Sign-extension field set without bit 47.
        assert!(VirtualAddress::try_new(0xdead_0000_0000_0000).is_err());
    }

    #[test]
    fn canonicalize_sign_extends() {
        // Bit 47 = 1: upper bits become all-ones, low 48 bits untouched.
        let va = VirtualAddress::canonicalize(0x0000_8000_0000_1234);
        assert_eq!(va.as_u64(), 0xffff_8000_0000_1234);
        assert!(va.is_canonical());

        // Bit 47 = 0: upper garbage is cleared, not truncated into the value.
        let va = VirtualAddress::canonicalize(0xaaaa_1234_5678_9abc);
        assert_eq!(va.as_u64(), 0x0000_1234_5678_9abc);
        assert!(va.is_canonical());
    }

    #[test]
    fn half_classification() {
        assert!(VirtualAddress::new(0x0000_4000_0000_0000).is_lower_half());
        assert!(!VirtualAddress::new(0xffff_8000_0000_0000).is_lower_half());
    }
}
