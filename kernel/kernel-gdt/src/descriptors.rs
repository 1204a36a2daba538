//! # 64-bit GDT code/data descriptor encodings
//!
//! In long mode, **base** and **limit** of code/data descriptors are ignored
//! for linear address calculation; paging provides memory protection. What
//! does matter:
//! - **Type** (code vs data, readable/writable),
//! - **S** (descriptor class: code/data vs system),
//! - **DPL** (descriptor privilege level),
//! - **P** (present),
//! - **L** (64-bit code enable for CS),
//! - **DB** (must be 0 for 64-bit code segments).
//!
//! [`Desc64`] wraps the raw word with constructors that set the correct
//! invariants for 64-bit code and data segments, so no bits are twiddled by
//! hand at the call sites.

use crate::ring::Dpl;
use bitfield_struct::bitfield;

/// Bit layout of a **64-bit code segment** descriptor.
///
/// Invariants enforced by [`Desc64::from_code_dpl`]:
/// - `typ = 0b1010` (execute + read),
/// - `s = 1` (code/data),
/// - `l = 1` (64-bit code), `db = 0` (required when `l = 1`),
/// - `p = 1` (present),
/// - `limit`/`base` zero (ignored by the CPU in long mode).
#[bitfield(u64)]
pub struct CodeDescBits {
    pub limit_lo: u16, // [15:0]   (ignored in long mode)
    pub base_lo: u16,  // [31:16]  (ignored in long mode)
    pub base_mid: u8,  // [39:32]
    #[bits(4)]
    pub typ: u8, // [43:40] = 0b1010 (exec+read)
    pub s: bool,       // [44]     = 1 (code/data)
    #[bits(2)]
    pub dpl: u8, // [46:45]  = 0 or 3
    pub p: bool,       // [47]     = 1
    #[bits(4)]
    pub limit_hi: u8, // [51:48]
    pub avl: bool,     // [52]
    pub l: bool,       // [53]     = 1 (64-bit code)
    pub db: bool,      // [54]     = 0 when L=1
    pub g: bool,       // [55]
    pub base_hi: u8,   // [63:56]
}

/// Bit layout of a **data/stack segment** descriptor (read/write).
#[bitfield(u64)]
pub struct DataDescBits {
    pub limit_lo: u16, // [15:0]   (ignored in long mode)
    pub base_lo: u16,  // [31:16]  (ignored in long mode)
    pub base_mid: u8,  // [39:32]
    #[bits(4)]
    pub typ: u8, // [43:40] = 0b0010 (read/write)
    pub s: bool,       // [44]     = 1 (code/data)
    #[bits(2)]
    pub dpl: u8, // [46:45]
    pub p: bool,       // [47]     = 1
    #[bits(4)]
    pub limit_hi: u8, // [51:48]
    pub avl: bool,     // [52]
    pub l: bool,       // [53]     = 0 for data
    pub db: bool,      // [54]
    pub g: bool,       // [55]
    pub base_hi: u8,   // [63:56]
}

/// One 8-byte GDT slot.
#[repr(transparent)]
#[derive(Copy, Clone)]
pub struct Desc64 {
    pub raw: u64,
}

impl Desc64 {
    /// The mandatory null descriptor at index 0.
    #[inline]
    #[must_use]
    pub const fn null() -> Self {
        Self { raw: 0 }
    }

    /// A 64-bit code segment descriptor at the given privilege.
    #[inline]
    #[must_use]
    pub const fn from_code_dpl(dpl: Dpl) -> Self {
        let bits = CodeDescBits::new()
            .with_typ(0b1010)
            .with_s(true)
            .with_dpl(dpl.into_bits())
            .with_p(true)
            .with_l(true)
            .with_db(false);
        Self {
            raw: bits.into_bits(),
        }
    }

    /// A data/stack segment descriptor at the given privilege.
    #[inline]
    #[must_use]
    pub const fn from_data_dpl(dpl: Dpl) -> Self {
        let bits = DataDescBits::new()
            .with_typ(0b0010)
            .with_s(true)
            .with_dpl(dpl.into_bits())
            .with_p(true);
        Self {
            raw: bits.into_bits(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_descriptor_invariants() {
        let d = CodeDescBits::from_bits(Desc64::from_code_dpl(Dpl::Ring3).raw);
        assert_eq!(d.typ(), 0b1010);
        assert!(d.s());
        assert_eq!(d.dpl(), 3);
        assert!(d.p());
        assert!(d.l());
        assert!(!d.db());
    }

    #[test]
    fn data_descriptor_invariants() {
        let d = DataDescBits::from_bits(Desc64::from_data_dpl(Dpl::Ring0).raw);
        assert_eq!(d.typ(), 0b0010);
        assert!(d.s());
        assert_eq!(d.dpl(), 0);
        assert!(d.p());
        assert!(!d.l());
    }
}
