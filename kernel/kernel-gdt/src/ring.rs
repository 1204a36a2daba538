//! # Privilege Levels
//!
//! x86-64 implements four hierarchical rings, of which long mode uses two:
//! **Ring 0** (kernel) and **Ring 3** (user). The same two-bit quantity shows
//! up in three places the CPU checks against each other:
//!
//! | Concept | Stored in | Purpose |
//! |---------|-----------|---------|
//! | [`Ring`] | the current `CS` selector | current privilege level (CPL) |
//! | [`Rpl`]  | low 2 bits of a selector  | requested privilege level |
//! | [`Dpl`]  | bits 45–46 of a descriptor | privilege of the target |
//!
//! For data segment loads the CPU requires `max(CPL, RPL) ≤ DPL`; for an `SS`
//! load in long mode, `CPL == RPL == DPL`.

/// Privilege ring (CPL when read from `CS`).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
#[repr(u8)]
pub enum Ring {
    Ring0 = 0,
    Ring1 = 1,
    Ring2 = 2,
    Ring3 = 3,
}

/// Descriptor Privilege Level: the privilege stored in a GDT descriptor.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum Dpl {
    Ring0 = 0,
    Ring3 = 3,
}

impl Dpl {
    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u8 {
        self as u8
    }

    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        if bits & 0b11 == 3 { Self::Ring3 } else { Self::Ring0 }
    }
}

/// RPL mask in a 16-bit selector.
pub const RPL_MASK: u16 = 0b11;

/// Requested Privilege Level: the low 2 bits of a segment selector.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum Rpl {
    Ring0 = 0,
    Ring1 = 1,
    Ring2 = 2,
    Ring3 = 3,
}

impl Rpl {
    /// Encode as the low two bits of a selector.
    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u16 {
        self as u16
    }

    /// Decode from the low two bits.
    #[inline]
    #[must_use]
    pub const fn from_bits(value_low2: u16) -> Self {
        match value_low2 & RPL_MASK {
            0 => Self::Ring0,
            1 => Self::Ring1,
            2 => Self::Ring2,
            _ => Self::Ring3,
        }
    }

    /// Extract `RPL` from a 16-bit segment selector value.
    #[inline]
    #[must_use]
    pub const fn from_selector(selector: u16) -> Self {
        Self::from_bits(selector & RPL_MASK)
    }

    /// The effective requester level in data-segment checks: `max(CPL, RPL)`.
    #[inline]
    #[must_use]
    pub const fn effective_with(self, cpl: Ring) -> u8 {
        let c = cpl as u8;
        let r = self as u8;
        if c >= r { c } else { r }
    }

    /// CPU-like predicate for loading a *data* segment against a `DPL`:
    /// `max(CPL, RPL) ≤ DPL`.
    #[inline]
    #[must_use]
    pub const fn can_load_data_with_dpl(self, cpl: Ring, dpl: Dpl) -> bool {
        self.effective_with(cpl) <= dpl.into_bits()
    }
}

pub const KERNEL_RPL: Rpl = Rpl::Ring0;
pub const USER_RPL: Rpl = Rpl::Ring3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpl_bits_roundtrip() {
        for b in 0u16..=3 {
            let r = Rpl::from_bits(b);
            assert_eq!(r.into_bits(), b);
        }
    }

    #[test]
    fn effective_and_check() {
        // CPL=0, RPL=3 → effective=3, can load only if DPL≥3.
        assert_eq!(USER_RPL.effective_with(Ring::Ring0), 3);
        assert!(!USER_RPL.can_load_data_with_dpl(Ring::Ring0, Dpl::Ring0));
        assert!(USER_RPL.can_load_data_with_dpl(Ring::Ring0, Dpl::Ring3));

        // CPL=3, RPL=0 → effective=3 (max), same result.
        assert_eq!(KERNEL_RPL.effective_with(Ring::Ring3), 3);
        assert!(!KERNEL_RPL.can_load_data_with_dpl(Ring::Ring3, Dpl::Ring0));
    }
}
