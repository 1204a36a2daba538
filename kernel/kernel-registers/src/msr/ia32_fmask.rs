use crate::msr::Msr;
use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;

/// `IA32_FMASK` — `RFLAGS` Mask for `syscall` (MSR `0xC000_0084`).
///
/// On `syscall`, the CPU computes:
/// ```text
///   RFLAGS := RFLAGS & ~IA32_FMASK
/// ```
///
/// Bits set here are *cleared* in RFLAGS on entry to the kernel. Only the
/// flags the entry path cares about are modeled by name; architectural
/// constants and reserved bits are pinned to zero.
#[bitfield(u64)]
pub struct Ia32Fmask {
    /// Carry Flag mask (bit 0). Rarely masked.
    pub cf_carry: bool,

    /// Bit 1 — always 1 in RFLAGS, **must be 0 in FMASK**.
    #[bits(default = false)]
    _bit1: bool,

    /// Parity Flag mask (bit 2).
    pub pf_parity: bool,

    /// Bit 3 — reserved; must be 0.
    #[bits(default = false)]
    _bit3: bool,

    /// Adjust Flag mask (bit 4).
    pub af_adjust: bool,

    /// Bit 5 — reserved; must be 0.
    #[bits(default = false)]
    _bit5: bool,

    /// Zero Flag mask (bit 6).
    pub zf_zero: bool,

    /// Sign Flag mask (bit 7).
    pub sf_sign: bool,

    /// Trap Flag mask (bit 8).
    ///
    /// **Set to 1** so user single-stepping cannot follow into kernel entry.
    pub tf_trap: bool,

    /// Interrupt Enable Flag mask (bit 9).
    ///
    /// **Set to 1** so the kernel always enters with interrupts disabled —
    /// mandatory here because the entry stub runs on the user stack for a
    /// few instructions before the switch-stack takes over.
    pub if_interrupt_enable: bool,

    /// Direction Flag mask (bit 10).
    ///
    /// **Set to 1** so string ops always run forward (DF = 0) in the kernel.
    pub df_direction: bool,

    /// Overflow Flag mask (bit 11).
    pub of_overflow: bool,

    /// I/O Privilege Level mask (bits 12–13).
    ///
    /// Masked so user IOPL does not leak into kernel mode.
    #[bits(2)]
    pub iopl: u8,

    /// Nested Task mask (bit 14).
    pub nt_nested: bool,

    /// Bit 15 — reserved; must be 0.
    #[bits(default = false)]
    _bit15: bool,

    /// Resume Flag mask (bit 16).
    pub rf_resume: bool,

    /// Virtual-8086 Mode (bit 17) — must be 0 in long mode and in FMASK.
    #[bits(default = false)]
    _vm: bool,

    /// Alignment Check mask (bit 18).
    pub ac_alignment_check: bool,

    /// Virtual Interrupt Flag mask (bit 19).
    pub vif_virtual_interrupt: bool,

    /// Virtual Interrupt Pending mask (bit 20).
    pub vip_virtual_interrupt_pending: bool,

    /// ID Flag mask (bit 21).
    pub id_cpuid: bool,

    /// Bits 22–63 — reserved; **must be zero in FMASK**.
    #[bits(42, default = 0)]
    _reserved_rest: u64,
}

impl Ia32Fmask {
    pub const IA32_FMASK: u32 = 0xC000_0084;
    pub const MSR: Msr = Msr::new(Self::IA32_FMASK);

    /// Entry mask: clear TF/IF/DF/IOPL/NT/RF/AC/VIF/VIP on kernel entry.
    #[must_use]
    pub const fn kernel_entry_default() -> Self {
        Self::new()
            .with_tf_trap(true)
            .with_if_interrupt_enable(true)
            .with_df_direction(true)
            .with_iopl(0b11)
            .with_nt_nested(true)
            .with_rf_resume(true)
            .with_ac_alignment_check(true)
            .with_vif_virtual_interrupt(true)
            .with_vip_virtual_interrupt_pending(true)
    }
}

#[cfg(target_arch = "x86_64")]
impl LoadRegisterUnsafe for Ia32Fmask {
    #[inline(always)]
    #[allow(clippy::inline_always)]
    unsafe fn load_unsafe() -> Self {
        let msr = unsafe { Self::MSR.load_raw() };
        Self::from_bits(msr)
    }
}

#[cfg(target_arch = "x86_64")]
impl StoreRegisterUnsafe for Ia32Fmask {
    #[inline(always)]
    #[allow(clippy::inline_always)]
    unsafe fn store_unsafe(self) {
        unsafe { Self::MSR.store_raw(self.into_bits()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_mask_clears_if_and_tf() {
        let mask = Ia32Fmask::kernel_entry_default().into_bits();
        assert_ne!(mask & (1 << 8), 0, "TF must be masked");
        assert_ne!(mask & (1 << 9), 0, "IF must be masked");
        assert_eq!(mask & (1 << 1), 0, "constant bit 1 must stay clear");
    }
}
