use crate::msr::Msr;
use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;

/// `IA32_EFER` — Extended Feature Enable Register (MSR `0xC000_0080`).
///
/// The bootstrap stage already enabled long mode (`LME`/`LMA`) and NX
/// (`NXE`). The kernel only flips [`sce`](Self::sce) to arm the `syscall` /
/// `sysret` pair; everything else is read-modify-write preserved.
#[bitfield(u64)]
pub struct Ia32Efer {
    /// **SCE** (bit 0) — System Call Extensions.
    ///
    /// Must be 1 for `syscall`/`sysret` to execute; otherwise they raise #UD.
    pub sce: bool,

    /// Bits 1–7 — reserved.
    #[bits(7)]
    __reserved0: u8,

    /// **LME** (bit 8) — Long Mode Enable.
    pub lme: bool,

    /// Bit 9 — reserved.
    #[bits(1)]
    __reserved1: u8,

    /// **LMA** (bit 10) — Long Mode Active (read-only in effect).
    pub lma: bool,

    /// **NXE** (bit 11) — No-Execute Enable.
    ///
    /// Must be 1 for the NX page-table bit to be honored.
    pub nxe: bool,

    /// Bits 12–63 — reserved / not modeled.
    #[bits(52)]
    __reserved2: u64,
}

impl Ia32Efer {
    /// MSR index for `IA32_EFER`.
    pub const IA32_EFER: u32 = 0xC000_0080;

    /// The MSR.
    pub const MSR: Msr = Msr::new(Self::IA32_EFER);
}

#[cfg(target_arch = "x86_64")]
impl LoadRegisterUnsafe for Ia32Efer {
    #[inline(always)]
    #[allow(clippy::inline_always)]
    unsafe fn load_unsafe() -> Self {
        let msr = unsafe { Self::MSR.load_raw() };
        Self::from_bits(msr)
    }
}

#[cfg(target_arch = "x86_64")]
impl StoreRegisterUnsafe for Ia32Efer {
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
    fn sce_is_bit_zero() {
        assert_eq!(Ia32Efer::new().with_sce(true).into_bits(), 1);
        assert_eq!(Ia32Efer::new().with_nxe(true).into_bits(), 1 << 11);
    }
}
