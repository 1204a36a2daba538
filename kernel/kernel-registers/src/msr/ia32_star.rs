use crate::msr::Msr;
use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;

/// `IA32_STAR` — System Call Target & Segment Selectors (MSR `0xC000_0081`).
///
/// In 64-bit mode:
///
/// - `syscall` uses `IA32_STAR[47:32]` to derive kernel CS/SS.
/// - `sysret` uses `IA32_STAR[63:48]` to derive user CS/SS.
/// - `IA32_LSTAR` provides the 64-bit RIP target for `syscall`.
#[bitfield(u64)]
pub struct Ia32Star {
    /// Bits 0–31 — Compatibility-mode `syscall` EIP.
    ///
    /// Ignored for 64-bit `syscall`, which uses `IA32_LSTAR`.
    #[bits(32, access = RO)]
    pub compat_syscall_eip: u32,

    /// Bits 32–47 — Kernel code segment selector base for `syscall`.
    ///
    /// On `syscall` in 64-bit mode:
    /// ```text
    ///   CS ← (this & 0xFFFC)
    ///   SS ← (this + 8)
    /// ```
    #[bits(16)]
    pub syscall_cs_selector: u16,

    /// Bits 48–63 — User code segment selector base for `sysret`.
    ///
    /// On `sysret` in 64-bit mode:
    /// ```text
    ///   CS ← (this + 16) | 3
    ///   SS ← (this +  8) | 3
    /// ```
    #[bits(16)]
    pub sysret_cs_selector: u16,
}

impl Ia32Star {
    /// MSR index for `IA32_STAR`.
    pub const IA32_STAR: u32 = 0xC000_0081;

    /// The MSR.
    pub const MSR: Msr = Msr::new(Self::IA32_STAR);

    /// Build a STAR value for a pure 64-bit kernel.
    ///
    /// `kernel_cs` and `user_cs` are the raw selectors (e.g. `0x08`, `0x23`).
    /// The GDT ordering this implies — kernel data one index after kernel
    /// code, user data one index *before* user code — is enforced by the GDT
    /// layout and double-checked here.
    #[must_use]
    pub fn new_64bit_raw(kernel_cs: u16, user_cs: u16) -> Self {
        #[inline]
        const fn gdt_index(sel: u16) -> u16 {
            sel >> 3
        }

        #[inline]
        const fn rpl(sel: u16) -> u16 {
            sel & 0b11
        }

        let kidx = gdt_index(kernel_cs);
        let uidx = gdt_index(user_cs);

        debug_assert_ne!(kidx, 0);
        debug_assert_eq!(rpl(kernel_cs), 0, "kernel CS must be Ring0");
        debug_assert_ne!(uidx, 0, "User CS selector at GDT index 0 is invalid");

        // SYSRET computes SS = (base + 8) | 3 and CS = (base + 16) | 3, so
        // the base selector must sit one GDT slot below user SS.
        let user_ss_index = uidx - 1;
        let base_no_rpl: u16 = (user_ss_index << 3).wrapping_sub(8);

        Self::new()
            // Only bits 15:3 of the syscall selector matter to hardware.
            .with_syscall_cs_selector(kernel_cs)
            .with_sysret_cs_selector(base_no_rpl)
    }
}

#[cfg(target_arch = "x86_64")]
impl LoadRegisterUnsafe for Ia32Star {
    #[inline(always)]
    #[allow(clippy::inline_always)]
    unsafe fn load_unsafe() -> Self {
        let msr = unsafe { Self::MSR.load_raw() };
        Self::from_bits(msr)
    }
}

#[cfg(target_arch = "x86_64")]
impl StoreRegisterUnsafe for Ia32Star {
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
    fn star_for_flat_gdt() {
        // GDT: kcode=1, kdata=2, udata=3, ucode=4.
        let star = Ia32Star::new_64bit_raw(0x08, 0x23);
        assert_eq!(star.syscall_cs_selector(), 0x08);
        // base+8 must select index 3 (user SS), base+16 index 4 (user CS).
        let base = star.sysret_cs_selector();
        assert_eq!((base + 8) >> 3, 3);
        assert_eq!((base + 16) >> 3, 4);
    }
}
