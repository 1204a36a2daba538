//! # Global Descriptor Table (GDT), TSS and privilege-transition records
//!
//! In 64-bit mode classic segmentation is largely disabled, but **segment
//! selectors still matter**:
//!
//! - They distinguish **code vs. data/stack** segments.
//! - They carry the **Descriptor Privilege Level (DPL)** used to enforce
//!   Ring-0 ↔ Ring-3 transitions.
//! - They locate the **Task State Segment (TSS)** whose `rsp0` is the switch
//!   stack adopted on every user→kernel entry.
//!
//! ## GDT layout used here
//!
//! Index | Selector | Meaning
//! ------|----------|--------
//! 0     | 0x00     | Null
//! 1     | 0x08     | Kernel code (64-bit, DPL=0; [`KERNEL_CS`])
//! 2     | 0x10     | Kernel data (DPL=0; [`KERNEL_DS`])
//! 3     | 0x1b     | User   data (DPL=3, RPL=3; [`USER_DS`])
//! 4     | 0x23     | User   code (64-bit, DPL=3, RPL=3; [`USER_CS`])
//! 5/6   | 0x28     | TSS (16-byte system descriptor; [`TSS_SEL`])
//!
//! The ordering is load-bearing: `syscall` derives SS as kernel CS + 8, and
//! `sysret` derives user SS/CS as base + 8 / base + 16, which pins kernel
//! data directly after kernel code and user data directly before user code.
//!
//! ## Preconditions
//! - Long mode and paging are enabled.
//! - GDT and TSS memory stays mapped for the lifetime of the CPU.
//! - Interrupts are masked during the switch to avoid half-set state.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

pub mod descriptors;
pub mod frame;
pub mod ring;
pub mod selectors;
pub mod tss;
pub mod tss_desc;

use crate::descriptors::Desc64;
use crate::ring::{Dpl, Rpl};
use crate::selectors::{CodeSel, DataSel, SegmentSelector, TssSel};
use crate::tss::{Tss64, init_switch_stack};
use crate::tss_desc::TssDesc64;
use core::mem::size_of;
use kernel_addresses::VirtualAddress;

pub use crate::frame::{TrapFrame, USER_RFLAGS};

// Well-known selectors matching the GDT layout above.
//
// The `*_SEL` are typed wrappers; the bare constants are the encoded `u16`
// values for trap frames and inline asm.
pub const KERNEL_CS_SEL: SegmentSelector<CodeSel> = SegmentSelector::<CodeSel>::new(1, Rpl::Ring0);
pub const KERNEL_DS_SEL: SegmentSelector<DataSel> = SegmentSelector::<DataSel>::new(2, Rpl::Ring0);
pub const USER_DS_SEL: SegmentSelector<DataSel> = SegmentSelector::<DataSel>::new(3, Rpl::Ring3);
pub const USER_CS_SEL: SegmentSelector<CodeSel> = SegmentSelector::<CodeSel>::new(4, Rpl::Ring3);
pub const TSS_SYS_SEL: SegmentSelector<TssSel> = SegmentSelector::<TssSel>::new(5);

pub const KERNEL_CS: u16 = KERNEL_CS_SEL.encode(); // 0x08
pub const KERNEL_DS: u16 = KERNEL_DS_SEL.encode(); // 0x10
pub const USER_DS: u16 = USER_DS_SEL.encode(); // 0x1b
pub const USER_CS: u16 = USER_CS_SEL.encode(); // 0x23
pub const TSS_SEL: u16 = TSS_SYS_SEL.encode(); // 0x28

// Compile-time sanity checks for selectors and descriptor sizes.
const _: () = {
    // Encoding formula: (index << 3) | (TI=0) | RPL
    const fn enc(index: u16, rpl: u16) -> u16 {
        (index << 3) | rpl
    }

    assert!(KERNEL_CS == 0x08);
    assert!(KERNEL_DS == 0x10);
    assert!(USER_DS == 0x1b);
    assert!(USER_CS == 0x23);
    assert!(TSS_SEL == 0x28);

    assert!(KERNEL_CS == enc(1, 0));
    assert!(KERNEL_DS == enc(2, 0));
    assert!(USER_DS == enc(3, 3));
    assert!(USER_CS == enc(4, 3));
    assert!(TSS_SEL == enc(5, 0));
};

/// Pointer format required by `lgdt`: with paging enabled the base is a
/// **linear (virtual)** address, and the CPU reads `limit+1` bytes from it.
#[repr(C, packed)]
#[allow(dead_code)]
struct DescTablePtr {
    /// Size of the table **minus one** in bytes.
    limit: u16,
    /// Base linear address of the table.
    base: VirtualAddress,
}

/// The complete GDT for the bootstrap CPU.
///
/// Layout matches the module-level table; the TSS occupies two consecutive
/// slots (16-byte system descriptor).
#[repr(C)]
pub struct Gdt {
    /// Null descriptor (must be present at index 0).
    null: Desc64, // 0
    /// Kernel code segment (64-bit, DPL=0).
    kcode: Desc64, // 1
    /// Kernel data/stack segment (DPL=0).
    /// Must be one index after `kcode` for `SYSCALL`.
    kdata: Desc64, // 2
    /// User data/stack segment (DPL=3).
    /// Must be one index before `ucode` for `SYSRET`.
    udata: Desc64, // 3
    /// User code segment (64-bit, DPL=3).
    ucode: Desc64, // 4
    /// 64-bit Available TSS descriptor (low+high).
    tss: TssDesc64, // 5 & 6
}

const _: () = assert!(size_of::<Gdt>() == 7 * 8);

impl Default for Gdt {
    fn default() -> Self {
        Self::new()
    }
}

impl Gdt {
    #[must_use]
    pub const fn new_with_tss(tss: TssDesc64) -> Self {
        Self {
            null: Desc64::null(),
            kcode: Desc64::from_code_dpl(Dpl::Ring0),
            kdata: Desc64::from_data_dpl(Dpl::Ring0),
            udata: Desc64::from_data_dpl(Dpl::Ring3),
            ucode: Desc64::from_code_dpl(Dpl::Ring3),
            tss,
        }
    }

    #[must_use]
    pub const fn new() -> Self {
        Self::new_with_tss(TssDesc64::new(VirtualAddress::zero(), 0))
    }
}

/// Descriptor-table state of the bootstrap CPU: the GDT and the TSS it
/// points at. Lives in a once-initialized static owned by the kernel binary.
pub struct CpuTables {
    pub gdt: Gdt,
    pub tss: Tss64,
}

impl Default for CpuTables {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuTables {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            gdt: Gdt::new(),
            tss: Tss64::new(),
        }
    }
}

/// Load a GDT with `lgdt`.
///
/// # Safety
/// - `gdt` must remain mapped and readable for the lifetime of the CPU.
/// - No interrupt or fault may observe a half-installed state.
#[cfg(target_arch = "x86_64")]
#[inline]
#[allow(clippy::cast_possible_truncation)]
unsafe fn load_gdt(gdt: &Gdt) {
    let ptr = DescTablePtr {
        limit: (size_of::<Gdt>() - 1) as u16,
        base: VirtualAddress::from_ptr(&raw const *gdt),
    };

    unsafe {
        core::arch::asm!(
            "lgdt [{}]",
            in(reg) &raw const ptr,
            options(readonly, nostack, preserves_flags)
        );
    }
}

/// Load the Task Register with a TSS selector.
///
/// # Safety
/// The active GDT must hold a present 64-bit Available TSS descriptor at
/// `sel`, and the TSS memory must stay resident; the CPU reads it on traps.
#[cfg(target_arch = "x86_64")]
#[inline]
unsafe fn load_task_register(sel: SegmentSelector<TssSel>) {
    let sel = sel.encode();
    unsafe {
        core::arch::asm!(
            "ltr {0:x}",
            in(reg) sel,
            options(nostack, preserves_flags)
        );
    }
}

/// Initialize and load **GDT + TSS** for the bootstrap CPU.
///
/// - Programs the TSS switch-stack record (`rsp0`, `ist1`).
/// - Builds the GDT with kernel/user code+data descriptors and the TSS
///   descriptor.
/// - Executes `lgdt`, refreshes data segments and CS, and executes `ltr`.
///
/// Call exactly once, with interrupts disabled, after paging is active. The
/// caller enforces the once-ness (the tables live in a set-once cell).
///
/// ### Parameters
/// - `kernel_stack_top`: top of the Ring-0 switch stack.
/// - `ist1_top`: top of the dedicated double-fault stack.
#[cfg(target_arch = "x86_64")]
#[allow(clippy::cast_possible_truncation)]
pub fn init_gdt_and_tss(
    tables: &mut CpuTables,
    kernel_stack_top: VirtualAddress,
    ist1_top: VirtualAddress,
) {
    // TSS contents first; the descriptor embeds its address and limit.
    init_switch_stack(&mut tables.tss, kernel_stack_top, ist1_top);
    let tss_base = VirtualAddress::from_ptr(&raw const tables.tss);
    let tss_limit = (size_of::<Tss64>() - 1) as u32;

    tables.gdt = Gdt::new_with_tss(TssDesc64::new(tss_base, tss_limit));

    unsafe {
        load_gdt(&tables.gdt);

        // Refresh data segments to kernel data.
        let kdata_sel = KERNEL_DS;
        core::arch::asm!(
            "mov ds, {0:x}",
            "mov es, {0:x}",
            "mov ss, {0:x}",
            in(reg) kdata_sel,
            options(nostack, preserves_flags)
        );

        // Far reload of CS via the retfq trick (no far jmp in long mode).
        let kcs: u16 = KERNEL_CS;
        core::arch::asm!(
            "push {cs}",
            "lea rax, [rip + 2f]",
            "push rax",
            "retfq",
            "2:",
            cs = in(reg) u64::from(kcs),
            out("rax") _,
            options(nostack)
        );

        load_task_register(TSS_SYS_SEL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::{CodeDescBits, DataDescBits};

    #[test]
    fn typed_selectors_encode_the_documented_values() {
        assert_eq!(KERNEL_CS_SEL.encode(), 0x08);
        assert_eq!(KERNEL_DS_SEL.encode(), 0x10);
        assert_eq!(USER_DS_SEL.encode(), 0x1b);
        assert_eq!(USER_CS_SEL.encode(), 0x23);
        assert_eq!(TSS_SYS_SEL.encode(), 0x28);
    }

    #[test]
    fn gdt_orders_segments_for_syscall_and_sysret() {
        let gdt = Gdt::new();
        let raw: &[u64; 7] = unsafe { &*core::ptr::from_ref(&gdt).cast() };

        assert_eq!(raw[0], 0, "null descriptor");

        let kcode = CodeDescBits::from_bits(raw[1]);
        assert!(kcode.l() && kcode.p());
        assert_eq!(kcode.dpl(), 0);

        let kdata = DataDescBits::from_bits(raw[2]);
        assert!(kdata.p());
        assert_eq!(kdata.dpl(), 0);

        let udata = DataDescBits::from_bits(raw[3]);
        assert_eq!(udata.dpl(), 3);

        let ucode = CodeDescBits::from_bits(raw[4]);
        assert!(ucode.l());
        assert_eq!(ucode.dpl(), 3);
    }
}
