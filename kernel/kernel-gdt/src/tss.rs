//! # 64-bit Task State Segment (TSS) and the switch-stack record
//!
//! In 64-bit mode the CPU no longer performs hardware task switching, but it
//! **still consults the TSS** on every privilege elevation:
//!
//! 1) **Privilege Stack Table** — `rsp0..rsp2`. When an interrupt, exception
//!    or trap gate changes CPL to 0, the CPU loads RSP from `rsp0` *before*
//!    pushing the interrupt frame. This is the switch-stack record: the one
//!    stack adopted on every user→kernel transition regardless of path.
//! 2) **Interrupt Stack Table** — `ist1..ist7`. A gate carrying a non-zero
//!    IST index switches to that stack unconditionally, shielding abort
//!    handlers (double fault) from a corrupted main stack.
//!
//! The switch stack must never be a stack already in use by interrupted
//! kernel code — reentrant use would corrupt live frames. With a single task
//! and interrupts handled to completion there is exactly one such stack, but
//! the requirement stands for any multi-task extension.
//!
//! `syscall`/`sysret` do **not** consult the TSS; the syscall entry stub
//! performs its own switch to the same stack top.

use core::mem::size_of;
use kernel_addresses::VirtualAddress;

/// 64-bit Task State Segment as read by the CPU.
///
/// All `_reserved*` fields must be zero. The GDT holds a 16-byte system
/// descriptor pointing at this structure; it must stay resident at that
/// address for the lifetime of the CPU.
#[repr(C, packed)]
pub struct Tss64 {
    /// Must be zero. Reserved by the architecture.
    _reserved0: u32,

    /// **Ring-0 stack pointer (RSP0)** — the switch-stack record.
    ///
    /// Loaded by the CPU on any privilege elevation to CPL0 through a gate.
    pub rsp0: VirtualAddress,

    /// Ring-1 stack pointer; unused in this kernel.
    pub rsp1: VirtualAddress,

    /// Ring-2 stack pointer; unused in this kernel.
    pub rsp2: VirtualAddress,

    /// Must be zero. Reserved by the architecture.
    _reserved1: u64,

    /// **IST1**: dedicated stack for the double-fault gate.
    pub ist1: VirtualAddress,

    /// IST2–IST7: further dedicated stacks; unused here.
    pub ist2: VirtualAddress,
    pub ist3: VirtualAddress,
    pub ist4: VirtualAddress,
    pub ist5: VirtualAddress,
    pub ist6: VirtualAddress,
    pub ist7: VirtualAddress,

    /// Must be zero. Reserved by the architecture.
    _reserved2: u64,

    /// Must be zero. Reserved by the architecture.
    _reserved3: u16,

    /// Byte offset from the TSS base to the I/O permission bitmap.
    ///
    /// Set to `size_of::<Tss64>()` so no bitmap is present: user port I/O is
    /// then governed purely by IOPL vs CPL and faults at CPL3.
    pub iopb_offset: u16,
}

const _: () = assert!(size_of::<Tss64>() == 104);

impl Default for Tss64 {
    fn default() -> Self {
        Self::new()
    }
}

impl Tss64 {
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _reserved0: 0,
            rsp0: VirtualAddress::zero(),
            rsp1: VirtualAddress::zero(),
            rsp2: VirtualAddress::zero(),
            _reserved1: 0,
            ist1: VirtualAddress::zero(),
            ist2: VirtualAddress::zero(),
            ist3: VirtualAddress::zero(),
            ist4: VirtualAddress::zero(),
            ist5: VirtualAddress::zero(),
            ist6: VirtualAddress::zero(),
            ist7: VirtualAddress::zero(),
            _reserved2: 0,
            _reserved3: 0,
            iopb_offset: size_of::<Self>() as u16,
        }
    }
}

/// Record the switch stack and the double-fault IST stack.
///
/// * `kernel_stack_top` — top (highest address) of the kernel switch stack,
///   adopted by the CPU on every user→kernel gate transition.
/// * `ist1_top` — top of the dedicated double-fault stack.
pub const fn init_switch_stack(
    tss: &mut Tss64,
    kernel_stack_top: VirtualAddress,
    ist1_top: VirtualAddress,
) {
    tss.rsp0 = kernel_stack_top;
    tss.ist1 = ist1_top;
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::offset_of;

    #[test]
    fn layout_matches_the_architecture() {
        // Intel SDM Vol. 3A, 64-bit TSS format.
        assert_eq!(offset_of!(Tss64, rsp0), 4);
        assert_eq!(offset_of!(Tss64, ist1), 36);
        assert_eq!(offset_of!(Tss64, iopb_offset), 102);
    }

    #[test]
    fn fresh_tss_disables_the_io_bitmap() {
        let tss = Tss64::new();
        assert_eq!({ tss.iopb_offset }, 104);
    }

    #[test]
    fn switch_stack_is_recorded() {
        let mut tss = Tss64::new();
        init_switch_stack(
            &mut tss,
            VirtualAddress::new(0xffff_9000_0000_0000),
            VirtualAddress::new(0xffff_9000_0001_0000),
        );
        assert_eq!({ tss.rsp0 }.as_u64(), 0xffff_9000_0000_0000);
        assert_eq!({ tss.ist1 }.as_u64(), 0xffff_9000_0001_0000);
    }
}
