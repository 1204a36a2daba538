//! # Trap Frame
//!
//! The machine-state record the CPU saves and restores across a
//! privilege-level transition. Hardware builds one implicitly on every trap;
//! [`TrapFrame::user`] builds one explicitly, exactly once, to synthesize the
//! very first transition into user mode.
//!
//! In memory (and on the stack, which grows downward) the five words sit in
//! hardware order — RIP at the lowest address, SS at the highest:
//!
//! ```text
//! higher addresses   +32  SS      user stack segment (RPL=3)
//!                    +24  RSP     user stack pointer
//!                    +16  RFLAGS  interrupts enabled
//!                    +8   CS      user code segment (RPL=3)
//! RSP at iretq  →    +0   RIP     entry point
//! ```
//!
//! `iretq` consumes the frame from `RSP` upward. The unsafe instruction
//! sequence lives in exactly one place, [`return_to_lower_privilege`]; no
//! other code in the tree issues a privilege return.

use crate::{USER_CS, USER_DS};
use kernel_addresses::VirtualAddress;

/// `RFLAGS` image for initial user entry: the always-one bit plus IF so the
/// task runs with interrupts enabled.
pub const USER_RFLAGS: u64 = 0x202;

/// Five-word privilege-return frame in hardware layout.
#[derive(Debug, Copy, Clone)]
#[repr(C)]
pub struct TrapFrame {
    /// Return address (the user entry point on first entry).
    pub rip: VirtualAddress,
    /// Code segment selector; low two bits are the target CPL.
    pub cs: u64,
    /// Flags image restored by `iretq`.
    pub rflags: u64,
    /// Stack pointer to restore.
    pub rsp: VirtualAddress,
    /// Stack segment selector.
    pub ss: u64,
}

const _: () = assert!(core::mem::size_of::<TrapFrame>() == 40);

impl TrapFrame {
    /// The synthetic first-entry frame: user selectors (RPL=3), interrupts
    /// enabled, resuming at `entry` on `user_stack_top`.
    #[must_use]
    pub const fn user(entry: VirtualAddress, user_stack_top: VirtualAddress) -> Self {
        Self {
            rip: entry,
            cs: USER_CS as u64,
            rflags: USER_RFLAGS,
            rsp: user_stack_top,
            ss: USER_DS as u64,
        }
    }

    /// Write this frame to the top of a stack, returning the address `RSP`
    /// must hold when the privilege-return executes.
    ///
    /// # Safety
    /// `stack_top` must point one-past-the-end of writable memory with at
    /// least 40 bytes below it, 8-byte aligned.
    pub unsafe fn write_to_stack(self, stack_top: VirtualAddress) -> VirtualAddress {
        let base = stack_top.as_u64() - core::mem::size_of::<Self>() as u64;
        debug_assert_eq!(base % 8, 0);
        unsafe {
            core::ptr::write_volatile(base as *mut Self, self);
        }
        VirtualAddress::new(base)
    }
}

/// Point the stack register at `frame` and execute the privilege-return
/// instruction.
///
/// This function does not return under normal operation; coming back would
/// mean `iretq` itself faulted.
///
/// # Safety
/// - `frame` must be a fully initialized [`TrapFrame`] whose selectors,
///   flags and addresses are valid in the *current* address space.
/// - The target code/stack pages must be mapped user-accessible.
#[cfg(target_arch = "x86_64")]
pub unsafe fn return_to_lower_privilege(frame: VirtualAddress) -> ! {
    unsafe {
        core::arch::asm!(
            "mov rsp, {frame}",
            "iretq",
            frame = in(reg) frame.as_u64(),
            options(noreturn)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::offset_of;

    #[test]
    fn fields_sit_at_hardware_offsets() {
        // Hardware pops RIP first: lowest address. SS last: highest.
        assert_eq!(offset_of!(TrapFrame, rip), 0);
        assert_eq!(offset_of!(TrapFrame, cs), 8);
        assert_eq!(offset_of!(TrapFrame, rflags), 16);
        assert_eq!(offset_of!(TrapFrame, rsp), 24);
        assert_eq!(offset_of!(TrapFrame, ss), 32);
    }

    #[test]
    fn user_frame_carries_user_selectors_and_if() {
        let entry = VirtualAddress::new(0x0000_4000_0000);
        let stack = VirtualAddress::new(0x0000_7fff_f000);
        let frame = TrapFrame::user(entry, stack);

        assert_eq!(frame.rip.as_u64(), entry.as_u64());
        assert_eq!(frame.rsp.as_u64(), stack.as_u64());
        // RPL=3 in both selectors: the CPU derives the target CPL from them.
        assert_eq!(frame.cs & 3, 3);
        assert_eq!(frame.ss & 3, 3);
        // Interrupts enabled on entry.
        assert_ne!(frame.rflags & 0x200, 0);
    }

    #[test]
    fn frame_written_to_stack_top_reads_back_in_order() {
        // A 16-byte aligned fake stack; the frame occupies its upper 40 bytes.
        #[repr(align(16))]
        struct Stack([u8; 64]);
        let mut stack = Stack([0; 64]);

        let top = VirtualAddress::from_ptr(core::ptr::from_mut(&mut stack.0).cast::<u8>()) + 64;
        let entry = VirtualAddress::new(0x0000_4000_1000);
        let usp = VirtualAddress::new(0x0000_7fff_e000);

        let frame_base = unsafe { TrapFrame::user(entry, usp).write_to_stack(top) };
        assert_eq!(frame_base.as_u64(), top.as_u64() - 40);

        // Read the words back from high to low: SS, RSP, RFLAGS, CS, RIP.
        let word = |off: u64| unsafe { core::ptr::read((frame_base.as_u64() + off) as *const u64) };
        assert_eq!(word(32), u64::from(USER_DS));
        assert_eq!(word(24), usp.as_u64());
        assert_eq!(word(16), USER_RFLAGS);
        assert_eq!(word(8), u64::from(USER_CS));
        assert_eq!(word(0), entry.as_u64());
    }
}
