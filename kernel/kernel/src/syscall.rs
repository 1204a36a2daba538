//! # System-Call Fast Path
//!
//! The `syscall` instruction entry: MSR programming and the naked entry
//! stub. On `syscall` the CPU loads RIP from `IA32_LSTAR`, stashes the
//! resume RIP in `RCX` and the flags in `R11`, masks RFLAGS per
//! `IA32_FMASK` — and changes neither stack nor anything else. The stub
//! therefore, before any other code runs:
//!
//! 1. preserves `RCX`/`R11` (the implicit resume address and flags),
//! 2. switches from the user stack to the kernel switch stack,
//! 3. assembles the call number and arguments into one contiguous
//!    [`SyscallArgs`] record,
//! 4. dispatches by call number.
//!
//! The return value rides back in `RAX`; `sysretq` resumes the user from
//! `RCX`/`R11`.

use crate::halt;
use kernel_addresses::VirtualAddress;
use kernel_debugcon::debugcon_fmt::debugcon_write_bytes;
use kernel_gdt::{KERNEL_CS, USER_CS};
use kernel_info::memory::USERSPACE_END;
use kernel_registers::msr::{Ia32Efer, Ia32Fmask, Ia32LStar, Ia32Star};
use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use kernel_syscall::{ByteSink, SyscallArgs, SyscallDisposition, dispatch};
use log::info;

/// Top of the kernel switch stack, read by the entry stub. Written exactly
/// once during [`init`]; the single task guarantees no concurrent entry.
static mut SYSCALL_STACK_TOP: u64 = 0;

/// Scratch slot for the user stack pointer across one syscall. Safe as a
/// bare static for the same single-task reason; a multi-task extension
/// would move both values behind a per-CPU base.
static mut USER_RSP_SCRATCH: u64 = 0;

/// Program the `syscall`/`sysret` MSRs and arm `EFER.SCE`.
///
/// `switch_stack_top` must be the same stack the TSS `rsp0` records: every
/// user→kernel path, gate or `syscall`, lands on the one switch stack.
#[cfg(target_arch = "x86_64")]
pub fn init(switch_stack_top: VirtualAddress) {
    unsafe {
        SYSCALL_STACK_TOP = switch_stack_top.as_u64();

        Ia32Star::new_64bit_raw(KERNEL_CS, USER_CS).store_unsafe();
        Ia32LStar::from(VirtualAddress::new(syscall_entry as usize as u64)).store_unsafe();
        Ia32Fmask::kernel_entry_default().store_unsafe();

        let efer = Ia32Efer::load_unsafe();
        efer.with_sce(true).store_unsafe();
    }
    info!("syscall fast path armed");
}

/// The `IA32_LSTAR` target.
///
/// Register state on entry (hardware contract):
/// - `RCX` = user resume RIP, `R11` = user RFLAGS — preserved first.
/// - `RSP` = user stack — replaced by the switch stack before any push.
/// - `RAX` = call number; `RDI`, `RSI`, `RDX`, `R10`, `R8` = arguments.
///
/// The pushes below materialize [`SyscallArgs`] (sysno at the lowest
/// address, then args 0–4) directly on the kernel stack; `RDI` then carries
/// its address into the dispatcher. Interrupts stay masked throughout
/// (FMASK clears IF) so the switch stack cannot be reentered.
#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
extern "C" fn syscall_entry() {
    core::arch::naked_asm!(
        // (2) leave the user stack before touching it.
        "mov [rip + {user_rsp}], rsp",
        "mov rsp, [rip + {kstack}]",

        // (1) the processor's implicit resume state, preserved first.
        "push rcx",   // user RIP
        "push r11",   // user RFLAGS

        // (3) the contiguous argument record, last push = lowest address:
        //   +0  sysno   (RAX)
        //   +8  arg0    (RDI)
        //   +16 arg1    (RSI)
        //   +24 arg2    (RDX)
        //   +32 arg3    (R10)
        //   +40 arg4    (R8)
        "push r8",
        "push r10",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rax",

        // (4) &SyscallArgs in RDI, dispatch. Eight pushes off a 16-aligned
        // stack top keep RSP correctly aligned for the call.
        "mov rdi, rsp",
        "call {rust}",

        // RAX now holds the return value. Drop the record, restore the
        // resume state, return to the user stack.
        "add rsp, 48",
        "pop r11",
        "pop rcx",
        "mov rsp, [rip + {user_rsp}]",
        "sysretq",
        user_rsp = sym USER_RSP_SCRATCH,
        kstack = sym SYSCALL_STACK_TOP,
        rust = sym syscall_rust,
    );
}

/// Sink adapter: emitted buffers go to the debug console.
struct DebugconByteSink;

impl ByteSink for DebugconByteSink {
    fn write(&mut self, bytes: &[u8]) {
        debugcon_write_bytes(bytes);
    }
}

/// Rust half of the entry path: table lookup by call number, typed errors
/// back in `RAX`, exit handled terminally.
#[unsafe(no_mangle)]
extern "C" fn syscall_rust(args: &SyscallArgs) -> u64 {
    match dispatch(args, USERSPACE_END, &mut DebugconByteSink) {
        SyscallDisposition::Return(value) => value,
        SyscallDisposition::Exit(status) => {
            // No process table: nothing more sophisticated to clean up.
            info!("user task exited with status {status}");
            halt()
        }
    }
}
