//! # Kernel Entry Point
//!
//! Control arrives here from the bootstrap stage with long mode and paging
//! active, the kernel mapped at its high virtual base, and a
//! [`KernelBootInfo`] pointer in hand. The naked `_start` establishes the
//! boot stack, then [`init::boot`] runs the one documented initialization
//! sequence and ends by entering user mode — this kernel executes exactly
//! one user image and halts on its exit.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), no_main)]
#![allow(unsafe_code)]

mod init;
mod interrupts;
mod syscall;
mod userland;
mod vmem;

use core::hint::spin_loop;
use kernel_debugcon::debugcon_trace;
use kernel_info::boot::KernelBootInfo;

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    // The sink needs no locks and no allocation, so it works here too.
    debugcon_trace!("kernel panic: {info}\n");
    halt()
}

/// Stop instruction retirement for good. The terminal action of every fatal
/// path and of task exit.
pub fn halt() -> ! {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::asm!("cli", options(nostack, preserves_flags));
    }
    loop {
        #[cfg(target_arch = "x86_64")]
        unsafe {
            core::arch::asm!("hlt", options(nostack, preserves_flags));
        }
        spin_loop();
    }
}

/// Report a fatal condition and halt. Structural build failures (frame
/// exhaustion, relocation errors) funnel through here — partially built
/// translation structures cannot be safely left in place, so there is no
/// retry anywhere.
pub fn fatal(what: &str, err: &dyn core::fmt::Display) -> ! {
    log::error!("fatal: {what}: {err}");
    debugcon_trace!("fatal: {what}: {err}\n");
    halt()
}

/// Boot stack size.
const BOOT_STACK_SIZE: usize = 64 * 1024;

/// 16-byte aligned stack storage.
#[repr(align(16))]
struct Aligned<const N: usize>([u8; N]);

#[unsafe(link_section = ".bss.boot")]
#[unsafe(no_mangle)]
static mut BOOT_STACK: Aligned<BOOT_STACK_SIZE> = Aligned([0; BOOT_STACK_SIZE]);

/// The kernel entry point.
///
/// # ABI
/// `win64`, because the bootstrap stage is a UEFI (PE/COFF) application: the
/// `boot_info` pointer arrives in `RCX` rather than SysV's `RDI`.
///
/// # Naked function & stack
/// Naked so the stack is established by hand; the compiler must not emit a
/// prologue against a stack this code is about to replace.
#[cfg(target_arch = "x86_64")]
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub extern "win64" fn _start_kernel(_boot_info: *const KernelBootInfo) {
    core::arch::naked_asm!(
        "cli",

        // Save RCX (boot_info per win64) across the stack switch.
        "mov r12, rcx",

        // Build the boot stack and a valid call frame for kernel_entry.
        "lea rax, [rip + {stack_sym}]",
        "add rax, {stack_size}",
        "and rax, -16",
        "mov rsp, rax",
        // Emulate a CALL by pushing a dummy return address (RSP % 16 == 8).
        "push 0",
        "xor rbp, rbp",

        // boot_info into the SysV argument register.
        "mov rdi, r12",

        "jmp {rust_entry}",
        stack_sym = sym BOOT_STACK,
        stack_size = const BOOT_STACK_SIZE,
        rust_entry = sym kernel_entry,
    );
}

/// Kernel entry running on the boot stack.
///
/// `no_mangle` so [`_start_kernel`] can jump here by name; C ABI to match
/// the hand-built call frame.
#[unsafe(no_mangle)]
extern "C" fn kernel_entry(boot_info: *const KernelBootInfo) -> ! {
    debugcon_trace!("kernel: handoff received\n");

    let bi = unsafe { &*boot_info };
    init::boot(bi)
}

#[cfg(test)]
fn main() {}
