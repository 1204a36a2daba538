//! # Memory Layout
//!
//! The virtual address space is split at the canonical hole: the low half
//! belongs to the single user task, the high half to the kernel. The kernel
//! half must be mapped identically in every address-space root that ever
//! becomes active, because interrupt and syscall entry code runs from it
//! before any root switch.

/// Exclusive end of the user VA range (first byte of the canonical hole).
///
/// System-call pointer arguments are bound-checked against this value.
pub const USERSPACE_END: u64 = 0x0000_8000_0000_0000;

/// Base of the physical-memory window: [`PHYS_WINDOW_BASE`] + `pa` gives the
/// kernel access to physical memory through a fixed additive offset.
///
/// Established once during kernel-space construction, never moved afterwards.
pub const PHYS_WINDOW_BASE: u64 = 0xffff_8880_0000_0000;

/// Where the kernel executes (VMA); matches the linker script.
pub const KERNEL_BASE: u64 = 0xffff_ffff_8000_0000;

/// Where the bootstrap stage places the kernel bytes in *physical* memory
/// (LMA) before paging.
pub const PHYS_LOAD: u64 = 0x0010_0000; // 1 MiB

/// Upper bound on the kernel image; the high mapping covers this much from
/// [`PHYS_LOAD`].
pub const KERNEL_IMAGE_MAX_BYTES: u64 = 16 * 1024 * 1024;

/// Virtual base at which the user image is mapped and relocated.
pub const USER_IMAGE_BASE: u64 = 0x0000_4000_0000;

/// Top of the user stack (exclusive).
pub const USER_STACK_TOP: u64 = 0x0000_7fff_f000;

/// User stack size in bytes.
pub const USER_STACK_SIZE: u64 = 8 * 4096;

/// Size of the kernel switch stack adopted on every user→kernel transition.
pub const KERNEL_STACK_SIZE: usize = 32 * 1024;

/// Size of the dedicated IST stack for abort-class handlers (double fault).
pub const IST_STACK_SIZE: usize = 16 * 1024;

const _: () = {
    assert!(KERNEL_STACK_SIZE.is_multiple_of(4096));
    assert!(IST_STACK_SIZE.is_multiple_of(4096));
    assert!(PHYS_WINDOW_BASE >= USERSPACE_END);
    assert!(KERNEL_BASE > PHYS_WINDOW_BASE);
    assert!(USER_IMAGE_BASE < USER_STACK_TOP);
    assert!(USER_STACK_TOP < USERSPACE_END);
};
