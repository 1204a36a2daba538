//! # Boot Sequence
//!
//! The single documented initialization sequence, in dependency order:
//!
//! 1. diagnostic sink and logger;
//! 2. frame allocator over the boot inventory;
//! 3. kernel address-space root (image high mapping + physical window),
//!    then the CR3 switch onto it;
//! 4. descriptor tables and the switch stack (GDT/TSS);
//! 5. exception vectors (IDT);
//! 6. syscall fast path (MSRs);
//! 7. user task bring-up and the one-way transition to Ring 3.
//!
//! Every structure built here is built exactly once; the set-once cells and
//! the `INIT_DONE` guard turn a second pass into a reported bug instead of
//! silent corruption.

use crate::{syscall, userland, vmem};
use kernel_addresses::VirtualAddress;
use kernel_debugcon::DebugconLogger;
use kernel_gdt::CpuTables;
use kernel_info::boot::KernelBootInfo;
use kernel_info::memory::{IST_STACK_SIZE, KERNEL_STACK_SIZE, PHYS_WINDOW_BASE};
use kernel_sync::SyncOnceCell;
use kernel_vmem::OffsetMapper;
use log::{LevelFilter, info};

/// Guard: the boot sequence ran.
static INIT_DONE: SyncOnceCell<()> = SyncOnceCell::new();

/// Descriptor tables of the bootstrap CPU. `static mut` because the CPU
/// itself holds pointers into them (GDTR, TR); written only during step 4.
static mut CPU_TABLES: CpuTables = CpuTables::new();

/// 16-byte aligned stack storage.
#[repr(align(16))]
struct AlignedStack<const N: usize>([u8; N]);

/// The kernel switch stack: adopted by the CPU on every user→kernel
/// transition (TSS `rsp0`) and by the syscall entry stub. Never the stack of
/// interrupted kernel code — kernel execution is never preempted here.
static mut SWITCH_STACK: AlignedStack<KERNEL_STACK_SIZE> = AlignedStack([0; KERNEL_STACK_SIZE]);

/// Dedicated stack for the double-fault gate (TSS `ist1`).
static mut IST1_STACK: AlignedStack<IST_STACK_SIZE> = AlignedStack([0; IST_STACK_SIZE]);

fn stack_top<const N: usize>(stack: *const AlignedStack<N>) -> VirtualAddress {
    VirtualAddress::new(stack as u64 + N as u64)
}

/// Run the boot sequence and enter user mode. Never returns.
pub fn boot(bi: &KernelBootInfo) -> ! {
    // 1. Reporting first; everything after this can say why it died.
    let _ = DebugconLogger::new(LevelFilter::Info).init();
    info!("kernel boot sequence starting");

    INIT_DONE
        .set(())
        .unwrap_or_else(|_| panic!("boot sequence entered twice"));

    // 2. Physical frames come from the boot inventory from here on.
    let regions = unsafe { bi.memory.regions() };
    let mut alloc = vmem::BootFrameAllocator::new(regions);

    // 3. Build the kernel root under the bootstrap stage's address
    // conversion (identity or its own offset), then switch onto it and to
    // the kernel's own physical-memory window.
    let boot_mapper = OffsetMapper::new(bi.phys_window_offset);
    let kernel_space = vmem::build_kernel_space(&boot_mapper, &mut alloc, bi);

    #[cfg(target_arch = "x86_64")]
    unsafe {
        kernel_space.activate();
    }
    info!("kernel address space active");

    // The window established above is the conversion for the rest of the
    // kernel's lifetime.
    let window_mapper = OffsetMapper::new(PHYS_WINDOW_BASE);
    let kernel_space = kernel_vmem::AddressSpace::from_root(&window_mapper, kernel_space.root());

    // 4. Descriptor tables and the switch-stack record.
    let switch_stack_top = stack_top(&raw const SWITCH_STACK);
    #[cfg(target_arch = "x86_64")]
    {
        let ist1_top = stack_top(&raw const IST1_STACK);
        kernel_gdt::init_gdt_and_tss(unsafe { &mut *&raw mut CPU_TABLES }, switch_stack_top, ist1_top);
        info!("descriptor tables and switch stack installed");
    }

    // 5. Fault vectors.
    #[cfg(target_arch = "x86_64")]
    crate::interrupts::init();

    // 6. Service calls.
    #[cfg(target_arch = "x86_64")]
    syscall::init(switch_stack_top);

    // 7. The user image: map, relocate, drop to Ring 3.
    userland::launch(&window_mapper, &mut alloc, &kernel_space, &bi.user_image)
}
