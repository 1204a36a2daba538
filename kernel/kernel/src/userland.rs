//! # Single User Task Bring-Up
//!
//! Builds the user address-space root, maps the raw image and a guarded
//! stack into its lower half, resolves the image's relocations for the base
//! chosen here, and performs the one-way transition to Ring 3.

use crate::fatal;
use crate::vmem::BootFrameAllocator;
use kernel_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};
use kernel_gdt::TrapFrame;
use kernel_info::boot::UserImageInfo;
use kernel_info::memory::{PHYS_WINDOW_BASE, USER_IMAGE_BASE, USER_STACK_SIZE, USER_STACK_TOP};
use kernel_vmem::{AddressSpace, FrameAlloc, MapFlags, PhysMapper};
use log::info;

/// Map the user image and stack, relocate, and enter user mode. Does not
/// return: thereafter the kernel only runs inside trap and syscall entries.
pub fn launch<M: PhysMapper>(
    mapper: &M,
    alloc: &mut BootFrameAllocator<'_>,
    kernel_space: &AddressSpace<'_, M>,
    image: &UserImageInfo,
) -> ! {
    // The task-private root; its upper half aliases the kernel's nodes so
    // trap entry code stays reachable after the root switch.
    let user_space = match AddressSpace::create(mapper, alloc) {
        Ok(space) => space,
        Err(e) => fatal("allocating the user root", &e),
    };
    user_space.share_upper_half(kernel_space);

    // Image pages: user-reachable, executable, and writable so the
    // relocation pass below can patch in place.
    if let Err(e) = user_space.map_range(
        alloc,
        VirtualAddress::new(USER_IMAGE_BASE),
        PhysicalAddress::new(image.base),
        image.frames,
        MapFlags::user_code(),
    ) {
        fatal("mapping the user image", &e);
    }

    // Stack: fresh frames below USER_STACK_TOP, NX, with one unmapped guard
    // page underneath so runaway growth faults instead of corrupting.
    let stack_pages = USER_STACK_SIZE / PAGE_SIZE;
    let stack_base = USER_STACK_TOP - USER_STACK_SIZE;
    for i in 0..stack_pages {
        let Some(frame) = alloc.allocate(1) else {
            fatal("allocating the user stack", &kernel_vmem::MapError::FrameExhausted);
        };
        if let Err(e) = user_space.map(
            alloc,
            VirtualAddress::new(stack_base + i * PAGE_SIZE),
            frame,
            MapFlags::user_data(),
        ) {
            fatal("mapping the user stack", &e);
        }
    }

    // Patch the image through the physical-memory window: the pointers it
    // carries are unresolved until this base is chosen.
    let bytes = unsafe {
        core::slice::from_raw_parts_mut(
            (PHYS_WINDOW_BASE + image.base) as *mut u8,
            usize::try_from(image.bytes).unwrap_or(0),
        )
    };
    let entry = match kernel_image::load_and_relocate(bytes, VirtualAddress::new(USER_IMAGE_BASE)) {
        Ok(entry) => entry,
        Err(e) => fatal("relocating the user image", &e),
    };

    info!(
        "user task ready: entry={entry}, stack top={:#x}",
        USER_STACK_TOP
    );

    unsafe { enter_user_mode(&user_space, entry, VirtualAddress::new(USER_STACK_TOP)) }
}

/// The one-way transition into user mode: activate the task's address-space
/// root, write the synthetic [`TrapFrame`] to the top of the user stack,
/// point the stack register at it, and execute the privilege return.
///
/// Returning from this function would mean the return instruction itself
/// faulted; the fall-through halts to make that state visible.
///
/// # Safety
/// - `space` must map `entry` as user-executable code and `user_stack_top`
///   as user-writable memory, with the kernel half shared.
/// - The switch stack and descriptor tables must be installed, or the first
///   trap from user mode is unrecoverable.
pub unsafe fn enter_user_mode<M: PhysMapper>(
    space: &AddressSpace<'_, M>,
    entry: VirtualAddress,
    user_stack_top: VirtualAddress,
) -> ! {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        space.activate();

        let frame = TrapFrame::user(entry, user_stack_top);
        let frame_base = frame.write_to_stack(user_stack_top);
        kernel_gdt::frame::return_to_lower_privilege(frame_base)
    }

    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = (space, entry, user_stack_top);
        crate::halt()
    }
}
