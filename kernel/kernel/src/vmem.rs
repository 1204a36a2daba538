//! # Kernel Address-Space Construction
//!
//! Builds the kernel's address-space root from the boot inventory: the
//! kernel image at its high base and the physical-memory window covering
//! every inventoried region. The window is what later lets the kernel
//! dereference page-table nodes given only their physical frame numbers.

use crate::fatal;
use kernel_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress, align_down, align_up};
use kernel_info::boot::{KernelBootInfo, MemoryRegion};
use kernel_info::memory::{KERNEL_BASE, KERNEL_IMAGE_MAX_BYTES, PHYS_LOAD, PHYS_WINDOW_BASE};
use kernel_vmem::{AddressSpace, FrameAlloc, MapFlags, PhysMapper};
use log::info;

/// Frame allocator over the boot-provided memory inventory.
///
/// A bump allocator per usable region: regions marked usable by the
/// bootstrap stage are free for the taking (the kernel and user images were
/// already carved out). Nothing is ever freed — allocation here backs page
/// tables and user stacks, which live until halt.
pub struct BootFrameAllocator<'a> {
    regions: &'a [MemoryRegion],
    region: usize,
    next: u64,
}

impl<'a> BootFrameAllocator<'a> {
    #[must_use]
    pub fn new(regions: &'a [MemoryRegion]) -> Self {
        let mut alloc = Self {
            regions,
            region: 0,
            next: 0,
        };
        alloc.enter_region(0);
        alloc
    }

    fn enter_region(&mut self, idx: usize) {
        self.region = idx;
        self.next = self
            .regions
            .get(idx)
            .map_or(0, |r| align_up(r.base, PAGE_SIZE));
    }

    const fn region_end(r: &MemoryRegion) -> u64 {
        r.base + r.frames * PAGE_SIZE
    }
}

impl FrameAlloc for BootFrameAllocator<'_> {
    fn allocate(&mut self, count: u64) -> Option<PhysicalAddress> {
        let bytes = count.checked_mul(PAGE_SIZE)?;
        while self.region < self.regions.len() {
            let r = &self.regions[self.region];
            if r.usable != 0 && self.next + bytes <= Self::region_end(r) {
                let pa = self.next;
                self.next += bytes;
                return Some(PhysicalAddress::new(pa));
            }
            self.enter_region(self.region + 1);
        }
        None
    }
}

/// Build the kernel address-space root.
///
/// Maps the kernel image (`KERNEL_BASE → PHYS_LOAD`) and one window mapping
/// per inventoried region at `PHYS_WINDOW_BASE + pa`. Runs under whatever
/// [`PhysMapper`] the current stage provides — identity at boot, window
/// afterwards — which is exactly why the conversion is injected.
pub fn build_kernel_space<'m, M: PhysMapper>(
    mapper: &'m M,
    alloc: &mut BootFrameAllocator<'_>,
    bi: &KernelBootInfo,
) -> AddressSpace<'m, M> {
    let space = match AddressSpace::create(mapper, alloc) {
        Ok(space) => space,
        Err(e) => fatal("allocating the kernel root", &e),
    };

    // Kernel image, high half. One blob: readable, writable, executable —
    // the linker map does not survive into the boot inventory, so text and
    // data cannot be split here.
    let image_flags = MapFlags {
        writable: true,
        user: false,
        no_execute: false,
    };
    if let Err(e) = space.map_range(
        alloc,
        VirtualAddress::new(KERNEL_BASE),
        PhysicalAddress::new(PHYS_LOAD),
        KERNEL_IMAGE_MAX_BYTES / PAGE_SIZE,
        image_flags,
    ) {
        fatal("mapping the kernel image", &e);
    }

    // The physical-memory window: every inventoried region, usable or not,
    // becomes reachable at PHYS_WINDOW_BASE + pa.
    let regions = unsafe { bi.memory.regions() };
    for r in regions {
        let base = align_down(r.base, PAGE_SIZE);
        let frames = r.frames + (r.base - base) / PAGE_SIZE;
        if let Err(e) = space.map_range(
            alloc,
            VirtualAddress::new(PHYS_WINDOW_BASE + base),
            PhysicalAddress::new(base),
            frames,
            MapFlags::kernel_data(),
        ) {
            fatal("mapping the physical-memory window", &e);
        }
    }

    // The user image must be reachable through the window too: the
    // relocation pass patches it there before the user mapping exists.
    let ui = &bi.user_image;
    if let Err(e) = space.map_range(
        alloc,
        VirtualAddress::new(PHYS_WINDOW_BASE + ui.base),
        PhysicalAddress::new(ui.base),
        ui.frames,
        MapFlags::kernel_data(),
    ) {
        fatal("mapping the user image into the window", &e);
    }

    info!(
        "kernel space built: root={}, {} inventory regions",
        space.root(),
        regions.len()
    );
    space
}
