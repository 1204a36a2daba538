//! # Kernel Boot Information
//!
//! The hand-off contract between the bootstrap stage and the kernel. All
//! structures are `#[repr(C)]` with fixed-size integers so the layout is
//! stable across the ABI boundary.

/// Kernel entry function pointer.
///
/// # ABI
/// The ABI is `win64` since the kernel is entered from a UEFI (PE/COFF)
/// application; the boot-info pointer arrives in `RCX`.
pub type KernelEntryFn = extern "win64" fn(*const KernelBootInfo) -> !;

/// Information the kernel needs right after the firmware hand-off.
#[repr(C)]
#[derive(Clone)]
pub struct KernelBootInfo {
    /// Physical memory inventory.
    pub memory: MemoryInventory,

    /// Additive offset establishing the physical-memory window at hand-off
    /// time. `0` means the bootstrap stage identity-mapped physical memory.
    pub phys_window_offset: u64,

    /// Location of the raw user image in physical memory.
    pub user_image: UserImageInfo,
}

/// Physical memory inventory: a pointer/length pair over [`MemoryRegion`]
/// entries living in boot memory.
#[repr(C)]
#[derive(Clone)]
pub struct MemoryInventory {
    /// Pointer to the first region descriptor, or 0 if none were handed over.
    pub regions_ptr: u64,

    /// Number of region descriptors.
    pub regions_len: u64,
}

/// One physically contiguous run of page frames.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct MemoryRegion {
    /// Physical base address, 4 KiB-aligned.
    pub base: u64,

    /// Length in 4 KiB frames.
    pub frames: u64,

    /// Non-zero if the kernel may allocate from this region.
    pub usable: u32,

    /// Must be zero.
    pub _reserved: u32,
}

/// Physical placement of the raw user image.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct UserImageInfo {
    /// Physical base address of the first image byte, 4 KiB-aligned.
    pub base: u64,

    /// Image length in 4 KiB frames.
    pub frames: u64,

    /// Image length in bytes (may be shorter than `frames * 4096`).
    pub bytes: u64,
}

impl MemoryInventory {
    /// View the inventory as a slice of regions.
    ///
    /// # Safety
    /// `regions_ptr`/`regions_len` must describe a live, correctly aligned
    /// array of [`MemoryRegion`] readable for the lifetime of the returned
    /// slice.
    #[must_use]
    pub unsafe fn regions(&self) -> &[MemoryRegion] {
        if self.regions_ptr == 0 {
            return &[];
        }
        unsafe {
            core::slice::from_raw_parts(
                self.regions_ptr as *const MemoryRegion,
                usize::try_from(self.regions_len).unwrap_or(0),
            )
        }
    }
}
