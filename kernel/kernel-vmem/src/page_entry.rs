use bitfield_struct::bitfield;
use kernel_addresses::PhysicalAddress;

/// One 64-bit page-table entry, identical in layout at every level.
///
/// A **non-leaf** entry (PML4E/PDPTE/PDE) stores the 4 KiB-aligned physical
/// frame of the next-level node; a **leaf** entry (PTE) stores the mapped
/// physical page. The permission bits participate in the across-level
/// intersection the CPU performs on every walk:
///
/// - `present` — valid entry; when clear, the frame field is undefined and
///   every other bit is ignored.
/// - `writable`, `user` — must be set at *every* level for a user-writable
///   leaf mapping to take effect.
/// - `accessed`/`dirty` — set by the CPU; stored but not exercised here.
/// - `large_page` (bit 7) — must stay 0: this engine maps only 4 KiB leaves.
/// - `no_execute` — honored when `EFER.NXE` is enabled.
///
/// Reference: Intel SDM Vol. 3A, “4-Level Paging”.
#[bitfield(u64)]
pub struct PageTableEntry {
    /// **Present** (bit 0): valid entry if set.
    pub present: bool,

    /// **Writable** (bit 1): write permission, intersected across the walk.
    pub writable: bool,

    /// **User/Supervisor** (bit 2): user-mode access if set, intersected
    /// across the walk.
    pub user: bool,

    /// **Page Write-Through** (PWT, bit 3).
    pub write_through: bool,

    /// **Page Cache Disable** (PCD, bit 4).
    pub cache_disable: bool,

    /// **Accessed** (bit 5): set by the CPU on first access via this entry.
    pub accessed: bool,

    /// **Dirty** (bit 6): set by the CPU on first write (leaf entries).
    pub dirty: bool,

    /// **Page Size** (bit 7): must stay 0 — no large-page leaves here.
    pub large_page: bool,

    /// **Global** (bit 8): TLB entry survives CR3 reloads (leaf, kernel
    /// mappings).
    pub global: bool,

    /// OS-available bits 9..11; not interpreted by hardware.
    #[bits(3)]
    pub os_available_low: u8,

    /// Physical frame bits 12..51 (40 bits, 4 KiB-aligned target).
    #[bits(40)]
    frame: u64,

    /// OS-available bits 52..62; not interpreted by hardware.
    #[bits(11)]
    pub os_available_high: u16,

    /// **No-Execute** (NX, bit 63).
    pub no_execute: bool,
}

impl PageTableEntry {
    /// Set the target address (must be 4 KiB-aligned).
    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysicalAddress) {
        debug_assert!(phys.is_aligned_to(0x1000));
        self.set_frame(phys.frame_number());
    }

    /// Get the target address (4 KiB-aligned).
    #[inline]
    #[must_use]
    pub const fn physical_address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.frame() << 12)
    }

    /// A non-leaf entry pointing at the next-level node.
    ///
    /// Created maximally permissive in the bits the walk intersects
    /// (`writable`, and `user` when requested); the effective permission is
    /// decided at the leaf.
    #[inline]
    #[must_use]
    pub const fn table(next: PhysicalAddress, user: bool) -> Self {
        let mut e = Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user(user);
        e.set_physical_address(next);
        e
    }

    /// A 4 KiB leaf entry.
    #[inline]
    #[must_use]
    pub const fn leaf(page: PhysicalAddress, writable: bool, user: bool, no_execute: bool) -> Self {
        let mut e = Self::new()
            .with_present(true)
            .with_writable(writable)
            .with_user(user)
            .with_no_execute(no_execute);
        e.set_physical_address(page);
        e
    }

    /// The zero, non-present entry.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_roundtrip() {
        let e = PageTableEntry::leaf(PhysicalAddress::new(0x5555_0000), true, true, true);
        assert!(e.present());
        assert!(e.writable());
        assert!(e.user());
        assert!(e.no_execute());
        assert!(!e.large_page());
        assert_eq!(e.physical_address().as_u64(), 0x5555_0000);
    }

    #[test]
    fn table_entry_is_supervisor_unless_asked() {
        let e = PageTableEntry::table(PhysicalAddress::new(0x1000), false);
        assert!(e.present());
        assert!(e.writable());
        assert!(!e.user());
    }

    #[test]
    fn frame_field_occupies_bits_12_to_51() {
        let mut e = PageTableEntry::new();
        e.set_physical_address(PhysicalAddress::new(0x000f_ffff_ffff_f000));
        assert_eq!(e.into_bits() & 0x000f_ffff_ffff_f000, 0x000f_ffff_ffff_f000);
        assert_eq!(e.into_bits() & 0xfff, 0);
    }
}
