//! # Address Space (PML4-rooted)
//!
//! Helpers to build and manipulate one virtual address space: a tree of
//! [`PageTable`] nodes identified by its root node — the **address-space
//! root**. Two roots exist in the running system, the kernel's and the user
//! task's; the user root's upper half aliases the kernel root's intermediate
//! nodes (see [`AddressSpace::share_upper_half`]).
//!
//! ## Design
//!
//! - All mappings are 4 KiB. Intermediate nodes are allocated lazily from the
//!   injected [`FrameAlloc`] and zeroed through the injected [`PhysMapper`].
//! - Access bits are widened at every intermediate level a mapping touches:
//!   hardware takes the least permissive level of the walk, so a
//!   user-accessible leaf is only reachable when its whole ancestor chain
//!   allows user access. Leaf bits alone carry the effective permission.
//! - Re-mapping a present leaf overwrites it; the old frame stays with the
//!   frame allocator's bookkeeping, never freed here.
//!
//! ## Safety
//!
//! - Mutating *active* mappings requires TLB maintenance (`invlpg` or CR3
//!   reload); this layer does not do it implicitly.
//! - The provided [`PhysMapper`] must yield writable references to table
//!   frames.

use crate::page_entry::PageTableEntry;
use crate::page_table::{page_offset, split_indices};
use crate::{FrameAlloc, PhysMapper, table_mut};
use kernel_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};

/// First PML4 index of the kernel (upper) half.
const UPPER_HALF_FIRST_INDEX: usize = 256;

/// Access bits requested for a new mapping.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MapFlags {
    /// Leaf is writable.
    pub writable: bool,
    /// Leaf is reachable from user mode (CPL=3).
    pub user: bool,
    /// Instruction fetch through the leaf is disallowed.
    pub no_execute: bool,
}

impl MapFlags {
    /// Kernel read/write data: supervisor-only, NX.
    #[must_use]
    pub const fn kernel_data() -> Self {
        Self {
            writable: true,
            user: false,
            no_execute: true,
        }
    }

    /// Kernel code: supervisor-only, read-only, executable.
    #[must_use]
    pub const fn kernel_code() -> Self {
        Self {
            writable: false,
            user: false,
            no_execute: false,
        }
    }

    /// User code: user-accessible, executable; writable while the loader
    /// patches relocations.
    #[must_use]
    pub const fn user_code() -> Self {
        Self {
            writable: true,
            user: true,
            no_execute: false,
        }
    }

    /// User data/stack: user-accessible, writable, NX.
    #[must_use]
    pub const fn user_data() -> Self {
        Self {
            writable: true,
            user: true,
            no_execute: true,
        }
    }
}

/// Access mode for a simulated walk, mirroring what the CPU checks.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Access {
    /// The access originates at CPL=3.
    pub user: bool,
    /// The access is a write.
    pub write: bool,
}

/// Failures while building translations.
///
/// [`FrameExhausted`](Self::FrameExhausted) is unrecoverable by contract:
/// paging structures are unusable half-built, so callers must treat it as an
/// abort condition.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    /// The physical frame allocator returned `None` mid-walk.
    #[error("physical frame allocator exhausted while building page tables")]
    FrameExhausted,

    /// The virtual address violates the canonical-address invariant.
    #[error("non-canonical virtual address 0x{0:016x}")]
    NonCanonical(u64),

    /// Virtual or physical address is not 4 KiB-aligned.
    #[error("address not aligned to a 4 KiB page boundary")]
    Misaligned,
}

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalAddress, // PML4 frame
    mapper: &'m M,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Wrap an existing root frame (e.g. read from CR3, or built elsewhere).
    #[inline]
    #[must_use]
    pub const fn from_root(mapper: &'m M, root: PhysicalAddress) -> Self {
        Self { root, mapper }
    }

    /// Allocate and zero a fresh root node.
    ///
    /// # Errors
    /// [`MapError::FrameExhausted`] if the allocator is out of frames.
    pub fn create<A: FrameAlloc>(mapper: &'m M, alloc: &mut A) -> Result<Self, MapError> {
        let root = alloc.allocate(1).ok_or(MapError::FrameExhausted)?;
        unsafe {
            table_mut(mapper, root).zero();
        }
        log::debug!("address-space root allocated at {root}");
        Ok(Self { root, mapper })
    }

    /// Physical frame of the PML4 root.
    #[inline]
    #[must_use]
    pub const fn root(&self) -> PhysicalAddress {
        self.root
    }

    /// Load CR3 with this address space's root.
    ///
    /// # Safety
    /// The kernel half of the target space must map the currently executing
    /// code and stack, or the switch ends in a fault loop. Callers handle any
    /// further TLB maintenance.
    #[cfg(target_arch = "x86_64")]
    #[inline]
    pub unsafe fn activate(&self) {
        let cr3 = self.root.as_u64();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }

    /// Install or overwrite a single 4 KiB mapping `va → pa`.
    ///
    /// Missing intermediate nodes are allocated (zeroed) on the way down.
    /// Intermediate entries along the path are widened to cover the requested
    /// access, never narrowed. An existing leaf is overwritten in place —
    /// last write wins; ownership of the displaced frame remains with the
    /// allocator.
    ///
    /// # Errors
    /// - [`MapError::NonCanonical`] for an invalid virtual address.
    /// - [`MapError::Misaligned`] when either endpoint has in-page bits set.
    /// - [`MapError::FrameExhausted`] when a node allocation fails (fatal).
    pub fn map<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: MapFlags,
    ) -> Result<(), MapError> {
        if !va.is_canonical() {
            return Err(MapError::NonCanonical(va.as_u64()));
        }
        if !va.is_aligned_to(PAGE_SIZE) || !pa.is_aligned_to(PAGE_SIZE) {
            return Err(MapError::Misaligned);
        }

        let [i4, i3, i2, i1] = split_indices(va);

        let mut node = self.root;
        for index in [i4, i3, i2] {
            node = self.descend(alloc, node, index, flags.user)?;
        }

        let pt = unsafe { table_mut(self.mapper, node) };
        pt.set(i1, PageTableEntry::leaf(pa, flags.writable, flags.user, flags.no_execute));
        Ok(())
    }

    /// Map `count` contiguous pages starting at `va → pa`.
    ///
    /// # Errors
    /// As for [`map`](Self::map); a failure leaves the pages mapped so far in
    /// place (callers abort on failure anyway).
    pub fn map_range<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        count: u64,
        flags: MapFlags,
    ) -> Result<(), MapError> {
        let mut va = va;
        let mut pa = pa;
        for _ in 0..count {
            self.map(alloc, va, pa, flags)?;
            va += PAGE_SIZE;
            pa += PAGE_SIZE;
        }
        Ok(())
    }

    /// Translate `va` to a physical address if mapped. Read-only walk.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.walk(va).map(|leaf| {
            PhysicalAddress::new(leaf.physical_address().as_u64() + page_offset(va))
        })
    }

    /// Translate `va` under an access mode, modeling the hardware permission
    /// intersection: `user` and `writable` must be granted at **every** level
    /// of the walk, not only at the leaf.
    ///
    /// Returns `None` when unmapped *or* when any level denies the access.
    #[must_use]
    pub fn translate_with_access(
        &self,
        va: VirtualAddress,
        access: Access,
    ) -> Option<PhysicalAddress> {
        if !va.is_canonical() {
            return None;
        }
        let [i4, i3, i2, i1] = split_indices(va);

        let mut node = self.root;
        for index in [i4, i3, i2] {
            let entry = unsafe { table_mut(self.mapper, node) }.get(index);
            if !entry.present() || Self::denies(entry, access) {
                return None;
            }
            node = entry.physical_address();
        }

        let leaf = unsafe { table_mut(self.mapper, node) }.get(i1);
        if !leaf.present() || Self::denies(leaf, access) {
            return None;
        }
        Some(PhysicalAddress::new(
            leaf.physical_address().as_u64() + page_offset(va),
        ))
    }

    /// Alias the kernel half into this (user) root.
    ///
    /// Copies the upper 256 PML4 entries of `kernel` by value: both roots now
    /// reference the *same* intermediate nodes, so every kernel mapping —
    /// present and future, as long as it lands under an already-published
    /// PML4 entry — is reachable from this root without copying. This is the
    /// invariant interrupt and syscall entry rely on: kernel code is mapped
    /// identically in whichever root is active at trap time.
    ///
    /// Published kernel nodes must never be reallocated or moved afterwards;
    /// re-sharing verifies (debug) that previously copied entries are
    /// unchanged.
    pub fn share_upper_half(&self, kernel: &Self) {
        let src = unsafe { table_mut(kernel.mapper, kernel.root) };
        let dst = unsafe { table_mut(self.mapper, self.root) };
        for i in UPPER_HALF_FIRST_INDEX..crate::ENTRIES_PER_TABLE {
            let entry = src.get(i);
            let existing = dst.get(i);
            debug_assert!(
                !existing.present() || existing.into_bits() == entry.into_bits(),
                "kernel PML4 entry {i} changed after being published into a user root"
            );
            dst.set(i, entry);
        }
    }

    /// True when `entry` blocks `access` at its level.
    const fn denies(entry: PageTableEntry, access: Access) -> bool {
        (access.user && !entry.user()) || (access.write && !entry.writable())
    }

    /// Follow `index` in `node`, allocating a zeroed child when absent and
    /// widening the entry's access bits to cover the request.
    fn descend<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        node: PhysicalAddress,
        index: usize,
        user: bool,
    ) -> Result<PhysicalAddress, MapError> {
        let table = unsafe { table_mut(self.mapper, node) };
        let entry = table.get(index);

        if entry.present() {
            // Widen, never narrow: another mapping may already rely on the
            // broader access.
            if user && !entry.user() {
                table.set(index, entry.with_user(true));
            }
            return Ok(entry.physical_address());
        }

        let child = alloc.allocate(1).ok_or(MapError::FrameExhausted)?;
        unsafe {
            table_mut(self.mapper, child).zero();
        }
        table.set(index, PageTableEntry::table(child, user));
        Ok(child)
    }

    /// Walk to the leaf entry for `va` without permission checks.
    fn walk(&self, va: VirtualAddress) -> Option<PageTableEntry> {
        if !va.is_canonical() {
            return None;
        }
        let [i4, i3, i2, i1] = split_indices(va);

        let mut node = self.root;
        for index in [i4, i3, i2] {
            let entry = unsafe { table_mut(self.mapper, node) }.get(index);
            if !entry.present() {
                return None;
            }
            node = entry.physical_address();
        }

        let leaf = unsafe { table_mut(self.mapper, node) }.get(i1);
        leaf.present().then_some(leaf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::split_indices;

    /// A trivial bump allocator: hands out the next 4 KiB frame, never
    /// reuses. Exactly what boot-time table construction needs.
    struct BumpAlloc {
        /// Next free physical byte address (stays 4 KiB-aligned).
        next: u64,
        /// Exclusive end (bounds check).
        end: u64,
    }

    impl BumpAlloc {
        const fn new(start: u64, end: u64) -> Self {
            Self { next: start, end }
        }
    }

    impl FrameAlloc for BumpAlloc {
        fn allocate(&mut self, count: u64) -> Option<PhysicalAddress> {
            let bytes = count * 4096;
            if self.next + bytes > self.end {
                return None;
            }
            let p = self.next;
            self.next += bytes;
            Some(PhysicalAddress::new(p))
        }
    }

    /// A 4 KiB-aligned raw frame, the "physical RAM" backing store in tests.
    #[repr(align(4096))]
    struct Aligned4K(#[allow(dead_code)] [u8; 4096]);

    /// Simulated physical memory plus a window-style mapper. Physical
    /// addresses are byte offsets from 0; frame `n` lives at `frames[n]`.
    struct TestPhys {
        frames: Vec<Aligned4K>,
    }

    impl TestPhys {
        fn with_frames(n: usize) -> Self {
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(Aligned4K([0u8; 4096]));
            }
            Self { frames: v }
        }
    }

    impl PhysMapper for TestPhys {
        unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
            let idx = usize::try_from(pa.as_u64() >> 12).unwrap();
            // Page tables are always frame-aligned; catch misuse early.
            debug_assert_eq!(pa.as_u64() & 0xfff, 0);
            let ptr = self.frames[idx..].as_ptr().cast_mut().cast::<T>();
            unsafe { &mut *ptr }
        }
    }

    fn fresh_space<'m>(phys: &'m TestPhys, alloc: &mut BumpAlloc) -> AddressSpace<'m, TestPhys> {
        AddressSpace::create(phys, alloc).expect("root allocation")
    }

    #[test]
    fn map_then_translate_roundtrip() {
        let phys = TestPhys::with_frames(64);
        let mut alloc = BumpAlloc::new(0, 64 << 12);
        let aspace = fresh_space(&phys, &mut alloc);

        let va = VirtualAddress::new(0xffff_8000_0000_0000);
        let pa = PhysicalAddress::new(0x0030_0000);

        aspace
            .map(&mut alloc, va, pa, MapFlags::kernel_data())
            .expect("map");

        assert_eq!(aspace.translate(va), Some(pa));
        // In-page offsets survive translation.
        assert_eq!(
            aspace.translate(VirtualAddress::new(va.as_u64() + 0x123)),
            Some(PhysicalAddress::new(0x0030_0123))
        );
        // Unmapped neighbours stay unmapped.
        assert_eq!(aspace.translate(VirtualAddress::new(va.as_u64() + 0x1000)), None);
        assert_eq!(aspace.translate(VirtualAddress::new(0x4000_0000)), None);
    }

    #[test]
    fn remap_is_last_write_wins_and_leaves_siblings_alone() {
        let phys = TestPhys::with_frames(64);
        let mut alloc = BumpAlloc::new(0, 64 << 12);
        let aspace = fresh_space(&phys, &mut alloc);

        // Two VAs sharing the same PT node.
        let va_a = VirtualAddress::new(0x0000_4000_0000);
        let va_b = VirtualAddress::new(0x0000_4000_1000);

        aspace
            .map(&mut alloc, va_a, PhysicalAddress::new(0x1_0000), MapFlags::user_data())
            .unwrap();
        aspace
            .map(&mut alloc, va_b, PhysicalAddress::new(0x2_0000), MapFlags::user_data())
            .unwrap();

        // Overwrite A with a different target.
        aspace
            .map(&mut alloc, va_a, PhysicalAddress::new(0x3_0000), MapFlags::user_data())
            .unwrap();

        assert_eq!(aspace.translate(va_a), Some(PhysicalAddress::new(0x3_0000)));
        // The sibling entry is untouched.
        assert_eq!(aspace.translate(va_b), Some(PhysicalAddress::new(0x2_0000)));
    }

    #[test]
    fn user_access_requires_user_bit_at_every_level() {
        let phys = TestPhys::with_frames(64);
        let mut alloc = BumpAlloc::new(0, 64 << 12);
        let aspace = fresh_space(&phys, &mut alloc);

        let va = VirtualAddress::new(0x0000_4000_0000);
        let pa = PhysicalAddress::new(0x5_0000);

        // Supervisor-only mapping: CPL=3 walk is denied, CPL=0 succeeds.
        aspace
            .map(&mut alloc, va, pa, MapFlags::kernel_data())
            .unwrap();
        assert_eq!(
            aspace.translate_with_access(va, Access { user: true, write: false }),
            None
        );
        assert_eq!(
            aspace.translate_with_access(va, Access::default()),
            Some(pa)
        );

        // Flip only the *leaf* to user-accessible, ancestors stay
        // supervisor-only: the walk must still deny user access.
        let [i4, i3, i2, i1] = split_indices(va);
        let mut node = aspace.root();
        for index in [i4, i3, i2] {
            node = unsafe { table_mut(&phys, node) }.get(index).physical_address();
        }
        let pt = unsafe { table_mut(&phys, node) };
        pt.set(i1, pt.get(i1).with_user(true));

        assert_eq!(
            aspace.translate_with_access(va, Access { user: true, write: false }),
            None
        );
    }

    #[test]
    fn user_mapping_grants_user_walk_and_write_check() {
        let phys = TestPhys::with_frames(64);
        let mut alloc = BumpAlloc::new(0, 64 << 12);
        let aspace = fresh_space(&phys, &mut alloc);

        let va = VirtualAddress::new(0x0000_4000_0000);
        let pa = PhysicalAddress::new(0x6_0000);
        aspace.map(&mut alloc, va, pa, MapFlags::user_data()).unwrap();

        assert_eq!(
            aspace.translate_with_access(va, Access { user: true, write: true }),
            Some(pa)
        );

        // Read-only user page: user read ok, user write denied.
        let ro = MapFlags { writable: false, ..MapFlags::user_data() };
        let va2 = VirtualAddress::new(0x0000_4000_1000);
        aspace.map(&mut alloc, va2, pa, ro).unwrap();
        assert_eq!(
            aspace.translate_with_access(va2, Access { user: true, write: false }),
            Some(pa)
        );
        assert_eq!(
            aspace.translate_with_access(va2, Access { user: true, write: true }),
            None
        );
    }

    #[test]
    fn non_canonical_addresses_are_rejected_not_truncated() {
        let phys = TestPhys::with_frames(64);
        let mut alloc = BumpAlloc::new(0, 64 << 12);
        let aspace = fresh_space(&phys, &mut alloc);

        // Bit 47 set, sign-extension field zero.
        let bad = VirtualAddress::new(0x0000_8000_0000_0000);
        assert_eq!(
            aspace.map(&mut alloc, bad, PhysicalAddress::new(0x1000), MapFlags::kernel_data()),
            Err(MapError::NonCanonical(0x0000_8000_0000_0000))
        );
        assert_eq!(aspace.translate(bad), None);

        // The canonicalized form is a different, valid address — proving the
        // rejection above did not silently truncate.
        let good = VirtualAddress::canonicalize(0x0000_8000_0000_0000);
        aspace
            .map(&mut alloc, good, PhysicalAddress::new(0x1000), MapFlags::kernel_data())
            .unwrap();
        assert_eq!(aspace.translate(good), Some(PhysicalAddress::new(0x1000)));
    }

    #[test]
    fn misaligned_endpoints_are_rejected() {
        let phys = TestPhys::with_frames(64);
        let mut alloc = BumpAlloc::new(0, 64 << 12);
        let aspace = fresh_space(&phys, &mut alloc);

        assert_eq!(
            aspace.map(
                &mut alloc,
                VirtualAddress::new(0x1010),
                PhysicalAddress::new(0x2000),
                MapFlags::kernel_data()
            ),
            Err(MapError::Misaligned)
        );
        assert_eq!(
            aspace.map(
                &mut alloc,
                VirtualAddress::new(0x1000),
                PhysicalAddress::new(0x2010),
                MapFlags::kernel_data()
            ),
            Err(MapError::Misaligned)
        );
    }

    #[test]
    fn map_range_maps_contiguously() {
        let phys = TestPhys::with_frames(64);
        let mut alloc = BumpAlloc::new(0, 64 << 12);
        let aspace = fresh_space(&phys, &mut alloc);

        let va = VirtualAddress::new(0x0000_4000_0000);
        let pa = PhysicalAddress::new(0x10_0000);
        aspace
            .map_range(&mut alloc, va, pa, 4, MapFlags::user_code())
            .unwrap();

        for i in 0..4u64 {
            assert_eq!(
                aspace.translate(VirtualAddress::new(va.as_u64() + i * 4096)),
                Some(PhysicalAddress::new(pa.as_u64() + i * 4096))
            );
        }
        assert_eq!(
            aspace.translate(VirtualAddress::new(va.as_u64() + 4 * 4096)),
            None
        );
    }

    #[test]
    fn exhausted_allocator_is_a_hard_error() {
        let phys = TestPhys::with_frames(64);
        // Room for the root and a single intermediate node, nothing more.
        let mut alloc = BumpAlloc::new(0, 2 << 12);
        let aspace = fresh_space(&phys, &mut alloc);

        assert_eq!(
            aspace.map(
                &mut alloc,
                VirtualAddress::new(0x0000_4000_0000),
                PhysicalAddress::new(0x1000),
                MapFlags::user_data()
            ),
            Err(MapError::FrameExhausted)
        );
    }

    #[test]
    fn shared_upper_half_aliases_kernel_nodes() {
        let phys = TestPhys::with_frames(128);
        let mut alloc = BumpAlloc::new(0, 128 << 12);

        let kernel = fresh_space(&phys, &mut alloc);
        let kva = VirtualAddress::new(0xffff_8880_0000_0000);
        kernel
            .map(&mut alloc, kva, PhysicalAddress::new(0x20_0000), MapFlags::kernel_data())
            .unwrap();

        let user = fresh_space(&phys, &mut alloc);
        user.share_upper_half(&kernel);

        // Pre-existing kernel mapping is visible through the user root.
        assert_eq!(user.translate(kva), Some(PhysicalAddress::new(0x20_0000)));
        // But not user-accessible: kernel half stays supervisor-only.
        assert_eq!(
            user.translate_with_access(kva, Access { user: true, write: false }),
            None
        );

        // A kernel mapping added *after* sharing, landing under the same
        // published PML4 entry, is also visible — shared, not copied.
        let kva2 = VirtualAddress::new(0xffff_8880_0000_3000);
        kernel
            .map(&mut alloc, kva2, PhysicalAddress::new(0x21_0000), MapFlags::kernel_data())
            .unwrap();
        assert_eq!(user.translate(kva2), Some(PhysicalAddress::new(0x21_0000)));

        // The lower half stays private.
        let uva = VirtualAddress::new(0x0000_4000_0000);
        user.map(&mut alloc, uva, PhysicalAddress::new(0x30_0000), MapFlags::user_data())
            .unwrap();
        assert_eq!(kernel.translate(uva), None);
    }
}
