//! Two-level ARMv7-A short-descriptor page-table engine.
//!
//! A page global directory (PGD) indexed by `addr[31:20]` holds either a
//! 1 MiB section entry or a pointer to a page middle directory (PMD)
//! indexed by `addr[19:12]`, each entry of which maps one 4 KiB page.
//! Bit 0 of the PGD entry distinguishes "page table" (1) from "section"
//! (0).
//!
//! This is built and mutated with the MMU off or through an identity
//! mapping — `create_mapping`
//! and friends work on physical pointers to table memory, not through
//! the translation they're building.

use crate::config::{PAGES_PER_PAGE_TABLE, PAGE_SHIFT, PAGE_SIZE, PG_DIR_SHIFT, PG_DIR_SIZE, PMD_SIZE};
use crate::error::{KernelResult, MemError};
use crate::mm::frame::FrameAllocator;

const PGD_ENTRIES: usize = (PG_DIR_SIZE / 4) as usize;

bitflags::bitflags! {
    /// Flag encoding for both section and page-table entries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MappingFlags: u32 {
        /// Execute-never clear, kernel read/write.
        const RWX = 0b001;
        /// Execute-never set, kernel read/write.
        const RW  = 0b010;
        /// Execute-never set, read-only.
        const RO  = 0b100;
    }
}

const PGD_PAGE_TABLE_BIT: u32 = 0b01;
const PGD_SECTION_BIT: u32 = 0b10;

fn section_entry(phys_base: u32, flags: MappingFlags) -> u32 {
    let mut entry = (phys_base & !0xfffff) | PGD_SECTION_BIT;
    if flags.contains(MappingFlags::RO) {
        entry |= 1 << 15; // AP[2] read-only
    }
    if !flags.contains(MappingFlags::RWX) {
        entry |= 1 << 4; // XN (execute-never)
    }
    entry |= 0b11 << 10; // AP[1:0] = kernel RW, no user access
    entry
}

fn page_table_entry(pt_phys: u32) -> u32 {
    (pt_phys & !0x3ff) | PGD_PAGE_TABLE_BIT
}

fn pte_entry(phys: u32, flags: MappingFlags) -> u32 {
    let mut entry = (phys & !0xfff) | 0b10; // small page, bit1 set
    if flags.contains(MappingFlags::RO) {
        entry |= 1 << 9;
    }
    if !flags.contains(MappingFlags::RWX) {
        entry |= 1; // XN for small pages is bit 0
    }
    entry |= 0b11 << 4; // AP[1:0] kernel RW
    entry
}

/// Index into the PGD for virtual address `v` (`addr[31:20]`).
pub fn pgd_index(v: u32) -> usize {
    (v >> PG_DIR_SHIFT) as usize
}

/// Index into a PMD/page table for virtual address `v` (`addr[19:12]`).
pub fn pte_index(v: u32) -> usize {
    ((v >> PAGE_SHIFT) & (PAGES_PER_PAGE_TABLE - 1)) as usize
}

/// A two-level translation table. Holds only the physical base of its
/// PGD; every access goes through raw pointers because this runs with
/// the MMU off or identity-mapped.
pub struct PageTable {
    pgd_phys: u32,
}

impl PageTable {
    /// Wraps an already-allocated, zeroed PGD.
    pub fn from_existing(pgd_phys: u32) -> Self {
        PageTable { pgd_phys }
    }

    fn pgd_slice(&self) -> &'static mut [u32] {
        // SAFETY: `pgd_phys` is PG_DIR_SIZE-aligned and PG_DIR_SIZE bytes
        // long, reserved for exclusive use as a PGD.
        unsafe {
            core::slice::from_raw_parts_mut(crate::mm::phys::phys_to_ptr(self.pgd_phys) as *mut u32, PGD_ENTRIES)
        }
    }

    pub fn physical_base(&self) -> u32 {
        self.pgd_phys
    }

    /// Allocates a PG_DIR_SIZE-aligned PGD, zeroes user-space entries,
    /// and copies kernel-space entries from `kernel`. Kernel entries are
    /// identical across every process PGD.
    pub fn create_pgd(frames: &mut FrameAllocator, kernel: &PageTable) -> KernelResult<Self> {
        let pages_needed = PG_DIR_SIZE / PAGE_SIZE;
        let phys = frames.alloc(0, pages_needed, pages_needed, 0)?;
        let table = PageTable::from_existing(phys);
        let dst = table.pgd_slice();
        let src = kernel.pgd_slice();
        let split = crate::config::VIRT_OFFSET >> PG_DIR_SHIFT;
        for i in 0..dst.len() {
            dst[i] = if i >= split as usize { src[i] } else { 0 };
        }
        Ok(table)
    }

    /// For each 1 MiB chunk of `[v, v+size)`: if `size` is a multiple of
    /// 1 MiB, write a section entry directly; otherwise allocate or
    /// reuse a page table and fill 4 KiB PTEs. A newly allocated page
    /// table that maps itself is populated before being installed in
    /// the PGD.
    pub fn create_mapping(
        &mut self,
        frames: &mut FrameAllocator,
        v: u32,
        p: u32,
        size: u32,
        flags: MappingFlags,
    ) -> KernelResult<()> {
        if !crate::mm::is_aligned(v, PAGE_SIZE) || !crate::mm::is_aligned(p, PAGE_SIZE) {
            return Err(MemError::Misaligned.into());
        }

        if size % PMD_SIZE == 0 && crate::mm::is_aligned(v, PMD_SIZE) && crate::mm::is_aligned(p, PMD_SIZE) {
            let mut off = 0;
            while off < size {
                let idx = pgd_index(v + off);
                self.pgd_slice()[idx] = section_entry(p + off, flags);
                off += PMD_SIZE;
            }
            return Ok(());
        }

        let mut off = 0;
        while off < size {
            let chunk_v = v + off;
            let chunk_remaining = (size - off).min(PMD_SIZE - (chunk_v % PMD_SIZE));
            let pt_phys = self.ensure_page_table(frames, chunk_v)?;
            let pt = unsafe {
                core::slice::from_raw_parts_mut(
                    crate::mm::phys::phys_to_ptr(pt_phys) as *mut u32,
                    PAGES_PER_PAGE_TABLE as usize,
                )
            };
            let mut inner = 0;
            while inner < chunk_remaining {
                let page_v = chunk_v + inner;
                pt[pte_index(page_v)] = pte_entry(p + off + inner, flags);
                inner += PAGE_SIZE;
            }
            off += chunk_remaining;
        }
        Ok(())
    }

    /// Returns the physical base of the page table backing `v`'s 1 MiB
    /// chunk, allocating and installing one if the PGD entry is empty.
    fn ensure_page_table(&mut self, frames: &mut FrameAllocator, v: u32) -> KernelResult<u32> {
        let idx = pgd_index(v);
        let existing = self.pgd_slice()[idx];
        if existing & PGD_PAGE_TABLE_BIT != 0 {
            return Ok(existing & !0x3ff);
        }
        let pt_phys = frames.alloc(0, 1, 1, 0)?;
        // SAFETY: freshly allocated frame, exclusive use as a page table.
        unsafe {
            core::ptr::write_bytes(
                crate::mm::phys::phys_to_ptr(pt_phys) as *mut u32,
                0,
                PAGES_PER_PAGE_TABLE as usize,
            );
        }
        // Install last: if this table's own virtual address lies inside
        // the range being mapped it must already be populated before the
        // PGD entry exists, so a fault during that population can't walk
        // into a half-built table.
        self.pgd_slice()[idx] = page_table_entry(pt_phys);
        Ok(pt_phys)
    }

    /// Builds the kernel's own PGD: the kernel image (`kernel_image_size`
    /// bytes starting at `virt_offset`/`phys_offset`) mapped as one or
    /// more RWX sections, plus a page mapping for each MMIO window.
    /// Installing TTBR0 with this PGD is left to the boot assembly this
    /// crate doesn't own.
    pub fn new_kernel(
        frames: &mut FrameAllocator,
        phys_offset: u32,
        virt_offset: u32,
        kernel_image_size: u32,
    ) -> KernelResult<Self> {
        let pages_needed = PG_DIR_SIZE / PAGE_SIZE;
        let pgd_phys = frames.alloc(0, pages_needed, pages_needed, 0)?;
        // SAFETY: `pgd_phys` is a freshly allocated, exclusively owned PGD.
        unsafe { core::ptr::write_bytes(crate::mm::phys::phys_to_ptr(pgd_phys), 0, PG_DIR_SIZE as usize) };
        let mut table = PageTable::from_existing(pgd_phys);

        let image_size = crate::mm::align_up(kernel_image_size.max(1), PMD_SIZE);
        table.create_mapping(frames, virt_offset, phys_offset, image_size, MappingFlags::RWX)?;

        for &(vaddr, paddr) in &[
            (crate::config::UART0_VADDR, crate::config::UART0_PADDR),
            (crate::config::MCI_VADDR, crate::config::MCI_PADDR),
            (crate::config::GICD_VADDR, crate::config::GICD_PADDR),
            (crate::config::GICC_VADDR, crate::config::GICC_PADDR),
            (crate::config::TIMER_VADDR, crate::config::TIMER_PADDR),
        ] {
            table.create_mapping(frames, vaddr, paddr, PAGE_SIZE, MappingFlags::RW)?;
        }

        Ok(table)
    }

    /// Translation-table walk: does `v` currently map to a region
    /// containing `p`?
    pub fn mapping_exists(&self, v: u32, p: u32) -> bool {
        let pgd_entry = self.pgd_slice()[pgd_index(v)];
        if pgd_entry == 0 {
            return false;
        }
        if pgd_entry & PGD_PAGE_TABLE_BIT == 0 {
            let base = pgd_entry & !0xfffff;
            let section_off = v & 0xfffff;
            return base + section_off == p;
        }
        let pt_phys = pgd_entry & !0x3ff;
        let pt = unsafe {
            core::slice::from_raw_parts(
                crate::mm::phys::phys_to_ptr(pt_phys) as *const u32,
                PAGES_PER_PAGE_TABLE as usize,
            )
        };
        let pte = pt[pte_index(v)];
        if pte & 0b10 == 0 {
            return false;
        }
        let base = pte & !0xfff;
        let page_off = v & 0xfff;
        base + page_off == p
    }

    /// Whether `v` has any valid translation at all, regardless of what
    /// it points to. The data-abort handler uses this to tell a genuine
    /// first fault from a second fault on an already-mapped page.
    pub fn is_mapped(&self, v: u32) -> bool {
        let pgd_entry = self.pgd_slice()[pgd_index(v)];
        if pgd_entry == 0 {
            return false;
        }
        if pgd_entry & PGD_PAGE_TABLE_BIT == 0 {
            return true;
        }
        let pt_phys = pgd_entry & !0x3ff;
        let pt = unsafe {
            core::slice::from_raw_parts(
                crate::mm::phys::phys_to_ptr(pt_phys) as *const u32,
                PAGES_PER_PAGE_TABLE as usize,
            )
        };
        pt[pte_index(v)] & 0b10 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::phys::{phys_to_ptr, register_fake_region};

    const FAKE_BASE: u32 = 0x5000_0000;

    fn frame_allocator_over_vec(pages: u32) -> (FrameAllocator, alloc::vec::Vec<u8>) {
        let mut buf = alloc::vec![0u8; (pages * PAGE_SIZE) as usize];
        register_fake_region(FAKE_BASE, &mut buf);
        let mut bootstrap = crate::mm::BootstrapAllocator::new();
        bootstrap.add_memory(FAKE_BASE, pages * PAGE_SIZE).unwrap();
        (FrameAllocator::from_bootstrap(&mut bootstrap).unwrap(), buf)
    }

    #[test]
    fn section_mapping_is_faithful() {
        let (mut frames, _backing) = frame_allocator_over_vec(16);
        let pgd_phys = frames.alloc(0, (PG_DIR_SIZE / PAGE_SIZE).max(1), 1, 0).unwrap();
        unsafe { core::ptr::write_bytes(phys_to_ptr(pgd_phys), 0, PG_DIR_SIZE as usize) };
        let mut pt = PageTable::from_existing(pgd_phys);

        let v = 0xc000_0000u32;
        let p = 0x8000_0000u32;
        pt.create_mapping(&mut frames, v, p, PMD_SIZE, MappingFlags::RWX).unwrap();

        for off in [0u32, 0x1000, PMD_SIZE - 1] {
            assert!(pt.mapping_exists(v + off, p + off));
        }
        assert!(!pt.mapping_exists(v + PMD_SIZE, p + PMD_SIZE));
    }

    #[test]
    fn new_kernel_maps_image_and_mmio_windows() {
        let (mut frames, _backing) = frame_allocator_over_vec(64);
        let phys_offset = 0x8000_0000u32;
        let virt_offset = 0xc000_0000u32;
        let table = PageTable::new_kernel(&mut frames, phys_offset, virt_offset, PMD_SIZE).unwrap();
        assert!(table.mapping_exists(virt_offset, phys_offset));
        assert!(table.mapping_exists(
            crate::config::UART0_VADDR,
            crate::config::UART0_PADDR
        ));
    }

    #[test]
    fn page_granularity_mapping_is_faithful() {
        let (mut frames, _backing) = frame_allocator_over_vec(16);
        let pgd_phys = frames.alloc(0, (PG_DIR_SIZE / PAGE_SIZE).max(1), 1, 0).unwrap();
        unsafe { core::ptr::write_bytes(phys_to_ptr(pgd_phys), 0, PG_DIR_SIZE as usize) };
        let mut pt = PageTable::from_existing(pgd_phys);

        let v = 0xffc0_0000u32;
        let p = 0x1c09_0000u32;
        pt.create_mapping(&mut frames, v, p, PAGE_SIZE, MappingFlags::RW).unwrap();
        assert!(pt.mapping_exists(v, p));
        assert!(!pt.mapping_exists(v + PAGE_SIZE, p + PAGE_SIZE));
    }
}
