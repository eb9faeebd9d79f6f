//! Page-frame allocator.
//!
//! One group per contiguous RAM region, each owning a `pages[]` array of
//! per-frame flags. Groups live in a fixed-capacity array (real machines
//! have one or two contiguous RAM regions, never dozens) rather than a
//! linked list threaded through the page metadata itself.
//!
//! The `pages[]` backing storage for each group still has to come from
//! somewhere before the heap exists, so it is carved out of the
//! `BootstrapAllocator` exactly like `memory_alloc_init`'s
//! `initmem_alloc(... * sizeof(struct memory_page_info))` call.

use crate::config::PAGE_SIZE;
use crate::error::{KernelResult, MemError};
use crate::mm::bootstrap::BootstrapAllocator;

const MAX_GROUPS: usize = 8;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u8 {
        const RESERVED = 0b0000_0001;
    }
}

struct PageGroup {
    offset: u32,
    page_count: usize,
    /// Raw pointer into bootstrap-allocated memory holding `page_count`
    /// `PageFlags` bytes, one per frame. Not a slice reference because
    /// its lifetime is "as long as the allocator exists", which Rust's
    /// borrow checker can't express for a value carved out of a raw
    /// physical-memory allocator.
    pages: *mut PageFlags,
}

// SAFETY: access to `pages` is always mediated by `FrameAllocator`,
// which is itself behind a `spin::Mutex` in `Kernel`.
unsafe impl Send for PageGroup {}

impl PageGroup {
    fn end(&self) -> u32 {
        self.offset + (self.page_count as u32) * PAGE_SIZE
    }

    fn flags(&self, index: usize) -> PageFlags {
        // SAFETY: `index < self.page_count` is checked by every caller.
        unsafe { *self.pages.add(index) }
    }

    fn set_flags(&mut self, index: usize, flags: PageFlags) {
        // SAFETY: `index < self.page_count` is checked by every caller.
        unsafe { *self.pages.add(index) = flags }
    }
}

pub struct FrameAllocator {
    groups: [Option<PageGroup>; MAX_GROUPS],
    group_count: usize,
}

impl FrameAllocator {
    /// Builds one `page_group` per entry in the bootstrap allocator's
    /// `memory` list, marking frames already in `reserved` as such
    /// (mirrors `memory_alloc_init`).
    pub fn from_bootstrap(bootstrap: &mut BootstrapAllocator) -> KernelResult<Self> {
        let mut groups: [Option<PageGroup>; MAX_GROUPS] = Default::default();
        let regions: alloc_free_regions::RegionList = bootstrap
            .memory
            .as_slice()
            .iter()
            .map(|r| (r.begin, r.size))
            .collect();

        let mut count = 0;
        for (begin, size) in regions.iter() {
            if count >= MAX_GROUPS {
                return Err(MemError::OutOfFrames.into());
            }
            let page_count = (*size / PAGE_SIZE) as usize;
            let bytes = page_count * core::mem::size_of::<PageFlags>();
            let meta_phys = bootstrap.alloc(bytes as u32, 4)?;
            let pages = crate::mm::phys::phys_to_ptr(meta_phys) as *mut PageFlags;
            // SAFETY: `meta_phys` was just reserved and is `bytes` long.
            unsafe {
                core::ptr::write_bytes(pages, 0, page_count);
            }
            let mut group = PageGroup {
                offset: *begin,
                page_count,
                pages,
            };
            for r in bootstrap.reserved.as_slice() {
                if r.end() <= group.offset || r.begin >= group.end() {
                    continue;
                }
                let start_idx = (r.begin.max(group.offset) - group.offset) / PAGE_SIZE;
                let end_idx = crate::mm::align_up(r.end().min(group.end()) - group.offset, PAGE_SIZE) / PAGE_SIZE;
                for i in start_idx..end_idx {
                    group.set_flags(i as usize, PageFlags::RESERVED);
                }
            }
            groups[count] = Some(group);
            count += 1;
        }

        Ok(FrameAllocator {
            groups,
            group_count: count,
        })
    }

    /// Walks groups, scanning indices from the first candidate `>= base`.
    /// A frame at address `a` qualifies iff it's aligned to
    /// `align_pages * PAGE_SIZE`, the range `[a - gap_pages*PAGE_SIZE, a +
    /// count*PAGE_SIZE)` is entirely unreserved, and the range lies
    /// within the group.
    pub fn alloc(&mut self, base: u32, count: u32, align_pages: u32, gap_pages: u32) -> KernelResult<u32> {
        for slot in self.groups[..self.group_count].iter_mut().flatten() {
            let group = slot;
            let align_bytes = align_pages.max(1) * PAGE_SIZE;
            let mut addr = crate::mm::align_up(group.offset.max(base), align_bytes);
            while addr + count * PAGE_SIZE <= group.end() {
                let gap_start = addr.saturating_sub(gap_pages * PAGE_SIZE);
                if gap_start >= group.offset && Self::range_free(group, gap_start, addr + count * PAGE_SIZE) {
                    let first_idx = (addr - group.offset) / PAGE_SIZE;
                    for i in 0..count {
                        group.set_flags((first_idx + i) as usize, PageFlags::RESERVED);
                    }
                    return Ok(addr);
                }
                addr += align_bytes;
            }
        }
        Err(MemError::OutOfFrames.into())
    }

    fn range_free(group: &PageGroup, begin: u32, end: u32) -> bool {
        let start_idx = (begin - group.offset) / PAGE_SIZE;
        let end_idx = (end - group.offset) / PAGE_SIZE;
        for i in start_idx..end_idx {
            if group.flags(i as usize).contains(PageFlags::RESERVED) {
                return false;
            }
        }
        true
    }

    /// Inverse of `alloc`: clears `RESERVED` on `count` frames starting
    /// at `addr`.
    pub fn clear(&mut self, addr: u32, count: u32) {
        for slot in self.groups[..self.group_count].iter_mut().flatten() {
            if addr >= slot.offset && addr + count * PAGE_SIZE <= slot.end() {
                let first_idx = (addr - slot.offset) / PAGE_SIZE;
                for i in 0..count {
                    slot.set_flags((first_idx + i) as usize, PageFlags::empty());
                }
                return;
            }
        }
    }
}

impl Default for FrameAllocator {
    fn default() -> Self {
        FrameAllocator {
            groups: Default::default(),
            group_count: 0,
        }
    }
}

/// Tiny fixed-capacity collector so `from_bootstrap` doesn't need
/// `alloc` (it runs before the heap exists).
mod alloc_free_regions {
    pub struct RegionList {
        entries: [(u32, u32); super::MAX_GROUPS],
        len: usize,
    }

    impl RegionList {
        pub fn iter(&self) -> impl Iterator<Item = &(u32, u32)> {
            self.entries[..self.len].iter()
        }
    }

    impl FromIterator<(u32, u32)> for RegionList {
        fn from_iter<T: IntoIterator<Item = (u32, u32)>>(iter: T) -> Self {
            let mut entries = [(0u32, 0u32); super::MAX_GROUPS];
            let mut len = 0;
            for item in iter {
                if len >= entries.len() {
                    break;
                }
                entries[len] = item;
                len += 1;
            }
            RegionList { entries, len }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::phys::register_fake_region;

    const FAKE_BASE: u32 = 0x4000_0000;

    /// Backs `[FAKE_BASE, FAKE_BASE + mem.len())` with `mem` so the raw
    /// pointer writes in `PageGroup` land somewhere valid, and returns
    /// the allocator plus the backing buffer (which must outlive it).
    fn frame_allocator_over(pages: u32) -> (FrameAllocator, alloc::vec::Vec<u8>) {
        let mut mem = alloc::vec![0u8; (pages * PAGE_SIZE) as usize];
        register_fake_region(FAKE_BASE, &mut mem);
        let mut bootstrap = BootstrapAllocator::new();
        bootstrap.add_memory(FAKE_BASE, pages * PAGE_SIZE).unwrap();
        (FrameAllocator::from_bootstrap(&mut bootstrap).unwrap(), mem)
    }

    #[test]
    fn alloc_respects_alignment_and_count() {
        let (mut fa, _backing) = frame_allocator_over(64);
        let a = fa.alloc(FAKE_BASE, 4, 1, 0).unwrap();
        assert_eq!(a % PAGE_SIZE, 0);
        let b = fa.alloc(FAKE_BASE, 4, 1, 0).unwrap();
        assert!(b >= a + 4 * PAGE_SIZE);
    }

    #[test]
    fn clear_allows_reallocation() {
        let (mut fa, _backing) = frame_allocator_over(16);
        let a = fa.alloc(FAKE_BASE, 2, 1, 0).unwrap();
        fa.clear(a, 2);
        let b = fa.alloc(FAKE_BASE, 2, 1, 0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn gap_pages_reserves_a_leading_frame() {
        let (mut fa, _backing) = frame_allocator_over(16);
        // Reserve a gap frame first so the next alloc must skip it.
        fa.alloc(FAKE_BASE, 1, 1, 0).unwrap();
        let a = fa.alloc(FAKE_BASE, 1, 1, 1).unwrap();
        assert!(a >= FAKE_BASE + PAGE_SIZE);
    }
}
