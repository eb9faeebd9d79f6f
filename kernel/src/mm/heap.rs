//! Small-object allocator, layered on the page-frame allocator and
//! exposed as the kernel's `#[global_allocator]`.
//!
//! Each backing page opens with a sentinel record, and every live or
//! free block is preceded by a header carrying `(begin, size, flags,
//! next, prev)`. Headers within a page form a doubly linked chain kept
//! in address order, which is what makes coalescing with a block's
//! immediate neighbor a pointer comparison instead of a scan.
//!
//! Requests too big to fit a page go straight to the frame allocator as
//! a run of whole pages, tagged `WHOLE_PAGES` so `free` knows not to
//! look for a header chain.

use core::alloc::{GlobalAlloc, Layout};
use core::mem::size_of;

use spin::{Mutex, Once};

use crate::config::PAGE_SIZE;
use crate::mm::frame::FrameAllocator;

const MAX_HEAP_PAGES: usize = 256;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct BlockFlags: u8 {
        const FREE = 0b01;
        const WHOLE_PAGES = 0b10;
    }
}

/// Marks the start of a page carved out for sub-page allocations.
#[repr(C)]
struct PageSentinel {
    magic: u32,
}

const SENTINEL_MAGIC: u32 = 0x5062_6a41; // "Obj" ascii-ish, arbitrary

/// Precedes every returned pointer, live or free.
#[repr(C)]
struct BlockHeader {
    begin: u32,
    size: u32,
    flags: BlockFlags,
    _pad: [u8; 3],
    next: u32, // address of next header in this page's chain, 0 = none
    prev: u32, // address of previous header, 0 = none
}

const HEADER_SIZE: u32 = size_of::<BlockHeader>() as u32;
const SENTINEL_SIZE: u32 = size_of::<PageSentinel>() as u32;

impl BlockHeader {
    unsafe fn at(addr: u32) -> *mut BlockHeader {
        crate::mm::phys::phys_to_ptr(addr) as *mut BlockHeader
    }

    fn data_ptr(header_addr: u32) -> u32 {
        header_addr + HEADER_SIZE
    }
}

/// Bookkeeping for one page that has been carved up into blocks. The
/// frame allocator owns the frame itself; this just remembers where the
/// chain starts so `alloc` can walk it.
#[derive(Clone, Copy)]
struct HeapPage {
    base: u32,
    first_header: u32,
}

struct HeapState {
    pages: [Option<HeapPage>; MAX_HEAP_PAGES],
    page_count: usize,
}

impl HeapState {
    const fn new() -> Self {
        HeapState {
            pages: [None; MAX_HEAP_PAGES],
            page_count: 0,
        }
    }

    fn usable_end(page: &HeapPage) -> u32 {
        page.base + PAGE_SIZE
    }

    /// First-fit search across every known page's header chain for a
    /// free block of at least `size` bytes whose data pointer already
    /// satisfies `align`.
    fn find_fit(&self, size: u32, align: u32) -> Option<(usize, u32)> {
        for (i, slot) in self.pages[..self.page_count].iter().enumerate() {
            let page = match slot.as_ref() {
                Some(p) => p,
                None => continue,
            };
            let mut header_addr = page.first_header;
            while header_addr != 0 {
                // SAFETY: every address in a page chain was written by
                // `alloc`/`grow_page` as a valid `BlockHeader`.
                let header = unsafe { &*BlockHeader::at(header_addr) };
                let data = BlockHeader::data_ptr(header_addr);
                if header.flags.contains(BlockFlags::FREE)
                    && header.size >= size
                    && data % align == 0
                {
                    return Some((i, header_addr));
                }
                header_addr = header.next;
            }
        }
        None
    }

    fn split_or_use(&mut self, header_addr: u32, size: u32) {
        // SAFETY: `header_addr` came from `find_fit`, a live chain entry.
        let header = unsafe { &mut *BlockHeader::at(header_addr) };
        let remaining = header.size - size;
        if remaining > HEADER_SIZE + 16 {
            let new_header_addr = BlockHeader::data_ptr(header_addr) + size;
            let new_size = remaining - HEADER_SIZE;
            let next_addr = header.next;
            // SAFETY: `new_header_addr` lies within the same page, strictly
            // after the block being split and before the page's end —
            // guaranteed by `remaining > HEADER_SIZE`.
            unsafe {
                *BlockHeader::at(new_header_addr) = BlockHeader {
                    begin: BlockHeader::data_ptr(new_header_addr),
                    size: new_size,
                    flags: BlockFlags::FREE,
                    _pad: [0; 3],
                    next: next_addr,
                    prev: header_addr,
                };
            }
            if next_addr != 0 {
                // SAFETY: `next_addr` is a live chain entry.
                unsafe { (*BlockHeader::at(next_addr)).prev = new_header_addr };
            }
            header.next = new_header_addr;
            header.size = size;
        }
        header.flags.remove(BlockFlags::FREE);
    }

    /// Coalesces `header_addr` with an immediately adjacent free neighbor
    /// on either side, then frees the whole page if nothing remains.
    fn free_and_coalesce(&mut self, page_index: usize, mut header_addr: u32) {
        loop {
            // SAFETY: `header_addr` is a live chain entry.
            let header = unsafe { &*BlockHeader::at(header_addr) };
            let next_addr = header.next;
            if next_addr == 0 {
                break;
            }
            // SAFETY: `next_addr` is a live chain entry.
            let next = unsafe { &*BlockHeader::at(next_addr) };
            if !next.flags.contains(BlockFlags::FREE) {
                break;
            }
            let merged_size = header.size + HEADER_SIZE + next.size;
            let after_next = next.next;
            // SAFETY: both headers are live chain entries being merged.
            unsafe {
                (*BlockHeader::at(header_addr)).size = merged_size;
                (*BlockHeader::at(header_addr)).next = after_next;
            }
            if after_next != 0 {
                // SAFETY: `after_next` is a live chain entry.
                unsafe { (*BlockHeader::at(after_next)).prev = header_addr };
            }
        }

        loop {
            // SAFETY: `header_addr` is a live chain entry.
            let header = unsafe { &*BlockHeader::at(header_addr) };
            let prev_addr = header.prev;
            if prev_addr == 0 {
                break;
            }
            // SAFETY: `prev_addr` is a live chain entry.
            let prev = unsafe { &*BlockHeader::at(prev_addr) };
            if !prev.flags.contains(BlockFlags::FREE) {
                break;
            }
            let merged_size = prev.size + HEADER_SIZE + header.size;
            let next_addr = header.next;
            // SAFETY: both headers are live chain entries being merged.
            unsafe {
                (*BlockHeader::at(prev_addr)).size = merged_size;
                (*BlockHeader::at(prev_addr)).next = next_addr;
            }
            if next_addr != 0 {
                // SAFETY: `next_addr` is a live chain entry.
                unsafe { (*BlockHeader::at(next_addr)).prev = prev_addr };
            }
            header_addr = prev_addr;
        }

        let page = self.pages[page_index].unwrap();
        // SAFETY: `header_addr` is the (possibly merged) surviving entry.
        let header = unsafe { &*BlockHeader::at(header_addr) };
        let page_is_empty =
            header.prev == 0 && header.next == 0 && BlockHeader::data_ptr(header_addr) + header.size >= Self::usable_end(&page);
        if page_is_empty {
            self.pages[page_index] = None;
        }
    }
}

static HEAP_STATE: Mutex<HeapState> = Mutex::new(HeapState::new());
static FRAMES: Once<Mutex<FrameAllocator>> = Once::new();

/// Wires the heap to the frame allocator built during boot.
pub fn install_frame_allocator(frames: FrameAllocator) {
    FRAMES.call_once(|| Mutex::new(frames));
}

/// Grants production code outside the global-allocator path (process
/// creation, data-abort handling) access to the same `FrameAllocator`
/// instance the heap itself draws frames from, instead of a second
/// allocator that would believe the same physical memory is free.
pub fn with_frames<R>(f: impl FnOnce(&mut FrameAllocator) -> R) -> R {
    let frames = FRAMES.get().expect("frame allocator not installed");
    f(&mut frames.lock())
}

fn pages_for(bytes: u32) -> u32 {
    crate::mm::align_up(bytes, PAGE_SIZE) / PAGE_SIZE
}

/// The small-object allocator. Installed as
/// `#[global_allocator]` in `lib.rs`.
pub struct SmallObjectAllocator;

impl SmallObjectAllocator {
    pub const fn new() -> Self {
        SmallObjectAllocator
    }

    fn alloc_whole_pages(&self, size: u32) -> *mut u8 {
        let frames = FRAMES.get().expect("frame allocator not installed");
        let mut frames = frames.lock();
        let count = pages_for(size + HEADER_SIZE);
        let base = match frames.alloc(0, count, 1, 0) {
            Ok(b) => b,
            Err(_) => return core::ptr::null_mut(),
        };
        // SAFETY: `base` is a freshly allocated, exclusively owned range
        // of `count` pages.
        unsafe {
            *BlockHeader::at(base) = BlockHeader {
                begin: BlockHeader::data_ptr(base),
                size,
                flags: BlockFlags::WHOLE_PAGES,
                _pad: [0; 3],
                next: 0,
                prev: 0,
            };
        }
        crate::mm::phys::phys_to_ptr(BlockHeader::data_ptr(base))
    }

    fn grow_with_new_page(&self, state: &mut HeapState, size: u32) -> Option<(usize, u32)> {
        if state.page_count >= MAX_HEAP_PAGES {
            return None;
        }
        let frames = FRAMES.get().expect("frame allocator not installed");
        let base = frames.lock().alloc(0, 1, 1, 0).ok()?;
        // SAFETY: `base` is a freshly allocated, exclusively owned page.
        unsafe {
            *(crate::mm::phys::phys_to_ptr(base) as *mut PageSentinel) = PageSentinel { magic: SENTINEL_MAGIC };
            let header_addr = base + SENTINEL_SIZE;
            *BlockHeader::at(header_addr) = BlockHeader {
                begin: BlockHeader::data_ptr(header_addr),
                size: PAGE_SIZE - SENTINEL_SIZE - HEADER_SIZE,
                flags: BlockFlags::FREE,
                _pad: [0; 3],
                next: 0,
                prev: 0,
            };
        }
        let index = state.page_count;
        state.pages[index] = Some(HeapPage {
            base,
            first_header: base + SENTINEL_SIZE,
        });
        state.page_count += 1;
        let header_addr = state.pages[index].unwrap().first_header;
        if size <= PAGE_SIZE - SENTINEL_SIZE - HEADER_SIZE {
            Some((index, header_addr))
        } else {
            None
        }
    }
}

impl Default for SmallObjectAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: every method takes the lock around `HEAP_STATE`/`FRAMES` before
// touching shared state; no two callers observe a half-updated chain.
unsafe impl GlobalAlloc for SmallObjectAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let size = crate::mm::align_up(layout.size().max(1) as u32, 4);
        let align = layout.align().max(4) as u32;

        if size > PAGE_SIZE - SENTINEL_SIZE - HEADER_SIZE {
            return self.alloc_whole_pages(size);
        }

        let mut state = HEAP_STATE.lock();
        let found = state
            .find_fit(size, align)
            .or_else(|| self.grow_with_new_page(&mut state, size));
        match found {
            Some((page_index, header_addr)) => {
                state.split_or_use(header_addr, size);
                crate::mm::phys::phys_to_ptr(BlockHeader::data_ptr(header_addr))
            }
            None => core::ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let header_addr = crate::mm::phys::ptr_to_phys(ptr) - HEADER_SIZE;
        // SAFETY: `header_addr` is the header this allocator wrote for `ptr`.
        let header = &mut *BlockHeader::at(header_addr);

        if header.flags.contains(BlockFlags::WHOLE_PAGES) {
            let frames = FRAMES.get().expect("frame allocator not installed");
            let count = pages_for(header.size + HEADER_SIZE);
            frames.lock().clear(header_addr, count);
            return;
        }

        header.flags.insert(BlockFlags::FREE);
        let mut state = HEAP_STATE.lock();
        let page_base = header_addr & !(PAGE_SIZE - 1);
        if let Some(index) = state.pages[..state.page_count]
            .iter()
            .position(|p| p.map(|pg| pg.base) == Some(page_base))
        {
            let first = state.pages[index].unwrap().first_header;
            let mut walk = first;
            while walk != header_addr && walk != 0 {
                walk = (*BlockHeader::at(walk)).next;
            }
            if walk == header_addr {
                state.free_and_coalesce(index, header_addr);
                if state.pages[index].is_none() {
                    let frames = FRAMES.get().expect("frame allocator not installed");
                    frames.lock().clear(page_base, 1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::phys::register_fake_region;
    use crate::mm::BootstrapAllocator;

    const FAKE_BASE: u32 = 0x6000_0000;

    fn install_test_frames(pages: u32) -> alloc::vec::Vec<u8> {
        let mut buf = alloc::vec![0u8; (pages * PAGE_SIZE) as usize];
        register_fake_region(FAKE_BASE, &mut buf);
        let mut bootstrap = BootstrapAllocator::new();
        bootstrap.add_memory(FAKE_BASE, pages * PAGE_SIZE).unwrap();
        let frames = FrameAllocator::from_bootstrap(&mut bootstrap).unwrap();
        install_frame_allocator(frames);
        buf
    }

    #[test]
    fn alloc_and_free_round_trips_within_one_page() {
        // Each `#[test]` in this crate's host binary shares the process's
        // single FRAMES/HEAP_STATE statics, so only one test here touches
        // them to avoid cross-test interference.
        let _backing = install_test_frames(4);
        let heap = SmallObjectAllocator::new();
        unsafe {
            let layout = Layout::from_size_align(64, 8).unwrap();
            let a = heap.alloc(layout);
            assert!(!a.is_null());
            let b = heap.alloc(layout);
            assert!(!b.is_null());
            assert_ne!(a, b);
            heap.dealloc(a, layout);
            heap.dealloc(b, layout);
            let c = heap.alloc(layout);
            assert!(!c.is_null());
            heap.dealloc(c, layout);
        }
    }
}
