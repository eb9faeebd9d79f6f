//! Translates a `u32` "physical address" into a pointer this process
//! can actually dereference, and back.
//!
//! On the bare-metal ARM target this crate boots on, a physical
//! address and the pointer used to dereference it are the same
//! integer: the kernel runs against RAM it can already address
//! directly, before or in place of any virtual mapping. Every
//! allocator in `mm` hands out and consumes plain `u32` addresses on
//! that assumption, so this module's ARM arm is a bare cast.
//!
//! `cargo test` runs on a 64-bit host, where a real allocation's
//! pointer does not fit in a `u32` — truncating it produces a bogus
//! address that segfaults the moment anything dereferences it. Host
//! test fixtures that need backing storage for a fake physical range
//! call [`register_fake_region`] once with a small, arbitrary `u32`
//! base of their choosing and the real buffer behind it; this module
//! then reconstructs the real pointer by offset into that buffer
//! instead of casting the address directly.

#[cfg(target_arch = "arm")]
pub fn phys_to_ptr(addr: u32) -> *mut u8 {
    addr as *mut u8
}

#[cfg(target_arch = "arm")]
pub fn ptr_to_phys(ptr: *mut u8) -> u32 {
    ptr as u32
}

#[cfg(target_arch = "arm")]
pub fn register_fake_region(_base: u32, _backing: &mut [u8]) {}

#[cfg(not(target_arch = "arm"))]
pub fn phys_to_ptr(addr: u32) -> *mut u8 {
    host::translate_to_ptr(addr)
}

#[cfg(not(target_arch = "arm"))]
pub fn ptr_to_phys(ptr: *mut u8) -> u32 {
    host::translate_to_phys(ptr)
}

/// Registers `backing` as the real memory behind the fake physical
/// range `[base, base + backing.len())` for the calling thread. Tests
/// run on separate threads in `cargo test`'s default harness, so each
/// thread keeps its own region list and different tests may reuse the
/// same fake base address without colliding.
#[cfg(not(target_arch = "arm"))]
pub fn register_fake_region(base: u32, backing: &mut [u8]) {
    host::register(base, backing);
}

#[cfg(not(target_arch = "arm"))]
mod host {
    use std::cell::RefCell;

    struct Region {
        base: u32,
        len: u32,
        ptr: usize,
    }

    std::thread_local! {
        static REGIONS: RefCell<alloc::vec::Vec<Region>> = RefCell::new(alloc::vec::Vec::new());
    }

    pub fn register(base: u32, backing: &mut [u8]) {
        REGIONS.with(|regions| {
            regions.borrow_mut().push(Region {
                base,
                len: backing.len() as u32,
                ptr: backing.as_mut_ptr() as usize,
            });
        });
    }

    pub fn translate_to_ptr(addr: u32) -> *mut u8 {
        REGIONS.with(|regions| {
            for region in regions.borrow().iter() {
                if addr >= region.base && addr - region.base < region.len {
                    // SAFETY: `ptr` came from a `&mut [u8]` the caller
                    // registered and is keeping alive for as long as it
                    // stays registered.
                    return unsafe { (region.ptr as *mut u8).add((addr - region.base) as usize) };
                }
            }
            panic!(
                "phys_to_ptr: address {addr:#x} is not backed by any fake \
                 physical region registered on this thread"
            );
        })
    }

    pub fn translate_to_phys(ptr: *mut u8) -> u32 {
        let addr = ptr as usize;
        REGIONS.with(|regions| {
            for region in regions.borrow().iter() {
                if addr >= region.ptr && addr - region.ptr < region.len as usize {
                    return region.base + (addr - region.ptr) as u32;
                }
            }
            panic!(
                "ptr_to_phys: pointer {ptr:p} does not fall inside any fake \
                 physical region registered on this thread"
            );
        })
    }
}

#[cfg(all(test, not(target_arch = "arm")))]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_a_registered_region() {
        let mut backing = alloc::vec![0u8; 4096];
        register_fake_region(0x9000_0000, &mut backing);

        let ptr = phys_to_ptr(0x9000_0010);
        // SAFETY: `ptr` is within the 4096-byte backing buffer just
        // registered above.
        unsafe { *ptr = 7 };
        assert_eq!(backing[0x10], 7);
        assert_eq!(ptr_to_phys(ptr), 0x9000_0010);
    }
}
