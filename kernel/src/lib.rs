//! `tile` kernel library: a small preemptive kernel for the ARM
//! Versatile Express (Cortex-A, GIC-400, PL011, PL180, SP804).
//!
//! Host builds (`cargo test` on the dev machine) use the system
//! allocator so the usual `#[test]` harness and `alloc`-backed test
//! fixtures work without standing up real physical memory; the ARM
//! target uses `mm::SmallObjectAllocator`.

#![no_std]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
#![cfg_attr(not(test), allow(dead_code))]

extern crate alloc;

#[cfg(not(target_os = "none"))]
extern crate std;

pub mod arch;
pub mod config;
pub mod device;
pub mod drivers;
pub mod error;
pub mod fifo;
pub mod fs;
pub mod irq;
pub mod kernel;
pub mod logging;
pub mod mm;
pub mod process;
pub mod sched;
pub mod sync;
pub mod syscall;
pub mod terminal;

#[cfg(all(target_arch = "arm", target_os = "none"))]
#[global_allocator]
static ALLOCATOR: mm::SmallObjectAllocator = mm::SmallObjectAllocator::new();

#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

/// Heap allocation failure is unrecoverable in a no_std kernel: there is
/// nowhere to unwind to, so this wedges into an infinite loop.
#[cfg(all(target_os = "none", not(test)))]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    log::error!("heap allocation failed: {:?}", layout);
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(all(target_os = "none", not(test)))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("kernel panic: {}", info);
    loop {
        core::hint::spin_loop();
    }
}
