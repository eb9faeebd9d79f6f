//! Entry point for the Versatile Express image.
//!
//! The board's boot assembly (out of scope here) is assumed to have
//! already brought up a stack and jumped here with the MMU off; `_start`
//! runs the rest of the boot sequence and hands off to the scheduler
//! loop.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
use tile_kernel::config::{PHYS_OFFSET, PMD_SIZE, TEXT_OFFSET};
#[cfg(target_os = "none")]
use tile_kernel::drivers::block::RamBlockDevice;
#[cfg(target_os = "none")]
use tile_kernel::fs;
#[cfg(target_os = "none")]
use tile_kernel::kernel::Kernel;
#[cfg(target_os = "none")]
use tile_kernel::mm::BootstrapAllocator;

/// Physical RAM on the Versatile Express model this image targets
/// (board fact, not derivable from anything the kernel computes).
#[cfg(target_os = "none")]
const RAM_SIZE: u32 = 128 * 1024 * 1024;

/// Footprint reserved for the kernel image, rounded up to whole
/// sections since the page-table engine maps it one section at a time.
#[cfg(target_os = "none")]
const KERNEL_IMAGE_SIZE: u32 = PMD_SIZE * 4;

/// Blocks in the in-memory root filesystem this build mounts. A real
/// board would instead load an `mkfs`-built image off the SD card
/// through an MCI/MMC driver; that protocol is out of scope here, so
/// boot formats a fresh [`RamBlockDevice`] in place — see
/// [`fs::format`].
#[cfg(target_os = "none")]
const ROOT_FS_BLOCKS: u32 = 4096;

#[cfg(target_os = "none")]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    let mut bootstrap = BootstrapAllocator::new();
    bootstrap
        .add_memory(PHYS_OFFSET, RAM_SIZE)
        .expect("board RAM map");
    bootstrap
        .reserve(PHYS_OFFSET, TEXT_OFFSET + KERNEL_IMAGE_SIZE)
        .expect("reserve the kernel image");

    let mut block_device = RamBlockDevice::new(ROOT_FS_BLOCKS);
    fs::format(&mut block_device, ROOT_FS_BLOCKS).expect("format root filesystem");

    let mut kernel = Kernel::init(bootstrap, block_device, KERNEL_IMAGE_SIZE).expect("mount root filesystem");

    let root = kernel.fs.root_inode();
    kernel.spawn_process(0, root).expect("spawn init process");

    log::info!(
        "tile kernel up (commit {}, built {})",
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    loop {
        kernel.scheduler.schedule(&mut kernel.processes);
        core::hint::spin_loop();
    }
}

#[cfg(not(target_os = "none"))]
fn main() {}
