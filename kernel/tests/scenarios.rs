//! End-to-end scenarios, exercised entirely through
//! `tile_kernel`'s public API rather than its `#[cfg(test)]`-private
//! fixtures — this crate is built and linked as an ordinary external
//! test binary, the same boundary a real userland client would see.

use tile_kernel::drivers::block::{BlockDevice, RamBlockDevice};
use tile_kernel::fs::{self, Filesystem};
use tile_kernel::irq;
use tile_kernel::kernel::Kernel;
use tile_kernel::mm::page_table::{MappingFlags, PageTable};
use tile_kernel::mm::phys::{phys_to_ptr, register_fake_region};
use tile_kernel::mm::{BootstrapAllocator, FrameAllocator};
use tile_kernel::process::{PageRegion, ProcessTable};
use tile_kernel::sched::Scheduler;
use tile_kernel::syscall::{dispatch, Syscall};

use fslayout::{Access, AccessCheck, FileType, OpenFlags, BLOCK_SIZE, CONSOLE_MAJOR, CONSOLE_MINOR, L1_END, L1_INDEX, L2_INDEX};

const TOTAL_BLOCKS: u32 = 4096;
const FAKE_PHYS_BASE: u32 = 0x8000_0000;
const FAKE_USER_BASE: u32 = 0x9000_0000;
const FAKE_USER_STRIDE: u32 = 0x1_0000;

/// Claims a slice of the fake "user-space" range for `bytes` and
/// returns the address a syscall caller would pass for it. Mirrors how
/// a real userland buffer's virtual address doubles as the pointer a
/// trapped syscall dereferences directly.
fn user_ptr(bytes: &mut [u8]) -> u32 {
    use std::sync::atomic::{AtomicU32, Ordering};
    static NEXT: AtomicU32 = AtomicU32::new(FAKE_USER_BASE);
    assert!((bytes.len() as u32) < FAKE_USER_STRIDE);
    let base = NEXT.fetch_add(FAKE_USER_STRIDE, Ordering::Relaxed);
    register_fake_region(base, bytes);
    base
}

fn formatted_device(total_blocks: u32) -> RamBlockDevice {
    let mut device = RamBlockDevice::new(total_blocks);
    fs::format(&mut device, total_blocks).unwrap();
    device
}

/// Backs a fake physical range at `FAKE_PHYS_BASE` with a real `Vec`,
/// so addresses the frame allocator hands out can actually be
/// dereferenced on a 64-bit test host. The returned `Vec` must stay
/// alive for as long as the allocator is used.
fn frames_over_vec(pages: u32) -> (FrameAllocator, Vec<u8>) {
    let mut buf = vec![0u8; (pages * tile_kernel::config::PAGE_SIZE) as usize];
    register_fake_region(FAKE_PHYS_BASE, &mut buf);
    let mut bootstrap = BootstrapAllocator::new();
    bootstrap.add_memory(FAKE_PHYS_BASE, pages * tile_kernel::config::PAGE_SIZE).unwrap();
    (FrameAllocator::from_bootstrap(&mut bootstrap).unwrap(), buf)
}

fn kernel_page_table(frames: &mut FrameAllocator) -> PageTable {
    let pages_needed = tile_kernel::config::PG_DIR_SIZE / tile_kernel::config::PAGE_SIZE;
    let phys = frames.alloc(0, pages_needed, pages_needed, 0).unwrap();
    unsafe { core::ptr::write_bytes(phys_to_ptr(phys), 0, tile_kernel::config::PG_DIR_SIZE as usize) };
    PageTable::from_existing(phys)
}

/// Host-side `Kernel` built directly on a `RamBlockDevice`, mirroring
/// what `mkfs` would have produced on a real board.
fn boot_kernel(total_blocks: u32) -> Kernel<RamBlockDevice> {
    let device = formatted_device(total_blocks);
    let mut bootstrap = BootstrapAllocator::new();
    let buf = vec![0u8; 256 * tile_kernel::config::PAGE_SIZE as usize].leak();
    register_fake_region(FAKE_PHYS_BASE, buf);
    bootstrap
        .add_memory(FAKE_PHYS_BASE, 256 * tile_kernel::config::PAGE_SIZE)
        .unwrap();
    Kernel::init(bootstrap, device, tile_kernel::config::PMD_SIZE).unwrap()
}

/// `mkfs`-shaped layout (root plus a standard top-level directory)
/// resolves by name, and an absent name fails with `NotFound`.
#[test]
fn path_resolution_against_a_freshly_formatted_image() {
    let device = formatted_device(TOTAL_BLOCKS);
    let mut filesystem = Filesystem::mount(device).unwrap();
    let root = filesystem.root_inode();

    let sbin = filesystem
        .mknod(root, "sbin", FileType::Directory, Access::all(), 0, 0, 0)
        .unwrap();

    assert_eq!(filesystem.name_to_file("/", root, 0).unwrap(), root);
    assert_eq!(filesystem.name_to_file("/sbin", root, 0).unwrap(), sbin);
    assert!(filesystem.name_to_file("/missing", root, 0).is_err());
}

/// create, write, seek back to the start, close, reopen read-only,
/// and read back the same bytes — entirely through the syscall ABI
///, the way a userland process would.
#[test]
fn creat_write_seek_read_round_trip_through_the_syscall_abi() {
    let mut kernel = boot_kernel(TOTAL_BLOCKS);
    let root = kernel.fs.root_inode();
    kernel
        .fs
        .mknod(root, "tmp", FileType::Directory, Access::all(), 0, 0, 0)
        .unwrap();
    let pid = kernel.spawn_process(0, root).unwrap();

    let mut path = *b"/tmp/greeting";
    let path_ptr = user_ptr(&mut path);
    let fd = dispatch(
        &mut kernel,
        pid,
        Syscall::Creat as u32,
        [path_ptr, path.len() as u32, Access::READ_OWNER.bits() | Access::WRITE_OWNER.bits(), 0, 0, 0, 0],
    );
    assert!(fd >= 0);
    let fd = fd as u32;

    let mut message = *b"hello, tile";
    let message_len = message.len();
    let message_ptr = user_ptr(&mut message);
    let written = dispatch(
        &mut kernel,
        pid,
        Syscall::Write as u32,
        [fd, message_ptr, message_len as u32, 0, 0, 0, 0],
    );
    assert_eq!(written, message.len() as i32);

    assert_eq!(dispatch(&mut kernel, pid, Syscall::Seek as u32, [fd, 0, 0, 0, 0, 0, 0]), 0);
    assert_eq!(dispatch(&mut kernel, pid, Syscall::Close as u32, [fd, 0, 0, 0, 0, 0, 0]), 0);

    let fd = dispatch(
        &mut kernel,
        pid,
        Syscall::Open as u32,
        [path_ptr, path.len() as u32, OpenFlags::O_RDONLY.bits(), 0, 0, 0, 0],
    );
    assert!(fd >= 0);
    let fd = fd as u32;

    let mut buf = [0u8; 32];
    let buf_len = buf.len();
    let buf_ptr = user_ptr(&mut buf);
    let read = dispatch(
        &mut kernel,
        pid,
        Syscall::Read as u32,
        [fd, buf_ptr, buf_len as u32, 0, 0, 0, 0],
    );
    assert_eq!(read, message_len as i32);
    assert_eq!(&buf[..read as usize], &message);
}

/// a write long enough to force single- and double-indirect block
/// allocation reads back byte-for-byte, and the indirect pointers it
/// had to populate are non-zero afterwards.
#[test]
fn large_write_crosses_into_double_indirect_blocks() {
    let device = formatted_device(TOTAL_BLOCKS);
    let mut filesystem = Filesystem::mount(device).unwrap();
    let root = filesystem.root_inode();
    let file = filesystem.creat(root, "big", Access::all(), 0, 0, 0).unwrap();

    let len = (L1_END as usize) + BLOCK_SIZE + 1;
    let mut data = vec![0u8; len];
    for (i, byte) in data.iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }

    let written = filesystem.write(file, 0, &data).unwrap();
    assert_eq!(written, data.len());

    let inode = filesystem.get_inode(file).unwrap();
    assert_ne!(inode.blocks[L1_INDEX], 0);
    assert_ne!(inode.blocks[L2_INDEX], 0);

    let mut readback = vec![0u8; data.len()];
    let read = filesystem.read(file, 0, &mut readback).unwrap();
    assert_eq!(read, data.len());
    assert_eq!(readback, data);
}

/// two equal-priority processes ticked for an even number of
/// rounds each accumulate ⌊N/2⌋±1 time slices, per the scheduler
/// fairness property.
#[test]
fn round_robin_fairness_over_many_ticks() {
    let (mut frames, _backing) = frames_over_vec(256);
    let kernel_pt = kernel_page_table(&mut frames);
    let mut table = ProcessTable::new();
    let a = table.spawn(0, 1, &mut frames, &kernel_pt).unwrap();
    let b = table.spawn(0, 1, &mut frames, &kernel_pt).unwrap();
    let mut scheduler = Scheduler::new();
    scheduler.add(a);
    scheduler.add(b);

    const ROUNDS: u32 = 20;
    let mut slices = std::collections::HashMap::new();
    for _ in 0..ROUNDS {
        *slices.entry(scheduler.current().unwrap()).or_insert(0u32) += 1;
        scheduler.tick(&mut table);
        scheduler.schedule(&mut table);
    }

    let count_a = *slices.get(&a).unwrap_or(&0);
    let count_b = *slices.get(&b).unwrap_or(&0);
    assert_eq!(count_a + count_b, ROUNDS);
    assert!((count_a as i64 - count_b as i64).abs() <= 1);
}

/// root always passes an access check; a non-owner without
/// `WRITE_OTHERS` on `/dev/console` is refused write access.
#[test]
fn console_device_access_control() {
    let mut kernel = boot_kernel(TOTAL_BLOCKS);
    let root = kernel.fs.root_inode();
    let dev = kernel
        .fs
        .mknod(root, "dev", FileType::Directory, Access::all(), 0, 0, 0)
        .unwrap();
    let console = kernel
        .fs
        .mknod(dev, "console", FileType::CharDevice, Access::READ_OWNER | Access::WRITE_OWNER, 0, 0, 0)
        .unwrap();
    kernel.fs.set_device(console, CONSOLE_MAJOR, CONSOLE_MINOR).unwrap();

    assert!(kernel.fs.access(console, 0, AccessCheck::W_OK).is_ok());

    let guest = kernel.spawn_process(1000, root).unwrap();
    let guest_euid = kernel.processes.get(guest).unwrap().euid;
    assert!(kernel.fs.access(console, guest_euid, AccessCheck::W_OK).is_err());
}

/// the first data abort in an anonymous region allocates exactly
/// one frame; a second fault against the same page allocates nothing
/// further.
#[test]
fn demand_paging_allocates_one_frame_per_page() {
    let (mut frames, _backing) = frames_over_vec(256);
    let kernel_pt = kernel_page_table(&mut frames);
    let mut table = ProcessTable::new();
    let pid = table.spawn(0, 1, &mut frames, &kernel_pt).unwrap();
    {
        let process = table.get_mut(pid).unwrap();
        process.memory.add_region(PageRegion {
            start: 0x1000,
            end: 0x2000,
            flags: MappingFlags::RW,
            inode: None,
        });
    }
    let expected_phys = frames.alloc(0, 1, 1, 0).unwrap();
    frames.clear(expected_phys, 1);

    irq::do_data_abort(0x1400, &mut table, pid, &mut frames).unwrap();
    let process = table.get(pid).unwrap();
    assert!(process.memory.page_table.mapping_exists(0x1000, expected_phys));

    let next_free_before = frames.alloc(0, 1, 1, 0).unwrap();
    frames.clear(next_free_before, 1);

    irq::do_data_abort(0x1500, &mut table, pid, &mut frames).unwrap();
    let next_free_after = frames.alloc(0, 1, 1, 0).unwrap();
    assert_eq!(next_free_before, next_free_after);
}
