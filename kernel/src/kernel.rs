//! The `Kernel` context: owns every long-lived
//! subsystem instance that a C kernel would keep in file-scope globals,
//! so more than one kernel can be instantiated side by side in tests.
//!
//! `Kernel::init` is the boot sequence itself: bootstrap allocator ->
//! frame allocator -> kernel page table -> global allocator -> device
//! attachment -> buffer cache / filesystem mount. Enabling the MMU,
//! installing TTBR0, and entering the scheduler loop are boot-assembly
//! and `main.rs` concerns respectively, not this struct's.

use crate::config::{PHYS_OFFSET, VIRT_OFFSET};
use crate::device::DeviceRegistry;
use crate::drivers::block::BlockDevice;
use crate::error::{KernelError, KernelResult, ProcError};
use crate::fs::{Filesystem, InodeNum};
use crate::mm::page_table::MappingFlags;
use crate::mm::{heap, BootstrapAllocator, FrameAllocator, PageTable};
use crate::process::{PageRegion, ProcessId, ProcessTable};
use crate::sched::Scheduler;

#[cfg(target_arch = "arm")]
use crate::drivers::gic::Gic;
#[cfg(target_arch = "arm")]
use crate::drivers::timer::Timer;
#[cfg(target_arch = "arm")]
use crate::drivers::uart::Uart;
#[cfg(not(target_arch = "arm"))]
use crate::drivers::uart::HostUart;

/// Every subsystem a running kernel instance owns.
pub struct Kernel<D: BlockDevice> {
    pub kernel_page_table: PageTable,
    pub devices: DeviceRegistry,
    pub fs: Filesystem<D>,
    pub processes: ProcessTable,
    pub scheduler: Scheduler,
}

/// The SP804 reload value that yields a roughly 10ms scheduler tick at
/// the board's default clock; register-level detail beyond this one
/// constant is out of scope.
#[cfg(target_arch = "arm")]
const SCHEDULER_TICK_RELOAD: u32 = 0x0020_0000;

impl<D: BlockDevice> Kernel<D> {
    /// Runs the boot sequence: builds the
    /// frame allocator from `bootstrap`, builds and installs the kernel
    /// page table and global allocator, attaches the console (and, on
    /// target, the GIC/timer drivers and the logger), then mounts the
    /// filesystem on `block_device`. `kernel_image_size` is the size of
    /// the mapped kernel image, known to the boot code that built
    /// `bootstrap` in the first place.
    pub fn init(mut bootstrap: BootstrapAllocator, block_device: D, kernel_image_size: u32) -> KernelResult<Self> {
        let mut frames = FrameAllocator::from_bootstrap(&mut bootstrap)?;
        let kernel_page_table =
            PageTable::new_kernel(&mut frames, PHYS_OFFSET, VIRT_OFFSET, kernel_image_size)?;

        heap::install_frame_allocator(frames);

        let mut devices = DeviceRegistry::new();
        #[cfg(target_arch = "arm")]
        {
            // SAFETY: the UART0/GICD/GICC/timer windows were just mapped
            // by `kernel_page_table` above.
            static LOGGER_UART: Uart = unsafe { Uart::new(crate::config::UART0_VADDR) };
            static LOGGER: crate::logging::KernelLogger<Uart> =
                crate::logging::KernelLogger::new(&LOGGER_UART);
            crate::logging::install(&LOGGER);

            let console_uart = unsafe { Uart::new(crate::config::UART0_VADDR) };
            devices.register_console(console_uart);

            let gic = unsafe { Gic::new(crate::config::GICD_VADDR, crate::config::GICC_VADDR) };
            let timer = unsafe { Timer::new(crate::config::TIMER_VADDR) };
            gic.enable_irq(crate::config::TIMER_IRQ);
            gic.enable_irq(crate::config::UART0_IRQ);
            timer.start_periodic(SCHEDULER_TICK_RELOAD);
        }
        #[cfg(not(target_arch = "arm"))]
        {
            devices.register_console(HostUart::new());
        }

        let fs = Filesystem::mount(block_device)?;

        Ok(Kernel {
            kernel_page_table,
            devices,
            fs,
            processes: ProcessTable::new(),
            scheduler: Scheduler::new(),
        })
    }

    /// Creates a new process sharing the frame allocator installed during
    /// `init` and links it into the ready list.
    pub fn spawn_process(&mut self, euid: u32, cwd: InodeNum) -> KernelResult<ProcessId> {
        let kernel_page_table = &self.kernel_page_table;
        let processes = &mut self.processes;
        let pid = heap::with_frames(|frames| processes.spawn(euid, cwd, frames, kernel_page_table))?;
        self.scheduler.add(pid);
        Ok(pid)
    }

    /// Copies `image` into freshly allocated frames and maps it at
    /// `vaddr` in `pid`'s address space with `flags`, recording the range
    /// as a region so later data aborts just outside it are still
    /// diagnosable. `vaddr` must be page-aligned;
    /// `image` need not fill a whole number of pages.
    pub fn load_program_image(
        &mut self,
        pid: ProcessId,
        image: &[u8],
        vaddr: u32,
        flags: MappingFlags,
    ) -> KernelResult<()> {
        let page_size = crate::config::PAGE_SIZE;
        let page_count = crate::mm::align_up(image.len() as u32, page_size).max(page_size) / page_size;

        let phys = heap::with_frames(|frames| frames.alloc(0, page_count, 1, 0))?;
        // SAFETY: `phys` is a freshly allocated, exclusively owned range
        // of `page_count` frames.
        unsafe {
            let dst = crate::mm::phys::phys_to_ptr(phys);
            core::ptr::write_bytes(dst, 0, (page_count * page_size) as usize);
            core::ptr::copy_nonoverlapping(image.as_ptr(), dst, image.len());
        }

        let process = self
            .processes
            .get_mut(pid)
            .ok_or::<KernelError>(ProcError::NoSuchProcess.into())?;
        heap::with_frames(|frames| {
            process
                .memory
                .page_table
                .create_mapping(frames, vaddr, phys, page_count * page_size, flags)
        })?;
        process.memory.add_region(PageRegion {
            start: vaddr,
            end: vaddr + page_count * page_size,
            flags,
            inode: None,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::block::RamBlockDevice;
    use crate::mm::phys::register_fake_region;
    use fslayout::{Access, BLOCKS_PER_FILE, FileType, BLOCK_SIZE, FSINFO_CACHE};

    const FAKE_BASE: u32 = 0x7000_0000;

    fn ram_bootstrap() -> (BootstrapAllocator, alloc::vec::Vec<u8>) {
        let mut bootstrap = BootstrapAllocator::new();
        let mut buf: alloc::vec::Vec<u8> = alloc::vec![0u8; 256 * crate::config::PAGE_SIZE as usize];
        register_fake_region(FAKE_BASE, &mut buf);
        bootstrap.add_memory(FAKE_BASE, 256 * crate::config::PAGE_SIZE).unwrap();
        (bootstrap, buf)
    }

    fn minimal_image(total_blocks: u32) -> RamBlockDevice {
        let mut device = RamBlockDevice::new(total_blocks);
        let file_infos_size = 1u32;
        let first_data_block = 1 + file_infos_size;

        let mut sb = fslayout::Superblock::zeroed();
        sb.size = total_blocks;
        sb.file_infos_size = file_infos_size;
        sb.root_file_info = 1;
        let total_inodes = file_infos_size as usize * fslayout::FILE_INFO_PER_BLOCK;
        let mut n = 0;
        for i in 2..total_inodes as u32 {
            if n >= FSINFO_CACHE {
                break;
            }
            sb.free_file_infos[n] = i;
            n += 1;
        }
        sb.free_file_infos_size = n as u32;
        let data_blocks = total_blocks - first_data_block;
        let mut n = 0;
        for i in 0..data_blocks.saturating_sub(1) {
            if n >= FSINFO_CACHE {
                break;
            }
            sb.free_blocks[n] = first_data_block + i;
            n += 1;
        }
        sb.next_free_block = n as u32;
        let mut block0 = [0u8; BLOCK_SIZE];
        sb.encode(&mut block0);
        device.write_block(0, &block0).unwrap();

        let root = fslayout::DiskInode {
            num: 1,
            kind: FileType::Directory as u32,
            access: (Access::READ_OWNER | Access::WRITE_OWNER | Access::EXEC_OWNER).bits(),
            owner_user: 0,
            owner_group: 0,
            size: 0,
            blocks: [0; BLOCKS_PER_FILE],
        };
        let mut inode_block = [0u8; BLOCK_SIZE];
        root.encode(&mut inode_block, fslayout::DISK_INODE_SIZE);
        device.write_block(1, &inode_block).unwrap();
        device
    }

    #[test]
    fn init_mounts_the_filesystem_and_seeds_an_empty_process_table() {
        let device = minimal_image(64);
        let (bootstrap, _backing) = ram_bootstrap();

        let kernel = Kernel::init(bootstrap, device, crate::config::PMD_SIZE).unwrap();
        assert_eq!(kernel.fs.root_inode(), 1);
        assert!(kernel.processes.iter().next().is_none());
    }

    #[test]
    fn spawn_process_links_into_the_ready_list() {
        let device = minimal_image(64);
        let (bootstrap, _backing) = ram_bootstrap();

        let mut kernel = Kernel::init(bootstrap, device, crate::config::PMD_SIZE).unwrap();
        let root = kernel.fs.root_inode();
        let pid = kernel.spawn_process(0, root).unwrap();
        assert_eq!(kernel.scheduler.current(), Some(pid));
    }
}
