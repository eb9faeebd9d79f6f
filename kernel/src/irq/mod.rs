//! Exception vector handlers. Each `do_*` function mirrors one of the
//! board's ARM exception handlers; state that would otherwise live in
//! globals (`gicc`, `current`) is passed in explicitly instead.

use crate::config::TIMER_IRQ;
use crate::drivers::gic::Gic;
use crate::drivers::timer::Timer;
use crate::error::{KernelError, KernelResult, ProcError};
use crate::mm::frame::FrameAllocator;
use crate::process::{ProcessId, ProcessTable};
use crate::sched::Scheduler;

/// Reset exception. Nothing to do once the kernel is already running.
pub fn do_reset() {}

/// Undefined-instruction exception. No instruction emulation is
/// implemented.
pub fn do_undefined_instruction() {}

/// Supervisor-call exception. Decoding the syscall number out of the
/// trapped registers and calling `syscall::dispatch` happens in the
/// vector stub, not here.
pub fn do_supervisor_call() {}

/// Prefetch-abort exception (instruction fetch fault). Demand paging
/// only covers data aborts; an instruction fetch into an
/// unmapped page is unrecoverable.
pub fn do_prefetch_abort() {}

/// FIQ exception. Unused by this board configuration.
pub fn do_fiq_interrupt() {}

/// Data-abort handler: look up the page region containing `fault_addr` in the
/// faulting process's address space and, if the region has no backing
/// inode, allocate one physical frame and map it in with the region's
/// flags. `fault_addr` comes from `arch::armv7a::mmu::read_dfar`.
///
/// Returns `Err` if `fault_addr` falls outside every mapped region; the
/// caller decides what to do with an unrecoverable fault (this crate's
/// only option is the panic path).
pub fn do_data_abort(
    fault_addr: u32,
    table: &mut ProcessTable,
    current: ProcessId,
    frames: &mut FrameAllocator,
) -> KernelResult<()> {
    let process = table
        .get_mut(current)
        .ok_or::<KernelError>(ProcError::NoSuchProcess.into())?;

    let region = *process
        .memory
        .find_region(fault_addr)
        .ok_or(KernelError::InvalidAddress { addr: fault_addr })?;

    let page_base = fault_addr & !crate::config::PAGE_MASK;
    if region.inode.is_none() && !process.memory.page_table.is_mapped(page_base) {
        let page_phys = frames.alloc(0, 1, 1, 0)?;
        process.memory.page_table.create_mapping(
            frames,
            page_base,
            page_phys,
            crate::config::PAGE_SIZE,
            region.flags,
        )?;
        crate::arch::armv7a::mmu::invalidate_entire_tlb();
    }

    Ok(())
}

/// IRQ handler: acknowledge at the CPU interface, mask the source
/// while it's handled, dispatch on its id, signal completion, unmask,
/// then let the scheduler act on whatever flag the dispatch set.
///
/// The original dispatches every IRQ straight into `schedule()`; here
/// only the timer source requests a reschedule, but `schedule()` still
/// runs unconditionally afterward since it's already a no-op when
/// nothing requested one.
pub fn do_irq_interrupt(gic: &Gic, timer: &Timer, scheduler: &mut Scheduler, table: &mut ProcessTable) {
    let id = gic.acknowledge();

    gic.disable_irq(id);

    if id == TIMER_IRQ {
        timer.acknowledge();
        scheduler.tick(table);
    }

    gic.end_of_interrupt(id);
    gic.enable_irq(id);

    scheduler.schedule(table);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::page_table::{MappingFlags, PageTable};
    use crate::mm::phys::{phys_to_ptr, register_fake_region};
    use crate::mm::BootstrapAllocator;
    use crate::process::PageRegion;

    const FAKE_BASE: u32 = 0x4300_0000;

    fn frame_allocator_over_vec(pages: u32) -> (FrameAllocator, alloc::vec::Vec<u8>) {
        let mut buf = alloc::vec![0u8; (pages * crate::config::PAGE_SIZE) as usize];
        register_fake_region(FAKE_BASE, &mut buf);
        let mut bootstrap = BootstrapAllocator::new();
        bootstrap.add_memory(FAKE_BASE, pages * crate::config::PAGE_SIZE).unwrap();
        (FrameAllocator::from_bootstrap(&mut bootstrap).unwrap(), buf)
    }

    fn kernel_page_table(frames: &mut FrameAllocator) -> PageTable {
        let pages_needed = crate::config::PG_DIR_SIZE / crate::config::PAGE_SIZE;
        let phys = frames.alloc(0, pages_needed, pages_needed, 0).unwrap();
        unsafe { core::ptr::write_bytes(phys_to_ptr(phys), 0, crate::config::PG_DIR_SIZE as usize) };
        PageTable::from_existing(phys)
    }

    #[test]
    fn data_abort_inside_anonymous_region_maps_a_frame() {
        let (mut frames, _backing) = frame_allocator_over_vec(256);
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

        do_data_abort(0x1400, &mut table, pid, &mut frames).unwrap();
        let process = table.get(pid).unwrap();
        assert!(process.memory.page_table.mapping_exists(0x1000, expected_phys));
    }

    #[test]
    fn a_second_fault_on_the_same_page_allocates_no_further_frame() {
        let (mut frames, _backing) = frame_allocator_over_vec(256);
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

        do_data_abort(0x1400, &mut table, pid, &mut frames).unwrap();
        let mapped_phys = frames.alloc(0, 1, 1, 0).unwrap();
        frames.clear(mapped_phys, 1);

        do_data_abort(0x1500, &mut table, pid, &mut frames).unwrap();
        let still_next_free = frames.alloc(0, 1, 1, 0).unwrap();
        assert_eq!(mapped_phys, still_next_free);
    }

    #[test]
    fn data_abort_outside_every_region_is_an_error() {
        let (mut frames, _backing) = frame_allocator_over_vec(128);
        let kernel_pt = kernel_page_table(&mut frames);
        let mut table = ProcessTable::new();
        let pid = table.spawn(0, 1, &mut frames, &kernel_pt).unwrap();
        assert!(do_data_abort(0x9000, &mut table, pid, &mut frames).is_err());
    }

    #[test]
    fn data_abort_for_a_missing_process_is_an_error() {
        let (mut frames, _backing) = frame_allocator_over_vec(64);
        let mut table = ProcessTable::new();
        assert!(do_data_abort(0x1000, &mut table, 99, &mut frames).is_err());
    }
}
