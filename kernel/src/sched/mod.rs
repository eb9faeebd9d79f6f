//! Round-robin scheduler.
//! The ready list is a `Vec<ProcessId>` walked by an explicit cursor
//! rather than an intrusive circular list with a sentinel head.

use alloc::vec::Vec;

use crate::arch::armv7a::context::switch;
use crate::arch::armv7a::mmu::write_ttbr0;
use crate::process::{ProcessId, ProcessState, ProcessTable};

pub struct Scheduler {
    ready: Vec<ProcessId>,
    current_idx: usize,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            ready: Vec::new(),
            current_idx: 0,
        }
    }

    /// Links a newly created process into the ready list.
    pub fn add(&mut self, pid: ProcessId) {
        self.ready.push(pid);
    }

    pub fn remove(&mut self, pid: ProcessId) {
        if let Some(idx) = self.ready.iter().position(|&p| p == pid) {
            self.ready.remove(idx);
            if self.current_idx > idx || self.current_idx >= self.ready.len() {
                self.current_idx = self.current_idx.saturating_sub(1);
            }
        }
    }

    pub fn current(&self) -> Option<ProcessId> {
        self.ready.get(self.current_idx).copied()
    }

    /// Timer IRQ handler: marks the
    /// current process for preemption. The actual switch happens on the
    /// IRQ return path's call to `schedule()`.
    pub fn tick(&self, table: &mut ProcessTable) {
        if let Some(pid) = self.current() {
            if let Some(process) = table.get_mut(pid) {
                process.reschedule = true;
            }
        }
    }

    /// Picks the next ready process and context-switches into it. A
    /// no-op if the current process hasn't requested a reschedule, or
    /// if there is nowhere else to go.
    pub fn schedule(&mut self, table: &mut ProcessTable) {
        if self.ready.len() < 2 {
            return;
        }
        let current_pid = match self.current() {
            Some(pid) => pid,
            None => return,
        };
        let should_switch = table.get(current_pid).map(|p| p.reschedule).unwrap_or(true);
        if !should_switch {
            return;
        }
        if let Some(process) = table.get_mut(current_pid) {
            process.reschedule = false;
        }

        self.current_idx = (self.current_idx + 1) % self.ready.len();
        let next_pid = self.ready[self.current_idx];
        if next_pid == current_pid {
            return;
        }

        let current_pgd = table.get(current_pid).map(|p| p.memory.page_table.physical_base());
        let next_pgd = table.get(next_pid).map(|p| p.memory.page_table.physical_base());
        if current_pgd != next_pgd {
            if let Some(pgd) = next_pgd {
                write_ttbr0(pgd);
            }
        }

        if let Some((outgoing, incoming)) = table.pair_mut(current_pid, next_pid) {
            outgoing.state = ProcessState::Ready;
            incoming.state = ProcessState::Running;
            switch(&mut outgoing.context, &incoming.context);
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::page_table::PageTable;
    use crate::mm::phys::{phys_to_ptr, register_fake_region};
    use crate::mm::{BootstrapAllocator, FrameAllocator};

    const FAKE_BASE: u32 = 0x4100_0000;

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
    fn without_reschedule_request_schedule_is_a_no_op() {
        let (mut frames, _backing) = frame_allocator_over_vec(128);
        let kernel_pt = kernel_page_table(&mut frames);
        let mut table = ProcessTable::new();
        let a = table.spawn(0, 1, &mut frames, &kernel_pt).unwrap();
        let b = table.spawn(0, 1, &mut frames, &kernel_pt).unwrap();
        let mut sched = Scheduler::new();
        sched.add(a);
        sched.add(b);
        sched.schedule(&mut table);
        assert_eq!(sched.current(), Some(a));
    }

    #[test]
    fn tick_then_schedule_advances_round_robin() {
        let (mut frames, _backing) = frame_allocator_over_vec(128);
        let kernel_pt = kernel_page_table(&mut frames);
        let mut table = ProcessTable::new();
        let a = table.spawn(0, 1, &mut frames, &kernel_pt).unwrap();
        let b = table.spawn(0, 1, &mut frames, &kernel_pt).unwrap();
        let mut sched = Scheduler::new();
        sched.add(a);
        sched.add(b);
        sched.tick(&mut table);
        sched.schedule(&mut table);
        assert_eq!(sched.current(), Some(b));
        sched.tick(&mut table);
        sched.schedule(&mut table);
        assert_eq!(sched.current(), Some(a));
    }

    #[test]
    fn single_process_ready_list_never_switches() {
        let (mut frames, _backing) = frame_allocator_over_vec(128);
        let kernel_pt = kernel_page_table(&mut frames);
        let mut table = ProcessTable::new();
        let a = table.spawn(0, 1, &mut frames, &kernel_pt).unwrap();
        let mut sched = Scheduler::new();
        sched.add(a);
        sched.tick(&mut table);
        sched.schedule(&mut table);
        assert_eq!(sched.current(), Some(a));
    }
}
