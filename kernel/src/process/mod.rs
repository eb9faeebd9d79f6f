//! Process model. The process table is a fixed-capacity arena indexed
//! by `ProcessId` rather than an intrusive linked list.

use alloc::vec::Vec;

use crate::arch::armv7a::context::ProcessorRegisters;
use crate::config::{FILE_TABLE_SIZE, MAX_PROCESSES};
use crate::error::{KernelResult, ProcError};
use crate::fs::{DescriptorTable, InodeNum};
use crate::mm::frame::FrameAllocator;
use crate::mm::page_table::{MappingFlags, PageTable};

pub type ProcessId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Created,
    Ready,
    Running,
    Blocked,
    Terminated,
}

/// One mapped region of a process's address space. `inode` is a
/// file-backed demand-paging hook left as an extension point — unused
/// by anything that allocates a region today.
#[derive(Debug, Clone, Copy)]
pub struct PageRegion {
    pub start: u32,
    pub end: u32,
    pub flags: MappingFlags,
    pub inode: Option<InodeNum>,
}

impl PageRegion {
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// PGD physical base plus the region list it backs.
pub struct MemoryContext {
    pub page_table: PageTable,
    pub regions: Vec<PageRegion>,
}

impl MemoryContext {
    pub fn find_region(&self, addr: u32) -> Option<&PageRegion> {
        self.regions.iter().find(|r| r.contains(addr))
    }

    pub fn add_region(&mut self, region: PageRegion) {
        self.regions.push(region);
    }
}

/// A process record. `reschedule`/`preempt` are
/// the scheduling flags the timer IRQ and `schedule()` communicate
/// through.
pub struct Process {
    pub id: ProcessId,
    pub state: ProcessState,
    pub euid: u32,
    pub cwd: InodeNum,
    pub fds: DescriptorTable<FILE_TABLE_SIZE>,
    pub context: ProcessorRegisters,
    pub memory: MemoryContext,
    pub reschedule: bool,
    pub preempt: bool,
}

impl Process {
    /// Allocates a new PGD (kernel half copied) and an empty descriptor
    /// table/region list. The kernel stack itself is out of scope here —
    /// it's carved out by whatever calls this with a `FrameAllocator`;
    /// boot/entry assembly is out of scope for this crate entirely.
    pub fn new(
        id: ProcessId,
        euid: u32,
        cwd: InodeNum,
        frames: &mut FrameAllocator,
        kernel_page_table: &PageTable,
    ) -> KernelResult<Self> {
        let page_table = PageTable::create_pgd(frames, kernel_page_table)?;
        Ok(Process {
            id,
            state: ProcessState::Created,
            euid,
            cwd,
            fds: DescriptorTable::new(),
            context: ProcessorRegisters::default(),
            memory: MemoryContext {
                page_table,
                regions: Vec::new(),
            },
            reschedule: false,
            preempt: false,
        })
    }
}

/// Fixed-capacity arena of live processes.
pub struct ProcessTable {
    slots: [Option<Process>; MAX_PROCESSES],
    next_id: ProcessId,
}

impl ProcessTable {
    pub fn new() -> Self {
        ProcessTable {
            slots: core::array::from_fn(|_| None),
            next_id: 1,
        }
    }

    /// Builds a process with a freshly allocated id and installs it in
    /// the lowest free slot.
    pub fn spawn(
        &mut self,
        euid: u32,
        cwd: InodeNum,
        frames: &mut FrameAllocator,
        kernel_page_table: &PageTable,
    ) -> KernelResult<ProcessId> {
        let slot = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or::<crate::error::KernelError>(ProcError::TableFull.into())?;
        let id = self.next_id;
        self.next_id += 1;
        let process = Process::new(id, euid, cwd, frames, kernel_page_table)?;
        self.slots[slot] = Some(process);
        Ok(id)
    }

    pub fn get(&self, id: ProcessId) -> Option<&Process> {
        self.slots.iter().flatten().find(|p| p.id == id)
    }

    pub fn get_mut(&mut self, id: ProcessId) -> Option<&mut Process> {
        self.slots.iter_mut().flatten().find(|p| p.id == id)
    }

    pub fn remove(&mut self, id: ProcessId) -> KernelResult<()> {
        let slot = self
            .slots
            .iter()
            .position(|s| s.as_ref().map(|p| p.id) == Some(id))
            .ok_or::<crate::error::KernelError>(ProcError::NoSuchProcess.into())?;
        self.slots[slot] = None;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.slots.iter().flatten()
    }

    /// Mutable access to two distinct processes at once, needed by the
    /// scheduler to save the outgoing context while restoring the
    /// incoming one. Returns `None` if either id is missing or
    /// they're the same process.
    pub fn pair_mut(&mut self, a: ProcessId, b: ProcessId) -> Option<(&mut Process, &mut Process)> {
        if a == b {
            return None;
        }
        let ia = self.slots.iter().position(|s| s.as_ref().map(|p| p.id) == Some(a))?;
        let ib = self.slots.iter().position(|s| s.as_ref().map(|p| p.id) == Some(b))?;
        let (lo, hi) = if ia < ib { (ia, ib) } else { (ib, ia) };
        let (left, right) = self.slots.split_at_mut(hi);
        let lo_ref = left[lo].as_mut().unwrap();
        let hi_ref = right[0].as_mut().unwrap();
        if ia < ib {
            Some((lo_ref, hi_ref))
        } else {
            Some((hi_ref, lo_ref))
        }
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::phys::{phys_to_ptr, register_fake_region};
    use crate::mm::BootstrapAllocator;

    const FAKE_BASE: u32 = 0x4200_0000;

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
        let table = PageTable::from_existing(phys);
        unsafe { core::ptr::write_bytes(phys_to_ptr(phys), 0, crate::config::PG_DIR_SIZE as usize) };
        table
    }

    #[test]
    fn spawn_allocates_sequential_ids() {
        let (mut frames, _backing) = frame_allocator_over_vec(64);
        let kernel_pt = kernel_page_table(&mut frames);
        let mut table = ProcessTable::new();
        let a = table.spawn(0, 1, &mut frames, &kernel_pt).unwrap();
        let b = table.spawn(0, 1, &mut frames, &kernel_pt).unwrap();
        assert_ne!(a, b);
        assert!(table.get(a).is_some());
        assert!(table.get(b).is_some());
    }

    #[test]
    fn remove_frees_the_slot_for_reuse() {
        let (mut frames, _backing) = frame_allocator_over_vec(64);
        let kernel_pt = kernel_page_table(&mut frames);
        let mut table = ProcessTable::new();
        let a = table.spawn(0, 1, &mut frames, &kernel_pt).unwrap();
        table.remove(a).unwrap();
        assert!(table.get(a).is_none());
        assert!(table.remove(a).is_err());
    }

    #[test]
    fn pair_mut_gives_both_processes_regardless_of_order() {
        let (mut frames, _backing) = frame_allocator_over_vec(64);
        let kernel_pt = kernel_page_table(&mut frames);
        let mut table = ProcessTable::new();
        let a = table.spawn(0, 1, &mut frames, &kernel_pt).unwrap();
        let b = table.spawn(0, 1, &mut frames, &kernel_pt).unwrap();
        let (pa, pb) = table.pair_mut(a, b).unwrap();
        assert_eq!(pa.id, a);
        assert_eq!(pb.id, b);
        assert!(table.pair_mut(a, a).is_none());
    }

    #[test]
    fn page_region_lookup_finds_containing_region() {
        let (mut frames, _backing) = frame_allocator_over_vec(64);
        let kernel_pt = kernel_page_table(&mut frames);
        let mut process = Process::new(1, 0, 1, &mut frames, &kernel_pt).unwrap();
        process.memory.add_region(PageRegion {
            start: 0x1000,
            end: 0x2000,
            flags: MappingFlags::RW,
            inode: None,
        });
        assert!(process.memory.find_region(0x1500).is_some());
        assert!(process.memory.find_region(0x3000).is_none());
    }
}
