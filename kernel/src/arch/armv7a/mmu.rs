//! TLB/cache maintenance and TTBR installation. These require privileged
//! coprocessor instructions (`mcr`/`mrc` on CP15) that only make sense on
//! real hardware, so they're out of scope beyond this minimal contract.
//! The page-table engine calls these after every structural edit; on the
//! `testing` host build they're no-ops.

/// Invalidates every TLB entry. The page-table engine's contract is
/// "cache and TLB invalidation are the caller's responsibility after
/// structural edits" — callers call this, not the other
/// way around.
pub fn invalidate_entire_tlb() {
    #[cfg(all(target_arch = "arm", not(feature = "testing")))]
    unsafe {
        core::arch::asm!("mcr p15, 0, {0}, c8, c7, 0", in(reg) 0u32);
    }
}

/// Installs `pgd_phys` as the current process's translation table base
/// (TTBR0). Called by the scheduler whenever it switches to a process
/// with a different memory context.
pub fn write_ttbr0(pgd_phys: u32) {
    #[cfg(all(target_arch = "arm", not(feature = "testing")))]
    unsafe {
        core::arch::asm!("mcr p15, 0, {0}, c2, c0, 0", in(reg) pgd_phys);
    }
    #[cfg(not(all(target_arch = "arm", not(feature = "testing"))))]
    let _ = pgd_phys;
}

/// Reads the Data Fault Address Register, i.e. the virtual address that
/// triggered a data abort.
pub fn read_dfar() -> u32 {
    #[cfg(all(target_arch = "arm", not(feature = "testing")))]
    unsafe {
        let dfar: u32;
        core::arch::asm!("mrc p15, 0, {0}, c6, c0, 0", out(reg) dfar);
        dfar
    }
    #[cfg(not(all(target_arch = "arm", not(feature = "testing"))))]
    {
        0
    }
}
