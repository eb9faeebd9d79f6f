//! Saved-register layout for a context switch: the callee-saved
//! registers plus stack pointer and return PC. The assembly that actually spills/reloads these is
//! out of scope; this crate only needs the layout and the
//! `extern "C"` entry point the scheduler calls into.

/// Callee-saved registers (r4-r11), stack pointer, and return address,
/// in the order the (out-of-scope) assembly trampoline expects to find
/// them.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessorRegisters {
    pub r4: u32,
    pub r5: u32,
    pub r6: u32,
    pub r7: u32,
    pub r8: u32,
    pub r9: u32,
    pub r10: u32,
    pub r11: u32,
    pub sp: u32,
    pub pc: u32,
}

#[cfg(all(target_arch = "arm", not(feature = "testing")))]
extern "C" {
    /// Saves `from`'s callee-saved registers/SP/PC and restores `to`'s.
    /// Implemented in assembly outside this crate's scope; declared here
    /// so `sched::scheduler` has a stable call site to build against.
    fn context_switch(from: *mut ProcessorRegisters, to: *const ProcessorRegisters);
}

/// Safe wrapper the scheduler calls. Off-target (host `cargo test`, or the
/// `testing` feature) there is no assembly trampoline to link against, so
/// it's a no-op — precise enough for scheduler unit tests, which never
/// actually expect to resume at `pc`.
pub fn switch(from: &mut ProcessorRegisters, to: &ProcessorRegisters) {
    #[cfg(all(target_arch = "arm", not(feature = "testing")))]
    {
        // SAFETY: `from` and `to` are valid, non-aliasing ProcessorRegisters
        // for the duration of this call; the assembly trampoline only reads
        // `to` and writes through `from`.
        unsafe {
            context_switch(from as *mut _, to as *const _);
        }
    }
    #[cfg(not(all(target_arch = "arm", not(feature = "testing"))))]
    {
        *from = *from;
        let _ = to;
    }
}
