//! SP804 dual-timer MMIO shim. Register-level detail is out of scope
//!; the kernel only needs "an IRQ arrives roughly every
//! tick", which `irq::handle_irq` turns into the scheduler's
//! `reschedule` flag.
//!
//! `tock-registers` is only an `arm`-target dependency; off-target
//! builds get a no-op `Timer` so `irq::do_irq_interrupt`'s signature
//! still resolves in host tests.

#[cfg(target_arch = "arm")]
mod mmio {
    use tock_registers::interfaces::Writeable;
    use tock_registers::register_structs;
    use tock_registers::registers::ReadWrite;

    register_structs! {
        #[allow(non_snake_case)]
        pub RegisterBlock {
            (0x00 => TimerLoad: ReadWrite<u32>),
            (0x04 => TimerValue: ReadWrite<u32>),
            (0x08 => TimerControl: ReadWrite<u32>),
            (0x0c => TimerIntClr: ReadWrite<u32>),
            (0x10 => @END),
        }
    }

    const TIMER_ENABLE: u32 = 1 << 7;
    const TIMER_PERIODIC: u32 = 1 << 6;
    const TIMER_INT_ENABLE: u32 = 1 << 5;

    pub struct Timer {
        base: *mut RegisterBlock,
    }

    // SAFETY: `base` points at a fixed MMIO window owned exclusively by
    // this driver for the life of the kernel.
    unsafe impl Send for Timer {}
    unsafe impl Sync for Timer {}

    impl Timer {
        /// # Safety
        /// `base` must be the mapped virtual address of the SP804
        /// window.
        pub const unsafe fn new(base: u32) -> Self {
            Timer {
                base: base as *mut RegisterBlock,
            }
        }

        pub fn start_periodic(&self, reload: u32) {
            // SAFETY: `self.base` is a live SP804 mapping for the life
            // of the kernel.
            unsafe {
                (*self.base).TimerLoad.set(reload);
                (*self.base)
                    .TimerControl
                    .set(TIMER_ENABLE | TIMER_PERIODIC | TIMER_INT_ENABLE);
            }
        }

        pub fn acknowledge(&self) {
            // SAFETY: `self.base` is a live SP804 mapping for the life
            // of the kernel.
            unsafe { (*self.base).TimerIntClr.set(1) };
        }
    }
}

#[cfg(target_arch = "arm")]
pub use mmio::Timer;

#[cfg(not(target_arch = "arm"))]
pub struct Timer;

#[cfg(not(target_arch = "arm"))]
impl Timer {
    pub fn start_periodic(&self, _reload: u32) {}
    pub fn acknowledge(&self) {}
}
