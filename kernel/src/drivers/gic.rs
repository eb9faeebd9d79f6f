//! GIC-400 distributor/CPU-interface MMIO shim. Out of scope beyond the
//! enable-and-acknowledge contract `irq::init` and `irq::handle_irq`
//! need.
//!
//! `tock-registers` is only an `arm`-target dependency (see
//! `Cargo.toml`); off-target builds get a `Gic` whose operations are
//! no-ops, so `irq::do_irq_interrupt`'s signature still resolves in host
//! tests without linking against MMIO it will never touch.

#[cfg(target_arch = "arm")]
mod mmio {
    use tock_registers::interfaces::{Readable, Writeable};
    use tock_registers::register_structs;
    use tock_registers::registers::ReadWrite;

    register_structs! {
        #[allow(non_snake_case)]
        pub DistributorBlock {
            (0x000 => CTLR: ReadWrite<u32>),
            (0x004 => TYPER: ReadWrite<u32>),
            (0x100 => ISENABLER: ReadWrite<u32>),
            (0x180 => ICENABLER: ReadWrite<u32>),
            (0x184 => @END),
        }
    }

    register_structs! {
        #[allow(non_snake_case)]
        pub CpuInterfaceBlock {
            (0x00 => CTLR: ReadWrite<u32>),
            (0x04 => PMR: ReadWrite<u32>),
            (0x0c => IAR: ReadWrite<u32>),
            (0x10 => EOIR: ReadWrite<u32>),
            (0x14 => @END),
        }
    }

    pub struct Gic {
        distributor: *mut DistributorBlock,
        cpu_interface: *mut CpuInterfaceBlock,
    }

    // SAFETY: both pointers target fixed MMIO windows owned exclusively
    // by this driver for the life of the kernel.
    unsafe impl Send for Gic {}
    unsafe impl Sync for Gic {}

    impl Gic {
        /// # Safety
        /// `distributor_base`/`cpu_interface_base` must be the mapped
        /// virtual addresses of the GICD/GICC windows.
        pub const unsafe fn new(distributor_base: u32, cpu_interface_base: u32) -> Self {
            Gic {
                distributor: distributor_base as *mut DistributorBlock,
                cpu_interface: cpu_interface_base as *mut CpuInterfaceBlock,
            }
        }

        /// Masks `irq` at the distributor, matching the
        /// disable-around-handle pattern in `do_irq_interrupt`.
        pub fn disable_irq(&self, irq: u32) {
            // SAFETY: `self.distributor` is a live GICD mapping.
            unsafe { (*self.distributor).ICENABLER.set(1 << (irq % 32)) };
        }

        pub fn enable_irq(&self, irq: u32) {
            // SAFETY: `self.distributor` is a live GICD mapping.
            unsafe {
                (*self.distributor).ISENABLER.set(1 << (irq % 32));
                (*self.distributor).CTLR.set(1);
                (*self.cpu_interface).CTLR.set(1);
                (*self.cpu_interface).PMR.set(0xff);
            }
        }

        /// Acknowledges the pending interrupt and returns its id.
        pub fn acknowledge(&self) -> u32 {
            // SAFETY: `self.cpu_interface` is a live GICC mapping.
            unsafe { (*self.cpu_interface).IAR.get() }
        }

        pub fn end_of_interrupt(&self, irq: u32) {
            // SAFETY: `self.cpu_interface` is a live GICC mapping.
            unsafe { (*self.cpu_interface).EOIR.set(irq) };
        }
    }
}

#[cfg(target_arch = "arm")]
pub use mmio::Gic;

#[cfg(not(target_arch = "arm"))]
pub struct Gic;

#[cfg(not(target_arch = "arm"))]
impl Gic {
    pub fn disable_irq(&self, _irq: u32) {}
    pub fn enable_irq(&self, _irq: u32) {}
    pub fn acknowledge(&self) -> u32 {
        0
    }
    pub fn end_of_interrupt(&self, _irq: u32) {}
}
