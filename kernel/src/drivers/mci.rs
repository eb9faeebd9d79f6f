//! PL180 MultiMedia Card Interface MMIO shim. The SD/MMC command and
//! response protocol is out of scope — only the register
//! window contract is fixed here, mirroring `uart.rs`'s shape. Real
//! filesystem I/O in this crate goes through `drivers::block::BlockDevice`,
//! which in the absence of the MCI protocol is backed by
//! `RamBlockDevice` everywhere except a real board.

#[cfg(target_arch = "arm")]
mod mmio {
    use tock_registers::register_structs;
    use tock_registers::registers::ReadWrite;

    register_structs! {
        #[allow(non_snake_case)]
        pub RegisterBlock {
            (0x00 => MCI_CMD: ReadWrite<u32>),
            (0x04 => MCI_ARGUMENT: ReadWrite<u32>),
            (0x08 => MCI_FIFO: ReadWrite<u32>),
            (0x0c => @END),
        }
    }

    pub struct Mci {
        #[allow(dead_code)]
        base: *mut RegisterBlock,
    }

    // SAFETY: `base` points at a fixed MMIO window owned exclusively by
    // this driver for the life of the kernel.
    unsafe impl Send for Mci {}
    unsafe impl Sync for Mci {}

    impl Mci {
        /// # Safety
        /// `base` must be the mapped virtual address of the PL180
        /// window.
        pub const unsafe fn new(base: u32) -> Self {
            Mci {
                base: base as *mut RegisterBlock,
            }
        }
    }
}

#[cfg(target_arch = "arm")]
pub use mmio::Mci;
