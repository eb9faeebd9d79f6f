//! PL011 UART MMIO shim. The register layout itself is out of scope
//! — this exposes exactly the data register byte-in/
//! byte-out contract `terminal.rs` and `KernelLogger` need, in the
//! `tock-registers` style the NeilAllavarpu-Raspberry-Pi-OS board layer
//! uses for its own PL011.
//!
//! `tock-registers` is only pulled in for the `arm` target (see
//! `Cargo.toml`), so the MMIO-backed `Uart` below is gated the same way;
//! off-target builds get `HostUart`, an in-memory stand-in.

#[cfg(target_arch = "arm")]
mod mmio {
    use tock_registers::interfaces::{Readable, Writeable};
    use tock_registers::register_structs;
    use tock_registers::registers::ReadWrite;

    register_structs! {
        #[allow(non_snake_case)]
        pub RegisterBlock {
            (0x00 => DR: ReadWrite<u32>),
            (0x04 => @END),
        }
    }

    pub struct Uart {
        base: *mut RegisterBlock,
    }

    // SAFETY: `base` points at a fixed MMIO window owned exclusively by
    // this driver for the life of the kernel.
    unsafe impl Send for Uart {}
    unsafe impl Sync for Uart {}

    impl Uart {
        /// # Safety
        /// `base` must be the mapped virtual address of the PL011 window
        /// and must not alias any other `Uart` instance.
        pub const unsafe fn new(base: u32) -> Self {
            Uart {
                base: base as *mut RegisterBlock,
            }
        }

        pub fn write_byte(&self, byte: u8) {
            // SAFETY: `self.base` is a live PL011 mapping for the life of
            // the kernel.
            unsafe { (*self.base).DR.set(byte as u32) };
        }

        pub fn read_byte(&self) -> u8 {
            // SAFETY: `self.base` is a live PL011 mapping for the life of
            // the kernel.
            (unsafe { (*self.base).DR.get() }) as u8
        }

        pub fn write_str(&self, s: &str) {
            for b in s.bytes() {
                self.write_byte(b);
            }
        }
    }
}

#[cfg(target_arch = "arm")]
pub use mmio::Uart;

/// Host stand-in used when not targeting `arm`, so `log`/`fmt::Write`
/// call sites compile and can be exercised in host tests.
pub struct HostUart {
    pub lines: spin::Mutex<alloc::string::String>,
}

impl HostUart {
    pub const fn new() -> Self {
        HostUart {
            lines: spin::Mutex::new(alloc::string::String::new()),
        }
    }

    pub fn write_str(&self, s: &str) {
        self.lines.lock().push_str(s);
    }
}
