//! Device registry keyed by (major, minor). A
//! character device dispatches `read`/`write` to its `Terminal`; a block
//! device dispatches through `drivers::block::BlockDevice`. Both kinds
//! are looked up the same way from `fs::descriptor` when a `DiskInode`
//! names a device's major/minor instead of a data block.

use fslayout::{FileType, CONSOLE_MAJOR, CONSOLE_MINOR};

use crate::drivers::block::BlockDevice;
#[cfg(target_arch = "arm")]
use crate::drivers::uart::Uart;
#[cfg(not(target_arch = "arm"))]
use crate::drivers::uart::HostUart;
use crate::error::{FsError, KernelResult};
use crate::terminal::Terminal;

/// The console's backing sink: the real PL011 on target, an in-memory
/// stand-in everywhere else.
#[cfg(target_arch = "arm")]
pub type ConsoleSink = Uart;
#[cfg(not(target_arch = "arm"))]
pub type ConsoleSink = HostUart;

const MAX_DEVICES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceId {
    pub major: u32,
    pub minor: u32,
}

pub enum Device {
    Char(Terminal<ConsoleSink>),
    Block(alloc::boxed::Box<dyn BlockDevice>),
}

struct Entry {
    id: DeviceId,
    device: Device,
}

pub struct DeviceRegistry {
    entries: alloc::vec::Vec<Entry>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        DeviceRegistry {
            entries: alloc::vec::Vec::with_capacity(MAX_DEVICES),
        }
    }

    /// Registers the system console at major 5 / minor 1
    /// (`fslayout::CONSOLE_MAJOR`/`CONSOLE_MINOR`).
    pub fn register_console(&mut self, sink: ConsoleSink) {
        self.register(
            DeviceId {
                major: CONSOLE_MAJOR,
                minor: CONSOLE_MINOR,
            },
            Device::Char(Terminal::new(sink)),
        );
    }

    pub fn register(&mut self, id: DeviceId, device: Device) {
        self.entries.push(Entry { id, device });
    }

    pub fn lookup_mut(&mut self, id: DeviceId) -> KernelResult<&mut Device> {
        self.entries
            .iter_mut()
            .find(|e| e.id == id)
            .map(|e| &mut e.device)
            .ok_or_else(|| FsError::NotFound.into())
    }

    /// The device a `DiskInode` refers to, inferred from its `kind`.
    pub fn lookup_for_inode(&mut self, kind: FileType, major: u32, minor: u32) -> KernelResult<&mut Device> {
        match kind {
            FileType::CharDevice | FileType::BlockDevice => self.lookup_mut(DeviceId { major, minor }),
            _ => Err(FsError::NotFound.into()),
        }
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_is_discoverable_after_registration() {
        let mut registry = DeviceRegistry::new();
        registry.register_console(HostUart::new());
        let dev = registry.lookup_mut(DeviceId {
            major: CONSOLE_MAJOR,
            minor: CONSOLE_MINOR,
        });
        assert!(dev.is_ok());
    }

    #[test]
    fn unknown_device_is_not_found() {
        let mut registry = DeviceRegistry::new();
        assert!(registry
            .lookup_mut(DeviceId { major: 99, minor: 0 })
            .is_err());
    }
}
