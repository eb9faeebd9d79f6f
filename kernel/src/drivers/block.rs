//! Block device abstraction. A minimal read/write-by-block trait narrowed to the fixed
//! `BLOCK_SIZE` this filesystem actually uses instead of a per-device
//! block size.

use alloc::vec::Vec;

use crate::config::BLOCK_SIZE;
use crate::error::{FsError, KernelResult};

pub trait BlockDevice: Send + Sync {
    fn block_count(&self) -> u32;

    fn read_block(&self, index: u32, buf: &mut [u8; BLOCK_SIZE]) -> KernelResult<()>;

    fn write_block(&mut self, index: u32, buf: &[u8; BLOCK_SIZE]) -> KernelResult<()>;
}

/// RAM-backed block device: the MCI/MMC driver's register contract is
/// out of scope, so this is what the filesystem and buffer
/// cache are built and tested against.
pub struct RamBlockDevice {
    data: Vec<u8>,
}

impl RamBlockDevice {
    pub fn new(block_count: u32) -> Self {
        RamBlockDevice {
            data: alloc::vec![0u8; block_count as usize * BLOCK_SIZE],
        }
    }

    fn bounds_check(&self, index: u32) -> KernelResult<usize> {
        let start = index as usize * BLOCK_SIZE;
        if start + BLOCK_SIZE > self.data.len() {
            return Err(FsError::InvalidPath.into());
        }
        Ok(start)
    }
}

impl BlockDevice for RamBlockDevice {
    fn block_count(&self) -> u32 {
        (self.data.len() / BLOCK_SIZE) as u32
    }

    fn read_block(&self, index: u32, buf: &mut [u8; BLOCK_SIZE]) -> KernelResult<()> {
        let start = self.bounds_check(index)?;
        buf.copy_from_slice(&self.data[start..start + BLOCK_SIZE]);
        Ok(())
    }

    fn write_block(&mut self, index: u32, buf: &[u8; BLOCK_SIZE]) -> KernelResult<()> {
        let start = self.bounds_check(index)?;
        self.data[start..start + BLOCK_SIZE].copy_from_slice(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut dev = RamBlockDevice::new(4);
        let mut block = [0u8; BLOCK_SIZE];
        block[0] = 0x42;
        dev.write_block(1, &block).unwrap();
        let mut out = [0u8; BLOCK_SIZE];
        dev.read_block(1, &mut out).unwrap();
        assert_eq!(out[0], 0x42);
    }

    #[test]
    fn out_of_range_block_is_rejected() {
        let dev = RamBlockDevice::new(2);
        let mut out = [0u8; BLOCK_SIZE];
        assert!(dev.read_block(2, &mut out).is_err());
    }
}
