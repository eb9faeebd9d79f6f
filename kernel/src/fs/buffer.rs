//! Block buffer cache: a list of `(block number, data)` entries where
//! uniqueness is the whole contract — at most one cached entry per
//! block number at any quiescent point.
//!
//! Coarse consistency: a reader never observes a block mid-write because
//! `put` writes the entry back to the device before releasing it, and
//! every mutation of a block goes through a `get`/mutate/`put` pair held
//! for the duration.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::config::BLOCK_SIZE;
use crate::drivers::block::BlockDevice;
use crate::error::KernelResult;

struct CacheEntry {
    block: u32,
    data: Box<[u8; BLOCK_SIZE]>,
}

pub struct BufferCache {
    entries: Vec<CacheEntry>,
}

pub struct BufferHandle {
    pub block: u32,
}

impl BufferCache {
    pub fn new() -> Self {
        BufferCache { entries: Vec::new() }
    }

    /// Returns the cached copy of `block`, reading it from `device` on a
    /// miss.
    pub fn get(&mut self, device: &dyn BlockDevice, block: u32) -> KernelResult<BufferHandle> {
        if !self.entries.iter().any(|e| e.block == block) {
            let mut data = Box::new([0u8; BLOCK_SIZE]);
            device.read_block(block, &mut data)?;
            self.entries.push(CacheEntry { block, data });
        }
        Ok(BufferHandle { block })
    }

    pub fn data(&self, handle: &BufferHandle) -> &[u8; BLOCK_SIZE] {
        &self
            .entries
            .iter()
            .find(|e| e.block == handle.block)
            .expect("buffer handle outlived its cache entry")
            .data
    }

    pub fn data_mut(&mut self, handle: &BufferHandle) -> &mut [u8; BLOCK_SIZE] {
        &mut self
            .entries
            .iter_mut()
            .find(|e| e.block == handle.block)
            .expect("buffer handle outlived its cache entry")
            .data
    }

    /// Writes the entry back and removes it from the cache.
    pub fn put(&mut self, device: &mut dyn BlockDevice, handle: BufferHandle) -> KernelResult<()> {
        if let Some(idx) = self.entries.iter().position(|e| e.block == handle.block) {
            let entry = self.entries.remove(idx);
            device.write_block(entry.block, &entry.data)?;
        }
        Ok(())
    }

    /// Writes back and drops every cached entry.
    pub fn flush_all(&mut self, device: &mut dyn BlockDevice) -> KernelResult<()> {
        for entry in self.entries.drain(..) {
            device.write_block(entry.block, &entry.data)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for BufferCache {
    fn default() -> Self {
        Self::new()
    }
}
