//! The on-disk UNIX-style filesystem. Superblock, inode table,
//! directory entries and block indirection follow `fslayout` exactly so
//! an image written by `mkfs` is readable here byte-for-byte; every
//! block access goes through `fs::buffer::BufferCache`.
//!
//! The free-block list algorithm (`alloc_block`/`free_block`) mirrors
//! classic UNIX `alloc`/`free`: a block popped off the cache is handed
//! to the caller *and*, if that pop drained the cache, its still-intact
//! prior contents are read back first to refill the cache — the same
//! block serves as both the allocation and, one call earlier, a free
//! list node.

use alloc::string::String;
use alloc::vec::Vec;

use fslayout::{
    Access, AccessCheck, DirEntryRaw, DiskInode, FileType, OpenFlags, Superblock,
    BLOCKS_PER_FILE, BLOCK_NUMS_PER_BLOCK, DIR_ENTRY_SIZE, DISK_INODE_SIZE, FILE_INFO_PER_BLOCK,
    FSINFO_CACHE, L0_END, L1_END, L1_INDEX, L2_END, L2_INDEX, L3_INDEX,
};

use crate::config::BLOCK_SIZE;
use crate::drivers::block::BlockDevice;
use crate::error::{FsError, KernelResult};
use crate::fs::buffer::BufferCache;

pub type InodeNum = u32;

/// Which indirection level a file offset falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockLevel {
    Direct,
    Single,
    Double,
    Triple,
}

/// A file offset resolved into the chain of indices needed to walk from
/// `inode.blocks[]` down to the data block that holds it.
#[derive(Debug, Clone, Copy)]
pub struct BlockPath {
    pub level: BlockLevel,
    /// Indices used at each level beyond the inode's own `blocks[]`
    /// entry point; only `[0..depth)` are meaningful — `depth` is 0 for
    /// `Direct` (the inode slot itself is the data pointer), 1/2/3 for
    /// `Single`/`Double`/`Triple`.
    pub indices: [usize; 3],
    pub offset_in_block: usize,
}

pub fn file_offset_to_block(offset: u32) -> BlockPath {
    let bs = BLOCK_SIZE as u32;
    if offset < L0_END {
        return BlockPath {
            level: BlockLevel::Direct,
            indices: [(offset / bs) as usize, 0, 0],
            offset_in_block: (offset % bs) as usize,
        };
    }
    if offset < L1_END {
        let rel = offset - L0_END;
        return BlockPath {
            level: BlockLevel::Single,
            indices: [(rel / bs) as usize, 0, 0],
            offset_in_block: (rel % bs) as usize,
        };
    }
    let offset64 = offset as u64;
    if offset64 < L2_END {
        let rel = offset64 - L1_END as u64;
        let per_block = BLOCK_NUMS_PER_BLOCK as u64 * bs as u64;
        let outer = rel / per_block;
        let inner_rel = rel % per_block;
        return BlockPath {
            level: BlockLevel::Double,
            indices: [outer as usize, (inner_rel / bs as u64) as usize, 0],
            offset_in_block: (inner_rel % bs as u64) as usize,
        };
    }
    let rel = offset64 - L2_END;
    let per_mid = BLOCK_NUMS_PER_BLOCK as u64 * bs as u64;
    let per_outer = BLOCK_NUMS_PER_BLOCK as u64 * per_mid;
    let top = rel / per_outer;
    let rem1 = rel % per_outer;
    let mid = rem1 / per_mid;
    let rem2 = rem1 % per_mid;
    BlockPath {
        level: BlockLevel::Triple,
        indices: [top as usize, mid as usize, (rem2 / bs as u64) as usize],
        offset_in_block: (rem2 % bs as u64) as usize,
    }
}

/// Collapses repeated `/`.
pub fn normalize_pathname(path: &str) -> String {
    let mut out = String::new();
    let mut last_was_slash = false;
    for c in path.chars() {
        if c == '/' {
            if !last_was_slash {
                out.push(c);
            }
            last_was_slash = true;
        } else {
            out.push(c);
            last_was_slash = false;
        }
    }
    out
}

/// Splits `path` into (parent directory path, leaf name) for
/// `mknod`/`creat`.
pub fn split_parent_leaf(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    let path = if trimmed.is_empty() { path } else { trimmed };
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => (".", path),
    }
}

fn access_check_for_open(flags: OpenFlags) -> AccessCheck {
    if flags.contains(OpenFlags::O_RDWR) {
        AccessCheck::R_OK | AccessCheck::W_OK
    } else if flags.contains(OpenFlags::O_WRONLY) {
        AccessCheck::W_OK
    } else {
        AccessCheck::R_OK
    }
}

/// In-core inode cache. Sits above
/// the buffer cache's raw block bytes so repeated inode lookups within
/// one operation (e.g. walking a path) don't re-decode the same block.
struct InodeCache {
    entries: Vec<DiskInode>,
}

impl InodeCache {
    fn new() -> Self {
        InodeCache { entries: Vec::new() }
    }

    fn get(&self, num: InodeNum) -> Option<DiskInode> {
        self.entries.iter().find(|i| i.num == num).copied()
    }

    fn put(&mut self, inode: DiskInode) {
        if let Some(slot) = self.entries.iter_mut().find(|i| i.num == inode.num) {
            *slot = inode;
        } else {
            self.entries.push(inode);
        }
    }

    fn remove(&mut self, num: InodeNum) {
        self.entries.retain(|i| i.num != num);
    }
}

/// The mounted filesystem. `D` is the backing block
/// device — a `RamBlockDevice` in tests, the MCI driver's `BlockDevice`
/// impl on target.
pub struct Filesystem<D: BlockDevice> {
    device: D,
    buffers: BufferCache,
    superblock: Superblock,
    inodes: InodeCache,
}

/// Writes a fresh superblock and a single root directory inode to
/// `device`, ready for [`Filesystem::mount`]. Used where there is no
/// `mkfs`-built image to load yet — the MCI/MMC protocol that would
/// fetch one off an SD card is out of scope, so boot falls
/// back to formatting a [`crate::drivers::block::RamBlockDevice`] in
/// place, same as the unit tests in this module do by hand.
pub fn format<D: BlockDevice>(device: &mut D, total_blocks: u32) -> KernelResult<()> {
    let file_infos_size = (total_blocks / 16).max(1);
    let first_data_block = 1 + file_infos_size;
    if first_data_block >= total_blocks {
        return Err(FsError::NoSpace.into());
    }

    let mut sb = Superblock::zeroed();
    sb.size = total_blocks;
    sb.file_infos_size = file_infos_size;
    sb.root_file_info = 1;

    let total_inodes = file_infos_size as usize * FILE_INFO_PER_BLOCK;
    let mut n = 0;
    for i in 2..total_inodes as u32 {
        if n >= FSINFO_CACHE {
            break;
        }
        sb.free_file_infos[n] = i;
        n += 1;
    }
    sb.free_file_infos_size = n as u32;

    let data_blocks = total_blocks - first_data_block;
    let mut n = 0;
    for i in 0..data_blocks.saturating_sub(1) {
        if n >= FSINFO_CACHE {
            break;
        }
        sb.free_blocks[n] = first_data_block + i;
        n += 1;
    }
    sb.next_free_block = n as u32;

    let mut block0 = [0u8; BLOCK_SIZE];
    sb.encode(&mut block0);
    device.write_block(0, &block0)?;

    let root = DiskInode {
        num: 1,
        kind: FileType::Directory as u32,
        access: (Access::READ_OWNER
            | Access::WRITE_OWNER
            | Access::EXEC_OWNER
            | Access::READ_GROUP
            | Access::EXEC_GROUP
            | Access::READ_OTHERS
            | Access::EXEC_OTHERS)
            .bits(),
        owner_user: 0,
        owner_group: 0,
        size: 0,
        blocks: [0; BLOCKS_PER_FILE],
    };
    let mut inode_block = [0u8; BLOCK_SIZE];
    root.encode(&mut inode_block, DISK_INODE_SIZE);
    device.write_block(1, &inode_block)?;

    Ok(())
}

impl<D: BlockDevice> Filesystem<D> {
    /// Reads block 0 into the in-core superblock.
    pub fn mount(mut device: D) -> KernelResult<Self> {
        let mut buffers = BufferCache::new();
        let handle = buffers.get(&device, 0)?;
        let data = *buffers.data(&handle);
        buffers.put(&mut device, handle)?;
        let superblock = Superblock::decode(&data);
        Ok(Filesystem {
            device,
            buffers,
            superblock,
            inodes: InodeCache::new(),
        })
    }

    /// Writes back every in-core inode, overwrites block 0, and drains
    /// the buffer cache.
    pub fn sync(&mut self) -> KernelResult<()> {
        let dirty: Vec<DiskInode> = self.inodes.entries.clone();
        for inode in dirty {
            self.write_inode_to_disk(&inode)?;
        }
        let mut block0 = [0u8; BLOCK_SIZE];
        self.superblock.encode(&mut block0);
        let handle = self.buffers.get(&self.device, 0)?;
        *self.buffers.data_mut(&handle) = block0;
        self.buffers.put(&mut self.device, handle)?;
        self.buffers.flush_all(&mut self.device)
    }

    pub fn root_inode(&self) -> InodeNum {
        self.superblock.root_file_info
    }

    /// Unwraps the mounted filesystem back into its backing device.
    /// `mkfs` calls this once it has finished laying out an image, to
    /// pull the finished bytes back out of the in-memory device it
    /// built against.
    pub fn into_device(self) -> D {
        self.device
    }

    fn inode_location(&self, num: InodeNum) -> (u32, usize) {
        let block = 1 + num / FILE_INFO_PER_BLOCK as u32;
        let slot = (num % FILE_INFO_PER_BLOCK as u32) as usize;
        (block, slot * fslayout::DISK_INODE_SIZE)
    }

    pub fn get_inode(&mut self, num: InodeNum) -> KernelResult<DiskInode> {
        if let Some(cached) = self.inodes.get(num) {
            return Ok(cached);
        }
        let (block, offset) = self.inode_location(num);
        let handle = self.buffers.get(&self.device, block)?;
        let data = *self.buffers.data(&handle);
        self.buffers.put(&mut self.device, handle)?;
        let inode = DiskInode::decode(&data, offset);
        self.inodes.put(inode);
        Ok(inode)
    }

    fn write_inode_to_disk(&mut self, inode: &DiskInode) -> KernelResult<()> {
        let (block, offset) = self.inode_location(inode.num);
        let handle = self.buffers.get(&self.device, block)?;
        let mut data = *self.buffers.data(&handle);
        inode.encode(&mut data, offset);
        *self.buffers.data_mut(&handle) = data;
        self.buffers.put(&mut self.device, handle)
    }

    /// Writes an inode back immediately (the buffer cache has no dirty
    /// tracking — every release writes — so neither does this cache).
    fn put_inode(&mut self, inode: &DiskInode) -> KernelResult<()> {
        self.write_inode_to_disk(inode)?;
        self.inodes.put(*inode);
        Ok(())
    }

    fn read_u32_at(&mut self, block: u32, idx: usize) -> KernelResult<u32> {
        let handle = self.buffers.get(&self.device, block)?;
        let data = *self.buffers.data(&handle);
        self.buffers.put(&mut self.device, handle)?;
        Ok(u32::from_le_bytes(data[idx * 4..idx * 4 + 4].try_into().unwrap()))
    }

    fn write_u32_at(&mut self, block: u32, idx: usize, value: u32) -> KernelResult<()> {
        let handle = self.buffers.get(&self.device, block)?;
        let mut data = *self.buffers.data(&handle);
        data[idx * 4..idx * 4 + 4].copy_from_slice(&value.to_le_bytes());
        *self.buffers.data_mut(&handle) = data;
        self.buffers.put(&mut self.device, handle)
    }

    fn zero_block(&mut self, block: u32) -> KernelResult<()> {
        let handle = self.buffers.get(&self.device, block)?;
        *self.buffers.data_mut(&handle) = [0u8; BLOCK_SIZE];
        self.buffers.put(&mut self.device, handle)
    }

    fn indirect_block_is_empty(&mut self, block: u32) -> KernelResult<bool> {
        let handle = self.buffers.get(&self.device, block)?;
        let data = *self.buffers.data(&handle);
        self.buffers.put(&mut self.device, handle)?;
        Ok(data.iter().all(|&b| b == 0))
    }

    /// Read-only walk: the block currently backing `path`, or `None`
    /// for an unallocated hole.
    fn resolve_block(&mut self, inode: &DiskInode, path: &BlockPath) -> KernelResult<Option<u32>> {
        Ok(match path.level {
            BlockLevel::Direct => nz(inode.blocks[path.indices[0]]),
            BlockLevel::Single => {
                let l1 = inode.blocks[L1_INDEX];
                if l1 == 0 {
                    return Ok(None);
                }
                nz(self.read_u32_at(l1, path.indices[0])?)
            }
            BlockLevel::Double => {
                let l2 = inode.blocks[L2_INDEX];
                if l2 == 0 {
                    return Ok(None);
                }
                let mid = self.read_u32_at(l2, path.indices[0])?;
                if mid == 0 {
                    return Ok(None);
                }
                nz(self.read_u32_at(mid, path.indices[1])?)
            }
            BlockLevel::Triple => {
                let l3 = inode.blocks[L3_INDEX];
                if l3 == 0 {
                    return Ok(None);
                }
                let top = self.read_u32_at(l3, path.indices[0])?;
                if top == 0 {
                    return Ok(None);
                }
                let mid = self.read_u32_at(top, path.indices[1])?;
                if mid == 0 {
                    return Ok(None);
                }
                nz(self.read_u32_at(mid, path.indices[2])?)
            }
        })
    }

    fn ensure_inode_slot(&mut self, inode: &mut DiskInode, slot: usize) -> KernelResult<u32> {
        if inode.blocks[slot] != 0 {
            return Ok(inode.blocks[slot]);
        }
        let new_block = self.alloc_block()?;
        self.zero_block(new_block)?;
        inode.blocks[slot] = new_block;
        Ok(new_block)
    }

    fn ensure_slot(&mut self, container_block: u32, idx: usize) -> KernelResult<u32> {
        let existing = self.read_u32_at(container_block, idx)?;
        if existing != 0 {
            return Ok(existing);
        }
        let new_block = self.alloc_block()?;
        self.zero_block(new_block)?;
        self.write_u32_at(container_block, idx, new_block)?;
        Ok(new_block)
    }

    /// Allocates (idempotently) whatever indirect blocks and data block
    /// are needed to back `offset`, returning the data block number. An
    /// indirect block is allocated exactly once per level transition —
    /// `ensure_inode_slot`/`ensure_slot` only allocate when the existing
    /// pointer is zero.
    fn ensure_block_for_offset(&mut self, inode: &mut DiskInode, offset: u32) -> KernelResult<u32> {
        let path = file_offset_to_block(offset);
        match path.level {
            BlockLevel::Direct => self.ensure_inode_slot(inode, path.indices[0]),
            BlockLevel::Single => {
                let l1 = self.ensure_inode_slot(inode, L1_INDEX)?;
                self.ensure_slot(l1, path.indices[0])
            }
            BlockLevel::Double => {
                let l2 = self.ensure_inode_slot(inode, L2_INDEX)?;
                let mid = self.ensure_slot(l2, path.indices[0])?;
                self.ensure_slot(mid, path.indices[1])
            }
            BlockLevel::Triple => {
                let l3 = self.ensure_inode_slot(inode, L3_INDEX)?;
                let top = self.ensure_slot(l3, path.indices[0])?;
                let mid = self.ensure_slot(top, path.indices[1])?;
                self.ensure_slot(mid, path.indices[2])
            }
        }
    }

    fn clear_slot(&mut self, inode: &mut DiskInode, path: &BlockPath) -> KernelResult<()> {
        match path.level {
            BlockLevel::Direct => inode.blocks[path.indices[0]] = 0,
            BlockLevel::Single => {
                let l1 = inode.blocks[L1_INDEX];
                self.write_u32_at(l1, path.indices[0], 0)?;
                if self.indirect_block_is_empty(l1)? {
                    self.free_block(l1)?;
                    inode.blocks[L1_INDEX] = 0;
                }
            }
            BlockLevel::Double => {
                let l2 = inode.blocks[L2_INDEX];
                let mid = self.read_u32_at(l2, path.indices[0])?;
                self.write_u32_at(mid, path.indices[1], 0)?;
                if self.indirect_block_is_empty(mid)? {
                    self.free_block(mid)?;
                    self.write_u32_at(l2, path.indices[0], 0)?;
                    if self.indirect_block_is_empty(l2)? {
                        self.free_block(l2)?;
                        inode.blocks[L2_INDEX] = 0;
                    }
                }
            }
            BlockLevel::Triple => {
                let l3 = inode.blocks[L3_INDEX];
                let top = self.read_u32_at(l3, path.indices[0])?;
                let mid = self.read_u32_at(top, path.indices[1])?;
                self.write_u32_at(mid, path.indices[2], 0)?;
                if self.indirect_block_is_empty(mid)? {
                    self.free_block(mid)?;
                    self.write_u32_at(top, path.indices[1], 0)?;
                    if self.indirect_block_is_empty(top)? {
                        self.free_block(top)?;
                        self.write_u32_at(l3, path.indices[0], 0)?;
                        if self.indirect_block_is_empty(l3)? {
                            self.free_block(l3)?;
                            inode.blocks[L3_INDEX] = 0;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Classic UNIX `alloc()`: pop a block off the cache; if that pop
    /// drains it, read the popped block's own (still-intact) prior
    /// contents back in as the next free-list chunk before handing it
    /// to the caller.
    fn alloc_block(&mut self) -> KernelResult<u32> {
        if self.superblock.next_free_block == 0 {
            return Err(FsError::NoSpace.into());
        }
        self.superblock.next_free_block -= 1;
        let bno = self.superblock.free_blocks[self.superblock.next_free_block as usize];
        if self.superblock.next_free_block == 0 {
            self.refill_free_blocks(bno)?;
        }
        Ok(bno)
    }

    fn refill_free_blocks(&mut self, list_block: u32) -> KernelResult<()> {
        if list_block == 0 {
            self.superblock.next_free_block = 0;
            return Ok(());
        }
        let handle = self.buffers.get(&self.device, list_block)?;
        let data = *self.buffers.data(&handle);
        self.buffers.put(&mut self.device, handle)?;
        let count = u32::from_le_bytes(data[0..4].try_into().unwrap()).min(FSINFO_CACHE as u32);
        for i in 0..count as usize {
            let off = 4 + i * 4;
            self.superblock.free_blocks[i] = u32::from_le_bytes(data[off..off + 4].try_into().unwrap());
        }
        self.superblock.next_free_block = count;
        Ok(())
    }

    /// Classic UNIX `free()`: append to the cache, or — if full — write
    /// the current cache into the freed block and make it the new
    /// overflow list node.
    fn free_block(&mut self, block: u32) -> KernelResult<()> {
        if self.superblock.next_free_block as usize >= FSINFO_CACHE {
            let mut data = [0u8; BLOCK_SIZE];
            data[0..4].copy_from_slice(&(FSINFO_CACHE as u32).to_le_bytes());
            for i in 0..FSINFO_CACHE {
                let off = 4 + i * 4;
                data[off..off + 4].copy_from_slice(&self.superblock.free_blocks[i].to_le_bytes());
            }
            let handle = self.buffers.get(&self.device, block)?;
            *self.buffers.data_mut(&handle) = data;
            self.buffers.put(&mut self.device, handle)?;
            self.superblock.free_blocks[0] = block;
            self.superblock.next_free_block = 1;
        } else {
            let idx = self.superblock.next_free_block as usize;
            self.superblock.free_blocks[idx] = block;
            self.superblock.next_free_block += 1;
        }
        Ok(())
    }

    fn alloc_inode(&mut self) -> KernelResult<InodeNum> {
        if self.superblock.free_file_infos_size == 0 {
            self.refill_free_inodes()?;
        }
        if self.superblock.free_file_infos_size == 0 {
            return Err(FsError::NoInodes.into());
        }
        self.superblock.free_file_infos_size -= 1;
        Ok(self.superblock.free_file_infos[self.superblock.free_file_infos_size as usize])
    }

    /// Scans every inode block for `type == 0` entries to refill the
    /// cache. Inode 0 is reserved
    /// as a sentinel and never handed out.
    fn refill_free_inodes(&mut self) -> KernelResult<()> {
        'outer: for block_idx in 1..=self.superblock.file_infos_size {
            for slot in 0..FILE_INFO_PER_BLOCK {
                let num = (block_idx - 1) * FILE_INFO_PER_BLOCK as u32 + slot as u32;
                if num == 0 {
                    continue;
                }
                let offset = slot * fslayout::DISK_INODE_SIZE;
                let handle = self.buffers.get(&self.device, block_idx)?;
                let data = *self.buffers.data(&handle);
                self.buffers.put(&mut self.device, handle)?;
                let inode = DiskInode::decode(&data, offset);
                if inode.is_free() {
                    let idx = self.superblock.free_file_infos_size as usize;
                    self.superblock.free_file_infos[idx] = num;
                    self.superblock.free_file_infos_size += 1;
                    if self.superblock.free_file_infos_size as usize == FSINFO_CACHE {
                        break 'outer;
                    }
                }
            }
        }
        Ok(())
    }

    /// Marks an inode free on disk. If the free-inode cache is full the
    /// mark is dropped.
    pub fn free_inode(&mut self, num: InodeNum) -> KernelResult<()> {
        let mut inode = self.get_inode(num)?;
        inode.kind = FileType::Free as u32;
        inode.size = 0;
        inode.blocks = [0; BLOCKS_PER_FILE];
        self.write_inode_to_disk(&inode)?;
        self.inodes.remove(num);
        if (self.superblock.free_file_infos_size as usize) < FSINFO_CACHE {
            let idx = self.superblock.free_file_infos_size as usize;
            self.superblock.free_file_infos[idx] = num;
            self.superblock.free_file_infos_size += 1;
        } else {
            log::warn!("free-inode cache full, dropping mark for inode {num}");
        }
        Ok(())
    }

    fn check_access(&self, inode: &DiskInode, euid: u32, want: AccessCheck) -> bool {
        if euid == 0 {
            return true;
        }
        let access = Access::from_bits_truncate(inode.access);
        let bits = if euid == inode.owner_user {
            let mut b = AccessCheck::empty();
            if access.contains(Access::READ_OWNER) {
                b |= AccessCheck::R_OK;
            }
            if access.contains(Access::WRITE_OWNER) {
                b |= AccessCheck::W_OK;
            }
            if access.contains(Access::EXEC_OWNER) {
                b |= AccessCheck::X_OK;
            }
            b
        } else {
            let mut b = AccessCheck::empty();
            if access.contains(Access::READ_OTHERS) {
                b |= AccessCheck::R_OK;
            }
            if access.contains(Access::WRITE_OTHERS) {
                b |= AccessCheck::W_OK;
            }
            if access.contains(Access::EXEC_OTHERS) {
                b |= AccessCheck::X_OK;
            }
            b
        };
        bits.contains(want)
    }

    fn lookup_in_directory(&mut self, dir: &DiskInode, name: &str) -> KernelResult<Option<InodeNum>> {
        let entry_count = dir.size as usize / DIR_ENTRY_SIZE;
        for i in 0..entry_count {
            let offset = (i * DIR_ENTRY_SIZE) as u32;
            let path = file_offset_to_block(offset);
            let block = match self.resolve_block(dir, &path)? {
                Some(b) => b,
                None => continue,
            };
            let handle = self.buffers.get(&self.device, block)?;
            let data = *self.buffers.data(&handle);
            self.buffers.put(&mut self.device, handle)?;
            let entry = DirEntryRaw::decode(&data, path.offset_in_block);
            if entry.inode != 0 && entry.name_str() == name {
                return Ok(Some(entry.inode));
            }
        }
        Ok(None)
    }

    fn append_dir_entry(&mut self, dir_num: InodeNum, entry_inode: InodeNum, name: &str) -> KernelResult<()> {
        let mut dir = self.get_inode(dir_num)?;
        let offset = dir.size;
        let block = self.ensure_block_for_offset(&mut dir, offset)?;
        let path = file_offset_to_block(offset);
        let handle = self.buffers.get(&self.device, block)?;
        let mut data = *self.buffers.data(&handle);
        DirEntryRaw::new(entry_inode, name).encode(&mut data, path.offset_in_block);
        *self.buffers.data_mut(&handle) = data;
        self.buffers.put(&mut self.device, handle)?;
        dir.size += DIR_ENTRY_SIZE as u32;
        self.put_inode(&dir)
    }

    /// Path resolution: absolute paths
    /// start at the root, relative paths at `cwd`. Aborts on the first
    /// access-denied or missing component.
    pub fn name_to_file(&mut self, path: &str, cwd: InodeNum, euid: u32) -> KernelResult<InodeNum> {
        let normalized = normalize_pathname(path);
        let mut current = if normalized.starts_with('/') {
            self.superblock.root_file_info
        } else {
            cwd
        };
        for component in normalized.split('/').filter(|c| !c.is_empty()) {
            let dir = self.get_inode(current)?;
            if dir.file_type() != FileType::Directory {
                return Err(FsError::NotADirectory.into());
            }
            if !self.check_access(&dir, euid, AccessCheck::R_OK | AccessCheck::X_OK) {
                return Err(FsError::PermissionDenied.into());
            }
            current = self
                .lookup_in_directory(&dir, component)?
                .ok_or(FsError::NotFound)?;
        }
        Ok(current)
    }

    /// Resolves `path` and checks it against `flags`; the caller installs the resulting inode number into its
    /// own descriptor table.
    pub fn open(&mut self, path: &str, flags: OpenFlags, cwd: InodeNum, euid: u32) -> KernelResult<InodeNum> {
        let num = self.name_to_file(path, cwd, euid)?;
        let inode = self.get_inode(num)?;
        if !self.check_access(&inode, euid, access_check_for_open(flags)) {
            return Err(FsError::PermissionDenied.into());
        }
        Ok(num)
    }

    /// `mknod`: splitting a path is the caller's job (see
    /// [`split_parent_leaf`]) — this takes an already-resolved parent
    /// inode number and a leaf name.
    #[allow(clippy::too_many_arguments)]
    pub fn mknod(
        &mut self,
        parent: InodeNum,
        name: &str,
        kind: FileType,
        access: Access,
        owner_user: u32,
        owner_group: u32,
        euid: u32,
    ) -> KernelResult<InodeNum> {
        let parent_inode = self.get_inode(parent)?;
        if parent_inode.file_type() != FileType::Directory {
            return Err(FsError::NotADirectory.into());
        }
        if !self.check_access(&parent_inode, euid, AccessCheck::W_OK | AccessCheck::X_OK) {
            return Err(FsError::PermissionDenied.into());
        }
        if self.lookup_in_directory(&parent_inode, name)?.is_some() {
            return Err(FsError::AlreadyExists.into());
        }
        let num = self.alloc_inode()?;
        let inode = DiskInode {
            num,
            kind: kind as u32,
            access: access.bits(),
            owner_user,
            owner_group,
            size: 0,
            blocks: [0; BLOCKS_PER_FILE],
        };
        self.put_inode(&inode)?;
        self.append_dir_entry(parent, num, name)?;
        if kind == FileType::Directory {
            self.append_dir_entry(num, num, ".")?;
            self.append_dir_entry(num, parent, "..")?;
        }
        Ok(num)
    }

    /// Stashes a `(major, minor)` pair in a character/block device
    /// inode's first two direct block slots, the layout `file_read`/
    /// `file_write` expect (`fs/mod.rs`).
    pub fn set_device(&mut self, inode_num: InodeNum, major: u32, minor: u32) -> KernelResult<()> {
        let mut inode = self.get_inode(inode_num)?;
        inode.blocks[0] = major;
        inode.blocks[1] = minor;
        self.put_inode(&inode)
    }

    pub fn creat(
        &mut self,
        parent: InodeNum,
        name: &str,
        access: Access,
        owner_user: u32,
        owner_group: u32,
        euid: u32,
    ) -> KernelResult<InodeNum> {
        self.mknod(parent, name, FileType::Regular, access, owner_user, owner_group, euid)
    }

    /// Computes the block-count delta and pushes/pops blocks to match.
    pub fn resize(&mut self, inode_num: InodeNum, new_size: u32) -> KernelResult<()> {
        let mut inode = self.get_inode(inode_num)?;
        let old_size = inode.size;
        if new_size > old_size {
            self.push_blocks(&mut inode, old_size, new_size)?;
        } else if new_size < old_size {
            self.pop_blocks(&mut inode, old_size, new_size)?;
        }
        inode.size = new_size;
        self.put_inode(&inode)
    }

    fn push_blocks(&mut self, inode: &mut DiskInode, old_size: u32, new_size: u32) -> KernelResult<()> {
        let old_blocks = old_size.div_ceil(BLOCK_SIZE as u32);
        let new_blocks = new_size.div_ceil(BLOCK_SIZE as u32);
        for b in old_blocks..new_blocks {
            self.ensure_block_for_offset(inode, b * BLOCK_SIZE as u32)?;
        }
        Ok(())
    }

    fn pop_blocks(&mut self, inode: &mut DiskInode, old_size: u32, new_size: u32) -> KernelResult<()> {
        let old_blocks = old_size.div_ceil(BLOCK_SIZE as u32);
        let new_blocks = new_size.div_ceil(BLOCK_SIZE as u32);
        for b in (new_blocks..old_blocks).rev() {
            let offset = b * BLOCK_SIZE as u32;
            let path = file_offset_to_block(offset);
            if let Some(block) = self.resolve_block(inode, &path)? {
                self.free_block(block)?;
                self.clear_slot(inode, &path)?;
            }
        }
        Ok(())
    }

    /// Reads up to `buf.len()` bytes starting at `offset`, capped at
    /// `size - offset`. Unallocated holes read as zero.
    pub fn read(&mut self, inode_num: InodeNum, offset: u32, buf: &mut [u8]) -> KernelResult<usize> {
        let inode = self.get_inode(inode_num)?;
        let avail = inode.size.saturating_sub(offset);
        let count = (buf.len() as u32).min(avail) as usize;
        let mut done = 0usize;
        while done < count {
            let cur_offset = offset + done as u32;
            let path = file_offset_to_block(cur_offset);
            let chunk = (BLOCK_SIZE - path.offset_in_block).min(count - done);
            match self.resolve_block(&inode, &path)? {
                Some(block) => {
                    let handle = self.buffers.get(&self.device, block)?;
                    let data = *self.buffers.data(&handle);
                    self.buffers.put(&mut self.device, handle)?;
                    buf[done..done + chunk]
                        .copy_from_slice(&data[path.offset_in_block..path.offset_in_block + chunk]);
                }
                None => {
                    for b in &mut buf[done..done + chunk] {
                        *b = 0;
                    }
                }
            }
            done += chunk;
        }
        Ok(done)
    }

    /// Calls [`Filesystem::resize`] first when `offset + data.len()`
    /// exceeds the current size, then copies block-by-block.
    pub fn write(&mut self, inode_num: InodeNum, offset: u32, data: &[u8]) -> KernelResult<usize> {
        let required = offset.saturating_add(data.len() as u32);
        let current_size = self.get_inode(inode_num)?.size;
        if required > current_size {
            self.resize(inode_num, required)?;
        }
        let mut inode = self.get_inode(inode_num)?;
        let mut done = 0usize;
        while done < data.len() {
            let cur_offset = offset + done as u32;
            let path = file_offset_to_block(cur_offset);
            let chunk = (BLOCK_SIZE - path.offset_in_block).min(data.len() - done);
            let block = self.ensure_block_for_offset(&mut inode, cur_offset)?;
            let handle = self.buffers.get(&self.device, block)?;
            let mut block_data = *self.buffers.data(&handle);
            block_data[path.offset_in_block..path.offset_in_block + chunk]
                .copy_from_slice(&data[done..done + chunk]);
            *self.buffers.data_mut(&handle) = block_data;
            self.buffers.put(&mut self.device, handle)?;
            done += chunk;
        }
        self.put_inode(&inode)?;
        Ok(done)
    }

    pub fn chmod(&mut self, inode_num: InodeNum, new_access: Access, euid: u32) -> KernelResult<()> {
        let mut inode = self.get_inode(inode_num)?;
        if euid != 0 && euid != inode.owner_user {
            return Err(FsError::PermissionDenied.into());
        }
        inode.access = new_access.bits();
        self.put_inode(&inode)
    }

    pub fn chown(&mut self, inode_num: InodeNum, new_user: u32, new_group: u32, euid: u32) -> KernelResult<()> {
        if euid != 0 {
            return Err(FsError::PermissionDenied.into());
        }
        let mut inode = self.get_inode(inode_num)?;
        inode.owner_user = new_user;
        inode.owner_group = new_group;
        self.put_inode(&inode)
    }

    pub fn access(&mut self, inode_num: InodeNum, euid: u32, check: AccessCheck) -> KernelResult<()> {
        let inode = self.get_inode(inode_num)?;
        if self.check_access(&inode, euid, check) {
            Ok(())
        } else {
            Err(FsError::PermissionDenied.into())
        }
    }
}

fn nz(v: u32) -> Option<u32> {
    if v == 0 {
        None
    } else {
        Some(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::block::RamBlockDevice;

    fn fresh_image(total_blocks: u32, file_infos_size: u32) -> Filesystem<RamBlockDevice> {
        let mut device = RamBlockDevice::new(total_blocks);
        let first_data_block = 1 + file_infos_size;

        let mut sb = Superblock::zeroed();
        sb.size = total_blocks;
        sb.file_infos_size = file_infos_size;
        sb.root_file_info = 1;

        let total_inodes = file_infos_size as usize * FILE_INFO_PER_BLOCK;
        let mut free_count = 0;
        for n in 2..total_inodes as u32 {
            if free_count >= FSINFO_CACHE {
                break;
            }
            sb.free_file_infos[free_count] = n;
            free_count += 1;
        }
        sb.free_file_infos_size = free_count as u32;

        let data_blocks_count = total_blocks - first_data_block;
        let mut free_count = 0;
        for i in 0..data_blocks_count.saturating_sub(1) {
            if free_count >= FSINFO_CACHE {
                break;
            }
            sb.free_blocks[free_count] = first_data_block + i;
            free_count += 1;
        }
        sb.next_free_block = free_count as u32;

        let mut block0 = [0u8; BLOCK_SIZE];
        sb.encode(&mut block0);
        device.write_block(0, &block0).unwrap();

        let root = DiskInode {
            num: 1,
            kind: FileType::Directory as u32,
            access: (Access::READ_OWNER
                | Access::WRITE_OWNER
                | Access::EXEC_OWNER
                | Access::READ_OTHERS
                | Access::EXEC_OTHERS)
                .bits(),
            owner_user: 0,
            owner_group: 0,
            size: 0,
            blocks: [0; BLOCKS_PER_FILE],
        };
        let mut inode_block = [0u8; BLOCK_SIZE];
        root.encode(&mut inode_block, fslayout::DISK_INODE_SIZE);
        device.write_block(1, &inode_block).unwrap();

        let mut fs = Filesystem::mount(device).unwrap();
        fs.append_dir_entry(1, 1, ".").unwrap();
        fs.append_dir_entry(1, 1, "..").unwrap();
        fs
    }

    #[test]
    fn root_resolves_and_missing_path_fails() {
        let mut fs = fresh_image(64, 2);
        assert_eq!(fs.name_to_file("/", 1, 0).unwrap(), 1);
        assert!(fs.name_to_file("/missing", 1, 0).is_err());
    }

    #[test]
    fn creat_then_write_then_read_round_trips() {
        let mut fs = fresh_image(64, 2);
        let rw = Access::READ_OWNER | Access::WRITE_OWNER;
        let num = fs.creat(1, "a", rw, 0, 0, 0).unwrap();
        assert_eq!(fs.write(num, 0, b"hello").unwrap(), 5);
        let mut buf = [0u8; 5];
        assert_eq!(fs.read(num, 0, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn path_resolution_finds_created_file() {
        let mut fs = fresh_image(64, 2);
        let rw = Access::READ_OWNER | Access::WRITE_OWNER;
        let num = fs.creat(1, "a", rw, 0, 0, 0).unwrap();
        assert_eq!(fs.name_to_file("/a", 1, 0).unwrap(), num);
    }

    #[test]
    fn write_spanning_block_boundary_round_trips() {
        let mut fs = fresh_image(512, 2);
        let rw = Access::READ_OWNER | Access::WRITE_OWNER;
        let num = fs.creat(1, "big", rw, 0, 0, 0).unwrap();
        let n = BLOCK_SIZE + 17;
        let data: Vec<u8> = (0..n).map(|i| (i % 251) as u8).collect();
        assert_eq!(fs.write(num, 0, &data).unwrap(), n);
        let mut out = alloc::vec![0u8; n];
        assert_eq!(fs.read(num, 0, &mut out).unwrap(), n);
        assert_eq!(out, data);
    }

    #[test]
    fn write_past_l0_end_populates_single_indirect() {
        let total_data_blocks = 12 + 1 + 4;
        let mut fs = fresh_image(2 + total_data_blocks, 1);
        let rw = Access::READ_OWNER | Access::WRITE_OWNER;
        let num = fs.creat(1, "f", rw, 0, 0, 0).unwrap();
        let n = (L0_END + 4096 + 1) as usize;
        let data: Vec<u8> = (0..n).map(|i| (i % 251) as u8).collect();
        fs.write(num, 0, &data).unwrap();
        let inode = fs.get_inode(num).unwrap();
        assert_ne!(inode.blocks[L1_INDEX], 0, "single-indirect pointer should be populated");
        let mut out = alloc::vec![0u8; n];
        fs.read(num, 0, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn permission_denied_for_non_owner_without_others_write() {
        let mut fs = fresh_image(64, 2);
        let owner_only = Access::READ_OWNER | Access::WRITE_OWNER;
        let num = fs.creat(1, "secret", owner_only, 7, 0, 0).unwrap();
        assert!(fs.write(num, 0, b"x").is_ok());
        assert!(fs.access(num, 42, AccessCheck::W_OK).is_err());
        assert!(fs.access(num, 7, AccessCheck::W_OK).is_ok());
    }

    #[test]
    fn truncate_frees_blocks_and_shrinks_reads() {
        let mut fs = fresh_image(64, 2);
        let rw = Access::READ_OWNER | Access::WRITE_OWNER;
        let num = fs.creat(1, "a", rw, 0, 0, 0).unwrap();
        fs.write(num, 0, &alloc::vec![1u8; BLOCK_SIZE * 2]).unwrap();
        fs.resize(num, 10).unwrap();
        let inode = fs.get_inode(num).unwrap();
        assert_eq!(inode.size, 10);
        assert_eq!(inode.blocks[1], 0);
    }

    #[test]
    fn empty_name_components_are_collapsed() {
        assert_eq!(normalize_pathname("//a//b/"), "/a/b/");
    }

    #[test]
    fn split_parent_leaf_handles_root_parent() {
        assert_eq!(split_parent_leaf("/a"), ("/", "a"));
        assert_eq!(split_parent_leaf("/a/b"), ("/a", "b"));
        assert_eq!(split_parent_leaf("a"), (".", "a"));
    }

    /// `format` followed by `mount` then `sync` leaves block 0
    /// byte-for-byte equal to the in-core superblock it started from.
    #[test]
    fn superblock_round_trips_through_mount_and_sync() {
        let mut fs = fresh_image(64, 2);
        let rw = Access::READ_OWNER | Access::WRITE_OWNER;
        fs.creat(1, "a", rw, 0, 0, 0).unwrap();
        let before = fs.superblock;
        fs.sync().unwrap();
        let mut device = fs.into_device();
        let mut block0 = [0u8; BLOCK_SIZE];
        device.read_block(0, &mut block0).unwrap();
        let mut expected = [0u8; BLOCK_SIZE];
        before.encode(&mut expected);
        assert_eq!(block0, expected);
        assert_eq!(Superblock::decode(&block0), before);
    }
}
