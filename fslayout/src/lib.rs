//! On-disk layout shared between the kernel's `fs` module and the `mkfs`
//! host builder. Keeping these definitions in one crate is what stops the
//! two from drifting apart — see `create_mapping`/`file_offset_to_block`
//! in the kernel for the code that actually walks these structures.
#![no_std]

use bitflags::bitflags;

/// Bytes per disk block. Every persistent structure is stored in whole
/// blocks.
pub const BLOCK_SIZE: usize = 4096;

/// Maximum length of a path component stored in a directory entry.
pub const FILE_NAME_SIZE: usize = 60;

/// Number of free-block / free-inode numbers cached directly in the
/// superblock before overflowing to on-disk list blocks.
pub const FSINFO_CACHE: usize = 64;

/// Direct block pointers held in `blocks[0..L0_COUNT]`.
pub const L0_COUNT: usize = 12;
/// Index of the single-indirect slot.
pub const L1_INDEX: usize = L0_COUNT;
/// Index of the double-indirect slot.
pub const L2_INDEX: usize = L0_COUNT + 1;
/// Index of the triple-indirect slot.
pub const L3_INDEX: usize = L0_COUNT + 2;
/// Total entries in `DiskInode::blocks`.
pub const BLOCKS_PER_FILE: usize = L0_COUNT + 3;

/// 32-bit block numbers packed into one indirect block.
pub const BLOCK_NUMS_PER_BLOCK: usize = BLOCK_SIZE / 4;

/// Offset, in bytes, at which level 0 (direct blocks) ends.
pub const L0_END: u32 = (L0_COUNT * BLOCK_SIZE) as u32;
/// Offset at which level 1 (single indirect) ends.
pub const L1_END: u32 = L0_END + (BLOCK_NUMS_PER_BLOCK * BLOCK_SIZE) as u32;
/// Offset at which level 2 (double indirect) ends.
pub const L2_END: u64 =
    L1_END as u64 + (BLOCK_NUMS_PER_BLOCK * BLOCK_NUMS_PER_BLOCK * BLOCK_SIZE) as u64;
/// Offset at which level 3 (triple indirect) ends. Exceeds a 32-bit file
/// offset, so it is unreachable in practice — inherited from the 32-bit
/// `size` field on the inode, not a defect introduced here.
pub const L3_END: u64 =
    L2_END + (BLOCK_NUMS_PER_BLOCK as u64).pow(3) * BLOCK_SIZE as u64;

pub const MAX_FILE_SIZE: u32 = u32::MAX;

/// File descriptors per process; 0, 1, 2 are reserved for the console.
pub const FILE_TABLE_SIZE: usize = 16;

/// Inode type tag. `Free == 0` so a zeroed inode block is all-free inodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FileType {
    Free = 0,
    Directory = 1,
    Regular = 2,
    CharDevice = 3,
    BlockDevice = 4,
}

impl FileType {
    pub fn from_raw(v: u32) -> Self {
        match v {
            1 => FileType::Directory,
            2 => FileType::Regular,
            3 => FileType::CharDevice,
            4 => FileType::BlockDevice,
            _ => FileType::Free,
        }
    }
}

bitflags! {
    /// Access bits, three triples (owner, group, others) of (R, W, X).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Access: u32 {
        const READ_OWNER  = 0o400;
        const WRITE_OWNER = 0o200;
        const EXEC_OWNER  = 0o100;
        const READ_GROUP  = 0o040;
        const WRITE_GROUP = 0o020;
        const EXEC_GROUP  = 0o010;
        const READ_OTHERS = 0o004;
        const WRITE_OTHERS = 0o002;
        const EXEC_OTHERS  = 0o001;
    }
}

bitflags! {
    /// `open()` flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const O_RDONLY = 0b000;
        const O_WRONLY = 0b001;
        const O_RDWR   = 0b010;
        const O_CREAT  = 0b100;
    }
}

bitflags! {
    /// `access()` check flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessCheck: u32 {
        const R_OK = 0b100;
        const W_OK = 0b010;
        const X_OK = 0b001;
    }
}

/// On-disk superblock, block 0. `repr(C)` and little-endian field layout
/// so its bytes are the wire format.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    pub size: u32,
    pub free_blocks_size: u32,
    pub next_free_block: u32,
    pub free_blocks: [u32; FSINFO_CACHE],
    pub file_infos_size: u32,
    pub free_file_infos_size: u32,
    pub next_free_file_info: u32,
    pub free_file_infos: [u32; FSINFO_CACHE],
    pub root_file_info: u32,
}

impl Superblock {
    pub const fn zeroed() -> Self {
        Superblock {
            size: 0,
            free_blocks_size: 0,
            next_free_block: 0,
            free_blocks: [0; FSINFO_CACHE],
            file_infos_size: 0,
            free_file_infos_size: 0,
            next_free_file_info: 0,
            free_file_infos: [0; FSINFO_CACHE],
            root_file_info: 0,
        }
    }

    /// Parses block 0's bytes into a superblock. Uses explicit
    /// little-endian field reads rather than a pointer cast so callers
    /// can hand in an unaligned block buffer.
    pub fn decode(buf: &[u8; BLOCK_SIZE]) -> Self {
        let mut r = ByteReader::new(buf);
        let size = r.u32();
        let free_blocks_size = r.u32();
        let next_free_block = r.u32();
        let free_blocks = r.u32_array::<FSINFO_CACHE>();
        let file_infos_size = r.u32();
        let free_file_infos_size = r.u32();
        let next_free_file_info = r.u32();
        let free_file_infos = r.u32_array::<FSINFO_CACHE>();
        let root_file_info = r.u32();
        Superblock {
            size,
            free_blocks_size,
            next_free_block,
            free_blocks,
            file_infos_size,
            free_file_infos_size,
            next_free_file_info,
            free_file_infos,
            root_file_info,
        }
    }

    /// Inverse of [`Superblock::decode`].
    pub fn encode(&self, buf: &mut [u8; BLOCK_SIZE]) {
        let mut w = ByteWriter::new(buf);
        w.u32(self.size);
        w.u32(self.free_blocks_size);
        w.u32(self.next_free_block);
        w.u32_array(&self.free_blocks);
        w.u32(self.file_infos_size);
        w.u32(self.free_file_infos_size);
        w.u32(self.next_free_file_info);
        w.u32_array(&self.free_file_infos);
        w.u32(self.root_file_info);
    }

    /// View this superblock as the raw bytes that belong on block 0.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: Superblock is repr(C) and contains only plain integers,
        // so every byte pattern is valid and the size matches size_of.
        unsafe {
            core::slice::from_raw_parts(
                (self as *const Self) as *const u8,
                core::mem::size_of::<Self>(),
            )
        }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: see as_bytes.
        unsafe {
            core::slice::from_raw_parts_mut(
                (self as *mut Self) as *mut u8,
                core::mem::size_of::<Self>(),
            )
        }
    }
}

/// On-disk inode ("external file info"). Packed `FILE_INFO_PER_BLOCK`
/// per block starting at block 1.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DiskInode {
    pub num: u32,
    pub kind: u32,
    pub access: u32,
    pub owner_user: u32,
    pub owner_group: u32,
    pub size: u32,
    pub blocks: [u32; BLOCKS_PER_FILE],
}

impl DiskInode {
    pub const fn zeroed() -> Self {
        DiskInode {
            num: 0,
            kind: FileType::Free as u32,
            access: 0,
            owner_user: 0,
            owner_group: 0,
            size: 0,
            blocks: [0; BLOCKS_PER_FILE],
        }
    }

    pub fn is_free(&self) -> bool {
        self.kind == FileType::Free as u32
    }

    pub fn file_type(&self) -> FileType {
        FileType::from_raw(self.kind)
    }

    /// Reads one inode record out of `buf` at byte offset `at` (alignment
    /// unconstrained, see [`Superblock::decode`]).
    pub fn decode(buf: &[u8], at: usize) -> Self {
        let mut r = ByteReader::new(&buf[at..at + DISK_INODE_SIZE]);
        let num = r.u32();
        let kind = r.u32();
        let access = r.u32();
        let owner_user = r.u32();
        let owner_group = r.u32();
        let size = r.u32();
        let blocks = r.u32_array::<BLOCKS_PER_FILE>();
        DiskInode {
            num,
            kind,
            access,
            owner_user,
            owner_group,
            size,
            blocks,
        }
    }

    /// Inverse of [`DiskInode::decode`].
    pub fn encode(&self, buf: &mut [u8], at: usize) {
        let mut w = ByteWriter::new(&mut buf[at..at + DISK_INODE_SIZE]);
        w.u32(self.num);
        w.u32(self.kind);
        w.u32(self.access);
        w.u32(self.owner_user);
        w.u32(self.owner_group);
        w.u32(self.size);
        w.u32_array(&self.blocks);
    }
}

/// Byte size of one encoded [`DiskInode`] record (6 header words plus
/// `BLOCKS_PER_FILE` block pointers, all `u32`).
pub const DISK_INODE_SIZE: usize = 4 * (6 + BLOCKS_PER_FILE);

pub const FILE_INFO_PER_BLOCK: usize = BLOCK_SIZE / DISK_INODE_SIZE;

/// One packed directory-entry record.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DirEntryRaw {
    pub inode: u32,
    pub name: [u8; FILE_NAME_SIZE],
}

impl DirEntryRaw {
    pub const fn empty() -> Self {
        DirEntryRaw {
            inode: 0,
            name: [0; FILE_NAME_SIZE],
        }
    }

    pub fn new(inode: u32, name: &str) -> Self {
        let mut raw = DirEntryRaw::empty();
        raw.inode = inode;
        let bytes = name.as_bytes();
        let n = bytes.len().min(FILE_NAME_SIZE);
        raw.name[..n].copy_from_slice(&bytes[..n]);
        raw
    }

    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(FILE_NAME_SIZE);
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    /// Reads one directory-entry record out of `buf` at byte offset `at`.
    pub fn decode(buf: &[u8], at: usize) -> Self {
        let mut r = ByteReader::new(&buf[at..at + DIR_ENTRY_SIZE]);
        let inode = r.u32();
        let mut name = [0u8; FILE_NAME_SIZE];
        name.copy_from_slice(r.bytes(FILE_NAME_SIZE));
        DirEntryRaw { inode, name }
    }

    /// Inverse of [`DirEntryRaw::decode`].
    pub fn encode(&self, buf: &mut [u8], at: usize) {
        let mut w = ByteWriter::new(&mut buf[at..at + DIR_ENTRY_SIZE]);
        w.u32(self.inode);
        w.bytes(&self.name);
    }
}

/// Byte size of one encoded [`DirEntryRaw`] record.
pub const DIR_ENTRY_SIZE: usize = 4 + FILE_NAME_SIZE;

pub const DIRECTORIES_PER_BLOCK: usize = BLOCK_SIZE / DIR_ENTRY_SIZE;

/// Minimal little-endian cursor reader over a byte slice. Used instead
/// of pointer-cast reinterpretation so on-disk structs can be decoded
/// from buffers with no particular alignment guarantee.
struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        ByteReader { buf, pos: 0 }
    }

    fn u32(&mut self) -> u32 {
        let v = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }

    fn u32_array<const N: usize>(&mut self) -> [u32; N] {
        let mut out = [0u32; N];
        for slot in out.iter_mut() {
            *slot = self.u32();
        }
        out
    }

    fn bytes(&mut self, n: usize) -> &'a [u8] {
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        out
    }
}

struct ByteWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> ByteWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        ByteWriter { buf, pos: 0 }
    }

    fn u32(&mut self, v: u32) {
        self.buf[self.pos..self.pos + 4].copy_from_slice(&v.to_le_bytes());
        self.pos += 4;
    }

    fn u32_array(&mut self, vs: &[u32]) {
        for &v in vs {
            self.u32(v);
        }
    }

    fn bytes(&mut self, b: &[u8]) {
        self.buf[self.pos..self.pos + b.len()].copy_from_slice(b);
        self.pos += b.len();
    }
}

/// Console device numbers (major, minor): console is major 5, minor 1.
pub const CONSOLE_MAJOR: u32 = 5;
pub const CONSOLE_MINOR: u32 = 1;
pub const CONSOLE_NAME: &str = "console";

/// Single MMC/SD block device the filesystem mounts against.
pub const MCI_BLOCK_MAJOR: u32 = 1;
pub const MCI_BLOCK_MINOR: u32 = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superblock_size_is_block_sized_or_smaller() {
        assert!(core::mem::size_of::<Superblock>() <= BLOCK_SIZE);
    }

    #[test]
    fn dir_entry_round_trips_name() {
        let e = DirEntryRaw::new(7, "hello.txt");
        assert_eq!(e.inode, 7);
        assert_eq!(e.name_str(), "hello.txt");
    }

    #[test]
    fn level_boundaries_are_monotonic() {
        assert!(L0_END > 0);
        assert!(L1_END > L0_END);
        assert!(L2_END > L1_END as u64);
        assert!(L3_END > L2_END);
    }

    #[test]
    fn free_inode_is_zeroed_kind() {
        let inode = DiskInode::zeroed();
        assert!(inode.is_free());
        assert_eq!(inode.file_type(), FileType::Free);
    }

    #[test]
    fn superblock_round_trips_through_encode_decode() {
        let mut sb = Superblock::zeroed();
        sb.size = 4096;
        sb.free_blocks_size = 3;
        sb.free_blocks[0] = 10;
        sb.free_blocks[1] = 11;
        sb.root_file_info = 1;
        let mut buf = [0u8; BLOCK_SIZE];
        sb.encode(&mut buf);
        let back = Superblock::decode(&buf);
        assert_eq!(back.size, 4096);
        assert_eq!(back.free_blocks_size, 3);
        assert_eq!(back.free_blocks[1], 11);
        assert_eq!(back.root_file_info, 1);
    }

    #[test]
    fn disk_inode_round_trips_at_an_offset() {
        let mut inode = DiskInode::zeroed();
        inode.num = 7;
        inode.kind = FileType::Regular as u32;
        inode.size = 123;
        inode.blocks[0] = 55;
        let mut block = [0u8; BLOCK_SIZE];
        inode.encode(&mut block, DISK_INODE_SIZE);
        let back = DiskInode::decode(&block, DISK_INODE_SIZE);
        assert_eq!(back.num, 7);
        assert_eq!(back.file_type(), FileType::Regular);
        assert_eq!(back.size, 123);
        assert_eq!(back.blocks[0], 55);
    }

    #[test]
    fn dir_entry_round_trips_through_encode_decode() {
        let e = DirEntryRaw::new(3, "a.txt");
        let mut block = [0u8; BLOCK_SIZE];
        e.encode(&mut block, DIR_ENTRY_SIZE);
        let back = DirEntryRaw::decode(&block, DIR_ENTRY_SIZE);
        assert_eq!(back.inode, 3);
        assert_eq!(back.name_str(), "a.txt");
    }
}
