//! The filesystem stack: a block buffer cache, the
//! on-disk UNIX-style filesystem built on top of it, and the
//! per-process descriptor table that sits above both.

pub mod blockfs;
pub mod buffer;
pub mod descriptor;

pub use blockfs::{file_offset_to_block, format, normalize_pathname, split_parent_leaf, Filesystem, InodeNum};
pub use buffer::BufferCache;
pub use descriptor::{DescriptorTable, FileDescriptor, RESERVED_DESCRIPTORS};

use fslayout::FileType;

use crate::config::BLOCK_SIZE;
use crate::device::{Device, DeviceId, DeviceRegistry};
use crate::drivers::block::BlockDevice;
use crate::error::{FsError, KernelResult};

/// `file_read`/`file_write` dispatch: a descriptor whose
/// inode names a device consults the device table by (major, minor) —
/// stashed in the inode's first two direct block slots for device
/// files — and invokes the registered device op; a descriptor over a
/// regular file uses the block-granular copy loop directly.
pub fn file_read<D: BlockDevice>(
    fs: &mut Filesystem<D>,
    devices: &mut DeviceRegistry,
    descriptor: &mut FileDescriptor,
    buf: &mut [u8],
) -> KernelResult<usize> {
    let inode = fs.get_inode(descriptor.inode)?;
    match inode.file_type() {
        FileType::CharDevice | FileType::BlockDevice => {
            let id = DeviceId {
                major: inode.blocks[0],
                minor: inode.blocks[1],
            };
            match devices.lookup_for_inode(inode.file_type(), id.major, id.minor)? {
                Device::Char(terminal) => Ok(terminal.read(buf)),
                Device::Block(block_device) => {
                    if buf.len() < BLOCK_SIZE {
                        return Err(FsError::InvalidPath.into());
                    }
                    let mut full = [0u8; BLOCK_SIZE];
                    block_device.read_block(descriptor.offset, &mut full)?;
                    buf[..BLOCK_SIZE].copy_from_slice(&full);
                    descriptor.offset += 1;
                    Ok(BLOCK_SIZE)
                }
            }
        }
        _ => {
            let n = fs.read(descriptor.inode, descriptor.offset, buf)?;
            descriptor.offset += n as u32;
            Ok(n)
        }
    }
}

pub fn file_write<D: BlockDevice>(
    fs: &mut Filesystem<D>,
    devices: &mut DeviceRegistry,
    descriptor: &mut FileDescriptor,
    data: &[u8],
) -> KernelResult<usize> {
    let inode = fs.get_inode(descriptor.inode)?;
    match inode.file_type() {
        FileType::CharDevice | FileType::BlockDevice => {
            let id = DeviceId {
                major: inode.blocks[0],
                minor: inode.blocks[1],
            };
            match devices.lookup_for_inode(inode.file_type(), id.major, id.minor)? {
                Device::Char(terminal) => {
                    terminal.write(data);
                    Ok(data.len())
                }
                Device::Block(block_device) => {
                    if data.len() < BLOCK_SIZE {
                        return Err(FsError::InvalidPath.into());
                    }
                    let mut full = [0u8; BLOCK_SIZE];
                    full.copy_from_slice(&data[..BLOCK_SIZE]);
                    block_device.write_block(descriptor.offset, &full)?;
                    descriptor.offset += 1;
                    Ok(BLOCK_SIZE)
                }
            }
        }
        _ => {
            let n = fs.write(descriptor.inode, descriptor.offset, data)?;
            descriptor.offset += n as u32;
            Ok(n)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::block::RamBlockDevice;
    use crate::drivers::uart::HostUart;
    use fslayout::{Access, BLOCKS_PER_FILE, OpenFlags, CONSOLE_MAJOR, CONSOLE_MINOR};

    fn image_with_console(total_blocks: u32) -> (Filesystem<RamBlockDevice>, DeviceRegistry, InodeNum) {
        let mut device = RamBlockDevice::new(total_blocks);
        let file_infos_size = 2u32;
        let first_data_block = 1 + file_infos_size;

        let mut sb = fslayout::Superblock::zeroed();
        sb.size = total_blocks;
        sb.file_infos_size = file_infos_size;
        sb.root_file_info = 1;
        let total_inodes = file_infos_size as usize * fslayout::FILE_INFO_PER_BLOCK;
        let mut n = 0;
        for i in 3..total_inodes as u32 {
            if n >= fslayout::FSINFO_CACHE {
                break;
            }
            sb.free_file_infos[n] = i;
            n += 1;
        }
        sb.free_file_infos_size = n as u32;
        let data_blocks = total_blocks - first_data_block;
        let mut n = 0;
        for i in 0..data_blocks.saturating_sub(1) {
            if n >= fslayout::FSINFO_CACHE {
                break;
            }
            sb.free_blocks[n] = first_data_block + i;
            n += 1;
        }
        sb.next_free_block = n as u32;
        let mut block0 = [0u8; BLOCK_SIZE];
        sb.encode(&mut block0);
        device.write_block(0, &block0).unwrap();

        let root = fslayout::DiskInode {
            num: 1,
            kind: FileType::Directory as u32,
            access: (Access::READ_OWNER | Access::WRITE_OWNER | Access::EXEC_OWNER).bits(),
            owner_user: 0,
            owner_group: 0,
            size: 0,
            blocks: [0; BLOCKS_PER_FILE],
        };
        let mut console_blocks = [0u32; BLOCKS_PER_FILE];
        console_blocks[0] = CONSOLE_MAJOR;
        console_blocks[1] = CONSOLE_MINOR;
        let console = fslayout::DiskInode {
            num: 2,
            kind: FileType::CharDevice as u32,
            access: (Access::READ_OWNER | Access::WRITE_OWNER | Access::READ_OTHERS | Access::WRITE_OTHERS).bits(),
            owner_user: 0,
            owner_group: 0,
            size: 0,
            blocks: console_blocks,
        };

        let mut inode_block = [0u8; BLOCK_SIZE];
        root.encode(&mut inode_block, fslayout::DISK_INODE_SIZE);
        console.encode(&mut inode_block, fslayout::DISK_INODE_SIZE * 2);
        device.write_block(1, &inode_block).unwrap();

        let fs = Filesystem::mount(device).unwrap();
        let mut devices = DeviceRegistry::new();
        devices.register_console(HostUart::new());
        (fs, devices, 2)
    }

    #[test]
    fn writing_to_a_char_device_descriptor_goes_to_the_terminal() {
        let (mut fs, mut devices, console) = image_with_console(16);
        let mut fd = FileDescriptor {
            flags: OpenFlags::O_WRONLY,
            offset: 0,
            inode: console,
        };
        let n = file_write(&mut fs, &mut devices, &mut fd, b"hi").unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn reading_from_a_regular_file_descriptor_advances_offset() {
        let (mut fs, mut devices, _console) = image_with_console(64);
        let num = fs
            .creat(1, "a", Access::READ_OWNER | Access::WRITE_OWNER, 0, 0, 0)
            .unwrap();
        fs.write(num, 0, b"abcdef").unwrap();
        let mut fd = FileDescriptor {
            flags: OpenFlags::O_RDONLY,
            offset: 0,
            inode: num,
        };
        let mut buf = [0u8; 3];
        let n = file_read(&mut fs, &mut devices, &mut fd, &mut buf).unwrap();
        assert_eq!(n, 3);
        assert_eq!(&buf, b"abc");
        assert_eq!(fd.offset, 3);
    }
}
