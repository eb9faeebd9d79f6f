//! Syscall dispatch: a fixed table indexed by the
//! syscall number the SVC trap puts in `r7`, covering exactly `access`,
//! `chmod`, `chown`, `open`, `read`, `write`, `close`, `mknod`, `creat`,
//! `seek`, `chdir`. Arguments arrive in `r0..r6`; the result goes back
//! in `r0`, collapsed to the ABI's single `-1` sentinel by
//! [`crate::error::to_abi_result`].
//!
//! Path and buffer arguments are raw `(pointer, length)` pairs into the
//! calling process's own address space. The trap handler runs on the
//! interrupted process's own page table, so a pointer valid in user mode is valid
//! here too; there is no separate user/kernel copy step, matching the
//! single bit of failure information the rest of the ABI already gives
//! up.

use alloc::string::{String, ToString};

use fslayout::{Access, AccessCheck, FileType, OpenFlags};

use crate::drivers::block::BlockDevice;
use crate::error::{to_abi_result, FsError, KernelError, KernelResult, ProcError, SyscallError};
use crate::fs::blockfs::split_parent_leaf;
use crate::fs::{file_read, file_write, FileDescriptor};
use crate::kernel::Kernel;
use crate::process::ProcessId;

/// Highest valid value for `r7`.
pub const MAX_SYSCALL_NUMBER: u32 = 10;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Access = 0,
    Chmod = 1,
    Chown = 2,
    Open = 3,
    Read = 4,
    Write = 5,
    Close = 6,
    Mknod = 7,
    Creat = 8,
    Seek = 9,
    Chdir = 10,
}

impl Syscall {
    fn from_number(nr: u32) -> Option<Self> {
        Some(match nr {
            0 => Self::Access,
            1 => Self::Chmod,
            2 => Self::Chown,
            3 => Self::Open,
            4 => Self::Read,
            5 => Self::Write,
            6 => Self::Close,
            7 => Self::Mknod,
            8 => Self::Creat,
            9 => Self::Seek,
            10 => Self::Chdir,
            _ => return None,
        })
    }
}

/// Reads a path argument out of the caller's address space.
///
/// # Safety
/// `ptr` must point at `len` readable, UTF-8 bytes for the duration of
/// this call.
unsafe fn user_path(ptr: u32, len: u32) -> KernelResult<String> {
    if ptr == 0 {
        return Err(FsError::InvalidPath.into());
    }
    let bytes = core::slice::from_raw_parts(crate::mm::phys::phys_to_ptr(ptr), len as usize);
    core::str::from_utf8(bytes)
        .map(|s| s.to_string())
        .map_err(|_| FsError::InvalidPath.into())
}

/// # Safety
/// `ptr` must point at `len` bytes, readable for the duration of the call.
unsafe fn user_slice<'a>(ptr: u32, len: u32) -> KernelResult<&'a [u8]> {
    if ptr == 0 && len != 0 {
        return Err(FsError::InvalidPath.into());
    }
    Ok(core::slice::from_raw_parts(crate::mm::phys::phys_to_ptr(ptr), len as usize))
}

/// # Safety
/// `ptr` must point at `len` bytes, writable for the duration of the call.
unsafe fn user_slice_mut<'a>(ptr: u32, len: u32) -> KernelResult<&'a mut [u8]> {
    if ptr == 0 && len != 0 {
        return Err(FsError::InvalidPath.into());
    }
    Ok(core::slice::from_raw_parts_mut(crate::mm::phys::phys_to_ptr(ptr), len as usize))
}

fn current_euid_cwd<D: BlockDevice>(
    kernel: &Kernel<D>,
    pid: ProcessId,
) -> KernelResult<(u32, crate::fs::InodeNum)> {
    let process = kernel
        .processes
        .get(pid)
        .ok_or::<KernelError>(ProcError::NoSuchProcess.into())?;
    Ok((process.euid, process.cwd))
}

/// Dispatches one trapped syscall. `args` holds `r0..r6` in order; `nr`
/// is the value of `r7`. Returns the raw value to place in `r0`.
pub fn dispatch<D: BlockDevice>(kernel: &mut Kernel<D>, pid: ProcessId, nr: u32, args: [u32; 7]) -> i32 {
    let Some(syscall) = Syscall::from_number(nr) else {
        return to_abi_result(Err(SyscallError::OutOfRange { nr }.into()));
    };
    to_abi_result(handle(kernel, pid, syscall, args))
}

fn handle<D: BlockDevice>(
    kernel: &mut Kernel<D>,
    pid: ProcessId,
    syscall: Syscall,
    args: [u32; 7],
) -> KernelResult<u32> {
    match syscall {
        Syscall::Access => sys_access(kernel, pid, args[0], args[1], args[2]),
        Syscall::Chmod => sys_chmod(kernel, pid, args[0], args[1], args[2]),
        Syscall::Chown => sys_chown(kernel, pid, args[0], args[1], args[2], args[3]),
        Syscall::Open => sys_open(kernel, pid, args[0], args[1], args[2], args[3]),
        Syscall::Read => sys_read(kernel, pid, args[0], args[1], args[2]),
        Syscall::Write => sys_write(kernel, pid, args[0], args[1], args[2]),
        Syscall::Close => sys_close(kernel, pid, args[0]),
        Syscall::Mknod => sys_mknod(kernel, pid, args[0], args[1], args[2], args[3], args[4]),
        Syscall::Creat => sys_creat(kernel, pid, args[0], args[1], args[2]),
        Syscall::Seek => sys_seek(kernel, pid, args[0], args[1]),
        Syscall::Chdir => sys_chdir(kernel, pid, args[0], args[1]),
    }
}

/// `access(path_ptr, path_len, mode)`.
fn sys_access<D: BlockDevice>(
    kernel: &mut Kernel<D>,
    pid: ProcessId,
    path_ptr: u32,
    path_len: u32,
    mode: u32,
) -> KernelResult<u32> {
    let path = unsafe { user_path(path_ptr, path_len)? };
    let (euid, cwd) = current_euid_cwd(kernel, pid)?;
    let inode = kernel.fs.name_to_file(&path, cwd, euid)?;
    let check = AccessCheck::from_bits_truncate(mode);
    kernel.fs.access(inode, euid, check)?;
    Ok(0)
}

/// `chmod(path_ptr, path_len, mode)`.
fn sys_chmod<D: BlockDevice>(
    kernel: &mut Kernel<D>,
    pid: ProcessId,
    path_ptr: u32,
    path_len: u32,
    mode: u32,
) -> KernelResult<u32> {
    let path = unsafe { user_path(path_ptr, path_len)? };
    let (euid, cwd) = current_euid_cwd(kernel, pid)?;
    let inode = kernel.fs.name_to_file(&path, cwd, euid)?;
    kernel.fs.chmod(inode, Access::from_bits_truncate(mode), euid)?;
    Ok(0)
}

/// `chown(path_ptr, path_len, uid, gid)`.
fn sys_chown<D: BlockDevice>(
    kernel: &mut Kernel<D>,
    pid: ProcessId,
    path_ptr: u32,
    path_len: u32,
    uid: u32,
    gid: u32,
) -> KernelResult<u32> {
    let path = unsafe { user_path(path_ptr, path_len)? };
    let (euid, cwd) = current_euid_cwd(kernel, pid)?;
    let inode = kernel.fs.name_to_file(&path, cwd, euid)?;
    kernel.fs.chown(inode, uid, gid, euid)?;
    Ok(0)
}

/// `open(path_ptr, path_len, flags, mode)`. `mode` is the access bits
/// used only when `flags` carries `O_CREAT` and the file does not
/// already exist.
fn sys_open<D: BlockDevice>(
    kernel: &mut Kernel<D>,
    pid: ProcessId,
    path_ptr: u32,
    path_len: u32,
    flags: u32,
    mode: u32,
) -> KernelResult<u32> {
    let path = unsafe { user_path(path_ptr, path_len)? };
    let flags = OpenFlags::from_bits_truncate(flags);
    let fd = open_or_create(kernel, pid, &path, flags, Access::from_bits_truncate(mode))?;
    Ok(fd as u32)
}

/// Shared by `open` (with `O_CREAT`) and `creat`: resolve the path, and
/// if it's missing and creation was requested, create it in its parent
/// directory.
fn open_or_create<D: BlockDevice>(
    kernel: &mut Kernel<D>,
    pid: ProcessId,
    path: &str,
    flags: OpenFlags,
    mode: Access,
) -> KernelResult<usize> {
    let (euid, cwd) = current_euid_cwd(kernel, pid)?;
    let inode = match kernel.fs.open(path, flags, cwd, euid) {
        Ok(num) => num,
        Err(KernelError::Fs(FsError::NotFound)) if flags.contains(OpenFlags::O_CREAT) => {
            let (parent_path, leaf) = split_parent_leaf(path);
            let parent = kernel.fs.name_to_file(parent_path, cwd, euid)?;
            kernel.fs.creat(parent, leaf, mode, euid, euid, euid)?
        }
        Err(e) => return Err(e),
    };
    let process = kernel
        .processes
        .get_mut(pid)
        .ok_or::<KernelError>(ProcError::NoSuchProcess.into())?;
    process.fds.install(FileDescriptor {
        flags,
        offset: 0,
        inode,
    })
}

/// `read(fd, buf_ptr, len)`.
fn sys_read<D: BlockDevice>(
    kernel: &mut Kernel<D>,
    pid: ProcessId,
    fd: u32,
    buf_ptr: u32,
    len: u32,
) -> KernelResult<u32> {
    let buf = unsafe { user_slice_mut(buf_ptr, len)? };
    let process = kernel
        .processes
        .get_mut(pid)
        .ok_or::<KernelError>(ProcError::NoSuchProcess.into())?;
    let descriptor = process.fds.get_mut(fd as usize)?;
    let n = file_read(&mut kernel.fs, &mut kernel.devices, descriptor, buf)?;
    Ok(n as u32)
}

/// `write(fd, buf_ptr, len)`.
fn sys_write<D: BlockDevice>(
    kernel: &mut Kernel<D>,
    pid: ProcessId,
    fd: u32,
    buf_ptr: u32,
    len: u32,
) -> KernelResult<u32> {
    let buf = unsafe { user_slice(buf_ptr, len)? };
    let process = kernel
        .processes
        .get_mut(pid)
        .ok_or::<KernelError>(ProcError::NoSuchProcess.into())?;
    let descriptor = process.fds.get_mut(fd as usize)?;
    let n = file_write(&mut kernel.fs, &mut kernel.devices, descriptor, buf)?;
    Ok(n as u32)
}

/// `close(fd)`.
fn sys_close<D: BlockDevice>(kernel: &mut Kernel<D>, pid: ProcessId, fd: u32) -> KernelResult<u32> {
    let process = kernel
        .processes
        .get_mut(pid)
        .ok_or::<KernelError>(ProcError::NoSuchProcess.into())?;
    process.fds.close(fd as usize)?;
    Ok(0)
}

/// `mknod(path_ptr, path_len, kind, mode, dev)`. `dev` packs
/// `(major << 16) | minor` for character/block device nodes; ignored
/// for every other `kind`.
fn sys_mknod<D: BlockDevice>(
    kernel: &mut Kernel<D>,
    pid: ProcessId,
    path_ptr: u32,
    path_len: u32,
    kind: u32,
    mode: u32,
    dev: u32,
) -> KernelResult<u32> {
    let path = unsafe { user_path(path_ptr, path_len)? };
    let (euid, cwd) = current_euid_cwd(kernel, pid)?;
    let (parent_path, leaf) = split_parent_leaf(&path);
    let parent = kernel.fs.name_to_file(parent_path, cwd, euid)?;
    let kind = FileType::from_raw(kind);
    let access = Access::from_bits_truncate(mode);
    let num = kernel.fs.mknod(parent, leaf, kind, access, euid, euid, euid)?;
    if matches!(kind, FileType::CharDevice | FileType::BlockDevice) {
        kernel.fs.set_device(num, dev >> 16, dev & 0xffff)?;
    }
    Ok(0)
}

/// `creat(path_ptr, path_len, mode)`: `open(path, O_CREAT | O_WRONLY, mode)`.
fn sys_creat<D: BlockDevice>(
    kernel: &mut Kernel<D>,
    pid: ProcessId,
    path_ptr: u32,
    path_len: u32,
    mode: u32,
) -> KernelResult<u32> {
    let path = unsafe { user_path(path_ptr, path_len)? };
    let fd = open_or_create(
        kernel,
        pid,
        &path,
        OpenFlags::O_CREAT | OpenFlags::O_WRONLY,
        Access::from_bits_truncate(mode),
    )?;
    Ok(fd as u32)
}

/// `seek(fd, offset)`: sets the descriptor's byte offset absolutely and
/// returns the new offset.
fn sys_seek<D: BlockDevice>(kernel: &mut Kernel<D>, pid: ProcessId, fd: u32, offset: u32) -> KernelResult<u32> {
    let process = kernel
        .processes
        .get_mut(pid)
        .ok_or::<KernelError>(ProcError::NoSuchProcess.into())?;
    let descriptor = process.fds.get_mut(fd as usize)?;
    descriptor.offset = offset;
    Ok(descriptor.offset)
}

/// `chdir(path_ptr, path_len)`.
fn sys_chdir<D: BlockDevice>(
    kernel: &mut Kernel<D>,
    pid: ProcessId,
    path_ptr: u32,
    path_len: u32,
) -> KernelResult<u32> {
    let path = unsafe { user_path(path_ptr, path_len)? };
    let (euid, cwd) = current_euid_cwd(kernel, pid)?;
    let inode = kernel.fs.name_to_file(&path, cwd, euid)?;
    if kernel.fs.get_inode(inode)?.file_type() != FileType::Directory {
        return Err(FsError::NotADirectory.into());
    }
    let process = kernel
        .processes
        .get_mut(pid)
        .ok_or::<KernelError>(ProcError::NoSuchProcess.into())?;
    process.cwd = inode;
    Ok(0)
}
