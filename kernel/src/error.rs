//! Kernel-wide error types.
//!
//! Internally every subsystem returns a typed `KernelResult<T>`. Only at
//! the syscall dispatch boundary (`syscall::dispatch`) does this collapse
//! down to the ABI's single `-1` sentinel.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    Mem(MemError),
    Fs(FsError),
    Proc(ProcError),
    Syscall(SyscallError),
    InvalidAddress { addr: u32 },
    NotInitialized { subsystem: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
    /// The bootstrap or frame allocator has no region satisfying the
    /// request.
    OutOfFrames,
    /// A requested address or size did not meet an alignment invariant.
    Misaligned,
    /// `alloc`'s gap requirement (small-object allocator metadata byte)
    /// could not be satisfied.
    GapUnavailable,
    /// No mapping exists for a `mapping_exists`/page-walk query.
    Unmapped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    AlreadyExists,
    PermissionDenied,
    NotADirectory,
    IsADirectory,
    NoSpace,
    NoInodes,
    TooManyOpenFiles,
    BadFileDescriptor,
    InvalidPath,
    FileTooLarge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcError {
    TableFull,
    NoSuchProcess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    OutOfRange { nr: u32 },
}

pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mem(e) => write!(f, "memory error: {:?}", e),
            Self::Fs(e) => write!(f, "filesystem error: {:?}", e),
            Self::Proc(e) => write!(f, "process error: {:?}", e),
            Self::Syscall(e) => write!(f, "syscall error: {:?}", e),
            Self::InvalidAddress { addr } => write!(f, "invalid address 0x{:x}", addr),
            Self::NotInitialized { subsystem } => {
                write!(f, "subsystem not initialized: {}", subsystem)
            }
        }
    }
}

impl From<MemError> for KernelError {
    fn from(e: MemError) -> Self {
        Self::Mem(e)
    }
}

impl From<FsError> for KernelError {
    fn from(e: FsError) -> Self {
        Self::Fs(e)
    }
}

impl From<ProcError> for KernelError {
    fn from(e: ProcError) -> Self {
        Self::Proc(e)
    }
}

impl From<SyscallError> for KernelError {
    fn from(e: SyscallError) -> Self {
        Self::Syscall(e)
    }
}

/// Collapses a typed result down to the syscall ABI's sentinel: the
/// non-negative value on success, `-1` on any failure. This is the one
/// place "one bit of failure information" is intentional —
/// everything above this boundary keeps the full typed error.
pub fn to_abi_result(r: KernelResult<u32>) -> i32 {
    match r {
        Ok(v) => v as i32,
        Err(e) => {
            log::warn!("syscall failed: {}", e);
            -1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abi_collapses_success_and_failure() {
        assert_eq!(to_abi_result(Ok(5)), 5);
        assert_eq!(to_abi_result(Err(KernelError::Fs(FsError::NotFound))), -1);
    }
}
