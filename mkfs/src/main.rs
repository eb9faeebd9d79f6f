//! Host-side filesystem image builder.
//!
//! Lays out a superblock, root directory, the standard top-level directories, a
//! `/dev/console` device node, and (with `-i`) an init program under
//! `/sbin/init`. The on-disk layout is produced by calling straight into
//! `tile_kernel::fs` so the image this tool writes is exactly what
//! `Filesystem::mount` expects to read back — there is only one
//! implementation of the layout, shared via `fslayout` and linked in
//! here rather than duplicated.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use fslayout::{Access, FileType, CONSOLE_MAJOR, CONSOLE_MINOR};
use tile_kernel::drivers::block::{BlockDevice, RamBlockDevice};
use tile_kernel::error::KernelError;
use tile_kernel::fs::{self, Filesystem, InodeNum};

/// Top-level directories every image gets.
const STANDARD_DIRECTORIES: &[&str] = &[
    "bin", "boot", "dev", "etc", "lib", "media", "mnt", "opt", "run", "sbin", "srv", "tmp", "usr", "var",
];

const DIRECTORY_ACCESS: Access = Access::from_bits_truncate(
    Access::READ_OWNER.bits()
        | Access::WRITE_OWNER.bits()
        | Access::EXEC_OWNER.bits()
        | Access::READ_GROUP.bits()
        | Access::EXEC_GROUP.bits()
        | Access::READ_OTHERS.bits()
        | Access::EXEC_OTHERS.bits(),
);

const CONSOLE_ACCESS: Access = Access::from_bits_truncate(
    Access::READ_OWNER.bits() | Access::WRITE_OWNER.bits() | Access::READ_OTHERS.bits() | Access::WRITE_OTHERS.bits(),
);

const FILE_ACCESS: Access =
    Access::from_bits_truncate(Access::READ_OWNER.bits() | Access::WRITE_OWNER.bits() | Access::READ_OTHERS.bits());

/// Builds a `tile` filesystem image.
#[derive(Parser)]
#[command(name = "mkfs", about = "Build a tile filesystem image")]
struct Args {
    /// Number of 4096-byte blocks in the image.
    #[arg(short = 'b', long = "blocks", default_value_t = 4096)]
    blocks: u32,

    /// Optional program binary to install as /sbin/init.
    #[arg(short = 'i', long = "init")]
    init: Option<PathBuf>,

    /// Path of the image file to create.
    device: PathBuf,
}

fn fail(msg: impl core::fmt::Display) -> ExitCode {
    eprintln!("mkfs: error: {msg}");
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.blocks == 0 {
        return fail("invalid blocks count");
    }

    let init_bytes = match &args.init {
        Some(path) => match std::fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(e) => return fail(format_args!("reading {}: {e}", path.display())),
        },
        None => None,
    };

    match build_image(args.blocks, init_bytes.as_deref()) {
        Ok(bytes) => match std::fs::write(&args.device, bytes) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => fail(format_args!("writing {}: {e}", args.device.display())),
        },
        Err(e) => fail(e),
    }
}

/// Lays out a complete image in memory and returns its raw bytes.
fn build_image(blocks: u32, init: Option<&[u8]>) -> Result<Vec<u8>, KernelError> {
    let mut device = RamBlockDevice::new(blocks);
    fs::format(&mut device, blocks)?;
    let mut filesystem = Filesystem::mount(device)?;

    let root = filesystem.root_inode();
    let mut named: Vec<(&str, InodeNum)> = Vec::with_capacity(STANDARD_DIRECTORIES.len());
    for &name in STANDARD_DIRECTORIES {
        let inode = filesystem.mknod(root, name, FileType::Directory, DIRECTORY_ACCESS, 0, 0, 0)?;
        named.push((name, inode));
    }

    let dev_inode = named
        .iter()
        .find(|(name, _)| *name == "dev")
        .map(|(_, inode)| *inode)
        .expect("dev is always created above");
    let console = filesystem.mknod(dev_inode, "console", FileType::CharDevice, CONSOLE_ACCESS, 0, 0, 0)?;
    filesystem.set_device(console, CONSOLE_MAJOR, CONSOLE_MINOR)?;

    if let Some(program) = init {
        let sbin_inode = named
            .iter()
            .find(|(name, _)| *name == "sbin")
            .map(|(_, inode)| *inode)
            .expect("sbin is always created above");
        let init_inode = filesystem.creat(sbin_inode, "init", FILE_ACCESS, 0, 0, 0)?;
        filesystem.write(init_inode, 0, program)?;
    }

    filesystem.sync()?;

    let device = filesystem.into_device();
    let mut bytes = Vec::with_capacity(device.block_count() as usize * fslayout::BLOCK_SIZE);
    let mut block = [0u8; fslayout::BLOCK_SIZE];
    for index in 0..device.block_count() {
        device.read_block(index, &mut block)?;
        bytes.extend_from_slice(&block);
    }
    Ok(bytes)
}
