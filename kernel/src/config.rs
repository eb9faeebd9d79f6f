//! Layout and geometry constants shared by every subsystem. Centralizing
//! these here is what keeps `mm`, `fs`, and `drivers` reading the same
//! facts instead of re-deriving them.

pub use fslayout::{
    BLOCKS_PER_FILE, BLOCK_NUMS_PER_BLOCK, BLOCK_SIZE, DIRECTORIES_PER_BLOCK, FILE_INFO_PER_BLOCK,
    FILE_NAME_SIZE, FILE_TABLE_SIZE, FSINFO_CACHE, L0_COUNT, L0_END, L1_END, L1_INDEX, L2_END,
    L2_INDEX, L3_END, L3_INDEX, MAX_FILE_SIZE,
};

/// Physical base of RAM.
pub const PHYS_OFFSET: u32 = 0x8000_0000;
/// Virtual base the kernel image is linked at.
pub const VIRT_OFFSET: u32 = 0xc000_0000;
/// Offset of `.text` from the start of the kernel image.
pub const TEXT_OFFSET: u32 = 0x0000_8000;
/// Size of a process kernel stack, including its sentinel.
pub const THREAD_SIZE: u32 = 0x0000_2000;

/// Size, in bytes, of a page global directory (4096 entries x 4 bytes).
pub const PG_DIR_SIZE: u32 = 0x0000_4000;

/// Section size: one page-global-directory entry covers this many bytes.
pub const PMD_SIZE: u32 = 0x0010_0000;
/// Page size: one page-table entry covers this many bytes.
pub const PAGE_SIZE: u32 = 0x0000_1000;
/// Size, in bytes, of a second-level page table (256 entries x 4 bytes).
pub const PAGE_TABLE_SIZE: u32 = 0x0000_0400;
pub const PAGES_PER_PAGE_TABLE: u32 = PAGE_TABLE_SIZE / 4;

/// Bits to shift a virtual address right to get its PGD index.
pub const PG_DIR_SHIFT: u32 = 20;
/// Bits to shift a virtual address right to get its page offset.
pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_MASK: u32 = 0xfff;

/// Physical/virtual MMIO window pairs, from the Versatile Express memory
/// map. Device register layouts behind these windows are out of scope;
/// only the windows themselves are geometry this crate must agree with
/// the board on.
pub const UART0_PADDR: u32 = 0x1c09_0000;
pub const UART0_VADDR: u32 = 0xffc0_0000;
pub const MCI_PADDR: u32 = 0x1c05_0000;
pub const MCI_VADDR: u32 = 0xffc0_1000;
pub const GICD_PADDR: u32 = 0x2c00_1000;
pub const GICD_VADDR: u32 = 0xffc0_2000;
pub const GICC_PADDR: u32 = 0x2c00_2000;
pub const GICC_VADDR: u32 = 0xffc0_3000;
/// Versatile Express motherboard SP804 dual-timer (timer0/1 combined).
pub const TIMER_PADDR: u32 = 0x1c11_0000;
pub const TIMER_VADDR: u32 = 0xffc0_4000;

pub const VECTOR_TABLE_VADDR: u32 = 0xffff_0000;

/// GIC SPI id for the SP804 dual-timer combined interrupt (Versatile
/// Express motherboard timer 0/1).
pub const TIMER_IRQ: u32 = 34;
/// GIC SPI id for the PL011 UART0 interrupt.
pub const UART0_IRQ: u32 = 37;

/// UART line settings.
pub const UART_BAUD: u32 = 460_800;

/// Maximum number of live processes. The process table is a fixed arena,
/// not a pointer-chasing list.
pub const MAX_PROCESSES: usize = 64;

/// Raw keystrokes buffered per terminal before line discipline consumes
/// them.
pub const TERMINAL_FIFO_SIZE: usize = 256;
/// Bytes held in an in-progress (cooked) input line.
pub const LINE_BUFFER_SIZE: usize = 256;

pub const TERMINAL_CHAR_ERASE: u8 = 0x7f;
pub const TERMINAL_CHAR_CR: u8 = b'\r';
