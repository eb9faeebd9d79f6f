//! ARMv7-A architecture support. Assembly entry/exit, the vector table,
//! and the C-library arithmetic helpers are out of scope —
//! this module provides the Rust-side contract those collaborators hand
//! off to: processor mode constants, the saved-register layout for a
//! context switch, and the TLB/cache maintenance calls the page-table
//! engine needs after a structural edit.

pub mod context;
pub mod irq;
pub mod mmu;
pub mod processor;
