//! Architecture-specific glue. The only architecture this kernel targets
//! is ARMv7-A; `testing` cfg swaps the low-level bits (IRQ enable/disable,
//! TLB invalidation, context switch) for host-safe no-ops so the rest of
//! the kernel can be exercised on the build machine.

pub mod armv7a;

pub use armv7a::processor::ProcessorMode;
