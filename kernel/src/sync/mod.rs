//! Locking discipline helper.
//!
//! The kernel singletons (buffer cache, filesystem, process table) are
//! wrapped in `spin::Mutex`, but on a uniprocessor system a lock alone
//! isn't enough — a critical section that gets preempted by the timer
//! IRQ and reschedules into code that tries to take the same lock would
//! deadlock. `without_interrupts` masks IRQs around the critical section
//! so the lock is never held across a preemption point.

use crate::arch::armv7a::irq::{disable_irqs, irqs_were_enabled, restore_irqs};

/// Runs `f` with IRQs masked, restoring the prior state afterwards even
/// if `f` panics would be nice but this is `no_std`/`panic = abort`, so
/// the restore simply runs after `f` returns.
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let was_enabled = irqs_were_enabled();
    disable_irqs();
    let result = f();
    if was_enabled {
        restore_irqs();
    }
    result
}
