//! IRQ masking via the CPSR `I` bit. Preemption is driven exclusively by
//! IRQs; this is the primitive `sync::without_interrupts`
//! and the scheduler's critical sections build on.

use core::sync::atomic::{AtomicBool, Ordering};

#[cfg(not(all(target_arch = "arm", not(feature = "testing"))))]
static HOST_IRQS_ENABLED: AtomicBool = AtomicBool::new(true);

/// Returns whether IRQs were enabled just before this call.
pub fn irqs_were_enabled() -> bool {
    #[cfg(all(target_arch = "arm", not(feature = "testing")))]
    {
        let cpsr: u32;
        unsafe { core::arch::asm!("mrs {0}, cpsr", out(reg) cpsr) };
        cpsr & (1 << 7) == 0
    }
    #[cfg(not(all(target_arch = "arm", not(feature = "testing"))))]
    {
        HOST_IRQS_ENABLED.load(Ordering::Relaxed)
    }
}

pub fn disable_irqs() {
    #[cfg(all(target_arch = "arm", not(feature = "testing")))]
    unsafe {
        core::arch::asm!("cpsid i");
    }
    #[cfg(not(all(target_arch = "arm", not(feature = "testing"))))]
    {
        HOST_IRQS_ENABLED.store(false, Ordering::Relaxed);
    }
}

pub fn restore_irqs() {
    #[cfg(all(target_arch = "arm", not(feature = "testing")))]
    unsafe {
        core::arch::asm!("cpsie i");
    }
    #[cfg(not(all(target_arch = "arm", not(feature = "testing"))))]
    {
        HOST_IRQS_ENABLED.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_enabled_state_on_host() {
        restore_irqs();
        assert!(irqs_were_enabled());
        disable_irqs();
        assert!(!irqs_were_enabled());
        restore_irqs();
    }
}
