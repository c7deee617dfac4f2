//! Fallback CPU operations for targets without a port: one core, interrupts
//! modelled as a flag.

use crate::cpu::{CpuOps, InterruptNesting};
use core::sync::atomic::{AtomicBool, Ordering};

pub(super) static CPU: UniprocessorCpu = UniprocessorCpu::new();

/// Single-core stand-in
#[derive(Debug)]
pub struct UniprocessorCpu {
    enabled: AtomicBool,
    nesting: InterruptNesting,
}

impl UniprocessorCpu {
    /// Interrupts start masked, as they are at reset
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            nesting: InterruptNesting::new(),
        }
    }
}

impl Default for UniprocessorCpu {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuOps for UniprocessorCpu {
    fn current_core(&self) -> u32 {
        0
    }

    fn core_count(&self) -> usize {
        1
    }

    unsafe fn enable_interrupts(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    unsafe fn disable_interrupts(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    fn interrupts_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn push_interrupts_off(&self) {
        self.nesting.push(self);
    }

    fn pop_interrupts(&self) {
        self.nesting.pop(self);
    }

    fn interrupt_depth(&self) -> u32 {
        self.nesting.depth(0)
    }

    fn halt(&self) {
        core::hint::spin_loop();
    }
}
