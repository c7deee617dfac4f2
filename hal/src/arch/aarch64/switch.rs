//! Binding to the assembly context switch

use crate::cpu::{ContextSwitch, CpuContext};

extern "C" {
    /// Saves callee-saved registers, lr and sp at `old + reg_offset`, loads
    /// them from `new + reg_offset` and returns through the new lr.
    fn cpu_switch(old: *mut CpuContext, new: *const CpuContext, reg_offset: u64);
}

/// [`ContextSwitch`] backed by `cpu_switch`
#[derive(Debug, Default)]
pub struct Aarch64Switch;

impl ContextSwitch for Aarch64Switch {
    unsafe fn switch(&self, old: *mut CpuContext, new: *const CpuContext) {
        // SAFETY: the caller guarantees both contexts are live and exclusive.
        unsafe { cpu_switch(old, new, CpuContext::register_offset()) }
    }
}
