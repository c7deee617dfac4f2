//! AArch64 CPU operations

use crate::cpu::{CpuOps, InterruptNesting, MAX_CPUS};
use bitflags::bitflags;

bitflags! {
    /// DAIF exception mask bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Daif: u64 {
        /// FIQ masked
        const F = 1 << 6;
        /// IRQ masked
        const I = 1 << 7;
        /// SError masked
        const A = 1 << 8;
        /// Debug masked
        const D = 1 << 9;
    }
}

/// CPU operations for the running aarch64 core
pub static CPU: Aarch64Cpu = Aarch64Cpu::new();

/// AArch64 implementation of [`CpuOps`]
#[derive(Debug)]
pub struct Aarch64Cpu {
    nesting: InterruptNesting,
}

impl Aarch64Cpu {
    /// Create the (stateless apart from nesting) CPU ops
    pub const fn new() -> Self {
        Self {
            nesting: InterruptNesting::new(),
        }
    }
}

impl Default for Aarch64Cpu {
    fn default() -> Self {
        Self::new()
    }
}

/// Read DAIF
pub fn read_daif() -> Daif {
    let value: u64;
    unsafe {
        core::arch::asm!(
            "mrs {}, DAIF",
            out(reg) value,
            options(nomem, nostack, preserves_flags)
        );
    }
    Daif::from_bits_truncate(value)
}

/// Read MPIDR_EL1 affinity level 0
pub fn read_core_id() -> u32 {
    let value: u64;
    unsafe {
        core::arch::asm!(
            "mrs {}, MPIDR_EL1",
            out(reg) value,
            options(nomem, nostack, preserves_flags)
        );
    }
    (value & 0xFF) as u32
}

impl CpuOps for Aarch64Cpu {
    fn current_core(&self) -> u32 {
        read_core_id()
    }

    fn core_count(&self) -> usize {
        MAX_CPUS
    }

    unsafe fn enable_interrupts(&self) {
        unsafe {
            core::arch::asm!("msr DAIFClr, #2", options(nomem, nostack));
        }
    }

    unsafe fn disable_interrupts(&self) {
        unsafe {
            core::arch::asm!("msr DAIFSet, #2", options(nomem, nostack));
        }
    }

    fn interrupts_enabled(&self) -> bool {
        !read_daif().contains(Daif::I)
    }

    fn push_interrupts_off(&self) {
        self.nesting.push(self);
    }

    fn pop_interrupts(&self) {
        self.nesting.pop(self);
    }

    fn interrupt_depth(&self) -> u32 {
        self.nesting.depth(self.current_core())
    }

    fn pause(&self) {
        unsafe {
            core::arch::asm!("yield", options(nomem, nostack, preserves_flags));
        }
    }

    fn halt(&self) {
        unsafe {
            core::arch::asm!("wfi", options(nomem, nostack, preserves_flags));
        }
    }
}
