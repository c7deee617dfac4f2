//! # CPU Abstraction
//!
//! Core identification, interrupt masking and register contexts.
//!
//! Interrupt masking nests: every [`CpuOps::push_interrupts_off`] must be
//! paired with one [`CpuOps::pop_interrupts`], and interrupts come back on
//! only when the outermost pop runs *and* they were enabled before the
//! outermost push. Spinlocks rely on this so that taking a second lock inside
//! an interrupt-disabled section does not re-enable interrupts on release.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use spin::Once;

/// Upper bound on the number of cores the per-core tables are sized for.
pub const MAX_CPUS: usize = 8;

/// CPU abstraction trait
///
/// Provides architecture-independent access to the CPU features the
/// scheduler needs.
pub trait CpuOps: Send + Sync {
    /// Index of the core executing the caller
    fn current_core(&self) -> u32;

    /// Number of cores the platform brought up
    fn core_count(&self) -> usize;

    /// Enable interrupts on this core
    ///
    /// # Safety
    /// Enabling interrupts when the system is not ready can cause undefined behavior.
    unsafe fn enable_interrupts(&self);

    /// Disable interrupts on this core
    ///
    /// # Safety
    /// Disabling interrupts for too long can cause system hangs.
    unsafe fn disable_interrupts(&self);

    /// Check if interrupts are enabled on this core
    fn interrupts_enabled(&self) -> bool;

    /// Mask interrupts, remembering the outermost state (PUSHI)
    fn push_interrupts_off(&self);

    /// Undo one [`CpuOps::push_interrupts_off`] (POPI)
    fn pop_interrupts(&self);

    /// Current PUSHI nesting depth on this core
    fn interrupt_depth(&self) -> u32;

    /// Pause the CPU (for spinlocks)
    fn pause(&self) {
        core::hint::spin_loop();
    }

    /// Halt the CPU until an interrupt occurs
    fn halt(&self);
}

/// Per-core PUSHI/POPI bookkeeping for platforms that keep it in plain
/// memory indexed by core number.
#[derive(Debug)]
pub struct InterruptNesting {
    depth: [AtomicU32; MAX_CPUS],
    was_enabled: [AtomicBool; MAX_CPUS],
}

impl InterruptNesting {
    /// Create zeroed bookkeeping for every core
    pub const fn new() -> Self {
        Self {
            depth: [const { AtomicU32::new(0) }; MAX_CPUS],
            was_enabled: [const { AtomicBool::new(false) }; MAX_CPUS],
        }
    }

    /// PUSHI on behalf of `cpu`
    pub fn push(&self, cpu: &dyn CpuOps) {
        let enabled = cpu.interrupts_enabled();
        // SAFETY: masking interrupts is always safe for the caller's core.
        unsafe { cpu.disable_interrupts() };
        let core = cpu.current_core() as usize % MAX_CPUS;
        if self.depth[core].fetch_add(1, Ordering::Relaxed) == 0 {
            self.was_enabled[core].store(enabled, Ordering::Relaxed);
        }
    }

    /// POPI on behalf of `cpu`
    pub fn pop(&self, cpu: &dyn CpuOps) {
        let core = cpu.current_core() as usize % MAX_CPUS;
        let depth = self.depth[core].load(Ordering::Relaxed);
        if depth == 0 {
            panic!("interrupt nesting underflow on core {}", core);
        }
        self.depth[core].store(depth - 1, Ordering::Relaxed);
        if depth == 1 && self.was_enabled[core].load(Ordering::Relaxed) {
            // SAFETY: interrupts were enabled before the outermost push.
            unsafe { cpu.enable_interrupts() };
        }
    }

    /// Current depth for `core`
    pub fn depth(&self, core: u32) -> u32 {
        self.depth[core as usize % MAX_CPUS].load(Ordering::Relaxed)
    }
}

impl Default for InterruptNesting {
    fn default() -> Self {
        Self::new()
    }
}

static CPU: Once<&'static dyn CpuOps> = Once::new();

/// Install the platform's CPU operations. The first call wins.
pub fn install(ops: &'static dyn CpuOps) {
    CPU.call_once(|| {
        log::debug!("cpu ops installed ({} cores)", ops.core_count());
        ops
    });
}

/// The installed CPU operations, or the architecture default.
pub fn current() -> &'static dyn CpuOps {
    match CPU.get() {
        Some(ops) => *ops,
        None => crate::arch::default_cpu(),
    }
}

/// RAII PUSHI/POPI pair
#[derive(Debug)]
pub struct InterruptGuard {
    _private: (),
}

impl InterruptGuard {
    /// Mask interrupts until the guard is dropped
    pub fn new() -> Self {
        current().push_interrupts_off();
        Self { _private: () }
    }
}

impl Default for InterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        current().pop_interrupts();
    }
}

/// Number of callee-saved general purpose registers kept in a context
/// (x19..x28, fp).
pub const SAVED_REGS: usize = 11;

/// Saved register state of a kernel thread.
///
/// Only what `cpu_switch` preserves: the callee-saved registers, the link
/// register the switch returns through, and the kernel stack pointer. The
/// user entry point and user stack are consumed by the EL0 trampoline the
/// first time a user thread runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct CpuContext {
    /// x19..x28, x29 (fp)
    pub regs: [u64; SAVED_REGS],
    /// x30: where `cpu_switch` returns to
    pub pc: u64,
    /// Kernel stack pointer
    pub sp: u64,
    /// User entry point (ELR_EL1 on first return to EL0)
    pub user_pc: u64,
    /// User stack pointer (SP_EL0)
    pub user_sp: u64,
    /// Thread-local pointer (TPIDR_EL0)
    pub tls: u64,
}

static_assertions::assert_eq_size!(CpuContext, [u64; SAVED_REGS + 5]);

impl CpuContext {
    /// A context that starts a kernel thread at `entry` on `stack`
    pub const fn new_kernel(entry: u64, stack: u64) -> Self {
        Self {
            regs: [0; SAVED_REGS],
            pc: entry,
            sp: stack,
            user_pc: 0,
            user_sp: 0,
            tls: 0,
        }
    }

    /// A context that drops to EL0 at `entry` with `user_stack`
    pub const fn new_user(trampoline: u64, kernel_stack: u64, entry: u64, user_stack: u64, tls: u64) -> Self {
        Self {
            regs: [0; SAVED_REGS],
            pc: trampoline,
            sp: kernel_stack,
            user_pc: entry,
            user_sp: user_stack,
            tls,
        }
    }

    /// Byte offset of the register block, the third `cpu_switch` argument
    pub const fn register_offset() -> u64 {
        core::mem::offset_of!(CpuContext, regs) as u64
    }
}

/// Register-context switch routine
pub trait ContextSwitch: Send + Sync {
    /// Save the running context into `old` and resume `new`.
    ///
    /// Returns when some core later switches back to `old`.
    ///
    /// # Safety
    /// Both pointers must reference live contexts that nothing else touches
    /// for the duration of the switch, and interrupts must be masked.
    unsafe fn switch(&self, old: *mut CpuContext, new: *const CpuContext);
}
