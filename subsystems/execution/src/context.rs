//! # Context Switching
//!
//! Wraps the platform's register switch routine with switch hooks and the
//! bookkeeping every switch needs.

use crate::scheduler::metrics::SchedulerMetrics;
use crate::thread::Thread;
use crate::ThreadId;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use pantheon_hal::cpu::ContextSwitch;
use spin::RwLock;

/// Context switch reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchReason {
    /// Voluntary yield
    Yield,
    /// Tick budget exhausted or a reschedule was requested
    Preemption,
    /// Current thread exited
    Exit,
}

impl SwitchReason {
    /// Update the counters this switch affects
    pub fn record(self, metrics: &SchedulerMetrics) {
        match self {
            SwitchReason::Yield => metrics.record_yield(),
            SwitchReason::Preemption => metrics.record_preemption(),
            SwitchReason::Exit => {}
        }
    }
}

/// Context switch hook
pub trait ContextSwitchHook: Send + Sync {
    /// Called before context switch
    fn pre_switch(&self, from: ThreadId, to: ThreadId, reason: SwitchReason);

    /// Called after context switch
    fn post_switch(&self, from: ThreadId, to: ThreadId, reason: SwitchReason);
}

/// Context switch engine
pub struct ContextSwitchEngine {
    switcher: Arc<dyn ContextSwitch>,
    hooks: RwLock<Vec<Arc<dyn ContextSwitchHook>>>,
}

impl ContextSwitchEngine {
    /// Create a new context switch engine around `switcher`
    pub fn new(switcher: Arc<dyn ContextSwitch>) -> Self {
        Self {
            switcher,
            hooks: RwLock::new(Vec::new()),
        }
    }

    /// Add a hook
    pub fn add_hook(&self, hook: Arc<dyn ContextSwitchHook>) {
        self.hooks.write().push(hook);
    }

    /// Save `from`'s registers and resume `to`
    ///
    /// # Safety
    /// Interrupts must be masked, `from` must be the thread running on this
    /// core, and both threads must stay alive until the switch returns.
    pub unsafe fn switch(&self, from: &Thread, to: &Thread, reason: SwitchReason) {
        for hook in self.hooks.read().iter() {
            hook.pre_switch(from.id(), to.id(), reason);
        }

        // SAFETY: the caller guarantees both contexts are live and that no
        // other core touches them during the switch.
        unsafe { self.switcher.switch(from.context_ptr(), to.context_ptr()) };

        for hook in self.hooks.read().iter() {
            hook.post_switch(from.id(), to.id(), reason);
        }
    }
}

impl fmt::Debug for ContextSwitchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextSwitchEngine")
            .field("hooks", &self.hooks.read().len())
            .finish_non_exhaustive()
    }
}
