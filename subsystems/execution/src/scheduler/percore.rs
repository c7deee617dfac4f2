//! # Per-Core Scheduler
//!
//! One instance per core. It owns no selection policy of its own: it takes
//! whatever [`GlobalScheduler::acquire_thread`] hands out and falls back to
//! the core's idle thread.

use super::metrics::SchedulerMetrics;
use super::GlobalScheduler;
use crate::context::{ContextSwitchEngine, SwitchReason};
use crate::object::Obj;
use crate::sync::{Lockable, SpinMutex};
use crate::thread::{Thread, ThreadState};
use crate::{KernelError, KernelResult};
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use pantheon_hal::cpu::InterruptGuard;

/// Scheduler state of one core
pub struct Scheduler {
    core: usize,
    current: SpinMutex<Obj<Thread>>,
    previous: SpinMutex<Option<Obj<Thread>>>,
    idle: Obj<Thread>,
    need_resched: AtomicBool,
    engine: Arc<ContextSwitchEngine>,
    metrics: SchedulerMetrics,
    tick_multiplier: u64,
}

impl Scheduler {
    /// Scheduler for `core`, currently running that core's idle thread
    pub fn new(
        core: usize,
        global: &GlobalScheduler,
        engine: Arc<ContextSwitchEngine>,
    ) -> KernelResult<Self> {
        let idle = global
            .idle_thread(core)
            .ok_or(KernelError::InvalidArgument)?
            .clone();
        Ok(Self {
            core,
            current: SpinMutex::new("current thread", idle.clone()),
            previous: SpinMutex::new("previous thread", None),
            idle,
            need_resched: AtomicBool::new(false),
            engine,
            metrics: SchedulerMetrics::new(),
            tick_multiplier: global.config().tick_multiplier,
        })
    }

    /// Core number
    pub fn core(&self) -> usize {
        self.core
    }

    /// Thread on this core
    pub fn current_thread(&self) -> Obj<Thread> {
        self.current.lock().clone()
    }

    /// This core's idle thread
    pub fn idle_thread(&self) -> &Obj<Thread> {
        &self.idle
    }

    /// Get scheduler metrics
    pub fn metrics(&self) -> &SchedulerMetrics {
        &self.metrics
    }

    /// Pick the next thread and switch to it.
    ///
    /// A still-running thread keeps the core when nothing else is runnable;
    /// otherwise the idle thread takes over. Returns whether a switch
    /// happened.
    pub fn reschedule(&self, global: &GlobalScheduler, reason: SwitchReason) -> bool {
        let _irq = InterruptGuard::new();
        self.need_resched.store(false, Ordering::Release);

        let current = self.current_thread();
        let next = match global.acquire_thread() {
            Some(thread) => thread,
            None if !current.is_idle() && current.state() == ThreadState::Running => {
                current.guard().refresh_ticks(self.tick_multiplier);
                self.metrics.record_empty_round();
                return false;
            }
            None => self.idle.clone(),
        };
        if Obj::ptr_eq(&current, &next) {
            self.metrics.record_empty_round();
            return false;
        }

        next.guard().refresh_ticks(self.tick_multiplier);
        self.metrics.record_context_switch();
        reason.record(&self.metrics);
        if next.is_idle() {
            self.metrics.record_idle_switch();
        }
        log::debug!(
            "core {}: {} -> {} ({:?})",
            self.core,
            current.id(),
            next.id(),
            reason
        );

        *self.previous.lock() = Some(current.clone());
        *self.current.lock() = next.clone();
        // SAFETY: interrupts are masked, `current` was running here, and the
        // `previous`/`current` slots keep both threads alive.
        unsafe { self.engine.switch(&current, &next, reason) };

        self.finish_switch(global);
        true
    }

    /// Hand the thread switched away from back to the registry. Runs on the
    /// resumed side of every switch.
    pub fn finish_switch(&self, global: &GlobalScheduler) {
        let previous = self.previous.lock().take();
        if let Some(thread) = previous {
            if !thread.is_idle() {
                global.release_thread(thread);
            }
        }
    }

    /// Ask for a reschedule at the next safe point (interrupt context)
    pub fn signal_reschedule(&self) {
        self.need_resched.store(true, Ordering::Release);
    }

    /// Is a reschedule pending?
    pub fn reschedule_pending(&self) -> bool {
        self.need_resched.load(Ordering::Acquire)
    }

    /// Act on a pending reschedule unless the current thread disabled
    /// preemption. Returns whether a switch happened.
    pub fn maybe_reschedule(&self, global: &GlobalScheduler) -> bool {
        if !self.reschedule_pending() {
            return false;
        }
        if !self.current_thread().is_preemptible() {
            return false;
        }
        self.reschedule(global, SwitchReason::Preemption)
    }

    /// Timer interrupt: charge one tick to the current thread and request a
    /// reschedule once its budget is gone.
    pub fn timer_tick(&self) {
        self.metrics.record_tick();
        let current = self.current_thread();
        if current.is_idle() {
            self.signal_reschedule();
            return;
        }
        let left = current.guard().count_tick();
        if left == 0 {
            self.signal_reschedule();
        }
    }

    /// Give up the core voluntarily
    pub fn yield_current(&self, global: &GlobalScheduler) -> bool {
        self.reschedule(global, SwitchReason::Yield)
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("core", &self.core)
            .field("current", &self.current_thread().id())
            .field("need_resched", &self.reschedule_pending())
            .finish_non_exhaustive()
    }
}
