//! # Thread Structure
//!
//! Core thread data structure.
//!
//! Reads are lock-free. Every setter except the preempt count requires the
//! thread's own lock to be held by the calling core.

use super::ThreadState;
use crate::frame::PageFrame;
use crate::object::{Obj, WeakObj};
use crate::process::Process;
use crate::scheduler::Priority;
use crate::stop_error;
use crate::sync::{Lockable, Spinlock};
use crate::{KernelResult, ProcessId, ThreadId};
use alloc::sync::Arc;
use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use pantheon_hal::cpu::CpuContext;
use pantheon_hal::mmu::PageAllocator;
use pantheon_hal::VirtAddr;

/// Thread flags
pub mod flags {
    use bitflags::bitflags;

    bitflags! {
        /// Thread flags
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct ThreadFlags: u32 {
            /// Thread never leaves EL1
            const KERNEL = 1 << 0;
            /// Thread is a core's idle thread
            const IDLE = 1 << 1;
        }
    }
}

pub use flags::ThreadFlags;

/// Pages owned by a thread
#[derive(Debug)]
pub struct ThreadStacks {
    kernel: KernelStack,
    user: Option<PageFrame>,
    tls: Option<PageFrame>,
}

impl ThreadStacks {
    /// Kernel stack only
    pub fn kernel(pages: &Arc<dyn PageAllocator>) -> KernelResult<Self> {
        Ok(Self {
            kernel: KernelStack::allocate(pages)?,
            user: None,
            tls: None,
        })
    }

    /// Kernel stack, user stack and thread-local page
    pub fn user(pages: &Arc<dyn PageAllocator>) -> KernelResult<Self> {
        let kernel = KernelStack::allocate(pages)?;
        let user = PageFrame::alloc(pages)?;
        let tls = PageFrame::alloc(pages)?;
        Ok(Self {
            kernel,
            user: Some(user),
            tls: Some(tls),
        })
    }

    /// Initial kernel stack pointer
    pub fn kernel_top(&self) -> VirtAddr {
        self.kernel.top()
    }
}

/// Everything [`Thread::new`] needs
#[derive(Debug)]
pub struct ThreadSetup {
    /// Thread ID from the global allocator
    pub id: ThreadId,
    /// Owning process
    pub owner: WeakObj<Process>,
    /// Owning process' ID, kept for diagnostics after the owner is gone
    pub owner_pid: ProcessId,
    /// Initial priority
    pub priority: Priority,
    /// Kind of thread
    pub flags: ThreadFlags,
    /// Initial register context
    pub context: CpuContext,
    /// Owned pages
    pub stacks: ThreadStacks,
}

/// Thread structure
pub struct Thread {
    id: ThreadId,
    owner: WeakObj<Process>,
    owner_pid: ProcessId,
    lock: Spinlock,
    state: AtomicU32,
    priority: AtomicU8,
    ticks: AtomicU64,
    preempt_count: AtomicU32,
    flags: ThreadFlags,
    context: UnsafeCell<CpuContext>,
    stacks: ThreadStacks,
}

// SAFETY: the register context is written only by the context switch, on the
// core that owns the thread at that moment, with interrupts masked. All other
// fields are atomics or immutable.
unsafe impl Sync for Thread {}

impl Thread {
    /// Create a thread in `INIT`
    pub fn new(setup: ThreadSetup) -> Self {
        Self {
            id: setup.id,
            owner: setup.owner,
            owner_pid: setup.owner_pid,
            lock: Spinlock::new("thread"),
            state: AtomicU32::new(ThreadState::Init.as_u32()),
            priority: AtomicU8::new(setup.priority.as_u8()),
            ticks: AtomicU64::new(0),
            preempt_count: AtomicU32::new(0),
            flags: setup.flags,
            context: UnsafeCell::new(setup.context),
            stacks: setup.stacks,
        }
    }

    /// Get thread ID
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Owning process, if it still exists
    pub fn owner(&self) -> Option<Obj<Process>> {
        self.owner.upgrade()
    }

    /// ID of the owning process
    pub fn owner_pid(&self) -> ProcessId {
        self.owner_pid
    }

    /// Get current state
    pub fn state(&self) -> ThreadState {
        let raw = self.state.load(Ordering::Acquire);
        match ThreadState::from_u32(raw) {
            Some(state) => state,
            None => stop_error!("{} has out-of-range state {}", self.id, raw),
        }
    }

    /// Move to `next`; anything the state machine does not allow is fatal
    #[track_caller]
    pub fn set_state(&self, next: ThreadState) {
        self.assert_locked("Thread::set_state");
        let current = self.state();
        if !current.can_transition_to(next) {
            stop_error!("{}: illegal transition {} -> {}", self.id, current, next);
        }
        self.state.store(next.as_u32(), Ordering::Release);
        log::trace!("{}: {} -> {}", self.id, current, next);
    }

    /// `INIT → WAITING`: make the thread visible to the scheduler
    pub fn initialize(&self) {
        self.set_state(ThreadState::Waiting);
    }

    /// Get priority
    pub fn priority(&self) -> Priority {
        let raw = self.priority.load(Ordering::Relaxed);
        match Priority::from_u8(raw) {
            Some(priority) => priority,
            None => stop_error!("{} has out-of-range priority {}", self.id, raw),
        }
    }

    /// Set priority; takes effect at the next budget refresh
    pub fn set_priority(&self, priority: Priority) {
        self.assert_locked("Thread::set_priority");
        self.priority.store(priority.as_u8(), Ordering::Relaxed);
    }

    /// Remaining ticks in the current slice
    pub fn ticks_left(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Grant a fresh slice of `(priority + 1) * multiplier` ticks
    pub fn refresh_ticks(&self, multiplier: u64) {
        self.assert_locked("Thread::refresh_ticks");
        self.ticks
            .store(self.priority().tick_budget(multiplier), Ordering::Relaxed);
    }

    /// Consume one tick, never going below zero. Returns what is left.
    pub fn count_tick(&self) -> u64 {
        self.assert_locked("Thread::count_tick");
        let previous = self
            .ticks
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |ticks| {
                Some(ticks.saturating_sub(1))
            })
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    /// Current preempt count
    pub fn preempt_count(&self) -> u32 {
        self.preempt_count.load(Ordering::Acquire)
    }

    /// Enter a section the scheduler must not preempt
    pub fn disable_preemption(&self) {
        self.preempt_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Leave a section entered with [`Thread::disable_preemption`]
    pub fn enable_preemption(&self) {
        let previous = self.preempt_count.fetch_sub(1, Ordering::AcqRel);
        if previous == 0 {
            stop_error!("{}: preempt count underflow", self.id);
        }
    }

    /// May the scheduler take the core away right now?
    pub fn is_preemptible(&self) -> bool {
        self.preempt_count() == 0
    }

    /// Get flags
    pub fn flags(&self) -> ThreadFlags {
        self.flags
    }

    /// Is this a core's idle thread?
    pub fn is_idle(&self) -> bool {
        self.flags.contains(ThreadFlags::IDLE)
    }

    /// Check if kernel thread
    pub fn is_kernel(&self) -> bool {
        self.flags.contains(ThreadFlags::KERNEL)
    }

    /// Get kernel stack top
    pub fn kernel_stack_top(&self) -> VirtAddr {
        self.stacks.kernel_top()
    }

    /// User stack page, for user threads
    pub fn user_stack(&self) -> Option<&PageFrame> {
        self.stacks.user.as_ref()
    }

    /// Thread-local page, for user threads
    pub fn tls_page(&self) -> Option<&PageFrame> {
        self.stacks.tls.as_ref()
    }

    /// Copy of the saved register context
    pub fn context(&self) -> CpuContext {
        self.assert_locked("Thread::context");
        // SAFETY: writers hold interrupts masked on the owning core; with the
        // thread lock held no switch of this thread is in flight.
        unsafe { *self.context.get() }
    }

    /// Raw context pointer handed to the context switch routine
    pub(crate) fn context_ptr(&self) -> *mut CpuContext {
        self.context.get()
    }
}

impl Lockable for Thread {
    fn spinlock(&self) -> &Spinlock {
        &self.lock
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("owner", &self.owner_pid)
            .field("state", &self.state())
            .field("priority", &self.priority())
            .field("ticks", &self.ticks_left())
            .field("flags", &self.flags)
            .finish()
    }
}

/// Kernel stack
#[derive(Debug)]
pub struct KernelStack {
    frame: PageFrame,
}

impl KernelStack {
    /// Default kernel stack size (one page)
    pub const DEFAULT_SIZE: u64 = pantheon_hal::PAGE_SIZE;

    /// Allocate a kernel stack
    pub fn allocate(pages: &Arc<dyn PageAllocator>) -> KernelResult<Self> {
        Ok(Self {
            frame: PageFrame::alloc(pages)?,
        })
    }

    /// Get stack top (highest address)
    pub fn top(&self) -> VirtAddr {
        self.frame.top()
    }

    /// Get stack base (lowest address)
    pub fn base(&self) -> VirtAddr {
        self.frame.base()
    }
}
