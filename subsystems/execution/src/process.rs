//! # Process Management
//!
//! A process owns an address space root, a handle table and its threads.
//!
//! State and priority are atomics readable without locking. The handle
//! table and the thread list live behind the process lock and are reached
//! only through an [`ObjectGuard<Process>`].

use crate::frame::PageFrame;
use crate::handle::HandleTable;
use crate::object::Obj;
use crate::scheduler::Priority;
use crate::stop_error;
use crate::sync::{Lockable, ObjectGuard, Spinlock};
use crate::thread::{Thread, ThreadState};
use crate::{KernelError, KernelResult, ProcessId, ThreadId};
use alloc::vec::Vec;
use arrayvec::ArrayString;
use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use pantheon_hal::{PhysAddr, VirtAddr};

/// Longest command string kept, in bytes
pub const COMMAND_LEN: usize = 64;

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum ProcessState {
    /// Created, no thread yet
    #[default]
    Init = 0,
    /// Has at least one live thread
    Running = 1,
    /// Every thread has terminated; waiting to be reaped
    Zombie = 2,
    /// Reaped
    Terminated = 3,
}

impl ProcessState {
    /// Convert from u32
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Init),
            1 => Some(Self::Running),
            2 => Some(Self::Zombie),
            3 => Some(Self::Terminated),
            _ => None,
        }
    }

    /// Valid transitions from this state
    pub fn valid_transitions(&self) -> &'static [ProcessState] {
        match self {
            ProcessState::Init => &[ProcessState::Running, ProcessState::Zombie],
            ProcessState::Running => &[ProcessState::Zombie],
            ProcessState::Zombie => &[ProcessState::Terminated],
            ProcessState::Terminated => &[],
        }
    }

    /// Does the scheduler consider threads of a process in this state?
    pub fn is_schedulable(&self) -> bool {
        matches!(self, ProcessState::Init | ProcessState::Running)
    }
}

struct ProcessInner {
    handles: HandleTable,
    threads: Vec<Obj<Thread>>,
}

/// Process structure
pub struct Process {
    id: ProcessId,
    command: ArrayString<COMMAND_LEN>,
    lock: Spinlock,
    state: AtomicU32,
    priority: AtomicU8,
    root_table: Option<PageFrame>,
    entry: VirtAddr,
    visited: AtomicBool,
    inner: UnsafeCell<ProcessInner>,
}

// SAFETY: `inner` is only reached through an `ObjectGuard`, i.e. with the
// process lock held by the calling core.
unsafe impl Sync for Process {}

impl Process {
    /// Create a process in `INIT`. Commands longer than [`COMMAND_LEN`]
    /// bytes are truncated at a character boundary.
    pub fn new(
        id: ProcessId,
        command: &str,
        priority: Priority,
        root_table: Option<PageFrame>,
        entry: VirtAddr,
    ) -> Self {
        let mut end = command.len().min(COMMAND_LEN);
        while !command.is_char_boundary(end) {
            end -= 1;
        }
        let mut name = ArrayString::new();
        name.push_str(&command[..end]);

        Self {
            id,
            command: name,
            lock: Spinlock::new("process"),
            state: AtomicU32::new(ProcessState::Init as u32),
            priority: AtomicU8::new(priority.as_u8()),
            root_table,
            entry,
            visited: AtomicBool::new(false),
            inner: UnsafeCell::new(ProcessInner {
                handles: HandleTable::new(),
                threads: Vec::new(),
            }),
        }
    }

    /// Get process ID
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Command string
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Get state
    pub fn state(&self) -> ProcessState {
        let raw = self.state.load(Ordering::Acquire);
        match ProcessState::from_u32(raw) {
            Some(state) => state,
            None => stop_error!("{} has out-of-range state {}", self.id, raw),
        }
    }

    /// Move to `next`; anything else than the documented transitions is fatal
    #[track_caller]
    pub fn set_state(&self, next: ProcessState) {
        self.assert_locked("Process::set_state");
        let current = self.state();
        if !current.valid_transitions().contains(&next) {
            stop_error!("{}: illegal transition {:?} -> {:?}", self.id, current, next);
        }
        self.state.store(next as u32, Ordering::Release);
        log::debug!("{} '{}': {:?} -> {:?}", self.id, self.command, current, next);
    }

    /// Get priority
    pub fn priority(&self) -> Priority {
        let raw = self.priority.load(Ordering::Relaxed);
        match Priority::from_u8(raw) {
            Some(priority) => priority,
            None => stop_error!("{} has out-of-range priority {}", self.id, raw),
        }
    }

    /// Set the default priority for threads created later
    pub fn set_priority(&self, priority: Priority) {
        self.assert_locked("Process::set_priority");
        self.priority.store(priority.as_u8(), Ordering::Relaxed);
    }

    /// Physical address of the translation table root
    pub fn root_table(&self) -> Option<PhysAddr> {
        self.root_table.as_ref().map(PageFrame::addr)
    }

    /// Entry point of the first thread
    pub fn entry(&self) -> VirtAddr {
        self.entry
    }

    /// Is this the idle process?
    pub fn is_idle(&self) -> bool {
        self.id == ProcessId::IDLE
    }

    /// Was a thread taken from this process in the current scheduling round?
    pub fn is_visited(&self) -> bool {
        self.visited.load(Ordering::Relaxed)
    }

    pub(crate) fn set_visited(&self, visited: bool) {
        self.visited.store(visited, Ordering::Relaxed);
    }
}

impl Lockable for Process {
    fn spinlock(&self) -> &Spinlock {
        &self.lock
    }
}

impl<'a> ObjectGuard<'a, Process> {
    fn inner(&self) -> &ProcessInner {
        // SAFETY: the guard proves the process lock is held by this core.
        unsafe { &*self.object().inner.get() }
    }

    fn inner_mut(&mut self) -> &mut ProcessInner {
        // SAFETY: as above; the lock is not re-entrant, so this guard is the
        // only path to `inner` and `&mut self` makes the borrow unique.
        unsafe { &mut *self.object().inner.get() }
    }

    /// The handle table
    pub fn handles(&self) -> &HandleTable {
        &self.inner().handles
    }

    /// The handle table, for insertion and release
    pub fn handles_mut(&mut self) -> &mut HandleTable {
        &mut self.inner_mut().handles
    }

    /// Threads in creation order
    pub fn threads(&self) -> &[Obj<Thread>] {
        &self.inner().threads
    }

    /// Threads that have not terminated
    pub fn live_thread_count(&self) -> usize {
        self.threads()
            .iter()
            .filter(|thread| !thread.state().is_terminated())
            .count()
    }

    /// Attach a thread; the first one moves the process to `RUNNING`
    pub fn add_thread(&mut self, thread: Obj<Thread>) -> KernelResult<()> {
        match self.state() {
            ProcessState::Init => self.set_state(ProcessState::Running),
            ProcessState::Running => {}
            ProcessState::Zombie | ProcessState::Terminated => {
                return Err(KernelError::InvalidState)
            }
        }
        self.inner_mut().threads.push(thread);
        Ok(())
    }

    /// Detach a thread. The caller drops the returned reference after
    /// unlocking.
    pub fn remove_thread(&mut self, id: ThreadId) -> Option<Obj<Thread>> {
        let threads = &mut self.inner_mut().threads;
        let index = threads.iter().position(|thread| thread.id() == id)?;
        Some(threads.remove(index))
    }

    /// Move a thread behind its siblings so they get the next turns
    pub fn rotate_thread(&mut self, id: ThreadId) {
        let threads = &mut self.inner_mut().threads;
        if let Some(index) = threads.iter().position(|thread| thread.id() == id) {
            let thread = threads.remove(index);
            threads.push(thread);
        }
    }

    /// Detach every thread
    pub fn take_threads(&mut self) -> Vec<Obj<Thread>> {
        core::mem::take(&mut self.inner_mut().threads)
    }

    /// `RUNNING → ZOMBIE` once no live thread is left. Returns whether the
    /// transition happened.
    pub fn zombify_if_empty(&self) -> bool {
        if self.state() == ProcessState::Running && self.live_thread_count() == 0 {
            self.set_state(ProcessState::Zombie);
            true
        } else {
            false
        }
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .field("command", &self.command.as_str())
            .field("state", &self.state())
            .field("priority", &self.priority())
            .finish_non_exhaustive()
    }
}

/// Lock `thread`, then its process, run `f`, and unlock in reverse order.
///
/// This is the only sanctioned way to hold both locks at once.
pub fn lock_thread_and_process<R>(
    thread: &Thread,
    f: impl FnOnce(&ObjectGuard<'_, Thread>, &mut ObjectGuard<'_, Process>) -> R,
) -> KernelResult<R> {
    let process = thread.owner().ok_or(KernelError::InvalidState)?;
    let thread_guard = thread.guard();
    let mut process_guard = process.guard();
    let result = f(&thread_guard, &mut process_guard);
    drop(process_guard);
    drop(thread_guard);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pantheon_hal::hosted;

    #[test]
    fn long_commands_are_truncated_on_a_char_boundary() {
        let long = "é".repeat(40);
        let process = Process::new(ProcessId::new(1), &long, Priority::Normal, None, VirtAddr::new(0));
        assert!(process.command().len() <= COMMAND_LEN);
        assert_eq!(process.command().len() % 2, 0);
    }

    #[test]
    #[should_panic(expected = "without holding its lock")]
    fn set_state_without_lock_is_fatal() {
        hosted::install();
        let process = Process::new(ProcessId::new(1), "init", Priority::Normal, None, VirtAddr::new(0));
        process.set_state(ProcessState::Running);
    }

    #[test]
    #[should_panic(expected = "illegal transition")]
    fn zombie_cannot_run_again() {
        hosted::install();
        let process = Process::new(ProcessId::new(1), "init", Priority::Normal, None, VirtAddr::new(0));
        let guard = process.guard();
        guard.set_state(ProcessState::Zombie);
        guard.set_state(ProcessState::Running);
    }

    #[test]
    fn empty_running_process_becomes_zombie() {
        hosted::install();
        let process = Process::new(ProcessId::new(2), "svc", Priority::Normal, None, VirtAddr::new(0));
        let guard = process.guard();
        guard.set_state(ProcessState::Running);
        assert!(guard.zombify_if_empty());
        assert_eq!(guard.state(), ProcessState::Zombie);
        assert!(!guard.zombify_if_empty());
    }
}
