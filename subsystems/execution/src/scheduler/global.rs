//! # Global Scheduler
//!
//! The process registry shared by every core, and the round-robin policy
//! that hands threads to per-core schedulers.
//!
//! Selection is first-found-wins in registration order. A process that gave
//! up a thread is marked visited and is skipped until every other candidate
//! has had a turn, at which point the round restarts. Priority plays no part
//! in selection; it only sets the tick budget.

use super::ids::IdAllocator;
use super::Priority;
use crate::config::KernelConfig;
use crate::frame::PageFrame;
use crate::object::{Obj, ObjectPool};
use crate::process::{Process, ProcessState};
use crate::stop_error;
use crate::sync::{Lockable, SpinMutex};
use crate::thread::{Thread, ThreadFlags, ThreadSetup, ThreadStacks, ThreadState};
use crate::{KernelError, KernelResult, ProcessId, ThreadId};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use pantheon_hal::cpu::CpuContext;
use pantheon_hal::mmu::PageAllocator;
use pantheon_hal::VirtAddr;

/// Process registry and thread hand-out
pub struct GlobalScheduler {
    ready: AtomicBool,
    registry: SpinMutex<Vec<Obj<Process>>>,
    threads: ObjectPool<Thread>,
    processes: ObjectPool<Process>,
    pids: IdAllocator,
    tids: IdAllocator,
    idle_process: Obj<Process>,
    idle_threads: Vec<Obj<Thread>>,
    pages: Arc<dyn PageAllocator>,
    config: KernelConfig,
}

impl GlobalScheduler {
    /// Build the registry, the idle process and one idle thread per core.
    ///
    /// Scheduling stays off until [`GlobalScheduler::set_ready`].
    pub fn new(config: &KernelConfig, pages: Arc<dyn PageAllocator>) -> KernelResult<Self> {
        if config.cpu_count == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let threads = ObjectPool::new("threads", config.max_threads);
        let processes = ObjectPool::new("processes", config.max_processes);
        let idle_process = processes
            .alloc(Process::new(
                ProcessId::IDLE,
                "idle",
                Priority::VeryLow,
                None,
                config.idle_entry,
            ))
            .ok_or(KernelError::OutOfMemory)?;

        let mut scheduler = Self {
            ready: AtomicBool::new(false),
            registry: SpinMutex::new("process registry", Vec::with_capacity(config.max_processes)),
            threads,
            processes,
            pids: IdAllocator::new("pid counter"),
            tids: IdAllocator::new("tid counter"),
            idle_process,
            idle_threads: Vec::with_capacity(config.cpu_count),
            pages,
            config: config.clone(),
        };

        for core in 0..config.cpu_count {
            let idle = scheduler.spawn_idle_thread()?;
            log::debug!("core {}: idle thread {}", core, idle.id());
            scheduler.idle_threads.push(idle);
        }
        Ok(scheduler)
    }

    /// Idle threads start life as the boot context of their core, so they
    /// are `RUNNING` from the outset and never enter the registry scan.
    fn spawn_idle_thread(&self) -> KernelResult<Obj<Thread>> {
        let idle = self.spawn_thread(
            &self.idle_process,
            self.config.idle_entry,
            Priority::VeryLow,
            ThreadFlags::KERNEL | ThreadFlags::IDLE,
        )?;
        let guard = idle.guard();
        guard.set_state(ThreadState::Running);
        guard.refresh_ticks(self.config.tick_multiplier);
        drop(guard);
        Ok(idle)
    }

    /// Let [`GlobalScheduler::acquire_thread`] hand out threads
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::Release);
        log::info!("scheduler ready");
    }

    /// Is scheduling enabled?
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Take the next process ID
    pub fn acquire_process_id(&self) -> ProcessId {
        ProcessId::new(self.pids.acquire())
    }

    /// Take the next thread ID
    pub fn acquire_thread_id(&self) -> ThreadId {
        ThreadId::new(self.tids.acquire())
    }

    /// Create a process with one thread starting at `entry`, and register
    /// it. Nothing stays allocated when any piece fails.
    pub fn create_process(
        &self,
        name: &str,
        entry: VirtAddr,
        priority: Priority,
    ) -> KernelResult<Obj<Process>> {
        let pid = self.acquire_process_id();
        let root_table = PageFrame::alloc(&self.pages)?;
        let process = self
            .processes
            .alloc(Process::new(pid, name, priority, Some(root_table), entry))
            .ok_or(KernelError::OutOfMemory)?;
        let thread = self.create_thread(&process, entry, priority)?;

        self.registry.lock().push(process.clone());
        log::info!(
            "created {} '{}' entry {:#x} ({}, {:?})",
            pid,
            process.command(),
            entry.as_u64(),
            thread.id(),
            priority
        );
        Ok(process)
    }

    /// Create a user thread in `process` starting at `entry`; it becomes
    /// runnable immediately.
    pub fn create_thread(
        &self,
        process: &Obj<Process>,
        entry: VirtAddr,
        priority: Priority,
    ) -> KernelResult<Obj<Thread>> {
        self.spawn_thread(process, entry, priority, ThreadFlags::empty())
    }

    fn spawn_thread(
        &self,
        process: &Obj<Process>,
        entry: VirtAddr,
        priority: Priority,
        flags: ThreadFlags,
    ) -> KernelResult<Obj<Thread>> {
        let id = self.acquire_thread_id();
        let (stacks, context) = if flags.contains(ThreadFlags::KERNEL) {
            let stacks = ThreadStacks::kernel(&self.pages)?;
            let context = CpuContext::new_kernel(entry.as_u64(), stacks.kernel_top().as_u64());
            (stacks, context)
        } else {
            let stacks = ThreadStacks::user(&self.pages)?;
            let context = CpuContext::new_user(
                self.config.user_trampoline.as_u64(),
                stacks.kernel_top().as_u64(),
                entry.as_u64(),
                self.config.user_stack_top.as_u64(),
                self.config.user_tls_base.as_u64(),
            );
            (stacks, context)
        };

        let thread = self
            .threads
            .alloc(Thread::new(ThreadSetup {
                id,
                owner: Obj::downgrade(process),
                owner_pid: process.id(),
                priority,
                flags,
                context,
                stacks,
            }))
            .ok_or(KernelError::OutOfMemory)?;

        thread.guard().initialize();
        process.guard().add_thread(thread.clone())?;
        log::debug!("{} added to {}", id, process.id());
        Ok(thread)
    }

    /// Pick a runnable thread and mark it `RUNNING`. `None` when nothing can
    /// run or scheduling is not enabled yet.
    pub fn acquire_thread(&self) -> Option<Obj<Thread>> {
        if !self.is_ready() {
            return None;
        }
        let registry = self.registry.lock();
        for _round in 0..2 {
            for process in registry.iter() {
                if process.is_visited() || !process.state().is_schedulable() {
                    continue;
                }
                if let Some(thread) = Self::take_waiting_thread(process) {
                    process.set_visited(true);
                    return Some(thread);
                }
            }
            // Every remaining candidate already had its turn.
            for process in registry.iter() {
                process.set_visited(false);
            }
        }
        None
    }

    /// First `WAITING` thread of `process`, moved to `RUNNING` and rotated
    /// to the back of the process's thread list.
    ///
    /// The process lock is dropped before each thread lock is taken, so the
    /// thread → process lock order holds.
    fn take_waiting_thread(process: &Obj<Process>) -> Option<Obj<Thread>> {
        let mut index = 0;
        loop {
            let thread = process.guard().threads().get(index)?.clone();
            index += 1;
            let guard = thread.guard();
            if guard.state() == ThreadState::Waiting {
                guard.set_state(ThreadState::Running);
                drop(guard);
                process.guard().rotate_thread(thread.id());
                return Some(thread);
            }
        }
    }

    /// Give a thread back after it leaves a core: a running thread waits
    /// for its next turn, a terminated one dies and leaves its process.
    pub fn release_thread(&self, thread: Obj<Thread>) {
        let guard = thread.guard();
        match guard.state() {
            ThreadState::Running => guard.set_state(ThreadState::Waiting),
            ThreadState::Terminated => {
                guard.set_state(ThreadState::Dead);
                drop(guard);
                Self::unlink(&thread);
            }
            ThreadState::Waiting | ThreadState::Blocked => {}
            state => stop_error!("release of {} in state {}", thread.id(), state),
        }
    }

    fn unlink(thread: &Obj<Thread>) {
        let Some(process) = thread.owner() else {
            return;
        };
        let removed = process.guard().remove_thread(thread.id());
        drop(removed);
    }

    /// Terminate `thread`. A thread that is not on a core dies right away;
    /// a running one dies when its core releases it. The process becomes a
    /// zombie once it has no live thread left.
    pub fn exit_thread(&self, thread: &Obj<Thread>) {
        let was_running = {
            let guard = thread.guard();
            let state = guard.state();
            if state.is_terminated() {
                return;
            }
            guard.set_state(ThreadState::Terminated);
            if state != ThreadState::Running {
                guard.set_state(ThreadState::Dead);
            }
            state == ThreadState::Running
        };
        log::debug!("{} exited", thread.id());

        let Some(process) = thread.owner() else {
            return;
        };
        let mut guard = process.guard();
        let removed = if was_running {
            None
        } else {
            guard.remove_thread(thread.id())
        };
        if guard.zombify_if_empty() {
            log::info!("{} '{}' is a zombie", process.id(), process.command());
        }
        drop(guard);
        drop(removed);
    }

    /// Terminate every thread of `process`
    pub fn exit_process(&self, process: &Obj<Process>) {
        let threads: Vec<Obj<Thread>> = process.guard().threads().to_vec();
        for thread in &threads {
            self.exit_thread(thread);
        }
        let guard = process.guard();
        if guard.state() == ProcessState::Init {
            guard.set_state(ProcessState::Zombie);
        } else {
            guard.zombify_if_empty();
        }
    }

    /// Retire every zombie: `ZOMBIE → TERMINATED`, close its handles and drop
    /// it from the registry. Returns how many processes were reaped.
    pub fn reap_zombies(&self) -> usize {
        let zombies: Vec<Obj<Process>> = {
            let mut registry = self.registry.lock();
            let mut zombies = Vec::new();
            registry.retain(|process| {
                let zombie = process.state() == ProcessState::Zombie;
                if zombie {
                    zombies.push(process.clone());
                }
                !zombie
            });
            zombies
        };

        for process in &zombies {
            let (handles, threads) = {
                let mut guard = process.guard();
                guard.set_state(ProcessState::Terminated);
                (guard.handles_mut().take_all(), guard.take_threads())
            };
            let closed = handles.len();
            handles.into_iter().for_each(crate::handle::Handle::close);
            drop(threads);
            log::info!("reaped {} '{}' ({} handles closed)", process.id(), process.command(), closed);
        }
        zombies.len()
    }

    /// Registered process with ID `pid`; [`ProcessId::IDLE`] names the idle
    /// process.
    pub fn find_process(&self, pid: ProcessId) -> Option<Obj<Process>> {
        if pid == ProcessId::IDLE {
            return Some(self.idle_process.clone());
        }
        self.registry
            .lock()
            .iter()
            .find(|process| process.id() == pid)
            .cloned()
    }

    /// Snapshot of the registry in registration order
    pub fn processes(&self) -> Vec<Obj<Process>> {
        self.registry.lock().clone()
    }

    /// Registered processes
    pub fn process_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// The idle process
    pub fn idle_process(&self) -> &Obj<Process> {
        &self.idle_process
    }

    /// Idle thread of `core`
    pub fn idle_thread(&self, core: usize) -> Option<&Obj<Thread>> {
        self.idle_threads.get(core)
    }

    /// Thread pool
    pub fn thread_pool(&self) -> &ObjectPool<Thread> {
        &self.threads
    }

    /// Process pool
    pub fn process_pool(&self) -> &ObjectPool<Process> {
        &self.processes
    }

    /// Configuration the scheduler was built with
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }
}

impl fmt::Debug for GlobalScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalScheduler")
            .field("ready", &self.is_ready())
            .field("threads", &self.threads)
            .field("processes", &self.processes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pantheon_hal::hosted::{self, HostPageAllocator};

    fn scheduler(pages: usize) -> (GlobalScheduler, Arc<HostPageAllocator>) {
        hosted::install();
        let host = Arc::new(HostPageAllocator::new(pages));
        let scheduler =
            GlobalScheduler::new(&KernelConfig::small(), host.clone()).expect("scheduler");
        scheduler.set_ready();
        (scheduler, host)
    }

    #[test]
    fn nothing_is_handed_out_before_ready() {
        hosted::install();
        let host = Arc::new(HostPageAllocator::new(16));
        let scheduler = GlobalScheduler::new(&KernelConfig::small(), host).expect("scheduler");
        scheduler
            .create_process("early", VirtAddr::new(0x1000), Priority::Normal)
            .expect("process");
        assert!(scheduler.acquire_thread().is_none());
        scheduler.set_ready();
        assert!(scheduler.acquire_thread().is_some());
    }

    #[test]
    fn first_process_gets_pid_one_and_a_running_state() {
        let (scheduler, _) = scheduler(16);
        let process = scheduler
            .create_process("init", VirtAddr::new(0x1000), Priority::Normal)
            .expect("process");
        assert_eq!(process.id(), ProcessId::new(1));
        assert_eq!(process.state(), ProcessState::Running);
        assert!(process.root_table().is_some());
        assert_eq!(scheduler.process_count(), 1);
    }

    #[test]
    fn failed_creation_leaks_nothing() {
        let (scheduler, host) = scheduler(4);
        let before = host.outstanding();
        // Root table fits, the thread's three pages do not.
        let result = scheduler.create_process("big", VirtAddr::new(0x1000), Priority::Normal);
        assert_eq!(result.err(), Some(KernelError::OutOfMemory));
        assert_eq!(host.outstanding(), before);
        assert_eq!(scheduler.process_count(), 0);
        assert_eq!(scheduler.process_pool().live(), 1);
    }

    #[test]
    fn acquired_thread_is_running_and_release_makes_it_wait() {
        let (scheduler, _) = scheduler(16);
        scheduler
            .create_process("a", VirtAddr::new(0x1000), Priority::Normal)
            .expect("process");
        let thread = scheduler.acquire_thread().expect("thread");
        assert_eq!(thread.state(), ThreadState::Running);
        assert!(scheduler.acquire_thread().is_none());

        scheduler.release_thread(thread.clone());
        assert_eq!(thread.state(), ThreadState::Waiting);
    }

    #[test]
    fn threads_of_one_process_are_taken_in_creation_order() {
        let (scheduler, _) = scheduler(32);
        let process = scheduler
            .create_process("multi", VirtAddr::new(0x1000), Priority::Normal)
            .expect("process");
        let second = scheduler
            .create_thread(&process, VirtAddr::new(0x2000), Priority::High)
            .expect("thread");

        let first = scheduler.acquire_thread().expect("first");
        assert!(first.id() < second.id());
        let next = scheduler.acquire_thread().expect("second");
        assert!(Obj::ptr_eq(&next, &second));
    }

    #[test]
    fn exiting_the_last_thread_makes_a_zombie_that_can_be_reaped() {
        let (scheduler, host) = scheduler(16);
        let before = host.outstanding();
        let process = scheduler
            .create_process("short", VirtAddr::new(0x1000), Priority::Normal)
            .expect("process");
        let thread = scheduler.acquire_thread().expect("thread");

        scheduler.exit_thread(&thread);
        assert_eq!(thread.state(), ThreadState::Terminated);
        assert_eq!(process.state(), ProcessState::Zombie);

        scheduler.release_thread(thread.clone());
        assert_eq!(thread.state(), ThreadState::Dead);

        assert_eq!(scheduler.reap_zombies(), 1);
        assert_eq!(process.state(), ProcessState::Terminated);
        assert!(scheduler.find_process(process.id()).is_none());

        drop(thread);
        drop(process);
        assert_eq!(host.outstanding(), before);
    }

    #[test]
    fn exiting_a_waiting_thread_kills_it_at_once() {
        let (scheduler, _) = scheduler(32);
        let process = scheduler
            .create_process("pair", VirtAddr::new(0x1000), Priority::Normal)
            .expect("process");
        let extra = scheduler
            .create_thread(&process, VirtAddr::new(0x2000), Priority::Normal)
            .expect("thread");

        scheduler.exit_thread(&extra);
        assert_eq!(extra.state(), ThreadState::Dead);
        assert_eq!(process.guard().threads().len(), 1);
        assert_eq!(process.state(), ProcessState::Running);
    }

    #[test]
    fn exit_process_terminates_every_thread() {
        let (scheduler, _) = scheduler(32);
        let process = scheduler
            .create_process("group", VirtAddr::new(0x1000), Priority::Normal)
            .expect("process");
        scheduler
            .create_thread(&process, VirtAddr::new(0x2000), Priority::Normal)
            .expect("thread");
        scheduler.exit_process(&process);
        assert_eq!(process.state(), ProcessState::Zombie);
        assert!(scheduler.acquire_thread().is_none());
    }

    #[test]
    fn threads_cannot_join_a_zombie() {
        let (scheduler, _) = scheduler(32);
        let process = scheduler
            .create_process("late", VirtAddr::new(0x1000), Priority::Normal)
            .expect("process");
        scheduler.exit_process(&process);
        assert_eq!(
            scheduler
                .create_thread(&process, VirtAddr::new(0x2000), Priority::Normal)
                .err(),
            Some(KernelError::InvalidState)
        );
    }

    #[test]
    fn idle_process_is_found_by_pid_zero() {
        let (scheduler, _) = scheduler(16);
        let idle = scheduler.find_process(ProcessId::IDLE).expect("idle");
        assert!(idle.is_idle());
        let thread = scheduler.idle_thread(0).expect("idle thread");
        assert!(thread.is_idle());
        assert_eq!(thread.state(), ThreadState::Running);
        assert!(scheduler.idle_thread(1).is_none());
    }
}
