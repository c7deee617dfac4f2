//! Spinlock and the data-carrying [`SpinMutex`]

use crate::stop_error;
use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use pantheon_hal::cpu;

/// Holder value meaning "nobody"; cores are stored as `core + 1`.
const NO_HOLDER: u32 = 0;

/// A test-and-set lock that remembers its holder
#[derive(Debug)]
pub struct Spinlock {
    locked: AtomicBool,
    holder: AtomicU32,
    name: &'static str,
}

impl Spinlock {
    /// Create an unlocked lock; `name` shows up in stop errors
    pub const fn new(name: &'static str) -> Self {
        Self {
            locked: AtomicBool::new(false),
            holder: AtomicU32::new(NO_HOLDER),
            name,
        }
    }

    /// Name given at construction
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Spin until the lock is ours. Interrupts stay masked until release.
    pub fn acquire(&self) {
        let cpu = cpu::current();
        cpu.push_interrupts_off();
        let core = cpu.current_core();

        if cfg!(debug_assertions) && self.is_held_by(core) {
            stop_error!("deadlock: core {} re-acquired spinlock '{}'", core, self.name);
        }

        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                cpu.pause();
            }
        }
        self.holder.store(core + 1, Ordering::Relaxed);
    }

    /// Take the lock if it is free
    pub fn try_acquire(&self) -> bool {
        let cpu = cpu::current();
        cpu.push_interrupts_off();
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.holder.store(cpu.current_core() + 1, Ordering::Relaxed);
            true
        } else {
            cpu.pop_interrupts();
            false
        }
    }

    /// Give the lock back. Only the holding core may do this.
    pub fn release(&self) {
        let cpu = cpu::current();
        let core = cpu.current_core();

        if !self.locked.load(Ordering::Relaxed) {
            stop_error!("core {} released unlocked spinlock '{}'", core, self.name);
        }
        let holder = self.holder.load(Ordering::Relaxed);
        if holder != core + 1 {
            stop_error!(
                "core {} released spinlock '{}' held by core {}",
                core,
                self.name,
                holder.wrapping_sub(1)
            );
        }

        self.holder.store(NO_HOLDER, Ordering::Relaxed);
        self.locked.store(false, Ordering::Release);
        cpu.pop_interrupts();
    }

    /// Is anybody holding the lock?
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Is the calling core the holder?
    pub fn is_held_by_current_core(&self) -> bool {
        self.is_held_by(cpu::current().current_core())
    }

    /// Core currently holding the lock
    pub fn holder(&self) -> Option<u32> {
        match self.holder.load(Ordering::Relaxed) {
            NO_HOLDER => None,
            core => Some(core - 1),
        }
    }

    fn is_held_by(&self, core: u32) -> bool {
        self.locked.load(Ordering::Relaxed) && self.holder.load(Ordering::Relaxed) == core + 1
    }
}

/// Data protected by a [`Spinlock`]
pub struct SpinMutex<T: ?Sized> {
    lock: Spinlock,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by `lock`.
unsafe impl<T: ?Sized + Send> Sync for SpinMutex<T> {}
unsafe impl<T: ?Sized + Send> Send for SpinMutex<T> {}

impl<T> SpinMutex<T> {
    /// Wrap `data`
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            lock: Spinlock::new(name),
            data: UnsafeCell::new(data),
        }
    }

    /// Consume the mutex, returning the data
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinMutex<T> {
    /// Spin until locked
    pub fn lock(&self) -> SpinMutexGuard<'_, T> {
        self.lock.acquire();
        SpinMutexGuard {
            mutex: self,
            _not_send: PhantomData,
        }
    }

    /// Lock if free
    pub fn try_lock(&self) -> Option<SpinMutexGuard<'_, T>> {
        if self.lock.try_acquire() {
            Some(SpinMutexGuard {
                mutex: self,
                _not_send: PhantomData,
            })
        } else {
            None
        }
    }

    /// Exclusive access without locking
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// The underlying lock
    pub fn spinlock(&self) -> &Spinlock {
        &self.lock
    }
}

impl<T: ?Sized + core::fmt::Debug> core::fmt::Debug for SpinMutex<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SpinMutex")
            .field("name", &self.lock.name)
            .field("locked", &self.lock.is_locked())
            .finish_non_exhaustive()
    }
}

/// Lock held on a [`SpinMutex`]; released on drop, on the same core.
pub struct SpinMutexGuard<'a, T: ?Sized> {
    mutex: &'a SpinMutex<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T: ?Sized> Deref for SpinMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves this core holds the lock.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves this core holds the lock.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.lock.release();
    }
}
