//! Per-object locking contract
//!
//! Threads and processes embed a [`Spinlock`] next to their fields. Mutating
//! setters on those objects call [`Lockable::assert_locked`] first, so a
//! write from a core that does not hold the object's lock halts instead of
//! racing.

use super::Spinlock;
use crate::stop_error;
use core::marker::PhantomData;
use core::ops::Deref;

/// An object guarded by its own embedded spinlock
pub trait Lockable {
    /// The embedded lock
    fn spinlock(&self) -> &Spinlock;

    /// Acquire the object's lock
    fn lock(&self) {
        self.spinlock().acquire();
    }

    /// Release the object's lock
    fn unlock(&self) {
        self.spinlock().release();
    }

    /// Does the calling core hold the lock?
    fn is_locked(&self) -> bool {
        self.spinlock().is_held_by_current_core()
    }

    /// Halt unless the calling core holds the lock
    #[track_caller]
    fn assert_locked(&self, operation: &str) {
        if !self.is_locked() {
            stop_error!(
                "{} on '{}' without holding its lock",
                operation,
                self.spinlock().name()
            );
        }
    }

    /// Lock and return a guard that unlocks on drop
    fn guard(&self) -> ObjectGuard<'_, Self>
    where
        Self: Sized,
    {
        self.lock();
        ObjectGuard {
            object: self,
            _not_send: PhantomData,
        }
    }
}

/// Proof that the current core holds a [`Lockable`] object's lock
pub struct ObjectGuard<'a, L: Lockable> {
    object: &'a L,
    _not_send: PhantomData<*const ()>,
}

impl<'a, L: Lockable> ObjectGuard<'a, L> {
    /// The guarded object, with the guard's lifetime
    pub fn object(&self) -> &'a L {
        self.object
    }
}

impl<L: Lockable> Deref for ObjectGuard<'_, L> {
    type Target = L;

    fn deref(&self) -> &L {
        self.object
    }
}

impl<L: Lockable> Drop for ObjectGuard<'_, L> {
    fn drop(&mut self) {
        self.object.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};
    use pantheon_hal::hosted;

    struct Counter {
        lock: Spinlock,
        value: AtomicU32,
    }

    impl Lockable for Counter {
        fn spinlock(&self) -> &Spinlock {
            &self.lock
        }
    }

    impl Counter {
        fn bump(&self) {
            self.assert_locked("bump");
            self.value.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn guard_unlocks_on_drop() {
        hosted::install();
        let counter = Counter {
            lock: Spinlock::new("counter"),
            value: AtomicU32::new(0),
        };
        {
            let guard = counter.guard();
            guard.bump();
            assert!(counter.is_locked());
        }
        assert!(!counter.is_locked());
        assert_eq!(counter.value.load(Ordering::Relaxed), 1);
    }

    #[test]
    #[should_panic(expected = "without holding its lock")]
    fn setter_without_lock_is_fatal() {
        hosted::install();
        let counter = Counter {
            lock: Spinlock::new("counter"),
            value: AtomicU32::new(0),
        };
        counter.bump();
    }
}
