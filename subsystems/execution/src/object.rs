//! # Object Pools
//!
//! Fixed-capacity, reference-counted arenas for kernel objects.
//!
//! An [`ObjectPool`] owns `capacity` slots. Each slot carries an atomic
//! reference count and a generation number. [`Obj`] is the owning, counted
//! reference: cloning it opens the object, dropping it closes it, and the
//! last close drops the value and puts the slot back on the free list.
//! [`WeakObj`] is the non-owning back-reference; it remembers the slot's
//! generation, so a reference to a destroyed object can never be upgraded
//! into whatever later reuses the slot.
//!
//! Pools never grow. Exhaustion is an ordinary `None`.

use crate::sync::SpinMutex;
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::fmt;
use core::mem::MaybeUninit;
use core::ops::Deref;
use core::sync::atomic::{fence, AtomicU32, AtomicUsize, Ordering};

struct Slot<T> {
    refs: AtomicU32,
    generation: AtomicU32,
    value: UnsafeCell<MaybeUninit<T>>,
}

struct PoolInner<T> {
    name: &'static str,
    slots: Box<[Slot<T>]>,
    free: SpinMutex<Vec<u32>>,
    live: AtomicUsize,
}

// SAFETY: a slot's value is written only while the slot is off the free list
// and unreferenced, and is otherwise only shared through `&T`.
unsafe impl<T: Send + Sync> Send for PoolInner<T> {}
unsafe impl<T: Send + Sync> Sync for PoolInner<T> {}

impl<T> PoolInner<T> {
    fn slot(&self, index: u32) -> &Slot<T> {
        &self.slots[index as usize]
    }
}

/// Fixed-capacity arena of `T`
pub struct ObjectPool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> ObjectPool<T> {
    /// Create a pool of `capacity` empty slots
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                refs: AtomicU32::new(0),
                generation: AtomicU32::new(0),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        // Lowest index is handed out first.
        let free = (0..capacity as u32).rev().collect();
        Self {
            inner: Arc::new(PoolInner {
                name,
                slots,
                free: SpinMutex::new(name, free),
                live: AtomicUsize::new(0),
            }),
        }
    }

    /// Move `value` into a free slot, `None` when the pool is exhausted
    pub fn alloc(&self, value: T) -> Option<Obj<T>> {
        let Some(index) = self.inner.free.lock().pop() else {
            log::warn!("{} pool exhausted ({} objects)", self.inner.name, self.capacity());
            return None;
        };
        let slot = self.inner.slot(index);
        // SAFETY: the slot came off the free list, so nothing references it.
        unsafe { (*slot.value.get()).write(value) };
        slot.refs.store(1, Ordering::Release);
        self.inner.live.fetch_add(1, Ordering::Relaxed);
        Some(Obj {
            pool: self.inner.clone(),
            index,
        })
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }

    /// Slots currently holding an object
    pub fn live(&self) -> usize {
        self.inner.live.load(Ordering::Relaxed)
    }

    /// Slots available for allocation
    pub fn available(&self) -> usize {
        self.capacity() - self.live()
    }
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("name", &self.inner.name)
            .field("capacity", &self.capacity())
            .field("live", &self.live())
            .finish()
    }
}

/// Owning reference to a pooled object
pub struct Obj<T> {
    pool: Arc<PoolInner<T>>,
    index: u32,
}

// SAFETY: `Obj` hands out `&T` only, from any core.
unsafe impl<T: Send + Sync> Send for Obj<T> {}
unsafe impl<T: Send + Sync> Sync for Obj<T> {}

impl<T> Obj<T> {
    fn slot(&self) -> &Slot<T> {
        self.pool.slot(self.index)
    }

    /// Do both references name the same object?
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.pool, &other.pool) && this.index == other.index
    }

    /// A non-owning reference to the same object
    pub fn downgrade(this: &Self) -> WeakObj<T> {
        WeakObj {
            pool: this.pool.clone(),
            index: this.index,
            generation: this.slot().generation.load(Ordering::Acquire),
        }
    }

    /// Current number of owning references
    pub fn ref_count(this: &Self) -> u32 {
        this.slot().refs.load(Ordering::Acquire)
    }

    /// Slot index inside the pool
    pub fn slot_index(this: &Self) -> u32 {
        this.index
    }
}

impl<T> Clone for Obj<T> {
    fn clone(&self) -> Self {
        self.slot().refs.fetch_add(1, Ordering::Relaxed);
        Self {
            pool: self.pool.clone(),
            index: self.index,
        }
    }
}

impl<T> Drop for Obj<T> {
    fn drop(&mut self) {
        let slot = self.slot();
        if slot.refs.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        fence(Ordering::Acquire);
        // SAFETY: last reference; the value was initialized by `alloc`.
        unsafe { (*slot.value.get()).assume_init_drop() };
        slot.generation.fetch_add(1, Ordering::Release);
        self.pool.live.fetch_sub(1, Ordering::Relaxed);
        self.pool.free.lock().push(self.index);
    }
}

impl<T> Deref for Obj<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: a live `Obj` keeps the value initialized.
        unsafe { (*self.slot().value.get()).assume_init_ref() }
    }
}

impl<T: fmt::Debug> fmt::Debug for Obj<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// Generation-checked back-reference to a pooled object
pub struct WeakObj<T> {
    pool: Arc<PoolInner<T>>,
    index: u32,
    generation: u32,
}

// SAFETY: see `Obj`.
unsafe impl<T: Send + Sync> Send for WeakObj<T> {}
unsafe impl<T: Send + Sync> Sync for WeakObj<T> {}

impl<T> WeakObj<T> {
    /// Open the object if it is still alive
    pub fn upgrade(&self) -> Option<Obj<T>> {
        let slot = self.pool.slot(self.index);
        let mut refs = slot.refs.load(Ordering::Relaxed);
        loop {
            if refs == 0 {
                return None;
            }
            match slot
                .refs
                .compare_exchange_weak(refs, refs + 1, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(current) => refs = current,
            }
        }
        let obj = Obj {
            pool: self.pool.clone(),
            index: self.index,
        };
        if slot.generation.load(Ordering::Acquire) != self.generation {
            // Slot was recycled; `obj` drops the reference we just took.
            return None;
        }
        Some(obj)
    }

    /// Does this reference still name a live object?
    pub fn is_alive(&self) -> bool {
        let slot = self.pool.slot(self.index);
        slot.refs.load(Ordering::Acquire) != 0
            && slot.generation.load(Ordering::Acquire) == self.generation
    }

    /// Does this reference name `obj`?
    pub fn points_to(&self, obj: &Obj<T>) -> bool {
        Arc::ptr_eq(&self.pool, &obj.pool)
            && self.index == obj.index
            && self.generation == obj.slot().generation.load(Ordering::Acquire)
    }
}

impl<T> Clone for WeakObj<T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            index: self.index,
            generation: self.generation,
        }
    }
}

impl<T> fmt::Debug for WeakObj<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakObj({}[{}]#{})", self.pool.name, self.index, self.generation)
    }
}
