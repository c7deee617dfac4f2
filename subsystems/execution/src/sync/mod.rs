//! # Synchronization
//!
//! Busy-wait locks for kernel data structures.
//!
//! Every lock here masks interrupts on the acquiring core for as long as it
//! is held (PUSHI on acquire, POPI on release) and records which core holds
//! it. Releasing from the wrong core, releasing an unlocked lock, or
//! re-acquiring a lock the core already holds halts the core.
//!
//! ## Lock order
//!
//! ```text
//! registry → thread → process → IPC objects / pools / ID counters
//! ```

pub mod spinlock;
pub mod lockable;

pub use lockable::{Lockable, ObjectGuard};
pub use spinlock::{SpinMutex, SpinMutexGuard, Spinlock};
