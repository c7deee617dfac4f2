//! # Pantheon Execution Core
//!
//! The execution core manages:
//! - Spinlocks and the per-object locking contract
//! - Reference-counted, fixed-capacity object pools
//! - Threads and processes and their state machines
//! - The global registry and the per-core schedulers
//! - Handle tables and the IPC objects they reference (ports,
//!   connections, named events)
//!
//! ## Key Principle
//!
//! All kernel state hangs off one [`KernelContext`]. Nothing here keeps a
//! hidden global registry, so several kernels can coexist in one test
//! binary.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod sync;
pub mod object;
pub mod frame;
pub mod config;
pub mod context;
pub mod thread;
pub mod process;
pub mod handle;
pub mod scheduler;
pub mod ipc;
pub mod kernel;

#[cfg(test)]
mod tests;

pub use config::KernelConfig;
pub use handle::{Handle, HandleTable};
pub use kernel::KernelContext;
pub use object::{Obj, ObjectPool, WeakObj};
pub use process::{Process, ProcessState};
pub use scheduler::{GlobalScheduler, Priority, Scheduler};
pub use thread::{Thread, ThreadState};

use core::fmt;

/// Unique identifier for threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Wrap a raw ID value
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw ID value
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid:{}", self.0)
    }
}

/// Unique identifier for processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u64);

impl ProcessId {
    /// The idle/kernel process. Never handed out by the allocator.
    pub const IDLE: Self = Self(0);

    /// Wrap a raw ID value
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw ID value
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid:{}", self.0)
    }
}

/// Kernel result type
pub type KernelResult<T> = Result<T, KernelError>;

/// Recoverable kernel errors.
///
/// Invariant violations are not errors; they go through [`stop_error!`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// A pool, the page allocator or a registry is exhausted
    OutOfMemory,
    /// The process' handle table has no free slot
    HandleTableFull,
    /// Handle index out of range, empty, or of the wrong kind
    InvalidHandle,
    /// The port (or its server side) is closed
    PortClosed,
    /// The port already has its maximum of pending connections
    PortFull,
    /// The object is not in a state that allows the operation
    InvalidState,
    /// Invalid argument
    InvalidArgument,
    /// Nothing registered under that name or ID
    NotFound,
    /// A registry already holds that name
    AlreadyExists,
    /// A user pointer is in the kernel half or unmapped
    BadAddress,
    /// The operation is a stub
    NotSupported,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            KernelError::OutOfMemory => "out of memory",
            KernelError::HandleTableFull => "handle table full",
            KernelError::InvalidHandle => "invalid handle",
            KernelError::PortClosed => "port closed",
            KernelError::PortFull => "port full",
            KernelError::InvalidState => "invalid state",
            KernelError::InvalidArgument => "invalid argument",
            KernelError::NotFound => "not found",
            KernelError::AlreadyExists => "already exists",
            KernelError::BadAddress => "bad address",
            KernelError::NotSupported => "not supported",
        };
        f.write_str(text)
    }
}

impl From<pantheon_hal::HalError> for KernelError {
    fn from(err: pantheon_hal::HalError) -> Self {
        match err {
            pantheon_hal::HalError::OutOfMemory => KernelError::OutOfMemory,
            pantheon_hal::HalError::InvalidAddress => KernelError::BadAddress,
            pantheon_hal::HalError::InvalidParameter => KernelError::InvalidArgument,
            pantheon_hal::HalError::NotSupported => KernelError::NotSupported,
        }
    }
}

/// Halt the current core over a broken kernel invariant.
///
/// Logs the message at `error` level and panics; the kernel's panic handler
/// parks the core.
#[macro_export]
macro_rules! stop_error {
    ($($arg:tt)+) => {
        $crate::stop(format_args!($($arg)+))
    };
}

#[doc(hidden)]
#[cold]
#[track_caller]
pub fn stop(args: fmt::Arguments<'_>) -> ! {
    log::error!("stop error: {}", args);
    panic!("stop error: {}", args)
}
