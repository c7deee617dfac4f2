//! # Pantheon Userspace Interface
//!
//! The boundary between user programs and the execution core:
//! - The trap frame register convention ([`trap`])
//! - Syscall numbers, result codes and the dispatch table ([`syscalls`])
//! - Program resolution for `Execute` ([`program`])
//!
//! Handlers run on the thread that trapped. They reach kernel state only
//! through a [`SyscallContext`], never through globals.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod program;
pub mod syscalls;
pub mod trap;

pub use program::{ProgramImage, ProgramLoader, ProgramTable};
pub use syscalls::{ResultCode, Syscall, SyscallContext, SyscallResult, SyscallTable};
pub use trap::TrapFrame;
