//! # Thread Management
//!
//! Threads, their state machine and their stacks.

pub mod states;
pub mod thread;

pub use states::*;
pub use thread::*;
