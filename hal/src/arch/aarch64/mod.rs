//! # AArch64 Support
//!
//! CPU operations on system registers and the `cpu_switch` binding.

pub mod cpu;
pub mod switch;

pub use cpu::{Aarch64Cpu, CPU};
pub use switch::Aarch64Switch;
