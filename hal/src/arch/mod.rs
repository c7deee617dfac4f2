//! # Architecture Selection
//!
//! Compile-time selection of the CPU operations used when nothing was
//! installed through [`crate::cpu::install`].

use crate::cpu::CpuOps;

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "aarch64", target_os = "none"))] {
        pub mod aarch64;

        /// The architecture's CPU operations
        pub fn default_cpu() -> &'static dyn CpuOps {
            &aarch64::CPU
        }
    } else {
        mod generic;

        pub use generic::UniprocessorCpu;

        /// The architecture's CPU operations
        pub fn default_cpu() -> &'static dyn CpuOps {
            &generic::CPU
        }
    }
}

/// Architecture name constant
pub const ARCH_NAME: &str = {
    #[cfg(target_arch = "aarch64")]
    { "aarch64" }
    #[cfg(not(target_arch = "aarch64"))]
    { "unknown" }
};
