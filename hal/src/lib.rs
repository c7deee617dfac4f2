//! # Pantheon HAL
//!
//! The narrow hardware interface the scheduling and IPC core is written
//! against. Everything architecture-specific sits behind one of these seams:
//!
//! - [`cpu::CpuOps`]: core identification, interrupt masking (with the
//!   per-core PUSHI/POPI nesting), spin-wait hints
//! - [`cpu::ContextSwitch`]: saving and restoring a [`cpu::CpuContext`]
//! - [`mmu::PageAllocator`]: the physical page provider
//! - [`mmu::UserMemory`]: reading user memory through a page-table root
//!
//! The aarch64 implementation lives in [`arch`]. With the `hosted` feature
//! the crate also provides [`hosted`], an implementation backed by the host
//! standard library, so the kernel core can be exercised by `cargo test`.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(feature = "hosted")]
extern crate std;

pub mod cpu;
pub mod mmu;
pub mod arch;

#[cfg(feature = "hosted")]
pub mod hosted;

use alloc::sync::Arc;

/// Result type for HAL operations
pub type HalResult<T> = Result<T, HalError>;

/// Errors that can occur in HAL operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// The operation is not supported on this architecture
    NotSupported,
    /// Invalid parameter provided
    InvalidParameter,
    /// Address is invalid, unmapped or not aligned
    InvalidAddress,
    /// Memory allocation failed
    OutOfMemory,
}

/// Size of a translation granule
pub const PAGE_SIZE: u64 = 4096;

/// First address of the kernel half of the address space.
///
/// User pointers handed to syscalls must lie strictly below this.
pub const HIGHER_HALF_BASE: u64 = 0xFFFF_0000_0000_0000;

/// Physical address type (architecture-independent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(u64);

impl PhysAddr {
    /// Create a new physical address
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Get the raw address value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Check if the address is aligned to the given alignment
    #[inline]
    pub const fn is_aligned(self, align: u64) -> bool {
        self.0 % align == 0
    }

    /// Add an offset to the address
    #[inline]
    pub const fn add(self, offset: u64) -> Self {
        Self(self.0 + offset)
    }

    /// The kernel's linear-map alias of this physical address
    #[inline]
    pub const fn to_higher_half(self) -> VirtAddr {
        VirtAddr(self.0 | HIGHER_HALF_BASE)
    }
}

/// Virtual address type (architecture-independent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtAddr(u64);

impl VirtAddr {
    /// Create a new virtual address
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Get the raw address value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Check if the address is aligned to the given alignment
    #[inline]
    pub const fn is_aligned(self, align: u64) -> bool {
        self.0 % align == 0
    }

    /// Add an offset to the address
    #[inline]
    pub const fn add(self, offset: u64) -> Self {
        Self(self.0 + offset)
    }

    /// Does this address fall in the kernel half?
    #[inline]
    pub const fn is_higher_half(self) -> bool {
        self.0 >= HIGHER_HALF_BASE
    }
}

/// The collaborators the kernel core consumes, bundled for injection.
#[derive(Clone)]
pub struct Platform {
    /// Physical page provider
    pub pages: Arc<dyn mmu::PageAllocator>,
    /// Register-context switch routine
    pub switcher: Arc<dyn cpu::ContextSwitch>,
}

impl Platform {
    /// Bundle a page allocator and a context switch routine
    pub fn new(pages: Arc<dyn mmu::PageAllocator>, switcher: Arc<dyn cpu::ContextSwitch>) -> Self {
        Self { pages, switcher }
    }
}

impl core::fmt::Debug for Platform {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Platform")
            .field("free_pages", &self.pages.free_pages())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_half_alias_sets_the_top_bits() {
        let phys = PhysAddr::new(0x4008_0000);
        let virt = phys.to_higher_half();
        assert!(virt.is_higher_half());
        assert_eq!(virt.as_u64(), 0xFFFF_0000_4008_0000);
    }

    #[test]
    fn user_addresses_are_below_the_split() {
        assert!(!VirtAddr::new(0x0000_7FFF_FFFF_F000).is_higher_half());
        assert!(VirtAddr::new(HIGHER_HALF_BASE).is_higher_half());
    }
}
