//! # Memory Seams
//!
//! The kernel core never builds page tables itself. It needs two things from
//! the memory subsystem: whole physical pages (kernel stacks, user stacks,
//! thread-local pages, page-table roots) and a way to read bytes a user
//! process passed by pointer.

use crate::{HalResult, PhysAddr, VirtAddr};

/// Physical page provider (`Alloc()`/`Free()`)
pub trait PageAllocator: Send + Sync {
    /// Allocate one zeroed page, `None` when memory is exhausted
    fn alloc(&self) -> Option<PhysAddr>;

    /// Return a page obtained from [`PageAllocator::alloc`]
    fn free(&self, page: PhysAddr);

    /// Pages still available (diagnostics only)
    fn free_pages(&self) -> usize;
}

/// Access to user memory through a process' translation tables
pub trait UserMemory: Send + Sync {
    /// Copy `buf.len()` bytes starting at `addr` in the address space rooted
    /// at `root`.
    fn copy_from_user(&self, root: PhysAddr, addr: VirtAddr, buf: &mut [u8]) -> HalResult<()>;
}
