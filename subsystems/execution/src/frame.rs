//! Owned physical pages

use crate::{KernelError, KernelResult};
use alloc::sync::Arc;
use core::fmt;
use pantheon_hal::mmu::PageAllocator;
use pantheon_hal::{PhysAddr, VirtAddr, PAGE_SIZE};

/// One physical page, returned to its allocator on drop
pub struct PageFrame {
    addr: PhysAddr,
    pages: Arc<dyn PageAllocator>,
}

impl PageFrame {
    /// Take a page from `pages`
    pub fn alloc(pages: &Arc<dyn PageAllocator>) -> KernelResult<Self> {
        let addr = pages.alloc().ok_or(KernelError::OutOfMemory)?;
        Ok(Self {
            addr,
            pages: pages.clone(),
        })
    }

    /// Physical address of the page
    pub fn addr(&self) -> PhysAddr {
        self.addr
    }

    /// Kernel alias of the first byte
    pub fn base(&self) -> VirtAddr {
        self.addr.to_higher_half()
    }

    /// Kernel alias one past the last byte (initial stack pointer)
    pub fn top(&self) -> VirtAddr {
        self.base().add(PAGE_SIZE)
    }
}

impl Drop for PageFrame {
    fn drop(&mut self) {
        self.pages.free(self.addr);
    }
}

impl fmt::Debug for PageFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageFrame({:#x})", self.addr.as_u64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pantheon_hal::hosted::HostPageAllocator;

    #[test]
    fn page_returns_to_allocator_on_drop() {
        let host = Arc::new(HostPageAllocator::new(1));
        let pages: Arc<dyn PageAllocator> = host.clone();
        let frame = PageFrame::alloc(&pages).expect("page");
        assert_eq!(frame.top().as_u64() - frame.base().as_u64(), PAGE_SIZE);
        assert_eq!(PageFrame::alloc(&pages).err(), Some(KernelError::OutOfMemory));

        drop(frame);
        assert_eq!(host.outstanding(), 0);
    }
}
