//! # Hosted HAL
//!
//! Implementations of every seam on top of the host standard library.
//!
//! Each OS thread plays the part of one core: it gets its own core number
//! and its own interrupt flag and PUSHI/POPI depth, so spinlock holder
//! tracking and interrupt nesting behave exactly as they would across real
//! cores, and independent tests running in parallel never share per-core
//! state.

use crate::cpu::{self, ContextSwitch, CpuContext, CpuOps};
use crate::mmu::{PageAllocator, UserMemory};
use crate::{HalError, HalResult, Platform, PhysAddr, VirtAddr, PAGE_SIZE};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::Cell;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use spin::Mutex;

static NEXT_CORE: AtomicU32 = AtomicU32::new(0);

std::thread_local! {
    static CORE: u32 = NEXT_CORE.fetch_add(1, Ordering::Relaxed);
    static ENABLED: Cell<bool> = const { Cell::new(true) };
    static DEPTH: Cell<u32> = const { Cell::new(0) };
    static WAS_ENABLED: Cell<bool> = const { Cell::new(false) };
}

static HOST_CPU: HostCpu = HostCpu;

/// Install [`HostCpu`] as the CPU operations. Idempotent.
pub fn install() {
    cpu::install(&HOST_CPU);
}

/// A platform with `pages` free pages and a counting context switch
pub fn platform(pages: usize) -> (Platform, Arc<HostPageAllocator>, Arc<HostSwitch>) {
    install();
    let allocator = Arc::new(HostPageAllocator::new(pages));
    let switcher = Arc::new(HostSwitch::new());
    let platform = Platform::new(allocator.clone(), switcher.clone());
    (platform, allocator, switcher)
}

/// One core per OS thread
#[derive(Debug, Default)]
pub struct HostCpu;

impl CpuOps for HostCpu {
    fn current_core(&self) -> u32 {
        CORE.with(|core| *core)
    }

    fn core_count(&self) -> usize {
        cpu::MAX_CPUS
    }

    unsafe fn enable_interrupts(&self) {
        ENABLED.with(|flag| flag.set(true));
    }

    unsafe fn disable_interrupts(&self) {
        ENABLED.with(|flag| flag.set(false));
    }

    fn interrupts_enabled(&self) -> bool {
        ENABLED.with(|flag| flag.get())
    }

    fn push_interrupts_off(&self) {
        let enabled = self.interrupts_enabled();
        // SAFETY: thread-local flag.
        unsafe { self.disable_interrupts() };
        DEPTH.with(|depth| {
            if depth.get() == 0 {
                WAS_ENABLED.with(|was| was.set(enabled));
            }
            depth.set(depth.get() + 1);
        });
    }

    fn pop_interrupts(&self) {
        let depth = DEPTH.with(|depth| depth.get());
        if depth == 0 {
            panic!("interrupt nesting underflow on core {}", self.current_core());
        }
        DEPTH.with(|d| d.set(depth - 1));
        if depth == 1 && WAS_ENABLED.with(|was| was.get()) {
            // SAFETY: thread-local flag.
            unsafe { self.enable_interrupts() };
        }
    }

    fn interrupt_depth(&self) -> u32 {
        DEPTH.with(|depth| depth.get())
    }

    fn halt(&self) {
        std::thread::yield_now();
    }
}

/// Bounded page allocator handing out fake, page-aligned addresses
#[derive(Debug)]
pub struct HostPageAllocator {
    capacity: usize,
    next: AtomicU64,
    recycled: Mutex<Vec<PhysAddr>>,
    outstanding: Mutex<usize>,
}

impl HostPageAllocator {
    /// Base of the fake physical range
    pub const BASE: u64 = 0x4000_0000;

    /// An allocator that can have at most `capacity` pages outstanding
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next: AtomicU64::new(Self::BASE),
            recycled: Mutex::new(Vec::new()),
            outstanding: Mutex::new(0),
        }
    }

    /// Pages currently handed out
    pub fn outstanding(&self) -> usize {
        *self.outstanding.lock()
    }
}

impl PageAllocator for HostPageAllocator {
    fn alloc(&self) -> Option<PhysAddr> {
        let mut outstanding = self.outstanding.lock();
        if *outstanding >= self.capacity {
            return None;
        }
        *outstanding += 1;
        let page = self
            .recycled
            .lock()
            .pop()
            .unwrap_or_else(|| PhysAddr::new(self.next.fetch_add(PAGE_SIZE, Ordering::Relaxed)));
        Some(page)
    }

    fn free(&self, page: PhysAddr) {
        let mut outstanding = self.outstanding.lock();
        assert!(*outstanding > 0, "free of {:?} with nothing outstanding", page);
        *outstanding -= 1;
        self.recycled.lock().push(page);
    }

    fn free_pages(&self) -> usize {
        self.capacity - *self.outstanding.lock()
    }
}

/// Context switch that records the switch and returns immediately, as if
/// the previous thread were resumed right away.
#[derive(Debug, Default)]
pub struct HostSwitch {
    switches: AtomicU64,
    last_target: AtomicU64,
}

impl HostSwitch {
    /// Create a counter at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of switches performed
    pub fn switches(&self) -> u64 {
        self.switches.load(Ordering::SeqCst)
    }

    /// Program counter of the context most recently switched to
    pub fn last_target_pc(&self) -> u64 {
        self.last_target.load(Ordering::SeqCst)
    }
}

impl ContextSwitch for HostSwitch {
    unsafe fn switch(&self, old: *mut CpuContext, new: *const CpuContext) {
        assert_ne!(old as *const CpuContext, new, "switch to the running context");
        // SAFETY: the caller guarantees `new` is live.
        let pc = unsafe { (*new).pc };
        self.last_target.store(pc, Ordering::SeqCst);
        self.switches.fetch_add(1, Ordering::SeqCst);
    }
}

/// Byte-addressed user memory keyed by page-table root
#[derive(Debug, Default)]
pub struct HostMemory {
    bytes: Mutex<BTreeMap<(u64, u64), u8>>,
}

impl HostMemory {
    /// Empty memory: every read faults
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `data` at `addr` in the address space rooted at `root`
    pub fn write(&self, root: PhysAddr, addr: VirtAddr, data: &[u8]) {
        let mut bytes = self.bytes.lock();
        for (offset, byte) in data.iter().enumerate() {
            bytes.insert((root.as_u64(), addr.as_u64() + offset as u64), *byte);
        }
    }

    /// Place a NUL-terminated copy of `text` at `addr`
    pub fn write_str(&self, root: PhysAddr, addr: VirtAddr, text: &str) {
        self.write(root, addr, text.as_bytes());
        self.write(root, addr.add(text.len() as u64), &[0]);
    }
}

impl UserMemory for HostMemory {
    fn copy_from_user(&self, root: PhysAddr, addr: VirtAddr, buf: &mut [u8]) -> HalResult<()> {
        let bytes = self.bytes.lock();
        for (offset, out) in buf.iter_mut().enumerate() {
            *out = *bytes
                .get(&(root.as_u64(), addr.as_u64() + offset as u64))
                .ok_or(HalError::InvalidAddress)?;
        }
        Ok(())
    }
}
