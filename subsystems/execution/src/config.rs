//! # Kernel Configuration

use pantheon_hal::VirtAddr;

/// Sizing and policy knobs for a [`crate::KernelContext`]
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Number of cores, one [`crate::Scheduler`] and idle thread each
    pub cpu_count: usize,
    /// Tick budget is `(priority + 1) * tick_multiplier`
    pub tick_multiplier: u64,
    /// Thread pool capacity
    pub max_threads: usize,
    /// Process pool capacity
    pub max_processes: usize,
    /// Port pool and port registry capacity
    pub max_ports: usize,
    /// Connection pool capacity
    pub max_connections: usize,
    /// Named event pool and registry capacity
    pub max_events: usize,
    /// Where idle threads start executing
    pub idle_entry: VirtAddr,
    /// Kernel routine that drops a new user thread to EL0
    pub user_trampoline: VirtAddr,
    /// Initial user stack pointer of user threads
    pub user_stack_top: VirtAddr,
    /// Thread-local page address of user threads
    pub user_tls_base: VirtAddr,
}

impl KernelConfig {
    /// Default tick multiplier
    pub const TICK_MULTIPLIER: u64 = 3;
    /// Default thread pool capacity
    pub const MAX_THREADS: usize = 512;
    /// Default process pool capacity
    pub const MAX_PROCESSES: usize = 128;
    /// Default port capacity
    pub const MAX_PORTS: usize = 64;
    /// Default connection capacity
    pub const MAX_CONNECTIONS: usize = 256;
    /// Default named event capacity
    pub const MAX_EVENTS: usize = 64;

    /// Create default configuration for `cpu_count` cores
    pub fn new(cpu_count: usize) -> Self {
        Self {
            cpu_count,
            tick_multiplier: Self::TICK_MULTIPLIER,
            max_threads: Self::MAX_THREADS,
            max_processes: Self::MAX_PROCESSES,
            max_ports: Self::MAX_PORTS,
            max_connections: Self::MAX_CONNECTIONS,
            max_events: Self::MAX_EVENTS,
            idle_entry: VirtAddr::new(0),
            user_trampoline: VirtAddr::new(0),
            user_stack_top: VirtAddr::new(0x0000_7FFF_FFFF_0000),
            user_tls_base: VirtAddr::new(0x0000_7FFF_FFFE_0000),
        }
    }

    /// A single-core configuration with small pools, for tests and bring-up
    pub fn small() -> Self {
        Self {
            max_threads: 16,
            max_processes: 8,
            max_ports: 4,
            max_connections: 8,
            max_events: 4,
            ..Self::new(1)
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new(1)
    }
}
