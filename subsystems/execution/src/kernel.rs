//! # Kernel Context
//!
//! Everything the scheduling and IPC core keeps, in one value. Boot code
//! builds it once from a [`KernelConfig`] and the platform's collaborators;
//! tests build as many independent kernels as they like.

use crate::config::KernelConfig;
use crate::context::ContextSwitchEngine;
use crate::ipc::IpcContext;
use crate::scheduler::{GlobalScheduler, Scheduler};
use crate::KernelResult;
use alloc::sync::Arc;
use alloc::vec::Vec;
use pantheon_hal::Platform;

/// The kernel's scheduling and IPC state
#[derive(Debug)]
pub struct KernelContext {
    config: KernelConfig,
    scheduler: GlobalScheduler,
    ipc: IpcContext,
    cores: Vec<Scheduler>,
    engine: Arc<ContextSwitchEngine>,
    platform: Platform,
}

impl KernelContext {
    /// Build the registry, idle threads, per-core schedulers and IPC pools.
    /// Scheduling starts with [`KernelContext::start`].
    pub fn new(config: KernelConfig, platform: Platform) -> KernelResult<Self> {
        let scheduler = GlobalScheduler::new(&config, platform.pages.clone())?;
        let engine = Arc::new(ContextSwitchEngine::new(platform.switcher.clone()));
        let cores = (0..config.cpu_count)
            .map(|core| Scheduler::new(core, &scheduler, engine.clone()))
            .collect::<KernelResult<Vec<_>>>()?;
        let ipc = IpcContext::new(&config);

        log::info!(
            "kernel context: {} cores, {} threads, {} processes, {} ports, {} events",
            config.cpu_count,
            config.max_threads,
            config.max_processes,
            config.max_ports,
            config.max_events
        );
        Ok(Self {
            config,
            scheduler,
            ipc,
            cores,
            engine,
            platform,
        })
    }

    /// Let cores pick up threads
    pub fn start(&self) {
        self.scheduler.set_ready();
    }

    /// Configuration
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// The global scheduler
    pub fn scheduler(&self) -> &GlobalScheduler {
        &self.scheduler
    }

    /// IPC pools and registries
    pub fn ipc(&self) -> &IpcContext {
        &self.ipc
    }

    /// Scheduler of `core`
    pub fn core(&self, core: usize) -> Option<&Scheduler> {
        self.cores.get(core)
    }

    /// Every per-core scheduler
    pub fn cores(&self) -> &[Scheduler] {
        &self.cores
    }

    /// Context switch engine, for registering hooks
    pub fn switch_engine(&self) -> &ContextSwitchEngine {
        &self.engine
    }

    /// Injected platform collaborators
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Reap zombie processes, then drop events whose creator is gone and
    /// ports whose server side closed. Returns the number of processes
    /// reaped.
    pub fn reap(&self) -> usize {
        let processes = self.scheduler.reap_zombies();
        let events = self.ipc.events.purge_orphans();
        let ports = self.ipc.ports.prune();
        if processes + events + ports > 0 {
            log::info!(
                "reaped {} processes, {} events, {} ports",
                processes,
                events,
                ports
            );
        }
        processes
    }
}
