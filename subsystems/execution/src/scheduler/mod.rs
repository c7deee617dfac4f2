//! # Scheduler
//!
//! Two layers:
//!
//! - [`GlobalScheduler`]: the process registry shared by all cores, thread
//!   creation and the round-robin hand-out of runnable threads
//! - [`Scheduler`]: one per core, switching between what the global layer
//!   hands out and the core's idle thread

pub mod global;
pub mod ids;
pub mod metrics;
pub mod percore;
pub mod priority;

pub use global::GlobalScheduler;
pub use ids::IdAllocator;
pub use metrics::SchedulerMetrics;
pub use percore::Scheduler;
pub use priority::Priority;
