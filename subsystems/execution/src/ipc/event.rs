//! Named events
//!
//! A [`NamedEvent`] is a binary flag with exactly one [`ReadableEvent`] and
//! one [`WritableEvent`] capability. Writers signal and reset, readers poll
//! and clear. There is no wait queue: a consumer polls.
//!
//! Both capabilities hold the event they belong to, so neither can outlive
//! it. The [`EventRegistry`] keeps all three together under the event's name
//! until the event is destroyed.

use super::{object_name, ObjectName};
use crate::object::{Obj, ObjectPool, WeakObj};
use crate::process::Process;
use crate::sync::SpinMutex;
use crate::{KernelError, KernelResult};
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use hashbrown::HashMap;

/// Event status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// Not signaled
    Unsignaled,
    /// Signaled
    Signaled,
}

/// A named binary signal
pub struct NamedEvent {
    name: ObjectName,
    creator: WeakObj<Process>,
    signaled: AtomicBool,
}

impl NamedEvent {
    /// Event name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process that created the event, if still alive
    pub fn creator(&self) -> Option<Obj<Process>> {
        self.creator.upgrade()
    }

    /// Current status
    pub fn status(&self) -> EventStatus {
        if self.signaled.load(Ordering::Acquire) {
            EventStatus::Signaled
        } else {
            EventStatus::Unsignaled
        }
    }

    fn set(&self, status: EventStatus) {
        self.signaled
            .store(status == EventStatus::Signaled, Ordering::Release);
    }
}

impl fmt::Debug for NamedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedEvent")
            .field("name", &self.name.as_str())
            .field("status", &self.status())
            .finish()
    }
}

/// Read capability: poll and clear
#[derive(Debug)]
pub struct ReadableEvent {
    event: Obj<NamedEvent>,
}

impl ReadableEvent {
    /// The underlying event
    pub fn event(&self) -> &Obj<NamedEvent> {
        &self.event
    }

    /// Current status
    pub fn poll(&self) -> EventStatus {
        self.event.status()
    }

    /// Return to unsignaled
    pub fn clear(&self) {
        self.event.set(EventStatus::Unsignaled);
    }
}

/// Write capability: signal and reset
#[derive(Debug)]
pub struct WritableEvent {
    event: Obj<NamedEvent>,
}

impl WritableEvent {
    /// The underlying event
    pub fn event(&self) -> &Obj<NamedEvent> {
        &self.event
    }

    /// Mark signaled
    pub fn signal(&self) {
        self.event.set(EventStatus::Signaled);
        log::trace!("event '{}' signaled", self.event.name());
    }

    /// Return to unsignaled
    pub fn reset(&self) {
        self.event.set(EventStatus::Unsignaled);
    }
}

/// A registered event with its two capabilities
#[derive(Debug, Clone)]
pub struct EventEntry {
    /// The event
    pub event: Obj<NamedEvent>,
    /// Its read capability
    pub readable: Obj<ReadableEvent>,
    /// Its write capability
    pub writable: Obj<WritableEvent>,
}

/// Name → event map with fixed capacity, plus the pools events come from
pub struct EventRegistry {
    capacity: usize,
    entries: SpinMutex<HashMap<ObjectName, EventEntry>>,
    events: ObjectPool<NamedEvent>,
    readable: ObjectPool<ReadableEvent>,
    writable: ObjectPool<WritableEvent>,
}

impl EventRegistry {
    /// Room for `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: SpinMutex::new("event registry", HashMap::with_capacity(capacity)),
            events: ObjectPool::new("events", capacity),
            readable: ObjectPool::new("readable events", capacity),
            writable: ObjectPool::new("writable events", capacity),
        }
    }

    /// Create and register an event. Nothing stays allocated if any piece
    /// fails.
    pub fn create_named_event(&self, name: &str, creator: &Obj<Process>) -> KernelResult<EventEntry> {
        let name = object_name(name)?;
        let mut entries = self.entries.lock();
        if entries.contains_key(&name) {
            return Err(KernelError::AlreadyExists);
        }
        if entries.len() >= self.capacity {
            return Err(KernelError::OutOfMemory);
        }

        let event = self
            .events
            .alloc(NamedEvent {
                name,
                creator: Obj::downgrade(creator),
                signaled: AtomicBool::new(false),
            })
            .ok_or(KernelError::OutOfMemory)?;
        let readable = self
            .readable
            .alloc(ReadableEvent { event: event.clone() })
            .ok_or(KernelError::OutOfMemory)?;
        let writable = self
            .writable
            .alloc(WritableEvent { event: event.clone() })
            .ok_or(KernelError::OutOfMemory)?;

        let entry = EventEntry {
            event,
            readable,
            writable,
        };
        entries.insert(name, entry.clone());
        log::debug!("event '{}' created by {}", name, creator.id());
        Ok(entry)
    }

    /// Registered event named exactly `name`
    pub fn lookup_event(&self, name: &str) -> Option<EventEntry> {
        self.entries.lock().get(name).cloned()
    }

    /// Unregister an event. The capabilities go first, then the event.
    pub fn destroy_named_event(&self, name: &str) -> KernelResult<()> {
        let entry = self.entries.lock().remove(name).ok_or(KernelError::NotFound)?;
        let EventEntry {
            event,
            readable,
            writable,
        } = entry;
        drop(readable);
        drop(writable);
        drop(event);
        log::debug!("event '{}' destroyed", name);
        Ok(())
    }

    /// Destroy every event whose creator no longer exists. Returns how many.
    pub fn purge_orphans(&self) -> usize {
        let orphans: Vec<EventEntry> = {
            let mut entries = self.entries.lock();
            let mut orphans = Vec::new();
            entries.retain(|_, entry| {
                let alive = entry.event.creator.is_alive();
                if !alive {
                    orphans.push(entry.clone());
                }
                alive
            });
            orphans
        };
        orphans.len()
    }

    /// Registered events
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Nothing registered?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events currently allocated, registered or not
    pub fn live_events(&self) -> usize {
        self.events.live()
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistry")
            .field("capacity", &self.capacity)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Priority;
    use crate::ProcessId;
    use pantheon_hal::{hosted, VirtAddr};

    fn creator(pool: &ObjectPool<Process>) -> Obj<Process> {
        pool.alloc(Process::new(ProcessId::new(1), "init", Priority::Normal, None, VirtAddr::new(0)))
            .expect("process")
    }

    #[test]
    fn signal_poll_clear_round_trip() {
        hosted::install();
        let processes = ObjectPool::new("processes", 1);
        let owner = creator(&processes);
        let registry = EventRegistry::new(4);

        let created = registry.create_named_event("x", &owner).expect("event");
        let found = registry.lookup_event("x").expect("registered");
        assert!(Obj::ptr_eq(&created.event, &found.event));

        created.writable.signal();
        assert_eq!(found.readable.poll(), EventStatus::Signaled);
        found.readable.clear();
        assert_eq!(created.readable.poll(), EventStatus::Unsignaled);

        created.writable.signal();
        created.writable.reset();
        assert_eq!(found.readable.poll(), EventStatus::Unsignaled);
    }

    #[test]
    fn lookup_requires_exact_name() {
        hosted::install();
        let processes = ObjectPool::new("processes", 1);
        let owner = creator(&processes);
        let registry = EventRegistry::new(4);
        registry.create_named_event("ready", &owner).expect("event");
        assert!(registry.lookup_event("read").is_none());
        assert!(registry.lookup_event("ready!").is_none());
        assert_eq!(
            registry.create_named_event("ready", &owner).err(),
            Some(KernelError::AlreadyExists)
        );
    }

    #[test]
    fn capacity_is_enforced_and_destroy_frees_everything() {
        hosted::install();
        let processes = ObjectPool::new("processes", 1);
        let owner = creator(&processes);
        let registry = EventRegistry::new(1);
        registry.create_named_event("a", &owner).expect("event");
        assert_eq!(
            registry.create_named_event("b", &owner).err(),
            Some(KernelError::OutOfMemory)
        );

        registry.destroy_named_event("a").expect("destroy");
        assert_eq!(registry.live_events(), 0);
        assert_eq!(registry.destroy_named_event("a"), Err(KernelError::NotFound));
        registry.create_named_event("b", &owner).expect("room again");
    }

    #[test]
    fn events_of_dead_creators_are_purged() {
        hosted::install();
        let processes = ObjectPool::new("processes", 1);
        let registry = EventRegistry::new(2);
        {
            let owner = creator(&processes);
            registry.create_named_event("orphan", &owner).expect("event");
        }
        assert_eq!(registry.purge_orphans(), 1);
        assert!(registry.is_empty());
        assert_eq!(registry.live_events(), 0);
    }
}
