//! # Inter-Process Communication
//!
//! Ports, connections and named events. Every IPC object is pool-allocated
//! and reference-counted on its own, independently of any process lock, so
//! one process' connection may safely point at another process' port.
//!
//! Ports and connections share one two-sided close state machine:
//!
//! ```text
//!            close client              close server
//!   OPEN ─────────────────▶ CLOSED_CLIENT ────────────▶ CLOSED
//!     │                                                   ▲
//!     └───────────▶ CLOSED_SERVER ────────────────────────┘
//!   close server                   close client
//! ```
//!
//! Closing an already-closed side does nothing.

pub mod connection;
pub mod event;
pub mod port;

pub use connection::Connection;
pub use event::{EventRegistry, EventStatus, NamedEvent, ReadableEvent, WritableEvent};
pub use port::{ClientPort, Port, PortPools, PortRegistry, ServerPort};

use crate::config::KernelConfig;
use crate::{KernelError, KernelResult};
use arrayvec::ArrayString;
use bitflags::bitflags;

/// Longest port or event name, in bytes
pub const NAME_LEN: usize = 64;

/// Fixed-capacity name of a port or event
pub type ObjectName = ArrayString<NAME_LEN>;

/// Validate and copy a port or event name
pub fn object_name(name: &str) -> KernelResult<ObjectName> {
    if name.is_empty() {
        return Err(KernelError::InvalidArgument);
    }
    ObjectName::from(name).map_err(|_| KernelError::InvalidArgument)
}

bitflags! {
    /// Which sides of a port or connection have closed
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CloseFlags: u8 {
        /// Client side closed
        const CLIENT = 1 << 0;
        /// Server side closed
        const SERVER = 1 << 1;
    }
}

/// Two-sided close state of ports and connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseState {
    /// Neither side closed
    Open,
    /// Only the server side closed
    ClosedServer,
    /// Only the client side closed
    ClosedClient,
    /// Both sides closed
    Closed,
}

impl From<CloseFlags> for CloseState {
    fn from(flags: CloseFlags) -> Self {
        match (flags.contains(CloseFlags::CLIENT), flags.contains(CloseFlags::SERVER)) {
            (false, false) => CloseState::Open,
            (false, true) => CloseState::ClosedServer,
            (true, false) => CloseState::ClosedClient,
            (true, true) => CloseState::Closed,
        }
    }
}

/// All IPC pools and registries of one kernel
#[derive(Debug)]
pub struct IpcContext {
    /// Port, port side and connection pools
    pub pools: PortPools,
    /// Named ports
    pub ports: PortRegistry,
    /// Named events with their pools
    pub events: EventRegistry,
}

impl IpcContext {
    /// Size every pool and registry from `config`
    pub fn new(config: &KernelConfig) -> Self {
        Self {
            pools: PortPools::new(config.max_ports, config.max_connections),
            ports: PortRegistry::new(config.max_ports),
            events: EventRegistry::new(config.max_events),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_flags_map_to_states() {
        assert_eq!(CloseState::from(CloseFlags::empty()), CloseState::Open);
        assert_eq!(CloseState::from(CloseFlags::SERVER), CloseState::ClosedServer);
        assert_eq!(CloseState::from(CloseFlags::CLIENT), CloseState::ClosedClient);
        assert_eq!(CloseState::from(CloseFlags::all()), CloseState::Closed);
    }

    #[test]
    fn names_must_fit() {
        assert!(object_name("svc.log").is_ok());
        assert_eq!(object_name(""), Err(KernelError::InvalidArgument));
        let long = "n".repeat(NAME_LEN + 1);
        assert_eq!(object_name(&long), Err(KernelError::InvalidArgument));
    }
}
