//! Ports: named rendezvous points with a bounded queue of pending
//! connections.
//!
//! A [`Port`] owns exactly one [`ClientPort`] and one [`ServerPort`]. The
//! sides keep a non-owning reference back to the port, so the port lives as
//! long as its registry entry (or whoever created it) keeps it.

use super::{object_name, CloseFlags, CloseState, Connection, ObjectName};
use crate::object::{Obj, ObjectPool, WeakObj};
use crate::sync::SpinMutex;
use crate::{KernelError, KernelResult};
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt;
use hashbrown::HashMap;
use spin::Once;

/// Pools backing ports, their two sides, and connections
pub struct PortPools {
    ports: ObjectPool<Port>,
    clients: ObjectPool<ClientPort>,
    servers: ObjectPool<ServerPort>,
    connections: ObjectPool<Connection>,
}

impl PortPools {
    /// Room for `ports` ports and `connections` connections
    pub fn new(ports: usize, connections: usize) -> Self {
        Self {
            ports: ObjectPool::new("ports", ports),
            clients: ObjectPool::new("client ports", ports),
            servers: ObjectPool::new("server ports", ports),
            connections: ObjectPool::new("connections", connections),
        }
    }

    /// Connection pool
    pub fn connections(&self) -> &ObjectPool<Connection> {
        &self.connections
    }

    /// Port pool
    pub fn ports(&self) -> &ObjectPool<Port> {
        &self.ports
    }
}

impl fmt::Debug for PortPools {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortPools")
            .field("ports", &self.ports)
            .field("connections", &self.connections)
            .finish_non_exhaustive()
    }
}

/// A named port
pub struct Port {
    name: ObjectName,
    max_connections: usize,
    closed: SpinMutex<CloseFlags>,
    client: Once<Obj<ClientPort>>,
    server: Once<Obj<ServerPort>>,
}

impl Port {
    /// Allocate a port together with both of its sides. Nothing stays
    /// allocated if any piece fails.
    pub fn initialize(
        pools: &PortPools,
        name: &str,
        max_connections: usize,
    ) -> KernelResult<Obj<Port>> {
        if max_connections == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let port = pools
            .ports
            .alloc(Port {
                name: object_name(name)?,
                max_connections,
                closed: SpinMutex::new("port", CloseFlags::empty()),
                client: Once::new(),
                server: Once::new(),
            })
            .ok_or(KernelError::OutOfMemory)?;

        let client = pools
            .clients
            .alloc(ClientPort {
                parent: Obj::downgrade(&port),
            })
            .ok_or(KernelError::OutOfMemory)?;
        let server = pools
            .servers
            .alloc(ServerPort {
                parent: Obj::downgrade(&port),
                pending: SpinMutex::new("server port", VecDeque::new()),
            })
            .ok_or(KernelError::OutOfMemory)?;

        port.client.call_once(|| client);
        port.server.call_once(|| server);
        log::debug!("port '{}' open (max {} pending)", port.name, max_connections);
        Ok(port)
    }

    /// Port name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Most connections that may wait for `accept`
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// The client side
    pub fn client(&self) -> Option<&Obj<ClientPort>> {
        self.client.get()
    }

    /// The server side
    pub fn server(&self) -> Option<&Obj<ServerPort>> {
        self.server.get()
    }

    /// Current close state
    pub fn state(&self) -> CloseState {
        CloseState::from(*self.closed.lock())
    }

    /// Queue `connection` on the server side.
    ///
    /// Fails with [`KernelError::PortClosed`] unless the port is open, and
    /// with [`KernelError::PortFull`] when `max_connections` are already
    /// pending.
    pub fn enqueue(&self, connection: Obj<Connection>) -> KernelResult<()> {
        let closed = self.closed.lock();
        if CloseState::from(*closed) != CloseState::Open {
            return Err(KernelError::PortClosed);
        }
        let server = self.server().ok_or(KernelError::PortClosed)?;
        let mut pending = server.pending.lock();
        if pending.len() >= self.max_connections {
            log::debug!("port '{}' full ({} pending)", self.name, pending.len());
            return Err(KernelError::PortFull);
        }
        pending.push_back(connection);
        Ok(())
    }

    /// Close the server side and drop every pending connection
    pub fn close_server_handler(&self) {
        if self.close_side(CloseFlags::SERVER) {
            if let Some(server) = self.server() {
                server.cleanup();
            }
        }
    }

    /// Close the client side
    pub fn close_client_handler(&self) {
        self.close_side(CloseFlags::CLIENT);
    }

    fn close_side(&self, side: CloseFlags) -> bool {
        let mut closed = self.closed.lock();
        if closed.contains(side) {
            return false;
        }
        closed.insert(side);
        log::debug!("port '{}' now {:?}", self.name, CloseState::from(*closed));
        true
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("name", &self.name.as_str())
            .field("max_connections", &self.max_connections)
            .field("state", &self.state())
            .finish()
    }
}

/// Connecting side of a port
pub struct ClientPort {
    parent: WeakObj<Port>,
}

impl ClientPort {
    /// The port, unless it has been destroyed
    pub fn port(&self) -> Option<Obj<Port>> {
        self.parent.upgrade()
    }

    /// Close the parent port's client side
    pub fn close(&self) {
        if let Some(port) = self.port() {
            port.close_client_handler();
        }
    }
}

impl fmt::Debug for ClientPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientPort").field("port", &self.parent).finish()
    }
}

/// Accepting side of a port; holds the pending-connection FIFO
pub struct ServerPort {
    parent: WeakObj<Port>,
    pending: SpinMutex<VecDeque<Obj<Connection>>>,
}

impl ServerPort {
    /// The port, unless it has been destroyed
    pub fn port(&self) -> Option<Obj<Port>> {
        self.parent.upgrade()
    }

    /// Take the oldest pending connection
    pub fn accept(&self) -> KernelResult<Obj<Connection>> {
        let port = self.port().ok_or(KernelError::PortClosed)?;
        if matches!(port.state(), CloseState::ClosedServer | CloseState::Closed) {
            return Err(KernelError::PortClosed);
        }
        self.pending.lock().pop_front().ok_or(KernelError::NotFound)
    }

    /// Connections waiting for `accept`
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Close the server side of every pending connection and drop them
    pub fn cleanup(&self) {
        let drained: Vec<Obj<Connection>> = self.pending.lock().drain(..).collect();
        for connection in &drained {
            connection.close_server_handler();
        }
        if !drained.is_empty() {
            log::debug!("server port cleanup dropped {} connections", drained.len());
        }
    }

    /// Close the parent port's server side
    pub fn close(&self) {
        if let Some(port) = self.port() {
            port.close_server_handler();
        }
    }
}

impl fmt::Debug for ServerPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerPort")
            .field("port", &self.parent)
            .field("pending", &self.pending())
            .finish()
    }
}

/// Name → port map with fixed capacity
#[derive(Debug)]
pub struct PortRegistry {
    capacity: usize,
    ports: SpinMutex<HashMap<ObjectName, Obj<Port>>>,
}

impl PortRegistry {
    /// Room for `capacity` named ports
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ports: SpinMutex::new("port registry", HashMap::with_capacity(capacity)),
        }
    }

    /// Register `port` under its name. Ports whose server side has closed
    /// are dropped first to make room.
    pub fn register(&self, port: Obj<Port>) -> KernelResult<()> {
        let name = object_name(port.name())?;
        let stale = {
            let mut ports = self.ports.lock();
            let stale = Self::take_stale(&mut ports);
            if ports.contains_key(&name) {
                return Err(KernelError::AlreadyExists);
            }
            if ports.len() >= self.capacity {
                return Err(KernelError::OutOfMemory);
            }
            ports.insert(name, port);
            stale
        };
        drop(stale);
        Ok(())
    }

    /// Port registered under `name`
    pub fn lookup(&self, name: &str) -> Option<Obj<Port>> {
        self.ports.lock().get(name).cloned()
    }

    /// Remove and return the port registered under `name`
    pub fn remove(&self, name: &str) -> Option<Obj<Port>> {
        self.ports.lock().remove(name)
    }

    /// Drop every port whose server side has closed. Returns how many.
    pub fn prune(&self) -> usize {
        let stale = Self::take_stale(&mut self.ports.lock());
        stale.len()
    }

    /// Registered ports
    pub fn len(&self) -> usize {
        self.ports.lock().len()
    }

    /// Nothing registered?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_stale(ports: &mut HashMap<ObjectName, Obj<Port>>) -> Vec<Obj<Port>> {
        let mut stale = Vec::new();
        ports.retain(|_, port| {
            let keep = matches!(port.state(), CloseState::Open | CloseState::ClosedClient);
            if !keep {
                stale.push(port.clone());
            }
            keep
        });
        stale
    }
}
