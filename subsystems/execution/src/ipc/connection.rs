//! Connections between a client and the server of a port

use super::{CloseFlags, CloseState, ClientPort, PortPools, ServerPort};
use crate::object::{Obj, WeakObj};
use crate::sync::SpinMutex;
use crate::{KernelError, KernelResult};
use core::fmt;

/// One client-server session on a port
pub struct Connection {
    client: WeakObj<ClientPort>,
    server: WeakObj<ServerPort>,
    closed: SpinMutex<CloseFlags>,
}

impl Connection {
    /// Open a connection through `client` and queue it on the port's server
    /// side.
    pub fn connect(pools: &PortPools, client: &Obj<ClientPort>) -> KernelResult<Obj<Connection>> {
        let port = client.port().ok_or(KernelError::PortClosed)?;
        let server = port.server().ok_or(KernelError::PortClosed)?;
        let connection = pools
            .connections()
            .alloc(Connection {
                client: Obj::downgrade(client),
                server: Obj::downgrade(server),
                closed: SpinMutex::new("connection", CloseFlags::empty()),
            })
            .ok_or(KernelError::OutOfMemory)?;
        port.enqueue(connection.clone())?;
        log::debug!("connection queued on port '{}'", port.name());
        Ok(connection)
    }

    /// Client port this connection came through
    pub fn client_port(&self) -> Option<Obj<ClientPort>> {
        self.client.upgrade()
    }

    /// Server port this connection was queued on
    pub fn server_port(&self) -> Option<Obj<ServerPort>> {
        self.server.upgrade()
    }

    /// Current close state
    pub fn state(&self) -> CloseState {
        CloseState::from(*self.closed.lock())
    }

    /// Close the client side; closing twice does nothing
    pub fn close_client_handler(&self) {
        self.close_side(CloseFlags::CLIENT);
    }

    /// Close the server side; closing twice does nothing
    pub fn close_server_handler(&self) {
        self.close_side(CloseFlags::SERVER);
    }

    fn close_side(&self, side: CloseFlags) {
        let mut closed = self.closed.lock();
        if !closed.contains(side) {
            closed.insert(side);
            log::trace!("connection now {:?}", CloseState::from(*closed));
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("state", &self.state()).finish()
    }
}
