//! # Handle Tables
//!
//! Per-process capability tables. A handle is a small index into the
//! table; each slot owns one counted reference to a kernel object.

use crate::ipc::{ClientPort, Connection, ReadableEvent, ServerPort, WritableEvent};
use crate::object::Obj;
use crate::process::Process;
use crate::thread::Thread;
use crate::{KernelError, KernelResult};
use alloc::vec::Vec;
use core::fmt;
use static_assertions::const_assert;

/// Slots per process
pub const HANDLE_TABLE_SIZE: usize = 64;

const_assert!(HANDLE_TABLE_SIZE <= i32::MAX as usize);

/// One handle table slot
#[derive(Default)]
pub enum Handle {
    /// Empty slot
    #[default]
    Invalid,
    /// A process
    Process(Obj<Process>),
    /// A thread
    Thread(Obj<Thread>),
    /// Read side of a named event
    ReadableEvent(Obj<ReadableEvent>),
    /// Write side of a named event
    WritableEvent(Obj<WritableEvent>),
    /// Client side of a port
    ClientPort(Obj<ClientPort>),
    /// Server side of a port
    ServerPort(Obj<ServerPort>),
    /// Client end of a connection
    ClientConnection(Obj<Connection>),
    /// Server end of a connection
    ServerConnection(Obj<Connection>),
}

/// Discriminant of a [`Handle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// Empty slot
    Invalid,
    /// A process
    Process,
    /// A thread
    Thread,
    /// Read side of a named event
    ReadableEvent,
    /// Write side of a named event
    WritableEvent,
    /// Client side of a port
    ClientPort,
    /// Server side of a port
    ServerPort,
    /// Client end of a connection
    ClientConnection,
    /// Server end of a connection
    ServerConnection,
}

impl Handle {
    /// Which kind of object the handle names
    pub fn kind(&self) -> HandleKind {
        match self {
            Handle::Invalid => HandleKind::Invalid,
            Handle::Process(_) => HandleKind::Process,
            Handle::Thread(_) => HandleKind::Thread,
            Handle::ReadableEvent(_) => HandleKind::ReadableEvent,
            Handle::WritableEvent(_) => HandleKind::WritableEvent,
            Handle::ClientPort(_) => HandleKind::ClientPort,
            Handle::ServerPort(_) => HandleKind::ServerPort,
            Handle::ClientConnection(_) => HandleKind::ClientConnection,
            Handle::ServerConnection(_) => HandleKind::ServerConnection,
        }
    }

    /// Anything but `Invalid`
    pub fn is_valid(&self) -> bool {
        !matches!(self, Handle::Invalid)
    }

    /// Run the close semantics of the handle's side, then drop the reference
    pub fn close(self) {
        match &self {
            Handle::ClientPort(port) => port.close(),
            Handle::ServerPort(port) => port.close(),
            Handle::ClientConnection(connection) => connection.close_client_handler(),
            Handle::ServerConnection(connection) => connection.close_server_handler(),
            _ => {}
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.kind(), f)
    }
}

macro_rules! typed_getter {
    ($(#[$doc:meta])* $name:ident, $variant:ident, $ty:ty) => {
        $(#[$doc])*
        pub fn $name(&self, index: usize) -> KernelResult<&Obj<$ty>> {
            match self.get(index) {
                Some(Handle::$variant(object)) => Ok(object),
                _ => Err(KernelError::InvalidHandle),
            }
        }
    };
}

/// Fixed-capacity capability table
pub struct HandleTable {
    slots: [Handle; HANDLE_TABLE_SIZE],
}

impl HandleTable {
    /// An empty table
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| Handle::Invalid),
        }
    }

    /// Store `handle` in the first free slot. `None` when the table is full
    /// or the handle is `Invalid`.
    pub fn create(&mut self, handle: Handle) -> Option<usize> {
        if !handle.is_valid() {
            return None;
        }
        let index = self.slots.iter().position(|slot| !slot.is_valid())?;
        self.slots[index] = handle;
        Some(index)
    }

    /// The handle at `index`, if in range and valid
    pub fn get(&self, index: usize) -> Option<&Handle> {
        self.slots.get(index).filter(|slot| slot.is_valid())
    }

    typed_getter!(
        /// Readable event at `index`
        readable_event, ReadableEvent, ReadableEvent
    );
    typed_getter!(
        /// Writable event at `index`
        writable_event, WritableEvent, WritableEvent
    );
    typed_getter!(
        /// Server port at `index`
        server_port, ServerPort, ServerPort
    );
    typed_getter!(
        /// Client port at `index`
        client_port, ClientPort, ClientPort
    );
    typed_getter!(
        /// Thread at `index`
        thread, Thread, Thread
    );
    typed_getter!(
        /// Process at `index`
        process, Process, Process
    );

    /// Empty the slot at `index` and hand its handle to the caller without
    /// running close semantics
    pub fn take(&mut self, index: usize) -> KernelResult<Handle> {
        match self.slots.get_mut(index) {
            Some(slot) if slot.is_valid() => Ok(core::mem::take(slot)),
            _ => Err(KernelError::InvalidHandle),
        }
    }

    /// Close the handle at `index` and mark the slot invalid
    pub fn release(&mut self, index: usize) -> KernelResult<()> {
        self.take(index)?.close();
        Ok(())
    }

    /// Empty every slot, returning the handles for closing outside any lock
    pub fn take_all(&mut self) -> Vec<Handle> {
        self.slots
            .iter_mut()
            .filter(|slot| slot.is_valid())
            .map(core::mem::take)
            .collect()
    }

    /// Close every handle. Returns how many were open.
    pub fn close_all(&mut self) -> usize {
        let handles = self.take_all();
        let count = handles.len();
        handles.into_iter().for_each(Handle::close);
        count
    }

    /// Valid slots
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_valid()).count()
    }

    /// No valid slot?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots `create` can still fill
    pub fn free_slots(&self) -> usize {
        HANDLE_TABLE_SIZE - self.len()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.slots
                    .iter()
                    .enumerate()
                    .filter(|(_, slot)| slot.is_valid())
                    .map(|(index, slot)| (index, slot.kind())),
            )
            .finish()
    }
}
