//! # Syscall Interface
//!
//! Syscalls are dispatched by number through a fixed table of handlers.
//! Each handler reads its arguments from the [`TrapFrame`] and returns
//! either up to two output values or a [`KernelError`]; the dispatcher
//! writes the matching [`ResultCode`] to x0 and the outputs to x1 and x2.
//!
//! ## Syscall Categories
//! - Process and thread lifetime (exit, create thread, execute, yield)
//! - Named events (create, signal, clear, reset, poll)
//! - Ports and connections (create, connect, accept)
//! - Handles (close)
//!
//! Handle-table access follows the syscall entry pattern: lock the calling
//! thread, then its process, via [`lock_thread_and_process`].

use crate::program::ProgramLoader;
use crate::trap::{TrapFrame, OUTPUT_REGISTERS};
use arrayvec::{ArrayString, ArrayVec};
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use pantheon_execution::context::SwitchReason;
use pantheon_execution::handle::{Handle, HandleTable};
use pantheon_execution::ipc::{Connection, EventStatus, Port};
use pantheon_execution::process::lock_thread_and_process;
use pantheon_execution::{
    KernelContext, KernelError, KernelResult, Obj, Priority, Process, Scheduler, Thread,
};
use pantheon_hal::mmu::UserMemory;
use pantheon_hal::{VirtAddr, HIGHER_HALF_BASE};

/// Longest string a syscall accepts, without the NUL
pub const MAX_USER_STRING: usize = 255;

/// A string copied in from user memory
pub type UserString = ArrayString<MAX_USER_STRING>;

/// Syscall numbers
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    /// Terminate the calling process
    ExitProcess = 0,
    /// Duplicate the calling process (not supported)
    ForkProcess = 1,
    /// Write a string to the kernel log
    LogText = 2,
    /// Map a buffer (not supported)
    AllocateBuffer = 3,
    /// Start another thread in the calling process
    CreateThread = 4,
    /// Create or open a named event
    CreateNamedEvent = 5,
    /// Signal an event
    SignalEvent = 6,
    /// Clear an event through its read side
    ClearEvent = 7,
    /// Reset an event through its write side
    ResetEvent = 8,
    /// Read an event's status
    PollEvent = 9,
    /// Give up the core
    Yield = 10,
    /// Terminate the calling thread
    ExitThread = 11,
    /// Start a program by name
    Execute = 12,
    /// Create and register a named port
    CreatePort = 13,
    /// Connect to a registered port
    ConnectToNamedPort = 14,
    /// Take a pending connection off a server port
    AcceptConnection = 15,
    /// Close a handle
    CloseHandle = 16,
}

impl Syscall {
    /// Number of syscalls
    pub const COUNT: usize = 17;

    /// Every syscall, by number
    pub const ALL: [Syscall; Self::COUNT] = [
        Syscall::ExitProcess,
        Syscall::ForkProcess,
        Syscall::LogText,
        Syscall::AllocateBuffer,
        Syscall::CreateThread,
        Syscall::CreateNamedEvent,
        Syscall::SignalEvent,
        Syscall::ClearEvent,
        Syscall::ResetEvent,
        Syscall::PollEvent,
        Syscall::Yield,
        Syscall::ExitThread,
        Syscall::Execute,
        Syscall::CreatePort,
        Syscall::ConnectToNamedPort,
        Syscall::AcceptConnection,
        Syscall::CloseHandle,
    ];

    /// Convert from number
    pub fn from_num(num: u64) -> Option<Self> {
        usize::try_from(num)
            .ok()
            .and_then(|index| Self::ALL.get(index))
            .copied()
    }
}

/// Result codes returned in x0
#[repr(i64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    /// `SYS_OK`
    Ok = 0,
    /// `SYS_FAIL`
    Fail = -1,
    /// `SYS_OOM`
    OutOfMemory = -2,
    /// `KERN_PORT_CLOSED`
    PortClosed = -3,
    /// `KERN_INVALID_HANDLE`
    InvalidHandle = -4,
    /// `KERN_PORT_FULL`
    PortFull = -5,
    /// `KERN_BAD_ADDRESS`
    BadAddress = -6,
    /// `KERN_NOT_FOUND`
    NotFound = -7,
}

impl ResultCode {
    /// Value written to x0
    pub const fn as_raw(self) -> i64 {
        self as i64
    }
}

impl From<KernelError> for ResultCode {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::OutOfMemory => ResultCode::OutOfMemory,
            KernelError::PortClosed => ResultCode::PortClosed,
            KernelError::InvalidHandle => ResultCode::InvalidHandle,
            KernelError::PortFull => ResultCode::PortFull,
            KernelError::BadAddress => ResultCode::BadAddress,
            KernelError::NotFound => ResultCode::NotFound,
            KernelError::HandleTableFull
            | KernelError::InvalidState
            | KernelError::InvalidArgument
            | KernelError::AlreadyExists
            | KernelError::NotSupported => ResultCode::Fail,
        }
    }
}

/// Values written to x1 and x2 on success
pub type SyscallOutput = ArrayVec<u64, OUTPUT_REGISTERS>;

/// Syscall result type
pub type SyscallResult = KernelResult<SyscallOutput>;

/// Syscall handler function type
pub type SyscallHandler = fn(&SyscallContext<'_>, &TrapFrame) -> SyscallResult;

fn done() -> SyscallResult {
    Ok(SyscallOutput::new())
}

fn one(value: u64) -> SyscallResult {
    let mut output = SyscallOutput::new();
    output.push(value);
    Ok(output)
}

fn two(first: u64, second: u64) -> SyscallResult {
    Ok(SyscallOutput::from([first, second]))
}

/// Reject null and kernel-half pointers
pub fn user_address(raw: u64) -> KernelResult<VirtAddr> {
    if raw == 0 || raw >= HIGHER_HALF_BASE {
        return Err(KernelError::BadAddress);
    }
    Ok(VirtAddr::new(raw))
}

fn handle_index(raw: u64) -> KernelResult<usize> {
    usize::try_from(raw).map_err(|_| KernelError::InvalidHandle)
}

/// What a handler may touch: the kernel, the core it runs on, the caller's
/// memory and the program catalogue.
pub struct SyscallContext<'a> {
    kernel: &'a KernelContext,
    core: &'a Scheduler,
    memory: &'a dyn UserMemory,
    programs: &'a dyn ProgramLoader,
}

impl<'a> SyscallContext<'a> {
    /// Context for a syscall trapped on `core`
    pub fn new(
        kernel: &'a KernelContext,
        core: &'a Scheduler,
        memory: &'a dyn UserMemory,
        programs: &'a dyn ProgramLoader,
    ) -> Self {
        Self {
            kernel,
            core,
            memory,
            programs,
        }
    }

    /// The kernel
    pub fn kernel(&self) -> &KernelContext {
        self.kernel
    }

    /// Scheduler of the trapping core
    pub fn core(&self) -> &Scheduler {
        self.core
    }

    /// The calling thread
    pub fn thread(&self) -> Obj<Thread> {
        self.core.current_thread()
    }

    /// The calling process. The idle process never makes syscalls.
    pub fn process(&self) -> KernelResult<Obj<Process>> {
        let process = self.thread().owner().ok_or(KernelError::InvalidState)?;
        if process.is_idle() {
            return Err(KernelError::InvalidState);
        }
        Ok(process)
    }

    /// Copy a NUL-terminated UTF-8 string from the caller's address space
    pub fn read_string(&self, raw: u64) -> KernelResult<UserString> {
        let addr = user_address(raw)?;
        let root = self.process()?.root_table().ok_or(KernelError::BadAddress)?;

        let mut bytes = ArrayVec::<u8, MAX_USER_STRING>::new();
        loop {
            let at = addr.add(bytes.len() as u64);
            if at.is_higher_half() {
                return Err(KernelError::BadAddress);
            }
            let mut byte = [0u8];
            self.memory.copy_from_user(root, at, &mut byte)?;
            if byte[0] == 0 {
                break;
            }
            bytes
                .try_push(byte[0])
                .map_err(|_| KernelError::InvalidArgument)?;
        }
        let text = core::str::from_utf8(&bytes).map_err(|_| KernelError::InvalidArgument)?;
        UserString::from(text).map_err(|_| KernelError::InvalidArgument)
    }

    /// Run `f` on the caller's handle table, holding the thread and process
    /// locks.
    pub fn with_handles<R>(
        &self,
        f: impl FnOnce(&mut HandleTable) -> KernelResult<R>,
    ) -> KernelResult<R> {
        let thread = self.thread();
        lock_thread_and_process(&thread, |_, process| f(process.handles_mut()))?
    }

    fn insert_handle(&self, handle: Handle) -> KernelResult<usize> {
        self.with_handles(|table| table.create(handle).ok_or(KernelError::HandleTableFull))
    }
}

impl fmt::Debug for SyscallContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyscallContext")
            .field("core", &self.core.core())
            .finish_non_exhaustive()
    }
}

/// The syscall table
pub struct SyscallTable {
    handlers: [SyscallHandler; Syscall::COUNT],
    calls: [AtomicU64; Syscall::COUNT],
    rejected: AtomicU64,
}

impl SyscallTable {
    /// Table with every handler installed
    pub const fn new() -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        Self {
            handlers: [
                sys_exit_process,
                sys_fork_process,
                sys_log_text,
                sys_allocate_buffer,
                sys_create_thread,
                sys_create_named_event,
                sys_signal_event,
                sys_clear_event,
                sys_reset_event,
                sys_poll_event,
                sys_yield,
                sys_exit_thread,
                sys_execute,
                sys_create_port,
                sys_connect_to_named_port,
                sys_accept_connection,
                sys_close_handle,
            ],
            calls: [ZERO; Syscall::COUNT],
            rejected: ZERO,
        }
    }

    /// Handle the syscall in `frame`, write its result back, then act on
    /// any pending reschedule.
    pub fn dispatch(&self, ctx: &SyscallContext<'_>, frame: &mut TrapFrame) {
        let number = frame.syscall_number();
        let result = match Syscall::from_num(number) {
            Some(syscall) => {
                self.calls[syscall as usize].fetch_add(1, Ordering::Relaxed);
                (self.handlers[syscall as usize])(ctx, frame)
            }
            None => {
                log::warn!("unknown syscall {}", number);
                Err(KernelError::NotSupported)
            }
        };

        match result {
            Ok(outputs) => {
                frame.set_result(ResultCode::Ok.as_raw());
                for (index, value) in outputs.iter().enumerate() {
                    frame.set_output(index, *value);
                }
            }
            Err(err) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                log::debug!("syscall {} on core {}: {}", number, ctx.core.core(), err);
                frame.set_result(ResultCode::from(err).as_raw());
            }
        }

        ctx.core.maybe_reschedule(ctx.kernel.scheduler());
    }

    /// Times `syscall` was dispatched
    pub fn calls(&self, syscall: Syscall) -> u64 {
        self.calls[syscall as usize].load(Ordering::Relaxed)
    }

    /// Syscalls that returned an error, unknown numbers included
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

impl Default for SyscallTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SyscallTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyscallTable")
            .field("rejected", &self.rejected())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Syscall Implementations
// ============================================================================

fn sys_exit_process(ctx: &SyscallContext<'_>, _frame: &TrapFrame) -> SyscallResult {
    let process = ctx.process()?;
    log::info!("{} '{}' exiting", process.id(), process.command());
    ctx.kernel.scheduler().exit_process(&process);
    drop(process);
    ctx.core.reschedule(ctx.kernel.scheduler(), SwitchReason::Exit);
    done()
}

fn sys_fork_process(ctx: &SyscallContext<'_>, _frame: &TrapFrame) -> SyscallResult {
    log::warn!("ForkProcess from {} is not supported", ctx.thread().owner_pid());
    Err(KernelError::NotSupported)
}

fn sys_log_text(ctx: &SyscallContext<'_>, frame: &TrapFrame) -> SyscallResult {
    let text = ctx.read_string(frame.get_int_argument(0))?;
    let process = ctx.process()?;
    log::info!("[{} {}] {}", process.id(), process.command(), text);
    done()
}

fn sys_allocate_buffer(_ctx: &SyscallContext<'_>, frame: &TrapFrame) -> SyscallResult {
    log::warn!(
        "AllocateBuffer of {} bytes is not supported",
        frame.get_int_argument(0)
    );
    Err(KernelError::NotSupported)
}

fn sys_create_thread(ctx: &SyscallContext<'_>, frame: &TrapFrame) -> SyscallResult {
    let entry = user_address(frame.get_int_argument(0))?;
    let priority = u8::try_from(frame.get_int_argument(1))
        .ok()
        .and_then(Priority::from_u8)
        .ok_or(KernelError::InvalidArgument)?;
    let process = ctx.process()?;
    let thread = ctx
        .kernel
        .scheduler()
        .create_thread(&process, entry, priority)?;
    one(thread.id().as_u64())
}

/// Open the event called `name`, creating it first if needed, and hand the
/// caller one handle per side.
///
/// Both slots are checked under the process lock before the name is touched,
/// so a newly registered event is never unregistered again.
fn sys_create_named_event(ctx: &SyscallContext<'_>, frame: &TrapFrame) -> SyscallResult {
    let name = ctx.read_string(frame.get_int_argument(0))?;
    let process = ctx.process()?;
    let events = &ctx.kernel.ipc().events;
    let (readable, writable) = ctx.with_handles(|table| {
        if table.free_slots() < 2 {
            return Err(KernelError::HandleTableFull);
        }
        let entry = match events.create_named_event(&name, &process) {
            Err(KernelError::AlreadyExists) => {
                events.lookup_event(&name).ok_or(KernelError::NotFound)?
            }
            result => result?,
        };
        let readable = table
            .create(Handle::ReadableEvent(entry.readable.clone()))
            .ok_or(KernelError::HandleTableFull)?;
        let writable = table
            .create(Handle::WritableEvent(entry.writable.clone()))
            .ok_or(KernelError::HandleTableFull)?;
        Ok((readable, writable))
    })?;
    drop(process);
    two(readable as u64, writable as u64)
}

fn sys_signal_event(ctx: &SyscallContext<'_>, frame: &TrapFrame) -> SyscallResult {
    let index = handle_index(frame.get_int_argument(0))?;
    ctx.with_handles(|table| {
        table.writable_event(index)?.signal();
        Ok(())
    })?;
    done()
}

fn sys_clear_event(ctx: &SyscallContext<'_>, frame: &TrapFrame) -> SyscallResult {
    let index = handle_index(frame.get_int_argument(0))?;
    ctx.with_handles(|table| {
        table.readable_event(index)?.clear();
        Ok(())
    })?;
    done()
}

fn sys_reset_event(ctx: &SyscallContext<'_>, frame: &TrapFrame) -> SyscallResult {
    let index = handle_index(frame.get_int_argument(0))?;
    ctx.with_handles(|table| {
        table.writable_event(index)?.reset();
        Ok(())
    })?;
    done()
}

fn sys_poll_event(ctx: &SyscallContext<'_>, frame: &TrapFrame) -> SyscallResult {
    let index = handle_index(frame.get_int_argument(0))?;
    let status = ctx.with_handles(|table| Ok(table.readable_event(index)?.poll()))?;
    one(u64::from(status == EventStatus::Signaled))
}

fn sys_yield(ctx: &SyscallContext<'_>, _frame: &TrapFrame) -> SyscallResult {
    ctx.core.yield_current(ctx.kernel.scheduler());
    done()
}

fn sys_exit_thread(ctx: &SyscallContext<'_>, _frame: &TrapFrame) -> SyscallResult {
    ctx.process()?;
    ctx.kernel.scheduler().exit_thread(&ctx.thread());
    ctx.core.reschedule(ctx.kernel.scheduler(), SwitchReason::Exit);
    done()
}

fn sys_execute(ctx: &SyscallContext<'_>, frame: &TrapFrame) -> SyscallResult {
    let name = ctx.read_string(frame.get_int_argument(0))?;
    let image = ctx.programs.resolve(&name).ok_or(KernelError::NotFound)?;
    let process = ctx.kernel.scheduler().create_process(
        &image.name,
        image.entry_point,
        image.priority,
    )?;
    one(process.id().as_u64())
}

fn sys_create_port(ctx: &SyscallContext<'_>, frame: &TrapFrame) -> SyscallResult {
    let name = ctx.read_string(frame.get_int_argument(0))?;
    let max_connections =
        usize::try_from(frame.get_int_argument(1)).map_err(|_| KernelError::InvalidArgument)?;
    let ipc = ctx.kernel.ipc();

    let port = Port::initialize(&ipc.pools, &name, max_connections)?;
    ipc.ports.register(port.clone())?;
    let server = port.server().ok_or(KernelError::InvalidState)?.clone();
    match ctx.insert_handle(Handle::ServerPort(server)) {
        Ok(index) => one(index as u64),
        Err(err) => {
            port.close_server_handler();
            drop(ipc.ports.remove(&name));
            Err(err)
        }
    }
}

fn sys_connect_to_named_port(ctx: &SyscallContext<'_>, frame: &TrapFrame) -> SyscallResult {
    let name = ctx.read_string(frame.get_int_argument(0))?;
    let ipc = ctx.kernel.ipc();
    let port = ipc.ports.lookup(&name).ok_or(KernelError::NotFound)?;
    let client = port.client().ok_or(KernelError::PortClosed)?;

    let connection = Connection::connect(&ipc.pools, client)?;
    match ctx.insert_handle(Handle::ClientConnection(connection.clone())) {
        Ok(index) => one(index as u64),
        Err(err) => {
            connection.close_client_handler();
            Err(err)
        }
    }
}

fn sys_accept_connection(ctx: &SyscallContext<'_>, frame: &TrapFrame) -> SyscallResult {
    let index = handle_index(frame.get_int_argument(0))?;
    let accepted = ctx.with_handles(|table| {
        let connection = table.server_port(index)?.accept()?;
        match table.create(Handle::ServerConnection(connection.clone())) {
            Some(slot) => Ok(slot),
            None => {
                connection.close_server_handler();
                Err(KernelError::HandleTableFull)
            }
        }
    })?;
    one(accepted as u64)
}

fn sys_close_handle(ctx: &SyscallContext<'_>, frame: &TrapFrame) -> SyscallResult {
    let index = handle_index(frame.get_int_argument(0))?;
    let handle = ctx.with_handles(|table| table.take(index))?;
    log::debug!("{} closing {:?} handle {}", ctx.thread().owner_pid(), handle, index);
    handle.close();
    done()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::ProgramTable;
    use pantheon_execution::sync::Lockable;
    use pantheon_execution::{KernelConfig, ProcessState, ThreadState};
    use pantheon_hal::hosted::{self, HostMemory};

    const TEXT: u64 = 0x10_0000;

    struct Harness {
        kernel: KernelContext,
        memory: HostMemory,
        programs: ProgramTable,
        table: SyscallTable,
        init: Obj<Process>,
    }

    impl Harness {
        fn new() -> Self {
            let (platform, _, _) = hosted::platform(256);
            let kernel = KernelContext::new(KernelConfig::small(), platform).expect("kernel");
            kernel.start();
            let init = kernel
                .scheduler()
                .create_process("init", VirtAddr::new(0x40_0000), Priority::Normal)
                .expect("init");
            kernel
                .core(0)
                .expect("core 0")
                .yield_current(kernel.scheduler());

            let mut programs = ProgramTable::new();
            programs
                .register("hello", VirtAddr::new(0x80_0000), Priority::High)
                .expect("program");
            Self {
                kernel,
                memory: HostMemory::new(),
                programs,
                table: SyscallTable::new(),
                init,
            }
        }

        fn core(&self) -> &Scheduler {
            self.kernel.core(0).expect("core 0")
        }

        fn call(&self, syscall: Syscall, args: &[u64]) -> TrapFrame {
            self.raw_call(syscall as u64, args)
        }

        fn raw_call(&self, number: u64, args: &[u64]) -> TrapFrame {
            let ctx = SyscallContext::new(&self.kernel, self.core(), &self.memory, &self.programs);
            let mut frame = TrapFrame::syscall(number, args);
            self.table.dispatch(&ctx, &mut frame);
            frame
        }

        /// Place `text` in init's address space at `addr`
        fn string(&self, addr: u64, text: &str) -> u64 {
            let root = self.init.root_table().expect("root table");
            self.memory.write_str(root, VirtAddr::new(addr), text);
            addr
        }
    }

    fn code(frame: &TrapFrame) -> ResultCode {
        match frame.result() {
            0 => ResultCode::Ok,
            -1 => ResultCode::Fail,
            -2 => ResultCode::OutOfMemory,
            -3 => ResultCode::PortClosed,
            -4 => ResultCode::InvalidHandle,
            -5 => ResultCode::PortFull,
            -6 => ResultCode::BadAddress,
            -7 => ResultCode::NotFound,
            other => panic!("unexpected result code {}", other),
        }
    }

    #[test]
    fn numbers_map_onto_the_table() {
        assert_eq!(Syscall::from_num(0), Some(Syscall::ExitProcess));
        assert_eq!(Syscall::from_num(12), Some(Syscall::Execute));
        assert_eq!(Syscall::from_num(16), Some(Syscall::CloseHandle));
        assert_eq!(Syscall::from_num(17), None);
        for (index, syscall) in Syscall::ALL.iter().enumerate() {
            assert_eq!(*syscall as usize, index);
        }
    }

    #[test]
    fn kernel_errors_map_to_result_codes() {
        assert_eq!(ResultCode::from(KernelError::PortClosed).as_raw(), -3);
        assert_eq!(ResultCode::from(KernelError::HandleTableFull), ResultCode::Fail);
        assert_eq!(ResultCode::from(KernelError::OutOfMemory).as_raw(), -2);
    }

    #[test]
    fn unknown_numbers_and_stubs_fail() {
        let harness = Harness::new();
        assert_eq!(code(&harness.raw_call(99, &[])), ResultCode::Fail);
        assert_eq!(code(&harness.call(Syscall::ForkProcess, &[])), ResultCode::Fail);
        assert_eq!(code(&harness.call(Syscall::AllocateBuffer, &[4096])), ResultCode::Fail);
        assert_eq!(harness.table.rejected(), 3);
    }

    #[test]
    fn log_text_validates_the_pointer() {
        let harness = Harness::new();
        let text = harness.string(TEXT, "hello from init");
        assert_eq!(code(&harness.call(Syscall::LogText, &[text])), ResultCode::Ok);
        assert_eq!(
            code(&harness.call(Syscall::LogText, &[0xFFFF_0000_0000_1000])),
            ResultCode::BadAddress
        );
        assert_eq!(
            code(&harness.call(Syscall::LogText, &[0x20_0000])),
            ResultCode::BadAddress
        );
        assert_eq!(code(&harness.call(Syscall::LogText, &[0])), ResultCode::BadAddress);
    }

    #[test]
    fn overlong_strings_are_rejected() {
        let harness = Harness::new();
        let long = "a".repeat(MAX_USER_STRING + 1);
        let text = harness.string(TEXT, &long);
        assert_eq!(code(&harness.call(Syscall::LogText, &[text])), ResultCode::Fail);

        let exact = "b".repeat(MAX_USER_STRING);
        let text = harness.string(TEXT + 0x1000, &exact);
        assert_eq!(code(&harness.call(Syscall::LogText, &[text])), ResultCode::Ok);
    }

    #[test]
    fn named_event_is_opened_when_it_exists() {
        let harness = Harness::new();
        let name = harness.string(TEXT, "vsync");
        let first = harness.call(Syscall::CreateNamedEvent, &[name]);
        let second = harness.call(Syscall::CreateNamedEvent, &[name]);
        assert_eq!(code(&first), ResultCode::Ok);
        assert_eq!(code(&second), ResultCode::Ok);
        assert_eq!(harness.kernel.ipc().events.len(), 1);

        let (read_a, write_a) = (first.output(0), first.output(1));
        let read_b = second.output(0);
        assert_eq!(harness.call(Syscall::PollEvent, &[read_b]).output(0), 0);

        harness.call(Syscall::SignalEvent, &[write_a]);
        assert_eq!(harness.call(Syscall::PollEvent, &[read_b]).output(0), 1);

        harness.call(Syscall::ClearEvent, &[read_b]);
        assert_eq!(harness.call(Syscall::PollEvent, &[read_a]).output(0), 0);

        harness.call(Syscall::SignalEvent, &[write_a]);
        harness.call(Syscall::ResetEvent, &[write_a]);
        assert_eq!(harness.call(Syscall::PollEvent, &[read_a]).output(0), 0);
        assert_eq!(harness.table.calls(Syscall::PollEvent), 4);
    }

    #[test]
    fn event_operations_check_the_handle_kind() {
        let harness = Harness::new();
        let name = harness.string(TEXT, "kind");
        let frame = harness.call(Syscall::CreateNamedEvent, &[name]);
        let (read, write) = (frame.output(0), frame.output(1));
        assert_eq!(
            code(&harness.call(Syscall::PollEvent, &[write])),
            ResultCode::InvalidHandle
        );
        assert_eq!(
            code(&harness.call(Syscall::SignalEvent, &[read])),
            ResultCode::InvalidHandle
        );
        assert_eq!(
            code(&harness.call(Syscall::ClearEvent, &[63])),
            ResultCode::InvalidHandle
        );
        assert_eq!(
            code(&harness.call(Syscall::ResetEvent, &[u64::MAX])),
            ResultCode::InvalidHandle
        );
    }

    #[test]
    fn full_handle_table_registers_no_event() {
        let harness = Harness::new();
        let thread = harness.init.guard().threads()[0].clone();
        for _ in 0..63 {
            harness
                .init
                .guard()
                .handles_mut()
                .create(Handle::Thread(thread.clone()))
                .expect("slot");
        }

        let name = harness.string(TEXT, "late");
        assert_eq!(
            code(&harness.call(Syscall::CreateNamedEvent, &[name])),
            ResultCode::Fail
        );
        assert!(harness.kernel.ipc().events.is_empty());
        assert_eq!(harness.kernel.ipc().events.live_events(), 0);
        assert_eq!(harness.init.guard().handles().len(), 63);
    }

    #[test]
    fn failed_open_keeps_the_shared_event_registered() {
        let harness = Harness::new();
        let name = harness.string(TEXT, "shared");
        let first = harness.call(Syscall::CreateNamedEvent, &[name]);
        assert_eq!(code(&first), ResultCode::Ok);
        let (read, write) = (first.output(0), first.output(1));
        let registered = harness
            .kernel
            .ipc()
            .events
            .lookup_event("shared")
            .expect("registered");

        let thread = harness.init.guard().threads()[0].clone();
        while harness.init.guard().handles().free_slots() > 1 {
            harness
                .init
                .guard()
                .handles_mut()
                .create(Handle::Thread(thread.clone()))
                .expect("slot");
        }
        assert_eq!(
            code(&harness.call(Syscall::CreateNamedEvent, &[name])),
            ResultCode::Fail
        );

        let still = harness
            .kernel
            .ipc()
            .events
            .lookup_event("shared")
            .expect("still registered");
        assert!(Obj::ptr_eq(&still.event, &registered.event));
        harness.call(Syscall::SignalEvent, &[write]);
        assert_eq!(harness.call(Syscall::PollEvent, &[read]).output(0), 1);
    }

    #[test]
    fn port_connect_and_accept() {
        let harness = Harness::new();
        let name = harness.string(TEXT, "echo");
        let created = harness.call(Syscall::CreatePort, &[name, 1]);
        assert_eq!(code(&created), ResultCode::Ok);
        let server = created.output(0);

        let connected = harness.call(Syscall::ConnectToNamedPort, &[name]);
        assert_eq!(code(&connected), ResultCode::Ok);
        assert_eq!(
            code(&harness.call(Syscall::ConnectToNamedPort, &[name])),
            ResultCode::PortFull
        );

        let accepted = harness.call(Syscall::AcceptConnection, &[server]);
        assert_eq!(code(&accepted), ResultCode::Ok);
        assert_ne!(accepted.output(0), connected.output(0));
        assert_eq!(
            code(&harness.call(Syscall::AcceptConnection, &[server])),
            ResultCode::NotFound
        );
        assert_eq!(
            code(&harness.call(Syscall::AcceptConnection, &[connected.output(0)])),
            ResultCode::InvalidHandle
        );
    }

    #[test]
    fn duplicate_and_unknown_port_names() {
        let harness = Harness::new();
        let name = harness.string(TEXT, "svc");
        assert_eq!(code(&harness.call(Syscall::CreatePort, &[name, 2])), ResultCode::Ok);
        assert_eq!(code(&harness.call(Syscall::CreatePort, &[name, 2])), ResultCode::Fail);
        assert_eq!(code(&harness.call(Syscall::CreatePort, &[name, 0])), ResultCode::Fail);

        let missing = harness.string(TEXT + 0x100, "nobody");
        assert_eq!(
            code(&harness.call(Syscall::ConnectToNamedPort, &[missing])),
            ResultCode::NotFound
        );
    }

    #[test]
    fn closing_the_server_handle_closes_the_port() {
        let harness = Harness::new();
        let name = harness.string(TEXT, "gone");
        let server = harness.call(Syscall::CreatePort, &[name, 2]).output(0);
        assert_eq!(code(&harness.call(Syscall::CloseHandle, &[server])), ResultCode::Ok);
        assert_eq!(
            code(&harness.call(Syscall::ConnectToNamedPort, &[name])),
            ResultCode::PortClosed
        );
        assert_eq!(
            code(&harness.call(Syscall::CloseHandle, &[server])),
            ResultCode::InvalidHandle
        );
    }

    #[test]
    fn execute_starts_a_registered_program() {
        let harness = Harness::new();
        let name = harness.string(TEXT, "hello");
        let frame = harness.call(Syscall::Execute, &[name]);
        assert_eq!(code(&frame), ResultCode::Ok);

        let pid = pantheon_execution::ProcessId::new(frame.output(0));
        let process = harness.kernel.scheduler().find_process(pid).expect("started");
        assert_eq!(process.command(), "hello");
        assert_eq!(process.priority(), Priority::High);

        let missing = harness.string(TEXT + 0x100, "missing");
        assert_eq!(code(&harness.call(Syscall::Execute, &[missing])), ResultCode::NotFound);
    }

    #[test]
    fn create_thread_adds_a_runnable_thread() {
        let harness = Harness::new();
        let frame = harness.call(Syscall::CreateThread, &[0x41_0000, Priority::Low.as_u8() as u64]);
        assert_eq!(code(&frame), ResultCode::Ok);

        let guard = harness.init.guard();
        let threads = guard.threads();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[1].id().as_u64(), frame.output(0));
        assert_eq!(threads[1].state(), ThreadState::Waiting);
        drop(guard);

        assert_eq!(
            code(&harness.call(Syscall::CreateThread, &[0x41_0000, 9])),
            ResultCode::Fail
        );
        assert_eq!(
            code(&harness.call(Syscall::CreateThread, &[HIGHER_HALF_BASE, 0])),
            ResultCode::BadAddress
        );
    }

    #[test]
    fn yield_hands_the_core_to_another_process() {
        let harness = Harness::new();
        let peer = harness
            .kernel
            .scheduler()
            .create_process("peer", VirtAddr::new(0x40_0000), Priority::Normal)
            .expect("peer");
        assert_eq!(harness.core().current_thread().owner_pid(), harness.init.id());
        assert_eq!(code(&harness.call(Syscall::Yield, &[])), ResultCode::Ok);
        assert_eq!(harness.core().current_thread().owner_pid(), peer.id());
    }

    #[test]
    fn exit_thread_retires_the_caller() {
        let harness = Harness::new();
        let caller = harness.core().current_thread();
        assert_eq!(code(&harness.call(Syscall::ExitThread, &[])), ResultCode::Ok);
        assert_eq!(caller.state(), ThreadState::Dead);
        assert_eq!(harness.init.state(), ProcessState::Zombie);
        assert!(harness.core().current_thread().is_idle());
    }

    #[test]
    fn exit_process_leaves_a_zombie_for_the_reaper() {
        let harness = Harness::new();
        assert_eq!(code(&harness.call(Syscall::ExitProcess, &[])), ResultCode::Ok);
        assert_eq!(harness.init.state(), ProcessState::Zombie);
        assert!(harness.core().current_thread().is_idle());
        assert_eq!(harness.kernel.reap(), 1);
        assert_eq!(harness.init.state(), ProcessState::Terminated);

        // The idle thread has no process to act for.
        assert_eq!(code(&harness.call(Syscall::ExitProcess, &[])), ResultCode::Fail);
    }
}
