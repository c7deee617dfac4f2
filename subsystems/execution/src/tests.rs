//! End-to-end scenarios over a hosted kernel

use crate::handle::Handle;
use crate::ipc::{CloseState, Connection, EventStatus, Port};
use crate::process::lock_thread_and_process;
use crate::sync::Lockable;
use crate::{
    KernelConfig, KernelContext, KernelError, Obj, Priority, ProcessId, ProcessState,
    ThreadState,
};
use alloc::collections::BTreeSet;
use alloc::vec::Vec;
use pantheon_hal::hosted;
use pantheon_hal::VirtAddr;
use std::sync::Arc;

fn kernel(config: KernelConfig) -> KernelContext {
    let (platform, _, _) = hosted::platform(256);
    let kernel = KernelContext::new(config, platform).expect("kernel");
    kernel.start();
    kernel
}

fn spawn(kernel: &KernelContext, name: &str, priority: Priority) -> Obj<crate::Process> {
    kernel
        .scheduler()
        .create_process(name, VirtAddr::new(0x40_0000), priority)
        .expect("process")
}

#[test]
fn ids_are_unique_across_cores_and_never_zero() {
    let kernel = Arc::new(kernel(KernelConfig::new(1)));
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let kernel = kernel.clone();
            std::thread::spawn(move || {
                (0..250)
                    .map(|_| kernel.scheduler().acquire_process_id())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = BTreeSet::new();
    for worker in workers {
        for pid in worker.join().expect("worker") {
            assert_ne!(pid, ProcessId::IDLE);
            assert!(seen.insert(pid), "{} handed out twice", pid);
        }
    }
    assert_eq!(seen.len(), 1000);
}

#[test]
fn round_robin_gives_every_process_the_same_share() {
    let kernel = kernel(KernelConfig::small());
    let pids: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|name| spawn(&kernel, name, Priority::Normal).id())
        .collect();
    let core = kernel.core(0).expect("core 0");

    let mut turns = [0usize; 3];
    for _ in 0..30 {
        assert!(core.yield_current(kernel.scheduler()));
        let owner = core.current_thread().owner_pid();
        let slot = pids.iter().position(|pid| *pid == owner).expect("known pid");
        turns[slot] += 1;
    }
    assert_eq!(turns, [10, 10, 10]);
}

#[test]
fn every_thread_of_a_process_gets_a_turn() {
    let kernel = kernel(KernelConfig::small());
    let a = spawn(&kernel, "a", Priority::Normal);
    let second = kernel
        .scheduler()
        .create_thread(&a, VirtAddr::new(0x40_1000), Priority::Normal)
        .expect("second thread");
    let b = spawn(&kernel, "b", Priority::Normal);
    let first = a.guard().threads()[0].clone();
    let only_b = b.guard().threads()[0].clone();
    let core = kernel.core(0).expect("core 0");

    let mut turns = [0usize; 3];
    for _ in 0..20 {
        assert!(core.yield_current(kernel.scheduler()));
        let id = core.current_thread().id();
        let slot = [first.id(), second.id(), only_b.id()]
            .iter()
            .position(|known| *known == id)
            .expect("known thread");
        turns[slot] += 1;
    }
    assert!(turns[0] > 0 && turns[1] > 0, "turns {:?}", turns);
    assert_eq!(turns[0] + turns[1], turns[2]);
}

fn ticks_until_preempted(priority: Priority) -> u64 {
    let kernel = kernel(KernelConfig::small());
    spawn(&kernel, "spin", priority);
    let core = kernel.core(0).expect("core 0");
    core.reschedule(kernel.scheduler(), crate::context::SwitchReason::Preemption);

    let mut ticks = 0;
    while !core.reschedule_pending() {
        core.timer_tick();
        ticks += 1;
    }
    ticks
}

#[test]
fn tick_budget_scales_with_priority() {
    let low = ticks_until_preempted(Priority::VeryLow);
    let high = ticks_until_preempted(Priority::VeryHigh);
    assert_eq!(low, 3);
    assert_eq!(high, 15);
    assert_eq!(high, 5 * low);
}

#[test]
fn two_cores_never_run_the_same_thread() {
    let kernel = kernel(KernelConfig {
        cpu_count: 2,
        ..KernelConfig::small()
    });
    spawn(&kernel, "a", Priority::Normal);
    spawn(&kernel, "b", Priority::Normal);

    let first = kernel.core(0).expect("core 0");
    let second = kernel.core(1).expect("core 1");
    assert!(first.yield_current(kernel.scheduler()));
    assert!(second.yield_current(kernel.scheduler()));
    assert!(!Obj::ptr_eq(&first.current_thread(), &second.current_thread()));

    // Nothing else is runnable; both keep their threads.
    assert!(!first.yield_current(kernel.scheduler()));
    assert!(!second.yield_current(kernel.scheduler()));
}

#[test]
fn process_pool_exhaustion_recovers_after_reaping() {
    let kernel = kernel(KernelConfig::small());
    // The idle process holds one slot.
    let mut created: Vec<_> = (0..7)
        .map(|index| spawn(&kernel, if index % 2 == 0 { "even" } else { "odd" }, Priority::Low))
        .collect();
    assert_eq!(
        kernel
            .scheduler()
            .create_process("one too many", VirtAddr::new(0x1000), Priority::Low)
            .err(),
        Some(KernelError::OutOfMemory)
    );

    let victim = created.remove(0);
    kernel.scheduler().exit_process(&victim);
    drop(victim);
    assert_eq!(kernel.reap(), 1);

    spawn(&kernel, "replacement", Priority::Low);
    assert_eq!(kernel.scheduler().process_count(), 7);
}

#[test]
fn port_handles_carry_a_connection_end_to_end() {
    let kernel = kernel(KernelConfig::small());
    let server_process = spawn(&kernel, "server", Priority::Normal);
    let client_process = spawn(&kernel, "client", Priority::Normal);
    let ipc = kernel.ipc();

    let port = Port::initialize(&ipc.pools, "echo", 2).expect("port");
    ipc.ports.register(port.clone()).expect("register");
    let server_slot = server_process
        .guard()
        .handles_mut()
        .create(Handle::ServerPort(port.server().expect("server").clone()))
        .expect("server slot");

    let client = ipc.ports.lookup("echo").expect("lookup");
    let connection =
        Connection::connect(&ipc.pools, client.client().expect("client")).expect("connect");
    client_process
        .guard()
        .handles_mut()
        .create(Handle::ClientConnection(connection.clone()))
        .expect("client slot");

    let accepted = server_process
        .guard()
        .handles()
        .server_port(server_slot)
        .expect("server port")
        .accept()
        .expect("accept");
    assert!(Obj::ptr_eq(&accepted, &connection));

    server_process
        .guard()
        .handles_mut()
        .release(server_slot)
        .expect("release");
    assert_eq!(port.state(), CloseState::ClosedServer);
    assert_eq!(ipc.ports.prune(), 1);
    assert_eq!(
        Connection::connect(&ipc.pools, client.client().expect("client")).err(),
        Some(KernelError::PortClosed)
    );

    assert_eq!(client_process.guard().handles_mut().close_all(), 1);
    assert_eq!(connection.state(), CloseState::ClosedClient);
}

#[test]
fn named_event_round_trip_through_handles() {
    let kernel = kernel(KernelConfig::small());
    let owner = spawn(&kernel, "owner", Priority::Normal);
    let entry = kernel
        .ipc()
        .events
        .create_named_event("vsync", &owner)
        .expect("event");

    let (read, write) = {
        let mut guard = owner.guard();
        let table = guard.handles_mut();
        let read = table
            .create(Handle::ReadableEvent(entry.readable.clone()))
            .expect("read slot");
        let write = table
            .create(Handle::WritableEvent(entry.writable.clone()))
            .expect("write slot");
        (read, write)
    };

    let guard = owner.guard();
    let table = guard.handles();
    assert_eq!(table.readable_event(read).expect("read").poll(), EventStatus::Unsignaled);
    table.writable_event(write).expect("write").signal();
    assert_eq!(table.readable_event(read).expect("read").poll(), EventStatus::Signaled);
    table.readable_event(read).expect("read").clear();
    assert_eq!(entry.event.status(), EventStatus::Unsignaled);
    assert_eq!(table.readable_event(write).err(), Some(KernelError::InvalidHandle));
}

#[test]
fn thread_and_process_can_be_locked_together() {
    let kernel = kernel(KernelConfig::small());
    let process = spawn(&kernel, "pair", Priority::Normal);
    let thread = process.guard().threads()[0].clone();

    let slot = lock_thread_and_process(&thread, |locked_thread, locked_process| {
        assert!(locked_thread.is_locked());
        assert!(locked_process.is_locked());
        let main = locked_process.threads()[0].clone();
        locked_process.handles_mut().create(Handle::Thread(main))
    })
    .expect("owner alive")
    .expect("slot");

    assert!(!thread.is_locked());
    assert!(!process.is_locked());
    let guard = process.guard();
    assert!(Obj::ptr_eq(guard.handles().thread(slot).expect("thread"), &thread));
}

#[test]
fn exited_process_frees_its_pages_once_reaped() {
    let (platform, pages, _) = hosted::platform(64);
    let kernel = KernelContext::new(KernelConfig::small(), platform).expect("kernel");
    kernel.start();
    let baseline = pages.outstanding();

    let process = spawn(&kernel, "short", Priority::Normal);
    let core = kernel.core(0).expect("core 0");
    core.yield_current(kernel.scheduler());
    let thread = core.current_thread();
    assert_eq!(thread.state(), ThreadState::Running);

    kernel.scheduler().exit_thread(&thread);
    assert_eq!(process.state(), ProcessState::Zombie);
    core.reschedule(kernel.scheduler(), crate::context::SwitchReason::Exit);
    assert_eq!(thread.state(), ThreadState::Dead);
    drop(thread);

    assert_eq!(kernel.reap(), 1);
    assert_eq!(process.state(), ProcessState::Terminated);
    drop(process);
    assert_eq!(pages.outstanding(), baseline);
}

#[test]
#[should_panic(expected = "without holding its lock")]
fn changing_thread_state_unlocked_is_a_stop_error() {
    let kernel = kernel(KernelConfig::small());
    let process = spawn(&kernel, "careless", Priority::Normal);
    let thread = process.guard().threads()[0].clone();
    thread.set_state(ThreadState::Running);
}
