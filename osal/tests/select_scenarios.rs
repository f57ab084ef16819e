//! Readiness multiplexing over the loopback stack

mod common;

use common::loopback;
use logger::LogLevel;
use osal::{CallerContext, FdSet, FileAccess, FileFlags, ObjectId, Osal, OsalError, StreamState, Timeout};
use kernel_api::{SocketDomain, SocketType};
use sim_kernel::fault_injection::{Fault, FaultPlan};
use sim_kernel::test_utils::kernel_with_faults;
use sim_kernel::SimulatedKernel;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn listener(osal: &Osal, port: u16) -> ObjectId {
    let id = osal
        .socket_open(CallerContext::ROOT, SocketDomain::Inet, SocketType::Stream)
        .expect("socket should open");
    osal.socket_bind(id, loopback(port)).expect("bind should succeed");
    id
}

/// Connects a new client and accepts it; returns (client, server side)
fn connected_pair(osal: &Osal, listener: ObjectId, port: u16) -> (ObjectId, ObjectId) {
    let client = osal
        .socket_open(CallerContext::ROOT, SocketDomain::Inet, SocketType::Stream)
        .expect("socket should open");
    osal.socket_connect(client, loopback(port), Timeout::Millis(500))
        .expect("connect should succeed");
    let (server, _) = osal
        .socket_accept(CallerContext::ROOT, listener, Timeout::Millis(500))
        .expect("accept should succeed");
    (client, server)
}

#[test]
fn test_listener_becomes_readable_on_connect() {
    let osal = common::osal();
    let listener = listener(&osal, 7300);

    let start = Instant::now();
    assert_eq!(
        osal.select_single(listener, StreamState::READABLE, Timeout::Millis(200)),
        Err(OsalError::Timeout)
    );
    assert!(start.elapsed() >= Duration::from_millis(150));

    let client = osal
        .socket_open(CallerContext::ROOT, SocketDomain::Inet, SocketType::Stream)
        .expect("socket should open");
    osal.socket_connect(client, loopback(7300), Timeout::Millis(500))
        .expect("connect should succeed");

    assert_eq!(
        osal.select_single(listener, StreamState::READABLE, Timeout::Millis(200)),
        Ok(StreamState::READABLE)
    );
}

#[test]
fn test_multi_read_reports_only_ready_stream() {
    let osal = common::osal();
    let listener = listener(&osal, 7301);
    let (client_a, server_a) = connected_pair(&osal, listener, 7301);
    let (_client_b, server_b) = connected_pair(&osal, listener, 7301);

    osal.stream_write(client_a, b"ping").expect("write should succeed");

    let mut read = FdSet::new();
    read.insert(server_a).expect("stream handle");
    read.insert(server_b).expect("stream handle");
    osal.select_multiple(Some(&mut read), None, Timeout::Millis(200))
        .expect("A has data");

    assert!(read.contains(server_a));
    assert!(!read.contains(server_b));
    assert_eq!(read.len(), 1);

    let mut buf = [0u8; 8];
    let n = osal.stream_read(server_a, &mut buf).expect("read should succeed");
    assert_eq!(&buf[..n], b"ping");
}

#[test]
fn test_read_and_write_outcomes_stay_in_their_own_sets() {
    let osal = common::osal();
    let listener = listener(&osal, 7302);
    let (_client, server) = connected_pair(&osal, listener, 7302);

    // Writable but idle: the read set must come back empty
    let mut read = FdSet::new();
    let mut write = FdSet::new();
    read.insert(server).expect("stream handle");
    write.insert(server).expect("stream handle");
    osal.select_multiple(Some(&mut read), Some(&mut write), Timeout::Millis(100))
        .expect("server side is writable");

    assert!(read.is_empty());
    assert!(write.contains(server));
}

#[test]
fn test_multi_wait_times_out_when_nothing_is_ready() {
    let osal = common::osal();
    let listener = listener(&osal, 7303);
    let (_client, server) = connected_pair(&osal, listener, 7303);

    let mut read = FdSet::new();
    read.insert(server).expect("stream handle");
    read.insert(listener).expect("stream handle");
    assert_eq!(
        osal.select_multiple(Some(&mut read), None, Timeout::Millis(50)),
        Err(OsalError::Timeout)
    );
    assert!(read.is_empty());
}

#[test]
fn test_empty_multi_wait_returns_at_once() {
    let osal = common::osal();
    let start = Instant::now();
    assert_eq!(osal.select_multiple(None, None, Timeout::Pend), Ok(()));

    let mut read = FdSet::new();
    let mut write = FdSet::new();
    assert_eq!(
        osal.select_multiple(Some(&mut read), Some(&mut write), Timeout::Pend),
        Ok(())
    );
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_stale_members_are_cleared() {
    let osal = common::osal();
    let listener = listener(&osal, 7304);
    let (client, server) = connected_pair(&osal, listener, 7304);
    osal.stream_write(client, b"x").expect("write should succeed");

    let mut read = FdSet::new();
    read.insert(server).expect("stream handle");
    read.insert(ObjectId::new(osal::ObjectKind::Stream, 1, 200))
        .expect("stream handle");
    osal.select_multiple(Some(&mut read), None, Timeout::Millis(100))
        .expect("server has data");
    assert_eq!(read.len(), 1);
    assert!(read.contains(server));
}

#[test]
fn test_files_are_always_ready() {
    let osal = common::osal();
    let dir = tempfile::tempdir().expect("temp dir");
    let file = osal
        .file_open(
            CallerContext::ROOT,
            dir.path().join("data.txt"),
            FileAccess::ReadWrite,
            FileFlags::CREATE,
        )
        .expect("file should open");
    let listener = listener(&osal, 7305);

    assert_eq!(
        osal.select_single(file, StreamState::READABLE | StreamState::WRITABLE, Timeout::Pend),
        Ok(StreamState::READABLE | StreamState::WRITABLE)
    );

    // The file turns the wait into a poll; the idle listener drops out
    let mut read = FdSet::new();
    read.insert(file).expect("stream handle");
    read.insert(listener).expect("stream handle");
    let start = Instant::now();
    osal.select_multiple(Some(&mut read), None, Timeout::Pend)
        .expect("file is ready");
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(read.contains(file));
    assert!(!read.contains(listener));
}

#[test]
fn test_disconnect_stays_ready_until_cleared() {
    let osal = common::osal();
    let listener = listener(&osal, 7306);
    let (client, server) = connected_pair(&osal, listener, 7306);

    osal.stream_close(client).expect("close should succeed");

    for _ in 0..3 {
        assert_eq!(
            osal.select_single(server, StreamState::READABLE, Timeout::Millis(50)),
            Ok(StreamState::READABLE)
        );
    }
    let mut buf = [0u8; 4];
    assert_eq!(osal.stream_timed_read(server, &mut buf, Timeout::Millis(50)), Ok(0));

    let mut read = FdSet::new();
    read.insert(server).expect("stream handle");
    osal.select_multiple(Some(&mut read), None, Timeout::Pend)
        .expect("disconnected stream is ready");
    assert!(read.contains(server));

    let info = osal.stream_info(server).expect("stream exists");
    assert!(info.disconnected);
    assert!(!info.connected);

    osal.stream_clear_disconnect(server).expect("socket stream");
    assert_eq!(
        osal.select_single(server, StreamState::READABLE, Timeout::Millis(50)),
        Err(OsalError::Timeout)
    );
}

#[test]
fn test_interrupted_waits_are_retried() {
    let kernel = kernel_with_faults(FaultPlan::new().with_fault(Fault::InterruptSelect { count: 2 }));
    let (osal, sink) = common::osal_on(kernel.clone());
    let listener = listener(&osal, 7307);
    let client = osal
        .socket_open(CallerContext::ROOT, SocketDomain::Inet, SocketType::Stream)
        .expect("socket should open");
    osal.socket_connect(client, loopback(7307), Timeout::Millis(500))
        .expect("connect should succeed");

    assert_eq!(
        osal.select_single(listener, StreamState::READABLE, Timeout::Millis(200)),
        Ok(StreamState::READABLE)
    );
    assert_eq!(kernel.injected_fault_count(), 2);
    let retries = sink
        .entries_at(LogLevel::Debug)
        .iter()
        .filter(|e| e.message == "host select interrupted, retrying")
        .count();
    assert_eq!(retries, 2);
}

#[test]
fn test_sockets_need_a_network() {
    let kernel = Arc::new(SimulatedKernel::new().with_network(false));
    let (osal, _) = common::osal_on(kernel);
    assert!(!osal.network_available());
    assert_eq!(
        osal.socket_open(CallerContext::ROOT, SocketDomain::Inet, SocketType::Stream),
        Err(OsalError::NotImplemented("network"))
    );
}
