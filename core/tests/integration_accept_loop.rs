//! Accept loop integration tests
//!
//! Sessions are strictly sequential, a channel conflict is retried exactly
//! once after forced cleanup, and cancellation releases everything.
//!
//! Run with: cargo test --test integration_accept_loop

mod common;

use common::{HarnessBuilder, DEVICE_ID};
use edgelink_core::adapter::adapter_name;
use edgelink_core::config::DEFAULT_DEVICE_LABEL;
use edgelink_core::server::ServerError;
use edgelink_core::transport::{BdAddr, ListenerError, PlatformEvent, SocketError};
use edgelink_core::MemoryPlatform;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

fn phone(n: u8) -> BdAddr {
    BdAddr::from_display_bytes([0x11, 0x22, 0x33, 0x44, 0x55, n])
}

fn position(events: &[PlatformEvent], wanted: &PlatformEvent) -> usize {
    events
        .iter()
        .position(|e| e == wanted)
        .unwrap_or_else(|| panic!("{:?} not recorded in {:?}", wanted, events))
}

#[tokio::test]
async fn test_sessions_never_overlap() {
    let harness = HarnessBuilder::new().start();

    // Both phones connect before the first session is served
    let first = harness.platform.connect(phone(1));
    let second = harness.platform.connect(phone(2));

    first.send_line("PING");
    second.send_line("PING");

    assert_eq!(first.recv_line(WAIT).await.as_deref(), Some("PONG"));
    // The second phone is still queued in the backlog
    assert_eq!(second.recv_line(Duration::from_millis(200)).await, None);

    first.close();
    assert!(first.wait_closed(WAIT).await);

    assert_eq!(second.recv_line(WAIT).await.as_deref(), Some("PONG"));
    second.close();
    assert!(second.wait_closed(WAIT).await);

    let events = harness.platform.events();
    let first_closed = position(&events, &PlatformEvent::Closed(first.handle()));
    let second_accepted = position(&events, &PlatformEvent::AcceptReturned(second.handle()));
    assert!(
        first_closed < second_accepted,
        "second accept returned before the first session closed: {:?}",
        events
    );

    assert!(harness.stop().await.is_ok());
}

#[tokio::test]
async fn test_paired_devices_removed_after_each_session() {
    let harness = HarnessBuilder::new().start();
    harness.adapter.pair("11:22:33:44:55:01", true);

    let peer = harness.platform.connect(phone(1));
    peer.send_line("HELP");
    assert_eq!(
        peer.recv_line(WAIT).await.as_deref(),
        Some("Commands: PING, STATUS, TIME, INFO, HELP")
    );
    peer.close();
    assert!(peer.wait_closed(WAIT).await);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.adapter.count("remove 11:22:33:44:55:01"), 1);

    assert!(harness.stop().await.is_ok());
}

#[tokio::test]
async fn test_reset_peer_does_not_stop_server() {
    let harness = HarnessBuilder::new().start();
    let server = harness.server.clone();

    let broken = harness.platform.connect(phone(1));
    broken.reset();
    assert!(broken.wait_closed(WAIT).await);

    let next = harness.platform.connect(phone(2));
    next.send_line("ping");
    assert_eq!(next.recv_line(WAIT).await.as_deref(), Some("PONG"));
    next.close();

    assert!(harness.stop().await.is_ok());
    assert_eq!(server.registry().stats().sessions_total, 2);
}

#[tokio::test]
async fn test_bind_conflict_retried_once() {
    let platform = MemoryPlatform::new();
    platform.fail_binds([SocketError::AddrInUse]);
    let harness = HarnessBuilder::new().platform(platform.clone()).start();

    let peer = platform.connect(phone(1));
    peer.send_line("PING");
    assert_eq!(peer.recv_line(WAIT).await.as_deref(), Some("PONG"));

    assert_eq!(platform.bind_attempts(), 2);
    assert_eq!(harness.adapter.count("restart"), 1);
    // Bring-up runs again after the daemon restart
    assert_eq!(harness.adapter.count("power_on"), 2);

    assert!(harness.stop().await.is_ok());
}

#[tokio::test]
async fn test_second_bind_conflict_is_fatal() {
    let platform = MemoryPlatform::new();
    platform.fail_binds([SocketError::AddrInUse, SocketError::AddrInUse]);
    let harness = HarnessBuilder::new().platform(platform.clone()).start();
    let adapter = harness.adapter.clone();

    let result = harness.join().await;
    assert!(matches!(
        result,
        Err(ServerError::Listener(ListenerError::BindConflict { channel: 1, .. }))
    ));
    assert_eq!(platform.bind_attempts(), 2);
    assert_eq!(adapter.count("restart"), 1);
    assert_eq!(adapter.count("unregister"), 1);
}

#[tokio::test]
async fn test_cancel_while_waiting_for_client() {
    let platform = MemoryPlatform::new();
    let harness = HarnessBuilder::new().platform(platform.clone()).start();
    let adapter = harness.adapter.clone();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(harness.stop().await.is_ok());

    let events = platform.events();
    let listen_handle = events
        .iter()
        .find_map(|e| match e {
            PlatformEvent::Listen(handle) => Some(*handle),
            _ => None,
        })
        .expect("listener opened");
    assert!(events.contains(&PlatformEvent::Shutdown(listen_handle)));
    assert!(events.contains(&PlatformEvent::Closed(listen_handle)));
    assert_eq!(adapter.count("unregister"), 1);
}

#[tokio::test]
async fn test_cancel_during_session_closes_client() {
    let harness = HarnessBuilder::new().start();

    let peer = harness.platform.connect(phone(1));
    peer.send_line("PING");
    assert_eq!(peer.recv_line(WAIT).await.as_deref(), Some("PONG"));

    assert!(harness.stop().await.is_ok());
    assert!(peer.is_closed_by_server());
}

#[tokio::test]
async fn test_adapter_advertises_derived_name() {
    let harness = HarnessBuilder::new().start();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let expected = adapter_name("NCBEdge", Some(DEVICE_ID), DEFAULT_DEVICE_LABEL);
    assert!(harness
        .adapter
        .calls()
        .contains(&format!("power_on {}", expected)));

    assert!(harness.stop().await.is_ok());
}
