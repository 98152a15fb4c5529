mod common;

use common::{Harness, PEER_A, PEER_B};
use spp_link::transport::memory::{ConnectPlan, ConnectStep};
use spp_link::transport::{Discovery, NoDiscovery, TcpConfig, TcpConnector};
use spp_link::{
    event_channel, ConnectionConfig, ConnectionEvent, ConnectionManager, LinkError, LinkState,
    ReadStrategy, WriteOutcome,
};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};

#[tokio::test]
async fn test_connect_success_emits_once() {
    let mut h = Harness::new(ConnectPlan::ACCEPT);
    let _remote = h.connect(PEER_A).await;

    assert!(h.manager.is_connected().await);
    assert_eq!(
        h.manager.connected_peer().await.as_ref().map(|p| p.as_str()),
        Some(PEER_A)
    );
    assert_eq!(h.connector.fallback_calls(), 0);
    h.expect_quiet().await;
}

#[tokio::test]
async fn test_connect_failure_emits_once() {
    let mut h = Harness::new(ConnectPlan::REFUSE);
    h.manager.connect(PEER_A).await;

    match h.next_event().await {
        ConnectionEvent::ConnectionFailed { peer, cause } => {
            assert_eq!(peer.as_str(), PEER_A);
            assert!(matches!(cause, LinkError::ConnectFailed { .. }));
        }
        other => panic!("expected ConnectionFailed, got {:?}", other),
    }

    assert_eq!(h.manager.state().await, LinkState::Disconnected);
    assert_eq!(h.connector.primary_calls(), 1);
    assert_eq!(h.connector.fallback_calls(), 1);
    h.expect_quiet().await;
}

#[tokio::test]
async fn test_fallback_recovers_failed_primary() {
    let mut h = Harness::new(ConnectPlan::FALLBACK_ONLY);
    let _remote = h.connect("AA:BB:CC:DD:EE:FF").await;

    assert!(h.manager.is_connected().await);
    assert_eq!(h.connector.primary_calls(), 1);
    assert_eq!(h.connector.fallback_calls(), 1);
    h.expect_quiet().await;
}

#[tokio::test]
async fn test_newer_connect_supersedes_stalled_attempt() {
    let mut h = Harness::new(ConnectPlan::ACCEPT);
    h.connector.set_plan(PEER_A, ConnectPlan::STALL);

    h.manager.connect(PEER_A).await;
    let _remote = h.connect(PEER_B).await;

    assert_eq!(
        h.manager.connected_peer().await.as_ref().map(|p| p.as_str()),
        Some(PEER_B)
    );
    h.expect_quiet().await;
}

#[tokio::test]
async fn test_late_superseded_attempt_is_silent() {
    let mut h = Harness::new(ConnectPlan::ACCEPT);
    h.connector.set_plan(
        PEER_A,
        ConnectPlan {
            primary: ConnectStep::Delay(Duration::from_millis(200)),
            fallback: ConnectStep::Refuse,
        },
    );

    h.manager.connect(PEER_A).await;
    let _remote = h.connect(PEER_B).await;

    // Outlive A's handshake; its in-flight connect is abandoned
    sleep(Duration::from_millis(300)).await;
    assert!(h.remotes.try_recv().is_err());
    assert_eq!(
        h.manager.connected_peer().await.as_ref().map(|p| p.as_str()),
        Some(PEER_B)
    );
    h.expect_quiet().await;
}

struct CountingDiscovery(AtomicUsize);

impl Discovery for CountingDiscovery {
    fn cancel_discovery(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_discovery_cancelled_before_each_attempt() {
    let discovery = Arc::new(CountingDiscovery(AtomicUsize::new(0)));
    let mut h = Harness::with_discovery(ConnectPlan::ACCEPT, discovery.clone());
    h.connector.set_plan(PEER_B, ConnectPlan::REFUSE);

    let _remote = h.connect(PEER_A).await;
    assert_eq!(discovery.0.load(Ordering::SeqCst), 1);

    h.manager.connect(PEER_B).await;
    assert!(matches!(
        h.next_event().await,
        ConnectionEvent::ConnectionFailed { .. }
    ));
    assert_eq!(discovery.0.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_read_error_reports_loss_once() {
    let mut h = Harness::new(ConnectPlan::ACCEPT);
    let mut remote = h.connect(PEER_A).await;

    remote.inject_read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));

    match h.next_event().await {
        ConnectionEvent::ConnectionLost { peer, cause } => {
            assert_eq!(peer.as_str(), PEER_A);
            assert!(matches!(cause, LinkError::Read(_)));
        }
        other => panic!("expected ConnectionLost, got {:?}", other),
    }

    let status = h.manager.status().await;
    assert_eq!(status.state, LinkState::Disconnected);
    assert!(status.peer.is_none());

    assert!(matches!(
        h.manager.write(b"late").await,
        WriteOutcome::NotConnected
    ));
    h.expect_quiet().await;
}

#[tokio::test]
async fn test_remote_hangup_reports_loss() {
    let mut h = Harness::new(ConnectPlan::ACCEPT);
    let remote = h.connect(PEER_A).await;

    drop(remote);

    match h.next_event().await {
        ConnectionEvent::ConnectionLost { cause, .. } => {
            assert!(matches!(cause, LinkError::Closed));
        }
        other => panic!("expected ConnectionLost, got {:?}", other),
    }
    assert!(!h.manager.is_connected().await);
    h.expect_quiet().await;
}

#[tokio::test]
async fn test_disconnect_is_silent_and_idempotent() {
    let mut h = Harness::new(ConnectPlan::ACCEPT);
    let remote = h.connect(PEER_A).await;

    h.manager.disconnect().await;
    h.manager.disconnect().await;

    assert_eq!(h.manager.state().await, LinkState::Disconnected);
    assert!(h.manager.connected_peer().await.is_none());
    h.expect_quiet().await;

    // Released socket is closed gracefully by the read loop
    Harness::wait_closed(&remote).await;
}

#[tokio::test]
async fn test_no_data_delivered_after_disconnect() {
    let mut h = Harness::new(ConnectPlan::ACCEPT);
    let mut remote = h.connect(PEER_A).await;

    h.manager.disconnect().await;
    let _ = remote.stream.write_all(b"too late").await;

    h.expect_quiet().await;
}

#[tokio::test]
async fn test_disconnect_closes_socket_under_stalled_write() {
    let mut h = Harness::new(ConnectPlan::ACCEPT);
    let remote = h.connect(PEER_A).await;

    // The remote never reads, so this fills the in-memory buffer and stalls
    let payload = vec![0u8; 256 * 1024];
    {
        let write = h.manager.write(&payload);
        tokio::pin!(write);
        assert!(timeout(Duration::from_millis(100), &mut write).await.is_err());

        h.manager.disconnect().await;

        let outcome = timeout(Duration::from_secs(5), &mut write)
            .await
            .expect("write still pending after disconnect");
        assert!(matches!(outcome, WriteOutcome::NotConnected));
    }

    Harness::wait_closed(&remote).await;
    h.expect_quiet().await;
}

#[tokio::test]
async fn test_close_failure_is_reported_as_error() {
    let mut h = Harness::new(ConnectPlan::ACCEPT);
    let remote = h.connect(PEER_A).await;

    remote.fail_close();
    h.manager.disconnect().await;

    match h.next_event().await {
        ConnectionEvent::Error { peer, cause } => {
            assert_eq!(peer.as_str(), PEER_A);
            assert!(matches!(cause, LinkError::Close(_)));
        }
        other => panic!("expected Error, got {:?}", other),
    }
    assert_eq!(h.manager.state().await, LinkState::Disconnected);
    h.expect_quiet().await;
}

#[tokio::test]
async fn test_cancel_while_connecting_emits_nothing() {
    let mut h = Harness::new(ConnectPlan::STALL);
    h.manager.connect(PEER_A).await;
    assert_eq!(h.manager.state().await, LinkState::Connecting);

    h.manager.disconnect().await;

    assert_eq!(h.manager.state().await, LinkState::Disconnected);
    h.expect_quiet().await;
}

#[tokio::test]
async fn test_status_peer_tracks_connected_state() {
    let mut h = Harness::new(ConnectPlan::ACCEPT);
    h.connector.set_plan(PEER_B, ConnectPlan::STALL);

    let status = h.manager.status().await;
    assert_eq!(status.state == LinkState::Connected, status.peer.is_some());

    let _remote = h.connect(PEER_A).await;
    let status = h.manager.status().await;
    assert_eq!(status.state, LinkState::Connected);
    assert!(status.peer.is_some());

    h.manager.connect(PEER_B).await;
    let status = h.manager.status().await;
    assert_eq!(status.state, LinkState::Connecting);
    assert!(status.peer.is_none());
}

#[tokio::test]
async fn test_echo_round_trip() {
    let mut h = Harness::new(ConnectPlan::ACCEPT);
    let remote = h.connect(PEER_A).await;
    tokio::spawn(remote.echo());

    assert!(h.manager.write(b"hello ").await.is_written());
    assert!(h.manager.write(b"world").await.is_written());

    let data = h.collect_data(11).await;
    assert_eq!(data, b"hello world");
}

#[tokio::test]
async fn test_inbound_bytes_are_delivered_in_order() {
    let mut h = Harness::new(ConnectPlan::ACCEPT);
    let mut remote = h.connect(PEER_A).await;

    let payload: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    remote.stream.write_all(&payload).await.unwrap();

    let data = h.collect_data(payload.len()).await;
    assert_eq!(data, payload);
}

#[tokio::test]
async fn test_poll_strategy_delivers_data() {
    let config = ConnectionConfig {
        read_strategy: ReadStrategy::Poll {
            interval: Duration::from_millis(10),
        },
        ..Default::default()
    };
    let mut h = Harness::with_config(ConnectPlan::ACCEPT, config);
    let mut remote = h.connect(PEER_A).await;

    remote.stream.write_all(b"polled").await.unwrap();

    let data = h.collect_data(6).await;
    assert_eq!(data, b"polled");
}

#[tokio::test]
async fn test_small_buffer_splits_reads() {
    let config = ConnectionConfig {
        read_buffer_size: 4,
        ..Default::default()
    };
    let mut h = Harness::with_config(ConnectPlan::ACCEPT, config);
    let mut remote = h.connect(PEER_A).await;

    remote.stream.write_all(b"0123456789").await.unwrap();

    let mut chunks = Vec::new();
    let mut total = 0;
    while total < 10 {
        match h.next_event().await {
            ConnectionEvent::DataReceived { data, .. } => {
                assert!(data.len() <= 4);
                total += data.len();
                chunks.push(data);
            }
            other => panic!("expected data, got {:?}", other),
        }
    }
    assert_eq!(chunks.concat(), b"0123456789");
}

#[tokio::test]
async fn test_write_failure_is_advisory() {
    let mut h = Harness::new(ConnectPlan::ACCEPT);
    let remote = h.connect(PEER_A).await;

    remote.fail_writes();
    assert!(matches!(
        h.manager.write(b"x").await,
        WriteOutcome::Failed(LinkError::Write(_))
    ));

    match h.next_event().await {
        ConnectionEvent::Error { peer, cause } => {
            assert_eq!(peer.as_str(), PEER_A);
            assert!(matches!(cause, LinkError::Write(_)));
        }
        other => panic!("expected Error, got {:?}", other),
    }

    assert!(h.manager.is_connected().await);
    h.expect_quiet().await;
}

#[tokio::test]
async fn test_reconnect_tears_down_old_session_silently() {
    let mut h = Harness::new(ConnectPlan::ACCEPT);
    let first = h.connect(PEER_A).await;
    let _second = h.connect(PEER_B).await;

    assert_eq!(
        h.manager.connected_peer().await.as_ref().map(|p| p.as_str()),
        Some(PEER_B)
    );
    h.expect_quiet().await;

    Harness::wait_closed(&first).await;
}

#[tokio::test]
async fn test_drop_stops_workers() {
    let mut h = Harness::new(ConnectPlan::ACCEPT);
    let mut remote = h.connect(PEER_A).await;

    let Harness {
        manager,
        mut events,
        ..
    } = h;
    drop(manager);

    let _ = remote.stream.write_all(b"after drop").await;
    // The listener is released once every worker has exited
    let next = timeout(Duration::from_secs(5), events.recv()).await;
    assert!(matches!(next, Ok(None)), "unexpected {:?}", next);
}

#[tokio::test]
async fn test_tcp_loopback_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 64];
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if socket.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let (listener, mut events) = event_channel();
    let manager = ConnectionManager::new(
        ConnectionConfig::default(),
        Arc::new(TcpConnector::new(TcpConfig::default())),
        Arc::new(NoDiscovery),
        listener,
    );

    manager.connect(addr.as_str()).await;
    let event = timeout(Duration::from_secs(5), events.recv()).await.unwrap();
    assert!(matches!(event, Some(ConnectionEvent::Connected { .. })));
    assert_eq!(manager.transport(), "TCP");

    assert!(manager.write(b"over tcp").await.is_written());

    let mut echoed = Vec::new();
    while echoed.len() < 8 {
        match timeout(Duration::from_secs(5), events.recv()).await.unwrap() {
            Some(ConnectionEvent::DataReceived { data, .. }) => echoed.extend_from_slice(&data),
            other => panic!("expected data, got {:?}", other),
        }
    }
    assert_eq!(echoed, b"over tcp");

    manager.disconnect().await;
    assert!(!manager.is_connected().await);
}
