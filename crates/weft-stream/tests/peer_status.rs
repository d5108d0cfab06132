//! Peer connectivity monitoring: status transitions across server loss
//! and recovery.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use weft_api::Router;
use weft_stream::{
    Backoff, ConnectionStatus, Peer, StreamTransport, Subscriber, TransportOptions,
};
use weft_testkit::{init_tracing, spawn_server_with, test_router};

struct Recorder(Mutex<Vec<ConnectionStatus>>);

impl Subscriber for Recorder {
    fn notify_status_changed(&self, _peer_addr: &str, status: ConnectionStatus) {
        self.0.lock().unwrap().push(status);
    }
}

async fn wait_for_status(peer: &Peer, want: ConnectionStatus) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while peer.status() != want {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("peer never reached {want:?}"));
}

fn fast_backoff() -> Backoff {
    Backoff {
        initial: Duration::from_millis(20),
        max: Duration::from_millis(100),
        multiplier: 2.0,
    }
}

#[tokio::test]
async fn subscribers_observe_loss_and_recovery() {
    init_tracing();
    let router: Arc<dyn Router> = Arc::new(test_router());
    let server = spawn_server_with(
        weft_stream::Inbound::new("127.0.0.1:0").with_router(router.clone()),
    )
    .await;
    let addr = server.addr();

    let transport = Arc::new(StreamTransport::new(
        TransportOptions::default().with_backoff(fast_backoff()),
    ));
    transport.start().await.unwrap();

    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    let (peer, subscription) = transport.retain_peer(&addr, recorder.clone()).unwrap();

    // Ready.
    wait_for_status(&peer, ConnectionStatus::Available).await;

    // Kill the server; the link dies and the monitor reports the loss.
    server.shutdown().await;
    wait_for_status(&peer, ConnectionStatus::Unavailable).await;

    // Bring a server back on the same address; the monitor redials.
    let revived = spawn_server_with(weft_stream::Inbound::new(&addr).with_router(router)).await;
    wait_for_status(&peer, ConnectionStatus::Available).await;

    transport.release_peer(&addr, subscription).await.unwrap();
    transport.stop().await.unwrap();
    revived.shutdown().await;

    // Terminal statuses in order, no duplicates, no skips:
    // Available -> Unavailable -> Available (-> Unavailable on release).
    // Connecting interleaves freely, and the down window may publish
    // Unavailable once per failed redial.
    let seen = recorder.0.lock().unwrap().clone();
    let mut terminal: Vec<_> = seen
        .iter()
        .copied()
        .filter(|s| *s != ConnectionStatus::Connecting)
        .collect();
    terminal.dedup();
    assert!(
        terminal.starts_with(&[
            ConnectionStatus::Available,
            ConnectionStatus::Unavailable,
            ConnectionStatus::Available,
        ]),
        "unexpected transitions: {seen:?}"
    );
    for pair in seen.windows(2) {
        assert_ne!(pair[0], pair[1], "duplicate transition in {seen:?}");
    }
}

#[tokio::test]
async fn peer_stays_idle_until_transport_runs() {
    init_tracing();
    let server = spawn_server_with(
        weft_stream::Inbound::new("127.0.0.1:0").with_router(Arc::new(test_router())),
    )
    .await;

    let transport = Arc::new(StreamTransport::new(
        TransportOptions::default().with_backoff(fast_backoff()),
    ));
    // Retain before start: the monitor must wait for the transport.
    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    let (peer, _sub) = transport.retain_peer(&server.addr(), recorder).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(peer.status(), ConnectionStatus::Unavailable);

    transport.start().await.unwrap();
    wait_for_status(&peer, ConnectionStatus::Available).await;

    transport.stop().await.unwrap();
    assert_eq!(peer.status(), ConnectionStatus::Unavailable);
    server.shutdown().await;
}

#[tokio::test]
async fn release_tears_down_the_last_reference() {
    init_tracing();
    let server = spawn_server_with(
        weft_stream::Inbound::new("127.0.0.1:0").with_router(Arc::new(test_router())),
    )
    .await;
    let addr = server.addr();

    let transport = Arc::new(StreamTransport::new(
        TransportOptions::default().with_backoff(fast_backoff()),
    ));
    transport.start().await.unwrap();

    let recorder_a = Arc::new(Recorder(Mutex::new(Vec::new())));
    let recorder_b = Arc::new(Recorder(Mutex::new(Vec::new())));
    let (peer, sub_a) = transport.retain_peer(&addr, recorder_a).unwrap();
    let (peer_b, sub_b) = transport.retain_peer(&addr, recorder_b).unwrap();
    assert!(Arc::ptr_eq(&peer, &peer_b));
    assert_eq!(transport.peer_count(), 1);

    wait_for_status(&peer, ConnectionStatus::Available).await;

    transport.release_peer(&addr, sub_a).await.unwrap();
    assert_eq!(transport.peer_count(), 1);
    transport.release_peer(&addr, sub_b).await.unwrap();
    assert_eq!(transport.peer_count(), 0);
    assert_eq!(peer.status(), ConnectionStatus::Unavailable);

    // Releasing an unknown peer is an error.
    let err = transport.release_peer(&addr, 99).await.unwrap_err();
    assert_eq!(err.code(), weft_api::Code::NotFound);

    transport.stop().await.unwrap();
    server.shutdown().await;
}
