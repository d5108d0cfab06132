//! Lifecycle behavior of inbound, outbound, and transport.

use std::sync::Arc;
use std::time::Duration;

use weft_api::{CallContext, Code, LifecycleState, Request, UnaryOutbound};
use weft_stream::{Inbound, Outbound, StreamTransport, TransportOptions};
use weft_testkit::{init_tracing, spawn_server, test_router};

#[tokio::test]
async fn inbound_without_router_fails_to_start() {
    init_tracing();
    let inbound = Inbound::new("127.0.0.1:0");
    let err = inbound.start().await.unwrap_err();
    assert_eq!(err.code(), Code::FailedPrecondition);
    assert_eq!(err.message(), "router not set");
    assert_eq!(inbound.state(), LifecycleState::Failed);
}

#[tokio::test]
async fn inbound_start_and_stop_are_idempotent() {
    init_tracing();
    let inbound = Inbound::new("127.0.0.1:0").with_router(Arc::new(test_router()));
    inbound.start().await.unwrap();
    let bound = inbound.local_addr().unwrap();
    inbound.start().await.unwrap();
    assert_eq!(inbound.local_addr().unwrap(), bound);

    inbound.stop().await.unwrap();
    inbound.stop().await.unwrap();
    assert_eq!(inbound.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn calls_before_start_wait_until_deadline() {
    init_tracing();
    let transport = Arc::new(StreamTransport::new(TransportOptions::default()));
    transport.start().await.unwrap();
    let outbound = Outbound::single(transport.clone(), "127.0.0.1:1");

    // Never started: the call blocks on wait-until-running and the
    // deadline converts that into DeadlineExceeded.
    let ctx = CallContext::new().with_timeout(Duration::from_millis(100));
    let req = Request::new("c", "s", "p");
    let err = outbound.call(&ctx, req).await.unwrap_err();
    assert_eq!(err.code(), Code::DeadlineExceeded);
}

#[tokio::test]
async fn calls_unblock_when_start_arrives() {
    init_tracing();
    let server = spawn_server(Arc::new(test_router())).await;
    let transport = Arc::new(StreamTransport::new(TransportOptions::default()));
    transport.start().await.unwrap();
    let outbound = Arc::new(Outbound::single(transport.clone(), server.addr()));

    let caller = {
        let outbound = outbound.clone();
        tokio::spawn(async move {
            let ctx = CallContext::new().with_timeout(Duration::from_secs(5));
            let req = Request::new("c", "test-service", "echo").with_body("late");
            outbound.call(&ctx, req).await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    outbound.start().await.unwrap();

    let resp = caller.await.unwrap().unwrap();
    assert_eq!(&resp.body[..], b"late");
    server.shutdown().await;
}

#[tokio::test]
async fn calls_after_stop_fail_fast() {
    init_tracing();
    let server = spawn_server(Arc::new(test_router())).await;
    let transport = Arc::new(StreamTransport::new(TransportOptions::default()));
    transport.start().await.unwrap();
    let outbound = Outbound::single(transport.clone(), server.addr());
    outbound.start().await.unwrap();
    outbound.stop().await.unwrap();

    let ctx = CallContext::new().with_timeout(Duration::from_secs(1));
    let req = Request::new("c", "test-service", "echo");
    let err = outbound.call(&ctx, req).await.unwrap_err();
    assert_eq!(err.code(), Code::FailedPrecondition);

    transport.stop().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn transport_stop_joins_all_peer_monitors() {
    init_tracing();
    let server = spawn_server(Arc::new(test_router())).await;
    let transport = Arc::new(StreamTransport::new(TransportOptions::default()));
    transport.start().await.unwrap();

    let outbound_a = Outbound::single(transport.clone(), server.addr());
    let outbound_b = Outbound::single(transport.clone(), server.addr());
    outbound_a.start().await.unwrap();
    outbound_b.start().await.unwrap();
    // Two outbounds on one address share a single retained peer.
    assert_eq!(transport.peer_count(), 1);

    // Stopping one outbound releases its reference, not the peer.
    outbound_a.stop().await.unwrap();
    assert_eq!(transport.peer_count(), 1);
    outbound_b.stop().await.unwrap();
    assert_eq!(transport.peer_count(), 0);

    transport.stop().await.unwrap();
    assert_eq!(transport.state(), LifecycleState::Stopped);
    server.shutdown().await;
}
