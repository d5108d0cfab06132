//! End-to-end tests over loopback TCP: one inbound, one outbound, real
//! sockets.

use std::sync::Arc;
use std::time::Duration;

use weft_api::{CallContext, Code, OnewayOutbound, Request, StreamOutbound, UnaryOutbound};
use weft_stream::{Outbound, StreamTransport, TransportOptions};
use weft_testkit::{
    init_tracing, named_error_handler, oneway_recorder, sleepy_handler, spawn_server, test_router,
};

async fn connect(addr: &str) -> (Arc<StreamTransport>, Outbound) {
    let transport = Arc::new(StreamTransport::new(TransportOptions::default()));
    transport.start().await.unwrap();
    let outbound = Outbound::single(transport.clone(), addr);
    outbound.start().await.unwrap();
    (transport, outbound)
}

fn echo_request() -> Request {
    Request::new("test-caller", "test-service", "echo")
}

#[tokio::test]
async fn echo_round_trip_preserves_body_and_headers() {
    init_tracing();
    let server = spawn_server(Arc::new(test_router())).await;
    let (transport, outbound) = connect(&server.addr()).await;

    let ctx = CallContext::new().with_timeout(Duration::from_secs(5));
    let req = echo_request()
        .with_header("Echo-Key", "echo-value")
        .with_header("other", "2")
        .with_body("hello");
    let resp = outbound.call(&ctx, req).await.unwrap();

    assert_eq!(&resp.body[..], b"hello");
    assert_eq!(resp.headers.get("echo-key"), Some("echo-value"));
    assert_eq!(resp.headers.get("other"), Some("2"));
    // Reserved keys never surface as response headers.
    assert_eq!(resp.headers.len(), 2);

    outbound.stop().await.unwrap();
    transport.stop().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn unrecognized_procedure_is_invalid_argument() {
    init_tracing();
    let server = spawn_server(Arc::new(test_router())).await;
    let (_transport, outbound) = connect(&server.addr()).await;

    let ctx = CallContext::new().with_timeout(Duration::from_secs(5));
    let req = Request::new("test-caller", "test-service", "no-such-procedure");
    let err = outbound.call(&ctx, req).await.unwrap_err();

    assert_eq!(err.code(), Code::InvalidArgument);
    assert!(
        err.message()
            .contains("unrecognized procedure \"no-such-procedure\""),
        "unexpected message: {}",
        err.message()
    );
    server.shutdown().await;
}

#[tokio::test]
async fn slow_handler_hits_client_deadline() {
    init_tracing();
    let router = test_router().with_unary("sleep", sleepy_handler(Duration::from_secs(2)));
    let server = spawn_server(Arc::new(router)).await;
    let (_transport, outbound) = connect(&server.addr()).await;

    let ctx = CallContext::new().with_timeout(Duration::from_millis(100));
    let req = Request::new("test-caller", "test-service", "sleep").with_body("zzz");
    let started = std::time::Instant::now();
    let err = outbound.call(&ctx, req).await.unwrap_err();

    assert_eq!(err.code(), Code::DeadlineExceeded);
    assert!(started.elapsed() < Duration::from_secs(1));
    server.shutdown().await;
}

#[tokio::test]
async fn named_application_errors_survive_the_wire() {
    init_tracing();
    let router = test_router().with_unary("explode", named_error_handler("Xception", "boom"));
    let server = spawn_server(Arc::new(router)).await;
    let (_transport, outbound) = connect(&server.addr()).await;

    let ctx = CallContext::new().with_timeout(Duration::from_secs(5));
    let req = Request::new("test-caller", "test-service", "explode");
    let err = outbound.call(&ctx, req).await.unwrap_err();

    assert_eq!(err.code(), Code::Internal);
    assert_eq!(err.name(), Some("Xception"));
    assert_eq!(err.message(), "boom");
    server.shutdown().await;
}

#[tokio::test]
async fn oneway_calls_are_acknowledged_and_delivered() {
    init_tracing();
    let (handler, mut received) = oneway_recorder();
    let router = test_router().with_oneway("notify", handler);
    let server = spawn_server(Arc::new(router)).await;
    let (_transport, outbound) = connect(&server.addr()).await;

    let ctx = CallContext::new().with_timeout(Duration::from_secs(5));
    let req = Request::new("test-caller", "test-service", "notify").with_body("fire");
    outbound.call_oneway(&ctx, req).await.unwrap();

    let delivered = tokio::time::timeout(Duration::from_secs(5), received.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&delivered.body[..], b"fire");
    assert_eq!(delivered.caller, "test-caller");
    server.shutdown().await;
}

#[tokio::test]
async fn stream_echo_round_trip() {
    init_tracing();
    let server = spawn_server(Arc::new(test_router())).await;
    let (_transport, outbound) = connect(&server.addr()).await;

    let ctx = CallContext::new().with_timeout(Duration::from_secs(5));
    let req = Request::new("test-caller", "test-service", "echo-stream");
    let mut stream = outbound.call_stream(&ctx, req).await.unwrap();

    for msg in ["one", "two", "three"] {
        stream.send_msg(msg).await.unwrap();
    }
    stream.close_send().await.unwrap();

    for msg in ["one", "two", "three"] {
        let got = stream.recv_msg().await.unwrap().unwrap();
        assert_eq!(&got[..], msg.as_bytes());
    }
    // Clean completion after the handler returns.
    assert_eq!(stream.recv_msg().await.unwrap(), None);
    server.shutdown().await;
}

#[tokio::test]
async fn calling_a_stream_procedure_as_unary_is_unimplemented() {
    init_tracing();
    let server = spawn_server(Arc::new(test_router())).await;
    let (_transport, outbound) = connect(&server.addr()).await;

    let ctx = CallContext::new().with_timeout(Duration::from_secs(5));
    let req = Request::new("test-caller", "test-service", "echo-stream");
    let err = outbound.call(&ctx, req).await.unwrap_err();

    assert_eq!(err.code(), Code::Unimplemented);
    assert!(err.message().contains("stream handlers"));
    server.shutdown().await;
}

#[tokio::test]
async fn reserved_headers_are_rejected_before_the_wire() {
    init_tracing();
    let server = spawn_server(Arc::new(test_router())).await;
    let (_transport, outbound) = connect(&server.addr()).await;

    let ctx = CallContext::new().with_timeout(Duration::from_secs(5));
    let req = echo_request().with_header("RPC-Caller", "spoof");
    let err = outbound.call(&ctx, req).await.unwrap_err();

    assert_eq!(err.code(), Code::InvalidArgument);
    assert!(err.message().contains("reserved header"));
    server.shutdown().await;
}

#[tokio::test]
async fn invalid_requests_fail_fast() {
    init_tracing();
    let server = spawn_server(Arc::new(test_router())).await;
    let (_transport, outbound) = connect(&server.addr()).await;

    let ctx = CallContext::new().with_timeout(Duration::from_secs(5));
    let req = Request::new("", "test-service", "echo");
    let err = outbound.call(&ctx, req).await.unwrap_err();

    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(err.message(), "missing caller name");
    server.shutdown().await;
}

#[tokio::test]
async fn concurrent_calls_share_one_link() {
    init_tracing();
    let server = spawn_server(Arc::new(test_router())).await;
    let (_transport, outbound) = connect(&server.addr()).await;
    let outbound = Arc::new(outbound);

    let mut tasks = Vec::new();
    for i in 0..32 {
        let outbound = outbound.clone();
        tasks.push(tokio::spawn(async move {
            let ctx = CallContext::new().with_timeout(Duration::from_secs(5));
            let body = format!("payload-{i}");
            let req = echo_request().with_body(body.clone());
            let resp = outbound.call(&ctx, req).await.unwrap();
            assert_eq!(&resp.body[..], body.as_bytes());
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    server.shutdown().await;
}
