//! Middleware composition around a live transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use weft_api::{
    BoxFuture, CallContext, Request, Response, Status, UnaryHandler, UnaryInbound, UnaryOutbound,
    UnaryOutboundMiddleware, apply_unary_outbound,
};
use weft_stream::{Inbound, Outbound, StreamTransport, TransportOptions};
use weft_testkit::{init_tracing, spawn_server_with, test_router};

/// Inbound middleware stamping a header on every response.
struct Stamp;

impl UnaryInbound for Stamp {
    fn handle<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
        next: &'a dyn UnaryHandler,
    ) -> BoxFuture<'a, Result<Response, Status>> {
        Box::pin(async move {
            let resp = next.handle(ctx, req).await?;
            Ok(resp.with_header("served-by", "stamp"))
        })
    }
}

/// Outbound middleware counting calls.
struct Counter(Arc<AtomicUsize>);

impl UnaryOutboundMiddleware for Counter {
    fn call<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
        next: &'a dyn UnaryOutbound,
    ) -> BoxFuture<'a, Result<Response, Status>> {
        self.0.fetch_add(1, Ordering::SeqCst);
        next.call(ctx, req)
    }
}

#[tokio::test]
async fn middleware_wraps_both_sides() {
    init_tracing();
    let server = spawn_server_with(
        Inbound::new("127.0.0.1:0")
            .with_router(Arc::new(test_router()))
            .with_unary_middleware(Arc::new(Stamp)),
    )
    .await;

    let transport = Arc::new(StreamTransport::new(TransportOptions::default()));
    transport.start().await.unwrap();
    let outbound = Outbound::single(transport.clone(), server.addr());
    outbound.start().await.unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let wrapped = apply_unary_outbound(Arc::new(outbound), Arc::new(Counter(calls.clone())));

    let ctx = CallContext::new().with_timeout(Duration::from_secs(5));
    let req = Request::new("c", "test-service", "echo").with_body("mw");
    let resp = wrapped.call(&ctx, req).await.unwrap();

    assert_eq!(&resp.body[..], b"mw");
    assert_eq!(resp.headers.get("served-by"), Some("stamp"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    transport.stop().await.unwrap();
    server.shutdown().await;
}
