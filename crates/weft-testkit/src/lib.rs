#![deny(unsafe_code)]

//! Test helpers for weft: canned handlers and a server-spawning harness.
//!
//! Integration tests bind `127.0.0.1:0` and read the kernel-assigned port
//! back from the inbound, so suites can run in parallel without port
//! coordination.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use weft_api::{
    MapRouter, OnewayHandler, Request, Response, Router, Status, StreamHandler, UnaryHandler,
    oneway, unary,
};
use weft_stream::Inbound;

/// Install a test subscriber honoring `RUST_LOG`. Safe to call from every
/// test; only the first call wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Echoes the request body and application headers back.
pub fn echo_handler() -> Arc<dyn UnaryHandler> {
    unary(|_ctx, req: Request| async move {
        let mut resp = Response::new(req.body);
        resp.headers = req.headers;
        Ok(resp)
    })
}

/// Fails with a named application error.
pub fn named_error_handler(
    name: impl Into<String>,
    message: impl Into<String>,
) -> Arc<dyn UnaryHandler> {
    let name = name.into();
    let message = message.into();
    unary(move |_ctx, _req| {
        let name = name.clone();
        let message = message.clone();
        async move { Err(Status::internal(message).with_name(name)) }
    })
}

/// Sleeps for `delay`, then echoes. For deadline tests.
pub fn sleepy_handler(delay: Duration) -> Arc<dyn UnaryHandler> {
    unary(move |_ctx, req: Request| async move {
        tokio::time::sleep(delay).await;
        Ok(Response::new(req.body))
    })
}

/// Oneway handler forwarding every received request to a channel.
pub fn oneway_recorder() -> (Arc<dyn OnewayHandler>, mpsc::UnboundedReceiver<Request>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = oneway(move |_ctx, req: Request| {
        let tx = tx.clone();
        async move {
            tx.send(req)
                .map_err(|_| Status::internal("recorder dropped"))
        }
    });
    (handler, rx)
}

/// Stream handler echoing every message until the client half-closes.
pub fn stream_echo_handler() -> Arc<dyn StreamHandler> {
    struct StreamEcho;
    impl StreamHandler for StreamEcho {
        fn handle_stream<'a>(
            &'a self,
            mut stream: weft_api::ServerStream,
        ) -> weft_api::BoxFuture<'a, Result<(), Status>> {
            Box::pin(async move {
                while let Some(body) = stream.recv_msg().await? {
                    stream.send_msg(body).await?;
                }
                Ok(())
            })
        }
    }
    Arc::new(StreamEcho)
}

/// A router preloaded with the canned handlers under `"test-service"`:
/// `echo` (unary), `echo-stream` (stream).
pub fn test_router() -> MapRouter {
    MapRouter::new("test-service")
        .with_unary("echo", echo_handler())
        .with_stream("echo-stream", stream_echo_handler())
}

/// A started inbound on an ephemeral loopback port.
pub struct TestServer {
    inbound: Inbound,
}

impl TestServer {
    /// The address to point outbounds at.
    pub fn addr(&self) -> String {
        self.inbound
            .local_addr()
            .expect("server not bound")
            .to_string()
    }

    pub fn inbound(&self) -> &Inbound {
        &self.inbound
    }

    pub async fn shutdown(self) {
        let _ = self.inbound.stop().await;
    }
}

/// Bind `127.0.0.1:0`, start serving `router`, and return the handle.
pub async fn spawn_server(router: Arc<dyn Router>) -> TestServer {
    spawn_server_with(Inbound::new("127.0.0.1:0").with_router(router)).await
}

/// Start a preconfigured inbound (middleware, frame limits, ...) on
/// whatever address it was built with.
pub async fn spawn_server_with(inbound: Inbound) -> TestServer {
    inbound.start().await.expect("failed to start inbound");
    TestServer { inbound }
}
