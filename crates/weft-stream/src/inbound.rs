//! Server side: accept connections, reconstruct requests, dispatch
//! handlers, translate results back to the wire.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, debug, info, trace, warn};
use weft_api::{
    CallContext, HandlerSpec, Headers, Lifecycle, LifecycleState, OnewayInbound, Request, Response,
    Router, ServerStream, Status, StreamInbound, StreamItem, UnaryInbound,
};
use weft_wire::{
    CallKind, Message, Metadata, PROTOCOL_VERSION, WireStatus, metadata_to_request,
    path_to_procedure, status_to_wire, trace_id_from_metadata,
};

use crate::framing::{DEFAULT_MAX_FRAME_LEN, FrameWriter, HELLO_TIMEOUT, frame_pair};

/// Middleware configured on an inbound, applied around every dispatch.
#[derive(Clone, Default)]
struct InboundMiddleware {
    unary: Option<Arc<dyn UnaryInbound>>,
    oneway: Option<Arc<dyn OnewayInbound>>,
    stream: Option<Arc<dyn StreamInbound>>,
}

/// State shared by every connection of one inbound.
struct ConnShared {
    router: Arc<dyn Router>,
    middleware: InboundMiddleware,
    hello_metadata: Metadata,
    max_frame_len: usize,
}

/// The stream transport's inbound: a listener plus handler dispatch.
///
/// `start` fails fatally when no router is set, binds the listener, and
/// returns as soon as it is bound; serving runs detached. `stop` stops
/// accepting, drains in-flight calls, and joins every serve task before
/// returning.
pub struct Inbound {
    addr: String,
    router: Mutex<Option<Arc<dyn Router>>>,
    middleware: InboundMiddleware,
    hello_metadata: Metadata,
    max_frame_len: usize,
    lifecycle: Lifecycle,
    shutdown: watch::Sender<bool>,
    local_addr: Mutex<Option<SocketAddr>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Inbound {
    pub fn new(addr: impl Into<String>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            addr: addr.into(),
            router: Mutex::new(None),
            middleware: InboundMiddleware::default(),
            hello_metadata: Metadata::new(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            lifecycle: Lifecycle::new(),
            shutdown,
            local_addr: Mutex::new(None),
            accept_task: Mutex::new(None),
        }
    }

    pub fn with_router(self, router: Arc<dyn Router>) -> Self {
        *self.router.lock() = Some(router);
        self
    }

    /// Set the router after construction; must happen before `start`.
    pub fn set_router(&self, router: Arc<dyn Router>) {
        *self.router.lock() = Some(router);
    }

    pub fn with_unary_middleware(mut self, middleware: Arc<dyn UnaryInbound>) -> Self {
        self.middleware.unary = Some(middleware);
        self
    }

    pub fn with_oneway_middleware(mut self, middleware: Arc<dyn OnewayInbound>) -> Self {
        self.middleware.oneway = Some(middleware);
        self
    }

    pub fn with_stream_middleware(mut self, middleware: Arc<dyn StreamInbound>) -> Self {
        self.middleware.stream = Some(middleware);
        self
    }

    pub fn with_hello_metadata(mut self, metadata: Metadata) -> Self {
        self.hello_metadata = metadata;
        self
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// The bound listen address, available once running. With a `:0`
    /// listen address this is where the kernel put us.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub async fn start(&self) -> Result<(), Status> {
        self.lifecycle
            .start(|| async move {
                let router = self
                    .router
                    .lock()
                    .clone()
                    .ok_or_else(|| Status::failed_precondition("router not set"))?;
                let listener = TcpListener::bind(&self.addr).await.map_err(|e| {
                    Status::unavailable(format!("failed to listen on {:?}: {e}", self.addr))
                })?;
                let local = listener
                    .local_addr()
                    .map_err(|e| Status::internal(e.to_string()))?;
                *self.local_addr.lock() = Some(local);
                let procedures = router.procedures();
                for procedure in &procedures {
                    trace!(
                        service = %procedure.service,
                        procedure = %procedure.name,
                        kind = %procedure.spec.kind(),
                        "registered",
                    );
                }
                info!(addr = %local, procedures = procedures.len(), "inbound listening");
                let shared = Arc::new(ConnShared {
                    router,
                    middleware: self.middleware.clone(),
                    hello_metadata: self.hello_metadata.clone(),
                    max_frame_len: self.max_frame_len,
                });
                let shutdown = self.shutdown.subscribe();
                let task = tokio::spawn(accept_loop(listener, shared, shutdown));
                *self.accept_task.lock() = Some(task);
                Ok(())
            })
            .await
    }

    pub async fn stop(&self) -> Result<(), Status> {
        self.lifecycle
            .stop(|| async move {
                self.shutdown.send_replace(true);
                let task = self.accept_task.lock().take();
                if let Some(task) = task {
                    let _ = task.await;
                }
                Ok(())
            })
            .await
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<ConnShared>,
    shutdown: watch::Receiver<bool>,
) {
    let mut shutdown_accept = shutdown.clone();
    let mut conns: JoinSet<()> = JoinSet::new();
    loop {
        tokio::select! {
            _ = async { let _ = shutdown_accept.wait_for(|stopped| *stopped).await; } => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    debug!(%remote, "accepted connection");
                    let _ = stream.set_nodelay(true);
                    conns.spawn(serve_connection(stream, shared.clone(), shutdown.clone()));
                }
                Err(error) => {
                    warn!(%error, "accept failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            },
        }
    }
    drop(listener);
    while conns.join_next().await.is_some() {}
}

async fn serve_connection<S>(stream: S, shared: Arc<ConnShared>, mut shutdown: watch::Receiver<bool>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = frame_pair(stream, shared.max_frame_len);

    // Acceptor side of the hello exchange: the initiator speaks first.
    match tokio::time::timeout(HELLO_TIMEOUT, reader.recv()).await {
        Ok(Ok(Some(Message::Hello { version, .. }))) if version == PROTOCOL_VERSION => {}
        Ok(Ok(Some(Message::Hello { version, .. }))) => {
            let _ = writer
                .send(&Message::Goodbye {
                    reason: format!("unsupported protocol version {version}"),
                })
                .await;
            return;
        }
        _ => {
            debug!("connection closed before hello");
            return;
        }
    }

    let (out_tx, out_rx) = mpsc::channel::<Message>(64);
    let writer_task = tokio::spawn(write_loop(writer, out_rx));
    if out_tx
        .send(Message::Hello {
            version: PROTOCOL_VERSION,
            metadata: shared.hello_metadata.clone(),
        })
        .await
        .is_err()
    {
        return;
    }

    let mut calls: JoinSet<()> = JoinSet::new();
    let mut streams: HashMap<u64, mpsc::Sender<StreamItem>> = HashMap::new();

    loop {
        tokio::select! {
            _ = async { let _ = shutdown.wait_for(|stopped| *stopped).await; } => break,
            msg = reader.recv() => match msg {
                Ok(Some(msg)) => {
                    if handle_message(msg, &shared, &out_tx, &mut calls, &mut streams).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    debug!(%error, "read failed");
                    break;
                }
            },
        }
    }

    // Drain in-flight handlers; their responses still flow through the
    // writer task while we wait.
    drop(streams);
    while calls.join_next().await.is_some() {}
    drop(out_tx);
    let _ = writer_task.await;
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: FrameWriter<W>,
    mut out_rx: mpsc::Receiver<Message>,
) {
    while let Some(msg) = out_rx.recv().await {
        if let Err(error) = writer.send(&msg).await {
            debug!(%error, "write failed");
            break;
        }
    }
}

/// Route one incoming message. Returns `true` when the connection is done.
async fn handle_message(
    msg: Message,
    shared: &Arc<ConnShared>,
    out_tx: &mpsc::Sender<Message>,
    calls: &mut JoinSet<()>,
    streams: &mut HashMap<u64, mpsc::Sender<StreamItem>>,
) -> bool {
    match msg {
        Message::Request {
            id,
            path,
            kind,
            ttl_ms,
            metadata,
            body,
        } => match kind {
            CallKind::Unary => {
                let shared = shared.clone();
                let out_tx = out_tx.clone();
                calls.spawn(async move {
                    serve_unary(shared, out_tx, id, path, ttl_ms, metadata, body).await;
                });
            }
            CallKind::Oneway => {
                let shared = shared.clone();
                let out_tx = out_tx.clone();
                calls.spawn(async move {
                    serve_oneway(shared, out_tx, id, path, ttl_ms, metadata, body).await;
                });
            }
            CallKind::Stream => {
                let (in_tx, in_rx) = mpsc::channel(32);
                streams.insert(id, in_tx);
                let shared = shared.clone();
                let out_tx = out_tx.clone();
                calls.spawn(async move {
                    serve_stream(shared, out_tx, id, path, ttl_ms, metadata, in_rx).await;
                });
            }
        },
        Message::Data { id, body } => {
            let dead = match streams.get(&id) {
                Some(tx) => tx.send(StreamItem::Message(body.into())).await.is_err(),
                None => {
                    trace!(id, "data for unknown stream");
                    false
                }
            };
            if dead {
                streams.remove(&id);
            }
        }
        Message::CloseSend { id } => {
            if let Some(tx) = streams.remove(&id) {
                let _ = tx.send(StreamItem::Close).await;
            }
        }
        Message::Goodbye { reason } => {
            debug!(reason, "peer said goodbye");
            return true;
        }
        Message::Hello { .. } | Message::Response { .. } | Message::Ack { .. } => {
            trace!("unexpected message from client");
        }
    }
    false
}

/// Rebuild the call context and canonical request from the wire.
fn decode_call(
    path: &str,
    ttl_ms: Option<u64>,
    metadata: &Metadata,
    body: Vec<u8>,
) -> Result<(CallContext, Request), Status> {
    let procedure =
        path_to_procedure(path).map_err(|e| Status::invalid_argument(e.to_string()))?;
    let mut req = metadata_to_request(metadata)?;
    req.procedure = procedure;
    req.body = body.into();
    req.validate()?;
    let mut ctx = CallContext::new();
    if let Some(ttl) = ttl_ms {
        ctx = ctx.with_timeout(Duration::from_millis(ttl));
    }
    if let Some(trace_id) = trace_id_from_metadata(metadata) {
        ctx = ctx.with_trace_id(trace_id);
    }
    Ok((ctx, req))
}

fn headers_to_trailers(headers: Headers) -> Metadata {
    headers.into_iter().collect()
}

fn error_response(id: u64, status: &Status) -> Message {
    let (wire, name_entry) = status_to_wire(status);
    let mut trailers = Metadata::new();
    if let Some(entry) = name_entry {
        trailers.push(entry);
    }
    Message::Response {
        id,
        status: wire,
        trailers,
        body: Vec::new(),
    }
}

fn unimplemented_kind(spec_kind: weft_api::HandlerKind, call_kind: &str) -> Status {
    Status::unimplemented(format!(
        "transport stream does not handle {spec_kind} handlers for {call_kind} calls"
    ))
}

async fn serve_unary(
    shared: Arc<ConnShared>,
    out_tx: mpsc::Sender<Message>,
    id: u64,
    path: String,
    ttl_ms: Option<u64>,
    metadata: Metadata,
    body: Vec<u8>,
) {
    let response = match process_unary(&shared, &path, ttl_ms, &metadata, body).await {
        Ok(resp) => Message::Response {
            id,
            status: WireStatus::ok(),
            trailers: headers_to_trailers(resp.headers),
            body: resp.body.to_vec(),
        },
        Err(status) => error_response(id, &status),
    };
    let _ = out_tx.send(response).await;
}

async fn process_unary(
    shared: &Arc<ConnShared>,
    path: &str,
    ttl_ms: Option<u64>,
    metadata: &Metadata,
    body: Vec<u8>,
) -> Result<Response, Status> {
    let (ctx, req) = decode_call(path, ttl_ms, metadata, body)?;
    let span = tracing::info_span!(
        "weft.handle",
        service = %req.service,
        procedure = %req.procedure,
        caller = %req.caller,
    );
    async move {
        let spec = shared.router.route(&ctx, &req)?;
        let kind = spec.kind();
        let HandlerSpec::Unary(handler) = spec else {
            return Err(unimplemented_kind(kind, "unary"));
        };
        let run = async {
            match &shared.middleware.unary {
                Some(middleware) => middleware.handle(&ctx, req.clone(), &*handler).await,
                None => handler.handle(&ctx, req.clone()).await,
            }
        };
        match ctx.deadline() {
            None => run.await,
            Some(deadline) => match tokio::time::timeout_at(deadline.into(), run).await {
                Ok(result) => result,
                Err(_) => Err(Status::deadline_exceeded(format!(
                    "call to procedure {:?} of service {:?} timed out",
                    req.procedure, req.service
                ))),
            },
        }
    }
    .instrument(span)
    .await
}

async fn serve_oneway(
    shared: Arc<ConnShared>,
    out_tx: mpsc::Sender<Message>,
    id: u64,
    path: String,
    ttl_ms: Option<u64>,
    metadata: Metadata,
    body: Vec<u8>,
) {
    let dispatched: Result<(), Status> = (|| {
        let (ctx, req) = decode_call(&path, ttl_ms, &metadata, body)?;
        let spec = shared.router.route(&ctx, &req)?;
        let kind = spec.kind();
        let HandlerSpec::Oneway(handler) = spec else {
            return Err(unimplemented_kind(kind, "oneway"));
        };
        let span = tracing::info_span!(
            "weft.handle_oneway",
            service = %req.service,
            procedure = %req.procedure,
        );
        let middleware = shared.middleware.oneway.clone();
        tokio::spawn(
            async move {
                let result = match &middleware {
                    Some(middleware) => middleware.handle_oneway(&ctx, req, &*handler).await,
                    None => handler.handle_oneway(&ctx, req).await,
                };
                if let Err(error) = result {
                    warn!(%error, "oneway handler failed");
                }
            }
            .instrument(span),
        );
        Ok(())
    })();
    let response = match dispatched {
        Ok(()) => Message::Ack { id },
        Err(status) => error_response(id, &status),
    };
    let _ = out_tx.send(response).await;
}

async fn serve_stream(
    shared: Arc<ConnShared>,
    out_tx: mpsc::Sender<Message>,
    id: u64,
    path: String,
    ttl_ms: Option<u64>,
    metadata: Metadata,
    in_rx: mpsc::Receiver<StreamItem>,
) {
    let response = match process_stream(&shared, &out_tx, id, &path, ttl_ms, &metadata, in_rx).await
    {
        Ok(()) => Message::Response {
            id,
            status: WireStatus::ok(),
            trailers: Metadata::new(),
            body: Vec::new(),
        },
        Err(status) => error_response(id, &status),
    };
    let _ = out_tx.send(response).await;
}

async fn process_stream(
    shared: &Arc<ConnShared>,
    out_tx: &mpsc::Sender<Message>,
    id: u64,
    path: &str,
    ttl_ms: Option<u64>,
    metadata: &Metadata,
    in_rx: mpsc::Receiver<StreamItem>,
) -> Result<(), Status> {
    let (ctx, req) = decode_call(path, ttl_ms, metadata, Vec::new())?;
    let span = tracing::info_span!(
        "weft.handle_stream",
        service = %req.service,
        procedure = %req.procedure,
    );
    async move {
        let spec = shared.router.route(&ctx, &req)?;
        let kind = spec.kind();
        let HandlerSpec::Stream(handler) = spec else {
            return Err(unimplemented_kind(kind, "stream"));
        };

        // Bridge the handler's outgoing messages to wire Data frames. The
        // forwarder drains before we return, so the final Response always
        // follows every Data frame.
        let (srv_tx, mut srv_rx) = mpsc::channel::<StreamItem>(32);
        let forwarder = {
            let out_tx = out_tx.clone();
            tokio::spawn(async move {
                while let Some(item) = srv_rx.recv().await {
                    if let StreamItem::Message(body) = item {
                        if out_tx
                            .send(Message::Data {
                                id,
                                body: body.to_vec(),
                            })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            })
        };

        let stream = ServerStream::new(ctx.clone(), req.clone(), in_rx, srv_tx);
        let run = async {
            match &shared.middleware.stream {
                Some(middleware) => middleware.handle_stream(stream, &*handler).await,
                None => handler.handle_stream(stream).await,
            }
        };
        let result = match ctx.deadline() {
            None => run.await,
            Some(deadline) => match tokio::time::timeout_at(deadline.into(), run).await {
                Ok(result) => result,
                Err(_) => Err(Status::deadline_exceeded(format!(
                    "stream for procedure {:?} of service {:?} timed out",
                    req.procedure, req.service
                ))),
            },
        };
        let _ = forwarder.await;
        result
    }
    .instrument(span)
    .await
}
