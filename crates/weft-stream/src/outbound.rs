//! Client-side dispatch: validate, translate, choose, invoke, translate
//! back.

use std::sync::Arc;

use tracing::Instrument;
use weft_api::{
    Ack, BoxFuture, CallContext, ClientStream, Lifecycle, LifecycleState, OnewayOutbound, Request,
    Response, Status, StreamOutbound, UnaryOutbound,
};
use weft_wire::{
    Metadata, TRACE_ID, procedure_to_path, request_to_metadata, trailers_to_headers,
    wire_to_status,
};

use crate::chooser::{Chooser, Single};
use crate::link::LinkHandle;
use crate::peer::Peer;
use crate::transport::StreamTransport;

/// The stream transport's outbound.
///
/// Binds a peer chooser to the wire invocation logic and implements the
/// three outbound traits. Calls block until the outbound is running
/// (deadline-bounded) and are charged against the chosen peer for their
/// full duration.
pub struct Outbound {
    chooser: Arc<dyn Chooser>,
    lifecycle: Lifecycle,
}

impl Outbound {
    pub fn new(chooser: Arc<dyn Chooser>) -> Self {
        Self {
            chooser,
            lifecycle: Lifecycle::new(),
        }
    }

    /// Outbound over a single peer address.
    pub fn single(transport: Arc<StreamTransport>, addr: impl Into<String>) -> Self {
        Self::new(Arc::new(Single::new(transport, addr)))
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub async fn start(&self) -> Result<(), Status> {
        let chooser = self.chooser.clone();
        self.lifecycle
            .start(move || async move { chooser.start().await })
            .await
    }

    pub async fn stop(&self) -> Result<(), Status> {
        let chooser = self.chooser.clone();
        self.lifecycle
            .stop(move || async move { chooser.stop().await })
            .await
    }

    /// Shared front half of every call: wait for running, validate,
    /// translate, resolve the wire path, choose a peer.
    async fn prepare(
        &self,
        ctx: &CallContext,
        req: &Request,
    ) -> Result<(String, Metadata, Arc<Peer>, crate::chooser::Finish, LinkHandle), Status> {
        self.lifecycle.wait_until_running(ctx.deadline()).await?;
        req.validate()?;
        let mut metadata = request_to_metadata(req)?;
        let trace_id = ctx
            .trace_id()
            .map(str::to_owned)
            .unwrap_or_else(new_trace_id);
        metadata.push((TRACE_ID.to_owned(), trace_id));
        let path = procedure_to_path(&req.procedure);
        let (peer, finish) = self.chooser.choose(ctx, req).await?;
        let link = peer.current_link().ok_or_else(|| {
            Status::unavailable(format!("peer {:?} is not connected", peer.addr()))
        })?;
        Ok((path, metadata, peer, finish, link))
    }

    async fn call_impl(&self, ctx: &CallContext, req: Request) -> Result<Response, Status> {
        let (path, metadata, peer, _finish, link) = self.prepare(ctx, &req).await?;
        let span = tracing::info_span!(
            "weft.call",
            service = %req.service,
            procedure = %req.procedure,
            peer = %peer.addr(),
        );
        async move {
            let ttl_ms = ctx.remaining().map(|d| d.as_millis() as u64);
            let call = link.call_unary(path, ttl_ms, metadata, req.body.to_vec());
            let reply = match ctx.deadline() {
                None => call.await?,
                Some(deadline) => match tokio::time::timeout_at(deadline.into(), call).await {
                    Ok(reply) => reply?,
                    Err(_) => return Err(call_timed_out(&req)),
                },
            };
            if !reply.status.is_ok() {
                let status = wire_to_status(&reply.status, &reply.trailers);
                tracing::debug!(code = %status.code(), "call failed");
                return Err(status);
            }
            Ok(Response {
                headers: trailers_to_headers(&reply.trailers),
                body: reply.body.into(),
            })
        }
        .instrument(span)
        .await
    }

    async fn call_oneway_impl(&self, ctx: &CallContext, req: Request) -> Result<Ack, Status> {
        let (path, metadata, peer, _finish, link) = self.prepare(ctx, &req).await?;
        let span = tracing::info_span!(
            "weft.call_oneway",
            service = %req.service,
            procedure = %req.procedure,
            peer = %peer.addr(),
        );
        async move {
            let ttl_ms = ctx.remaining().map(|d| d.as_millis() as u64);
            let call = link.call_oneway(path, ttl_ms, metadata, req.body.to_vec());
            match ctx.deadline() {
                None => call.await?,
                Some(deadline) => match tokio::time::timeout_at(deadline.into(), call).await {
                    Ok(result) => result?,
                    Err(_) => return Err(call_timed_out(&req)),
                },
            }
            Ok(Ack)
        }
        .instrument(span)
        .await
    }

    async fn call_stream_impl(
        &self,
        ctx: &CallContext,
        req: Request,
    ) -> Result<ClientStream, Status> {
        let (path, metadata, peer, _finish, link) = self.prepare(ctx, &req).await?;
        tracing::debug!(
            service = %req.service,
            procedure = %req.procedure,
            peer = %peer.addr(),
            "opening stream",
        );
        let ttl_ms = ctx.remaining().map(|d| d.as_millis() as u64);
        link.open_stream(path, ttl_ms, metadata).await
    }
}

impl UnaryOutbound for Outbound {
    fn call<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
    ) -> BoxFuture<'a, Result<Response, Status>> {
        Box::pin(self.call_impl(ctx, req))
    }
}

impl OnewayOutbound for Outbound {
    fn call_oneway<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
    ) -> BoxFuture<'a, Result<Ack, Status>> {
        Box::pin(self.call_oneway_impl(ctx, req))
    }
}

impl StreamOutbound for Outbound {
    fn call_stream<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
    ) -> BoxFuture<'a, Result<ClientStream, Status>> {
        Box::pin(self.call_stream_impl(ctx, req))
    }
}

fn call_timed_out(req: &Request) -> Status {
    Status::deadline_exceeded(format!(
        "call to procedure {:?} of service {:?} timed out",
        req.procedure, req.service
    ))
}

fn new_trace_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}
