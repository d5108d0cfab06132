//! Ready-made logging middleware.
//!
//! Emits one `tracing` event per call with service, procedure, outcome,
//! and elapsed time. Doubles as the reference for writing middleware:
//! wrap, await `next`, observe, forward.

use std::time::Instant;

use tracing::{debug, warn};

use crate::{
    Ack, BoxFuture, CallContext, OnewayHandler, OnewayInbound, OnewayOutbound,
    OnewayOutboundMiddleware, Request, Response, Status, UnaryHandler, UnaryInbound,
    UnaryOutbound, UnaryOutboundMiddleware,
};

/// Logs every unary and oneway call passing through it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware;

fn log_outcome(direction: &str, req_service: &str, req_procedure: &str, started: Instant, err: Option<&Status>) {
    let elapsed = started.elapsed();
    match err {
        None => debug!(
            direction,
            service = req_service,
            procedure = req_procedure,
            ?elapsed,
            "call ok"
        ),
        Some(status) => warn!(
            direction,
            service = req_service,
            procedure = req_procedure,
            code = %status.code(),
            ?elapsed,
            "call failed"
        ),
    }
}

impl UnaryInbound for LoggingMiddleware {
    fn handle<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
        next: &'a dyn UnaryHandler,
    ) -> BoxFuture<'a, Result<Response, Status>> {
        Box::pin(async move {
            let (service, procedure) = (req.service.clone(), req.procedure.clone());
            let started = Instant::now();
            let result = next.handle(ctx, req).await;
            log_outcome("inbound", &service, &procedure, started, result.as_ref().err());
            result
        })
    }
}

impl OnewayInbound for LoggingMiddleware {
    fn handle_oneway<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
        next: &'a dyn OnewayHandler,
    ) -> BoxFuture<'a, Result<(), Status>> {
        Box::pin(async move {
            let (service, procedure) = (req.service.clone(), req.procedure.clone());
            let started = Instant::now();
            let result = next.handle_oneway(ctx, req).await;
            log_outcome("inbound", &service, &procedure, started, result.as_ref().err());
            result
        })
    }
}

impl UnaryOutboundMiddleware for LoggingMiddleware {
    fn call<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
        next: &'a dyn UnaryOutbound,
    ) -> BoxFuture<'a, Result<Response, Status>> {
        Box::pin(async move {
            let (service, procedure) = (req.service.clone(), req.procedure.clone());
            let started = Instant::now();
            let result = next.call(ctx, req).await;
            log_outcome("outbound", &service, &procedure, started, result.as_ref().err());
            result
        })
    }
}

impl OnewayOutboundMiddleware for LoggingMiddleware {
    fn call_oneway<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
        next: &'a dyn OnewayOutbound,
    ) -> BoxFuture<'a, Result<Ack, Status>> {
        Box::pin(async move {
            let (service, procedure) = (req.service.clone(), req.procedure.clone());
            let started = Instant::now();
            let result = next.call_oneway(ctx, req).await;
            log_outcome("outbound", &service, &procedure, started, result.as_ref().err());
            result
        })
    }
}
