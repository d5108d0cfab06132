//! Inbound and outbound middleware.
//!
//! Each middleware trait has a single `handle`/`call` method taking the
//! next element in the chain. `apply_*` wraps a handler or outbound in one
//! middleware; the `*Chain` types compose several, first added running
//! first. [`NopMiddleware`] is the identity for every kind and is what a
//! transport uses when nothing is configured.
//!
//! The framework imposes no ordering policy: wrap in the order you want.

use std::sync::Arc;

use crate::{
    Ack, BoxFuture, CallContext, ClientStream, OnewayHandler, OnewayOutbound, Request, Response,
    ServerStream, Status, StreamHandler, StreamOutbound, UnaryHandler, UnaryOutbound,
};

// ============================================================================
// Inbound middleware traits
// ============================================================================

/// Decorates unary handlers on the server side.
pub trait UnaryInbound: Send + Sync {
    fn handle<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
        next: &'a dyn UnaryHandler,
    ) -> BoxFuture<'a, Result<Response, Status>>;
}

/// Decorates oneway handlers on the server side.
pub trait OnewayInbound: Send + Sync {
    fn handle_oneway<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
        next: &'a dyn OnewayHandler,
    ) -> BoxFuture<'a, Result<(), Status>>;
}

/// Decorates stream handlers on the server side.
pub trait StreamInbound: Send + Sync {
    fn handle_stream<'a>(
        &'a self,
        stream: ServerStream,
        next: &'a dyn StreamHandler,
    ) -> BoxFuture<'a, Result<(), Status>>;
}

// ============================================================================
// Outbound middleware traits
// ============================================================================

/// Decorates unary outbounds on the client side.
pub trait UnaryOutboundMiddleware: Send + Sync {
    fn call<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
        next: &'a dyn UnaryOutbound,
    ) -> BoxFuture<'a, Result<Response, Status>>;
}

/// Decorates oneway outbounds on the client side.
pub trait OnewayOutboundMiddleware: Send + Sync {
    fn call_oneway<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
        next: &'a dyn OnewayOutbound,
    ) -> BoxFuture<'a, Result<Ack, Status>>;
}

/// Decorates stream outbounds on the client side.
pub trait StreamOutboundMiddleware: Send + Sync {
    fn call_stream<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
        next: &'a dyn StreamOutbound,
    ) -> BoxFuture<'a, Result<ClientStream, Status>>;
}

// ============================================================================
// No-op identity
// ============================================================================

/// Middleware that forwards to `next` unchanged, for every kind.
///
/// Used as the identity when no middleware is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopMiddleware;

impl UnaryInbound for NopMiddleware {
    fn handle<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
        next: &'a dyn UnaryHandler,
    ) -> BoxFuture<'a, Result<Response, Status>> {
        next.handle(ctx, req)
    }
}

impl OnewayInbound for NopMiddleware {
    fn handle_oneway<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
        next: &'a dyn OnewayHandler,
    ) -> BoxFuture<'a, Result<(), Status>> {
        next.handle_oneway(ctx, req)
    }
}

impl StreamInbound for NopMiddleware {
    fn handle_stream<'a>(
        &'a self,
        stream: ServerStream,
        next: &'a dyn StreamHandler,
    ) -> BoxFuture<'a, Result<(), Status>> {
        next.handle_stream(stream)
    }
}

impl UnaryOutboundMiddleware for NopMiddleware {
    fn call<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
        next: &'a dyn UnaryOutbound,
    ) -> BoxFuture<'a, Result<Response, Status>> {
        next.call(ctx, req)
    }
}

impl OnewayOutboundMiddleware for NopMiddleware {
    fn call_oneway<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
        next: &'a dyn OnewayOutbound,
    ) -> BoxFuture<'a, Result<Ack, Status>> {
        next.call_oneway(ctx, req)
    }
}

impl StreamOutboundMiddleware for NopMiddleware {
    fn call_stream<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
        next: &'a dyn StreamOutbound,
    ) -> BoxFuture<'a, Result<ClientStream, Status>> {
        next.call_stream(ctx, req)
    }
}

// ============================================================================
// apply_* decorators
// ============================================================================

struct UnaryInboundWrapped {
    middleware: Arc<dyn UnaryInbound>,
    handler: Arc<dyn UnaryHandler>,
}

impl UnaryHandler for UnaryInboundWrapped {
    fn handle<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
    ) -> BoxFuture<'a, Result<Response, Status>> {
        self.middleware.handle(ctx, req, &*self.handler)
    }
}

/// Wrap a unary handler in one middleware.
pub fn apply_unary_inbound(
    handler: Arc<dyn UnaryHandler>,
    middleware: Arc<dyn UnaryInbound>,
) -> Arc<dyn UnaryHandler> {
    Arc::new(UnaryInboundWrapped {
        middleware,
        handler,
    })
}

struct OnewayInboundWrapped {
    middleware: Arc<dyn OnewayInbound>,
    handler: Arc<dyn OnewayHandler>,
}

impl OnewayHandler for OnewayInboundWrapped {
    fn handle_oneway<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
    ) -> BoxFuture<'a, Result<(), Status>> {
        self.middleware.handle_oneway(ctx, req, &*self.handler)
    }
}

/// Wrap a oneway handler in one middleware.
pub fn apply_oneway_inbound(
    handler: Arc<dyn OnewayHandler>,
    middleware: Arc<dyn OnewayInbound>,
) -> Arc<dyn OnewayHandler> {
    Arc::new(OnewayInboundWrapped {
        middleware,
        handler,
    })
}

struct StreamInboundWrapped {
    middleware: Arc<dyn StreamInbound>,
    handler: Arc<dyn StreamHandler>,
}

impl StreamHandler for StreamInboundWrapped {
    fn handle_stream<'a>(&'a self, stream: ServerStream) -> BoxFuture<'a, Result<(), Status>> {
        self.middleware.handle_stream(stream, &*self.handler)
    }
}

/// Wrap a stream handler in one middleware.
pub fn apply_stream_inbound(
    handler: Arc<dyn StreamHandler>,
    middleware: Arc<dyn StreamInbound>,
) -> Arc<dyn StreamHandler> {
    Arc::new(StreamInboundWrapped {
        middleware,
        handler,
    })
}

struct UnaryOutboundWrapped {
    middleware: Arc<dyn UnaryOutboundMiddleware>,
    outbound: Arc<dyn UnaryOutbound>,
}

impl UnaryOutbound for UnaryOutboundWrapped {
    fn call<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
    ) -> BoxFuture<'a, Result<Response, Status>> {
        self.middleware.call(ctx, req, &*self.outbound)
    }
}

/// Wrap a unary outbound in one middleware.
pub fn apply_unary_outbound(
    outbound: Arc<dyn UnaryOutbound>,
    middleware: Arc<dyn UnaryOutboundMiddleware>,
) -> Arc<dyn UnaryOutbound> {
    Arc::new(UnaryOutboundWrapped {
        middleware,
        outbound,
    })
}

struct OnewayOutboundWrapped {
    middleware: Arc<dyn OnewayOutboundMiddleware>,
    outbound: Arc<dyn OnewayOutbound>,
}

impl OnewayOutbound for OnewayOutboundWrapped {
    fn call_oneway<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
    ) -> BoxFuture<'a, Result<Ack, Status>> {
        self.middleware.call_oneway(ctx, req, &*self.outbound)
    }
}

/// Wrap a oneway outbound in one middleware.
pub fn apply_oneway_outbound(
    outbound: Arc<dyn OnewayOutbound>,
    middleware: Arc<dyn OnewayOutboundMiddleware>,
) -> Arc<dyn OnewayOutbound> {
    Arc::new(OnewayOutboundWrapped {
        middleware,
        outbound,
    })
}

struct StreamOutboundWrapped {
    middleware: Arc<dyn StreamOutboundMiddleware>,
    outbound: Arc<dyn StreamOutbound>,
}

impl StreamOutbound for StreamOutboundWrapped {
    fn call_stream<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
    ) -> BoxFuture<'a, Result<ClientStream, Status>> {
        self.middleware.call_stream(ctx, req, &*self.outbound)
    }
}

/// Wrap a stream outbound in one middleware.
pub fn apply_stream_outbound(
    outbound: Arc<dyn StreamOutbound>,
    middleware: Arc<dyn StreamOutboundMiddleware>,
) -> Arc<dyn StreamOutbound> {
    Arc::new(StreamOutboundWrapped {
        middleware,
        outbound,
    })
}

// ============================================================================
// Chains
// ============================================================================

/// Compose several unary inbound middleware into one.
///
/// Middleware runs in the order added; the innermost handler runs last.
#[derive(Default)]
pub struct UnaryInboundChain {
    layers: Vec<Arc<dyn UnaryInbound>>,
}

impl UnaryInboundChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<M: UnaryInbound + 'static>(mut self, middleware: M) -> Self {
        self.layers.push(Arc::new(middleware));
        self
    }

    pub fn with_arc(mut self, middleware: Arc<dyn UnaryInbound>) -> Self {
        self.layers.push(middleware);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

struct UnaryChainStep<'c> {
    rest: &'c [Arc<dyn UnaryInbound>],
    tail: &'c dyn UnaryHandler,
}

impl UnaryHandler for UnaryChainStep<'_> {
    fn handle<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
    ) -> BoxFuture<'a, Result<Response, Status>> {
        match self.rest.split_first() {
            None => self.tail.handle(ctx, req),
            Some((middleware, rest)) => Box::pin(async move {
                let next = UnaryChainStep {
                    rest,
                    tail: self.tail,
                };
                middleware.handle(ctx, req, &next).await
            }),
        }
    }
}

impl UnaryInbound for UnaryInboundChain {
    fn handle<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
        next: &'a dyn UnaryHandler,
    ) -> BoxFuture<'a, Result<Response, Status>> {
        Box::pin(async move {
            let step = UnaryChainStep {
                rest: &self.layers,
                tail: next,
            };
            step.handle(ctx, req).await
        })
    }
}

/// Compose several unary outbound middleware into one.
///
/// Middleware runs in the order added; the real outbound runs last.
#[derive(Default)]
pub struct UnaryOutboundChain {
    layers: Vec<Arc<dyn UnaryOutboundMiddleware>>,
}

impl UnaryOutboundChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<M: UnaryOutboundMiddleware + 'static>(mut self, middleware: M) -> Self {
        self.layers.push(Arc::new(middleware));
        self
    }

    pub fn with_arc(mut self, middleware: Arc<dyn UnaryOutboundMiddleware>) -> Self {
        self.layers.push(middleware);
        self
    }
}

struct OutboundChainStep<'c> {
    rest: &'c [Arc<dyn UnaryOutboundMiddleware>],
    tail: &'c dyn UnaryOutbound,
}

impl UnaryOutbound for OutboundChainStep<'_> {
    fn call<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
    ) -> BoxFuture<'a, Result<Response, Status>> {
        match self.rest.split_first() {
            None => self.tail.call(ctx, req),
            Some((middleware, rest)) => Box::pin(async move {
                let next = OutboundChainStep {
                    rest,
                    tail: self.tail,
                };
                middleware.call(ctx, req, &next).await
            }),
        }
    }
}

impl UnaryOutboundMiddleware for UnaryOutboundChain {
    fn call<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
        next: &'a dyn UnaryOutbound,
    ) -> BoxFuture<'a, Result<Response, Status>> {
        Box::pin(async move {
            let step = OutboundChainStep {
                rest: &self.layers,
                tail: next,
            };
            step.call(ctx, req).await
        })
    }
}
