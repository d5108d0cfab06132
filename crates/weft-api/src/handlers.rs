//! Handler traits implemented by application code.
//!
//! All three traits are object-safe (handlers are stored as `Arc<dyn ...>`
//! in routing tables), so their methods return boxed futures rather than
//! using `async fn` in the trait.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::{CallContext, Request, Response, ServerStream, Status};

/// Boxed future used by object-safe traits throughout the framework.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Handles a unary (request/response) call.
pub trait UnaryHandler: Send + Sync {
    fn handle<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
    ) -> BoxFuture<'a, Result<Response, Status>>;
}

/// Handles a oneway (fire-and-forget) call.
///
/// The transport acknowledges the call once the handler has been
/// dispatched; the handler's own result is not reported to the caller.
pub trait OnewayHandler: Send + Sync {
    fn handle_oneway<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
    ) -> BoxFuture<'a, Result<(), Status>>;
}

/// Handles a bidirectional streaming call.
pub trait StreamHandler: Send + Sync {
    fn handle_stream<'a>(&'a self, stream: ServerStream) -> BoxFuture<'a, Result<(), Status>>;
}

struct UnaryFn<F>(F);

impl<F, Fut> UnaryHandler for UnaryFn<F>
where
    F: Fn(CallContext, Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, Status>> + Send + 'static,
{
    fn handle<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
    ) -> BoxFuture<'a, Result<Response, Status>> {
        Box::pin((self.0)(ctx.clone(), req))
    }
}

/// Wrap an async closure as a [`UnaryHandler`].
pub fn unary<F, Fut>(f: F) -> Arc<dyn UnaryHandler>
where
    F: Fn(CallContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, Status>> + Send + 'static,
{
    Arc::new(UnaryFn(f))
}

struct OnewayFn<F>(F);

impl<F, Fut> OnewayHandler for OnewayFn<F>
where
    F: Fn(CallContext, Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), Status>> + Send + 'static,
{
    fn handle_oneway<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
    ) -> BoxFuture<'a, Result<(), Status>> {
        Box::pin((self.0)(ctx.clone(), req))
    }
}

/// Wrap an async closure as an [`OnewayHandler`].
pub fn oneway<F, Fut>(f: F) -> Arc<dyn OnewayHandler>
where
    F: Fn(CallContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Status>> + Send + 'static,
{
    Arc::new(OnewayFn(f))
}
