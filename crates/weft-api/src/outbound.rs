//! Client-side dispatch traits.
//!
//! A transport's outbound implements one or more of these; middleware wraps
//! them (see [`crate::middleware`]). All three are object-safe so that
//! outbounds can be composed and stored behind `Arc<dyn ...>`.

use crate::{BoxFuture, CallContext, ClientStream, Request, Response, Status};

/// Acknowledgment of a oneway call: the remote accepted the request for
/// processing. Carries no payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ack;

/// Issues unary (request/response) calls.
pub trait UnaryOutbound: Send + Sync {
    fn call<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
    ) -> BoxFuture<'a, Result<Response, Status>>;
}

/// Issues oneway (fire-and-forget with acknowledgment) calls.
pub trait OnewayOutbound: Send + Sync {
    fn call_oneway<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
    ) -> BoxFuture<'a, Result<Ack, Status>>;
}

/// Opens bidirectional streaming calls.
pub trait StreamOutbound: Send + Sync {
    fn call_stream<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: Request,
    ) -> BoxFuture<'a, Result<ClientStream, Status>>;
}
