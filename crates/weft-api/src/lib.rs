#![deny(unsafe_code)]

//! Core abstractions for the weft RPC framework.
//!
//! This crate defines everything a transport implementation and an
//! application share, without committing to any wire format:
//!
//! - The canonical call descriptor ([`Request`], [`Response`], [`Headers`])
//! - The closed error taxonomy ([`Code`], [`Status`])
//! - Handler traits ([`UnaryHandler`], [`OnewayHandler`], [`StreamHandler`])
//!   and the [`Router`] that resolves procedures to them
//! - Inbound and outbound middleware with no-op identities and `apply_*`
//!   decorators
//! - Whole-message stream handles ([`ClientStream`], [`ServerStream`])
//! - The [`Lifecycle`] start/stop state machine shared by every component
//!
//! Transports (see `weft-stream` for the reference one) implement the
//! outbound traits on the client side and drive handlers through a
//! [`Router`] on the server side. Encoding layers sit entirely above this
//! boundary and only ever touch `Request::body` bytes.

mod context;
mod errors;
mod handlers;
mod headers;
mod lifecycle;
mod logging;
mod middleware;
mod outbound;
mod request;
mod router;
mod stream;

pub use context::CallContext;
pub use errors::{
    Code, Status, request_body_decode_error, request_body_encode_error,
    response_body_encode_error,
};
pub use handlers::{BoxFuture, OnewayHandler, UnaryHandler, StreamHandler, oneway, unary};
pub use headers::Headers;
pub use lifecycle::{Lifecycle, LifecycleState};
pub use logging::LoggingMiddleware;
pub use middleware::{
    NopMiddleware, OnewayInbound, OnewayOutboundMiddleware, StreamInbound,
    StreamOutboundMiddleware, UnaryInbound, UnaryInboundChain, UnaryOutboundChain,
    UnaryOutboundMiddleware, apply_oneway_inbound, apply_oneway_outbound, apply_stream_inbound,
    apply_stream_outbound, apply_unary_inbound, apply_unary_outbound,
};
pub use outbound::{Ack, OnewayOutbound, StreamOutbound, UnaryOutbound};
pub use request::{Request, Response};
pub use router::{HandlerKind, HandlerSpec, MapRouter, Procedure, Router};
pub use stream::{ClientStream, ServerStream, StreamItem};
