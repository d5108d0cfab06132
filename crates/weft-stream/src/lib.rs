#![deny(unsafe_code)]

//! Reference framed byte-stream transport for the weft RPC framework.
//!
//! Runs weft calls over any async byte stream (TCP by default, anything
//! via a custom [`Dialer`]):
//!
//! - Length-prefixed postcard framing with a hello exchange per link
//! - A driver task per client link correlating requests and responses
//! - [`Peer`] management with a resident connectivity monitor per peer
//!   (dial, observe, exponential-backoff redial) and subscriber
//!   notifications
//! - [`Outbound`]: unary, oneway, and streaming calls through a pluggable
//!   [`Chooser`] ([`Single`] or [`RoundRobin`])
//! - [`Inbound`]: a listener dispatching to handlers through a
//!   [`weft_api::Router`], with middleware and graceful drain on stop
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use weft_api::{CallContext, MapRouter, Request, Response, UnaryOutbound, unary};
//! use weft_stream::{Inbound, Outbound, StreamTransport, TransportOptions};
//!
//! let router = MapRouter::new("echo-service")
//!     .with_unary("echo", unary(|_ctx, req: Request| async move {
//!         Ok(Response::new(req.body))
//!     }));
//! let inbound = Inbound::new("127.0.0.1:4040").with_router(Arc::new(router));
//! inbound.start().await?;
//!
//! let transport = Arc::new(StreamTransport::new(TransportOptions::default()));
//! transport.start().await?;
//! let outbound = Outbound::single(transport.clone(), "127.0.0.1:4040");
//! outbound.start().await?;
//!
//! let ctx = CallContext::new();
//! let req = Request::new("caller", "echo-service", "echo").with_body("hello");
//! let resp = outbound.call(&ctx, req).await?;
//! ```

mod chooser;
mod dialer;
mod errors;
mod framing;
mod inbound;
mod link;
mod outbound;
mod peer;
mod transport;

pub use chooser::{Chooser, Finish, RoundRobin, Single};
pub use dialer::{AsyncStream, Dialer, IoStream, TcpDialer};
pub use errors::ConnectionError;
pub use framing::{DEFAULT_MAX_FRAME_LEN, FrameReader, FrameWriter, frame_pair};
pub use inbound::Inbound;
pub use outbound::Outbound;
pub use peer::{
    Backoff, ConnectionStatus, LinkState, Peer, Subscriber, link_state_to_status,
};
pub use transport::{StreamTransport, TransportOptions};
