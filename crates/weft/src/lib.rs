//! weft - Transport-agnostic RPC middleware framework
//!
//! This crate provides a unified API for weft. Users should depend on this
//! crate rather than the individual component crates.

#![deny(unsafe_code)]

// Re-export the whole canonical surface: request model, error taxonomy,
// handler and middleware traits, router, lifecycle, stream handles.
pub use weft_api::*;

// Re-export the reference transport under its own namespace; its main
// entry points are also lifted to the top level for convenience.
pub use weft_stream as stream;
pub use weft_stream::{
    Backoff, Chooser, ConnectionStatus, Inbound, Outbound, Peer, RoundRobin, Single,
    StreamTransport, Subscriber, TransportOptions,
};

// Wire-level types, for code that plugs in below the canonical surface
// (custom dialers, tests, tooling).
pub use weft_wire as wire;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use weft::prelude::*;
/// ```
pub mod prelude {
    pub use weft_api::{
        CallContext, Code, Headers, MapRouter, OnewayOutbound, Request, Response, Router, Status,
        StreamOutbound, UnaryOutbound, oneway, unary,
    };
    pub use weft_stream::{Inbound, Outbound, StreamTransport, TransportOptions};
}
