#![deny(unsafe_code)]

//! Wire-level types for the weft stream transport.
//!
//! Everything that crosses a link is a [`Message`], encoded with postcard.
//! Variant order is wire-significant. This crate also owns the three
//! translation layers between the wire and the canonical model:
//!
//! - request/metadata translation with reserved-key enforcement
//!   ([`request_to_metadata`], [`metadata_to_request`])
//! - the total, onto mapping between [`weft_api::Code`] and wire status
//!   codes ([`code_to_wire`], [`code_from_wire`]) plus named-error
//!   propagation ([`status_to_wire`], [`wire_to_status`])
//! - procedure-name ↔ wire-path escaping ([`procedure_to_path`],
//!   [`path_to_procedure`])

mod headers;
mod message;
mod path;
mod status;

pub use headers::{
    TRACE_ID, metadata_to_request, request_to_metadata, reserved, trace_id_from_metadata,
    trailers_to_headers,
};
pub use message::{CallKind, Message, Metadata, PROTOCOL_VERSION, WireError, decode, encode};
pub use path::{
    DEFAULT_METHOD, PathError, escape_segment, path_to_procedure, procedure_to_path,
    unescape_segment,
};
pub use status::{WireStatus, code_from_wire, code_to_wire, status_to_wire, wire_code, wire_to_status};
