//! Protocol messages.

use serde::{Deserialize, Serialize};

use crate::WireStatus;

/// Protocol version carried in the hello exchange. Links between
/// mismatched versions are refused.
pub const PROTOCOL_VERSION: u32 = 1;

/// Wire metadata: ordered key-value pairs.
///
/// Keys are lowercase on the wire; duplicate keys are representable (and
/// rejected where the model treats a key as single-valued, see
/// [`crate::metadata_to_request`]).
pub type Metadata = Vec<(String, String)>;

/// The kind of call a `Request` opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallKind {
    Unary,
    Oneway,
    Stream,
}

/// Protocol message.
///
/// Variant order is wire-significant (postcard enum discriminants).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// First message in each direction on a new link.
    Hello { version: u32, metadata: Metadata },

    /// Opens a call. `id` is unique per link, assigned by the caller.
    /// `path` is `/<service>/<method>` (see [`crate::procedure_to_path`]).
    /// `ttl_ms` is the caller's remaining deadline budget, if any.
    Request {
        id: u64,
        path: String,
        kind: CallKind,
        ttl_ms: Option<u64>,
        metadata: Metadata,
        body: Vec<u8>,
    },

    /// Completes a unary or streaming call. A non-zero status code means
    /// the call failed; trailers carry response headers and the error-name
    /// side channel.
    Response {
        id: u64,
        status: WireStatus,
        trailers: Metadata,
        body: Vec<u8>,
    },

    /// Acknowledges a oneway call: the request was dispatched.
    Ack { id: u64 },

    /// One whole stream message, in either direction.
    Data { id: u64, body: Vec<u8> },

    /// Half-close of the client's sending direction of a stream.
    CloseSend { id: u64 },

    /// Link teardown with a human-readable reason.
    Goodbye { reason: String },
}

/// Error encoding or decoding a wire message.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("postcard: {0}")]
    Postcard(#[from] postcard::Error),
}

/// Encode a message to its wire bytes (postcard, no framing).
pub fn encode(msg: &Message) -> Result<Vec<u8>, WireError> {
    Ok(postcard::to_allocvec(msg)?)
}

/// Decode a message from its wire bytes.
pub fn decode(bytes: &[u8]) -> Result<Message, WireError> {
    Ok(postcard::from_bytes(bytes)?)
}
