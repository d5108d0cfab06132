//! Canonical, transport-independent call descriptors.

use bytes::Bytes;

use crate::{Headers, Status};

/// Canonical in-memory representation of an RPC call.
///
/// Constructed per call by the caller (outbound side) or by metadata
/// translation (inbound side); treated as immutable once dispatch begins.
/// The body is an opaque, whole-message payload: encoding layers sit above
/// this type and only produce/consume `body` bytes, tagged by `encoding`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    /// Name of the calling service. Required at dispatch.
    pub caller: String,
    /// Name of the target service. Required at dispatch.
    pub service: String,
    /// Logical procedure name, scoped to the target service. Required.
    pub procedure: String,
    /// Payload encoding tag ("json", "proto", ...). May be empty.
    pub encoding: String,
    /// Routing hint consumed by peer choosers, opaque to the transport.
    pub shard_key: String,
    /// Routing hint consumed by peer choosers, opaque to the transport.
    pub routing_key: String,
    /// Routing hint consumed by peer choosers, opaque to the transport.
    pub routing_delegate: String,
    /// Application headers. Must not collide with reserved header names;
    /// the collision is rejected at translation time.
    pub headers: Headers,
    /// Opaque application payload.
    pub body: Bytes,
}

impl Request {
    pub fn new(
        caller: impl Into<String>,
        service: impl Into<String>,
        procedure: impl Into<String>,
    ) -> Self {
        Self {
            caller: caller.into(),
            service: service.into(),
            procedure: procedure.into(),
            ..Self::default()
        }
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = encoding.into();
        self
    }

    pub fn with_shard_key(mut self, shard_key: impl Into<String>) -> Self {
        self.shard_key = shard_key.into();
        self
    }

    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = routing_key.into();
        self
    }

    pub fn with_routing_delegate(mut self, routing_delegate: impl Into<String>) -> Self {
        self.routing_delegate = routing_delegate.into();
        self
    }

    pub fn with_header(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Check the fields every transport requires before dispatch.
    ///
    /// Error messages are stable; tests assert on them.
    pub fn validate(&self) -> Result<(), Status> {
        if self.caller.is_empty() {
            return Err(Status::invalid_argument("missing caller name"));
        }
        if self.service.is_empty() {
            return Err(Status::invalid_argument("missing service name"));
        }
        if self.procedure.is_empty() {
            return Err(Status::invalid_argument("missing procedure"));
        }
        Ok(())
    }
}

/// Result descriptor for a completed unary call.
///
/// Constructed once when the call completes; never mutated after return.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            headers: Headers::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }
}
