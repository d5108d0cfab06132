//! The closed error taxonomy shared by every transport.
//!
//! [`Code`] is the fixed set of semantic error codes; [`Status`] is the
//! framework error type carrying a code, an optional application-defined
//! error name, and a message. Transports map `Status` to and from their
//! native status space; see `weft-wire` for the reference mapping.

use std::fmt;

use crate::Request;

/// Semantic error code.
///
/// The set is closed: every transport's native error space must inject onto
/// it, with unmapped native codes falling back to [`Code::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl Code {
    /// Every code, in wire-numbering order.
    pub const ALL: [Code; 17] = [
        Code::Ok,
        Code::Cancelled,
        Code::Unknown,
        Code::InvalidArgument,
        Code::DeadlineExceeded,
        Code::NotFound,
        Code::AlreadyExists,
        Code::PermissionDenied,
        Code::ResourceExhausted,
        Code::FailedPrecondition,
        Code::Aborted,
        Code::OutOfRange,
        Code::Unimplemented,
        Code::Internal,
        Code::Unavailable,
        Code::DataLoss,
        Code::Unauthenticated,
    ];

    /// Stable lowercase name, used in error message formatting.
    pub fn name(self) -> &'static str {
        match self {
            Code::Ok => "ok",
            Code::Cancelled => "cancelled",
            Code::Unknown => "unknown",
            Code::InvalidArgument => "invalid-argument",
            Code::DeadlineExceeded => "deadline-exceeded",
            Code::NotFound => "not-found",
            Code::AlreadyExists => "already-exists",
            Code::PermissionDenied => "permission-denied",
            Code::ResourceExhausted => "resource-exhausted",
            Code::FailedPrecondition => "failed-precondition",
            Code::Aborted => "aborted",
            Code::OutOfRange => "out-of-range",
            Code::Unimplemented => "unimplemented",
            Code::Internal => "internal",
            Code::Unavailable => "unavailable",
            Code::DataLoss => "data-loss",
            Code::Unauthenticated => "unauthenticated",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Framework error: a [`Code`], an optional application error name, and a
/// message.
///
/// The name travels end-to-end through a reserved metadata header so that a
/// client can distinguish application-defined error types without coupling
/// to any transport's native taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: Code,
    name: Option<String>,
    message: String,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            name: None,
            message: message.into(),
        }
    }

    /// Attach an application-defined error name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(Code::Unknown, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(Code::FailedPrecondition, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code:{}", self.code)?;
        if let Some(name) = &self.name {
            write!(f, " name:{name}")?;
        }
        if !self.message.is_empty() {
            write!(f, " message:{}", self.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for Status {}

/// Stable error for an encoding layer that failed to decode a request body.
///
/// Downstream implementations assert on this exact format; do not reword.
pub fn request_body_decode_error(req: &Request, err: &dyn fmt::Display) -> Status {
    Status::invalid_argument(format!(
        "failed to decode {:?} request body for procedure {:?} of service {:?} from caller {:?}: {}",
        req.encoding, req.procedure, req.service, req.caller, err
    ))
}

/// Stable error for an encoding layer that failed to encode a request body.
pub fn request_body_encode_error(req: &Request, err: &dyn fmt::Display) -> Status {
    Status::invalid_argument(format!(
        "failed to encode {:?} request body for procedure {:?} of service {:?} from caller {:?}: {}",
        req.encoding, req.procedure, req.service, req.caller, err
    ))
}

/// Stable error for an encoding layer that failed to encode a response body.
pub fn response_body_encode_error(req: &Request, err: &dyn fmt::Display) -> Status {
    Status::internal(format!(
        "failed to encode {:?} response body for procedure {:?} of service {:?} from caller {:?}: {}",
        req.encoding, req.procedure, req.service, req.caller, err
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_stable() {
        let st = Status::invalid_argument("bad input");
        assert_eq!(st.to_string(), "code:invalid-argument message:bad input");

        let st = Status::internal("boom").with_name("Xception");
        assert_eq!(st.to_string(), "code:internal name:Xception message:boom");
    }

    #[test]
    fn decode_error_format_is_stable() {
        let req = Request::new("caller", "service", "proc").with_encoding("json");
        let st = request_body_decode_error(&req, &"unexpected end of input");
        assert_eq!(
            st.message(),
            "failed to decode \"json\" request body for procedure \"proc\" \
             of service \"service\" from caller \"caller\": unexpected end of input"
        );
        assert_eq!(st.code(), Code::InvalidArgument);
    }
}
