//! Wire status codes and error translation.
//!
//! Wire codes are plain integers so that unknown values are representable;
//! the mapping to [`Code`] is total and onto in both directions, with
//! unmapped wire values falling back to [`Code::Unknown`].

use serde::{Deserialize, Serialize};

use weft_api::{Code, Status};

use crate::{Metadata, reserved};

/// Wire status code values, numbered identically to the canonical
/// [`Code`] ordering.
pub mod wire_code {
    pub const OK: u32 = 0;
    pub const CANCELLED: u32 = 1;
    pub const UNKNOWN: u32 = 2;
    pub const INVALID_ARGUMENT: u32 = 3;
    pub const DEADLINE_EXCEEDED: u32 = 4;
    pub const NOT_FOUND: u32 = 5;
    pub const ALREADY_EXISTS: u32 = 6;
    pub const PERMISSION_DENIED: u32 = 7;
    pub const RESOURCE_EXHAUSTED: u32 = 8;
    pub const FAILED_PRECONDITION: u32 = 9;
    pub const ABORTED: u32 = 10;
    pub const OUT_OF_RANGE: u32 = 11;
    pub const UNIMPLEMENTED: u32 = 12;
    pub const INTERNAL: u32 = 13;
    pub const UNAVAILABLE: u32 = 14;
    pub const DATA_LOSS: u32 = 15;
    pub const UNAUTHENTICATED: u32 = 16;
}

/// Status carried on a wire `Response`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireStatus {
    pub code: u32,
    pub message: String,
}

impl WireStatus {
    pub fn ok() -> Self {
        Self {
            code: wire_code::OK,
            message: String::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == wire_code::OK
    }
}

/// Map a canonical code to its wire value. Total.
pub fn code_to_wire(code: Code) -> u32 {
    match code {
        Code::Ok => wire_code::OK,
        Code::Cancelled => wire_code::CANCELLED,
        Code::Unknown => wire_code::UNKNOWN,
        Code::InvalidArgument => wire_code::INVALID_ARGUMENT,
        Code::DeadlineExceeded => wire_code::DEADLINE_EXCEEDED,
        Code::NotFound => wire_code::NOT_FOUND,
        Code::AlreadyExists => wire_code::ALREADY_EXISTS,
        Code::PermissionDenied => wire_code::PERMISSION_DENIED,
        Code::ResourceExhausted => wire_code::RESOURCE_EXHAUSTED,
        Code::FailedPrecondition => wire_code::FAILED_PRECONDITION,
        Code::Aborted => wire_code::ABORTED,
        Code::OutOfRange => wire_code::OUT_OF_RANGE,
        Code::Unimplemented => wire_code::UNIMPLEMENTED,
        Code::Internal => wire_code::INTERNAL,
        Code::Unavailable => wire_code::UNAVAILABLE,
        Code::DataLoss => wire_code::DATA_LOSS,
        Code::Unauthenticated => wire_code::UNAUTHENTICATED,
    }
}

/// Map a wire value back to a canonical code. Unmapped values become
/// [`Code::Unknown`].
pub fn code_from_wire(value: u32) -> Code {
    match value {
        wire_code::OK => Code::Ok,
        wire_code::CANCELLED => Code::Cancelled,
        wire_code::UNKNOWN => Code::Unknown,
        wire_code::INVALID_ARGUMENT => Code::InvalidArgument,
        wire_code::DEADLINE_EXCEEDED => Code::DeadlineExceeded,
        wire_code::NOT_FOUND => Code::NotFound,
        wire_code::ALREADY_EXISTS => Code::AlreadyExists,
        wire_code::PERMISSION_DENIED => Code::PermissionDenied,
        wire_code::RESOURCE_EXHAUSTED => Code::ResourceExhausted,
        wire_code::FAILED_PRECONDITION => Code::FailedPrecondition,
        wire_code::ABORTED => Code::Aborted,
        wire_code::OUT_OF_RANGE => Code::OutOfRange,
        wire_code::UNIMPLEMENTED => Code::Unimplemented,
        wire_code::INTERNAL => Code::Internal,
        wire_code::UNAVAILABLE => Code::Unavailable,
        wire_code::DATA_LOSS => Code::DataLoss,
        wire_code::UNAUTHENTICATED => Code::Unauthenticated,
        _ => Code::Unknown,
    }
}

/// Translate a handler's [`Status`] to its wire representation.
///
/// Returns the wire status and, for named errors, the error-name trailer
/// entry. The wire message composes name and message: name alone when the
/// message is empty, `"name: message"` when both are set. If the name
/// equals the message, the distinction collapses on the wire (accepted
/// ambiguity; the reverse translation yields an empty message).
pub fn status_to_wire(status: &Status) -> (WireStatus, Option<(String, String)>) {
    let code = code_to_wire(status.code());
    match status.name() {
        None => (
            WireStatus {
                code,
                message: status.message().to_owned(),
            },
            None,
        ),
        Some(name) => {
            let message = if status.message().is_empty() {
                name.to_owned()
            } else {
                format!("{name}: {}", status.message())
            };
            (
                WireStatus { code, message },
                Some((reserved::ERROR_NAME.to_owned(), name.to_owned())),
            )
        }
    }
}

/// Translate a wire status plus trailers back to a [`Status`].
///
/// The exact inverse of [`status_to_wire`]: the `"name: "` prefix is
/// stripped only when the message starts with exactly that prefix, and a
/// message equal to the name decodes to an empty message.
pub fn wire_to_status(wire: &WireStatus, trailers: &Metadata) -> Status {
    let code = code_from_wire(wire.code);
    let name = trailers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(reserved::ERROR_NAME))
        .map(|(_, v)| v.clone());
    match name {
        None => Status::new(code, wire.message.clone()),
        Some(name) => {
            let prefix = format!("{name}: ");
            let message = if wire.message == name {
                String::new()
            } else if let Some(rest) = wire.message.strip_prefix(&prefix) {
                rest.to_owned()
            } else {
                wire.message.clone()
            };
            Status::new(code, message).with_name(name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_mapping_is_total_and_onto() {
        for code in Code::ALL {
            assert_eq!(code_from_wire(code_to_wire(code)), code);
        }
        // Every wire value 0..=16 maps to a distinct code.
        let mut seen = std::collections::HashSet::new();
        for value in 0..=16u32 {
            assert!(seen.insert(code_from_wire(value)));
        }
    }

    #[test]
    fn unmapped_wire_codes_fall_back_to_unknown() {
        assert_eq!(code_from_wire(17), Code::Unknown);
        assert_eq!(code_from_wire(u32::MAX), Code::Unknown);
    }

    #[test]
    fn named_errors_round_trip() {
        let cases = [
            Status::internal("boom").with_name("Xception"),
            Status::not_found("").with_name("MissingThing"),
            Status::invalid_argument("plain message"),
            Status::unknown(""),
        ];
        for status in cases {
            let (wire, trailer) = status_to_wire(&status);
            let mut trailers = Metadata::new();
            if let Some(entry) = trailer {
                trailers.push(entry);
            }
            assert_eq!(wire_to_status(&wire, &trailers), status);
        }
    }

    #[test]
    fn name_equal_to_message_collapses() {
        // Documented ambiguity: the wire cannot distinguish
        // name == message from name with an empty message.
        let status = Status::internal("Xception").with_name("Xception");
        let (wire, trailer) = status_to_wire(&status);
        assert_eq!(wire.message, "Xception: Xception");
        let trailers = vec![trailer.unwrap()];
        assert_eq!(
            wire_to_status(&wire, &trailers),
            Status::internal("Xception").with_name("Xception")
        );

        // The lossy case is a name whose message is empty vs. absent.
        let status = Status::internal("").with_name("Xception");
        let (wire, _) = status_to_wire(&status);
        assert_eq!(wire.message, "Xception");
    }
}
