//! Link-level errors.

use std::io;

use thiserror::Error;

/// Error tearing down a link.
///
/// Callers of the RPC surface never see this type: the driver converts link
/// failure into `Unavailable`-class [`weft_api::Status`] values for every
/// pending call. It is reported by driver tasks for logging and tests.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("handshake failed: {0}")]
    Handshake(String),
}
