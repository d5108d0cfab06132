//! Pluggable connection establishment.
//!
//! Peers dial through a [`Dialer`] so that tests (and alternative
//! byte-stream transports like unix sockets) can swap the connection
//! mechanism without touching peer management. [`TcpDialer`] is the
//! default.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use weft_api::BoxFuture;

/// Object-safe bound for the byte streams links run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> AsyncStream for T {}

/// A boxed, established byte stream.
pub type IoStream = Box<dyn AsyncStream>;

/// A factory that establishes new byte-stream connections on demand.
///
/// Called on the initial dial and after each disconnect.
pub trait Dialer: Send + Sync {
    fn dial<'a>(&'a self, addr: &'a str) -> BoxFuture<'a, io::Result<IoStream>>;
}

/// Dials TCP with `TCP_NODELAY` set.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    fn dial<'a>(&'a self, addr: &'a str) -> BoxFuture<'a, io::Result<IoStream>> {
        Box::pin(async move {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream) as IoStream)
        })
    }
}
