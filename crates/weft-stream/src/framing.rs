//! Length-prefixed framing over async byte streams.
//!
//! Every frame is a 4-byte big-endian length followed by one postcard-
//! encoded [`Message`]. Reading accumulates into an internal buffer so the
//! receive future is safe to drop between polls (the driver selects over
//! it), and the reader/writer halves are split so handler tasks can write
//! responses while the serve loop keeps reading.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use weft_wire::Message;

/// Default cap on a single frame, metadata and body included.
pub const DEFAULT_MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// How long each side waits for the peer's hello.
pub(crate) const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Reading half of a framed link.
pub struct FrameReader<R> {
    stream: R,
    buf: Vec<u8>,
    max_frame_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(stream: R, max_frame_len: usize) -> Self {
        Self {
            stream,
            buf: Vec::new(),
            max_frame_len,
        }
    }

    /// Receive the next message.
    ///
    /// Returns `Ok(None)` on clean end of stream. Cancel-safe: partial
    /// frames stay in the internal buffer across dropped futures.
    pub async fn recv(&mut self) -> io::Result<Option<Message>> {
        loop {
            if self.buf.len() >= 4 {
                let len = u32::from_be_bytes(self.buf[..4].try_into().unwrap()) as usize;
                if len > self.max_frame_len {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("frame of {len} bytes exceeds limit of {}", self.max_frame_len),
                    ));
                }
                if self.buf.len() >= 4 + len {
                    let msg = weft_wire::decode(&self.buf[4..4 + len])
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    self.buf.drain(..4 + len);
                    return Ok(Some(msg));
                }
            }
            let mut tmp = [0u8; 4096];
            let n = self.stream.read(&mut tmp).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-frame",
                ));
            }
            self.buf.extend_from_slice(&tmp[..n]);
        }
    }
}

/// Writing half of a framed link.
pub struct FrameWriter<W> {
    stream: W,
    max_frame_len: usize,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(stream: W, max_frame_len: usize) -> Self {
        Self {
            stream,
            max_frame_len,
        }
    }

    /// Send one message and flush it.
    pub async fn send(&mut self, msg: &Message) -> io::Result<()> {
        let payload =
            weft_wire::encode(msg).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if payload.len() > self.max_frame_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "frame of {} bytes exceeds limit of {}",
                    payload.len(),
                    self.max_frame_len
                ),
            ));
        }
        self.stream
            .write_all(&(payload.len() as u32).to_be_bytes())
            .await?;
        self.stream.write_all(&payload).await?;
        self.stream.flush().await
    }
}

/// Split a stream into framed reader and writer halves.
pub fn frame_pair<S: AsyncRead + AsyncWrite>(
    stream: S,
    max_frame_len: usize,
) -> (FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>) {
    let (r, w) = tokio::io::split(stream);
    (
        FrameReader::new(r, max_frame_len),
        FrameWriter::new(w, max_frame_len),
    )
}
