//! Whole-message stream handles.
//!
//! Streaming calls move entire in-memory messages; there is no chunking or
//! credit-based flow control, only the coarse buffering of the underlying
//! channels. Transports own the channel ends opposite to these handles and
//! bridge them to the wire.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{CallContext, Request, Status};

/// One item travelling in one direction of a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// A whole application message.
    Message(Bytes),
    /// The sending side is done; no more messages will follow.
    Close,
}

/// Client-side handle to an open streaming call.
///
/// Send whole messages with [`send_msg`](Self::send_msg), signal the end of
/// the request stream with [`close_send`](Self::close_send), and receive
/// server messages with [`recv_msg`](Self::recv_msg) until it returns
/// `Ok(None)` (clean completion) or an error (the server's final status).
pub struct ClientStream {
    outgoing: mpsc::Sender<StreamItem>,
    incoming: mpsc::Receiver<Result<StreamItem, Status>>,
    finished: bool,
}

impl ClientStream {
    /// Used by transports to construct the caller-facing handle.
    pub fn new(
        outgoing: mpsc::Sender<StreamItem>,
        incoming: mpsc::Receiver<Result<StreamItem, Status>>,
    ) -> Self {
        Self {
            outgoing,
            incoming,
            finished: false,
        }
    }

    /// Send one whole message to the server.
    pub async fn send_msg(&self, body: impl Into<Bytes>) -> Result<(), Status> {
        self.outgoing
            .send(StreamItem::Message(body.into()))
            .await
            .map_err(|_| Status::unavailable("stream closed"))
    }

    /// Signal that no more messages will be sent.
    ///
    /// Dropping the handle closes the sending side implicitly; this makes
    /// it explicit without ending the receiving side.
    pub async fn close_send(&self) -> Result<(), Status> {
        self.outgoing
            .send(StreamItem::Close)
            .await
            .map_err(|_| Status::unavailable("stream closed"))
    }

    /// Receive the next whole message from the server.
    ///
    /// `Ok(None)` means the server finished cleanly; an error is the
    /// server's final status (or a transport failure).
    pub async fn recv_msg(&mut self) -> Result<Option<Bytes>, Status> {
        if self.finished {
            return Ok(None);
        }
        match self.incoming.recv().await {
            Some(Ok(StreamItem::Message(body))) => Ok(Some(body)),
            Some(Ok(StreamItem::Close)) => {
                self.finished = true;
                Ok(None)
            }
            Some(Err(status)) => {
                self.finished = true;
                Err(status)
            }
            None => {
                self.finished = true;
                Err(Status::unavailable("stream closed unexpectedly"))
            }
        }
    }
}

/// Server-side handle to an open streaming call, passed to the
/// [`StreamHandler`](crate::StreamHandler).
pub struct ServerStream {
    ctx: CallContext,
    request: Request,
    incoming: mpsc::Receiver<StreamItem>,
    outgoing: mpsc::Sender<StreamItem>,
    half_closed: bool,
}

impl ServerStream {
    /// Used by transports to construct the handler-facing handle. The
    /// request carries call metadata; its body is empty for streams.
    pub fn new(
        ctx: CallContext,
        request: Request,
        incoming: mpsc::Receiver<StreamItem>,
        outgoing: mpsc::Sender<StreamItem>,
    ) -> Self {
        Self {
            ctx,
            request,
            incoming,
            outgoing,
            half_closed: false,
        }
    }

    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Receive the next whole message from the client.
    ///
    /// `Ok(None)` means the client half-closed; an error means the client
    /// went away without closing.
    pub async fn recv_msg(&mut self) -> Result<Option<Bytes>, Status> {
        if self.half_closed {
            return Ok(None);
        }
        match self.incoming.recv().await {
            Some(StreamItem::Message(body)) => Ok(Some(body)),
            Some(StreamItem::Close) => {
                self.half_closed = true;
                Ok(None)
            }
            None => {
                self.half_closed = true;
                Err(Status::cancelled("stream closed by peer"))
            }
        }
    }

    /// Send one whole message to the client.
    pub async fn send_msg(&self, body: impl Into<Bytes>) -> Result<(), Status> {
        self.outgoing
            .send(StreamItem::Message(body.into()))
            .await
            .map_err(|_| Status::unavailable("stream closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn client_stream_round_trip() {
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let (in_tx, in_rx) = mpsc::channel(4);
        let mut stream = ClientStream::new(out_tx, in_rx);

        stream.send_msg("one").await.unwrap();
        stream.close_send().await.unwrap();
        assert_eq!(
            out_rx.recv().await,
            Some(StreamItem::Message(Bytes::from("one")))
        );
        assert_eq!(out_rx.recv().await, Some(StreamItem::Close));

        in_tx
            .send(Ok(StreamItem::Message(Bytes::from("two"))))
            .await
            .unwrap();
        in_tx.send(Ok(StreamItem::Close)).await.unwrap();
        assert_eq!(stream.recv_msg().await.unwrap(), Some(Bytes::from("two")));
        assert_eq!(stream.recv_msg().await.unwrap(), None);
        // Finished streams keep reporting completion.
        assert_eq!(stream.recv_msg().await.unwrap(), None);
    }

    #[tokio::test]
    async fn server_stream_reports_peer_loss() {
        let (_out_tx, out_rx_unused) = mpsc::channel::<StreamItem>(1);
        let (in_tx, in_rx) = mpsc::channel(1);
        let mut stream = ServerStream::new(
            CallContext::new(),
            Request::new("c", "s", "p"),
            in_rx,
            _out_tx.clone(),
        );
        drop(out_rx_unused);
        drop(in_tx);
        let err = stream.recv_msg().await.unwrap_err();
        assert_eq!(err.code(), crate::Code::Cancelled);
    }
}
