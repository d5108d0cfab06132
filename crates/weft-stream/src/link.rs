//! Client side of a link: one driver task per connection.
//!
//! All traffic on a link funnels through the driver, which multiplexes
//! caller commands and incoming wire messages over a single `select!`
//! loop and correlates responses to callers through a pending-request map
//! keyed by request id. Callers hold a cheap, clonable [`LinkHandle`].
//!
//! When the driver exits (peer closed, io error, or all handles dropped)
//! every pending call resolves to an `Unavailable` status: the reply
//! channels are simply dropped and the caller-facing wrappers translate
//! that into `connection closed`.

use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};
use weft_api::{ClientStream, Status, StreamItem};
use weft_wire::{CallKind, Message, Metadata, PROTOCOL_VERSION, WireStatus};

use crate::errors::ConnectionError;
use crate::framing::{FrameReader, FrameWriter, HELLO_TIMEOUT, frame_pair};

/// Raw reply to a unary call, before error translation.
pub(crate) struct CallReply {
    pub status: WireStatus,
    pub trailers: Metadata,
    pub body: Vec<u8>,
}

enum LinkCommand {
    Unary {
        path: String,
        ttl_ms: Option<u64>,
        metadata: Metadata,
        body: Vec<u8>,
        reply: oneshot::Sender<CallReply>,
    },
    Oneway {
        path: String,
        ttl_ms: Option<u64>,
        metadata: Metadata,
        body: Vec<u8>,
        reply: oneshot::Sender<Result<(), Status>>,
    },
    OpenStream {
        path: String,
        ttl_ms: Option<u64>,
        metadata: Metadata,
        incoming: mpsc::Sender<Result<StreamItem, Status>>,
        outgoing: mpsc::Receiver<StreamItem>,
    },
}

enum PendingCall {
    Unary(oneshot::Sender<CallReply>),
    Oneway(oneshot::Sender<Result<(), Status>>),
    Stream(mpsc::Sender<Result<StreamItem, Status>>),
}

fn link_closed() -> Status {
    Status::unavailable("connection closed")
}

/// Clonable handle for issuing calls on a link.
#[derive(Clone)]
pub struct LinkHandle {
    cmd_tx: mpsc::Sender<LinkCommand>,
}

impl LinkHandle {
    pub(crate) async fn call_unary(
        &self,
        path: String,
        ttl_ms: Option<u64>,
        metadata: Metadata,
        body: Vec<u8>,
    ) -> Result<CallReply, Status> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(LinkCommand::Unary {
                path,
                ttl_ms,
                metadata,
                body,
                reply,
            })
            .await
            .map_err(|_| link_closed())?;
        rx.await.map_err(|_| link_closed())
    }

    pub(crate) async fn call_oneway(
        &self,
        path: String,
        ttl_ms: Option<u64>,
        metadata: Metadata,
        body: Vec<u8>,
    ) -> Result<(), Status> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(LinkCommand::Oneway {
                path,
                ttl_ms,
                metadata,
                body,
                reply,
            })
            .await
            .map_err(|_| link_closed())?;
        rx.await.map_err(|_| link_closed())?
    }

    pub(crate) async fn open_stream(
        &self,
        path: String,
        ttl_ms: Option<u64>,
        metadata: Metadata,
    ) -> Result<ClientStream, Status> {
        let (in_tx, in_rx) = mpsc::channel(32);
        let (out_tx, out_rx) = mpsc::channel(32);
        self.cmd_tx
            .send(LinkCommand::OpenStream {
                path,
                ttl_ms,
                metadata,
                incoming: in_tx,
                outgoing: out_rx,
            })
            .await
            .map_err(|_| link_closed())?;
        Ok(ClientStream::new(out_tx, in_rx))
    }
}

/// Perform the initiator side of the hello exchange and set up the driver.
///
/// The returned driver must be spawned; the handle is unusable until then.
pub(crate) async fn establish<S>(
    stream: S,
    hello_metadata: Metadata,
    max_frame_len: usize,
) -> Result<(LinkHandle, LinkDriver<S>), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = frame_pair(stream, max_frame_len);
    writer
        .send(&Message::Hello {
            version: PROTOCOL_VERSION,
            metadata: hello_metadata,
        })
        .await?;
    let hello = tokio::time::timeout(HELLO_TIMEOUT, reader.recv())
        .await
        .map_err(|_| ConnectionError::Handshake("timed out waiting for hello".into()))??;
    match hello {
        Some(Message::Hello { version, .. }) if version == PROTOCOL_VERSION => {}
        Some(Message::Hello { version, .. }) => {
            return Err(ConnectionError::Handshake(format!(
                "unsupported protocol version {version}"
            )));
        }
        Some(Message::Goodbye { reason }) => {
            return Err(ConnectionError::Handshake(format!("peer refused: {reason}")));
        }
        Some(_) => {
            return Err(ConnectionError::Handshake(
                "expected hello as first message".into(),
            ));
        }
        None => {
            return Err(ConnectionError::Handshake(
                "connection closed during handshake".into(),
            ));
        }
    }

    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (stream_tx, stream_rx) = mpsc::channel(64);
    Ok((
        LinkHandle { cmd_tx },
        LinkDriver {
            reader,
            writer,
            cmd_rx,
            stream_tx,
            stream_rx,
            next_id: 1,
            pending: HashMap::new(),
        },
    ))
}

/// The driver task for one link.
pub(crate) struct LinkDriver<S> {
    reader: FrameReader<ReadHalf<S>>,
    writer: FrameWriter<WriteHalf<S>>,
    cmd_rx: mpsc::Receiver<LinkCommand>,
    /// Stream forwarders feed outgoing items back through this channel so
    /// the driver stays the only writer on the link.
    stream_tx: mpsc::Sender<(u64, Option<StreamItem>)>,
    stream_rx: mpsc::Receiver<(u64, Option<StreamItem>)>,
    next_id: u64,
    pending: HashMap<u64, PendingCall>,
}

impl<S> LinkDriver<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub(crate) async fn run(mut self) -> Result<(), ConnectionError> {
        let result = self.run_inner().await;
        // Dropping the pending map drops every reply channel; callers
        // observe `connection closed`.
        self.pending.clear();
        result
    }

    async fn run_inner(&mut self) -> Result<(), ConnectionError> {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    None => {
                        // Every handle is gone; nothing can issue new calls.
                        let _ = self.writer.send(&Message::Goodbye { reason: "client closed".into() }).await;
                        return Ok(());
                    }
                    Some(cmd) => self.handle_command(cmd).await?,
                },
                item = self.stream_rx.recv() => {
                    // The driver holds its own sender, so this never yields None.
                    if let Some((id, item)) = item {
                        self.handle_stream_item(id, item).await?;
                    }
                }
                msg = self.reader.recv() => match msg? {
                    None => return Ok(()),
                    Some(msg) => {
                        if self.handle_message(msg).await {
                            return Ok(());
                        }
                    }
                },
            }
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    async fn handle_command(&mut self, cmd: LinkCommand) -> Result<(), ConnectionError> {
        match cmd {
            LinkCommand::Unary {
                path,
                ttl_ms,
                metadata,
                body,
                reply,
            } => {
                let id = self.next_id();
                self.writer
                    .send(&Message::Request {
                        id,
                        path,
                        kind: CallKind::Unary,
                        ttl_ms,
                        metadata,
                        body,
                    })
                    .await?;
                self.pending.insert(id, PendingCall::Unary(reply));
            }
            LinkCommand::Oneway {
                path,
                ttl_ms,
                metadata,
                body,
                reply,
            } => {
                let id = self.next_id();
                self.writer
                    .send(&Message::Request {
                        id,
                        path,
                        kind: CallKind::Oneway,
                        ttl_ms,
                        metadata,
                        body,
                    })
                    .await?;
                self.pending.insert(id, PendingCall::Oneway(reply));
            }
            LinkCommand::OpenStream {
                path,
                ttl_ms,
                metadata,
                incoming,
                mut outgoing,
            } => {
                let id = self.next_id();
                self.writer
                    .send(&Message::Request {
                        id,
                        path,
                        kind: CallKind::Stream,
                        ttl_ms,
                        metadata,
                        body: Vec::new(),
                    })
                    .await?;
                self.pending.insert(id, PendingCall::Stream(incoming));
                let stream_tx = self.stream_tx.clone();
                tokio::spawn(async move {
                    loop {
                        match outgoing.recv().await {
                            Some(item) => {
                                if stream_tx.send((id, Some(item))).await.is_err() {
                                    return;
                                }
                            }
                            None => {
                                // Handle dropped: implicit half-close.
                                let _ = stream_tx.send((id, None)).await;
                                return;
                            }
                        }
                    }
                });
            }
        }
        Ok(())
    }

    async fn handle_stream_item(
        &mut self,
        id: u64,
        item: Option<StreamItem>,
    ) -> Result<(), ConnectionError> {
        match item {
            Some(StreamItem::Message(body)) => {
                self.writer
                    .send(&Message::Data {
                        id,
                        body: body.to_vec(),
                    })
                    .await?;
            }
            Some(StreamItem::Close) | None => {
                self.writer.send(&Message::CloseSend { id }).await?;
            }
        }
        Ok(())
    }

    /// Route one incoming message. Returns `true` when the link is done.
    async fn handle_message(&mut self, msg: Message) -> bool {
        match msg {
            Message::Response {
                id,
                status,
                trailers,
                body,
            } => match self.pending.remove(&id) {
                Some(PendingCall::Unary(reply)) => {
                    let _ = reply.send(CallReply {
                        status,
                        trailers,
                        body,
                    });
                }
                Some(PendingCall::Oneway(reply)) => {
                    let result = if status.is_ok() {
                        Ok(())
                    } else {
                        Err(weft_wire::wire_to_status(&status, &trailers))
                    };
                    let _ = reply.send(result);
                }
                Some(PendingCall::Stream(events)) => {
                    let event = if status.is_ok() {
                        Ok(StreamItem::Close)
                    } else {
                        Err(weft_wire::wire_to_status(&status, &trailers))
                    };
                    let _ = events.send(event).await;
                }
                None => trace!(id, "response for unknown request"),
            },
            Message::Ack { id } => match self.pending.remove(&id) {
                Some(PendingCall::Oneway(reply)) => {
                    let _ = reply.send(Ok(()));
                }
                Some(other) => {
                    trace!(id, "ack for non-oneway request");
                    self.pending.insert(id, other);
                }
                None => trace!(id, "ack for unknown request"),
            },
            Message::Data { id, body } => {
                let dead = match self.pending.get(&id) {
                    Some(PendingCall::Stream(events)) => events
                        .send(Ok(StreamItem::Message(body.into())))
                        .await
                        .is_err(),
                    _ => {
                        trace!(id, "data for unknown stream");
                        false
                    }
                };
                if dead {
                    self.pending.remove(&id);
                }
            }
            Message::Goodbye { reason } => {
                debug!(reason, "link closed by peer");
                return true;
            }
            Message::Hello { .. } | Message::Request { .. } | Message::CloseSend { .. } => {
                trace!("unexpected message on client link");
            }
        }
        false
    }
}
