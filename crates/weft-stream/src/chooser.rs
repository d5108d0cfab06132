//! Peer choosers: selecting a connection for a call.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use weft_api::{BoxFuture, CallContext, Request, Status};

use crate::peer::{ConnectionStatus, Peer, Subscriber};
use crate::transport::StreamTransport;

/// Per-call accounting guard returned by [`Chooser::choose`].
///
/// Dropping it ends the call from the peer's perspective, which makes the
/// "finish exactly once, even on early error" contract structural: hold it
/// for the duration of the call and let scope exit do the rest.
pub struct Finish {
    peer: Arc<Peer>,
}

impl Finish {
    pub(crate) fn new(peer: Arc<Peer>) -> Self {
        peer.begin_call();
        Self { peer }
    }
}

impl Drop for Finish {
    fn drop(&mut self) {
        self.peer.end_call();
    }
}

/// Selects a peer for each call.
///
/// Start and stop are driven by the owning outbound's lifecycle; `choose`
/// may suspend (deadline-bounded) until a peer is available.
pub trait Chooser: Send + Sync {
    fn start<'a>(&'a self) -> BoxFuture<'a, Result<(), Status>>;
    fn stop<'a>(&'a self) -> BoxFuture<'a, Result<(), Status>>;
    fn choose<'a>(
        &'a self,
        ctx: &'a CallContext,
        req: &'a Request,
    ) -> BoxFuture<'a, Result<(Arc<Peer>, Finish), Status>>;
}

/// Subscriber for choosers that observe status through the peer's watch
/// channel instead of callbacks.
struct NopSubscriber;

impl Subscriber for NopSubscriber {
    fn notify_status_changed(&self, _peer_addr: &str, _status: ConnectionStatus) {}
}

/// Chooser over a single peer: every call goes to the one address.
pub struct Single {
    transport: Arc<StreamTransport>,
    addr: String,
    retained: Mutex<Option<(Arc<Peer>, u64)>>,
}

impl Single {
    pub fn new(transport: Arc<StreamTransport>, addr: impl Into<String>) -> Self {
        Self {
            transport,
            addr: addr.into(),
            retained: Mutex::new(None),
        }
    }
}

impl Chooser for Single {
    fn start<'a>(&'a self) -> BoxFuture<'a, Result<(), Status>> {
        Box::pin(async move {
            if self.retained.lock().is_some() {
                return Ok(());
            }
            let (peer, subscription) = self
                .transport
                .retain_peer(&self.addr, Arc::new(NopSubscriber))?;
            *self.retained.lock() = Some((peer, subscription));
            Ok(())
        })
    }

    fn stop<'a>(&'a self) -> BoxFuture<'a, Result<(), Status>> {
        Box::pin(async move {
            let retained = self.retained.lock().take();
            if let Some((peer, subscription)) = retained {
                self.transport.release_peer(peer.addr(), subscription).await?;
            }
            Ok(())
        })
    }

    fn choose<'a>(
        &'a self,
        ctx: &'a CallContext,
        _req: &'a Request,
    ) -> BoxFuture<'a, Result<(Arc<Peer>, Finish), Status>> {
        Box::pin(async move {
            let peer = {
                let retained = self.retained.lock();
                match &*retained {
                    Some((peer, _)) => peer.clone(),
                    None => return Err(Status::failed_precondition("chooser not started")),
                }
            };
            peer.wait_available(ctx.deadline()).await?;
            let finish = Finish::new(peer.clone());
            Ok((peer, finish))
        })
    }
}

struct NotifySubscriber {
    notify: Arc<Notify>,
}

impl Subscriber for NotifySubscriber {
    fn notify_status_changed(&self, _peer_addr: &str, _status: ConnectionStatus) {
        self.notify.notify_waiters();
    }
}

/// Availability-aware round-robin over a fixed peer list.
///
/// Rotates through peers, skipping unavailable ones; when none is
/// available, waits (deadline-bounded) for a status change and retries.
pub struct RoundRobin {
    transport: Arc<StreamTransport>,
    addrs: Vec<String>,
    retained: Mutex<Vec<(Arc<Peer>, u64)>>,
    next: AtomicUsize,
    notify: Arc<Notify>,
}

impl RoundRobin {
    pub fn new(transport: Arc<StreamTransport>, addrs: Vec<String>) -> Self {
        Self {
            transport,
            addrs,
            retained: Mutex::new(Vec::new()),
            next: AtomicUsize::new(0),
            notify: Arc::new(Notify::new()),
        }
    }

    fn available_peer(&self) -> Option<Arc<Peer>> {
        let retained = self.retained.lock();
        if retained.is_empty() {
            return None;
        }
        let n = retained.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        for i in 0..n {
            let (peer, _) = &retained[(start + i) % n];
            if peer.status() == ConnectionStatus::Available {
                return Some(peer.clone());
            }
        }
        None
    }
}

impl Chooser for RoundRobin {
    fn start<'a>(&'a self) -> BoxFuture<'a, Result<(), Status>> {
        Box::pin(async move {
            if !self.retained.lock().is_empty() {
                return Ok(());
            }
            let mut retained = Vec::with_capacity(self.addrs.len());
            for addr in &self.addrs {
                let subscriber = Arc::new(NotifySubscriber {
                    notify: self.notify.clone(),
                });
                retained.push(self.transport.retain_peer(addr, subscriber)?);
            }
            *self.retained.lock() = retained;
            Ok(())
        })
    }

    fn stop<'a>(&'a self) -> BoxFuture<'a, Result<(), Status>> {
        Box::pin(async move {
            let retained: Vec<_> = std::mem::take(&mut *self.retained.lock());
            for (peer, subscription) in retained {
                self.transport.release_peer(peer.addr(), subscription).await?;
            }
            Ok(())
        })
    }

    fn choose<'a>(
        &'a self,
        ctx: &'a CallContext,
        _req: &'a Request,
    ) -> BoxFuture<'a, Result<(Arc<Peer>, Finish), Status>> {
        Box::pin(async move {
            if self.retained.lock().is_empty() {
                return Err(Status::failed_precondition("chooser not started"));
            }
            loop {
                // Register for wakeups before re-checking, so a transition
                // between the check and the wait is not lost.
                let notified = self.notify.notified();
                if let Some(peer) = self.available_peer() {
                    let finish = Finish::new(peer.clone());
                    return Ok((peer, finish));
                }
                match ctx.deadline() {
                    None => notified.await,
                    Some(deadline) => {
                        tokio::time::timeout_at(deadline.into(), notified)
                            .await
                            .map_err(|_| {
                                Status::deadline_exceeded(
                                    "timed out waiting for an available peer",
                                )
                            })?;
                    }
                }
            }
        })
    }
}
