//! Peer management: one monitored connection per remote address.
//!
//! Each retained peer owns one background monitor task for its whole
//! lifetime. The monitor dials, watches the link, publishes
//! [`ConnectionStatus`] transitions to subscribers, and redials with
//! exponential backoff when the link dies. The attempt counter resets to
//! zero whenever the peer becomes available and grows otherwise, so the
//! backoff stretches only across consecutive failures.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};
use weft_api::{Lifecycle, Status};
use weft_wire::Metadata;

use crate::dialer::Dialer;
use crate::link::{LinkHandle, establish};

/// Connection status exposed to choosers and subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Unavailable,
    Connecting,
    Available,
}

/// Native link state, as the monitor sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

/// Map a native link state to the status subscribers observe.
pub fn link_state_to_status(state: LinkState) -> ConnectionStatus {
    match state {
        LinkState::Idle | LinkState::TransientFailure | LinkState::Shutdown => {
            ConnectionStatus::Unavailable
        }
        LinkState::Connecting => ConnectionStatus::Connecting,
        LinkState::Ready => ConnectionStatus::Available,
    }
}

/// Receives peer status transitions.
///
/// Notifications are deduplicated: a subscriber never sees the same status
/// twice in a row for one peer.
pub trait Subscriber: Send + Sync {
    fn notify_status_changed(&self, peer_addr: &str, status: ConnectionStatus);
}

/// Exponential redial backoff.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Delay before the second attempt.
    pub initial: Duration,
    /// Cap on the delay between attempts.
    pub max: Duration,
    /// Growth factor per consecutive failure.
    pub multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl Backoff {
    /// Delay for a given attempt number (1-indexed).
    pub fn for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        self.initial.mul_f64(multiplier).min(self.max)
    }
}

/// A managed connection handle to one remote address.
pub struct Peer {
    addr: String,
    state_tx: watch::Sender<LinkState>,
    status_tx: watch::Sender<ConnectionStatus>,
    link: Mutex<Option<LinkHandle>>,
    subscribers: Mutex<Vec<(u64, Arc<dyn Subscriber>)>>,
    next_subscription: AtomicU64,
    inflight: AtomicUsize,
    stop_tx: watch::Sender<bool>,
}

impl Peer {
    pub(crate) fn new(addr: impl Into<String>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(LinkState::Idle);
        let (status_tx, _) = watch::channel(ConnectionStatus::Unavailable);
        let (stop_tx, _) = watch::channel(false);
        Arc::new(Self {
            addr: addr.into(),
            state_tx,
            status_tx,
            link: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            inflight: AtomicUsize::new(0),
            stop_tx,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    pub fn link_state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    /// Calls currently charged against this peer.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Relaxed)
    }

    pub(crate) fn begin_call(&self) {
        self.inflight.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn end_call(&self) {
        self.inflight.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> u64 {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, subscriber));
        id
    }

    pub(crate) fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().retain(|(sid, _)| *sid != id);
    }

    pub(crate) fn current_link(&self) -> Option<LinkHandle> {
        self.link.lock().clone()
    }

    fn set_link(&self, handle: LinkHandle) {
        *self.link.lock() = Some(handle);
    }

    fn clear_link(&self) {
        *self.link.lock() = None;
    }

    /// Record a native state transition, publishing the derived status to
    /// subscribers when it changed.
    pub(crate) fn set_state(&self, state: LinkState) {
        self.state_tx.send_replace(state);
        let status = link_state_to_status(state);
        let previous = self.status_tx.send_replace(status);
        if previous == status {
            return;
        }
        let subscribers: Vec<Arc<dyn Subscriber>> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, s)| s.clone())
            .collect();
        for subscriber in subscribers {
            subscriber.notify_status_changed(&self.addr, status);
        }
    }

    pub(crate) fn signal_stop(&self) {
        self.stop_tx.send_replace(true);
    }

    fn stop_rx(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    /// Wait until the peer is available, the deadline passes, or the peer
    /// is released.
    pub async fn wait_available(&self, deadline: Option<Instant>) -> Result<(), Status> {
        let mut status_rx = self.status_tx.subscribe();
        let mut stop_rx = self.stop_tx.subscribe();
        let wait = async {
            tokio::select! {
                res = status_rx.wait_for(|s| *s == ConnectionStatus::Available) => match res {
                    Ok(_) => Ok(()),
                    Err(_) => Err(Status::unavailable(format!(
                        "peer {:?} was torn down",
                        self.addr
                    ))),
                },
                _ = stop_rx.wait_for(|stopped| *stopped) => Err(Status::unavailable(format!(
                    "peer {:?} was released",
                    self.addr
                ))),
            }
        };
        match deadline {
            None => wait.await,
            Some(deadline) => match tokio::time::timeout_at(deadline.into(), wait).await {
                Ok(result) => result,
                Err(_) => Err(Status::deadline_exceeded(format!(
                    "timed out waiting for peer {:?} to become available",
                    self.addr
                ))),
            },
        }
    }
}

/// The resident monitor task for one peer.
///
/// Waits for the owning transport to reach running, then dials and watches
/// the link until told to stop, at which point it closes the link, marks
/// the peer unavailable, and exits. The owning transport joins this task
/// on stop and on release, so no monitor outlives its transport.
pub(crate) async fn monitor_peer(
    peer: Arc<Peer>,
    dialer: Arc<dyn Dialer>,
    backoff: Backoff,
    lifecycle: Arc<Lifecycle>,
    hello_metadata: Metadata,
    max_frame_len: usize,
) {
    let addr = peer.addr().to_owned();
    let mut stop_rx = peer.stop_rx();

    tokio::select! {
        res = lifecycle.wait_until_running(None) => {
            if res.is_err() {
                peer.set_state(LinkState::Shutdown);
                return;
            }
        }
        _ = stop_rx.wait_for(|stopped| *stopped) => {
            peer.set_state(LinkState::Shutdown);
            return;
        }
    }

    let mut attempts: u32 = 0;
    loop {
        peer.set_state(LinkState::Connecting);
        match dial(&*dialer, &addr, &hello_metadata, max_frame_len).await {
            Ok((handle, driver)) => {
                let mut driver_task = tokio::spawn(driver.run());
                peer.set_link(handle);
                peer.set_state(LinkState::Ready);
                attempts = 0;
                tokio::select! {
                    _ = async { let _ = stop_rx.wait_for(|stopped| *stopped).await; } => {
                        peer.clear_link();
                        driver_task.abort();
                        let _ = driver_task.await;
                        peer.set_state(LinkState::Shutdown);
                        return;
                    }
                    res = &mut driver_task => {
                        peer.clear_link();
                        match res {
                            Ok(Ok(())) => debug!(addr, "link closed"),
                            Ok(Err(error)) => debug!(addr, %error, "link failed"),
                            Err(error) => warn!(addr, %error, "link driver panicked"),
                        }
                        peer.set_state(LinkState::TransientFailure);
                    }
                }
            }
            Err(error) => {
                debug!(addr, %error, "dial failed");
                peer.set_state(LinkState::TransientFailure);
            }
        }

        attempts += 1;
        let delay = backoff.for_attempt(attempts);
        tokio::select! {
            _ = stop_rx.wait_for(|stopped| *stopped) => {
                peer.set_state(LinkState::Shutdown);
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn dial(
    dialer: &dyn Dialer,
    addr: &str,
    hello_metadata: &Metadata,
    max_frame_len: usize,
) -> Result<
    (
        LinkHandle,
        crate::link::LinkDriver<crate::dialer::IoStream>,
    ),
    crate::errors::ConnectionError,
> {
    let stream = dialer.dial(addr).await?;
    establish(stream, hello_metadata.clone(), max_frame_len).await
}
