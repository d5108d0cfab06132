//! The transport: shared peer management and lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use weft_api::{Lifecycle, LifecycleState, Status};
use weft_wire::Metadata;

use crate::dialer::{Dialer, TcpDialer};
use crate::framing::DEFAULT_MAX_FRAME_LEN;
use crate::peer::{Backoff, Peer, Subscriber, monitor_peer};

/// Construction options for a [`StreamTransport`].
///
/// Programmatic options are applied before any declarative configuration
/// layered on top, so the latter can override them.
#[derive(Clone)]
pub struct TransportOptions {
    pub backoff: Backoff,
    pub max_frame_len: usize,
    /// Metadata sent in the hello exchange on every link.
    pub hello_metadata: Metadata,
    pub dialer: Arc<dyn Dialer>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            backoff: Backoff::default(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            hello_metadata: Metadata::new(),
            dialer: Arc::new(TcpDialer),
        }
    }
}

impl TransportOptions {
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn with_hello_metadata(mut self, metadata: Metadata) -> Self {
        self.hello_metadata = metadata;
        self
    }

    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = dialer;
        self
    }
}

struct PeerEntry {
    peer: Arc<Peer>,
    monitor: Option<JoinHandle<()>>,
    refs: usize,
}

/// Client-side transport: a map of retained peers sharing one lifecycle.
///
/// Multiple outbounds may share one transport; the peer map is guarded by
/// a mutex and retain/release are safe under concurrent access. Peer
/// monitors gate on the transport lifecycle, so peers retained before
/// `start` stay idle until the transport is running. `stop` signals every
/// monitor and joins it before returning: no background work outlives the
/// transport.
pub struct StreamTransport {
    options: TransportOptions,
    lifecycle: Arc<Lifecycle>,
    peers: Mutex<HashMap<String, PeerEntry>>,
}

impl StreamTransport {
    pub fn new(options: TransportOptions) -> Self {
        Self {
            options,
            lifecycle: Arc::new(Lifecycle::new()),
            peers: Mutex::new(HashMap::new()),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub async fn start(&self) -> Result<(), Status> {
        self.lifecycle.start(|| async { Ok(()) }).await
    }

    pub async fn stop(&self) -> Result<(), Status> {
        self.lifecycle
            .stop(|| async move {
                let entries: Vec<PeerEntry> = self.peers.lock().drain().map(|(_, e)| e).collect();
                for entry in &entries {
                    entry.peer.signal_stop();
                }
                for entry in entries {
                    if let Some(monitor) = entry.monitor {
                        let _ = monitor.await;
                    }
                }
                Ok(())
            })
            .await
    }

    /// Retain a peer for `addr`, registering `subscriber` for status
    /// transitions.
    ///
    /// The first retain for an address creates the peer and spawns its
    /// monitor (so this must run inside the runtime); later retains share
    /// it. Returns the peer and the subscription id to release with.
    pub fn retain_peer(
        &self,
        addr: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<(Arc<Peer>, u64), Status> {
        match self.lifecycle.state() {
            LifecycleState::Stopping | LifecycleState::Stopped | LifecycleState::Failed => {
                return Err(Status::failed_precondition("transport is stopped"));
            }
            _ => {}
        }
        let mut peers = self.peers.lock();
        let entry = peers.entry(addr.to_owned()).or_insert_with(|| {
            let peer = Peer::new(addr);
            let monitor = tokio::spawn(monitor_peer(
                peer.clone(),
                self.options.dialer.clone(),
                self.options.backoff.clone(),
                self.lifecycle.clone(),
                self.options.hello_metadata.clone(),
                self.options.max_frame_len,
            ));
            PeerEntry {
                peer,
                monitor: Some(monitor),
                refs: 0,
            }
        });
        entry.refs += 1;
        let subscription = entry.peer.subscribe(subscriber);
        Ok((entry.peer.clone(), subscription))
    }

    /// Release one retained reference.
    ///
    /// When the last reference goes, the peer's monitor is stopped and
    /// joined and the peer is removed from the map.
    pub async fn release_peer(&self, addr: &str, subscription: u64) -> Result<(), Status> {
        let torn_down = {
            let mut peers = self.peers.lock();
            let Some(entry) = peers.get_mut(addr) else {
                return Err(Status::not_found(format!(
                    "no retained peer for address {addr:?}"
                )));
            };
            entry.peer.unsubscribe(subscription);
            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs == 0 {
                peers.remove(addr)
            } else {
                None
            }
        };
        if let Some(entry) = torn_down {
            entry.peer.signal_stop();
            if let Some(monitor) = entry.monitor {
                let _ = monitor.await;
            }
        }
        Ok(())
    }

    /// Number of peers currently retained.
    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }
}
