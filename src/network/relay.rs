//! Connection Registry & Relay
//!
//! Tracks every live `/chat` socket by the subject that owns it and fans
//! messages out to the sockets of a set of subjects.
//!
//! ```text
//! subject "p1" ──► { peer 1, peer 4 }      (two devices)
//! subject "p2" ──► { peer 2 }
//! ```
//!
//! The registry lock only guards the index. Fan-out copies the target
//! peers under a read lock, releases it, then writes. Each peer serializes
//! its own writes behind a per-peer mutex shared by the keep-alive pinger
//! and the broadcaster, and every write is bounded by a deadline.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures_util::future::join_all;
use futures_util::{Sink, SinkExt};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::network::protocol::ServerMessage;

/// Unique identifier of one live connection.
pub type PeerId = u64;

/// Outbound half of a socket.
type FrameSink = Pin<Box<dyn Sink<Message, Error = axum::Error> + Send>>;

/// Connection faults. Local to one peer; never fatal to the relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The socket rejected the write.
    #[error("write failed: {0}")]
    Write(#[from] axum::Error),

    /// The write did not complete before the deadline.
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// The message could not be serialized.
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

// =============================================================================
// PEER
// =============================================================================

/// One live socket, owned by the relay.
pub struct Peer {
    id: PeerId,
    subject_id: String,
    sink: Mutex<FrameSink>,
    write_timeout: Duration,
}

impl Peer {
    /// Connection identifier.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Subject that owns this connection.
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// Write one frame under the peer's write guard.
    ///
    /// The deadline covers waiting for the guard as well as the write, so a
    /// stalled socket does not hold queued writers beyond one deadline each.
    pub async fn send_frame(&self, frame: Message) -> Result<(), RelayError> {
        let write = async {
            let mut sink = self.sink.lock().await;
            sink.send(frame).await
        };
        match timeout(self.write_timeout, write).await {
            Ok(result) => result.map_err(RelayError::from),
            Err(_) => Err(RelayError::WriteTimeout(self.write_timeout)),
        }
    }

    /// Write a pre-serialized text frame.
    pub async fn send_text(&self, text: String) -> Result<(), RelayError> {
        self.send_frame(Message::Text(text)).await
    }

    /// Serialize and write a server message.
    pub async fn send_message(&self, message: &ServerMessage) -> Result<(), RelayError> {
        self.send_text(message.to_json()?).await
    }

    /// Send a liveness probe.
    pub async fn ping(&self) -> Result<(), RelayError> {
        self.send_frame(Message::Ping(Vec::new())).await
    }

    /// Close the outbound half. Errors are ignored; the peer is going away.
    pub async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = timeout(self.write_timeout, sink.close()).await;
    }
}

// =============================================================================
// RELAY
// =============================================================================

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Peers the message was addressed to.
    pub targets: usize,
    /// Successful writes.
    pub delivered: usize,
    /// Failed writes (left for the owning read loop to tear down).
    pub failed: usize,
}

/// Registry of live connections, bucketed by subject.
pub struct Relay {
    peers: RwLock<HashMap<String, HashMap<PeerId, Arc<Peer>>>>,
    next_peer_id: AtomicU64,
    write_timeout: Duration,
}

impl Relay {
    /// Create an empty relay whose peers bound each write by `write_timeout`.
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            next_peer_id: AtomicU64::new(1),
            write_timeout,
        }
    }

    /// Wrap a socket sink into a peer owned by `subject_id`. Not yet registered.
    pub fn create_peer<S>(&self, subject_id: &str, sink: S) -> Arc<Peer>
    where
        S: Sink<Message, Error = axum::Error> + Send + 'static,
    {
        Arc::new(Peer {
            id: self.next_peer_id.fetch_add(1, Ordering::Relaxed),
            subject_id: subject_id.to_string(),
            sink: Mutex::new(Box::pin(sink)),
            write_timeout: self.write_timeout,
        })
    }

    /// Add a peer under its subject's bucket.
    pub async fn register(&self, peer: Arc<Peer>) {
        let mut peers = self.peers.write().await;
        let bucket = peers.entry(peer.subject_id.clone()).or_default();
        bucket.insert(peer.id, peer.clone());
        debug!(subject_id = %peer.subject_id, peer_id = peer.id, devices = bucket.len(), "peer registered");
    }

    /// Remove a peer; drops the bucket once empty. Returns whether it was registered.
    pub async fn unregister(&self, peer: &Peer) -> bool {
        let mut peers = self.peers.write().await;
        let Some(bucket) = peers.get_mut(&peer.subject_id) else {
            return false;
        };

        let removed = bucket.remove(&peer.id).is_some();
        if bucket.is_empty() {
            peers.remove(&peer.subject_id);
        }
        if removed {
            debug!(subject_id = %peer.subject_id, peer_id = peer.id, "peer unregistered");
        }
        removed
    }

    /// Deliver `message` to every live peer of the given subjects.
    ///
    /// The message is serialized once. A failed write is logged and does not
    /// affect delivery to other peers.
    pub async fn deliver_to_subjects<'a, I>(
        &self,
        subject_ids: I,
        message: &ServerMessage,
    ) -> Result<Delivery, RelayError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let text = message.to_json()?;
        let targets = self.snapshot(subject_ids).await;

        let results = join_all(targets.iter().map(|peer| {
            let text = text.clone();
            async move { (peer, peer.send_text(text).await) }
        }))
        .await;

        let mut delivery = Delivery {
            targets: targets.len(),
            ..Default::default()
        };
        for (peer, result) in results {
            match result {
                Ok(()) => delivery.delivered += 1,
                Err(e) => {
                    delivery.failed += 1;
                    warn!(subject_id = %peer.subject_id, peer_id = peer.id, error = %e, "relay write failed");
                }
            }
        }
        Ok(delivery)
    }

    /// Copy the peers of the given subjects, deduplicated.
    async fn snapshot<'a, I>(&self, subject_ids: I) -> Vec<Arc<Peer>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let subjects: HashSet<&str> = subject_ids.into_iter().collect();
        let peers = self.peers.read().await;
        subjects
            .into_iter()
            .filter_map(|s| peers.get(s))
            .flat_map(|bucket| bucket.values().cloned())
            .collect()
    }

    /// Total live connections.
    pub async fn connection_count(&self) -> usize {
        self.peers.read().await.values().map(HashMap::len).sum()
    }

    /// Subjects with at least one live connection.
    pub async fn subject_count(&self) -> usize {
        self.peers.read().await.len()
    }
}
