//! Message channel to the operating agent
//!
//! The voice side holds a [`PeerMessageBridge`]; the operating agent side (or
//! the TCP [`PeerLink`] standing in for it) holds the matching
//! [`PeerEndpoint`]. Outbound sends never block. Inbound messages wait in a
//! bounded queue until the dispatcher is idle.

mod link;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::queue::BoundedQueue;
use crate::{Error, Result};

pub use link::PeerLink;

/// Prefix marking peer messages in the conversation history
pub const PEER_MESSAGE_PREFIX: &str = "[FROM_COMPUTER_AGENT]";

/// A message received from the operating agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerMessage {
    /// Monotonic receipt sequence number
    pub seq: u64,

    /// Opaque payload
    pub payload: String,
}

impl PeerMessage {
    /// Render as a user turn for the conversational engine
    #[must_use]
    pub fn as_user_text(&self) -> String {
        format!("{PEER_MESSAGE_PREFIX} {}", self.payload)
    }
}

/// Create a connected bridge and endpoint
///
/// `inbound_capacity` bounds the queue of unread peer messages; on overflow
/// the oldest message is dropped.
#[must_use]
pub fn channel(inbound_capacity: usize) -> (PeerMessageBridge, PeerEndpoint) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let inbound = Arc::new(BoundedQueue::new(inbound_capacity));

    let bridge = PeerMessageBridge {
        outbound: outbound_tx,
        inbound: Arc::clone(&inbound),
    };
    let endpoint = PeerEndpoint {
        outbound: outbound_rx,
        inbound,
        next_seq: AtomicU64::new(1),
    };
    (bridge, endpoint)
}

/// Voice-side handle to the peer channel
#[derive(Debug, Clone)]
pub struct PeerMessageBridge {
    outbound: mpsc::UnboundedSender<String>,
    inbound: Arc<BoundedQueue<PeerMessage>>,
}

impl PeerMessageBridge {
    /// Queue a message for the operating agent and return immediately
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint has been dropped
    pub fn send(&self, payload: impl Into<String>) -> Result<()> {
        let payload = payload.into();
        tracing::debug!(payload = %payload, "sending to peer");
        self.outbound
            .send(payload)
            .map_err(|_| Error::Peer("peer endpoint closed".to_string()))
    }

    /// Take the oldest pending inbound message, if any
    ///
    /// Only call while the agent is idle.
    #[must_use]
    pub fn try_receive(&self) -> Option<PeerMessage> {
        self.inbound.try_pop()
    }

    /// Take every pending inbound message, oldest first
    ///
    /// Only call while the agent is idle.
    #[must_use]
    pub fn drain(&self) -> Vec<PeerMessage> {
        self.inbound.drain()
    }

    /// Number of unread inbound messages
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inbound.len()
    }

    /// Inbound messages dropped by overflow
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.inbound.dropped()
    }
}

/// Operating-agent-side handle to the peer channel
#[derive(Debug)]
pub struct PeerEndpoint {
    outbound: mpsc::UnboundedReceiver<String>,
    inbound: Arc<BoundedQueue<PeerMessage>>,
    next_seq: AtomicU64,
}

impl PeerEndpoint {
    /// Deliver a message to the voice side, returning its sequence number
    pub fn deliver(&self, payload: impl Into<String>) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let message = PeerMessage {
            seq,
            payload: payload.into(),
        };

        tracing::debug!(seq, payload = %message.payload, "peer message received");
        if let Some(evicted) = self.inbound.push(message) {
            tracing::warn!(seq = evicted.seq, "peer inbox full, dropped oldest message");
        }
        seq
    }

    /// Wait for the next message sent by the voice side
    ///
    /// Returns `None` once every bridge has been dropped.
    pub async fn next_outbound(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Take a sent message without waiting
    pub fn try_next_outbound(&mut self) -> Option<String> {
        self.outbound.try_recv().ok()
    }
}
