//! Idle-time delivery of peer messages

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::DispatcherHandle;
use crate::peer::PeerMessageBridge;

/// Moves pending peer messages into the dispatcher while the agent is idle
///
/// Messages arriving mid-response wait in the peer inbox; the first poll
/// after the busy flag clears submits all of them as one batch.
pub struct PeerWatcher {
    bridge: PeerMessageBridge,
    handle: DispatcherHandle,
    poll_interval: Duration,
}

impl PeerWatcher {
    #[must_use]
    pub const fn new(
        bridge: PeerMessageBridge,
        handle: DispatcherHandle,
        poll_interval: Duration,
    ) -> Self {
        Self {
            bridge,
            handle,
            poll_interval,
        }
    }

    /// Submit pending messages if idle; returns how many were submitted
    pub fn poll_once(&self) -> usize {
        if self.handle.is_busy() || self.bridge.pending() == 0 {
            return 0;
        }

        let batch = self.bridge.drain();
        let count = batch.len();
        tracing::debug!(count, "delivering peer messages");
        self.handle.submit_peer(batch);
        count
    }

    /// Poll until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll_once();
                }
            }
        }
        tracing::debug!("peer watcher stopped");
    }
}
