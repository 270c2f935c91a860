//! Shared busy flag and interrupt signal
//!
//! Both are owned state objects cloned into the tasks that need them; each
//! has its own synchronization.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Notify;

/// "The engine's response is being delivered"
///
/// Only set through [`BusyFlag::acquire`], whose guard clears it on drop so
/// every exit path, including panics and early returns, releases it.
#[derive(Debug, Clone, Default)]
pub struct BusyFlag(Arc<AtomicBool>);

impl BusyFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a job is currently being delivered
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Mark busy until the returned guard is dropped
    #[must_use = "the flag clears as soon as the guard is dropped"]
    pub fn acquire(&self) -> BusyGuard {
        let was_busy = self.0.swap(true, Ordering::AcqRel);
        if was_busy {
            tracing::warn!("busy flag acquired while already set");
        }
        BusyGuard {
            flag: Arc::clone(&self.0),
        }
    }
}

/// Clears the busy flag on drop
#[derive(Debug)]
pub struct BusyGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct InterruptInner {
    raised: AtomicBool,
    raises: AtomicU64,
    notify: Notify,
}

/// One-shot, auto-resetting interrupt request
///
/// Raising while already raised is a no-op. The synthesis consumer takes it
/// with [`consumed`](Self::consumed) or [`try_consume`](Self::try_consume),
/// which clears it again.
#[derive(Debug, Clone, Default)]
pub struct InterruptSignal {
    inner: Arc<InterruptInner>,
}

impl InterruptSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal; returns `false` if it was already raised
    pub fn raise(&self) -> bool {
        if self.inner.raised.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.raises.fetch_add(1, Ordering::Relaxed);
        self.inner.notify.notify_waiters();
        true
    }

    /// Whether the signal is raised and not yet consumed
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::Acquire)
    }

    /// Consume the signal if raised
    pub fn try_consume(&self) -> bool {
        self.inner
            .raised
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Wait until the signal is raised, then consume it
    pub async fn consumed(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_consume() {
                return;
            }
            notified.await;
        }
    }

    /// Clear any pending raise without consuming it
    pub fn reset(&self) {
        self.inner.raised.store(false, Ordering::Release);
    }

    /// Number of effective raises so far
    #[must_use]
    pub fn raise_count(&self) -> u64 {
        self.inner.raises.load(Ordering::Relaxed)
    }
}
