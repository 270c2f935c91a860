//! Bounded FIFO shared between tasks
//!
//! Push never blocks: when the queue is full the oldest item is evicted and
//! counted. Consumers can wait for the next push.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

/// Concurrent FIFO with a drop-oldest overflow policy
#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl<T> BoundedQueue<T> {
    /// Queue that never evicts
    ///
    /// For producers already bounded upstream.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    /// Create a queue holding at most `capacity` items (minimum 1)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item, returning the evicted oldest item on overflow
    pub fn push(&self, item: T) -> Option<T> {
        let evicted = {
            let mut items = self.lock();
            let evicted = if items.len() >= self.capacity {
                items.pop_front()
            } else {
                None
            };
            items.push_back(item);
            evicted
        };

        if evicted.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        evicted
    }

    /// Take the oldest item without waiting
    pub fn try_pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Take every queued item, oldest first
    pub fn drain(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }

    /// Wait until a push happens
    ///
    /// A push made while nobody was waiting leaves a stored wakeup, so a
    /// consumer that found the queue empty cannot miss the next item.
    pub async fn pushed(&self) {
        self.notify.notified().await;
    }

    /// Number of queued items
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Items evicted by overflow so far
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_fifo_order() {
        let q = BoundedQueue::new(4);
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.try_pop(), Some(1));
        assert_eq!(q.drain(), vec![2, 3]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let q = BoundedQueue::new(2);
        assert!(q.push("a").is_none());
        assert!(q.push("b").is_none());
        assert_eq!(q.push("c"), Some("a"));
        assert_eq!(q.dropped(), 1);
        assert_eq!(q.drain(), vec!["b", "c"]);
    }

    #[test]
    fn test_unbounded_never_evicts() {
        let q = BoundedQueue::unbounded();
        for i in 0..1000 {
            assert!(q.push(i).is_none());
        }
        assert_eq!(q.len(), 1000);
        assert_eq!(q.dropped(), 0);
    }

    #[tokio::test]
    async fn test_push_before_wait_is_not_missed() {
        let q = BoundedQueue::new(4);
        q.push(1);
        assert_eq!(q.try_pop(), Some(1));
        // the stored wakeup from the earlier push completes at once
        tokio::time::timeout(Duration::from_secs(1), q.pushed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_push() {
        let q = Arc::new(BoundedQueue::new(4));
        let producer = Arc::clone(&q);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.push(7);
        });

        tokio::time::timeout(Duration::from_secs(2), q.pushed())
            .await
            .unwrap();
        assert_eq!(q.try_pop(), Some(7));
    }
}
