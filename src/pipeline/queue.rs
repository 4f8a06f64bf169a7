//! Bounded inter-stage queues with drop-oldest overflow semantics.
//!
//! `push` never blocks and never fails, which is what lets the blocking
//! capture thread hand frames to the async pipeline without ever waiting on
//! a consumer. Under sustained overload the queue sheds its *oldest*
//! entries, preserving recency - which is what detection cares about.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

/// Fixed-capacity FIFO shared between one producer side and one consumer
/// task. The producer may be a plain OS thread; only `recv_timeout` is
/// async.
pub struct BoundedQueue<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
    dropped: AtomicU64,
    notify: Notify,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Enqueue without blocking. When full, the oldest entry is discarded
    /// to make room and the drop counter is incremented.
    pub fn push(&self, item: T) {
        {
            let mut queue = self.inner.lock();
            if queue.len() >= self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(capacity = self.capacity, "queue full, dropped oldest item");
            }
            queue.push_back(item);
        }
        self.notify.notify_one();
    }

    /// Dequeue the front entry if one is available.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    /// Await the next entry for at most `timeout`.
    ///
    /// Returns `None` on timeout - consumers treat that as a tick, not an
    /// error.
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            let notified = self.notify.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                // One last check: the producer may have raced the deadline
                return self.try_pop();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total entries discarded to overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::new(4);
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.try_pop(), Some(3));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_overflow_drops_oldest_and_counts() {
        let queue = BoundedQueue::new(3);
        for i in 0..10 {
            queue.push(i);
        }
        // N puts into capacity C < N => exactly N - C drops
        assert_eq!(queue.dropped(), 7);
        assert_eq!(queue.len(), 3);
        // Newest entries survive
        assert_eq!(queue.try_pop(), Some(7));
        assert_eq!(queue.try_pop(), Some(8));
        assert_eq!(queue.try_pop(), Some(9));
    }

    #[tokio::test]
    async fn test_recv_timeout_returns_none_when_idle() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(4);
        let got = queue.recv_timeout(Duration::from_millis(20)).await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_recv_wakes_on_push_from_thread() {
        let queue = std::sync::Arc::new(BoundedQueue::new(4));

        let producer = std::sync::Arc::clone(&queue);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.push(42u32);
        });

        let got = queue.recv_timeout(Duration::from_secs(2)).await;
        assert_eq!(got, Some(42));
    }

    #[tokio::test]
    async fn test_recv_drains_before_waiting() {
        let queue = BoundedQueue::new(4);
        queue.push("a");
        let got = queue.recv_timeout(Duration::from_millis(5)).await;
        assert_eq!(got, Some("a"));
    }
}
