//! Bounded publish queue with pluggable backpressure.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::foundation::event::Event;

/// What `publish` does when the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackpressurePolicy {
    /// Wait until space frees up.
    #[default]
    Block,
    /// Evict the oldest queued event and accept the new one.
    DropOldest,
    /// Refuse the publish with `QueueFull`.
    Reject,
}

/// Outcome of a non-blocking push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    /// Accepted without evicting anything.
    Pushed,
    /// Accepted after evicting the oldest queued event.
    DroppedOldest,
    /// Refused: the queue is full.
    Rejected,
}

/// FIFO queue of pending publications, bounded by `capacity`.
///
/// The lock is never held across an await; waiters park on [`Notify`] and
/// re-check under the lock, so single-publisher FIFO order is preserved.
pub(crate) struct PublishQueue {
    inner: Mutex<VecDeque<Arc<Event>>>,
    capacity: usize,
    /// Signalled when an event is enqueued.
    available: Notify,
    /// Signalled when an event is dequeued.
    space: Notify,
}

impl PublishQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            available: Notify::new(),
            space: Notify::new(),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Pushes, waiting for space when full.
    pub(crate) async fn push_wait(&self, event: Arc<Event>) {
        let mut event = Some(event);
        loop {
            let space = self.space.notified();
            {
                let mut queue = self.inner.lock();
                if queue.len() < self.capacity {
                    queue.push_back(event.take().expect("event consumed twice"));
                    self.available.notify_one();
                    return;
                }
            }
            space.await;
        }
    }

    /// Pushes without waiting, applying `policy` when full. `Block` degrades
    /// to `Reject` here; use [`push_wait`](Self::push_wait) to actually wait.
    pub(crate) fn push_now(&self, event: Arc<Event>, policy: BackpressurePolicy) -> PushOutcome {
        let mut queue = self.inner.lock();
        if queue.len() < self.capacity {
            queue.push_back(event);
            self.available.notify_one();
            return PushOutcome::Pushed;
        }
        match policy {
            BackpressurePolicy::DropOldest => {
                queue.pop_front();
                queue.push_back(event);
                self.available.notify_one();
                PushOutcome::DroppedOldest
            }
            BackpressurePolicy::Block | BackpressurePolicy::Reject => PushOutcome::Rejected,
        }
    }

    /// Pushes unconditionally, ignoring capacity. Reserved for the bus's own
    /// overflow alerts so they cannot themselves be rejected.
    pub(crate) fn push_unbounded(&self, event: Arc<Event>) {
        let mut queue = self.inner.lock();
        queue.push_back(event);
        self.available.notify_one();
    }

    /// Pops the next event, waiting until one arrives or `shutdown` fires.
    /// Returns `None` once shut down and drained.
    pub(crate) async fn pop(&self, shutdown: &CancellationToken) -> Option<Arc<Event>> {
        loop {
            let available = self.available.notified();
            {
                let mut queue = self.inner.lock();
                if let Some(event) = queue.pop_front() {
                    self.space.notify_one();
                    return Some(event);
                }
            }
            if shutdown.is_cancelled() {
                return None;
            }
            tokio::select! {
                _ = available => {}
                _ = shutdown.cancelled() => {
                    // Drain whatever is left before exiting.
                    let mut queue = self.inner.lock();
                    return queue.pop_front();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> Arc<Event> {
        Arc::new(Event::new("custom/test", "test"))
    }

    #[tokio::test]
    async fn test_push_now_rejects_when_full() {
        let queue = PublishQueue::new(2);
        assert_eq!(
            queue.push_now(event(), BackpressurePolicy::Reject),
            PushOutcome::Pushed
        );
        assert_eq!(
            queue.push_now(event(), BackpressurePolicy::Reject),
            PushOutcome::Pushed
        );
        assert_eq!(
            queue.push_now(event(), BackpressurePolicy::Reject),
            PushOutcome::Rejected
        );
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_drop_oldest_evicts_head() {
        let queue = PublishQueue::new(1);
        let first = event();
        let second = event();
        queue.push_now(first.clone(), BackpressurePolicy::DropOldest);
        assert_eq!(
            queue.push_now(second.clone(), BackpressurePolicy::DropOldest),
            PushOutcome::DroppedOldest
        );

        let shutdown = CancellationToken::new();
        let popped = queue.pop(&shutdown).await.unwrap();
        assert_eq!(popped.id, second.id);
    }

    #[tokio::test]
    async fn test_push_wait_unblocks_after_pop() {
        let queue = Arc::new(PublishQueue::new(1));
        queue.push_now(event(), BackpressurePolicy::Reject);

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue.push_wait(event()).await;
            })
        };

        tokio::task::yield_now().await;
        let shutdown = CancellationToken::new();
        queue.pop(&shutdown).await.unwrap();

        waiter.await.unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_pop_returns_none_after_shutdown() {
        let queue = PublishQueue::new(4);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        assert!(queue.pop(&shutdown).await.is_none());
    }
}
