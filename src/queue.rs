//! Bounded, path-deduplicating upload queue
//!
//! The single hand-off point between the coalescer and the worker pool.
//! FIFO by first-enqueue time, with one twist: a push for a path that is
//! already queued replaces that entry in place, keeping its original
//! position. The latest content always wins without letting an entry starve
//! behind updates to other paths.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{Result, SyncError};
use crate::types::UploadIntent;

struct Inner {
    order: VecDeque<PathBuf>,
    slots: HashMap<PathBuf, UploadIntent>,
    closed: bool,
}

/// Ordered queue of upload intents, at most one entry per path.
///
/// `push` for a brand-new path suspends when the queue is at capacity
/// (backpressure); replacement pushes never block. `pop` suspends until an
/// entry is available or the queue is closed and drained.
pub struct UploadQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    space: Notify,
    items: Notify,
}

impl UploadQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                order: VecDeque::new(),
                slots: HashMap::new(),
                closed: false,
            }),
            capacity,
            space: Notify::new(),
            items: Notify::new(),
        }
    }

    /// Enqueue an intent, replacing any queued entry for the same path in
    /// place. Suspends while the queue is full of other paths.
    pub async fn push(&self, intent: UploadIntent) -> Result<()> {
        loop {
            let space = self.space.notified();
            {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return Err(SyncError::QueueClosed);
                }
                if let Some(slot) = inner.slots.get_mut(&intent.path) {
                    // Supersede: newer content, original queue position
                    *slot = intent;
                    return Ok(());
                }
                if inner.slots.len() < self.capacity {
                    inner.order.push_back(intent.path.clone());
                    inner.slots.insert(intent.path.clone(), intent);
                    drop(inner);
                    self.items.notify_one();
                    return Ok(());
                }
            }
            space.await;
        }
    }

    /// Dequeue the oldest intent. Returns `None` once the queue is closed
    /// and fully drained.
    pub async fn pop(&self) -> Option<UploadIntent> {
        loop {
            let items = self.items.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(path) = inner.order.pop_front() {
                    let intent = inner.slots.remove(&path);
                    drop(inner);
                    self.space.notify_one();
                    if let Some(intent) = intent {
                        return Some(intent);
                    }
                    continue;
                }
                if inner.closed {
                    return None;
                }
            }
            items.await;
        }
    }

    /// Mark the queued intent for `path` cancelled, if one exists. The entry
    /// stays in its slot; workers discard it on dequeue.
    pub fn cancel(&self, path: &Path) -> bool {
        let inner = self.inner.lock();
        match inner.slots.get(path) {
            Some(slot) => {
                slot.cancel();
                true
            }
            None => false,
        }
    }

    /// Close the queue: wake all waiters, reject further pushes. Already
    /// queued entries can still be popped.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            inner.closed = true;
        }
        self.items.notify_waiters();
        self.space.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn intent(path: &str, key: &str) -> UploadIntent {
        UploadIntent::new(path, key)
    }

    #[tokio::test]
    async fn fifo_across_paths() {
        let queue = UploadQueue::new(8);
        queue.push(intent("/data/a", "a")).await.unwrap();
        queue.push(intent("/data/b", "b")).await.unwrap();

        assert_eq!(queue.pop().await.unwrap().key, "a");
        assert_eq!(queue.pop().await.unwrap().key, "b");
    }

    #[tokio::test]
    async fn repush_replaces_in_place() {
        let queue = UploadQueue::new(8);
        queue.push(intent("/data/a", "a-v1")).await.unwrap();
        queue.push(intent("/data/b", "b")).await.unwrap();
        queue.push(intent("/data/a", "a-v2")).await.unwrap();

        assert_eq!(queue.len(), 2);
        // Replacement kept /data/a at the front of the queue
        assert_eq!(queue.pop().await.unwrap().key, "a-v2");
        assert_eq!(queue.pop().await.unwrap().key, "b");
    }

    #[tokio::test]
    async fn cancel_marks_queued_entry() {
        let queue = UploadQueue::new(8);
        queue.push(intent("/data/a", "a")).await.unwrap();

        assert!(queue.cancel(Path::new("/data/a")));
        assert!(!queue.cancel(Path::new("/data/missing")));

        let popped = queue.pop().await.unwrap();
        assert!(popped.is_cancelled());
    }

    #[tokio::test]
    async fn push_blocks_at_capacity_until_pop() {
        let queue = Arc::new(UploadQueue::new(1));
        queue.push(intent("/data/a", "a")).await.unwrap();

        let pusher = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push(intent("/data/b", "b")).await })
        };

        // The pusher must still be suspended on the full queue
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pusher.is_finished());

        assert_eq!(queue.pop().await.unwrap().key, "a");
        pusher.await.unwrap().unwrap();
        assert_eq!(queue.pop().await.unwrap().key, "b");
    }

    #[tokio::test]
    async fn replacement_push_never_blocks() {
        let queue = UploadQueue::new(1);
        queue.push(intent("/data/a", "a-v1")).await.unwrap();
        // Same path: replaces in place even though the queue is full
        queue.push(intent("/data/a", "a-v2")).await.unwrap();
        assert_eq!(queue.pop().await.unwrap().key, "a-v2");
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let queue = UploadQueue::new(8);
        queue.push(intent("/data/a", "a")).await.unwrap();
        queue.close();

        assert!(matches!(
            queue.push(intent("/data/b", "b")).await,
            Err(SyncError::QueueClosed)
        ));
        assert_eq!(queue.pop().await.unwrap().key, "a");
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn close_wakes_blocked_pop() {
        let queue = Arc::new(UploadQueue::new(8));
        let popper = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        assert!(popper.await.unwrap().is_none());
    }
}
