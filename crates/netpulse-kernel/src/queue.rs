//! Work queues connecting the poll scheduler, the collector pool and the
//! cache loader.
//!
//! A queue is an unbounded FIFO over tagged entries: real work plus an
//! explicit `Shutdown` sentinel, one per consumer, posted by the shutdown
//! coordinator. Any task may enqueue; only the dedicated consumers dequeue.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::item::CollectionItem;

/// Entry of the main collection queue.
#[derive(Debug)]
pub enum QueueEntry {
    /// An item due for polling, busy flag already set by the scheduler.
    Item(Arc<CollectionItem>),
    /// Terminate one collector worker.
    Shutdown,
}

/// Entry of the cache-loader queue.
#[derive(Debug)]
pub enum CacheEntry {
    /// An item whose historical cache must be (re)loaded.
    Load(Arc<CollectionItem>),
    /// Terminate the cache loader.
    Shutdown,
}

/// An async multi-producer FIFO with a depth gauge.
///
/// `recv` registers for notification *before* checking the queue so a send
/// racing with an empty check cannot be lost.
pub struct SignalQueue<T> {
    inner: Arc<QueueInner<T>>,
}

struct QueueInner<T> {
    queue: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> Clone for SignalQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for SignalQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SignalQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
            }),
        }
    }

    pub fn send(&self, entry: T) {
        self.inner.queue.lock().unwrap().push_back(entry);
        self.inner.notify.notify_one();
    }

    /// Receive the next entry, waiting until one is available.
    pub async fn recv(&self) -> T {
        loop {
            let notified = self.inner.notify.notified();

            if let Some(entry) = self.inner.queue.lock().unwrap().pop_front() {
                // Wake the next waiter in case several sends landed while
                // only one notification was stored.
                self.inner.notify.notify_one();
                return entry;
            }

            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// FIFO of items due for collection, consumed by the collector pool.
pub type CollectionQueue = SignalQueue<QueueEntry>;

/// FIFO of items awaiting cache warm-up, consumed by the cache loader.
pub type CacheLoaderQueue = SignalQueue<CacheEntry>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
