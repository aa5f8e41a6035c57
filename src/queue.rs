//! Bounded drop-oldest queue
//!
//! Producers never wait: pushing into a full queue evicts a queued item and
//! hands it back to the caller for accounting, or refuses the new item when
//! everything queued outranks it. Consumers wait asynchronously
//! on [`DropOldestQueue::pop`]. Used by the decode pool (stale frames lose to
//! fresh ones) and the alert dispatcher (non-critical alerts lose first).

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// What a push did to the queue
#[derive(Debug, PartialEq, Eq)]
pub enum Push<T> {
    /// Queued with room to spare
    Queued,
    /// Queued; this older item made room
    Evicted(T),
    /// Not queued: the queue is full of items that outrank it
    Refused(T),
    /// Not queued: the queue is closed
    Closed(T),
}

/// Multi-producer multi-consumer bounded queue that evicts on overflow
pub struct DropOldestQueue<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
    capacity: usize,
}

impl<T> DropOldestQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Push an item, evicting the oldest when full
    pub fn push(&self, item: T) -> Push<T> {
        self.push_evicting(item, |_| true)
    }

    /// Push an item; when full, evict the oldest queued item matching
    /// `evictable`
    ///
    /// With nothing queued evictable, an evictable `item` is refused and
    /// any other item displaces the oldest queued one.
    pub fn push_evicting<F>(&self, item: T, evictable: F) -> Push<T>
    where
        F: Fn(&T) -> bool,
    {
        let pushed = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Push::Closed(item);
            }

            let pushed = if inner.items.len() >= self.capacity {
                let idx = inner.items.iter().position(|queued| evictable(queued));
                let evicted = match idx {
                    Some(idx) => inner.items.remove(idx),
                    None if evictable(&item) => return Push::Refused(item),
                    None => inner.items.pop_front(),
                };
                evicted.map_or(Push::Queued, Push::Evicted)
            } else {
                Push::Queued
            };

            inner.items.push_back(item);
            pushed
        };

        self.notify.notify_one();
        pushed
    }

    /// Drop everything queued; returns how many items were discarded
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let discarded = inner.items.len();
        inner.items.clear();
        discarded
    }

    /// Pop without waiting
    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().items.pop_front()
    }

    /// Wait for the next item
    ///
    /// Returns `None` once the queue is closed and drained. Cancel safe.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(item) = inner.items.pop_front() {
                    // pass the wakeup on in case more items are queued
                    if !inner.items.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Stop accepting items; waiting consumers drain what's left then get `None`
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
        // covers a consumer between its state check and registering interest
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
