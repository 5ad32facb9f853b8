//! Bounded FIFO of pending speak requests.
//!
//! Producers never block: a full queue rejects. A capacity of 0 means
//! unbounded. The single worker blocks in
//! [`SpeechQueue::pop`] until an item arrives or the queue is closed.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use super::item::SpeakItem;

#[derive(Debug, Default)]
struct QueueInner {
    items: VecDeque<SpeakItem>,
    closed: bool,
}

#[derive(Debug)]
pub struct SpeechQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
    capacity: usize,
}

impl SpeechQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            available: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Maximum pending items; 0 is unbounded.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append `item`. Returns false for blank text, a full queue, or a
    /// closed queue.
    pub fn push(&self, item: SpeakItem) -> bool {
        if item.is_blank() {
            return false;
        }
        let mut inner = self.lock();
        self.push_locked(&mut inner, item)
    }

    fn push_locked(&self, inner: &mut QueueInner, item: SpeakItem) -> bool {
        let full = self.capacity != 0 && inner.items.len() >= self.capacity;
        if inner.closed || full {
            return false;
        }
        inner.items.push_back(item);
        self.available.notify_one();
        true
    }

    /// Drop every pending item and then push `item`, as one step with
    /// respect to other producers. `before` runs first under the same lock
    /// (used to stop playback). Returns the push result and how many items
    /// were discarded.
    pub fn replace_all(&self, item: SpeakItem, before: impl FnOnce()) -> (bool, usize) {
        let mut inner = self.lock();
        before();
        let dropped = inner.items.len();
        inner.items.clear();
        let ok = !item.is_blank() && self.push_locked(&mut inner, item);
        (ok, dropped)
    }

    /// Drop every pending item. Returns how many were discarded.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let dropped = inner.items.len();
        inner.items.clear();
        dropped
    }

    /// Block until an item is available. `None` once the queue is closed.
    pub fn pop(&self) -> Option<SpeakItem> {
        let guard = self.lock();
        let mut inner = self
            .available
            .wait_while(guard, |q| q.items.is_empty() && !q.closed)
            .unwrap_or_else(PoisonError::into_inner);
        if inner.closed {
            return None;
        }
        inner.items.pop_front()
    }

    pub fn try_pop(&self) -> Option<SpeakItem> {
        self.lock().items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reject further pushes and wake the worker so `pop` returns `None`.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.items.clear();
        drop(inner);
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
