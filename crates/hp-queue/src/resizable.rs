//! ResizableBlockingQueue - FIFO blocking queue whose capacity can change while in use
//!
//! Two-lock design:
//! - the put side owns the tail segment (newest items) behind `put_lock`, with `not_full`
//! - the take side owns the head segment (oldest items) behind `take_lock`, with `not_empty`
//! - `count` is shared and atomic, so each side only needs its own lock on the fast path
//!
//! When the head segment runs dry the take side splices the whole tail segment onto it
//! (O(1) linked list append). Every item in the head segment is older than every item in
//! the tail segment, which keeps FIFO order.
//!
//! Lock order is always take then put. The put path never holds `put_lock` while acquiring
//! `take_lock`; it releases first and then signals, like the take path does in reverse.

use std::collections::LinkedList;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::debug;

use crate::error::QueueError;
use crate::Result;

pub struct ResizableBlockingQueue<T> {
    capacity: AtomicUsize,
    count: AtomicUsize,

    /// Head segment, consumed by take/poll
    take_lock: Mutex<LinkedList<T>>,
    not_empty: Condvar,

    /// Tail segment, appended to by put/offer
    put_lock: Mutex<LinkedList<T>>,
    not_full: Condvar,
}

impl<T> ResizableBlockingQueue<T> {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(QueueError::InvalidCapacity(capacity));
        }
        Ok(Self {
            capacity: AtomicUsize::new(capacity),
            count: AtomicUsize::new(0),
            take_lock: Mutex::new(LinkedList::new()),
            not_empty: Condvar::new(),
            put_lock: Mutex::new(LinkedList::new()),
            not_full: Condvar::new(),
        })
    }

    /// Queue bounded only by `usize::MAX`
    pub fn unbounded() -> Self {
        Self {
            capacity: AtomicUsize::new(usize::MAX),
            count: AtomicUsize::new(0),
            take_lock: Mutex::new(LinkedList::new()),
            not_empty: Condvar::new(),
            put_lock: Mutex::new(LinkedList::new()),
            not_full: Condvar::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::SeqCst)
    }

    /// `capacity - size`, or 0 while a shrink has left the queue over capacity
    pub fn remaining_capacity(&self) -> usize {
        self.capacity().saturating_sub(self.size())
    }

    /// Replace the capacity.
    ///
    /// Growing past a queue that was full under the old capacity wakes every
    /// blocked producer. Shrinking never drops items; producers simply block
    /// until consumers bring the size back under the new capacity.
    pub fn set_capacity(&self, new_capacity: usize) -> Result<()> {
        if new_capacity == 0 {
            return Err(QueueError::InvalidCapacity(new_capacity));
        }

        let (_head, _tail) = self.fully_lock();
        let old_capacity = self.capacity.swap(new_capacity, Ordering::SeqCst);
        let size = self.count.load(Ordering::SeqCst);

        if new_capacity > old_capacity && size >= old_capacity {
            self.not_full.notify_all();
        }

        debug!(
            old_capacity = old_capacity,
            new_capacity = new_capacity,
            size = size,
            "Queue capacity changed"
        );
        Ok(())
    }

    /// Append, blocking while the queue is at capacity.
    pub fn put(&self, item: T) {
        let mut tail = self.put_lock.lock();
        while self.count.load(Ordering::SeqCst) >= self.capacity() {
            self.not_full.wait(&mut tail);
        }
        let c = self.enqueue(&mut tail, item);
        drop(tail);
        if c == 0 {
            self.signal_not_empty();
        }
    }

    /// Append without blocking. Hands the item back if the queue is full.
    pub fn offer(&self, item: T) -> std::result::Result<(), T> {
        if self.count.load(Ordering::SeqCst) >= self.capacity() {
            return Err(item);
        }

        let mut tail = self.put_lock.lock();
        if self.count.load(Ordering::SeqCst) >= self.capacity() {
            return Err(item);
        }
        let c = self.enqueue(&mut tail, item);
        drop(tail);
        if c == 0 {
            self.signal_not_empty();
        }
        Ok(())
    }

    /// Append, waiting up to `timeout` for space. Hands the item back on timeout.
    pub fn offer_timeout(&self, item: T, timeout: Duration) -> std::result::Result<(), T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut tail = self.put_lock.lock();
        while self.count.load(Ordering::SeqCst) >= self.capacity() {
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Err(item);
                    }
                    self.not_full.wait_until(&mut tail, deadline);
                }
                None => self.not_full.wait(&mut tail),
            }
        }
        let c = self.enqueue(&mut tail, item);
        drop(tail);
        if c == 0 {
            self.signal_not_empty();
        }
        Ok(())
    }

    /// Remove the head, blocking until an item is available.
    pub fn take(&self) -> T {
        let mut head = self.take_lock.lock();
        while self.count.load(Ordering::SeqCst) == 0 {
            self.not_empty.wait(&mut head);
        }
        let (item, c) = self.dequeue(&mut head);
        drop(head);
        if c >= self.capacity() {
            self.signal_not_full();
        }
        item
    }

    /// Remove the head without blocking.
    pub fn poll(&self) -> Option<T> {
        if self.count.load(Ordering::SeqCst) == 0 {
            return None;
        }

        let mut head = self.take_lock.lock();
        if self.count.load(Ordering::SeqCst) == 0 {
            return None;
        }
        let (item, c) = self.dequeue(&mut head);
        drop(head);
        if c >= self.capacity() {
            self.signal_not_full();
        }
        Some(item)
    }

    /// Remove the head, waiting up to `timeout` for an item.
    pub fn poll_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut head = self.take_lock.lock();
        while self.count.load(Ordering::SeqCst) == 0 {
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return None;
                    }
                    self.not_empty.wait_until(&mut head, deadline);
                }
                None => self.not_empty.wait(&mut head),
            }
        }
        let (item, c) = self.dequeue(&mut head);
        drop(head);
        if c >= self.capacity() {
            self.signal_not_full();
        }
        Some(item)
    }

    /// Remove up to `max_elements` items into `sink` under a single acquisition of both locks.
    pub fn drain_to<E: Extend<T>>(&self, sink: &mut E, max_elements: usize) -> usize {
        if max_elements == 0 {
            return 0;
        }

        let (mut head, mut tail) = self.fully_lock();
        head.append(&mut tail);

        let n = max_elements.min(head.len());
        let rest = head.split_off(n);
        let drained = std::mem::replace(&mut *head, rest);
        sink.extend(drained);

        if n > 0 {
            self.release(n);
        }
        n
    }

    /// Remove every queued item.
    pub fn drain_all(&self) -> Vec<T> {
        let mut drained = Vec::new();
        self.drain_to(&mut drained, usize::MAX);
        drained
    }

    /// Drop every queued item.
    pub fn clear(&self) {
        let (mut head, mut tail) = self.fully_lock();
        let n = head.len() + tail.len();
        head.clear();
        tail.clear();
        if n > 0 {
            self.release(n);
        }
    }

    /// Remove the first item (oldest first) matching `predicate`.
    pub fn remove_first<F>(&self, mut predicate: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        let (mut head, mut tail) = self.fully_lock();
        head.append(&mut tail);

        let index = head.iter().position(|item| predicate(item))?;
        let mut rest = head.split_off(index);
        let removed = rest.pop_front();
        head.append(&mut rest);

        if removed.is_some() {
            self.release(1);
        }
        removed
    }

    /// Take both locks, in take-then-put order.
    fn fully_lock(&self) -> (MutexGuard<'_, LinkedList<T>>, MutexGuard<'_, LinkedList<T>>) {
        let head = self.take_lock.lock();
        let tail = self.put_lock.lock();
        (head, tail)
    }

    /// Append under the put lock. Returns the count before the insert.
    fn enqueue(&self, tail: &mut LinkedList<T>, item: T) -> usize {
        tail.push_back(item);
        let c = self.count.fetch_add(1, Ordering::SeqCst);
        if c + 1 < self.capacity() {
            self.not_full.notify_one();
        }
        c
    }

    /// Remove the oldest item under the take lock. Returns it with the count before removal.
    ///
    /// Callers guarantee `count > 0`.
    fn dequeue(&self, head: &mut LinkedList<T>) -> (T, usize) {
        if head.is_empty() {
            let mut tail = self.put_lock.lock();
            head.append(&mut tail);
        }
        let item = head
            .pop_front()
            .unwrap_or_else(|| unreachable!("count > 0 but both segments are empty"));
        let c = self.count.fetch_sub(1, Ordering::SeqCst);
        if c > 1 {
            self.not_empty.notify_one();
        }
        (item, c)
    }

    /// Account for `n` items removed while both locks are held.
    fn release(&self, n: usize) {
        let before = self.count.fetch_sub(n, Ordering::SeqCst);
        if before >= self.capacity() {
            self.not_full.notify_all();
        }
    }

    fn signal_not_empty(&self) {
        let _head = self.take_lock.lock();
        self.not_empty.notify_one();
    }

    fn signal_not_full(&self) {
        let _tail = self.put_lock.lock();
        self.not_full.notify_one();
    }
}

impl<T: Clone> ResizableBlockingQueue<T> {
    /// Clone of the head item, if any.
    pub fn peek(&self) -> Option<T> {
        if self.count.load(Ordering::SeqCst) == 0 {
            return None;
        }
        let mut head = self.take_lock.lock();
        if head.is_empty() {
            let mut tail = self.put_lock.lock();
            head.append(&mut tail);
        }
        head.front().cloned()
    }

    /// Weakly consistent snapshot, oldest first.
    ///
    /// The snapshot is taken under both locks and then released, so iterating it
    /// never blocks producers or consumers. Changes made after the snapshot are
    /// not reflected.
    pub fn iter(&self) -> std::vec::IntoIter<T> {
        let (head, tail) = self.fully_lock();
        let snapshot: Vec<T> = head.iter().chain(tail.iter()).cloned().collect();
        snapshot.into_iter()
    }
}

impl<T> std::fmt::Debug for ResizableBlockingQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResizableBlockingQueue")
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .finish()
    }
}
