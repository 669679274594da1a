//! Fixed-capacity queue kinds backed by flume channels
//!
//! Capacity is fixed at construction. A zero-capacity channel is a direct handoff:
//! `offer` only succeeds while a worker is blocked in `poll_timeout`.

use std::time::{Duration, Instant};

use flume::{Receiver, Sender, TrySendError};
use hp_common::QueueKind;

use crate::WorkQueue;

pub struct ChannelQueue<T> {
    kind: QueueKind,
    capacity: Option<usize>,
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> ChannelQueue<T> {
    /// Bounded FIFO holding at most `capacity` items
    pub fn bounded(kind: QueueKind, capacity: usize) -> Self {
        let (tx, rx) = flume::bounded(capacity);
        Self {
            kind,
            capacity: Some(capacity),
            tx,
            rx,
        }
    }

    /// Direct handoff with no buffer
    pub fn handoff() -> Self {
        Self::bounded(QueueKind::Synchronous, 0)
    }

    pub fn unbounded(kind: QueueKind) -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            kind,
            capacity: None,
            tx,
            rx,
        }
    }
}

impl<T: Send> WorkQueue<T> for ChannelQueue<T> {
    fn kind(&self) -> QueueKind {
        self.kind
    }

    fn offer(&self, item: T) -> Result<(), T> {
        self.tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(item) | TrySendError::Disconnected(item) => item,
        })
    }

    fn poll(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    fn poll_timeout(&self, timeout: Duration) -> Option<T> {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.rx.recv_deadline(deadline).ok(),
            None => self.rx.recv().ok(),
        }
    }

    fn len(&self) -> usize {
        self.rx.len()
    }

    fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    fn drain_all(&self) -> Vec<T> {
        self.rx.drain().collect()
    }
}
