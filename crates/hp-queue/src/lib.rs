//! Hotpool work queues
//!
//! - `ResizableBlockingQueue`: linked FIFO whose capacity can change while in use
//! - `ChannelQueue`: fixed-capacity, handoff and unbounded kinds
//! - `WorkQueue`: the minimal surface a pool executor needs from its queue
//! - `create_queue`: builds the queue for a configured `QueueKind`

use std::sync::Arc;
use std::time::Duration;

use hp_common::QueueKind;

pub mod channel;
pub mod error;
pub mod resizable;

pub use channel::ChannelQueue;
pub use error::QueueError;
pub use resizable::ResizableBlockingQueue;

pub type Result<T> = std::result::Result<T, QueueError>;

/// Operations a pool executor performs against its work queue.
///
/// `offer` hands the item back when it cannot be queued.
pub trait WorkQueue<T: Send>: Send + Sync {
    fn kind(&self) -> QueueKind;

    fn offer(&self, item: T) -> std::result::Result<(), T>;

    fn poll(&self) -> Option<T>;

    fn poll_timeout(&self, timeout: Duration) -> Option<T>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `None` for unbounded queues
    fn capacity(&self) -> Option<usize>;

    fn remaining_capacity(&self) -> usize {
        match self.capacity() {
            Some(capacity) => capacity.saturating_sub(self.len()),
            None => usize::MAX,
        }
    }

    fn drain_all(&self) -> Vec<T>;

    /// Access to the resize operation, only for `QueueKind::Resizable`
    fn as_resizable(&self) -> Option<&ResizableBlockingQueue<T>> {
        None
    }
}

impl<T: Send> WorkQueue<T> for ResizableBlockingQueue<T> {
    fn kind(&self) -> QueueKind {
        QueueKind::Resizable
    }

    fn offer(&self, item: T) -> std::result::Result<(), T> {
        ResizableBlockingQueue::offer(self, item)
    }

    fn poll(&self) -> Option<T> {
        ResizableBlockingQueue::poll(self)
    }

    fn poll_timeout(&self, timeout: Duration) -> Option<T> {
        ResizableBlockingQueue::poll_timeout(self, timeout)
    }

    fn len(&self) -> usize {
        self.size()
    }

    fn capacity(&self) -> Option<usize> {
        Some(ResizableBlockingQueue::capacity(self))
    }

    fn drain_all(&self) -> Vec<T> {
        ResizableBlockingQueue::drain_all(self)
    }

    fn as_resizable(&self) -> Option<&ResizableBlockingQueue<T>> {
        Some(self)
    }
}

/// Build the work queue for `kind`.
///
/// Priority ordering needs a comparable key that opaque tasks do not have, so
/// `PriorityLinked` behaves as a bounded FIFO. `Synchronous` and `Transfer`
/// ignore `capacity`.
pub fn create_queue<T: Send + 'static>(kind: QueueKind, capacity: usize) -> Result<Arc<dyn WorkQueue<T>>> {
    let queue: Arc<dyn WorkQueue<T>> = match kind {
        QueueKind::Resizable => Arc::new(ResizableBlockingQueue::new(capacity)?),
        QueueKind::Array | QueueKind::Linked | QueueKind::LinkedDeque | QueueKind::PriorityLinked => {
            if capacity == 0 {
                return Err(QueueError::InvalidCapacity(capacity));
            }
            Arc::new(ChannelQueue::bounded(kind, capacity))
        }
        QueueKind::Synchronous => Arc::new(ChannelQueue::handoff()),
        QueueKind::Transfer => Arc::new(ChannelQueue::unbounded(kind)),
    };
    Ok(queue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_resizable_kind_exposes_resize() {
        for kind in QueueKind::ALL {
            let queue = create_queue::<u32>(kind, 8).unwrap();
            assert_eq!(queue.kind(), kind);
            assert_eq!(queue.as_resizable().is_some(), kind.is_resizable());
        }
    }

    #[test]
    fn test_bounded_kinds_reject_zero_capacity() {
        assert!(create_queue::<u32>(QueueKind::Array, 0).is_err());
        assert!(create_queue::<u32>(QueueKind::Resizable, 0).is_err());
        assert!(create_queue::<u32>(QueueKind::Synchronous, 0).is_ok());
    }

    #[test]
    fn test_resize_through_trait_object() {
        let queue = create_queue::<u32>(QueueKind::Resizable, 1).unwrap();
        assert!(queue.offer(1).is_ok());
        assert_eq!(queue.offer(2), Err(2));

        queue.as_resizable().unwrap().set_capacity(2).unwrap();
        assert!(queue.offer(2).is_ok());
        assert_eq!(queue.capacity(), Some(2));
    }
}
