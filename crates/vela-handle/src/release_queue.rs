//! Deferred release queue for finalized proxies.
//!
//! A [`ManagedProxy`](crate::ManagedProxy) may be dropped on any thread, but
//! native references may only be released on the engine thread. Dropping the
//! last clone of a live proxy pushes its handle here; the engine thread drains
//! the queue through [`HandleRegistry::drain_finalized`](crate::HandleRegistry::drain_finalized)
//! before running its next job.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::{NativeHandle, ProxyId};

#[derive(Debug)]
struct Inner {
    queue: Mutex<VecDeque<(ProxyId, NativeHandle)>>,
    /// Fast check for pending items (avoids lock acquisition on hot path)
    pending: AtomicU64,
}

/// Thread-safe queue of proxies awaiting native release.
#[derive(Debug, Clone)]
pub struct ReleaseQueue {
    inner: Arc<Inner>,
}

impl Default for ReleaseQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReleaseQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::with_capacity(8)),
                pending: AtomicU64::new(0),
            }),
        }
    }

    /// Queue a finalized proxy. Callable from any thread.
    pub fn defer(&self, id: ProxyId, handle: NativeHandle) {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back((id, handle));
        self.inner.pending.fetch_add(1, Ordering::Release);

        tracing::trace!("Deferred release of {} (pending: {})", handle, self.len());
    }

    #[inline]
    pub fn has_pending(&self) -> bool {
        self.inner.pending.load(Ordering::Acquire) > 0
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.inner.pending.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.has_pending()
    }

    /// Take every pending entry in FIFO order.
    pub fn take_all(&self) -> VecDeque<(ProxyId, NativeHandle)> {
        if !self.has_pending() {
            return VecDeque::new();
        }

        let taken = std::mem::take(
            &mut *self
                .inner
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        self.inner
            .pending
            .fetch_sub(taken.len() as u64, Ordering::Release);
        taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(index: u32) -> ProxyId {
        ProxyId { index, generation: 0 }
    }

    #[test]
    fn test_queue_creation() {
        let queue = ReleaseQueue::new();
        assert!(queue.is_empty());
        assert!(queue.take_all().is_empty());
    }

    #[test]
    fn test_take_all_is_fifo() {
        let queue = ReleaseQueue::new();
        queue.defer(id(0), NativeHandle::from_raw(1));
        queue.defer(id(1), NativeHandle::from_raw(2));
        assert_eq!(queue.len(), 2);

        let taken: Vec<_> = queue.take_all().into_iter().map(|(_, h)| h.as_raw()).collect();
        assert_eq!(taken, vec![1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_defer_from_other_thread() {
        let queue = ReleaseQueue::new();
        let remote = queue.clone();
        std::thread::spawn(move || remote.defer(id(3), NativeHandle::from_raw(9)))
            .join()
            .unwrap();

        assert!(queue.has_pending());
        assert_eq!(queue.take_all().len(), 1);
    }
}
