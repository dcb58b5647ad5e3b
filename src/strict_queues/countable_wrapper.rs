use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{ConcurrentQueue, Handle};

/// Wraps a queue and counts the enqueues and successful dequeues done through
/// its handles.
///
/// Handles count locally and publish their totals when dropped, so the
/// counters only reflect handles that are gone.
pub struct CountableWrapper<Q> {
    queue: Q,
    enq_count: AtomicUsize,
    deq_count: AtomicUsize,
}

impl<Q> CountableWrapper<Q> {
    pub fn wrap(queue: Q) -> Self {
        Self {
            queue,
            enq_count: 0.into(),
            deq_count: 0.into(),
        }
    }

    pub fn inner(&self) -> &Q {
        &self.queue
    }

    pub fn enq_count(&self) -> usize {
        self.enq_count.load(Ordering::Relaxed)
    }

    pub fn deq_count(&self) -> usize {
        self.deq_count.load(Ordering::Relaxed)
    }
}

impl<T, Q> ConcurrentQueue<T> for CountableWrapper<Q>
where
    Q: ConcurrentQueue<T>,
{
    fn new() -> Self {
        Self::wrap(Q::new())
    }

    fn register(&self) -> impl Handle<T> {
        CountingHandle {
            inner: self.queue.register(),
            enq_count: &self.enq_count,
            deq_count: &self.deq_count,
            local_enqueues: 0,
            local_dequeues: 0,
        }
    }
}

struct CountingHandle<'q, H> {
    inner: H,
    enq_count: &'q AtomicUsize,
    deq_count: &'q AtomicUsize,
    local_enqueues: usize,
    local_dequeues: usize,
}

impl<T, H: Handle<T>> Handle<T> for CountingHandle<'_, H> {
    fn enqueue(&mut self, item: T) {
        self.local_enqueues += 1;
        self.inner.enqueue(item)
    }

    fn dequeue(&mut self) -> Option<T> {
        let item = self.inner.dequeue();
        if item.is_some() {
            self.local_dequeues += 1;
        }
        item
    }
}

impl<H> Drop for CountingHandle<'_, H> {
    fn drop(&mut self) {
        self.enq_count.fetch_add(self.local_enqueues, Ordering::Relaxed);
        self.deq_count.fetch_add(self.local_dequeues, Ordering::Relaxed);
    }
}
