use crossbeam_queue::SegQueue;
use lockfree::queue::Queue as LockfreeQueue;

use crate::{ConcurrentQueue, Handle};

/// The push/pop pair every baseline already offers through `&self`.
pub trait StrictQueue<T> {
    fn push_back(&self, item: T);
    fn pop_front(&self) -> Option<T>;
}

/// A handle that just forwards to a shared [`StrictQueue`].
pub struct StrictHandle<'q, Q> {
    queue: &'q Q,
}

impl<T, Q: StrictQueue<T>> Handle<T> for StrictHandle<'_, Q> {
    fn enqueue(&mut self, item: T) {
        self.queue.push_back(item);
    }

    fn dequeue(&mut self) -> Option<T> {
        self.queue.pop_front()
    }
}

impl<T> StrictQueue<T> for SegQueue<T> {
    fn push_back(&self, item: T) {
        self.push(item);
    }

    fn pop_front(&self) -> Option<T> {
        self.pop()
    }
}

impl<T> ConcurrentQueue<T> for SegQueue<T> {
    fn new() -> Self {
        SegQueue::new()
    }

    fn register(&self) -> impl Handle<T> {
        StrictHandle { queue: self }
    }
}

impl<T> StrictQueue<T> for ::concurrent_queue::ConcurrentQueue<T> {
    fn push_back(&self, item: T) {
        // Unbounded and never closed, so the push cannot fail.
        let _ = self.push(item);
    }

    fn pop_front(&self) -> Option<T> {
        self.pop().ok()
    }
}

impl<T> ConcurrentQueue<T> for ::concurrent_queue::ConcurrentQueue<T> {
    fn new() -> Self {
        ::concurrent_queue::ConcurrentQueue::unbounded()
    }

    fn register(&self) -> impl Handle<T> {
        StrictHandle { queue: self }
    }
}

impl<T> StrictQueue<T> for LockfreeQueue<T> {
    fn push_back(&self, item: T) {
        self.push(item);
    }

    fn pop_front(&self) -> Option<T> {
        self.pop()
    }
}

impl<T> ConcurrentQueue<T> for LockfreeQueue<T> {
    fn new() -> Self {
        LockfreeQueue::new()
    }

    fn register(&self) -> impl Handle<T> {
        StrictHandle { queue: self }
    }
}

#[cfg(test)]
mod test {
    use crossbeam_queue::SegQueue;

    use super::LockfreeQueue;
    use crate::{ConcurrentQueue, Handle};

    fn fifo_roundtrip<Q: ConcurrentQueue<u32>>() {
        let queue = Q::new();
        let mut handle = queue.register();
        assert_eq!(handle.dequeue(), None);
        for i in 0..10 {
            handle.enqueue(i);
        }
        for i in 0..10 {
            assert_eq!(handle.dequeue(), Some(i));
        }
        assert_eq!(handle.dequeue(), None);
    }

    #[test]
    fn seg_queue_is_fifo() {
        fifo_roundtrip::<SegQueue<u32>>();
    }

    #[test]
    fn concurrent_queue_is_fifo() {
        fifo_roundtrip::<::concurrent_queue::ConcurrentQueue<u32>>();
    }

    #[test]
    fn lockfree_queue_is_fifo() {
        fifo_roundtrip::<LockfreeQueue<u32>>();
    }
}
