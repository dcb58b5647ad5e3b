//! Unbounded FIFO queue built on a sentinel-headed linked list with separate
//! locks for the producer end and the consumer end.
//!
//! Producers only ever touch the tail and consumers only ever touch the head,
//! so a push and a take proceed in parallel. Enumeration is the one operation
//! that takes both locks, always tail lock first and head lock second.

use std::{
    fmt,
    iter::FusedIterator,
    marker::PhantomData,
    mem::MaybeUninit,
    ptr,
    sync::atomic::{AtomicPtr, Ordering},
};

use crossbeam_utils::CachePadded;
use parking_lot::{Mutex, MutexGuard};

use crate::{ConcurrentQueue, Handle};

struct Node<T> {
    next: AtomicPtr<Node<T>>,
    /// Uninitialised for the sentinel, or once the payload has been taken.
    data: MaybeUninit<T>,
}

impl<T> Node<T> {
    fn new(data: T) -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            data: MaybeUninit::new(data),
        }
    }

    fn sentinel() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            data: MaybeUninit::uninit(),
        }
    }
}

/// One end of the chain and the lock that guards moving it.
struct End<T> {
    lock: Mutex<()>,
    node: AtomicPtr<Node<T>>,
}

impl<T> End<T> {
    fn new(node: *mut Node<T>) -> Self {
        Self {
            lock: Mutex::new(()),
            node: AtomicPtr::new(node),
        }
    }
}

/// A thread-safe unbounded FIFO queue using the two-lock technique.
///
/// `head` always points at a sentinel whose payload is not part of the queue,
/// and `tail` always points at the most recently pushed node. The queue is
/// empty exactly when both point at the same node.
///
/// None of the locks are reentrant: pushing from inside the iterator given to
/// [`push_range`](Self::push_range), or touching the queue while holding an
/// [`Iter`] on the same thread, deadlocks.
pub struct ConcurrentLinkedQueue<T> {
    head: CachePadded<End<T>>,
    tail: CachePadded<End<T>>,
    _marker: PhantomData<Box<Node<T>>>,
}

// SAFETY: payloads are moved in by `push` and out by `take`, and only ever
// cloned by an `Iter` holding both locks, so no two threads access the same
// payload at once.
unsafe impl<T: Send> Send for ConcurrentLinkedQueue<T> {}
unsafe impl<T: Send> Sync for ConcurrentLinkedQueue<T> {}

impl<T> ConcurrentLinkedQueue<T> {
    pub fn new() -> Self {
        let sentinel = Box::into_raw(Box::new(Node::sentinel()));
        Self {
            head: CachePadded::new(End::new(sentinel)),
            tail: CachePadded::new(End::new(sentinel)),
            _marker: PhantomData,
        }
    }

    /// Returns `true` if the queue held no elements at the moment of the call.
    ///
    /// This does not take any lock, so the answer may already be stale when
    /// the caller acts on it.
    pub fn is_empty(&self) -> bool {
        loop {
            let head = self.head.node.load(Ordering::Acquire);
            let tail = self.tail.node.load(Ordering::Acquire);
            // A head that moved meanwhile may have been freed and its address
            // reused by the tail, so only an unchanged head can be compared.
            if self.head.node.load(Ordering::Acquire) == head {
                return head == tail;
            }
        }
    }

    /// Appends `item` at the tail.
    pub fn push(&self, item: T) {
        let guard = self.tail.lock.lock();
        self.link(&guard, item);
    }

    /// Appends every item of `items` in iteration order, holding the tail lock
    /// for the whole batch so no other producer interleaves with it.
    ///
    /// Consumers are not blocked: each item becomes visible to `take` as soon
    /// as it is linked.
    pub fn push_range<I>(&self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        let guard = self.tail.lock.lock();
        let mut linked = 0usize;
        for item in items {
            self.link(&guard, item);
            linked += 1;
        }
        tracing::trace!(linked, "pushed batch");
    }

    /// Removes and returns the oldest element, or `T::default()` if the queue
    /// is empty.
    ///
    /// A stored default value cannot be told apart from an empty queue; use
    /// [`try_take`](Self::try_take) when that matters.
    pub fn take(&self) -> T
    where
        T: Default,
    {
        self.try_take().unwrap_or_default()
    }

    /// Removes and returns the oldest element, or `None` if the queue is empty.
    pub fn try_take(&self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let guard = self.head.lock.lock();
        self.unlink(&guard)
    }

    /// Walks the queue from oldest to newest, yielding clones of the elements.
    ///
    /// Both locks are taken here and held until the walk is exhausted or the
    /// iterator is dropped, so the walk sees exactly the elements present when
    /// it started.
    pub fn iter(&self) -> Iter<'_, T> {
        let tail_guard = self.tail.lock.lock();
        let head_guard = self.head.lock.lock();
        let head = self.head.node.load(Ordering::Relaxed);
        // SAFETY: the sentinel is only freed by `unlink`, which needs the head lock.
        let next = unsafe { (*head).next.load(Ordering::Acquire) };
        Iter {
            next,
            guards: Some((tail_guard, head_guard)),
            _queue: PhantomData,
        }
    }

    fn link(&self, _tail_guard: &MutexGuard<'_, ()>, item: T) {
        let node = Box::into_raw(Box::new(Node::new(item)));
        let tail = self.tail.node.load(Ordering::Relaxed);
        // SAFETY: a consumer frees a node only after observing `tail` past it,
        // and `tail` only moves under the tail lock we hold.
        unsafe { (*tail).next.store(node, Ordering::Release) };
        self.tail.node.store(node, Ordering::Release);
    }

    fn unlink(&self, _head_guard: &MutexGuard<'_, ()>) -> Option<T> {
        let head = self.head.node.load(Ordering::Relaxed);
        if head == self.tail.node.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: only `unlink` frees the sentinel and we hold the head lock.
        let next = unsafe { (*head).next.load(Ordering::Acquire) };
        debug_assert!(!next.is_null(), "tail moved past a node without a successor");
        // SAFETY: `next` was fully built before it was published, and its
        // payload is read exactly once, here, as it turns into the sentinel.
        let item = unsafe { (*next).data.assume_init_read() };
        self.head.node.store(next, Ordering::Release);
        // SAFETY: the old sentinel is no longer reachable from `head`, and
        // producers never reach back behind `tail`.
        drop(unsafe { Box::from_raw(head) });
        Some(item)
    }
}

impl<T> Default for ConcurrentLinkedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ConcurrentLinkedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentLinkedQueue")
            .field("is_empty", &self.is_empty())
            .finish_non_exhaustive()
    }
}

impl<T> Drop for ConcurrentLinkedQueue<T> {
    fn drop(&mut self) {
        let sentinel = *self.head.node.get_mut();
        // SAFETY: `&mut self` rules out every other access, and each node in
        // the chain is owned by its predecessor, the sentinel by the queue.
        let mut node = unsafe { Box::from_raw(sentinel) };
        let mut released = 0usize;
        loop {
            let next = *node.next.get_mut();
            if next.is_null() {
                break;
            }
            node = unsafe { Box::from_raw(next) };
            // SAFETY: every node after the sentinel still holds its payload.
            unsafe { node.data.assume_init_drop() };
            released += 1;
        }
        if released > 0 {
            tracing::trace!(released, "dropped queued items");
        }
    }
}

impl<T> FromIterator<T> for ConcurrentLinkedQueue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let queue = Self::new();
        queue.push_range(iter);
        queue
    }
}

impl<T> Extend<T> for ConcurrentLinkedQueue<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.push_range(iter);
    }
}

impl<T> Extend<T> for &ConcurrentLinkedQueue<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.push_range(iter);
    }
}

impl<'q, T: Clone> IntoIterator for &'q ConcurrentLinkedQueue<T> {
    type Item = T;
    type IntoIter = Iter<'q, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Snapshot walk over a [`ConcurrentLinkedQueue`], created by
/// [`ConcurrentLinkedQueue::iter`].
pub struct Iter<'q, T> {
    next: *const Node<T>,
    /// Tail guard first, head guard second. `None` once the walk is exhausted.
    guards: Option<(MutexGuard<'q, ()>, MutexGuard<'q, ()>)>,
    _queue: PhantomData<&'q ConcurrentLinkedQueue<T>>,
}

impl<T> Iter<'_, T> {
    fn release(&mut self) {
        if let Some((tail_guard, head_guard)) = self.guards.take() {
            drop(head_guard);
            drop(tail_guard);
        }
    }
}

impl<T: Clone> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.next.is_null() {
            self.release();
            return None;
        }
        // SAFETY: `next` is non-null only while both locks are held, so the
        // node can neither be freed nor have its payload taken.
        let node = unsafe { &*self.next };
        self.next = node.next.load(Ordering::Acquire);
        // SAFETY: every node after the sentinel holds an initialised payload.
        Some(unsafe { node.data.assume_init_ref() }.clone())
    }
}

impl<T: Clone> FusedIterator for Iter<'_, T> {}

impl<T> fmt::Debug for Iter<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter")
            .field("locked", &self.guards.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: Send> ConcurrentQueue<T> for ConcurrentLinkedQueue<T> {
    fn new() -> Self {
        ConcurrentLinkedQueue::new()
    }

    fn register(&self) -> impl Handle<T> {
        QueueHandle { queue: self }
    }
}

pub struct QueueHandle<'q, T> {
    queue: &'q ConcurrentLinkedQueue<T>,
}

impl<T: Send> Handle<T> for QueueHandle<'_, T> {
    fn enqueue(&mut self, item: T) {
        self.queue.push(item);
    }

    fn dequeue(&mut self) -> Option<T> {
        self.queue.try_take()
    }
}
