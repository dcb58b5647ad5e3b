pub mod linked_queue;
pub mod strict_queues;

pub use linked_queue::ConcurrentLinkedQueue;

pub trait ConcurrentQueue<T> {
    /// Creates a new, empty queue with default configuration
    fn new() -> Self;
    /// Returns a thread handle to the queue, which can be used for enqueues and dequeues
    fn register(&self) -> impl Handle<T>;
}

pub trait Handle<T> {
    fn enqueue(&mut self, item: T);

    fn dequeue(&mut self) -> Option<T>;
}
