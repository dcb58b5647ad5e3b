//! Third-party strict FIFO queues behind the crate's queue seam, used as
//! baselines by the benchmark, plus a wrapper that counts operations.

pub mod baselines;
pub mod countable_wrapper;

pub use countable_wrapper::CountableWrapper;
