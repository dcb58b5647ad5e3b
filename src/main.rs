use anyhow::{bail, ensure, Result};
use clap::{Parser, ValueEnum};
use crossbeam_queue::SegQueue;
use rand::Rng;
use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    thread,
    time::Duration,
};

use twolock_queue::{
    strict_queues::CountableWrapper, ConcurrentLinkedQueue, ConcurrentQueue, Handle,
};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_thread_names(true)
        .without_time()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = BenchConfig::parse();
    config.validate()?;
    tracing::info!(
        queue = ?config.queue,
        producers = config.producer_threads,
        consumers = config.consumer_threads,
        mixed = config.mixed_threads,
        "starting benchmark"
    );

    match config.queue {
        QueueKind::TwoLock => benchmark_producer_consumer::<ConcurrentLinkedQueue<i32>>(&config),
        QueueKind::SegQueue => benchmark_producer_consumer::<SegQueue<i32>>(&config),
        QueueKind::ConcurrentQueue => {
            benchmark_producer_consumer::<concurrent_queue::ConcurrentQueue<i32>>(&config)
        }
        QueueKind::Lockfree => benchmark_producer_consumer::<lockfree::queue::Queue<i32>>(&config),
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum QueueKind {
    /// the two-lock linked queue of this crate
    TwoLock,
    /// crossbeam's segmented queue
    SegQueue,
    /// the unbounded queue of the concurrent-queue crate
    ConcurrentQueue,
    /// the Michael-Scott queue of the lockfree crate
    Lockfree,
}

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct BenchConfig {
    /// queue implementation to benchmark.
    #[arg(long, value_enum, default_value_t = QueueKind::TwoLock)]
    queue: QueueKind,
    /// number of elements to add to the queue before starting the main
    /// threaded test.
    #[arg(long, default_value_t = 0)]
    prefill: usize,
    /// number of threads pushing elements onto the queue.
    #[arg(long, default_value_t = 1)]
    producer_threads: usize,
    /// number of threads popping elements off the queue.
    #[arg(long, default_value_t = 1)]
    consumer_threads: usize,
    /// number of threads randomly choosing between a push and a pop.
    #[arg(long, default_value_t = 0)]
    mixed_threads: usize,
    /// probability that a mixed thread pushes rather than pops.
    #[arg(long, default_value_t = 0.5)]
    push_ratio: f64,
    /// duration in seconds to run the test
    #[arg(long, default_value_t = 1)]
    duration: u64,
    /// pin worker threads to cores, round-robin.
    #[arg(long)]
    pin_threads: bool,
}

impl BenchConfig {
    fn validate(&self) -> Result<()> {
        ensure!(self.duration > 0, "duration must not be zero");
        ensure!(
            (0.0..=1.0).contains(&self.push_ratio),
            "push ratio must be within [0, 1], got {}",
            self.push_ratio
        );
        ensure!(
            self.producer_threads + self.consumer_threads + self.mixed_threads > 0,
            "at least one worker thread is required"
        );
        Ok(())
    }

    fn worker_count(&self) -> usize {
        self.producer_threads + self.consumer_threads + self.mixed_threads
    }
}

/// Pins the calling thread to one of `cores`, chosen by `worker`.
fn pin_worker(cores: &[core_affinity::CoreId], worker: usize) {
    if cores.is_empty() {
        return;
    }
    let core = cores[worker % cores.len()];
    if core_affinity::set_for_current(core) {
        tracing::debug!(worker, core = core.id, "pinned worker");
    } else {
        tracing::warn!(worker, core = core.id, "failed to pin worker");
    }
}

fn benchmark_producer_consumer<C>(config: &BenchConfig) -> Result<()>
where
    C: ConcurrentQueue<i32> + Sync,
{
    let queue = CountableWrapper::wrap(C::new());
    {
        let mut handle = queue.register();
        for i in 0..config.prefill {
            handle.enqueue(i as i32);
        }
    }
    let prefilled = queue.enq_count();

    let cores = if config.pin_threads {
        let cores = core_affinity::get_core_ids().unwrap_or_default();
        if cores.is_empty() {
            tracing::warn!("no core ids available, running unpinned");
        }
        cores
    } else {
        Vec::new()
    };

    let done = AtomicBool::new(false);
    let enqueues = AtomicUsize::new(0);
    let dequeues = AtomicUsize::new(0);

    tracing::debug!(workers = config.worker_count(), "spawning workers");
    thread::scope(|s| {
        let mut worker = 0;
        for _ in 0..config.producer_threads {
            let (queue, done, enqueues, cores) = (&queue, &done, &enqueues, &cores);
            s.spawn(move || {
                pin_worker(cores, worker);
                let mut local_enqueues = 0;
                let mut handle = queue.register();
                while !done.load(Ordering::Relaxed) {
                    handle.enqueue(405);
                    local_enqueues += 1;
                }
                enqueues.fetch_add(local_enqueues, Ordering::Relaxed);
            });
            worker += 1;
        }
        for _ in 0..config.consumer_threads {
            let (queue, done, dequeues, cores) = (&queue, &done, &dequeues, &cores);
            s.spawn(move || {
                pin_worker(cores, worker);
                let mut local_dequeues = 0;
                let mut handle = queue.register();
                while !done.load(Ordering::Relaxed) {
                    handle.dequeue();
                    local_dequeues += 1;
                }
                dequeues.fetch_add(local_dequeues, Ordering::Relaxed);
            });
            worker += 1;
        }
        for _ in 0..config.mixed_threads {
            let (queue, done, enqueues, dequeues, cores) =
                (&queue, &done, &enqueues, &dequeues, &cores);
            let push_ratio = config.push_ratio;
            s.spawn(move || {
                pin_worker(cores, worker);
                let mut rng = rand::thread_rng();
                let (mut local_enqueues, mut local_dequeues) = (0, 0);
                let mut handle = queue.register();
                while !done.load(Ordering::Relaxed) {
                    if rng.gen_bool(push_ratio) {
                        handle.enqueue(405);
                        local_enqueues += 1;
                    } else {
                        handle.dequeue();
                        local_dequeues += 1;
                    }
                }
                enqueues.fetch_add(local_enqueues, Ordering::Relaxed);
                dequeues.fetch_add(local_dequeues, Ordering::Relaxed);
            });
            worker += 1;
        }

        thread::sleep(Duration::from_secs(config.duration));
        done.store(true, Ordering::Relaxed);
        tracing::debug!("stop signalled, joining workers");
    });

    let enqueues = enqueues.into_inner();
    let dequeues = dequeues.into_inner();
    println!(
        "throughput: {}",
        (enqueues + dequeues) as f64 / config.duration as f64
    );
    println!("number of enqueues: {}", enqueues);
    println!("number of dequeue attempts: {}", dequeues);

    let mut drained = 0usize;
    {
        let mut handle = queue.register();
        while handle.dequeue().is_some() {
            drained += 1;
        }
    }
    let successful = queue.deq_count() - drained;
    println!("number of successful dequeues: {}", successful);
    tracing::info!(drained, "drained remaining elements");

    if queue.enq_count() != queue.deq_count() {
        bail!(
            "lost or duplicated elements: {} enqueued ({} prefilled), {} dequeued",
            queue.enq_count(),
            prefilled,
            queue.deq_count()
        );
    }
    Ok(())
}
