use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    thread,
};

use twolock_queue::ConcurrentLinkedQueue;

const PRODUCERS: usize = 4;
const CONSUMERS: usize = 4;
const PER_PRODUCER: usize = 5_000;

#[test]
fn producers_and_consumers_exchange_every_value_once() {
    let queue = ConcurrentLinkedQueue::new();
    let producers_done = AtomicBool::new(false);
    let finished_producers = AtomicUsize::new(0);
    let found = Mutex::new(Vec::new());

    thread::scope(|s| {
        for p in 0..PRODUCERS {
            let (queue, finished_producers, producers_done) =
                (&queue, &finished_producers, &producers_done);
            s.spawn(move || {
                for i in 0..PER_PRODUCER {
                    queue.push((p, i));
                }
                if finished_producers.fetch_add(1, Ordering::AcqRel) + 1 == PRODUCERS {
                    producers_done.store(true, Ordering::Release);
                }
            });
        }
        for _ in 0..CONSUMERS {
            let (queue, producers_done, found) = (&queue, &producers_done, &found);
            s.spawn(move || {
                let mut local = Vec::new();
                loop {
                    // Read the flag before trying so a miss after it is set
                    // really means the queue is drained.
                    let done = producers_done.load(Ordering::Acquire);
                    match queue.try_take() {
                        Some(item) => local.push(item),
                        None if done => break,
                        None => thread::yield_now(),
                    }
                }
                found.lock().unwrap().extend(local);
            });
        }
    });

    let found = found.into_inner().unwrap();
    assert_eq!(found.len(), PRODUCERS * PER_PRODUCER);
    let unique: HashSet<_> = found.iter().copied().collect();
    assert_eq!(unique.len(), found.len(), "a value was taken twice");
    for p in 0..PRODUCERS {
        for i in 0..PER_PRODUCER {
            assert!(unique.contains(&(p, i)), "lost ({p}, {i})");
        }
    }
    assert!(queue.is_empty());
}

#[test]
fn each_consumer_sees_a_producers_values_in_order() {
    let queue = ConcurrentLinkedQueue::new();
    let producers_done = AtomicBool::new(false);

    thread::scope(|s| {
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = &queue;
                s.spawn(move || {
                    for i in 0..PER_PRODUCER {
                        queue.push((p, i));
                    }
                })
            })
            .collect();
        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let (queue, producers_done) = (&queue, &producers_done);
                s.spawn(move || {
                    let mut last_seen = [None; PRODUCERS];
                    loop {
                        let done = producers_done.load(Ordering::Acquire);
                        match queue.try_take() {
                            Some((p, i)) => {
                                if let Some(last) = last_seen[p] {
                                    assert!(i > last, "producer {p} reordered: {i} after {last}");
                                }
                                last_seen[p] = Some(i);
                            }
                            None if done => break,
                            None => thread::yield_now(),
                        }
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }
        producers_done.store(true, Ordering::Release);
        for consumer in consumers {
            consumer.join().unwrap();
        }
    });

    assert!(queue.is_empty());
}

#[test]
fn snapshots_during_traffic_are_fifo_windows() {
    let queue = ConcurrentLinkedQueue::new();
    let stop = AtomicBool::new(false);

    thread::scope(|s| {
        let (q, stop_ref) = (&queue, &stop);
        s.spawn(move || {
            let mut next = 0u64;
            while !stop_ref.load(Ordering::Relaxed) {
                q.push_range(next..next + 8);
                next += 8;
            }
        });
        s.spawn(move || {
            while !stop_ref.load(Ordering::Relaxed) {
                q.try_take();
            }
        });

        for _ in 0..200 {
            let snapshot: Vec<u64> = queue.iter().collect();
            for pair in snapshot.windows(2) {
                assert_eq!(pair[1], pair[0] + 1, "snapshot is not contiguous");
            }
        }
        stop.store(true, Ordering::Relaxed);
    });
}

#[test]
fn never_empty_queue_is_never_reported_empty() {
    const ROUNDS: u32 = 200_000;
    let queue = ConcurrentLinkedQueue::new();
    queue.push(u32::MAX);
    let stop = AtomicBool::new(false);
    let reported_empty = AtomicUsize::new(0);

    thread::scope(|s| {
        let (q, stop_ref, reported_empty) = (&queue, &stop, &reported_empty);
        s.spawn(move || {
            let mut hits = 0;
            while !stop_ref.load(Ordering::Relaxed) {
                if q.is_empty() {
                    hits += 1;
                }
            }
            reported_empty.store(hits, Ordering::Relaxed);
        });

        // Every take is preceded by a push, so at least one element stays queued
        // while nodes are freed and reallocated as fast as possible.
        for i in 0..ROUNDS {
            queue.push(i);
            assert!(queue.try_take().is_some(), "take missed on a non-empty queue");
        }
        stop.store(true, Ordering::Relaxed);
    });

    assert_eq!(reported_empty.into_inner(), 0);
    assert_eq!(queue.iter().count(), 1);
}
