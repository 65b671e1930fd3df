use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::errors::ShmKvError;
use crate::queue::{Request, RequestQueue};
use crate::shutdown::ShutdownCoordinator;

use super::{init_logging, unique_segment};

#[test]
fn single_producer_fifo_order() {
    init_logging();
    let (cfg, _dir) = unique_segment(8);
    let queue = RequestQueue::create(&cfg).expect("create queue");

    let sent: Vec<Request> = (0..5)
        .map(|i| Request::insert(format!("key-{}", i), format!("value-{}", i)))
        .collect();
    for request in &sent {
        queue.enqueue(request).expect("enqueue");
    }
    for expected in &sent {
        let got = queue.dequeue().expect("dequeue").expect("a request");
        assert_eq!(&got, expected);
    }
    assert_eq!(queue.len().expect("len"), 0);
}

#[test]
fn ring_wraps_and_blocks_producer_on_full() {
    init_logging();
    let (cfg, _dir) = unique_segment(4);
    let queue = Arc::new(RequestQueue::create(&cfg).expect("create queue"));

    // 25 requests through a 3-usable-slot ring forces wrapping and forces
    // the producer to park repeatedly.
    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            for i in 0..25u32 {
                queue
                    .enqueue(&Request::insert(format!("key-{}", i), format!("{}", i)))
                    .expect("enqueue");
            }
        })
    };

    for i in 0..25u32 {
        let got = queue.dequeue().expect("dequeue").expect("a request");
        assert_eq!(got.key, format!("key-{}", i));
        let occupied = queue.len().expect("len");
        assert!(
            occupied <= queue.capacity() - 1,
            "occupied {} slots in a capacity-{} ring",
            occupied,
            queue.capacity()
        );
    }
    producer.join().expect("producer panicked");
    assert!(queue.is_empty().expect("is_empty"));
}

#[test]
fn no_request_lost_or_duplicated_across_producers() {
    init_logging();
    let (cfg, _dir) = unique_segment(8);
    let queue = Arc::new(RequestQueue::create(&cfg).expect("create queue"));

    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 50;

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    queue
                        .enqueue(&Request::insert(
                            format!("p{}-{}", p, i),
                            format!("{}", i),
                        ))
                        .expect("enqueue");
                }
            })
        })
        .collect();

    let mut seen = HashSet::new();
    let mut last_per_producer: HashMap<usize, usize> = HashMap::new();
    for _ in 0..PRODUCERS * PER_PRODUCER {
        let request = queue.dequeue().expect("dequeue").expect("a request");
        assert!(
            seen.insert(request.key.clone()),
            "request {:?} was dequeued twice",
            request.key
        );
        // Keys look like "p<producer>-<sequence>"; each producer's own
        // sequence must arrive in ascending order.
        let mut parts = request.key[1..].split('-');
        let producer: usize = parts.next().expect("producer id").parse().expect("number");
        let sequence: usize = parts.next().expect("sequence").parse().expect("number");
        if let Some(previous) = last_per_producer.insert(producer, sequence) {
            assert!(
                previous < sequence,
                "producer {} went backwards: {} then {}",
                producer,
                previous,
                sequence
            );
        }
    }
    assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
    for producer in producers {
        producer.join().expect("producer panicked");
    }
}

#[test]
fn shutdown_wakes_every_blocked_consumer() {
    init_logging();
    let (cfg, _dir) = unique_segment(4);
    let queue = Arc::new(RequestQueue::create(&cfg).expect("create queue"));
    let coordinator = Arc::new(ShutdownCoordinator::new());

    let consumers: Vec<_> = (0..4)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue().expect("dequeue"))
        })
        .collect();

    // Give every consumer time to park on the empty ring.
    thread::sleep(Duration::from_millis(100));
    coordinator.trigger(&queue).expect("trigger");
    assert!(coordinator.is_stopping());

    for consumer in consumers {
        let result = consumer.join().expect("consumer panicked");
        assert_eq!(result, None, "consumer should observe the stop result");
    }
}

#[test]
fn trigger_transitions_only_once() {
    init_logging();
    let (cfg, _dir) = unique_segment(4);
    let queue = RequestQueue::create(&cfg).expect("create queue");
    let coordinator = ShutdownCoordinator::new();

    assert!(!coordinator.is_stopping());
    coordinator.trigger(&queue).expect("first trigger");
    coordinator.trigger(&queue).expect("second trigger is a no-op");
    assert!(coordinator.is_stopping());
    assert!(!queue.is_running().expect("is_running"));
}

#[test]
fn enqueue_after_shutdown_is_rejected() {
    init_logging();
    let (cfg, _dir) = unique_segment(4);
    let queue = RequestQueue::create(&cfg).expect("create queue");

    queue.signal_shutdown().expect("shutdown");
    let result = queue.enqueue(&Request::insert("k", "v"));
    assert!(matches!(result, Err(ShmKvError::Stopped)));
}

#[test]
fn producer_blocked_on_full_ring_is_rejected_at_shutdown() {
    init_logging();
    let (cfg, _dir) = unique_segment(4);
    let queue = Arc::new(RequestQueue::create(&cfg).expect("create queue"));

    // Fill every usable slot so the next enqueue parks.
    for i in 0..3 {
        queue
            .enqueue(&Request::insert(format!("fill-{}", i), "v"))
            .expect("enqueue");
    }
    let blocked = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.enqueue(&Request::insert("late", "v")))
    };

    thread::sleep(Duration::from_millis(100));
    queue.signal_shutdown().expect("shutdown");

    let result = blocked.join().expect("producer panicked");
    assert!(matches!(result, Err(ShmKvError::Stopped)));
    // The three filled slots are abandoned, not flushed.
    assert_eq!(queue.dequeue().expect("dequeue"), None);
    assert_eq!(queue.len().expect("len"), 3);
}

#[test]
fn attached_handle_shares_creator_state() {
    init_logging();
    let (cfg, _dir) = unique_segment(8);
    let creator = RequestQueue::create(&cfg).expect("create queue");
    assert!(creator.is_owner());

    let attached = RequestQueue::attach(&cfg).expect("attach");
    assert!(!attached.is_owner());
    assert!(matches!(
        attached.teardown(),
        Err(ShmKvError::Logic(_))
    ));

    creator
        .enqueue(&Request::insert("shared", "value"))
        .expect("enqueue");
    let got = attached.dequeue().expect("dequeue").expect("a request");
    assert_eq!(got, Request::insert("shared", "value"));
}

#[test]
fn attach_without_creator_fails() {
    init_logging();
    let (cfg, _dir) = unique_segment(4);
    assert!(RequestQueue::attach(&cfg).is_err());
}

#[test]
fn oversized_key_never_touches_the_ring() {
    init_logging();
    let (cfg, _dir) = unique_segment(4);
    let queue = RequestQueue::create(&cfg).expect("create queue");

    let result = queue.enqueue(&Request::read("k".repeat(4096)));
    assert!(matches!(result, Err(ShmKvError::Logic(_))));
    assert_eq!(queue.len().expect("len"), 0);
}
