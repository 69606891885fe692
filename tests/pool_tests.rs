use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tiny_web_server::pool::{BlockDeque, ThreadPool};

#[test]
fn test_thread_pool_runs_every_task() {
    let counter = Arc::new(AtomicUsize::new(0));
    {
        let pool = ThreadPool::new(4).unwrap();
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        // drop blocks until the workers drained the queue and exited
    }
    assert_eq!(counter.load(Ordering::SeqCst), 100);
}

#[test]
fn test_thread_pool_tasks_run_concurrently() {
    let pool = ThreadPool::new(2).unwrap();
    let (tx, rx) = std::sync::mpsc::channel::<usize>();
    for i in 0..2 {
        let tx = tx.clone();
        pool.submit(move || {
            thread::sleep(Duration::from_millis(50));
            tx.send(i).unwrap();
        });
    }
    let start = Instant::now();
    rx.recv_timeout(Duration::from_secs(2)).unwrap();
    rx.recv_timeout(Duration::from_secs(2)).unwrap();
    // both sleeps overlapped on the two workers
    assert!(start.elapsed() < Duration::from_millis(150));
}

#[test]
fn test_block_deque_fifo_order() {
    let deque = BlockDeque::new(8);
    for i in 0..5 {
        assert!(deque.push_back(i));
    }
    for i in 0..5 {
        assert_eq!(deque.pop_front(), Some(i));
    }
}

#[test]
fn test_block_deque_close_wakes_consumer() {
    let deque = Arc::new(BlockDeque::<u32>::new(4));
    let consumer_side = Arc::clone(&deque);
    let consumer = thread::spawn(move || consumer_side.pop_front());

    thread::sleep(Duration::from_millis(50));
    deque.close();
    assert_eq!(consumer.join().unwrap(), None);
}

#[test]
fn test_block_deque_rejects_push_after_close() {
    let deque = BlockDeque::new(4);
    assert!(deque.push_back(1));
    deque.close();
    assert!(!deque.push_back(2));
    assert_eq!(deque.pop_front(), None);
}

#[test]
fn test_block_deque_producer_blocks_until_capacity_frees() {
    let deque = Arc::new(BlockDeque::new(2));
    assert!(deque.push_back(1));
    assert!(deque.push_back(2));
    assert!(deque.is_full());

    let producer_side = Arc::clone(&deque);
    let producer = thread::spawn(move || producer_side.push_back(3));

    thread::sleep(Duration::from_millis(50));
    assert_eq!(deque.pop_front(), Some(1));
    assert!(producer.join().unwrap());
    assert_eq!(deque.pop_front(), Some(2));
    assert_eq!(deque.pop_front(), Some(3));
}

#[test]
fn test_block_deque_pop_timeout() {
    let deque = BlockDeque::<u32>::new(4);
    let start = Instant::now();
    assert_eq!(deque.pop_front_timeout(Duration::from_millis(50)), None);
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[test]
fn test_block_deque_handoff_through_threads() {
    let deque = Arc::new(BlockDeque::new(16));
    let producer_side = Arc::clone(&deque);
    let producer = thread::spawn(move || {
        for i in 0..200 {
            assert!(producer_side.push_back(i));
        }
    });

    let mut received = Vec::new();
    for _ in 0..200 {
        received.push(deque.pop_front().unwrap());
    }
    producer.join().unwrap();
    assert_eq!(received, (0..200).collect::<Vec<_>>());
}
