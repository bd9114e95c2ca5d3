//! Multi-process channel integration tests.
//!
//! Uses `fork()` to exercise true cross-process behavior:
//! - FIFO order and exactly-once delivery between a producer and a
//!   consumer in separate address spaces
//! - priority ordering across a process boundary
//!
//! Children assert and exit; the parent checks the wait status, so a
//! failing child fails the test.

use std::time::Duration;

use prefork_ipc::{FifoChannel, Priority, PriorityHeap};

/// Generate a unique channel name for test isolation.
fn test_chan_name(suffix: &str) -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static CTR: AtomicU32 = AtomicU32::new(0);
    let id = CTR.fetch_add(1, Ordering::Relaxed);
    format!("/pfk_xproc_{}_{id}_{suffix}", std::process::id())
}

/// Reap a child and assert it exited cleanly.
fn expect_clean_exit(pid: libc::pid_t) {
    let mut status = 0;
    let reaped = unsafe { libc::waitpid(pid, &mut status, 0) };
    assert_eq!(reaped, pid, "waitpid failed");
    assert!(
        libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0,
        "child exited abnormally: status {status:#x}"
    );
}

/// Test: values enqueued by the parent arrive in order in a forked child.
///
/// Covers FIFO order and no-loss: the child consumes exactly the enqueued
/// sequence, once each.
#[test]
fn fifo_order_across_fork() {
    const COUNT: i32 = 200;
    let name = test_chan_name("fifo");
    let chan = FifoChannel::<i32>::create(&name, 64).unwrap();

    // Safety: fork() is unsafe but this is a controlled test environment.
    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");

    if pid == 0 {
        // ── CHILD (consumer) ── the mapping is inherited from the parent.
        for expected in 0..COUNT {
            let got = chan
                .try_dequeue(Duration::from_secs(5))
                .expect("child: dequeue");
            assert_eq!(got, expected, "out-of-order delivery");
        }
        // Nothing further may arrive.
        assert!(chan.try_dequeue(Duration::from_millis(100)).is_err());
        std::process::exit(0);
    }

    // ── PARENT (producer) ── slower than the consumer at times, faster at
    // others, so both the empty-wait and the backlog paths are exercised.
    for v in 0..COUNT {
        loop {
            match chan.enqueue(v) {
                Ok(()) => break,
                Err(prefork_ipc::IpcError::QueueFull { .. }) => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => panic!("parent: enqueue: {e}"),
            }
        }
    }

    expect_clean_exit(pid);
    chan.unlink().unwrap();
}

/// Test: two forked producers, parent consumes everything exactly once.
#[test]
fn fifo_no_loss_two_producers() {
    const PER_CHILD: i32 = 100;
    let name = test_chan_name("producers");
    let chan = FifoChannel::<i32>::create(&name, 512).unwrap();

    let mut pids = Vec::new();
    for base in [0, 1000] {
        let pid = unsafe { libc::fork() };
        assert!(pid >= 0, "fork failed");
        if pid == 0 {
            for v in 0..PER_CHILD {
                chan.enqueue(base + v).expect("child: enqueue");
            }
            std::process::exit(0);
        }
        pids.push(pid);
    }

    let mut seen = Vec::with_capacity(2 * PER_CHILD as usize);
    for _ in 0..2 * PER_CHILD {
        seen.push(chan.try_dequeue(Duration::from_secs(5)).unwrap());
    }
    for pid in pids {
        expect_clean_exit(pid);
    }

    // Exactly-once: each value appears once, and each producer's own
    // values kept their order.
    let mut low: Vec<i32> = seen.iter().copied().filter(|v| *v < 1000).collect();
    let high: Vec<i32> = seen.iter().copied().filter(|v| *v >= 1000).collect();
    assert_eq!(low.len(), PER_CHILD as usize);
    assert_eq!(high.len(), PER_CHILD as usize);
    assert!(low.windows(2).all(|w| w[0] < w[1]), "producer order lost");
    assert!(high.windows(2).all(|w| w[0] < w[1]), "producer order lost");
    low.sort_unstable();
    assert_eq!(low, (0..PER_CHILD).collect::<Vec<_>>());

    chan.unlink().unwrap();
}

/// Test: priority ordering holds when the consumer is another process.
#[test]
fn heap_priority_across_fork() {
    let name = test_chan_name("heap");
    let heap = PriorityHeap::<[u8; 8]>::create(&name, 16).unwrap();

    heap.enqueue(*b"low-----", Priority::Low).unwrap();
    heap.enqueue(*b"normal--", Priority::Normal).unwrap();
    heap.enqueue(*b"urgent--", Priority::Urgent).unwrap();
    heap.enqueue(*b"high----", Priority::High).unwrap();

    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");

    if pid == 0 {
        // ── CHILD (consumer) ──
        let expected: [&[u8; 8]; 4] = [b"urgent--", b"high----", b"normal--", b"low-----"];
        for want in expected {
            let msg = heap
                .try_dequeue(Duration::from_secs(5))
                .expect("child: dequeue");
            assert_eq!(&msg.payload, want);
        }
        std::process::exit(0);
    }

    expect_clean_exit(pid);
    assert!(heap.is_empty());
    heap.unlink().unwrap();
}

/// Test: a consumer blocked in another process wakes on enqueue.
#[test]
fn heap_blocking_dequeue_wakes_child() {
    let name = test_chan_name("wake");
    let heap = PriorityHeap::<u64>::create(&name, 8).unwrap();

    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");

    if pid == 0 {
        // ── CHILD ── blocks until the parent posts.
        let msg = heap.dequeue().expect("child: dequeue");
        assert_eq!(msg.payload, 0xFEED);
        assert_eq!(msg.priority, Priority::High);
        std::process::exit(0);
    }

    // Give the child time to block on the items semaphore.
    std::thread::sleep(Duration::from_millis(50));
    heap.enqueue(0xFEED, Priority::High).unwrap();

    expect_clean_exit(pid);
    heap.unlink().unwrap();
}
