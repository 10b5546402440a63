mod common;

use std::sync::{Arc, Mutex, MutexGuard};

use ferrokern::sync::{Channel, Condition, Lock, ReadWriteController, Semaphore, SpinLock};
use ferrokern::thread;

// Every test here spawns simulated threads, which share one virtual CPU;
// they must not overlap within this process.
static SERIAL: Mutex<()> = Mutex::new(());

fn serialize() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}

#[test]
fn producer_consumer_loses_no_wakeups() {
    let _serial = serialize();
    const CYCLES: i32 = 5;
    const CAPACITY: i32 = 10;
    const PRODUCERS: usize = 3;
    const CONSUMERS: usize = 2;

    let lock = Arc::new(Lock::new("prod cons"));
    let buffer = Arc::new(SpinLock::new(0i32, "buffer"));
    let not_full = Arc::new(Condition::new("not full", lock.clone()));
    let not_empty = Arc::new(Condition::new("not empty", lock.clone()));

    let mut workers = Vec::new();
    for i in 0..PRODUCERS {
        let (lock, buffer) = (lock.clone(), buffer.clone());
        let (not_full, not_empty) = (not_full.clone(), not_empty.clone());
        workers.push(thread::fork(&format!("producer {}", i), true, 0, move || {
            for _ in 0..CYCLES {
                lock.acquire();
                while *buffer.acquire() == CAPACITY {
                    not_full.wait();
                }
                *buffer.acquire() += 1;
                not_empty.signal();
                lock.release();
                thread::yield_now();
            }
            0
        }));
    }
    for i in 0..CONSUMERS {
        let (lock, buffer) = (lock.clone(), buffer.clone());
        let (not_full, not_empty) = (not_full.clone(), not_empty.clone());
        workers.push(thread::fork(&format!("consumer {}", i), true, 0, move || {
            for _ in 0..CYCLES {
                lock.acquire();
                while *buffer.acquire() == 0 {
                    not_empty.wait();
                }
                *buffer.acquire() -= 1;
                not_full.signal();
                lock.release();
                thread::yield_now();
            }
            0
        }));
    }
    for worker in workers {
        assert_eq!(worker.join(), 0);
    }
    // 3 producers add 15, 2 consumers take 10.
    assert_eq!(*buffer.acquire(), (PRODUCERS as i32 - CONSUMERS as i32) * CYCLES);
}

#[test]
fn garden_turnstiles_with_lock_count_exactly() {
    let _serial = serialize();
    const TURNSTILES: usize = 2;
    const ITERATIONS: usize = 5;

    let lock = Arc::new(Lock::new("garden"));
    let count = Arc::new(SpinLock::new(0i32, "garden count"));

    let turnstiles: Vec<_> = (0..TURNSTILES)
        .map(|i| {
            let (lock, count) = (lock.clone(), count.clone());
            thread::fork(&format!("turnstile {}", i), true, 0, move || {
                for _ in 0..ITERATIONS {
                    lock.acquire();
                    let temp = *count.acquire();
                    // Give the race every chance; the lock must defeat it.
                    thread::yield_now();
                    *count.acquire() = temp + 1;
                    lock.release();
                    thread::yield_now();
                }
                0
            })
        })
        .collect();
    for t in turnstiles {
        t.join();
    }
    assert_eq!(*count.acquire(), (TURNSTILES * ITERATIONS) as i32);
}

#[test]
fn mesa_wait_reacquires_before_returning() {
    let _serial = serialize();
    let lock = Arc::new(Lock::new("mesa"));
    let cond = Arc::new(Condition::new("mesa cond", lock.clone()));
    let flag = Arc::new(SpinLock::new(false, "predicate"));
    let events = Arc::new(SpinLock::new(Vec::<&'static str>::new(), "events"));

    let waiter = {
        let (lock, cond, flag, events) = (lock.clone(), cond.clone(), flag.clone(), events.clone());
        thread::fork("waiter", true, 0, move || {
            lock.acquire();
            while !*flag.acquire() {
                events.acquire().push("waiter sleeps");
                cond.wait();
                // Mesa: the lock is held again here, but the predicate
                // may still be false; the loop re-checks it.
                assert!(lock.held_by_current_thread());
                events.acquire().push("waiter woke");
            }
            events.acquire().push("waiter done");
            lock.release();
            0
        })
    };

    thread::yield_now(); // let the waiter block
    lock.acquire();
    events.acquire().push("signaller has lock");
    cond.signal(); // wakes the waiter, but the predicate is still false
    lock.release();
    thread::yield_now();

    lock.acquire();
    *flag.acquire() = true;
    cond.signal();
    events.acquire().push("predicate set");
    lock.release();

    assert_eq!(waiter.join(), 0);
    let events = events.acquire().clone();
    assert_eq!(
        events,
        vec![
            "waiter sleeps",
            "signaller has lock",
            "waiter woke",
            "waiter sleeps",
            "predicate set",
            "waiter woke",
            "waiter done",
        ]
    );
}

#[test]
fn readers_excluded_while_writer_holds() {
    let _serial = serialize();
    const READERS: usize = 3;
    let controller = Arc::new(ReadWriteController::new());
    let shared = Arc::new(SpinLock::new(0i32, "guarded value"));

    // The writer takes the controller before any reader starts, dawdles,
    // then publishes. Every reader must observe the published value.
    controller.acquire_write();
    let readers: Vec<_> = (0..READERS)
        .map(|i| {
            let (controller, shared) = (controller.clone(), shared.clone());
            thread::fork(&format!("reader {}", i), true, 0, move || {
                controller.acquire_read();
                let seen = *shared.acquire();
                controller.release_read();
                seen
            })
        })
        .collect();
    // Let the readers run into the controller.
    for _ in 0..4 {
        thread::yield_now();
    }
    *shared.acquire() = 42;
    controller.release_write();

    for reader in readers {
        assert_eq!(reader.join(), 42);
    }
}

#[test]
fn writer_waits_for_readers_to_drain() {
    let _serial = serialize();
    let controller = Arc::new(ReadWriteController::new());
    let shared = Arc::new(SpinLock::new(1i32, "guarded value"));

    let gate = Arc::new(Semaphore::new("reader gate", 0));
    let reader = {
        let (controller, shared, gate) = (controller.clone(), shared.clone(), gate.clone());
        thread::fork("reader", true, 0, move || {
            controller.acquire_read();
            gate.p(); // hold the read side until the test says go
            let seen = *shared.acquire();
            controller.release_read();
            seen
        })
    };
    thread::yield_now(); // reader now holds the read side

    let writer = {
        let (controller, shared) = (controller.clone(), shared.clone());
        thread::fork("writer", true, 0, move || {
            controller.acquire_write();
            *shared.acquire() = 2;
            controller.release_write();
            0
        })
    };
    for _ in 0..4 {
        thread::yield_now();
    }
    // The writer is parked behind the reader: the value is untouched.
    assert_eq!(*shared.acquire(), 1);

    gate.v();
    assert_eq!(reader.join(), 1);
    assert_eq!(writer.join(), 0);
    assert_eq!(*shared.acquire(), 2);
}

#[test]
fn channel_rendezvous_pairs_sender_and_receiver() {
    let _serial = serialize();
    let channel = Arc::new(Channel::new("test channel"));

    let receivers: Vec<_> = (0..2)
        .map(|i| {
            let channel = channel.clone();
            thread::fork(&format!("receiver {}", i), true, 0, move || channel.receive())
        })
        .collect();
    thread::yield_now();

    let senders: Vec<_> = [7, 11]
        .into_iter()
        .map(|value| {
            let channel = channel.clone();
            thread::fork("sender", true, 0, move || {
                channel.send(value);
                0
            })
        })
        .collect();
    for sender in senders {
        assert_eq!(sender.join(), 0);
    }
    let mut received: Vec<i32> = receivers.into_iter().map(|r| r.join()).collect();
    received.sort();
    assert_eq!(received, vec![7, 11]);
}

#[test]
fn send_blocks_until_a_receiver_presents() {
    let _serial = serialize();
    let channel = Arc::new(Channel::new("blocking"));
    let progress = Arc::new(SpinLock::new(false, "send returned"));

    let sender = {
        let (channel, progress) = (channel.clone(), progress.clone());
        thread::fork("sender", true, 0, move || {
            channel.send(99);
            *progress.acquire() = true;
            0
        })
    };
    for _ in 0..4 {
        thread::yield_now();
    }
    assert!(!*progress.acquire(), "send completed without a receiver");

    assert_eq!(channel.receive(), 99);
    assert_eq!(sender.join(), 0);
    assert!(*progress.acquire());
}

#[test]
fn join_returns_exit_status() {
    let _serial = serialize();
    let child = thread::fork("child", true, 7, move || 42);
    assert_eq!(child.priority(), 7);
    assert_eq!(child.join(), 42);
}

#[test]
fn exit_mid_body_reports_its_status() {
    let _serial = serialize();
    let child = thread::fork("early exit", true, 0, move || {
        thread::exit(13);
    });
    assert_eq!(child.join(), 13);
}
