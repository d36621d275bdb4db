use lock_api::RawMutex as _;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use wsync::api::{NotifyCount, SharedCondition, SharedMutex, Timeout};
use wsync::{Condition, RawMutex, ALL_WAITERS};

#[test]
fn wait_notify_scenario() {
    let mutex = SharedMutex::new();
    let cv = SharedCondition::new();

    thread::scope(|s| {
        let a = s.spawn(|| {
            assert_eq!(mutex.lock(Timeout::FOREVER), Ok(true));
            let notified = cv.wait(&mutex, Timeout::FOREVER);
            assert!(mutex.is_current_thread_owner());
            assert_eq!(mutex.unlock(), Ok(()));
            notified
        });

        while cv.num_waiters() == 0 {
            thread::yield_now();
        }
        assert_eq!(mutex.lock(Timeout::FOREVER), Ok(true));
        assert_eq!(cv.notify(NotifyCount::Count(1)), 1);
        assert_eq!(mutex.unlock(), Ok(()));

        assert_eq!(a.join().unwrap(), Ok(true));
    });
    assert!(!mutex.is_held());
}

#[test]
fn notify_all_wakes_exactly_the_queued_waiters() {
    const WAITERS: u32 = 4;
    let mutex = RawMutex::new();
    let cv = Condition::new();

    thread::scope(|s| {
        let handles: Vec<_> = (0..WAITERS)
            .map(|_| {
                s.spawn(|| {
                    mutex.lock();
                    let notified = cv.wait_for(&mutex, None);
                    unsafe { mutex.unlock() };
                    notified
                })
            })
            .collect();

        while cv.num_waiters() < WAITERS {
            thread::yield_now();
        }
        assert_eq!(cv.notify(ALL_WAITERS), WAITERS);
        assert_eq!(cv.notify(ALL_WAITERS), 0);

        for handle in handles {
            assert!(handle.join().unwrap());
        }
    });
}

#[test]
fn notify_count_is_capped_by_queue_length() {
    let mutex = RawMutex::new();
    let cv = Condition::new();

    thread::scope(|s| {
        for _ in 0..3 {
            s.spawn(|| {
                mutex.lock();
                assert!(cv.wait_for(&mutex, None));
                unsafe { mutex.unlock() };
            });
        }
        while cv.num_waiters() < 3 {
            thread::yield_now();
        }
        assert_eq!(cv.notify(2), 2);
        assert_eq!(cv.num_waiters(), 1);
        assert_eq!(cv.notify(5), 1);
        assert_eq!(cv.notify(5), 0);
    });
}

#[test]
fn wait_timeout_is_close_to_requested() {
    let mutex = SharedMutex::new();
    let cv = SharedCondition::new();
    assert_eq!(mutex.lock(Timeout::FOREVER), Ok(true));

    let start = Instant::now();
    assert_eq!(cv.wait(&mutex, Timeout::from_millis(80.0)), Ok(false));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(80));
    assert!(elapsed < Duration::from_secs(2));

    assert!(mutex.is_current_thread_owner());
    assert_eq!(cv.num_waiters(), 0);
    assert_eq!(mutex.unlock(), Ok(()));
}

#[test]
fn timed_waits_racing_notifies_are_counted_once() {
    const WAITERS: usize = 6;
    const ITERS: usize = 500;

    let mutex = RawMutex::new();
    let cv = Condition::new();
    let woken = AtomicU32::new(0);
    let notified = AtomicU32::new(0);
    let done = AtomicU32::new(0);

    thread::scope(|s| {
        for i in 0..WAITERS {
            let (mutex, cv, woken, done) = (&mutex, &cv, &woken, &done);
            s.spawn(move || {
                for j in 0..ITERS {
                    let timeout = Duration::from_micros(((i + j) % 4) as u64 * 25);
                    mutex.lock();
                    if cv.wait_for(mutex, Some(timeout)) {
                        woken.fetch_add(1, Ordering::Relaxed);
                    }
                    assert!(mutex.is_current_thread_owner());
                    unsafe { mutex.unlock() };
                }
                done.fetch_add(1, Ordering::Release);
            });
        }

        s.spawn(|| {
            while done.load(Ordering::Acquire) < WAITERS as u32 {
                let count = cv.notify(1) + cv.notify(ALL_WAITERS);
                notified.fetch_add(count, Ordering::Relaxed);
                thread::yield_now();
            }
        });
    });

    assert_eq!(cv.num_waiters(), 0);
    assert!(!mutex.is_held());
    assert_eq!(woken.load(Ordering::Relaxed), notified.load(Ordering::Relaxed));
}
