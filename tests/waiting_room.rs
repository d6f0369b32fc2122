use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_utils::thread::scope;
use rfs::waiting_room::{IdlePolicy, Request, SharedHandler, WaitingRoom};
use rfs::{Result, RfsError};

/// polls `cond` until it holds or `timeout` elapses
fn wait_until<F: Fn() -> bool>(timeout: Duration, cond: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

// Handlers for one key never overlap, even when submitted from many threads at once
#[test]
fn same_key_is_mutually_exclusive() {
    let room = WaitingRoom::new(IdlePolicy::Persist);
    let running = Arc::new(AtomicUsize::new(0));
    let spans = Arc::new(Mutex::new(Vec::new()));

    let handler: SharedHandler<usize> = {
        let running = running.clone();
        let spans = spans.clone();
        Arc::new(move |_n: usize| -> Result<()> {
            let start = Instant::now();
            assert_eq!(running.fetch_add(1, Ordering::SeqCst), 0, "handlers overlapped");
            thread::sleep(Duration::from_millis(20));
            running.fetch_sub(1, Ordering::SeqCst);
            spans.lock().unwrap().push((start, Instant::now()));
            Ok(())
        })
    };

    scope(|s| {
        for n in 0..8 {
            let room = &room;
            let handler = handler.clone();
            s.spawn(move |_| room.submit("shared.txt", Request::new(n), handler).unwrap());
        }
    })
    .unwrap();
    room.shutdown_all();

    let mut spans = spans.lock().unwrap().clone();
    assert_eq!(spans.len(), 8);
    spans.sort_by_key(|(start, _)| *start);
    for pair in spans.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "handler started before the previous one ended");
    }
}

// Different keys run in parallel, so two 300ms handlers take about 300ms in total
#[test]
fn different_keys_run_concurrently() {
    let room = WaitingRoom::new(IdlePolicy::Persist);
    let handler: SharedHandler<()> = Arc::new(|_: ()| -> Result<()> {
        thread::sleep(Duration::from_millis(300));
        Ok(())
    });

    let start = Instant::now();
    room.submit("a.txt", Request::new(()), handler.clone()).unwrap();
    room.submit("b.txt", Request::new(()), handler).unwrap();
    room.shutdown_all();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(550), "took {:?}", elapsed);
}

#[test]
fn same_key_is_fifo() {
    let room = WaitingRoom::new(IdlePolicy::Persist);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler: SharedHandler<u32> = {
        let seen = seen.clone();
        Arc::new(move |n: u32| -> Result<()> {
            // the first request is slow so the rest pile up in the queue
            if n == 1 {
                thread::sleep(Duration::from_millis(50));
            }
            seen.lock().unwrap().push(n);
            Ok(())
        })
    };

    for n in 1..=5 {
        room.submit("ordered.txt", Request::new(n), handler.clone()).unwrap();
    }
    room.shutdown_all();

    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4, 5]);
}

#[test]
fn shutdown_with_no_workers_returns_immediately() {
    let room: WaitingRoom<()> = WaitingRoom::new(IdlePolicy::Persist);
    let start = Instant::now();
    room.shutdown_all();
    assert!(start.elapsed() < Duration::from_millis(100));
    assert!(room.is_shutdown());
    assert_eq!(room.active_workers(), 0);

    // a second call is harmless
    room.shutdown_all();
}

// After shutdown the registry is empty and every queued request was consumed and dropped
#[test]
fn shutdown_drains_and_joins_every_worker() {
    let room = WaitingRoom::new(IdlePolicy::Persist);
    let marker = Arc::new(());
    let done = Arc::new(AtomicUsize::new(0));
    let handler: SharedHandler<Arc<()>> = {
        let done = done.clone();
        Arc::new(move |_marker: Arc<()>| -> Result<()> {
            thread::sleep(Duration::from_millis(30));
            done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    };

    for key in &["a", "b", "c"] {
        for _ in 0..3 {
            room.submit(key, Request::new(marker.clone()), handler.clone()).unwrap();
        }
    }
    assert_eq!(room.active_workers(), 3);

    room.shutdown_all();

    assert_eq!(done.load(Ordering::SeqCst), 9, "queued requests were not drained");
    assert_eq!(room.active_workers(), 0);
    assert_eq!(Arc::strong_count(&marker), 1, "a request outlived shutdown");
}

#[test]
fn submit_after_shutdown_is_rejected() {
    let room = WaitingRoom::new(IdlePolicy::Persist);
    room.shutdown_all();

    let handler: SharedHandler<()> = Arc::new(|_: ()| -> Result<()> { Ok(()) });
    let result = room.submit("late.txt", Request::new(()), handler);
    assert!(matches!(result, Err(RfsError::ShuttingDown)));
    assert_eq!(room.active_workers(), 0);
}

// A failing or panicking handler is logged and the worker moves on to the next request
#[test]
fn handler_failures_do_not_stop_the_worker() {
    let room = WaitingRoom::new(IdlePolicy::Persist);
    let done = Arc::new(AtomicUsize::new(0));

    let failing: SharedHandler<()> =
        Arc::new(|_: ()| -> Result<()> { Err(RfsError::Server("broken pipe".to_string())) });
    let panicking: SharedHandler<()> = Arc::new(|_: ()| -> Result<()> { panic!("handler bug") });
    let counting: SharedHandler<()> = {
        let done = done.clone();
        Arc::new(move |_: ()| -> Result<()> {
            done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    };

    room.submit("flaky.txt", Request::new(()), failing).unwrap();
    room.submit("flaky.txt", Request::new(()), panicking).unwrap();
    room.submit("flaky.txt", Request::new(()), counting.clone()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || done.load(Ordering::SeqCst) == 1));

    // still the same worker, still serving
    assert!(room.is_active("flaky.txt"));
    room.submit("flaky.txt", Request::new(()), counting).unwrap();
    room.shutdown_all();
    assert_eq!(done.load(Ordering::SeqCst), 2);
}

// Idle policy: `Exit` workers leave the registry as soon as their queue is empty, and the
// next submission for the key starts a fresh worker
#[test]
fn exit_policy_reaps_idle_workers() {
    let room = WaitingRoom::new(IdlePolicy::Exit);
    let done = Arc::new(AtomicUsize::new(0));
    let handler: SharedHandler<()> = {
        let done = done.clone();
        Arc::new(move |_: ()| -> Result<()> {
            done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    };

    room.submit("once.txt", Request::new(()), handler.clone()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || !room.is_active("once.txt")));
    assert_eq!(done.load(Ordering::SeqCst), 1);

    room.submit("once.txt", Request::new(()), handler).unwrap();
    assert!(wait_until(Duration::from_secs(2), || done.load(Ordering::SeqCst) == 2));
    room.shutdown_all();
    assert_eq!(room.active_workers(), 0);
}

// Idle policy: `Linger` workers stay registered for the timeout, then leave
#[test]
fn linger_policy_reaps_after_timeout() {
    let room = WaitingRoom::new(IdlePolicy::Linger(Duration::from_millis(300)));
    let done = Arc::new(AtomicUsize::new(0));
    let handler: SharedHandler<()> = {
        let done = done.clone();
        Arc::new(move |_: ()| -> Result<()> {
            done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    };

    room.submit("slow.txt", Request::new(()), handler).unwrap();
    assert!(wait_until(Duration::from_secs(2), || done.load(Ordering::SeqCst) == 1));
    assert!(room.is_active("slow.txt"), "worker left before its idle timeout");

    assert!(wait_until(Duration::from_secs(3), || !room.is_active("slow.txt")));
    room.shutdown_all();
}

// Idle policy: `Persist` workers only leave during shutdown
#[test]
fn persist_policy_keeps_idle_workers() {
    let room = WaitingRoom::new(IdlePolicy::Persist);
    let handler: SharedHandler<()> = Arc::new(|_: ()| -> Result<()> { Ok(()) });

    room.submit("kept.txt", Request::new(()), handler).unwrap();
    thread::sleep(Duration::from_millis(200));
    assert!(room.is_active("kept.txt"));

    room.shutdown_all();
    assert!(!room.is_active("kept.txt"));
}

// Many submitters racing against workers that reap themselves: no request is lost and no two
// handlers for one key overlap
#[test]
fn racing_submissions_with_reaping_lose_nothing() {
    const KEYS: usize = 4;
    const THREADS: usize = 8;
    const PER_THREAD: usize = 200;

    let room = WaitingRoom::new(IdlePolicy::Exit);
    let done = Arc::new(AtomicUsize::new(0));
    let running: Arc<Vec<AtomicUsize>> = Arc::new((0..KEYS).map(|_| AtomicUsize::new(0)).collect());

    let handler: SharedHandler<usize> = {
        let done = done.clone();
        let running = running.clone();
        Arc::new(move |key: usize| -> Result<()> {
            assert_eq!(running[key].fetch_add(1, Ordering::SeqCst), 0, "handlers overlapped");
            running[key].fetch_sub(1, Ordering::SeqCst);
            done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    };

    scope(|s| {
        for t in 0..THREADS {
            let room = &room;
            let handler = handler.clone();
            s.spawn(move |_| {
                for i in 0..PER_THREAD {
                    let key = (t + i) % KEYS;
                    room.submit(&format!("file-{}", key), Request::new(key), handler.clone())
                        .unwrap();
                }
            });
        }
    })
    .unwrap();
    room.shutdown_all();

    assert_eq!(done.load(Ordering::SeqCst), THREADS * PER_THREAD);
    assert_eq!(room.active_workers(), 0);
}

#[test]
fn dropping_the_room_shuts_it_down() {
    let done = Arc::new(AtomicUsize::new(0));
    {
        let room = WaitingRoom::new(IdlePolicy::Persist);
        let handler: SharedHandler<()> = {
            let done = done.clone();
            Arc::new(move |_: ()| -> Result<()> {
                thread::sleep(Duration::from_millis(20));
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        room.submit("dropped.txt", Request::new(()), handler.clone()).unwrap();
        room.submit("dropped.txt", Request::new(()), handler).unwrap();
    }
    assert_eq!(done.load(Ordering::SeqCst), 2);
}

/// decrements the shared count when the worker thread that owns it exits
struct LiveThread(Arc<AtomicUsize>);

impl Drop for LiveThread {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

thread_local! {
    static LIVE: std::cell::RefCell<Option<LiveThread>> = std::cell::RefCell::new(None);
}

// Submitters keep racing while shutdown_all runs on another thread. Once it returns, every
// accepted request ran and every worker thread, including those that reaped themselves, has
// been joined
#[test]
fn shutdown_racing_submitters_joins_every_worker() {
    const THREADS: usize = 6;
    const PER_THREAD: usize = 300;

    for _ in 0..5 {
        let room = WaitingRoom::new(IdlePolicy::Exit);
        let live = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        let accepted = AtomicUsize::new(0);

        let handler: SharedHandler<()> = {
            let live = live.clone();
            let done = done.clone();
            Arc::new(move |_: ()| -> Result<()> {
                LIVE.with(|slot| {
                    let mut slot = slot.borrow_mut();
                    if slot.is_none() {
                        live.fetch_add(1, Ordering::SeqCst);
                        *slot = Some(LiveThread(live.clone()));
                    }
                });
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };

        scope(|s| {
            for t in 0..THREADS {
                let room = &room;
                let accepted = &accepted;
                let handler = handler.clone();
                s.spawn(move |_| {
                    for i in 0..PER_THREAD {
                        match room.submit(&format!("file-{}", (t + i) % 3), Request::new(()), handler.clone()) {
                            Ok(()) => {
                                accepted.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(RfsError::ShuttingDown) => break,
                            Err(e) => panic!("unexpected submit error: {}", e),
                        }
                    }
                });
            }
            let room = &room;
            s.spawn(move |_| {
                thread::sleep(Duration::from_millis(2));
                room.shutdown_all();
            });
        })
        .unwrap();

        assert_eq!(done.load(Ordering::SeqCst), accepted.load(Ordering::SeqCst));
        assert_eq!(room.active_workers(), 0);
        assert_eq!(live.load(Ordering::SeqCst), 0, "a worker thread outlived shutdown");
    }
}
