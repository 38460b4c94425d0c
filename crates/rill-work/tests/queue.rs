//! Integration tests for the job queue.
//!
//! These exercise the queue across threads: concurrent submission,
//! priority draining, idle waiting and cooperative stop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rill_work::{JobQueue, JobType};

#[test]
fn test_concurrent_submitters_all_drain() {
    let queue = Arc::new(JobQueue::new(3));
    let counter = Arc::new(AtomicUsize::new(0));

    let mut submitters = Vec::new();
    for _ in 0..4 {
        let queue = Arc::clone(&queue);
        let counter = Arc::clone(&counter);
        submitters.push(std::thread::spawn(move || {
            for _ in 0..25 {
                let counter = Arc::clone(&counter);
                assert!(queue.add_job(JobType::SaveOld, "bump", move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }));
            }
        }));
    }
    for submitter in submitters {
        submitter.join().unwrap();
    }

    queue.wait_idle();
    assert_eq!(counter.load(Ordering::SeqCst), 100);
    assert_eq!(queue.job_count(), 0);
}

#[test]
fn test_current_saves_run_before_old_saves() {
    let queue = JobQueue::new(1);
    let order: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

    // Hold the single worker so the queue builds up.
    let release = Arc::new(AtomicUsize::new(0));
    {
        let release = Arc::clone(&release);
        queue.add_job(JobType::SaveCurrent, "hold", move |_| {
            while release.load(Ordering::Acquire) == 0 {
                std::thread::yield_now();
            }
        });
    }

    for i in 0..3 {
        let order = Arc::clone(&order);
        queue.add_job(JobType::SaveOld, "old", move |_| order.lock().push(100 + i));
    }
    for i in 0..3 {
        let order = Arc::clone(&order);
        queue.add_job(JobType::SaveCurrent, "current", move |_| order.lock().push(i));
    }

    release.store(1, Ordering::Release);
    queue.wait_idle();
    assert_eq!(*order.lock(), vec![0, 1, 2, 100, 101, 102]);
}

#[test]
fn test_stop_drops_pending_work() {
    let queue = JobQueue::new(1);
    let ran = Arc::new(AtomicUsize::new(0));

    // Hold the worker, then pile up jobs that should never run.
    let release = Arc::new(AtomicUsize::new(0));
    {
        let release = Arc::clone(&release);
        let ran = Arc::clone(&ran);
        queue.add_job(JobType::SaveCurrent, "hold", move |ctx| {
            ran.fetch_add(1, Ordering::SeqCst);
            while release.load(Ordering::Acquire) == 0 && !ctx.is_stopped() {
                std::thread::yield_now();
            }
        });
    }
    while ran.load(Ordering::SeqCst) == 0 {
        std::thread::yield_now();
    }
    for _ in 0..5 {
        let ran = Arc::clone(&ran);
        queue.add_job(JobType::SaveOld, "never", move |_| {
            ran.fetch_add(1, Ordering::SeqCst);
        });
    }

    queue.stop();
    // Only the held job ran; the pending five were cleared.
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}
