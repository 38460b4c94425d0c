//! Background job queue.
//!
//! A fixed pool of worker threads draining a two-priority queue. The engine
//! uses it for validated-ledger saves: saves of the current ledger run ahead
//! of saves of old ledgers acquired from history.
//!
//! Cancellation is cooperative. [`JobQueue::stop`] clears the pending queue
//! and lets in-flight jobs finish; jobs that care consult
//! [`JobContext::is_stopped`] at their own boundaries. `stop` returns once
//! the last in-flight job has drained.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

/// Job priorities, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobType {
    /// Persist the just-validated current ledger.
    SaveCurrent,
    /// Persist an old ledger acquired from history.
    SaveOld,
}

/// Handed to every job when it runs.
#[derive(Clone)]
pub struct JobContext {
    stopped: Arc<AtomicBool>,
}

impl JobContext {
    /// Whether the queue has been asked to stop. Jobs should finish their
    /// current unit of work and return.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

type JobFn = Box<dyn FnOnce(&JobContext) + Send + 'static>;

struct Job {
    job_type: JobType,
    name: &'static str,
    run: JobFn,
}

struct QueueState {
    pending: VecDeque<Job>,
    running: usize,
    accepting: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    work_ready: Condvar,
    drained: Condvar,
    stopped: Arc<AtomicBool>,
}

/// A fixed-priority background job queue.
pub struct JobQueue {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobQueue {
    /// Start a queue with `worker_count` worker threads (at least one).
    pub fn new(worker_count: usize) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                running: 0,
                accepting: true,
            }),
            work_ready: Condvar::new(),
            drained: Condvar::new(),
            stopped: Arc::new(AtomicBool::new(false)),
        });

        let mut workers = Vec::new();
        for index in 0..worker_count.max(1) {
            let shared = Arc::clone(&shared);
            workers.push(
                std::thread::Builder::new()
                    .name(format!("rill-job-{index}"))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn job worker"),
            );
        }

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Enqueue a job. Returns `false` if the queue has stopped accepting.
    pub fn add_job<F>(&self, job_type: JobType, name: &'static str, run: F) -> bool
    where
        F: FnOnce(&JobContext) + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        if !state.accepting {
            debug!(name, "job rejected, queue stopped");
            return false;
        }
        let job = Job {
            job_type,
            name,
            run: Box::new(run),
        };
        // Keep the deque sorted: higher priority jobs drain first, ties in
        // submission order.
        let at = state
            .pending
            .iter()
            .position(|queued| queued.job_type > job.job_type)
            .unwrap_or(state.pending.len());
        state.pending.insert(at, job);
        drop(state);
        self.shared.work_ready.notify_one();
        true
    }

    /// Pending plus running job count.
    pub fn job_count(&self) -> usize {
        let state = self.shared.state.lock();
        state.pending.len() + state.running
    }

    /// Block until no job is pending or running.
    pub fn wait_idle(&self) {
        let mut state = self.shared.state.lock();
        while !state.pending.is_empty() || state.running > 0 {
            self.shared.drained.wait(&mut state);
        }
    }

    /// Stop the queue: drop pending jobs, let in-flight jobs finish, join
    /// the workers.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        {
            let mut state = self.shared.state.lock();
            state.accepting = false;
            let dropped = state.pending.len();
            state.pending.clear();
            if dropped > 0 {
                debug!(dropped, "cleared pending jobs on stop");
            }
        }
        self.shared.work_ready.notify_all();

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.join();
        }
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    let ctx = JobContext {
        stopped: Arc::clone(&shared.stopped),
    };
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if let Some(job) = state.pending.pop_front() {
                    state.running += 1;
                    break job;
                }
                if !state.accepting {
                    return;
                }
                shared.work_ready.wait(&mut state);
            }
        };

        trace!(name = job.name, kind = ?job.job_type, "running job");
        (job.run)(&ctx);

        let mut state = shared.state.lock();
        state.running -= 1;
        if state.pending.is_empty() && state.running == 0 {
            shared.drained.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_jobs_run() {
        let queue = JobQueue::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            assert!(queue.add_job(JobType::SaveCurrent, "count", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        queue.wait_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_priority_order() {
        // One worker so execution order equals queue order.
        let queue = JobQueue::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        // A long job to hold the worker while we enqueue.
        let gate = Arc::new(AtomicBool::new(false));
        {
            let gate = Arc::clone(&gate);
            queue.add_job(JobType::SaveCurrent, "gate", move |_| {
                while !gate.load(Ordering::Acquire) {
                    std::thread::yield_now();
                }
            });
        }

        for (job_type, tag) in [
            (JobType::SaveOld, "old-1"),
            (JobType::SaveCurrent, "cur-1"),
            (JobType::SaveOld, "old-2"),
            (JobType::SaveCurrent, "cur-2"),
        ] {
            let order = Arc::clone(&order);
            queue.add_job(job_type, "tagged", move |_| {
                order.lock().push(tag);
            });
        }

        gate.store(true, Ordering::Release);
        queue.wait_idle();
        assert_eq!(*order.lock(), vec!["cur-1", "cur-2", "old-1", "old-2"]);
    }

    #[test]
    fn test_stop_rejects_new_jobs() {
        let queue = JobQueue::new(1);
        queue.stop();
        assert!(!queue.add_job(JobType::SaveOld, "late", |_| {}));
    }

    #[test]
    fn test_in_flight_job_sees_stop_flag() {
        let queue = Arc::new(JobQueue::new(1));
        let started = Arc::new(AtomicBool::new(false));
        let observed_stop = Arc::new(AtomicBool::new(false));

        {
            let started = Arc::clone(&started);
            let observed_stop = Arc::clone(&observed_stop);
            queue.add_job(JobType::SaveCurrent, "spin", move |ctx| {
                started.store(true, Ordering::Release);
                while !ctx.is_stopped() {
                    std::thread::yield_now();
                }
                observed_stop.store(true, Ordering::Release);
            });
        }

        while !started.load(Ordering::Acquire) {
            std::thread::yield_now();
        }
        queue.stop();
        assert!(observed_stop.load(Ordering::Acquire));
    }
}
