//! Bounded producer/consumer task scheduler
//!
//! One producer thread enumerates transfer units and pushes them into a
//! fixed-capacity queue; `T` workers drain it. Every worker owns its own
//! counter slot so hot counters never contend. Handler errors go to a capped
//! [`ErrorQueue`] and never stop the remaining workers.

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Unit of work. Receives the id of the worker running it.
pub type Task<'a> = Box<dyn FnOnce(usize) -> anyhow::Result<()> + Send + 'a>;

/// Keeps the first `capacity` errors reported by workers.
pub struct ErrorQueue {
    capacity: usize,
    errors: Mutex<Vec<anyhow::Error>>,
    dropped: AtomicUsize,
}

impl ErrorQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            errors: Mutex::new(Vec::new()),
            dropped: AtomicUsize::new(0),
        }
    }

    pub fn add(&self, err: anyhow::Error) {
        let mut errors = self.errors.lock();
        if errors.len() < self.capacity {
            errors.push(err);
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Errors reported after the queue was full
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Remove and return every retained error, oldest first.
    pub fn take_all(&self) -> Vec<anyhow::Error> {
        std::mem::take(&mut *self.errors.lock())
    }
}

/// Per-worker attempted/succeeded slots.
pub struct WorkerCounters {
    total: Vec<AtomicUsize>,
    success: Vec<AtomicUsize>,
}

impl WorkerCounters {
    pub fn new(workers: usize) -> Self {
        Self {
            total: (0..workers).map(|_| AtomicUsize::new(0)).collect(),
            success: (0..workers).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    pub fn attempt(&self, worker: usize) {
        self.total[worker].fetch_add(1, Ordering::Relaxed);
    }

    pub fn succeed(&self, worker: usize) {
        self.success[worker].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Vec<WorkerTotals> {
        self.total
            .iter()
            .zip(&self.success)
            .map(|(t, s)| WorkerTotals {
                attempted: t.load(Ordering::Relaxed),
                succeeded: s.load(Ordering::Relaxed),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerTotals {
    pub attempted: usize,
    pub succeeded: usize,
}

/// Outcome of one [`Runner::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunTotals {
    pub attempted: usize,
    pub succeeded: usize,
    /// Units dequeued after cancellation and never started
    pub cancelled: usize,
    pub per_worker: Vec<WorkerTotals>,
}

impl RunTotals {
    pub fn failed(&self) -> usize {
        self.attempted - self.succeeded
    }
}

/// Cooperative cancellation checked at every dequeue.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle the producer uses to enqueue work.
pub struct TaskProducer<'a> {
    tx: Sender<Task<'a>>,
    added: usize,
    cancel: Option<CancelToken>,
}

impl<'a> TaskProducer<'a> {
    /// Queue a task, blocking while the queue is full. Returns `false` once
    /// the run is cancelled or every worker is gone; the task is dropped.
    pub fn add_task<F>(&mut self, task: F) -> bool
    where
        F: FnOnce(usize) -> anyhow::Result<()> + Send + 'a,
    {
        if self.is_cancelled() {
            return false;
        }
        if self.tx.send(Box::new(task)).is_err() {
            return false;
        }
        self.added += 1;
        true
    }

    pub fn tasks_added(&self) -> usize {
        self.added
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|c| c.is_cancelled()).unwrap_or(false)
    }
}

pub struct Runner {
    threads: usize,
    capacity: usize,
    cancel: Option<CancelToken>,
}

impl Runner {
    pub fn new(threads: usize, capacity: usize) -> Self {
        Self {
            threads: threads.max(1),
            capacity: capacity.max(1),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: Option<CancelToken>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `produce` on a producer thread and drain its tasks on the workers.
    /// Blocks until the producer returns and the queue is empty.
    pub fn run<'a, P>(&self, errors: &ErrorQueue, produce: P) -> RunTotals
    where
        P: FnOnce(&mut TaskProducer<'a>) + Send,
    {
        let counters = WorkerCounters::new(self.threads);
        let cancelled = AtomicUsize::new(0);
        let (tx, rx) = channel::bounded::<Task<'a>>(self.capacity);

        thread::scope(|s| {
            for worker in 0..self.threads {
                let rx = rx.clone();
                let counters = &counters;
                let cancelled = &cancelled;
                let cancel = self.cancel.as_ref();
                s.spawn(move || {
                    for task in rx.iter() {
                        if cancel.map(|c| c.is_cancelled()).unwrap_or(false) {
                            cancelled.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                        counters.attempt(worker);
                        match task(worker) {
                            Ok(()) => counters.succeed(worker),
                            Err(e) => errors.add(e),
                        }
                    }
                });
            }
            drop(rx);

            let cancel = self.cancel.clone();
            s.spawn(move || {
                let mut producer = TaskProducer {
                    tx,
                    added: 0,
                    cancel,
                };
                produce(&mut producer);
            });
        });

        let per_worker = counters.snapshot();
        RunTotals {
            attempted: per_worker.iter().map(|w| w.attempted).sum(),
            succeeded: per_worker.iter().map(|w| w.succeeded).sum(),
            cancelled: cancelled.into_inner(),
            per_worker,
        }
    }
}

/// `"[Thread N] "` plus `"[Dry run] "` in dry-run mode.
pub fn log_msg_prefix(worker: usize, dry_run: bool) -> String {
    if dry_run {
        format!("[Thread {worker}] [Dry run] ")
    } else {
        format!("[Thread {worker}] ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_totals_match_worker_sums() {
        let runner = Runner::new(4, 8);
        let errors = ErrorQueue::new(1);
        let totals = runner.run(&errors, |producer| {
            for i in 0..100usize {
                producer.add_task(move |_| {
                    if i % 10 == 0 {
                        anyhow::bail!("unit {i} failed")
                    }
                    Ok(())
                });
            }
        });
        assert_eq!(totals.attempted, 100);
        assert_eq!(totals.succeeded, 90);
        assert_eq!(totals.failed(), 10);
        assert_eq!(totals.attempted, totals.per_worker.iter().map(|w| w.attempted).sum::<usize>());
        assert_eq!(totals.succeeded, totals.per_worker.iter().map(|w| w.succeeded).sum::<usize>());
        // Capacity one: only the first failure is retained
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.dropped(), 9);
    }

    #[test]
    fn test_tasks_borrow_caller_state() {
        let seen = Mutex::new(HashSet::new());
        let runner = Runner::new(3, 2);
        let errors = ErrorQueue::new(1);
        let totals = runner.run(&errors, |producer| {
            for i in 0..20usize {
                let seen = &seen;
                producer.add_task(move |worker| {
                    assert!(worker < 3);
                    seen.lock().insert(i);
                    Ok(())
                });
            }
        });
        assert_eq!(totals.succeeded, 20);
        assert_eq!(seen.lock().len(), 20);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_cancel_stops_remaining_units() {
        let cancel = CancelToken::new();
        let runner = Runner::new(1, 1).with_cancel(Some(cancel.clone()));
        let errors = ErrorQueue::new(1);
        let totals = runner.run(&errors, |producer| {
            let c = cancel.clone();
            producer.add_task(move |_| {
                c.cancel();
                Ok(())
            });
            for _ in 0..10 {
                if !producer.add_task(|_| Ok(())) {
                    break;
                }
            }
        });
        assert_eq!(totals.succeeded, 1);
        assert_eq!(totals.attempted, 1);
        assert!(totals.succeeded <= totals.attempted);
    }

    #[test]
    fn test_error_queue_keeps_first() {
        let q = ErrorQueue::new(2);
        q.add(anyhow::anyhow!("one"));
        q.add(anyhow::anyhow!("two"));
        q.add(anyhow::anyhow!("three"));
        assert_eq!(q.dropped(), 1);
        let kept: Vec<String> = q.take_all().iter().map(|e| e.to_string()).collect();
        assert_eq!(kept, vec!["one", "two"]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_log_prefix() {
        assert_eq!(log_msg_prefix(2, false), "[Thread 2] ");
        assert_eq!(log_msg_prefix(0, true), "[Thread 0] [Dry run] ");
    }
}
