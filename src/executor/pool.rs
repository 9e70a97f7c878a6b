//! Worker pool - Bounded queue feeding fixed worker threads
//!
//! A full queue never drops work: the submitting thread runs the task
//! itself. Submission is only rejected once the pool is shut down.

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::cancel::{CancellationToken, TokenScope};
use super::handle::{TaskHandle, TaskState};
use super::workers::{WorkerSet, run_instrumented};
use crate::core::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// State shared between the pool, its workers and in-flight tickets.
struct PoolShared {
    active: AtomicUsize,
    /// Tokens of every submitted, not yet finished task.
    live: Mutex<HashMap<u64, CancellationToken>>,
    force_stop: AtomicBool,
}

/// Accounting for one submitted task.
///
/// Releasing (explicitly or on drop) decrements the active counter exactly
/// once. Dropping an unrun ticket resolves the handle as cancelled.
struct Ticket<T> {
    state: Arc<TaskState<T>>,
    shared: Option<Arc<PoolShared>>,
}

impl<T> Ticket<T> {
    fn finish(mut self, result: Result<T>) {
        self.release();
        self.state.complete(result);
    }

    fn release(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.live.lock().remove(&self.state.id());
            shared.active.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl<T> Drop for Ticket<T> {
    fn drop(&mut self) {
        self.release();
        self.state.abandon();
    }
}

pub(crate) struct WorkerPool {
    sender: RwLock<Option<Sender<Job>>>,
    /// Kept so a forced shutdown can resolve jobs no worker will reach.
    queue: Receiver<Job>,
    shared: Arc<PoolShared>,
    workers: Arc<WorkerSet>,
    next_id: AtomicU64,
    size: usize,
    slow_threshold: Duration,
}

impl WorkerPool {
    pub fn new(size: usize, queue_capacity: usize, slow_threshold: Duration) -> Result<Self> {
        if size == 0 || queue_capacity == 0 {
            return Err(Error::Config(
                "worker pool size and queue capacity must be > 0".into(),
            ));
        }

        let (sender, receiver) = channel::bounded::<Job>(queue_capacity);
        let shared = Arc::new(PoolShared {
            active: AtomicUsize::new(0),
            live: Mutex::new(HashMap::new()),
            force_stop: AtomicBool::new(false),
        });

        let workers = WorkerSet::new("aleph-worker");
        {
            let shared = Arc::clone(&shared);
            let receiver = receiver.clone();
            workers.spawn(size, move |_| worker_loop(&receiver, &shared))?;
        }

        info!(size, queue_capacity, "⚙️ Worker pool started");

        Ok(Self {
            sender: RwLock::new(Some(sender)),
            queue: receiver,
            shared,
            workers,
            next_id: AtomicU64::new(1),
            size,
            slow_threshold,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn active(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.sender.read().is_none()
    }

    pub fn submit<T, F>(&self, label: &str, task: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        // Held until the job is queued so shutdown cannot slip in between.
        let guard = self.sender.read();
        let Some(sender) = guard.as_ref() else {
            return Err(Error::Rejected(format!(
                "executor is shut down, cannot accept '{}'",
                label
            )));
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(TaskState::new(id));
        self.shared.active.fetch_add(1, Ordering::AcqRel);
        self.shared
            .live
            .lock()
            .insert(id, state.token().clone());

        let ticket = Ticket {
            state: Arc::clone(&state),
            shared: Some(Arc::clone(&self.shared)),
        };
        let label = label.to_string();
        let slow_threshold = self.slow_threshold;

        let job: Job = Box::new(move || {
            if !ticket.state.start() {
                debug!(task = %label, id, "skipping cancelled task");
                return;
            }
            let _scope = TokenScope::enter(ticket.state.token().clone());
            let result = run_instrumented(&label, slow_threshold, task);
            ticket.finish(result);
        });

        let sent = sender.try_send(job);
        match sent {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                drop(guard);
                debug!(id, "queue full, running on caller thread");
                job();
            }
            Err(TrySendError::Disconnected(_job)) => {
                drop(guard);
                return Err(Error::Rejected("worker pool is gone".into()));
            }
        }

        Ok(TaskHandle::new(state))
    }

    /// Stop accepting work and wait up to `grace` for queued and running
    /// tasks to drain. Past the grace period, still-queued tasks are
    /// cancelled and running ones signalled. `true` if it drained in time.
    pub fn shutdown(&self, grace: Duration) -> bool {
        let sender = self.sender.write().take();
        if sender.is_none() {
            return self.workers.wait_idle(Duration::ZERO);
        }
        drop(sender);

        if self.workers.wait_idle(grace) {
            info!("⚙️ Worker pool drained");
            return true;
        }

        self.shared.force_stop.store(true, Ordering::Release);

        // Workers may all be stuck in tasks that ignore their token, so
        // queued jobs are dropped here. Each dropped ticket resolves its
        // handle as cancelled.
        let mut dropped = 0usize;
        while let Ok(job) = self.queue.try_recv() {
            drop(job);
            dropped += 1;
        }

        let live: Vec<CancellationToken> = self.shared.live.lock().values().cloned().collect();
        for token in &live {
            token.cancel();
        }
        warn!(
            grace_secs = grace.as_secs_f64(),
            dropped,
            signalled = live.len(),
            "⚠️ Worker pool did not drain in time, cancelling remaining work"
        );
        false
    }
}

fn worker_loop(receiver: &Receiver<Job>, shared: &PoolShared) {
    while let Ok(job) = receiver.recv() {
        if shared.force_stop.load(Ordering::Acquire) {
            drop(job);
            continue;
        }
        job();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::is_cancelled;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Instant;

    fn pool(size: usize, queue: usize) -> WorkerPool {
        WorkerPool::new(size, queue, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_rejects_zero_size() {
        assert!(WorkerPool::new(0, 10, Duration::from_secs(1)).is_err());
        assert!(WorkerPool::new(2, 0, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_runs_on_named_worker() {
        let pool = pool(2, 10);
        let name = pool
            .submit("name", || thread::current().name().map(str::to_string))
            .unwrap()
            .join()
            .unwrap();
        assert!(name.unwrap().starts_with("aleph-worker-"));
        assert!(pool.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn test_backpressure_runs_on_caller() {
        let pool = pool(1, 1);
        let gate = Arc::new(Barrier::new(2));

        // Occupy the only worker, then fill the one queue slot.
        let blocker = {
            let gate = gate.clone();
            pool.submit("blocker", move || {
                gate.wait();
            })
            .unwrap()
        };
        thread::sleep(Duration::from_millis(20));
        let queued = pool.submit("queued", || 1).unwrap();

        let caller = thread::current().id();
        let overflow = pool.submit("overflow", move || thread::current().id() == caller).unwrap();
        assert!(overflow.is_done());
        assert!(overflow.join().unwrap());

        gate.wait();
        blocker.join().unwrap();
        assert_eq!(queued.join().unwrap(), 1);
        assert!(pool.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn test_no_work_dropped_under_load() {
        let pool = pool(2, 4);
        let handles: Vec<_> = (0..200u64)
            .map(|i| pool.submit("load", move || i * 2).unwrap())
            .collect();
        let sum: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(sum, (0..200u64).map(|i| i * 2).sum::<u64>());
        assert!(pool.shutdown(Duration::from_secs(5)));
        assert_eq!(pool.active(), 0);
    }

    #[test]
    fn test_active_counter_survives_panic() {
        let pool = pool(2, 10);
        let ok = pool.submit("ok", || 1).unwrap();
        let bad = pool.submit("bad", || -> u32 { panic!("task blew up") }).unwrap();

        assert_eq!(ok.join().unwrap(), 1);
        assert!(matches!(bad.join(), Err(Error::Panicked(_))));
        assert_eq!(pool.active(), 0);

        // Worker survived the panic.
        assert_eq!(pool.submit("after", || 2).unwrap().join().unwrap(), 2);
        assert!(pool.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn test_cancel_queued_task_never_runs() {
        let pool = pool(1, 10);
        let gate = Arc::new(Barrier::new(2));
        let blocker = {
            let gate = gate.clone();
            pool.submit("blocker", move || {
                gate.wait();
            })
            .unwrap()
        };
        let ran = Arc::new(AtomicBool::new(false));
        let queued = {
            let ran = ran.clone();
            pool.submit("queued", move || ran.store(true, Ordering::SeqCst))
                .unwrap()
        };

        assert!(queued.cancel());
        gate.wait();
        blocker.join().unwrap();
        assert!(matches!(queued.join(), Err(Error::Cancelled)));
        assert!(pool.shutdown(Duration::from_secs(5)));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(pool.active(), 0);
    }

    #[test]
    fn test_graceful_shutdown_drains_queue() {
        let pool = pool(1, 16);
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let done = done.clone();
            pool.submit("drain", move || {
                thread::sleep(Duration::from_millis(10));
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        assert!(pool.shutdown(Duration::from_secs(5)));
        assert_eq!(done.load(Ordering::SeqCst), 5);
        assert!(pool.is_shutdown());
        assert!(matches!(
            pool.submit("late", || ()),
            Err(Error::Rejected(_))
        ));
        // Idempotent.
        assert!(pool.shutdown(Duration::from_secs(1)));
    }

    #[test]
    fn test_forced_shutdown_cancels_queue_and_signals_running() {
        let pool = pool(1, 16);
        let running = pool
            .submit("cooperative", || {
                let started = Instant::now();
                while !is_cancelled() && started.elapsed() < Duration::from_secs(10) {
                    thread::sleep(Duration::from_millis(5));
                }
                is_cancelled()
            })
            .unwrap();
        thread::sleep(Duration::from_millis(20));
        let queued = pool.submit("never", || 1).unwrap();

        assert!(!pool.shutdown(Duration::from_millis(50)));
        assert!(running.join().unwrap());
        assert!(matches!(queued.join(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_forced_shutdown_resolves_queue_behind_stuck_task() {
        let pool = pool(1, 16);
        // Ignores its token, so the only worker stays busy past the grace period.
        let stuck = pool
            .submit("stuck", || thread::sleep(Duration::from_millis(300)))
            .unwrap();
        thread::sleep(Duration::from_millis(20));
        let queued = pool.submit("queued", || 1).unwrap();

        assert!(!pool.shutdown(Duration::from_millis(50)));
        assert!(matches!(
            queued.join_timeout(Duration::from_millis(500)),
            Err(Error::Cancelled)
        ));
        assert_eq!(pool.queued(), 0);

        stuck.join().unwrap();
        assert_eq!(pool.active(), 0);
    }

    #[test]
    fn test_submit_racing_shutdown_never_strands_work() {
        let pool = Arc::new(pool(2, 64));
        let start = Arc::new(Barrier::new(5));

        let submitters: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    (0..200u32)
                        .map(|i| pool.submit("race", move || i))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        start.wait();
        thread::sleep(Duration::from_millis(1));
        assert!(pool.shutdown(Duration::from_secs(5)));

        for submitter in submitters {
            for submitted in submitter.join().unwrap() {
                match submitted {
                    Ok(handle) => {
                        // Accepted before the sender was taken, so drained.
                        assert!(handle.is_done());
                        assert!(handle.join_timeout(Duration::from_millis(100)).is_ok());
                    }
                    Err(err) => assert!(matches!(err, Error::Rejected(_))),
                }
            }
        }
        assert_eq!(pool.active(), 0);
    }
}
