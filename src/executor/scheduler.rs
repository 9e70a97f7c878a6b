//! Scheduler - Fixed-rate periodic tasks on a dedicated thread pool
//!
//! Cadence is start-to-start: run *n* is due at `first + n * period`
//! regardless of how long earlier runs took. A run that overruns its period
//! delays the next one; the same task never runs concurrently with itself.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::cancel::{CancellationToken, TokenScope};
use super::workers::{WorkerSet, run_instrumented};
use crate::core::{Error, Result};

/// Outcome of one periodic run. Failures are logged; the schedule goes on.
pub trait TaskOutcome {
    fn into_outcome(self) -> std::result::Result<(), String>;
}

impl TaskOutcome for () {
    fn into_outcome(self) -> std::result::Result<(), String> {
        Ok(())
    }
}

impl<T, E: Display> TaskOutcome for std::result::Result<T, E> {
    fn into_outcome(self) -> std::result::Result<(), String> {
        self.map(|_| ()).map_err(|e| e.to_string())
    }
}

type PeriodicFn = Box<dyn FnMut() -> std::result::Result<(), String> + Send>;

struct PeriodicTask {
    id: u64,
    label: String,
    period: Duration,
    work: Mutex<PeriodicFn>,
    token: CancellationToken,
    runs: AtomicU64,
}

impl PeriodicTask {
    fn run(&self, slow_threshold: Duration) {
        let _scope = TokenScope::enter(self.token.clone());
        let outcome = run_instrumented(&self.label, slow_threshold, || {
            let mut work = self.work.lock();
            (*work)()
        });
        self.runs.fetch_add(1, Ordering::Relaxed);

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(task = %self.label, error = %e, "Scheduled run failed, schedule continues");
            }
            // Already logged by the instrumentation.
            Err(_) => {}
        }
    }
}

/// Handle to a periodic schedule.
#[derive(Clone)]
pub struct ScheduledHandle {
    task: Arc<PeriodicTask>,
}

impl ScheduledHandle {
    pub fn id(&self) -> u64 {
        self.task.id
    }

    pub fn label(&self) -> &str {
        &self.task.label
    }

    /// Stop future runs. A run already in progress finishes.
    pub fn cancel(&self) {
        self.task.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.task.token.is_cancelled()
    }

    /// Completed runs, failed and panicked ones included.
    pub fn run_count(&self) -> u64 {
        self.task.runs.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ScheduledHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledHandle")
            .field("id", &self.task.id)
            .field("label", &self.task.label)
            .field("runs", &self.run_count())
            .finish()
    }
}

#[derive(Default)]
struct Timetable {
    due: BinaryHeap<Reverse<(Instant, u64)>>,
    tasks: HashMap<u64, Arc<PeriodicTask>>,
    shutdown: bool,
}

struct SchedulerShared {
    timetable: Mutex<Timetable>,
    wake: Condvar,
    slow_threshold: Duration,
}

pub(crate) struct Scheduler {
    shared: Arc<SchedulerShared>,
    workers: Arc<WorkerSet>,
    next_id: AtomicU64,
}

impl Scheduler {
    pub fn new(threads: usize, slow_threshold: Duration) -> Result<Self> {
        if threads == 0 {
            return Err(Error::Config("scheduler needs at least one thread".into()));
        }

        let shared = Arc::new(SchedulerShared {
            timetable: Mutex::new(Timetable::default()),
            wake: Condvar::new(),
            slow_threshold,
        });

        let workers = WorkerSet::new("aleph-scheduler");
        {
            let shared = Arc::clone(&shared);
            workers.spawn(threads, move |_| scheduler_loop(&shared))?;
        }

        Ok(Self {
            shared,
            workers,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn schedule<F, O>(
        &self,
        label: &str,
        mut task: F,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledHandle>
    where
        F: FnMut() -> O + Send + 'static,
        O: TaskOutcome,
    {
        if period.is_zero() {
            return Err(Error::Config(format!(
                "period of scheduled task '{}' must be > 0",
                label
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let work: PeriodicFn = Box::new(move || task().into_outcome());
        let task = Arc::new(PeriodicTask {
            id,
            label: label.to_string(),
            period,
            work: Mutex::new(work),
            token: CancellationToken::new(),
            runs: AtomicU64::new(0),
        });

        {
            let mut timetable = self.shared.timetable.lock();
            if timetable.shutdown {
                return Err(Error::Rejected(format!(
                    "scheduler is shut down, cannot schedule '{}'",
                    label
                )));
            }
            timetable.tasks.insert(id, Arc::clone(&task));
            timetable
                .due
                .push(Reverse((Instant::now() + initial_delay, id)));
        }
        self.shared.wake.notify_one();

        info!(
            task = label,
            period_ms = period.as_millis() as u64,
            initial_delay_ms = initial_delay.as_millis() as u64,
            "⏱️ Scheduled periodic task"
        );
        Ok(ScheduledHandle { task })
    }

    pub fn scheduled(&self) -> usize {
        self.shared.timetable.lock().tasks.len()
    }

    /// Stop dispatching and reject new schedules without waiting.
    pub fn stop_dispatch(&self) {
        {
            let mut timetable = self.shared.timetable.lock();
            timetable.shutdown = true;
            timetable.due.clear();
        }
        self.shared.wake.notify_all();
    }

    /// Stop dispatching and wait up to `grace` for running invocations.
    /// Past the grace period, running invocations are signalled to cancel.
    pub fn shutdown(&self, grace: Duration) -> bool {
        self.stop_dispatch();
        let tokens: Vec<CancellationToken> = self
            .shared
            .timetable
            .lock()
            .tasks
            .values()
            .map(|t| t.token.clone())
            .collect();

        if self.workers.wait_idle(grace) {
            return true;
        }
        for token in &tokens {
            token.cancel();
        }
        warn!(
            grace_secs = grace.as_secs_f64(),
            "⚠️ Scheduler did not stop in time, signalled running tasks"
        );
        false
    }
}

fn scheduler_loop(shared: &SchedulerShared) {
    let mut timetable = shared.timetable.lock();
    loop {
        if timetable.shutdown {
            return;
        }

        let Some(&Reverse((due, id))) = timetable.due.peek() else {
            shared.wake.wait(&mut timetable);
            continue;
        };
        if due > Instant::now() {
            shared.wake.wait_until(&mut timetable, due);
            continue;
        }
        timetable.due.pop();

        let Some(task) = timetable.tasks.get(&id).cloned() else {
            continue;
        };
        if task.token.is_cancelled() {
            retire(&mut timetable, &task);
            continue;
        }

        MutexGuard::unlocked(&mut timetable, || task.run(shared.slow_threshold));

        if task.token.is_cancelled() {
            retire(&mut timetable, &task);
            continue;
        }
        if !timetable.shutdown {
            timetable.due.push(Reverse((due + task.period, id)));
            shared.wake.notify_one();
        }
    }
}

fn retire(timetable: &mut Timetable, task: &PeriodicTask) {
    timetable.tasks.remove(&task.id);
    debug!(task = %task.label, runs = task.runs.load(Ordering::Relaxed), "periodic task retired");
}
