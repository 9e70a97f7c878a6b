//! Worker threads - Named thread sets and instrumented execution

use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::core::error::panic_message;
use crate::core::{Error, Result};

/// A fixed group of named OS threads with a live count to wait on.
pub(crate) struct WorkerSet {
    prefix: &'static str,
    live: Mutex<usize>,
    exited: Condvar,
}

impl WorkerSet {
    pub fn new(prefix: &'static str) -> Arc<Self> {
        Arc::new(Self {
            prefix,
            live: Mutex::new(0),
            exited: Condvar::new(),
        })
    }

    /// Spawn `count` threads named `{prefix}-{n}`, each running `body(n)`.
    ///
    /// Threads are detached; completion is observed through
    /// [`wait_idle`](Self::wait_idle).
    pub fn spawn<F>(self: &Arc<Self>, count: usize, body: F) -> Result<()>
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        let body = Arc::new(body);
        for n in 0..count {
            *self.live.lock() += 1;
            let set = Arc::clone(self);
            let body = Arc::clone(&body);
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.prefix, n))
                .spawn(move || {
                    let _exit = ExitGuard(set);
                    body(n);
                });
            if let Err(e) = spawned {
                self.mark_exited();
                return Err(Error::Io(e));
            }
        }
        debug!(threads = count, prefix = self.prefix, "worker threads started");
        Ok(())
    }

    pub fn live(&self) -> usize {
        *self.live.lock()
    }

    /// Wait until every thread has exited. `false` if `timeout` ran out first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut live = self.live.lock();
        while *live > 0 {
            if self.exited.wait_until(&mut live, deadline).timed_out() {
                return *live == 0;
            }
        }
        true
    }

    fn mark_exited(&self) {
        let mut live = self.live.lock();
        *live = live.saturating_sub(1);
        self.exited.notify_all();
    }
}

struct ExitGuard(Arc<WorkerSet>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.mark_exited();
    }
}

/// Run one unit of work: catch panics, time it, warn when it is slow.
pub(crate) fn run_instrumented<T, F>(label: &str, slow_threshold: Duration, work: F) -> Result<T>
where
    F: FnOnce() -> T,
{
    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(work));
    let elapsed = started.elapsed();

    if elapsed > slow_threshold {
        warn!(
            task = label,
            elapsed_ms = elapsed.as_millis() as u64,
            threshold_ms = slow_threshold.as_millis() as u64,
            "🐢 Slow task"
        );
    }

    outcome.map_err(|payload| {
        let message = panic_message(payload.as_ref());
        error!(task = label, panic = %message, "💥 Task panicked");
        Error::Panicked(message)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_wait_idle_after_threads_finish() {
        let set = WorkerSet::new("test-worker");
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        set.spawn(3, move |_| {
            thread::sleep(Duration::from_millis(10));
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        assert!(set.wait_idle(Duration::from_secs(5)));
        assert_eq!(ran.load(Ordering::SeqCst), 3);
        assert_eq!(set.live(), 0);
    }

    #[test]
    fn test_wait_idle_times_out() {
        let set = WorkerSet::new("test-sleeper");
        set.spawn(1, |_| thread::sleep(Duration::from_millis(200)))
            .unwrap();
        assert!(!set.wait_idle(Duration::from_millis(10)));
        assert!(set.wait_idle(Duration::from_secs(5)));
    }

    #[test]
    fn test_threads_are_named() {
        let set = WorkerSet::new("test-named");
        let (tx, rx) = crossbeam::channel::unbounded();
        set.spawn(2, move |_| {
            let name = thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        })
        .unwrap();

        let mut names: Vec<_> = rx.iter().take(2).flatten().collect();
        names.sort();
        assert_eq!(names, vec!["test-named-0", "test-named-1"]);
    }

    #[test]
    fn test_run_instrumented_catches_panic() {
        let result: Result<u32> = run_instrumented("boom", Duration::from_secs(1), || -> u32 {
            panic!("exploded")
        });
        match result {
            Err(Error::Panicked(message)) => assert!(message.contains("exploded")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_run_instrumented_passes_value_through_slow_path() {
        let value = run_instrumented("slow", Duration::from_millis(1), || {
            thread::sleep(Duration::from_millis(5));
            5
        })
        .unwrap();
        assert_eq!(value, 5);
    }
}
