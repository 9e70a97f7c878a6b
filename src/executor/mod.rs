//! Task executor - Worker pool, fixed-rate scheduler and batch execution
//!
//! Two independent thread pools: `aleph-worker-*` for submitted tasks and
//! `aleph-scheduler-*` for periodic ones. Every unit of work is timed,
//! counted and shielded from panics.

pub mod batch;
pub mod cancel;
pub mod handle;
mod pool;
pub mod scheduler;
mod workers;

pub use cancel::{CancellationToken, current_token, is_cancelled};
pub use handle::TaskHandle;
pub use scheduler::{ScheduledHandle, TaskOutcome};

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;

use crate::core::Result;
use crate::core::config::ExecutorConfig;
use pool::WorkerPool;
use scheduler::Scheduler;

const ANONYMOUS: &str = "anonymous";

pub struct TaskExecutor {
    pool: WorkerPool,
    scheduler: Scheduler,
    shutdown_grace: Duration,
    scheduler_shutdown_grace: Duration,
    shut_down: AtomicBool,
}

impl TaskExecutor {
    pub fn new(config: &ExecutorConfig) -> Result<Self> {
        let pool = WorkerPool::new(
            config.pool_size,
            config.queue_capacity,
            config.slow_task_threshold(),
        )?;
        let scheduler = Scheduler::new(config.scheduler_threads, config.slow_task_threshold())?;

        info!(
            workers = config.pool_size,
            scheduler_threads = config.scheduler_threads,
            "🚀 Task executor ready"
        );

        Ok(Self {
            pool,
            scheduler,
            shutdown_grace: config.shutdown_grace(),
            scheduler_shutdown_grace: config.scheduler_shutdown_grace(),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Submit a task to the worker pool.
    ///
    /// When the queue is full the task runs on the calling thread before this
    /// returns. Only fails with [`Error::Rejected`](crate::Error::Rejected)
    /// after [`shutdown`](Self::shutdown).
    pub fn submit<T, F>(&self, task: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.pool.submit(ANONYMOUS, task)
    }

    /// [`submit`](Self::submit) with a label used in slow-task and panic logs.
    pub fn submit_named<T, F>(&self, label: &str, task: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.pool.submit(label, task)
    }

    /// Fire-and-forget submission. The handle may be dropped.
    pub fn submit_async<F>(&self, task: F) -> Result<TaskHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.submit("async", task)
    }

    /// Run `task` every `period` (start-to-start) after `initial_delay` on the
    /// scheduler pool. Failing or panicking runs are logged and the schedule
    /// continues.
    pub fn schedule_at_fixed_rate<F, O>(
        &self,
        label: &str,
        task: F,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledHandle>
    where
        F: FnMut() -> O + Send + 'static,
        O: TaskOutcome,
    {
        self.scheduler.schedule(label, task, initial_delay, period)
    }

    /// Tasks submitted and not yet finished, queued ones included.
    pub fn active_tasks(&self) -> usize {
        self.pool.active()
    }

    pub fn queued_tasks(&self) -> usize {
        self.pool.queued()
    }

    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    pub fn scheduled_tasks(&self) -> usize {
        self.scheduler.scheduled()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop accepting work and drain both pools within their grace periods.
    ///
    /// Idempotent. Returns whether both pools drained in time; work left
    /// over after the grace period is cancelled.
    pub fn shutdown(&self) -> bool {
        let first = !self.shut_down.swap(true, Ordering::AcqRel);
        if first {
            info!("🛑 Shutting down task executor");
        }

        // No periodic run or new schedule may start while the pool drains.
        self.scheduler.stop_dispatch();
        let pool_drained = self.pool.shutdown(self.shutdown_grace);
        let scheduler_drained = self.scheduler.shutdown(self.scheduler_shutdown_grace);

        if first {
            info!(pool_drained, scheduler_drained, "🛑 Task executor stopped");
        }
        pool_drained && scheduler_drained
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        if !self.is_shutdown() {
            self.shutdown();
        }
    }
}
