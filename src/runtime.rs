//! Runtime - Wires cache, executor and failure handling together

use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::CacheManager;
use crate::core::{Config, Result};
use crate::executor::{ScheduledHandle, TaskExecutor};
use crate::resilience::{AlertSink, FailureHandler, LogAlertSink, Retrier};

/// Shared services for one process. Cheap to pass around by reference;
/// the cache and executor are also handed out as `Arc`s.
pub struct Runtime {
    cache: Arc<CacheManager>,
    executor: Arc<TaskExecutor>,
    failure_handler: FailureHandler,
    retrier: Retrier,
    housekeeping: ScheduledHandle,
}

impl Runtime {
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_alert_sink(config, Arc::new(LogAlertSink))
    }

    pub fn with_alert_sink(config: &Config, alerts: Arc<dyn AlertSink>) -> Result<Self> {
        config.validate()?;

        let cache = Arc::new(CacheManager::from_config(&config.cache));
        let executor = Arc::new(TaskExecutor::new(&config.executor)?);
        let failure_handler = FailureHandler::new(alerts);
        let retrier = Retrier::from_config(failure_handler.clone(), &config.retry);

        let housekeeping = {
            let cache = Arc::clone(&cache);
            executor.schedule_at_fixed_rate(
                "cache-cleanup",
                move || {
                    let removed = cache.cleanup_all();
                    if removed > 0 {
                        debug!(removed, "🧹 Swept expired cache entries");
                    }
                },
                config.cache.cleanup_interval(),
                config.cache.cleanup_interval(),
            )?
        };

        info!(
            workers = executor.pool_size(),
            cleanup_interval_secs = config.cache.cleanup_interval_secs,
            "🦀 Runtime started"
        );

        Ok(Self {
            cache,
            executor,
            failure_handler,
            retrier,
            housekeeping,
        })
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    pub fn failure_handler(&self) -> &FailureHandler {
        &self.failure_handler
    }

    pub fn retrier(&self) -> &Retrier {
        &self.retrier
    }

    /// Completed cache sweeps so far.
    pub fn cleanup_runs(&self) -> u64 {
        self.housekeeping.run_count()
    }

    /// Stop housekeeping, drain the executor, log final cache stats.
    /// Returns whether the executor drained within its grace periods.
    pub fn shutdown(&self) -> bool {
        self.housekeeping.cancel();
        let drained = self.executor.shutdown();
        self.cache.log_stats();
        drained
    }

    /// Run the cleanup sweep now instead of waiting for the next tick.
    pub fn sweep_now(&self) -> usize {
        self.cache.cleanup_all()
    }
}
