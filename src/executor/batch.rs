//! Batch execution - Submit many, await in order, fail fast

use std::time::Duration;
use tracing::warn;

use super::TaskExecutor;
use crate::core::{Error, Result};

impl TaskExecutor {
    /// Submit every task, then await them in submission order.
    ///
    /// Each wait is bounded by `timeout` on its own, so the whole call can
    /// take up to `tasks.len() * timeout`. The first failure ends the batch:
    ///
    /// * a task returning an error fails the batch with that error;
    /// * a task still running after `timeout` is cancelled and the batch
    ///   fails with [`Error::Timeout`].
    ///
    /// Tasks after the failing one are neither awaited nor cancelled and
    /// keep running in the background.
    pub fn execute_all<T, F>(&self, tasks: Vec<F>, timeout: Duration) -> Result<Vec<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let handles = tasks
            .into_iter()
            .map(|task| self.submit_named("batch", task))
            .collect::<Result<Vec<_>>>()?;

        let total = handles.len();
        let mut results = Vec::with_capacity(total);
        for (index, handle) in handles.into_iter().enumerate() {
            match handle.join_timeout(timeout) {
                Ok(result) => results.push(result?),
                Err(Error::Timeout(_)) => {
                    handle.cancel();
                    warn!(
                        index,
                        total,
                        timeout_ms = timeout.as_millis() as u64,
                        "⏰ Batch task timed out"
                    );
                    return Err(Error::Timeout(format!(
                        "batch task {} of {} did not finish within {:?}",
                        index + 1,
                        total,
                        timeout
                    )));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(results)
    }
}
