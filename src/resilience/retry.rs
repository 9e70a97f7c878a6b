//! Retry - Bounded retries with backoff and best-effort execution
//!
//! Backoff waits honour the current thread's cancellation token: a cancel
//! during a wait aborts the whole call with [`Error::Interrupted`] and the
//! token stays set for the caller to observe.

use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::classifier::{FailureContext, FailureHandler};
use crate::core::config::RetryConfig;
use crate::core::error::panic_message;
use crate::core::{Error, FailureKind, Result};
use crate::executor::current_token;

/// How the wait grows between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// `base * k` before retry `k`
    #[default]
    Linear,
    /// `base * 2^(k-1)` before retry `k`
    Exponential,
}

impl Backoff {
    /// Wait before retry number `retry` (1-indexed).
    pub fn delay(self, base: Duration, retry: u32) -> Duration {
        match self {
            Backoff::Linear => base.saturating_mul(retry),
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(retry.saturating_sub(1));
                base.saturating_mul(factor)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_interval: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn linear(max_retries: u32, base_interval: Duration) -> Self {
        Self {
            max_retries,
            base_interval,
            backoff: Backoff::Linear,
        }
    }

    pub fn exponential(max_retries: u32, base_interval: Duration) -> Self {
        Self {
            max_retries,
            base_interval,
            backoff: Backoff::Exponential,
        }
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        self.backoff.delay(self.base_interval, retry)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_interval: config.base_interval(),
            backoff: config.backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetryConfig::default())
    }
}

/// State of one retrying call, handed to every attempt.
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub operation_name: String,
    /// 0 for the first invocation
    pub attempt: u32,
    pub max_retries: u32,
    pub base_interval: Duration,
}

impl RetryContext {
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_retries
    }
}

#[derive(Clone)]
pub struct Retrier {
    handler: FailureHandler,
    policy: RetryPolicy,
    slow_threshold: Duration,
    component: Option<String>,
}

impl Retrier {
    pub fn new(handler: FailureHandler, policy: RetryPolicy, slow_threshold: Duration) -> Self {
        Self {
            handler,
            policy,
            slow_threshold,
            component: None,
        }
    }

    pub fn from_config(handler: FailureHandler, config: &RetryConfig) -> Self {
        Self::new(handler, config.into(), config.slow_operation_threshold())
    }

    /// Label failures reported through this retrier with `component`.
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Up to `max_retries + 1` invocations, waiting `base_interval * k`
    /// before retry `k`.
    pub fn execute_with_retry<T, F>(
        &self,
        operation: F,
        max_retries: u32,
        base_interval: Duration,
        name: &str,
    ) -> Result<T>
    where
        F: FnMut(&RetryContext) -> Result<T>,
    {
        self.execute_with_policy(operation, &RetryPolicy::linear(max_retries, base_interval), name)
    }

    /// [`execute_with_policy`](Self::execute_with_policy) with the configured policy.
    pub fn execute<T, F>(&self, operation: F, name: &str) -> Result<T>
    where
        F: FnMut(&RetryContext) -> Result<T>,
    {
        let policy = self.policy;
        self.execute_with_policy(operation, &policy, name)
    }

    pub fn execute_with_policy<T, F>(
        &self,
        mut operation: F,
        policy: &RetryPolicy,
        name: &str,
    ) -> Result<T>
    where
        F: FnMut(&RetryContext) -> Result<T>,
    {
        let mut ctx = RetryContext {
            operation_name: name.to_string(),
            attempt: 0,
            max_retries: policy.max_retries,
            base_interval: policy.base_interval,
        };

        loop {
            let err = match operation(&ctx) {
                Ok(value) => {
                    if ctx.attempt > 0 {
                        info!(
                            operation = name,
                            attempt = ctx.attempt + 1,
                            "✅ Succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if ctx.is_last_attempt() {
                let exhausted = Error::RetriesExhausted {
                    operation: name.to_string(),
                    attempts: ctx.attempt + 1,
                    last: Box::new(err),
                };
                self.handler.handle(&exhausted, &self.failure_context(name, None));
                return Err(exhausted);
            }

            let kind = err.kind();
            if kind == FailureKind::Critical {
                self.handler.handle(&err, &self.failure_context(name, None));
            } else {
                warn!(
                    operation = name,
                    attempt = ctx.attempt + 1,
                    max_attempts = policy.max_retries + 1,
                    kind = %kind,
                    error = %err,
                    "🔁 Attempt failed, retrying"
                );
            }

            let retry = ctx.attempt + 1;
            self.pause(policy.delay_for(retry), name, retry)?;
            ctx.attempt = retry;
        }
    }

    /// Run `operation` once. On error or panic the failure goes through the
    /// handler and `default` is returned instead.
    pub fn execute_safely<T, F>(
        &self,
        operation: F,
        default: T,
        name: &str,
        symbol: Option<&str>,
    ) -> T
    where
        F: FnOnce() -> Result<T>,
    {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(operation));
        let elapsed = started.elapsed();
        if elapsed > self.slow_threshold {
            debug!(operation = name, elapsed_ms = elapsed.as_millis() as u64, "slow operation");
        }

        let err = match outcome {
            Ok(Ok(value)) => return value,
            Ok(Err(err)) => err,
            Err(payload) => Error::Panicked(panic_message(payload.as_ref())),
        };
        self.handler.handle(&err, &self.failure_context(name, symbol));
        default
    }

    fn pause(&self, wait: Duration, name: &str, retry: u32) -> Result<()> {
        match current_token() {
            Some(token) => {
                if token.wait_timeout(wait) {
                    warn!(operation = name, retry, "⛔ Backoff interrupted by cancellation");
                    return Err(Error::Interrupted(format!(
                        "{} cancelled while waiting for retry {}",
                        name, retry
                    )));
                }
            }
            None => thread::sleep(wait),
        }
        Ok(())
    }

    fn failure_context(&self, name: &str, symbol: Option<&str>) -> FailureContext {
        FailureContext {
            operation: name.to_string(),
            symbol: symbol.map(str::to_string),
            component: self.component.clone(),
        }
    }
}

impl Default for Retrier {
    fn default() -> Self {
        Self::from_config(FailureHandler::default(), &RetryConfig::default())
    }
}
