//! Resilience - Failure classification, alerting and retries

pub mod alert;
pub mod classifier;
pub mod retry;

pub use alert::{Alert, AlertSink, ChannelAlertSink, LogAlertSink};
pub use classifier::{FailureContext, FailureHandler};
pub use retry::{Backoff, Retrier, RetryContext, RetryPolicy};
