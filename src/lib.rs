//! Aleph Runtime - Caching and task execution core
//! Bounded single-flight caches, a worker pool with fixed-rate scheduling,
//! and failure classification with retries for trading services

pub mod cache;
pub mod core;
pub mod executor;
pub mod resilience;
pub mod runtime;

// Re-exports
pub use cache::{CacheManager, CacheRegion, RegionStats};
pub use core::{Config, Error, ErrorCode, FailureKind, Result};
pub use executor::{ScheduledHandle, TaskExecutor, TaskHandle};
pub use resilience::{FailureContext, FailureHandler, Retrier};
pub use runtime::Runtime;
