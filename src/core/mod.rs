//! Core module - Errors, error codes, and configuration

pub mod config;
pub mod error;
pub mod error_code;

pub use config::Config;
pub use error::{Error, FailureKind, Result};
pub use error_code::{ErrorCode, ErrorDomain};
