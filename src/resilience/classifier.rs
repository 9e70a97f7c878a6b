//! Failure handler - Classify a failure and react by kind
//!
//! | Kind           | Reaction                                     |
//! |----------------|----------------------------------------------|
//! | `Critical`     | error log + alert                            |
//! | `Connectivity` | warn log                                     |
//! | `Timeout`      | warn log                                     |
//! | `Other`        | error log with full context                  |

use chrono::Utc;
use std::sync::Arc;
use std::thread;
use tracing::{error, warn};

use super::alert::{Alert, AlertSink, LogAlertSink};
use crate::core::{Error, FailureKind};

/// Where a failure happened. Component is always supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct FailureContext {
    pub operation: String,
    /// Symbol or cache key being processed
    pub symbol: Option<String>,
    pub component: Option<String>,
}

impl FailureContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    pub fn symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }
}

#[derive(Clone)]
pub struct FailureHandler {
    alerts: Arc<dyn AlertSink>,
}

impl FailureHandler {
    pub fn new(alerts: Arc<dyn AlertSink>) -> Self {
        Self { alerts }
    }

    /// Log (and, for critical failures, alert) and return the classification.
    pub fn handle(&self, err: &Error, ctx: &FailureContext) -> FailureKind {
        let kind = err.kind();
        let symbol = ctx.symbol.as_deref().unwrap_or("-");
        let component = ctx.component.as_deref().unwrap_or("-");

        match kind {
            FailureKind::Critical => {
                error!(
                    operation = %ctx.operation,
                    symbol,
                    component,
                    code = ?err.code(),
                    "🚨 Critical failure: {}",
                    err
                );
                let alert = Alert::new(&ctx.operation, err.to_string())
                    .with_code(err.code())
                    .with_component(ctx.component.clone())
                    .with_symbol(ctx.symbol.clone());
                self.alerts.raise(alert);
            }
            FailureKind::Connectivity | FailureKind::Timeout => {
                warn!(
                    operation = %ctx.operation,
                    symbol,
                    kind = %kind,
                    "⚠️ {}: {}",
                    kind,
                    err
                );
            }
            FailureKind::Other => {
                let current = thread::current();
                error!(
                    timestamp = %Utc::now().to_rfc3339(),
                    operation = %ctx.operation,
                    symbol,
                    kind = %kind,
                    error_type = err.type_name(),
                    code = ?err.code(),
                    component,
                    thread = current.name().unwrap_or("unnamed"),
                    "❌ Operation failed: {}",
                    err
                );
            }
        }
        kind
    }
}

impl Default for FailureHandler {
    fn default() -> Self {
        Self::new(Arc::new(LogAlertSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorCode;
    use crate::resilience::alert::ChannelAlertSink;

    fn handler() -> (FailureHandler, flume::Receiver<Alert>) {
        let (sink, rx) = ChannelAlertSink::unbounded();
        (FailureHandler::new(Arc::new(sink)), rx)
    }

    #[test]
    fn test_critical_raises_alert() {
        let (handler, rx) = handler();
        let err = Error::critical(ErrorCode::DrawdownLimitBreached, "drawdown 21%");
        let ctx = FailureContext::new("risk_check")
            .symbol("SPY")
            .component("risk");

        assert_eq!(handler.handle(&err, &ctx), FailureKind::Critical);
        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.code, Some(ErrorCode::DrawdownLimitBreached));
        assert_eq!(alert.operation, "risk_check");
        assert_eq!(alert.symbol.as_deref(), Some("SPY"));
        assert_eq!(alert.component.as_deref(), Some("risk"));
    }

    #[test]
    fn test_non_critical_does_not_alert() {
        let (handler, rx) = handler();
        let ctx = FailureContext::new("fetch_quotes");

        let conn = Error::Connectivity("feed reset".into());
        assert_eq!(handler.handle(&conn, &ctx), FailureKind::Connectivity);

        let timeout = Error::Timeout("slow broker".into());
        assert_eq!(handler.handle(&timeout, &ctx), FailureKind::Timeout);

        let other = Error::operation(ErrorCode::DataInvalid, "NaN close");
        assert_eq!(handler.handle(&other, &ctx), FailureKind::Other);

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_io_errors_classified() {
        let (handler, _rx) = handler();
        let ctx = FailureContext::new("connect");
        let refused = Error::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused));
        assert_eq!(handler.handle(&refused, &ctx), FailureKind::Connectivity);
        let timed_out = Error::Io(std::io::Error::from(std::io::ErrorKind::TimedOut));
        assert_eq!(handler.handle(&timed_out, &ctx), FailureKind::Timeout);
    }
}
