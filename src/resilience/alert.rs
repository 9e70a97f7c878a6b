//! Alerting - Hand critical failures to whoever pages a human

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::core::ErrorCode;

/// A critical failure raised for operator attention.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub code: Option<ErrorCode>,
    pub operation: String,
    pub component: Option<String>,
    /// Symbol or cache key the failing operation was working on
    pub symbol: Option<String>,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: None,
            operation: operation.into(),
            component: None,
            symbol: None,
            message: message.into(),
            raised_at: Utc::now(),
        }
    }

    pub fn with_code(mut self, code: Option<ErrorCode>) -> Self {
        self.code = code;
        self
    }

    pub fn with_component(mut self, component: Option<String>) -> Self {
        self.component = component;
        self
    }

    pub fn with_symbol(mut self, symbol: Option<String>) -> Self {
        self.symbol = symbol;
        self
    }
}

/// Destination for alerts. Implementations must not block for long.
pub trait AlertSink: Send + Sync {
    fn raise(&self, alert: Alert);
}

/// Writes alerts to the log as JSON at error level.
#[derive(Debug, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn raise(&self, alert: Alert) {
        match serde_json::to_string(&alert) {
            Ok(payload) => error!(alert = %payload, "🚨 ALERT {}", alert.operation),
            Err(e) => error!(
                operation = %alert.operation,
                error = %e,
                "🚨 ALERT (unserializable)"
            ),
        }
    }
}

/// Forwards alerts over a channel to an external notifier.
pub struct ChannelAlertSink {
    tx: flume::Sender<Alert>,
}

impl ChannelAlertSink {
    pub fn new(tx: flume::Sender<Alert>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving end for the notifier.
    pub fn unbounded() -> (Self, flume::Receiver<Alert>) {
        let (tx, rx) = flume::unbounded();
        (Self::new(tx), rx)
    }
}

impl AlertSink for ChannelAlertSink {
    fn raise(&self, alert: Alert) {
        if let Err(flume::SendError(alert)) = self.tx.send(alert) {
            warn!(operation = %alert.operation, "alert receiver gone, logging instead");
            LogAlertSink.raise(alert);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_serializes() {
        let alert = Alert::new("submit_order", "broker rejected kill switch")
            .with_code(Some(ErrorCode::BrokerUnavailable))
            .with_symbol(Some("AAPL".into()));
        let json: serde_json::Value = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["operation"], "submit_order");
        assert_eq!(json["code"], "BROKER_UNAVAILABLE");
        assert_eq!(json["symbol"], "AAPL");
        assert!(json["component"].is_null());
    }

    #[test]
    fn test_channel_sink_delivers() {
        let (sink, rx) = ChannelAlertSink::unbounded();
        sink.raise(Alert::new("load_bars", "disk gone"));
        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.message, "disk gone");
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelAlertSink::unbounded();
        drop(rx);
        sink.raise(Alert::new("load_bars", "nobody listening"));
    }
}
