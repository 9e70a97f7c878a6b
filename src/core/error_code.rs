//! Error codes - Stable, domain-partitioned failure identifiers
//!
//! An [`ErrorCode`] says *what* failed. How loudly to react is decided
//! separately by [`FailureKind`](crate::core::FailureKind).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Business domain an error code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorDomain {
    Data,
    Strategy,
    Order,
    Execution,
    Risk,
    System,
}

impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorDomain::Data => "data",
            ErrorDomain::Strategy => "strategy",
            ErrorDomain::Order => "order",
            ErrorDomain::Execution => "execution",
            ErrorDomain::Risk => "risk",
            ErrorDomain::System => "system",
        };
        f.write_str(name)
    }
}

/// Closed set of platform error codes.
///
/// Codes are grouped by thousands: 1xxx data, 2xxx strategy, 3xxx order,
/// 4xxx execution, 5xxx risk, 9xxx system. Numbers are part of the external
/// contract and must never be reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Data
    DataNotFound,
    DataInvalid,
    DataSourceUnavailable,
    DataStale,

    // Strategy
    StrategyNotFound,
    StrategyInitFailed,
    SignalGenerationFailed,
    StrategyConfigInvalid,

    // Order
    OrderRejected,
    OrderNotFound,
    OrderInvalid,
    OrderDuplicate,

    // Execution
    ExecutionFailed,
    BrokerUnavailable,
    ExecutionTimeout,
    FillMismatch,

    // Risk
    RiskLimitExceeded,
    PositionLimitExceeded,
    DrawdownLimitBreached,
    InsufficientMargin,

    // System
    Internal,
    Configuration,
    ResourceExhausted,
    ShuttingDown,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 24] = [
        ErrorCode::DataNotFound,
        ErrorCode::DataInvalid,
        ErrorCode::DataSourceUnavailable,
        ErrorCode::DataStale,
        ErrorCode::StrategyNotFound,
        ErrorCode::StrategyInitFailed,
        ErrorCode::SignalGenerationFailed,
        ErrorCode::StrategyConfigInvalid,
        ErrorCode::OrderRejected,
        ErrorCode::OrderNotFound,
        ErrorCode::OrderInvalid,
        ErrorCode::OrderDuplicate,
        ErrorCode::ExecutionFailed,
        ErrorCode::BrokerUnavailable,
        ErrorCode::ExecutionTimeout,
        ErrorCode::FillMismatch,
        ErrorCode::RiskLimitExceeded,
        ErrorCode::PositionLimitExceeded,
        ErrorCode::DrawdownLimitBreached,
        ErrorCode::InsufficientMargin,
        ErrorCode::Internal,
        ErrorCode::Configuration,
        ErrorCode::ResourceExhausted,
        ErrorCode::ShuttingDown,
    ];

    /// Stable machine code.
    pub const fn code(self) -> u16 {
        match self {
            ErrorCode::DataNotFound => 1001,
            ErrorCode::DataInvalid => 1002,
            ErrorCode::DataSourceUnavailable => 1003,
            ErrorCode::DataStale => 1004,
            ErrorCode::StrategyNotFound => 2001,
            ErrorCode::StrategyInitFailed => 2002,
            ErrorCode::SignalGenerationFailed => 2003,
            ErrorCode::StrategyConfigInvalid => 2004,
            ErrorCode::OrderRejected => 3001,
            ErrorCode::OrderNotFound => 3002,
            ErrorCode::OrderInvalid => 3003,
            ErrorCode::OrderDuplicate => 3004,
            ErrorCode::ExecutionFailed => 4001,
            ErrorCode::BrokerUnavailable => 4002,
            ErrorCode::ExecutionTimeout => 4003,
            ErrorCode::FillMismatch => 4004,
            ErrorCode::RiskLimitExceeded => 5001,
            ErrorCode::PositionLimitExceeded => 5002,
            ErrorCode::DrawdownLimitBreached => 5003,
            ErrorCode::InsufficientMargin => 5004,
            ErrorCode::Internal => 9001,
            ErrorCode::Configuration => 9002,
            ErrorCode::ResourceExhausted => 9003,
            ErrorCode::ShuttingDown => 9004,
        }
    }

    /// Human readable description.
    pub const fn description(self) -> &'static str {
        match self {
            ErrorCode::DataNotFound => "requested market data not found",
            ErrorCode::DataInvalid => "market data failed validation",
            ErrorCode::DataSourceUnavailable => "market data source unavailable",
            ErrorCode::DataStale => "market data is stale",
            ErrorCode::StrategyNotFound => "strategy not registered",
            ErrorCode::StrategyInitFailed => "strategy failed to initialize",
            ErrorCode::SignalGenerationFailed => "signal generation failed",
            ErrorCode::StrategyConfigInvalid => "strategy configuration is invalid",
            ErrorCode::OrderRejected => "order rejected",
            ErrorCode::OrderNotFound => "order not found",
            ErrorCode::OrderInvalid => "order parameters are invalid",
            ErrorCode::OrderDuplicate => "duplicate order",
            ErrorCode::ExecutionFailed => "order execution failed",
            ErrorCode::BrokerUnavailable => "broker connection unavailable",
            ErrorCode::ExecutionTimeout => "order execution timed out",
            ErrorCode::FillMismatch => "fill does not match order",
            ErrorCode::RiskLimitExceeded => "risk limit exceeded",
            ErrorCode::PositionLimitExceeded => "position limit exceeded",
            ErrorCode::DrawdownLimitBreached => "drawdown limit breached",
            ErrorCode::InsufficientMargin => "insufficient margin",
            ErrorCode::Internal => "internal error",
            ErrorCode::Configuration => "configuration error",
            ErrorCode::ResourceExhausted => "resource exhausted",
            ErrorCode::ShuttingDown => "system is shutting down",
        }
    }

    pub const fn domain(self) -> ErrorDomain {
        match self.code() / 1000 {
            1 => ErrorDomain::Data,
            2 => ErrorDomain::Strategy,
            3 => ErrorDomain::Order,
            4 => ErrorDomain::Execution,
            5 => ErrorDomain::Risk,
            _ => ErrorDomain::System,
        }
    }

    /// Reverse lookup from the machine code.
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.code() == code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{} {}", self.code(), self.description())
    }
}
