use thiserror::Error;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InsufficientReason {
    NoSales,
    NoVisitors,
    NoTraffic,
    ControlUnavailable,
}

impl InsufficientReason {
    pub fn describe(self) -> &'static str {
        match self {
            InsufficientReason::NoSales => "no sales recorded",
            InsufficientReason::NoVisitors => "no visitors to derive a conversion rate from",
            InsufficientReason::NoTraffic => "monthly traffic is zero",
            InsufficientReason::ControlUnavailable => "control group has no usable data",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("insufficient data for {group}: {}", .reason.describe())]
    InsufficientData {
        group: String,
        reason: InsufficientReason,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("no variant could be projected")]
    NoScenario,
    #[error("unknown group: {0}")]
    UnknownGroup(String),
}

impl EngineError {
    pub fn insufficient(group: &str, reason: InsufficientReason) -> Self {
        EngineError::InsufficientData {
            group: group.to_string(),
            reason,
        }
    }
}
