use thiserror::Error;

/// Reasons a forecast could not be produced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ForecastError {
    #[error("insufficient history: need {required} points, have {actual}")]
    InsufficientData { required: usize, actual: usize },
    #[error("history is constant; trend and seasonality are undefined")]
    Degenerate,
    #[error("least-squares system is singular")]
    Singular,
    #[error("invalid forecast parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("forecasting is disabled")]
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    #[error("filter order must be at least 1")]
    InvalidOrder,
    #[error("cutoff {0} must lie strictly between 0 and 1 (fraction of Nyquist)")]
    InvalidCutoff(f64),
    #[error("input has a missing sample at index {0}")]
    MissingSample(usize),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{section}.{field} {reason}")]
    Invalid {
        section: &'static str,
        field: &'static str,
        reason: &'static str,
    },
}
