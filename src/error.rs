//! Error taxonomy for optimization runs
//!
//! - [`ParameterError`]: a parameter or space definition is unusable
//! - [`ConfigError`]: the run request is invalid; nothing has been evaluated
//! - [`EvaluationError`]: a single backtest failed; the whole run is aborted
//! - [`OptimizerError`]: what [`crate::runner::OptimizationRunner::run`] returns
//!
//! A cancelled run is not an error. It ends with a partial
//! [`crate::runner::RunOutcome`].

use std::time::Duration;

use thiserror::Error;

use crate::enumerator::Assignment;

/// Invalid parameter or parameter-space definition
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    #[error("parameter space must contain at least one parameter")]
    EmptySpace,

    #[error("parameter name must not be empty")]
    EmptyName,

    #[error("parameter \"{0}\" is declared more than once")]
    DuplicateName(String),

    #[error("parameter \"{name}\": min, max, step and default must be finite numbers")]
    NonFinite { name: String },

    #[error("parameter \"{name}\": step ({step}) must be greater than 0")]
    NonPositiveStep { name: String, step: f64 },

    #[error("parameter \"{name}\": min ({min}) must be <= max ({max})")]
    InvertedBounds { name: String, min: f64, max: f64 },

    #[error("parameter \"{name}\": default ({default}) must be between min ({min}) and max ({max})")]
    DefaultOutOfRange {
        name: String,
        default: f64,
        min: f64,
        max: f64,
    },

    #[error("combination count overflows 128 bits")]
    CardinalityOverflow,
}

impl ParameterError {
    /// Name of the offending parameter, if the error is about a single one
    pub fn parameter(&self) -> Option<&str> {
        match self {
            Self::DuplicateName(name)
            | Self::NonFinite { name }
            | Self::NonPositiveStep { name, .. }
            | Self::InvertedBounds { name, .. }
            | Self::DefaultOutOfRange { name, .. } => Some(name),
            Self::EmptySpace | Self::EmptyName | Self::CardinalityOverflow => None,
        }
    }
}

/// Invalid run request, reported before any evaluation starts
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("historical data file \"{path}\" does not exist")]
    HistoricalDataMissing { path: String },

    #[error("\"Minimum trades\" must be greater or equal to 2 (got {value})")]
    MinTradesTooLow { value: u32 },

    #[error("{field}: \"{value}\" is not a valid date, expected YYYY-MM-DD HH:MM:SS")]
    InvalidDate { field: &'static str, value: String },

    #[error("date range start ({start}) is after end ({end})")]
    InvertedDateRange { start: String, end: String },

    #[error("invalid parameter definition: {0}")]
    InvalidParameter(#[from] ParameterError),

    #[error("{field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },
}

impl ConfigError {
    /// Name of the request field that failed validation
    pub fn field(&self) -> &'static str {
        match self {
            Self::HistoricalDataMissing { .. } => "historical_data",
            Self::MinTradesTooLow { .. } => "min_trades",
            Self::InvalidDate { field, .. } => field,
            Self::InvertedDateRange { .. } => "date_range",
            Self::InvalidParameter(_) => "parameters",
            Self::InvalidSetting { field, .. } => field,
        }
    }
}

/// Failure of a single backtest evaluation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("historical data error: {0}")]
    Data(String),

    #[error("strategy error: {0}")]
    Strategy(String),

    #[error("assignment has no parameter \"{0}\"")]
    MissingParameter(String),

    #[error("evaluation exceeded timeout of {0:?}")]
    Timeout(Duration),

    #[error("evaluator panicked: {0}")]
    Panicked(String),
}

/// Error returned by an optimization run
#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),

    #[error("evaluation failed for [{assignment}]: {source}")]
    Evaluation {
        assignment: Assignment,
        #[source]
        source: EvaluationError,
    },

    #[error("evaluator failed to prepare: {0}")]
    Preparation(#[source] EvaluationError),

    #[error("an optimization run is already in progress")]
    AlreadyRunning,

    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),
}

impl From<ParameterError> for OptimizerError {
    fn from(err: ParameterError) -> Self {
        Self::InvalidConfiguration(ConfigError::InvalidParameter(err))
    }
}

pub type OptimizerResult<T> = Result<T, OptimizerError>;
