//! Strategy Optimizer
//!
//! Searches a discretized trading-strategy parameter space for the
//! assignments that maximize a chosen performance metric, evaluating each
//! assignment with a pluggable backtest on a pool of worker threads.
//!
//! Two search methods are available: exhaustive enumeration of every grid
//! point and divide-and-conquer refinement, which samples a coarse grid and
//! repeatedly zooms in around the best result.

pub mod cancel;
pub mod config;
pub mod data;
pub mod enumerator;
pub mod error;
pub mod evaluator;
pub mod params;
pub mod progress;
pub mod replay;
pub mod results;
pub mod runner;
pub mod search;
pub mod types;

pub use cancel::CancellationToken;
pub use config::RunConfig;
pub use data::{Candle, DateRangeSpec, DateWindow, HistoricalData};
pub use enumerator::{Assignment, CombinationEnumerator};
pub use error::{ConfigError, EvaluationError, OptimizerError, OptimizerResult, ParameterError};
pub use evaluator::{BacktestEvaluator, EvaluationContext};
pub use params::{ParamRange, Parameter, ParameterSpace};
pub use progress::{IndicatifProgress, LogProgress, NoProgress, ProgressSink, ProgressUpdate};
pub use replay::ReplayEvaluator;
pub use results::{OptimizationResult, OptimizationSurface, ResultSet};
pub use runner::{
    OptimizationRunner, RunOutcome, RunRequest, RunState, RunStatus, RunnerSettings,
};
pub use search::{DivideAndConquerSearch, ExhaustiveSearch, RefinementSettings, SearchStrategy};
pub use types::{Metrics, PerformanceMetric, SearchMethod};
