//! Run configuration
//!
//! Loads a JSON run file describing what to optimize, with environment
//! variable overrides for machine-specific settings.
//!
//! ```json
//! {
//!   "historical_data": "data/BTCUSDT_1h.csv",
//!   "date_range": { "start": "2023-01-01", "end": "2023-12-31" },
//!   "metric": "profit_factor",
//!   "min_trades": 30,
//!   "method": "divide_and_conquer",
//!   "parameters": [
//!     { "name": "fast", "min": 5, "max": 50, "step": 1, "default": 10 },
//!     { "name": "slow", "min": 20, "max": 200, "step": 5, "default": 50 }
//!   ],
//!   "optimizer": { "workers": 8, "coarsen_factor": 4 }
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::data::{DateRangeSpec, HistoricalData};
use crate::error::ConfigError;
use crate::params::{Parameter, ParameterSpace};
use crate::runner::{default_workers, RunRequest, RunnerSettings, DEFAULT_MIN_TRADES};
use crate::search::RefinementSettings;
use crate::types::{PerformanceMetric, SearchMethod};

/// Environment variable overriding `optimizer.workers`
pub const WORKERS_ENV: &str = "OPTIMIZER_WORKERS";

/// Main run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub historical_data: PathBuf,
    #[serde(default)]
    pub date_range: DateRangeSpec,
    #[serde(default)]
    pub metric: PerformanceMetric,
    #[serde(default = "default_min_trades")]
    pub min_trades: u32,
    #[serde(default)]
    pub method: SearchMethod,
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    /// Directory for exported result files
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
}

/// Execution settings of the optimizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Worker threads; defaults to the number of hardware threads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(default = "default_coarsen_factor")]
    pub coarsen_factor: u64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_timeout_secs: Option<f64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            workers: None,
            coarsen_factor: default_coarsen_factor(),
            max_iterations: default_max_iterations(),
            evaluation_timeout_secs: None,
        }
    }
}

fn default_min_trades() -> u32 {
    DEFAULT_MIN_TRADES
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_coarsen_factor() -> u64 {
    RefinementSettings::default().coarsen_factor
}

fn default_max_iterations() -> u32 {
    RefinementSettings::default().max_iterations
}

impl RunConfig {
    /// Load configuration from a JSON file
    ///
    /// A relative `historical_data` path is resolved against the config
    /// file's directory when it does not exist relative to the working
    /// directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: RunConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config JSON {}", path.display()))?;

        if config.historical_data.is_relative() && !config.historical_data.exists() {
            if let Some(dir) = path.parent() {
                config.historical_data = dir.join(&config.historical_data);
            }
        }

        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var(WORKERS_ENV) {
            let workers: usize = value
                .trim()
                .parse()
                .with_context(|| format!("{} must be a positive integer, got {:?}", WORKERS_ENV, value))?;
            self.optimizer.workers = Some(workers);
        }
        Ok(())
    }

    pub fn space(&self) -> ParameterSpace {
        ParameterSpace::new(self.parameters.clone())
    }

    pub fn request(&self) -> RunRequest {
        RunRequest::new(HistoricalData::new(&self.historical_data))
            .with_date_range(self.date_range.clone())
            .with_metric(self.metric)
            .with_min_trades(self.min_trades)
            .with_method(self.method)
    }

    /// Runner settings, rejecting timeouts that are not a positive duration
    pub fn settings(&self) -> Result<RunnerSettings, ConfigError> {
        let evaluation_timeout = match self.optimizer.evaluation_timeout_secs {
            None => None,
            Some(secs) if secs.is_nan() || secs <= 0.0 => {
                return Err(ConfigError::InvalidSetting {
                    field: "evaluation_timeout",
                    reason: format!("must be a positive number of seconds, got {}", secs),
                });
            }
            Some(secs) => Some(Duration::try_from_secs_f64(secs).map_err(|e| {
                ConfigError::InvalidSetting {
                    field: "evaluation_timeout",
                    reason: format!("{} seconds: {}", secs, e),
                }
            })?),
        };

        Ok(RunnerSettings {
            workers: self.optimizer.workers.unwrap_or_else(default_workers),
            refinement: RefinementSettings {
                coarsen_factor: self.optimizer.coarsen_factor,
                max_iterations: self.optimizer.max_iterations,
            },
            evaluation_timeout,
        })
    }
}
