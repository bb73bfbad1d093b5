//! Moving-average crossover replay
//!
//! A small, deterministic backtest used by the command line tool. Long only:
//! enter at the close when the fast SMA crosses above the slow SMA, exit when
//! it crosses back below or when the close falls `stop_pct` percent under the
//! entry. A position still open on the last candle is closed at its close.
//!
//! Parameters: `fast`, `slow` (periods, rounded to whole candles) and an
//! optional `stop_pct`.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use crate::data::Candle;
use crate::enumerator::Assignment;
use crate::error::EvaluationError;
use crate::evaluator::{BacktestEvaluator, EvaluationContext};
use crate::types::Metrics;

/// Replays historical candles once per assignment
///
/// Candles are cached per data file and date window: preparing for a
/// different context reloads them.
#[derive(Debug, Default)]
pub struct ReplayEvaluator {
    series: RwLock<Option<Series>>,
}

#[derive(Debug)]
struct Series {
    // None for candles handed in directly
    source: Option<EvaluationContext>,
    candles: Arc<Vec<Candle>>,
}

impl Series {
    fn serves(&self, context: &EvaluationContext) -> bool {
        self.source.as_ref().map_or(true, |source| source == context)
    }
}

impl ReplayEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluator over candles already in memory, skipping the file load
    pub fn with_candles(candles: Vec<Candle>) -> Self {
        ReplayEvaluator {
            series: RwLock::new(Some(Series {
                source: None,
                candles: Arc::new(candles),
            })),
        }
    }

    fn loaded(&self, context: &EvaluationContext) -> Option<Arc<Vec<Candle>>> {
        self.series
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|series| series.serves(context))
            .map(|series| Arc::clone(&series.candles))
    }

    /// Closed-trade P&Ls for one parameter set
    pub fn trade_pnls(candles: &[Candle], fast: usize, slow: usize, stop_pct: f64) -> Vec<f64> {
        if fast == 0 || fast >= slow || candles.len() < slow {
            return Vec::new();
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let fast_ma = sma(&closes, fast);
        let slow_ma = sma(&closes, slow);

        let mut pnls = Vec::new();
        let mut entry: Option<f64> = None;

        for i in slow..closes.len() {
            let (Some(f_prev), Some(s_prev), Some(f), Some(s)) =
                (fast_ma[i - 1], slow_ma[i - 1], fast_ma[i], slow_ma[i])
            else {
                continue;
            };
            let close = closes[i];

            match entry {
                None => {
                    if f_prev <= s_prev && f > s {
                        entry = Some(close);
                    }
                }
                Some(entry_price) => {
                    let stopped = stop_pct > 0.0 && close <= entry_price * (1.0 - stop_pct / 100.0);
                    let crossed_down = f_prev >= s_prev && f < s;
                    if stopped || crossed_down {
                        pnls.push(close - entry_price);
                        entry = None;
                    }
                }
            }
        }

        if let (Some(entry_price), Some(last)) = (entry, closes.last()) {
            pnls.push(last - entry_price);
        }

        pnls
    }
}

impl BacktestEvaluator for ReplayEvaluator {
    fn prepare(&self, context: &EvaluationContext) -> Result<(), EvaluationError> {
        if self.loaded(context).is_some() {
            return Ok(());
        }

        let all = context
            .data
            .load()
            .map_err(|e| EvaluationError::Data(format!("{:#}", e)))?;
        let candles = context.window.apply(&all);
        if candles.is_empty() {
            return Err(EvaluationError::Data(format!(
                "no candles in {} within the selected date range",
                context.data.path().display()
            )));
        }

        info!(
            "Loaded {} of {} candles from {}",
            candles.len(),
            all.len(),
            context.data.path().display()
        );
        *self
            .series
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Series {
            source: Some(context.clone()),
            candles: Arc::new(candles),
        });
        Ok(())
    }

    fn evaluate(
        &self,
        assignment: &Assignment,
        context: &EvaluationContext,
    ) -> Result<Metrics, EvaluationError> {
        let candles = self.loaded(context).ok_or_else(|| {
            EvaluationError::Data(format!(
                "historical data not loaded for {}",
                context.data.path().display()
            ))
        })?;

        let fast = period(assignment, "fast")?;
        let slow = period(assignment, "slow")?;
        let stop_pct = assignment.get("stop_pct").unwrap_or(0.0);

        let pnls = Self::trade_pnls(&candles, fast, slow, stop_pct);
        debug!("[{}] {} trades", assignment, pnls.len());
        Ok(Metrics::from_trade_pnls(&pnls))
    }
}

fn period(assignment: &Assignment, name: &str) -> Result<usize, EvaluationError> {
    let value = assignment
        .get(name)
        .ok_or_else(|| EvaluationError::MissingParameter(name.to_string()))?;
    if !value.is_finite() || value < 1.0 {
        return Err(EvaluationError::Strategy(format!(
            "{} period must be at least 1, got {}",
            name, value
        )));
    }
    Ok(value.round() as usize)
}

/// Simple moving average, `None` until `period` values are available
fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(values.len());
    let mut sum = 0.0;

    for (i, &value) in values.iter().enumerate() {
        sum += value;
        if i >= period {
            sum -= values[i - period];
        }
        if i + 1 < period {
            result.push(None);
        } else {
            result.push(Some(sum / period as f64));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DateWindow, HistoricalData};
    use crate::params::{Parameter, ParameterSpace};
    use approx::assert_relative_eq;
    use std::io::Write;
    use chrono::{Duration, TimeZone, Utc};

    fn candles(closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                datetime: start + Duration::hours(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1.0,
            })
            .collect()
    }

    fn context() -> EvaluationContext {
        EvaluationContext {
            data: HistoricalData::new("unused.csv"),
            window: DateWindow::all(),
        }
    }

    fn assignment(fast: f64, slow: f64) -> Assignment {
        let space = ParameterSpace::new(vec![
            Parameter::new("fast", fast, fast, 1.0, fast),
            Parameter::new("slow", slow, slow, 1.0, slow),
        ]);
        Assignment::from_indices(&space, vec![0, 0])
    }

    #[test]
    fn test_sma() {
        let values = sma(&[1.0, 2.0, 3.0, 4.0], 2);
        assert_eq!(values, vec![None, Some(1.5), Some(2.5), Some(3.5)]);
    }

    #[test]
    fn test_one_round_trip() {
        // Down, up, down: one entry and one crossover exit
        let closes = [10.0, 9.0, 8.0, 7.0, 8.0, 10.0, 12.0, 14.0, 12.0, 9.0, 7.0, 6.0];
        let pnls = ReplayEvaluator::trade_pnls(&candles(&closes), 2, 4, 0.0);
        assert_eq!(pnls.len(), 1);
        assert_relative_eq!(pnls[0], 9.0 - 10.0);
    }

    #[test]
    fn test_stop_exits_early() {
        let closes = [10.0, 9.0, 8.0, 7.0, 8.0, 10.0, 12.0, 8.0, 13.0, 14.0, 15.0];

        let unstopped = ReplayEvaluator::trade_pnls(&candles(&closes), 2, 4, 0.0);
        assert_eq!(unstopped, vec![3.0, 1.0]);

        let stopped = ReplayEvaluator::trade_pnls(&candles(&closes), 2, 4, 10.0);
        assert_eq!(stopped, vec![-2.0, 1.0]);
    }

    #[test]
    fn test_fast_not_below_slow_trades_nothing() {
        let evaluator = ReplayEvaluator::with_candles(candles(&[1.0; 30]));
        let metrics = evaluator.evaluate(&assignment(5.0, 5.0), &context()).unwrap();
        assert_eq!(metrics.trades, 0);
    }

    #[test]
    fn test_missing_parameter() {
        let evaluator = ReplayEvaluator::with_candles(candles(&[1.0; 30]));
        let space = ParameterSpace::new(vec![Parameter::new("fast", 3.0, 3.0, 1.0, 3.0)]);
        let only_fast = Assignment::from_indices(&space, vec![0]);
        assert_eq!(
            evaluator.evaluate(&only_fast, &context()),
            Err(EvaluationError::MissingParameter("slow".to_string()))
        );
    }

    #[test]
    fn test_unprepared_evaluator_reports_data_error() {
        let evaluator = ReplayEvaluator::new();
        assert!(matches!(
            evaluator.evaluate(&assignment(2.0, 4.0), &context()),
            Err(EvaluationError::Data(_))
        ));
    }

    #[test]
    fn test_prepare_reloads_for_another_file() {
        let write = |name: &str, closes: &[f64]| {
            let path = std::env::temp_dir().join(format!(
                "replay_{}_{}.csv",
                name,
                std::process::id()
            ));
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "datetime,open,high,low,close,volume").unwrap();
            for (i, close) in closes.iter().enumerate() {
                writeln!(file, "2024-01-01 {:02}:00:00,{c},{c},{c},{c},1", i, c = close).unwrap();
            }
            EvaluationContext {
                data: HistoricalData::new(path),
                window: DateWindow::all(),
            }
        };
        let trending = write(
            "trending",
            &[10.0, 9.0, 8.0, 7.0, 8.0, 10.0, 12.0, 14.0, 12.0, 9.0, 7.0, 6.0],
        );
        let flat = write("flat", &[5.0; 12]);
        let evaluator = ReplayEvaluator::new();

        evaluator.prepare(&trending).unwrap();
        assert_eq!(evaluator.evaluate(&assignment(2.0, 4.0), &trending).unwrap().trades, 1);
        assert!(matches!(
            evaluator.evaluate(&assignment(2.0, 4.0), &flat),
            Err(EvaluationError::Data(_))
        ));

        evaluator.prepare(&flat).unwrap();
        assert_eq!(evaluator.evaluate(&assignment(2.0, 4.0), &flat).unwrap().trades, 0);
    }

    #[test]
    fn test_prepare_reports_unreadable_file() {
        let evaluator = ReplayEvaluator::new();
        let context = EvaluationContext {
            data: HistoricalData::new("/nonexistent/replay.csv"),
            window: DateWindow::all(),
        };
        assert!(matches!(
            evaluator.prepare(&context),
            Err(EvaluationError::Data(_))
        ));
    }
}
