//! Backtest evaluator interface
//!
//! The optimizer treats the backtest as an opaque function from one
//! [`Assignment`] plus a historical data window to [`Metrics`]. An evaluator
//! must be deterministic for the duration of a run: the same inputs produce
//! the same outputs, otherwise rankings are not reproducible.

use crate::data::{DateWindow, HistoricalData};
use crate::enumerator::Assignment;
use crate::error::EvaluationError;
use crate::types::Metrics;

/// Inputs shared by every evaluation of a run
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationContext {
    pub data: HistoricalData,
    pub window: DateWindow,
}

/// Evaluates one parameter assignment against historical data
pub trait BacktestEvaluator: Send + Sync {
    /// Called once per run, after validation and before the first evaluation
    ///
    /// An error here fails the run just like an evaluation error.
    fn prepare(&self, _context: &EvaluationContext) -> Result<(), EvaluationError> {
        Ok(())
    }

    fn evaluate(
        &self,
        assignment: &Assignment,
        context: &EvaluationContext,
    ) -> Result<Metrics, EvaluationError>;
}

impl<F> BacktestEvaluator for F
where
    F: Fn(&Assignment) -> Result<Metrics, EvaluationError> + Send + Sync,
{
    fn evaluate(
        &self,
        assignment: &Assignment,
        _context: &EvaluationContext,
    ) -> Result<Metrics, EvaluationError> {
        self(assignment)
    }
}
