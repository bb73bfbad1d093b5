//! Search strategies
//!
//! A strategy decides *which* assignments get evaluated. It hands them to a
//! [`PassExecutor`] one pass at a time: a pass is a lazy sequence of
//! assignments that the executor evaluates (in parallel, in any order) before
//! returning the best qualifying result of that pass. Strategies that adapt
//! between passes, like [`DivideAndConquerSearch`], use that result to plan
//! the next pass.

pub mod divide_conquer;
pub mod exhaustive;

pub use divide_conquer::DivideAndConquerSearch;
pub use exhaustive::ExhaustiveSearch;

use crate::enumerator::Assignment;
use crate::error::{OptimizerResult, ParameterError};
use crate::params::ParameterSpace;
use crate::results::OptimizationResult;
use crate::runner::RunStatus;
use crate::types::{PerformanceMetric, SearchMethod};

/// Lazy batch of assignments handed to an executor
pub type AssignmentStream<'a> = Box<dyn Iterator<Item = Assignment> + Send + 'a>;

/// How a pass ended
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// Every assignment of the pass was evaluated
    Finished {
        /// Best result of the pass that met the minimum-trades filter
        best: Option<OptimizationResult>,
    },
    /// Cancellation was requested while the pass was running
    Cancelled,
}

/// Evaluates passes on behalf of a strategy
pub trait PassExecutor {
    /// Metric results are ranked by
    fn metric(&self) -> PerformanceMetric;

    /// Whether cancellation has been requested
    fn is_cancelled(&self) -> bool;

    /// Evaluate every assignment in `assignments`
    fn run_pass(
        &mut self,
        label: &str,
        assignments: AssignmentStream<'_>,
    ) -> OptimizerResult<PassOutcome>;
}

/// A way of exploring a parameter space
pub trait SearchStrategy: Send + Sync {
    fn method(&self) -> SearchMethod;

    /// Upper bound on evaluations, used as the progress denominator
    fn planned_evaluations(&self, space: &ParameterSpace) -> Result<u128, ParameterError>;

    /// Drive the search to completion or cancellation
    fn search(
        &self,
        space: &ParameterSpace,
        executor: &mut dyn PassExecutor,
    ) -> OptimizerResult<RunStatus>;
}

/// Tuning knobs for divide-and-conquer search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefinementSettings {
    /// Multiple of the declared step used by the first, coarse pass
    pub coarsen_factor: u64,
    /// Upper bound on passes, guarding against non-convergence
    pub max_iterations: u32,
}

impl Default for RefinementSettings {
    fn default() -> Self {
        RefinementSettings {
            coarsen_factor: 4,
            max_iterations: 16,
        }
    }
}

/// Instantiate the strategy for `method`
pub fn build_strategy(
    method: SearchMethod,
    refinement: RefinementSettings,
) -> Box<dyn SearchStrategy> {
    match method {
        SearchMethod::Exhaustive => Box::new(ExhaustiveSearch),
        SearchMethod::DivideAndConquer => Box::new(DivideAndConquerSearch::new(refinement)),
    }
}
