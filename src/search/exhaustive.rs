//! Exhaustive (brute force) search

use tracing::info;

use super::{PassExecutor, PassOutcome, SearchStrategy};
use crate::enumerator::CombinationEnumerator;
use crate::error::{OptimizerResult, ParameterError};
use crate::params::ParameterSpace;
use crate::runner::RunStatus;
use crate::types::SearchMethod;

/// Evaluates every assignment of the declared grid exactly once
///
/// Finds the maximum of the selected metric over the discretized space, at
/// the cost of `cardinality()` evaluations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExhaustiveSearch;

impl SearchStrategy for ExhaustiveSearch {
    fn method(&self) -> SearchMethod {
        SearchMethod::Exhaustive
    }

    fn planned_evaluations(&self, space: &ParameterSpace) -> Result<u128, ParameterError> {
        space.cardinality()
    }

    fn search(
        &self,
        space: &ParameterSpace,
        executor: &mut dyn PassExecutor,
    ) -> OptimizerResult<RunStatus> {
        if executor.is_cancelled() {
            return Ok(RunStatus::Cancelled);
        }

        let enumerator = CombinationEnumerator::new(space)?;
        info!(
            "Brute force: evaluating {} combinations",
            enumerator.cardinality()
        );

        match executor.run_pass(SearchMethod::Exhaustive.name(), Box::new(enumerator))? {
            PassOutcome::Finished { .. } => Ok(RunStatus::Completed),
            PassOutcome::Cancelled => Ok(RunStatus::Cancelled),
        }
    }
}
