//! Divide-and-conquer (successive grid refinement) search
//!
//! 1. Sample every parameter at `coarsen_factor` times its declared step,
//!    keeping at least two samples per parameter.
//! 2. Evaluate that grid and take the best qualifying assignment.
//! 3. Shrink each parameter's window to one old stride on either side of the
//!    best value and halve the stride, never going below the declared step.
//! 4. Repeat until a pass at the declared step has been evaluated, or the
//!    pass limit is reached.
//!
//! Assignments evaluated in an earlier pass are never evaluated again; the
//! result set is the union of every pass. This assumes a locally smooth
//! metric surface and may miss an optimum hidden between coarse samples.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::{PassExecutor, PassOutcome, RefinementSettings, SearchStrategy};
use crate::enumerator::CombinationEnumerator;
use crate::error::{OptimizerResult, ParameterError};
use crate::params::{ParamRange, ParameterSpace};
use crate::results::OptimizationResult;
use crate::runner::RunStatus;
use crate::types::SearchMethod;

#[derive(Debug, Clone, Copy, Default)]
pub struct DivideAndConquerSearch {
    settings: RefinementSettings,
}

impl DivideAndConquerSearch {
    pub fn new(settings: RefinementSettings) -> Self {
        DivideAndConquerSearch {
            settings: RefinementSettings {
                coarsen_factor: settings.coarsen_factor.max(1),
                max_iterations: settings.max_iterations.max(1),
            },
        }
    }

    pub fn settings(&self) -> RefinementSettings {
        self.settings
    }

    /// First-pass grid: stride `coarsen_factor`, at least two samples
    fn coarse_ranges(&self, space: &ParameterSpace) -> Vec<ParamRange> {
        space
            .params()
            .iter()
            .map(|param| {
                let count = param.value_count();
                let stride = if count >= 2 {
                    self.settings.coarsen_factor.min(count - 1)
                } else {
                    1
                };
                ParamRange::new(0, count - 1, stride)
            })
            .collect()
    }

    fn is_finest(ranges: &[ParamRange]) -> bool {
        ranges.iter().all(|r| r.stride == 1)
    }

    /// Window of `±old stride` around `center`, at half the stride
    ///
    /// `lo` is aligned so that `center` lies on the new grid.
    fn refine_range(range: &ParamRange, center: u64, last: u64) -> ParamRange {
        let old = range.stride;
        let new = (old / 2).max(1);
        let lo_bound = center.saturating_sub(old);
        let lo = center - ((center - lo_bound) / new) * new;
        let hi = (center + old).min(last);
        ParamRange::new(lo, hi, new)
    }

    fn refine(space: &ParameterSpace, ranges: &[ParamRange], center: &[u64]) -> Vec<ParamRange> {
        space
            .params()
            .iter()
            .zip(ranges)
            .zip(center)
            .map(|((param, range), &c)| Self::refine_range(range, c, param.value_count() - 1))
            .collect()
    }

    fn pass_label(pass: u32, ranges: &[ParamRange]) -> String {
        let max_stride = ranges.iter().map(|r| r.stride).max().unwrap_or(1);
        format!(
            "{}: pass {} (step x{})",
            SearchMethod::DivideAndConquer.name(),
            pass,
            max_stride
        )
    }
}

impl SearchStrategy for DivideAndConquerSearch {
    fn method(&self) -> SearchMethod {
        SearchMethod::DivideAndConquer
    }

    /// Sum of per-pass grid sizes, capped at the full cardinality
    fn planned_evaluations(&self, space: &ParameterSpace) -> Result<u128, ParameterError> {
        let full = space.cardinality()?;

        let counts: Vec<u64> = space.params().iter().map(|p| p.value_count()).collect();
        let mut strides: Vec<u64> = self
            .coarse_ranges(space)
            .iter()
            .map(|r| r.stride)
            .collect();

        let mut total = ParameterSpace::cardinality_of(
            self.coarse_ranges(space).iter().map(ParamRange::len),
        )?;
        let mut pass = 1;

        while strides.iter().any(|&s| s > 1) && pass < self.settings.max_iterations {
            let points = strides.iter_mut().zip(&counts).map(|(stride, &count)| {
                let old = *stride;
                let new = (old / 2).max(1);
                *stride = new;
                (2 * old / new + 1).min(count)
            });
            let pass_points = ParameterSpace::cardinality_of(points.collect::<Vec<_>>())?;
            total = total.saturating_add(pass_points);
            pass += 1;
        }

        Ok(total.min(full))
    }

    fn search(
        &self,
        space: &ParameterSpace,
        executor: &mut dyn PassExecutor,
    ) -> OptimizerResult<RunStatus> {
        let metric = executor.metric();
        let mut ranges = self.coarse_ranges(space);
        let mut seen: HashSet<Vec<u64>> = HashSet::new();
        let mut best: Option<OptimizationResult> = None;

        for pass in 1..=self.settings.max_iterations {
            if executor.is_cancelled() {
                info!("Divide & Conquer cancelled before pass {}", pass);
                return Ok(RunStatus::Cancelled);
            }

            let enumerator = CombinationEnumerator::with_ranges(space, ranges.clone())?;
            debug!(
                "Pass {}: {} grid points, ranges {:?}",
                pass,
                enumerator.cardinality(),
                ranges
            );

            let fresh = enumerator.filter(|a| seen.insert(a.indices().to_vec()));
            let label = Self::pass_label(pass, &ranges);

            match executor.run_pass(&label, Box::new(fresh))? {
                PassOutcome::Cancelled => return Ok(RunStatus::Cancelled),
                PassOutcome::Finished { best: pass_best } => {
                    if let Some(candidate) = pass_best {
                        let improves = best
                            .as_ref()
                            .map_or(true, |b| candidate.rank_cmp(b, metric).is_lt());
                        if improves {
                            best = Some(candidate);
                        }
                    }
                }
            }

            if Self::is_finest(&ranges) {
                info!("Divide & Conquer converged after {} passes", pass);
                return Ok(RunStatus::Completed);
            }

            let Some(center) = best.as_ref() else {
                warn!(
                    "No result met the minimum trades filter after pass {}; stopping refinement",
                    pass
                );
                return Ok(RunStatus::Completed);
            };

            debug!("Refining around [{}]", center.assignment);
            ranges = Self::refine(space, &ranges, center.assignment.indices());
        }

        info!(
            "Divide & Conquer stopped at the limit of {} passes",
            self.settings.max_iterations
        );
        Ok(RunStatus::Completed)
    }
}
