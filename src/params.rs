//! Parameter space model
//!
//! A [`ParameterSpace`] is an ordered list of stepped numeric [`Parameter`]s.
//! Declaration order is significant: it fixes the enumeration order and the
//! column order of every report.
//!
//! # Step truncation
//!
//! When `max - min` is not an exact multiple of `step`, the range is
//! truncated: the last value is `min + floor((max - min) / step) * step`,
//! which may be below `max`. Values are always computed from their grid
//! index (`min + k * step`) so rounding error never accumulates.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ParameterError;

/// Relative tolerance applied before flooring `(max - min) / step`, so that
/// ranges like `0.0..=0.3 step 0.1` keep their last value.
const STEP_TOLERANCE: f64 = 1e-9;

// =============================================================================
// Parameter
// =============================================================================

/// One tunable strategy input with a bounded, stepped range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub default: f64,
}

impl Parameter {
    pub fn new(name: impl Into<String>, min: f64, max: f64, step: f64, default: f64) -> Self {
        Parameter {
            name: name.into(),
            min,
            max,
            step,
            default,
        }
    }

    /// Check bounds, step and default
    pub fn validate(&self) -> Result<(), ParameterError> {
        if self.name.trim().is_empty() {
            return Err(ParameterError::EmptyName);
        }
        if ![self.min, self.max, self.step, self.default]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(ParameterError::NonFinite {
                name: self.name.clone(),
            });
        }
        if self.step <= 0.0 {
            return Err(ParameterError::NonPositiveStep {
                name: self.name.clone(),
                step: self.step,
            });
        }
        if self.min > self.max {
            return Err(ParameterError::InvertedBounds {
                name: self.name.clone(),
                min: self.min,
                max: self.max,
            });
        }
        if self.default < self.min || self.default > self.max {
            return Err(ParameterError::DefaultOutOfRange {
                name: self.name.clone(),
                default: self.default,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    /// Number of values on the declared grid: `floor((max - min) / step) + 1`
    ///
    /// Only meaningful for a validated parameter.
    pub fn value_count(&self) -> u64 {
        let span = (self.max - self.min) / self.step;
        if !span.is_finite() || span < 0.0 {
            return 1;
        }
        let span = (span + span.max(1.0) * STEP_TOLERANCE).floor();
        // saturating float-to-int cast; absurd spans surface as overflow later
        (span as u64).saturating_add(1)
    }

    /// Value at grid index `index` (`min + index * step`)
    pub fn value_at(&self, index: u64) -> f64 {
        self.min + index as f64 * self.step
    }

    /// Last reachable value after truncation
    pub fn last_value(&self) -> f64 {
        self.value_at(self.value_count() - 1)
    }

    /// Grid index of the value closest to `value`, clamped to the range
    pub fn nearest_index(&self, value: f64) -> u64 {
        let raw = ((value - self.min) / self.step).round();
        if raw <= 0.0 {
            0
        } else {
            (raw as u64).min(self.value_count() - 1)
        }
    }

    /// The full declared range at the declared step
    pub fn full_range(&self) -> ParamRange {
        ParamRange::new(0, self.value_count() - 1, 1)
    }
}

// =============================================================================
// ParamRange
// =============================================================================

/// A sub-range of one parameter's declared grid, in grid-index units
///
/// `stride` is a multiple of the declared step: stride 1 visits every
/// declared value, stride 4 every fourth one. The range covers
/// `lo, lo + stride, ...` up to and including the last index `<= hi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamRange {
    pub lo: u64,
    pub hi: u64,
    pub stride: u64,
}

impl ParamRange {
    pub fn new(lo: u64, hi: u64, stride: u64) -> Self {
        let stride = stride.max(1);
        ParamRange {
            lo,
            hi: hi.max(lo),
            stride,
        }
    }

    /// Number of grid points in the range
    pub fn len(&self) -> u64 {
        (self.hi - self.lo) / self.stride + 1
    }

    /// Grid index of the `position`-th point in the range
    pub fn index_at(&self, position: u64) -> u64 {
        self.lo + position * self.stride
    }

    /// Whether `index` lies on this range's grid
    pub fn contains(&self, index: u64) -> bool {
        index >= self.lo && index <= self.hi && (index - self.lo) % self.stride == 0
    }
}

// =============================================================================
// ParameterSpace
// =============================================================================

/// Ordered set of parameters to optimize
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpace {
    params: Vec<Parameter>,
    names: Arc<[String]>,
}

impl ParameterSpace {
    pub fn new(params: Vec<Parameter>) -> Self {
        let names: Arc<[String]> = params.iter().map(|p| p.name.clone()).collect();
        ParameterSpace { params, names }
    }

    /// Builder-style append
    pub fn with(mut self, param: Parameter) -> Self {
        self.params.push(param);
        self.names = self.params.iter().map(|p| p.name.clone()).collect();
        self
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Shared parameter names in declaration order
    pub fn names(&self) -> &Arc<[String]> {
        &self.names
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    /// Validate every parameter and the space as a whole
    pub fn validate(&self) -> Result<(), ParameterError> {
        if self.params.is_empty() {
            return Err(ParameterError::EmptySpace);
        }

        let mut seen = HashSet::with_capacity(self.params.len());
        for param in &self.params {
            param.validate()?;
            if !seen.insert(param.name.as_str()) {
                return Err(ParameterError::DuplicateName(param.name.clone()));
            }
        }

        self.cardinality().map(|_| ())
    }

    /// Exact number of distinct assignments in the space
    pub fn cardinality(&self) -> Result<u128, ParameterError> {
        Self::cardinality_of(self.params.iter().map(|p| p.value_count()))
    }

    /// Product of per-parameter point counts, failing instead of wrapping
    pub(crate) fn cardinality_of(
        counts: impl IntoIterator<Item = u64>,
    ) -> Result<u128, ParameterError> {
        counts.into_iter().try_fold(1u128, |acc, count| {
            acc.checked_mul(u128::from(count))
                .ok_or(ParameterError::CardinalityOverflow)
        })
    }

    /// Full declared grid for every parameter
    pub fn full_ranges(&self) -> Vec<ParamRange> {
        self.params.iter().map(Parameter::full_range).collect()
    }

    /// Grid indices of every parameter's default value
    pub fn default_indices(&self) -> Vec<u64> {
        self.params
            .iter()
            .map(|p| p.nearest_index(p.default))
            .collect()
    }
}

impl From<Vec<Parameter>> for ParameterSpace {
    fn from(params: Vec<Parameter>) -> Self {
        ParameterSpace::new(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_param_space() -> ParameterSpace {
        ParameterSpace::new(vec![
            Parameter::new("period", 5.0, 25.0, 1.0, 10.0),
            Parameter::new("entry", 0.0, 10.0, 2.0, 4.0),
        ])
    }

    #[test]
    fn test_cardinality_is_product_of_value_counts() {
        let space = two_param_space();
        assert_eq!(space.params()[0].value_count(), 21);
        assert_eq!(space.params()[1].value_count(), 6);
        assert_eq!(space.cardinality().unwrap(), 126);
    }

    #[test]
    fn test_uneven_range_is_truncated() {
        let param = Parameter::new("scale", 0.0, 10.0, 3.0, 0.0);
        assert_eq!(param.value_count(), 4);
        assert_eq!(param.last_value(), 9.0);
    }

    #[test]
    fn test_fractional_step_keeps_last_value() {
        let param = Parameter::new("stop", 0.0, 0.3, 0.1, 0.1);
        assert_eq!(param.value_count(), 4);
        assert!((param.last_value() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_single_value_parameter() {
        let param = Parameter::new("fixed", 7.0, 7.0, 1.0, 7.0);
        assert_eq!(param.value_count(), 1);
        assert!(param.validate().is_ok());
    }

    #[test]
    fn test_large_space_does_not_overflow() {
        let params = (0..6)
            .map(|i| Parameter::new(format!("p{i}"), 0.0, 999.0, 1.0, 0.0))
            .collect();
        let space = ParameterSpace::new(params);
        assert_eq!(space.cardinality().unwrap(), 1_000_000_000_000_000_000u128);
    }

    #[test]
    fn test_cardinality_overflow_is_reported() {
        let params = (0..20)
            .map(|i| Parameter::new(format!("p{i}"), 0.0, 1e6, 1.0, 0.0))
            .collect();
        let space = ParameterSpace::new(params);
        assert_eq!(
            space.cardinality(),
            Err(ParameterError::CardinalityOverflow)
        );
    }

    #[test]
    fn test_validate_rejects_non_positive_step() {
        let space = ParameterSpace::new(vec![Parameter::new("p", 0.0, 10.0, 0.0, 5.0)]);
        let err = space.validate().unwrap_err();
        assert!(matches!(err, ParameterError::NonPositiveStep { .. }));
        assert_eq!(err.parameter(), Some("p"));
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let space = ParameterSpace::new(vec![Parameter::new("p", 10.0, 0.0, 1.0, 5.0)]);
        assert!(matches!(
            space.validate(),
            Err(ParameterError::InvertedBounds { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_default_outside_range() {
        let space = ParameterSpace::new(vec![Parameter::new("p", 0.0, 10.0, 1.0, 11.0)]);
        assert!(matches!(
            space.validate(),
            Err(ParameterError::DefaultOutOfRange { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_duplicates_and_empty() {
        assert_eq!(
            ParameterSpace::new(vec![]).validate(),
            Err(ParameterError::EmptySpace)
        );

        let dup = ParameterSpace::new(vec![
            Parameter::new("p", 0.0, 1.0, 1.0, 0.0),
            Parameter::new("p", 0.0, 1.0, 1.0, 0.0),
        ]);
        assert_eq!(
            dup.validate(),
            Err(ParameterError::DuplicateName("p".to_string()))
        );
    }

    #[test]
    fn test_param_range_points() {
        let range = ParamRange::new(2, 11, 4);
        assert_eq!(range.len(), 3);
        assert_eq!(range.index_at(2), 10);
        assert!(range.contains(6));
        assert!(!range.contains(7));
        assert!(!range.contains(14));
    }

    #[test]
    fn test_builder_keeps_names_in_order() {
        let space = ParameterSpace::new(vec![])
            .with(Parameter::new("b", 0.0, 1.0, 1.0, 0.0))
            .with(Parameter::new("a", 0.0, 1.0, 1.0, 0.0));
        assert_eq!(&space.names()[..], &["b".to_string(), "a".to_string()]);
        assert_eq!(space.position("a"), Some(1));
    }
}
