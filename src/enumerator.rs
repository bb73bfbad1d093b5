//! Combination enumeration
//!
//! [`CombinationEnumerator`] walks a parameter space (or a sub-grid of it)
//! like an odometer: the last-declared parameter varies fastest, each
//! parameter's point count acting as its radix. The order is fixed, so two
//! runs over the same space visit combinations in the same order.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use itertools::Itertools;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::ParameterError;
use crate::params::{ParamRange, ParameterSpace};

// =============================================================================
// Assignment
// =============================================================================

/// One concrete value per parameter: a single point of the search space
///
/// Identity (equality, hashing, ordering) is the vector of declared-grid
/// indices, so ordering matches full-space enumeration order.
#[derive(Debug, Clone)]
pub struct Assignment {
    names: Arc<[String]>,
    indices: Vec<u64>,
    values: Vec<f64>,
}

impl Assignment {
    /// Build the assignment at the given declared-grid indices
    pub fn from_indices(space: &ParameterSpace, indices: Vec<u64>) -> Self {
        let values = space
            .params()
            .iter()
            .zip(&indices)
            .map(|(param, &idx)| param.value_at(idx))
            .collect();
        Assignment {
            names: Arc::clone(space.names()),
            indices,
            values,
        }
    }

    /// Value of the named parameter
    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i])
    }

    /// `(name, value)` pairs in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Declared-grid index of each value
    pub fn indices(&self) -> &[u64] {
        &self.indices
    }
}

impl PartialEq for Assignment {
    fn eq(&self, other: &Self) -> bool {
        self.indices == other.indices
    }
}

impl Eq for Assignment {}

impl Hash for Assignment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.indices.hash(state);
    }
}

impl PartialOrd for Assignment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Assignment {
    fn cmp(&self, other: &Self) -> Ordering {
        self.indices.cmp(&other.indices)
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .join(", ");
        f.write_str(&joined)
    }
}

impl Serialize for Assignment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}

// =============================================================================
// CombinationEnumerator
// =============================================================================

/// Lazy, restartable, mixed-radix walk over a (sub-)grid of a space
#[derive(Debug, Clone)]
pub struct CombinationEnumerator {
    space: ParameterSpace,
    ranges: Vec<ParamRange>,
    positions: Vec<u64>,
    emitted: u128,
    total: u128,
}

impl CombinationEnumerator {
    /// Enumerate every point of the declared grid
    pub fn new(space: &ParameterSpace) -> Result<Self, ParameterError> {
        Self::with_ranges(space, space.full_ranges())
    }

    /// Enumerate a sub-grid: one [`ParamRange`] per parameter, in declaration order
    ///
    /// Ranges reaching past a parameter's last grid index are clipped.
    pub fn with_ranges(
        space: &ParameterSpace,
        ranges: Vec<ParamRange>,
    ) -> Result<Self, ParameterError> {
        debug_assert_eq!(ranges.len(), space.len(), "one range per parameter");

        let ranges: Vec<ParamRange> = space
            .params()
            .iter()
            .zip(ranges)
            .map(|(param, range)| {
                let last = param.value_count() - 1;
                let lo = range.lo.min(last);
                ParamRange::new(lo, range.hi.min(last), range.stride)
            })
            .collect();

        let total = ParameterSpace::cardinality_of(ranges.iter().map(ParamRange::len))?;

        Ok(CombinationEnumerator {
            space: space.clone(),
            positions: vec![0; ranges.len()],
            ranges,
            emitted: 0,
            total,
        })
    }

    /// Number of assignments this enumerator yields in total
    pub fn cardinality(&self) -> u128 {
        self.total
    }

    /// Number of assignments not yet yielded
    pub fn remaining(&self) -> u128 {
        self.total - self.emitted
    }

    pub fn ranges(&self) -> &[ParamRange] {
        &self.ranges
    }

    /// Rewind to the first assignment
    pub fn reset(&mut self) {
        self.positions.iter_mut().for_each(|p| *p = 0);
        self.emitted = 0;
    }

    /// Decode the `ordinal`-th assignment of the sequence without iterating
    pub fn assignment_at(&self, ordinal: u128) -> Option<Assignment> {
        if ordinal >= self.total {
            return None;
        }

        let mut rest = ordinal;
        let mut positions = vec![0u64; self.ranges.len()];
        for (slot, range) in positions.iter_mut().zip(&self.ranges).rev() {
            let radix = u128::from(range.len());
            // remainder is < radix, which came from a u64
            *slot = (rest % radix) as u64;
            rest /= radix;
        }

        Some(self.assignment_for(&positions))
    }

    fn assignment_for(&self, positions: &[u64]) -> Assignment {
        let indices = self
            .ranges
            .iter()
            .zip(positions)
            .map(|(range, &pos)| range.index_at(pos))
            .collect();
        Assignment::from_indices(&self.space, indices)
    }

    /// Advance the odometer; the last parameter is the fastest digit
    fn advance(&mut self) {
        for (pos, range) in self.positions.iter_mut().zip(&self.ranges).rev() {
            *pos += 1;
            if *pos < range.len() {
                return;
            }
            *pos = 0;
        }
    }
}

impl Iterator for CombinationEnumerator {
    type Item = Assignment;

    fn next(&mut self) -> Option<Assignment> {
        if self.emitted >= self.total {
            return None;
        }
        let assignment = self.assignment_for(&self.positions);
        self.advance();
        self.emitted += 1;
        Some(assignment)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        match usize::try_from(remaining) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Parameter;
    use std::collections::HashSet;

    fn space() -> ParameterSpace {
        ParameterSpace::new(vec![
            Parameter::new("a", 1.0, 2.0, 1.0, 1.0),
            Parameter::new("b", 0.0, 20.0, 10.0, 0.0),
        ])
    }

    #[test]
    fn test_last_parameter_varies_fastest() {
        let values: Vec<Vec<f64>> = CombinationEnumerator::new(&space())
            .unwrap()
            .map(|a| a.values().to_vec())
            .collect();

        assert_eq!(
            values,
            vec![
                vec![1.0, 0.0],
                vec![1.0, 10.0],
                vec![1.0, 20.0],
                vec![2.0, 0.0],
                vec![2.0, 10.0],
                vec![2.0, 20.0],
            ]
        );
    }

    #[test]
    fn test_length_matches_cardinality_without_duplicates() {
        let space = ParameterSpace::new(vec![
            Parameter::new("x", 5.0, 25.0, 1.0, 5.0),
            Parameter::new("y", 0.0, 10.0, 2.0, 0.0),
        ]);
        let enumerator = CombinationEnumerator::new(&space).unwrap();
        assert_eq!(enumerator.cardinality(), 126);
        assert_eq!(enumerator.size_hint(), (126, Some(126)));

        let all: Vec<Assignment> = enumerator.collect();
        let unique: HashSet<&Assignment> = all.iter().collect();
        assert_eq!(all.len(), 126);
        assert_eq!(unique.len(), 126);
    }

    #[test]
    fn test_sequence_is_sorted_in_index_order() {
        let all: Vec<Assignment> = CombinationEnumerator::new(&space()).unwrap().collect();
        assert!(all.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_reset_restarts_identically() {
        let mut enumerator = CombinationEnumerator::new(&space()).unwrap();
        let first: Vec<Assignment> = enumerator.by_ref().collect();
        assert_eq!(enumerator.next(), None);

        enumerator.reset();
        let second: Vec<Assignment> = enumerator.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_sub_range_enumeration() {
        let space = ParameterSpace::new(vec![
            Parameter::new("p", 0.0, 10.0, 1.0, 0.0),
            Parameter::new("q", 0.0, 3.0, 1.0, 0.0),
        ]);
        let enumerator = CombinationEnumerator::with_ranges(
            &space,
            vec![ParamRange::new(2, 8, 3), ParamRange::new(1, 1, 1)],
        )
        .unwrap();
        assert_eq!(enumerator.cardinality(), 3);

        let p_values: Vec<f64> = enumerator.map(|a| a.get("p").unwrap()).collect();
        assert_eq!(p_values, vec![2.0, 5.0, 8.0]);
    }

    #[test]
    fn test_ranges_are_clipped_to_declared_grid() {
        let space = ParameterSpace::new(vec![Parameter::new("p", 0.0, 4.0, 1.0, 0.0)]);
        let enumerator =
            CombinationEnumerator::with_ranges(&space, vec![ParamRange::new(3, 99, 1)]).unwrap();
        assert_eq!(enumerator.cardinality(), 2);
    }

    #[test]
    fn test_assignment_at_matches_iteration() {
        let enumerator = CombinationEnumerator::new(&space()).unwrap();
        let iterated: Vec<Assignment> = enumerator.clone().collect();
        for (ordinal, expected) in iterated.iter().enumerate() {
            assert_eq!(enumerator.assignment_at(ordinal as u128).as_ref(), Some(expected));
        }
        assert_eq!(enumerator.assignment_at(6), None);
    }

    #[test]
    fn test_assignment_lookup_and_display() {
        let assignment = Assignment::from_indices(&space(), vec![1, 2]);
        assert_eq!(assignment.get("a"), Some(2.0));
        assert_eq!(assignment.get("b"), Some(20.0));
        assert_eq!(assignment.get("c"), None);
        assert_eq!(assignment.to_string(), "a=2, b=20");
    }

    #[test]
    fn test_assignment_serializes_as_map() {
        let assignment = Assignment::from_indices(&space(), vec![0, 1]);
        let json = serde_json::to_value(&assignment).unwrap();
        assert_eq!(json, serde_json::json!({"a": 1.0, "b": 10.0}));
    }
}
