//! Optimization results: collection, ranking, filtering and export
//!
//! A [`ResultSet`] only ever grows while a run is in progress. Ranking and
//! filtering never touch the stored results; they return reordered views.
//!
//! Ranking is descending on the selected metric. Ties are broken by
//! enumeration order of the assignment (earlier-declared parameters first,
//! lower values first), so a ranking never depends on which worker
//! finished first.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use ordered_float::OrderedFloat;
use serde::Serialize;

use crate::enumerator::Assignment;
use crate::types::{Metrics, PerformanceMetric};

/// Outcome of evaluating one assignment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationResult {
    pub assignment: Assignment,
    pub metrics: Metrics,
}

impl OptimizationResult {
    pub fn new(assignment: Assignment, metrics: Metrics) -> Self {
        OptimizationResult {
            assignment,
            metrics,
        }
    }

    /// Ranking order under `metric`: `Less` means `self` ranks first
    pub fn rank_cmp(&self, other: &Self, metric: PerformanceMetric) -> Ordering {
        metric
            .compare_desc(&self.metrics, &other.metrics)
            .then_with(|| self.assignment.cmp(&other.assignment))
    }
}

// =============================================================================
// ResultSet
// =============================================================================

/// Ordered collection of optimization results
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResultSet {
    results: Vec<OptimizationResult>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: OptimizationResult) {
        self.results.push(result);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, OptimizationResult> {
        self.results.iter()
    }

    pub fn as_slice(&self) -> &[OptimizationResult] {
        &self.results
    }

    pub fn into_vec(self) -> Vec<OptimizationResult> {
        self.results
    }

    /// Reorder the stored results by rank under `metric`
    pub fn sort_by_metric(&mut self, metric: PerformanceMetric) {
        self.results.sort_by(|a, b| a.rank_cmp(b, metric));
    }

    /// View of all results in rank order under `metric`
    pub fn ranked_by(&self, metric: PerformanceMetric) -> Vec<&OptimizationResult> {
        let mut view: Vec<&OptimizationResult> = self.results.iter().collect();
        view.sort_by(|a, b| a.rank_cmp(b, metric));
        view
    }

    /// Results with at least `min_trades` trades, in stored order
    pub fn with_min_trades(&self, min_trades: u32) -> Vec<&OptimizationResult> {
        self.results
            .iter()
            .filter(|r| r.metrics.trades >= min_trades)
            .collect()
    }

    /// The `n` best results with at least `min_trades` trades
    pub fn top(
        &self,
        metric: PerformanceMetric,
        min_trades: u32,
        n: usize,
    ) -> Vec<&OptimizationResult> {
        let mut view = self.with_min_trades(min_trades);
        view.sort_by(|a, b| a.rank_cmp(b, metric));
        view.truncate(n);
        view
    }

    /// Highest-ranked result under `metric`
    pub fn best(&self, metric: PerformanceMetric) -> Option<&OptimizationResult> {
        self.results.iter().min_by(|a, b| a.rank_cmp(b, metric))
    }

    /// Project onto two parameter axes for the optimization map
    ///
    /// Each cell holds the best `metric` value among results sharing that
    /// `(x, y)` pair, across every other parameter. Returns `None` if either
    /// axis is not a parameter of these results.
    pub fn surface(
        &self,
        x_param: &str,
        y_param: &str,
        metric: PerformanceMetric,
    ) -> Option<OptimizationSurface> {
        let first = self.results.first()?;
        let x_idx = first.assignment.names().iter().position(|n| n == x_param)?;
        let y_idx = first.assignment.names().iter().position(|n| n == y_param)?;

        let mut cells: BTreeMap<(OrderedFloat<f64>, OrderedFloat<f64>), OrderedFloat<f64>> =
            BTreeMap::new();
        for result in &self.results {
            let values = result.assignment.values();
            let key = (OrderedFloat(values[x_idx]), OrderedFloat(values[y_idx]));
            let value = metric.key(&result.metrics);
            cells
                .entry(key)
                .and_modify(|best| *best = (*best).max(value))
                .or_insert(value);
        }

        let mut x_values: Vec<OrderedFloat<f64>> = cells.keys().map(|(x, _)| *x).collect();
        x_values.dedup();
        let mut y_values: Vec<OrderedFloat<f64>> = cells.keys().map(|(_, y)| *y).collect();
        y_values.sort();
        y_values.dedup();

        let grid = y_values
            .iter()
            .map(|y| {
                x_values
                    .iter()
                    .map(|x| cells.get(&(*x, *y)).map(|v| v.into_inner()))
                    .collect()
            })
            .collect();

        Some(OptimizationSurface {
            x_param: x_param.to_string(),
            y_param: y_param.to_string(),
            metric,
            x_values: x_values.into_iter().map(OrderedFloat::into_inner).collect(),
            y_values: y_values.into_iter().map(OrderedFloat::into_inner).collect(),
            cells: grid,
        })
    }

    /// Write one row per result: parameter columns, then metric columns
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        let Some(first) = self.results.first() else {
            writer.flush()?;
            return Ok(());
        };

        let mut header: Vec<String> = first.assignment.names().to_vec();
        header.extend(
            ["net_profit", "profit_factor", "kelly", "profit_index", "trades"]
                .iter()
                .map(|s| s.to_string()),
        );
        writer.write_record(&header)?;

        for result in &self.results {
            let m = &result.metrics;
            let mut row: Vec<String> = result
                .assignment
                .values()
                .iter()
                .map(|v| v.to_string())
                .collect();
            row.push(m.net_profit.to_string());
            row.push(m.profit_factor.to_string());
            row.push(m.kelly.to_string());
            row.push(m.profit_index.to_string());
            row.push(m.trades.to_string());
            writer.write_record(&row)?;
        }

        writer.flush()?;
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a OptimizationResult;
    type IntoIter = std::slice::Iter<'a, OptimizationResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}

impl FromIterator<OptimizationResult> for ResultSet {
    fn from_iter<I: IntoIterator<Item = OptimizationResult>>(iter: I) -> Self {
        ResultSet {
            results: iter.into_iter().collect(),
        }
    }
}

// =============================================================================
// Optimization surface
// =============================================================================

/// Two-axis projection of a result set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationSurface {
    pub x_param: String,
    pub y_param: String,
    pub metric: PerformanceMetric,
    pub x_values: Vec<f64>,
    pub y_values: Vec<f64>,
    /// `cells[row][col]` for `y_values[row]`, `x_values[col]`; `None` if never evaluated
    pub cells: Vec<Vec<Option<f64>>>,
}

impl OptimizationSurface {
    pub fn value(&self, x: f64, y: f64) -> Option<f64> {
        let col = self.x_values.iter().position(|v| *v == x)?;
        let row = self.y_values.iter().position(|v| *v == y)?;
        self.cells[row][col]
    }

    /// Write the grid with y values as the first column and x values as the header
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        let mut header = vec![format!("{}\\{}", self.y_param, self.x_param)];
        header.extend(self.x_values.iter().map(|x| x.to_string()));
        writer.write_record(&header)?;

        for (y, row) in self.y_values.iter().zip(&self.cells) {
            let mut record = vec![y.to_string()];
            record.extend(row.iter().map(|c| c.map(|v| v.to_string()).unwrap_or_default()));
            writer.write_record(&record)?;
        }

        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{Parameter, ParameterSpace};

    fn space() -> ParameterSpace {
        ParameterSpace::new(vec![
            Parameter::new("x", 0.0, 2.0, 1.0, 0.0),
            Parameter::new("y", 0.0, 1.0, 1.0, 0.0),
        ])
    }

    fn result(indices: [u64; 2], net_profit: f64, trades: u32) -> OptimizationResult {
        OptimizationResult::new(
            Assignment::from_indices(&space(), indices.to_vec()),
            Metrics {
                net_profit,
                profit_factor: net_profit / 10.0,
                trades,
                ..Metrics::default()
            },
        )
    }

    fn sample() -> ResultSet {
        vec![
            result([0, 0], 10.0, 5),
            result([2, 1], 30.0, 1),
            result([1, 0], 20.0, 8),
            result([0, 1], 30.0, 3),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_ranking_is_descending_with_enumeration_tie_break() {
        let set = sample();
        let ranked: Vec<&[u64]> = set
            .ranked_by(PerformanceMetric::NetProfit)
            .iter()
            .map(|r| r.assignment.indices())
            .collect();
        // both 30.0 results tie; [0, 1] precedes [2, 1] in enumeration order
        assert_eq!(ranked, vec![&[0, 1][..], &[2, 1][..], &[1, 0][..], &[0, 0][..]]);
    }

    #[test]
    fn test_ranked_view_leaves_storage_untouched() {
        let set = sample();
        let before = set.clone();
        let _ = set.ranked_by(PerformanceMetric::NetProfit);
        assert_eq!(set, before);
    }

    #[test]
    fn test_min_trades_filter() {
        let set = sample();
        let kept = set.with_min_trades(3);
        assert_eq!(kept.len(), 3);
        assert!(kept.iter().all(|r| r.metrics.trades >= 3));
        // removed exactly the one below threshold, others unchanged
        assert!(kept.iter().all(|r| set.iter().any(|s| s == *r)));
    }

    #[test]
    fn test_top_and_best() {
        let set = sample();
        let top = set.top(PerformanceMetric::NetProfit, 3, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].assignment.indices(), &[0, 1]);
        assert_eq!(top[1].assignment.indices(), &[1, 0]);

        let best = set.best(PerformanceMetric::NetProfit).unwrap();
        assert_eq!(best.assignment.indices(), &[0, 1]);
    }

    #[test]
    fn test_sort_by_metric_in_place() {
        let mut set = sample();
        set.sort_by_metric(PerformanceMetric::NetProfit);
        let profits: Vec<f64> = set.iter().map(|r| r.metrics.net_profit).collect();
        assert_eq!(profits, vec![30.0, 30.0, 20.0, 10.0]);
    }

    #[test]
    fn test_surface_projection() {
        let set = sample();
        let surface = set.surface("x", "y", PerformanceMetric::NetProfit).unwrap();
        assert_eq!(surface.x_values, vec![0.0, 1.0, 2.0]);
        assert_eq!(surface.y_values, vec![0.0, 1.0]);
        assert_eq!(surface.value(0.0, 0.0), Some(10.0));
        assert_eq!(surface.value(2.0, 1.0), Some(30.0));
        assert_eq!(surface.value(1.0, 1.0), None);
        assert!(set.surface("x", "nope", PerformanceMetric::NetProfit).is_none());
    }

    #[test]
    fn test_write_csv() {
        let path = std::env::temp_dir().join(format!(
            "strategy_optimizer_results_{}.csv",
            std::process::id()
        ));
        sample().write_csv(&path).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "x");
        assert_eq!(&headers[6], "trades");
        assert_eq!(reader.records().count(), 4);
        std::fs::remove_file(path).ok();
    }
}
