//! Core data types: performance metrics and run selectors

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

// =============================================================================
// Metrics
// =============================================================================

/// Performance numbers produced by one backtest evaluation
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub net_profit: f64,
    pub profit_factor: f64,
    /// Kelly criterion, in percent
    pub kelly: f64,
    pub profit_index: f64,
    pub trades: u32,
}

impl Metrics {
    /// Compute metrics from the net P&L of each closed trade
    ///
    /// - profit factor: gross profit / gross loss (infinite with no losing
    ///   trade, 0 with no winning trade)
    /// - Kelly: `100 * (W - (1 - W) / R)`, W = win rate, R = avg win / avg loss
    /// - profit index: `sqrt(n) * mean / stddev` of trade P&L
    pub fn from_trade_pnls(pnls: &[f64]) -> Self {
        if pnls.is_empty() {
            return Metrics::default();
        }

        let trades = pnls.len();
        let net_profit: f64 = pnls.iter().sum();

        let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
        let gross_profit: f64 = wins.iter().sum();
        let gross_loss: f64 = pnls.iter().filter(|p| **p <= 0.0).map(|p| p.abs()).sum();
        let losses = trades - wins.len();

        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let win_rate = wins.len() as f64 / trades as f64;
        let avg_win = if wins.is_empty() {
            0.0
        } else {
            gross_profit / wins.len() as f64
        };
        let avg_loss = if losses == 0 {
            0.0
        } else {
            gross_loss / losses as f64
        };

        let kelly = if avg_loss > 0.0 && avg_win > 0.0 {
            100.0 * (win_rate - (1.0 - win_rate) / (avg_win / avg_loss))
        } else if avg_loss > 0.0 {
            -100.0
        } else {
            100.0 * win_rate
        };

        let profit_index = if trades > 1 {
            let std_dev = pnls.std_dev();
            if std_dev > 0.0 {
                (trades as f64).sqrt() * pnls.mean() / std_dev
            } else {
                0.0
            }
        } else {
            0.0
        };

        Metrics {
            net_profit,
            profit_factor,
            kelly,
            profit_index,
            trades: u32::try_from(trades).unwrap_or(u32::MAX),
        }
    }
}

// =============================================================================
// Performance metric selector
// =============================================================================

/// Metric used to rank optimization results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceMetric {
    #[default]
    #[serde(alias = "pf")]
    ProfitFactor,
    NetProfit,
    Kelly,
    #[serde(alias = "pi")]
    ProfitIndex,
}

impl PerformanceMetric {
    pub const ALL: [PerformanceMetric; 4] = [
        PerformanceMetric::ProfitFactor,
        PerformanceMetric::NetProfit,
        PerformanceMetric::Kelly,
        PerformanceMetric::ProfitIndex,
    ];

    /// Raw metric value
    pub fn value(&self, metrics: &Metrics) -> f64 {
        match self {
            PerformanceMetric::ProfitFactor => metrics.profit_factor,
            PerformanceMetric::NetProfit => metrics.net_profit,
            PerformanceMetric::Kelly => metrics.kelly,
            PerformanceMetric::ProfitIndex => metrics.profit_index,
        }
    }

    /// Totally ordered ranking key; NaN ranks below everything
    pub fn key(&self, metrics: &Metrics) -> OrderedFloat<f64> {
        let value = self.value(metrics);
        if value.is_nan() {
            OrderedFloat(f64::NEG_INFINITY)
        } else {
            OrderedFloat(value)
        }
    }

    /// Descending comparison: `Less` means `a` ranks ahead of `b`
    pub fn compare_desc(&self, a: &Metrics, b: &Metrics) -> Ordering {
        self.key(b).cmp(&self.key(a))
    }

    /// Short display name
    pub fn name(&self) -> &'static str {
        match self {
            PerformanceMetric::ProfitFactor => "PF",
            PerformanceMetric::NetProfit => "Net Profit",
            PerformanceMetric::Kelly => "Kelly",
            PerformanceMetric::ProfitIndex => "PI",
        }
    }
}

impl fmt::Display for PerformanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PerformanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "pf" | "profit_factor" => Ok(PerformanceMetric::ProfitFactor),
            "net_profit" | "netprofit" | "profit" => Ok(PerformanceMetric::NetProfit),
            "kelly" => Ok(PerformanceMetric::Kelly),
            "pi" | "profit_index" => Ok(PerformanceMetric::ProfitIndex),
            other => Err(format!(
                "unknown metric '{}' (expected pf, net_profit, kelly or pi)",
                other
            )),
        }
    }
}

// =============================================================================
// Search method selector
// =============================================================================

/// Which search strategy a run uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    #[default]
    #[serde(alias = "brute_force")]
    Exhaustive,
    #[serde(alias = "divide_conquer")]
    DivideAndConquer,
}

impl SearchMethod {
    pub fn name(&self) -> &'static str {
        match self {
            SearchMethod::Exhaustive => "Brute force",
            SearchMethod::DivideAndConquer => "Divide & Conquer",
        }
    }
}

impl fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SearchMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "exhaustive" | "brute_force" | "bruteforce" => Ok(SearchMethod::Exhaustive),
            "divide_and_conquer" | "divide_&_conquer" | "divide_conquer" | "d&c" | "dc" => {
                Ok(SearchMethod::DivideAndConquer)
            }
            other => Err(format!(
                "unknown search method '{}' (expected exhaustive or divide_and_conquer)",
                other
            )),
        }
    }
}
