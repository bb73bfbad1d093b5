//! Optimize command implementation with progress tracking and Ctrl-C cancellation

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use strategy_optimizer::{
    CancellationToken, IndicatifProgress, OptimizationRunner, PerformanceMetric, ReplayEvaluator,
    RunConfig, RunOutcome, SearchMethod,
};
use tracing::{error, info, warn};

#[derive(Args, Debug)]
pub struct OptimizeArgs {
    /// Path to run configuration file
    #[arg(short, long, default_value = "configs/sample_run.json")]
    pub config: PathBuf,

    /// Search method (brute_force, divide_and_conquer); overrides config
    #[arg(short, long)]
    pub method: Option<SearchMethod>,

    /// Rank results by metric (pf, net_profit, kelly, pi); overrides config
    #[arg(long)]
    pub sort_by: Option<PerformanceMetric>,

    /// Minimum trades for a result to be reported; overrides config
    #[arg(long)]
    pub min_trades: Option<u32>,

    /// Worker threads; overrides config and OPTIMIZER_WORKERS
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Number of top results to show
    #[arg(short, long, default_value = "10")]
    pub top: usize,

    /// Write every qualifying result to this CSV file
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// X axis parameter of the optimization map
    #[arg(long, requires = "map_y")]
    pub map_x: Option<String>,

    /// Y axis parameter of the optimization map
    #[arg(long, requires = "map_x")]
    pub map_y: Option<String>,
}

pub fn run(args: OptimizeArgs) -> Result<()> {
    info!("Starting optimization");

    let mut config = RunConfig::from_file(&args.config)?;
    info!("Loaded configuration from: {}", args.config.display());

    if let Some(method) = args.method {
        config.method = method;
    }
    if let Some(metric) = args.sort_by {
        config.metric = metric;
    }
    if let Some(min_trades) = args.min_trades {
        config.min_trades = min_trades;
    }
    if let Some(workers) = args.workers {
        config.optimizer.workers = Some(workers);
    }

    let space = config.space();
    let request = config.request();
    let settings = config
        .settings()
        .with_context(|| format!("Invalid optimizer settings in {}", args.config.display()))?;

    let combinations = space
        .cardinality()
        .map(|c| c.to_string())
        .unwrap_or_else(|e| format!("invalid ({})", e));

    println!("\n{}", "=".repeat(70));
    println!("OPTIMIZATION SUMMARY");
    println!("{}", "=".repeat(70));
    println!("  Data:          {}", config.historical_data.display());
    println!("  Parameters:    {}", space.names().join(", "));
    println!("  Combinations:  {}", combinations);
    println!("  Method:        {}", config.method);
    println!("  Ranked by:     {}", config.metric);
    println!("  Min trades:    {}", config.min_trades);
    println!("  Workers:       {}", settings.workers);
    println!("{}\n", "=".repeat(70));

    let cancel = CancellationToken::new();
    listen_for_ctrl_c(cancel.clone())?;

    let progress = Arc::new(IndicatifProgress::new());
    let runner = OptimizationRunner::new(settings).with_progress(progress.clone());
    let evaluator = Arc::new(ReplayEvaluator::new());

    let outcome = runner.run(&space, &request, evaluator, &cancel);
    match &outcome {
        Ok(o) => progress.finish(format!("{} results", o.results.len())),
        Err(_) => progress.finish("failed"),
    }
    println!();
    let outcome = outcome.context("Optimization failed")?;

    if outcome.is_partial() {
        warn!(
            "Optimization cancelled after {} of {} evaluations; results are partial",
            outcome.evaluated, outcome.planned
        );
        println!("Cancelled: showing partial results.");
    }

    print_results(&outcome, args.top);

    if let Some(path) = &args.export {
        outcome.results.write_csv(path)?;
        info!("Exported {} results to {}", outcome.results.len(), path.display());
        println!("Results written to {}", path.display());
    }

    if let (Some(x), Some(y)) = (&args.map_x, &args.map_y) {
        match outcome.results.surface(x, y, outcome.metric) {
            Some(surface) => {
                std::fs::create_dir_all(&config.results_dir).with_context(|| {
                    format!("Failed to create {}", config.results_dir.display())
                })?;
                let path = config.results_dir.join(format!("map_{}_{}.csv", x, y));
                surface.write_csv(&path)?;
                println!("Optimization map written to {}", path.display());
            }
            None => warn!("Cannot build optimization map: no results for {} x {}", x, y),
        }
    }

    info!("Optimization finished");
    Ok(())
}

/// Cancel `token` on Ctrl-C
///
/// The optimizer is synchronous, so the signal is awaited on a small
/// single-threaded runtime of its own.
fn listen_for_ctrl_c(token: CancellationToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;

    std::thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        warn!("Ctrl+C received - cancelling optimization");
                        token.cancel();
                    }
                    Err(err) => {
                        error!("Failed to listen for shutdown signal: {}", err);
                    }
                }
            })
        })
        .context("Failed to spawn signal thread")?;

    Ok(())
}

fn print_results(outcome: &RunOutcome, top: usize) {
    let display_count = top.min(outcome.results.len());

    println!("\n{}", "=".repeat(100));
    println!(
        "TOP {} OPTIMIZATION RESULTS ({} by {}, {} evaluated in {:.1?})",
        display_count,
        outcome.method,
        outcome.metric,
        outcome.evaluated,
        outcome.elapsed
    );
    println!("{}", "=".repeat(100));
    println!(
        "{:<4} {:>12} {:>8} {:>8} {:>8} {:>6} | Parameters",
        "Rank", "Net Profit", "PF", "Kelly", "PI", "Trades"
    );
    println!("{}", "-".repeat(100));

    for (i, result) in outcome.results.iter().take(top).enumerate() {
        let m = &result.metrics;
        println!(
            "{:<4} {:>12.2} {:>8.2} {:>8.2} {:>8.2} {:>6} | {}",
            i + 1,
            m.net_profit,
            m.profit_factor,
            m.kelly,
            m.profit_index,
            m.trades,
            result.assignment
        );
    }

    if outcome.results.is_empty() {
        println!("No result met the minimum trades filter.");
    }
    println!("{}", "=".repeat(100));
}
