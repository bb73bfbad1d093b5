//! Space command: inspect a parameter space without running it

use anyhow::{Context, Result};
use std::path::Path;
use strategy_optimizer::search::{build_strategy, RefinementSettings};
use strategy_optimizer::{RunConfig, SearchMethod};
use tracing::info;

pub fn run(config_path: &Path) -> Result<()> {
    let config = RunConfig::from_file(config_path)?;
    let space = config.space();
    space
        .validate()
        .with_context(|| format!("Invalid parameters in {}", config_path.display()))?;

    println!("\n{}", "=".repeat(70));
    println!(
        "{:<20} {:>10} {:>10} {:>10} {:>10} {:>6}",
        "Parameter", "Min", "Max", "Step", "Default", "Values"
    );
    println!("{}", "-".repeat(70));
    for param in space.params() {
        println!(
            "{:<20} {:>10} {:>10} {:>10} {:>10} {:>6}",
            param.name,
            param.min,
            param.max,
            param.step,
            param.default,
            param.value_count()
        );
    }
    println!("{}", "=".repeat(70));

    let refinement = RefinementSettings {
        coarsen_factor: config.optimizer.coarsen_factor,
        max_iterations: config.optimizer.max_iterations,
    };
    for method in [SearchMethod::Exhaustive, SearchMethod::DivideAndConquer] {
        let planned = build_strategy(method, refinement).planned_evaluations(&space)?;
        println!("  {:<18} {} evaluations", format!("{}:", method), planned);
    }

    info!(
        "Space of {} parameters, {} combinations",
        space.len(),
        space.cardinality()?
    );
    Ok(())
}
