//! Strategy optimizer - main entry point
//!
//! This binary provides two subcommands:
//! - optimize: Search a parameter space for the best-performing assignments
//! - space: Show a parameter space and how many evaluations each method needs

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "strategy-optimizer")]
#[command(about = "Parallel parameter optimization for trading strategies", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Optimize strategy parameters
    Optimize(commands::optimize::OptimizeArgs),

    /// Show the parameter space of a run configuration
    Space {
        /// Path to run configuration file
        #[arg(short, long, default_value = "configs/sample_run.json")]
        config: PathBuf,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if file_only {
        // Console stays clean for the progress bar
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(tracing_appender::rolling::never("logs", &log_filename))
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(tracing_appender::rolling::never("logs", &log_filename))
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();
    }

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());
    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Optimize(_) => ("optimize", true),
        Commands::Space { .. } => ("space", false),
    };

    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Optimize(args) => commands::optimize::run(args),
        Commands::Space { config } => commands::space::run(&config),
    }
}
