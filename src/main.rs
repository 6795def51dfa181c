use clap::{Parser, ValueEnum};
use metareport::ReporterConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Report granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Level {
    /// Meta files for a single model directory
    Model,
    /// One summary row per model of a session directory
    Session,
}

/// Aggregate per-class metrics of repeated training runs into model meta
/// files and a deduplicated session summary.
#[derive(Parser, Debug)]
#[command(name = "metareport", version, about)]
struct Cli {
    /// Session directory (or model directory with --level model)
    #[arg(value_name = "PATH")]
    path: PathBuf,

    /// Config file path (.json or .toml)
    #[arg(short, long, default_value = "meta_report.toml")]
    config: PathBuf,

    /// Directory for generated reports (default: PATH)
    #[arg(short, long)]
    result_dir: Option<PathBuf>,

    /// Report level
    #[arg(long, value_enum, default_value_t = Level::Session)]
    level: Level,

    /// Concurrent model workers (overrides config)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (per-file discovery, dataset sizes)
    #[arg(short, long)]
    verbose: bool,

    /// Only errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let mut config = match ReporterConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };
    if let Some(workers) = cli.workers {
        config.workers = workers.max(1);
    }

    if cli.dry_run {
        println!("Config file: {}", cli.config.display());
        println!("{config}");
        println!("Dry run mode, config validated, not running.");
        return;
    }

    let result_dir = cli.result_dir.clone().unwrap_or_else(|| cli.path.clone());

    let outcome = match cli.level {
        Level::Model => metareport::generate_per_model(&cli.path, &result_dir, &config),
        Level::Session if config.workers > 1 => {
            metareport::run_concurrent(cli.path.clone(), result_dir, Arc::new(config)).await
        }
        Level::Session => metareport::run(&cli.path, &result_dir, &config),
    };

    match outcome {
        Ok(true) => tracing::info!("report generation finished"),
        Ok(false) => {
            tracing::warn!("report generation incomplete");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!(error = %e, "report generation failed");
            std::process::exit(1);
        }
    }
}
