//! RAM Reclaim - memory monitor and optimizer for Windows

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ramreclaim::core::optimizer::{CacheOutcome, StepStatus};
use ramreclaim::monitor::realtime::UsageSource;
use ramreclaim::{
    ControllerConfig, ControllerEvent, FeatureToggles, OptimizationOutcome, RamController,
    SystemUsageSource,
};

#[derive(Parser)]
#[command(name = "ramreclaim")]
#[command(about = "Monitor RAM usage and reclaim memory", long_about = None)]
struct Cli {
    /// Config file (defaults to the per-user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current memory usage
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Run one optimization pass
    Optimize {
        /// Trim process working sets
        #[arg(long)]
        working_sets: bool,

        /// Flush the system file cache
        #[arg(long)]
        file_cache: bool,

        /// Purge the standby list (with --file-cache)
        #[arg(long)]
        standby: bool,

        /// Empty the clipboard
        #[arg(long)]
        clipboard: bool,

        /// Trim our own working set at the end
        #[arg(long)]
        gc: bool,

        /// Milliseconds to wait before measuring the result
        #[arg(long)]
        settle: Option<u64>,

        #[arg(long)]
        json: bool,
    },

    /// Monitor usage and auto-optimize until Ctrl-C
    Monitor {
        /// Sampling interval in milliseconds
        #[arg(short, long)]
        interval: Option<i64>,

        /// Auto-optimize when usage reaches this percentage (25-100)
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Also optimize every N milliseconds
        #[arg(long)]
        every: Option<i64>,
    },

    /// Show or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
    /// Write the default configuration
    Init {
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.clone().unwrap_or_else(ControllerConfig::default_path);
    let config = ControllerConfig::load_or_default(&config_path)?;

    match cli.command {
        Commands::Status { json } => {
            let sample = SystemUsageSource::new().sample();
            if json {
                println!("{}", serde_json::to_string_pretty(&sample)?);
            } else {
                println!("Memory Status:");
                println!("  Total:  {:.0} MB", sample.total_mb());
                println!("  Used:   {:.0} MB", sample.used_mb());
                println!("  Load:   {:.1}%", sample.used_percentage);
            }
        }

        Commands::Optimize { working_sets, file_cache, standby, clipboard, gc, settle, json } => {
            let mut config = config;
            if working_sets || file_cache || standby || clipboard || gc {
                config.features = FeatureToggles {
                    empty_working_sets: working_sets,
                    clear_file_system_cache: file_cache || standby,
                    clear_standby_cache: standby,
                    clear_clipboard: clipboard,
                    invoke_gc: gc,
                };
            }
            if let Some(ms) = settle {
                config.settle_time_ms = ms;
            }

            let controller = RamController::with_system(config)?;
            match controller.clear_memory().await {
                Some(outcome) if json => println!("{}", serde_json::to_string_pretty(&outcome)?),
                Some(outcome) => print_outcome(&outcome),
                None => println!("An optimization is already running"),
            }
        }

        Commands::Monitor { interval, threshold, every } => {
            let controller = RamController::with_system(config)?;
            if let Some(ms) = interval {
                controller.set_monitor_interval(ms)?;
            }
            if let Some(pct) = threshold {
                controller.set_auto_optimize_threshold(pct)?;
                controller.set_auto_optimize_by_percentage(true);
            }
            if let Some(ms) = every {
                controller.set_auto_optimize_by_interval(true, ms)?;
            }

            controller.subscribe(|event| match event {
                ControllerEvent::UsageUpdated(sample) => {
                    println!(
                        "{}  {:>8.0} / {:.0} MB  {:>5.1}%",
                        sample.recorded_at.format("%H:%M:%S"),
                        sample.used_mb(),
                        sample.total_mb(),
                        sample.used_percentage
                    );
                }
                ControllerEvent::OptimizationCompleted(outcome) => print_outcome(outcome),
                _ => {}
            });

            info!(
                "Monitoring every {:?} (auto-optimize: {})",
                controller.monitor_interval(),
                controller.auto_optimize_by_percentage()
            );
            controller.start();

            tokio::signal::ctrl_c().await?;
            controller.shutdown();

            // Let a pass that is still running publish its outcome
            while controller.is_clearing() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }

            let stats = controller.history_stats();
            println!("Samples: {}", stats.sample_count);
            println!("  Avg load: {:.1}%", stats.avg_memory_load);
            println!("  Max load: {:.1}%", stats.max_memory_load);
            println!("  Min load: {:.1}%", stats.min_memory_load);
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => println!("{}", toml::to_string_pretty(&config)?),
            ConfigAction::Path => println!("{}", config_path.display()),
            ConfigAction::Init { force } => {
                if config_path.exists() && !force {
                    println!("{} already exists (use --force to overwrite)", config_path.display());
                } else {
                    ControllerConfig::default().save(&config_path)?;
                    println!("Wrote {}", config_path.display());
                }
            }
        },
    }

    Ok(())
}

fn print_outcome(outcome: &OptimizationOutcome) {
    println!("Optimization complete ({:?}, {:?}):", outcome.kind, outcome.trigger);
    println!("  Saved:     {:.1} MB", outcome.savings_mb());
    println!("  Duration:  {} ms", outcome.duration_ms);
    if let Some(report) = &outcome.steps.working_sets {
        println!(
            "  Processes: {} trimmed, {} excluded, {} failed",
            report.trimmed(),
            report.excluded(),
            report.failed()
        );
    }
    if let Some(CacheOutcome { file_cache, standby_list }) = &outcome.steps.caches {
        println!("  File cache:   {}", describe(file_cache));
        println!("  Standby list: {}", describe(standby_list));
    }
}

fn describe(status: &StepStatus) -> String {
    match status {
        StepStatus::NotRequested => "not requested".into(),
        StepStatus::Done => "cleared".into(),
        StepStatus::PrivilegeUnavailable => "skipped (privilege not held)".into(),
        StepStatus::Aborted => "skipped (earlier step failed)".into(),
        StepStatus::Failed(code) => format!("failed (os error {})", code),
    }
}
