//! # Fundflow — event engine administration
//!
//! Usage:
//!   fundflow process-scheduled [--limit N] [--priority P] [--dry-run]
//!   fundflow cleanup-scheduled [--days N] [--status S] [--dry-run] [--yes]
//!   fundflow status
//!   fundflow retry-scheduled <id>

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fundflow_core::config::{FundflowConfig, Priority};
use fundflow_engine::{
    BatchProcessor, EventRegistry, RetentionSweeper, ScheduledStore, StatusFilter,
};

#[derive(Parser)]
#[command(name = "fundflow", version, about = "Fundflow event engine administration")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "~/.fundflow/config.toml")]
    config: String,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one batch pass over due scheduled events
    ProcessScheduled {
        /// Max records this pass (default: scheduled.batch_size)
        #[arg(long)]
        limit: Option<u32>,
        /// Only process one priority: critical|high|medium|low
        #[arg(long)]
        priority: Option<String>,
        /// Print the selection without executing or mutating
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete terminal scheduled events past the retention window
    CleanupScheduled {
        /// Age cutoff in days (default: scheduled.retention_days)
        #[arg(long)]
        days: Option<u32>,
        /// Which terminal statuses: processed|failed|all
        #[arg(long, default_value = "all")]
        status: String,
        /// Report candidates without deleting
        #[arg(long)]
        dry_run: bool,
        /// Skip the confirmation prompt (for cron use)
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Show per-status scheduled event counts
    Status,
    /// Reset one failed scheduled event back to pending
    RetryScheduled {
        /// Record id (sev-...)
        id: String,
    },
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

/// Application event types and listeners are registered here at startup.
/// The admin commands only need rehydration for types that may appear in
/// the scheduled store.
fn build_registry() -> EventRegistry {
    EventRegistry::new()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "fundflow=debug,fundflow_engine=debug"
    } else {
        "fundflow=info,fundflow_engine=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config_path = expand_path(&cli.config);
    let config = if Path::new(&config_path).exists() {
        FundflowConfig::load_from(Path::new(&config_path))?
    } else {
        FundflowConfig::default()
    };

    let db_path = expand_path(&config.scheduled.db_path);
    let store = Arc::new(ScheduledStore::open(Path::new(&db_path))?);
    let events_config = Arc::new(config.events.clone());

    match cli.command {
        Command::ProcessScheduled {
            limit,
            priority,
            dry_run,
        } => {
            if !config.scheduled.enabled {
                println!("Deferred processing is disabled in config; nothing to do.");
                return Ok(());
            }
            let limit = limit.unwrap_or(config.scheduled.batch_size);
            let priority = priority
                .map(|p| p.parse::<Priority>())
                .transpose()?;

            let registry = Arc::new(build_registry());
            let processor = BatchProcessor::new(events_config, registry.clone(), store);

            if dry_run {
                let selection = processor.run_dry(limit, priority)?;
                println!("Dry run: {} due record(s) would be processed", selection.len());
                for ev in &selection {
                    println!(
                        "  {}  {:<10} {:<30} attempts {}/{}  due {}",
                        ev.id,
                        ev.priority.to_string(),
                        ev.event_type,
                        ev.attempts,
                        ev.max_attempts,
                        ev.scheduled_at.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                }
                return Ok(());
            }

            // With no registered event types every claimed record would burn
            // an attempt on rehydration. Refuse to mutate anything.
            if registry.factory_count() == 0 {
                println!(
                    "No event types are registered; a batch run would fail every \
                     due record. Use --dry-run to inspect the selection."
                );
                std::process::exit(1);
            }

            let outcome = processor.run(limit, priority).await?;
            println!(
                "Batch complete: {} processed, {} retried, {} failed",
                outcome.processed, outcome.retried, outcome.failed
            );
            if !outcome.is_clean() {
                std::process::exit(1);
            }
        }

        Command::CleanupScheduled {
            days,
            status,
            dry_run,
            yes,
        } => {
            let days = days.unwrap_or(config.scheduled.retention_days);
            let filter: StatusFilter = status.parse()?;
            let sweeper = RetentionSweeper::new(store);

            if dry_run {
                let report = sweeper.cleanup(days, filter, true)?;
                println!(
                    "Dry run: {} record(s) older than {days}d would be deleted",
                    report.candidates
                );
                for id in &report.sample {
                    println!("  {id}");
                }
                return Ok(());
            }

            if !yes {
                println!(
                    "Delete scheduled events with status '{status}' older than {days} days? [y/N]"
                );
                let mut answer = String::new();
                std::io::stdin().read_line(&mut answer)?;
                if !answer.trim().eq_ignore_ascii_case("y") {
                    println!("Aborted.");
                    return Ok(());
                }
            }

            let report = sweeper.cleanup(days, filter, false)?;
            println!("Deleted {} record(s).", report.deleted);
        }

        Command::Status => {
            let counts = store.status_counts()?;
            if counts.is_empty() {
                println!("No scheduled events.");
            } else {
                for (status, count) in counts {
                    println!("{status:<12} {count}");
                }
            }
        }

        Command::RetryScheduled { id } => {
            if store.reset_for_retry(&id)? {
                println!("Record {id} reset to pending.");
            } else {
                match store.get(&id)? {
                    Some(ev) => {
                        println!(
                            "Record {id} is '{}', only failed records can be retried.",
                            ev.status
                        );
                        std::process::exit(1);
                    }
                    None => {
                        println!("No record with id {id}.");
                        std::process::exit(1);
                    }
                }
            }
        }
    }

    Ok(())
}
