use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use waterq_core::Period;
use waterq_sync::{check_schemas, SyncConfig, SyncPipeline, SyncRunSummary};

#[derive(Debug, Parser)]
#[command(name = "waterq-cli")]
#[command(about = "BMWP water-quality sync")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the pipeline once.
    Sync {
        /// Target month as YYYY-MM; defaults to the current month.
        #[arg(long)]
        period: Option<Period>,
        /// Keep every write in memory and print the row counts.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the stations that would be polled.
    Stations,
    /// Run the monthly schedule until interrupted.
    Schedule,
    /// Check that the destination tables have every expected column.
    CheckSchema,
}

fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();
}

fn print_summary(summary: &SyncRunSummary) {
    println!(
        "sync complete: run_id={} period={} stations={} raw={} measurements={} index_records={}",
        summary.run_id,
        summary.period,
        summary.stations,
        summary.raw_captures,
        summary.measurements,
        summary.index_records
    );
    if !summary.failed_fetches.is_empty() {
        println!("  failed requests: {}", summary.failed_fetches.join(", "));
    }
    if !summary.failed_parses.is_empty() {
        println!("  unparseable responses: {}", summary.failed_parses.join(", "));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    setup_tracing();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync {
        period: None,
        dry_run: false,
    }) {
        Commands::Sync { period, dry_run } => {
            let period = period.unwrap_or_else(Period::current);
            if dry_run {
                let (pipeline, memory) = SyncPipeline::dry_run(config)?;
                let summary = pipeline.run_once(period).await?;
                print_summary(&summary);
                for schema in pipeline.tables().all() {
                    let table = schema.table.to_string();
                    println!("  {table}: {} rows", memory.row_count(&table));
                }
            } else {
                let summary = SyncPipeline::new(config)?.run_once(period).await?;
                print_summary(&summary);
            }
        }
        Commands::Stations => {
            let pipeline = SyncPipeline::new(config)?;
            for station in pipeline.stations().await? {
                println!("{}\t{}", station.code, station.name);
            }
        }
        Commands::Schedule => {
            waterq_sync::ensure_schemas(&config).await?;
            let pipeline = Arc::new(SyncPipeline::new(config)?);
            let sched = pipeline
                .maybe_build_scheduler()
                .await?
                .context("scheduler disabled; set WATERQ_SCHEDULER_ENABLED=true")?;
            sched.start().await.context("starting scheduler")?;
            info!("scheduler running, press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for shutdown signal")?;
            info!("shutting down");
        }
        Commands::CheckSchema => {
            let mut complete = true;
            for (table, missing) in check_schemas(&config).await? {
                if missing.is_empty() {
                    println!("{table}: ok");
                } else {
                    complete = false;
                    println!("{table}: missing {}", missing.join(", "));
                }
            }
            if !complete {
                anyhow::bail!("destination schema check failed");
            }
        }
    }

    Ok(())
}
