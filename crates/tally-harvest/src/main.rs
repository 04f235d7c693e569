//! Tally - batch attendance harvester

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tally_common::logging::{init_logging, LogConfig, LogLevel};
use tally_harvest::progress::{batch_message, create_run_progress};
use tally_harvest::store::file::JsonFileStore;
use tally_harvest::{keys, HarvestConfig, ReplayExtractor, RunCoordinator};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(author, version, about = "Harvest per-entity records into versioned tables")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the keys a run would process
    Keys {
        /// Harvest configuration file
        #[arg(short, long, env = "TALLY_CONFIG", default_value = "harvest.toml")]
        config: PathBuf,
    },

    /// Execute one harvest run
    Run {
        /// Harvest configuration file
        #[arg(short, long, env = "TALLY_CONFIG", default_value = "harvest.toml")]
        config: PathBuf,

        /// JSON store file, created if missing
        #[arg(short, long, env = "TALLY_STORE")]
        store: PathBuf,

        /// Directory of captured `<key>.json` records
        #[arg(short, long, env = "TALLY_RECORDS")]
        records: PathBuf,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Load and validate configuration
    Check {
        /// Harvest configuration file
        #[arg(short, long, env = "TALLY_CONFIG", default_value = "harvest.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("tally")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Keys { config } => {
            let config = load_config(&config)?;
            for key in keys::generate(&config.keys) {
                println!("{}", key);
            }
        },
        Command::Run {
            config,
            store,
            records,
            no_progress,
        } => {
            let config = load_config(&config)?;
            run(&config, store, records, !no_progress).await?;
        },
        Command::Check { config } => {
            let config = load_config(&config)?;
            let keys = keys::generate(&config.keys);
            println!(
                "ok: {} keys, {} tables, {} extra cells",
                keys.len(),
                config.tables.len(),
                config.extra_cells.len()
            );
        },
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<HarvestConfig> {
    HarvestConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

async fn run(config: &HarvestConfig, store_path: PathBuf, records: PathBuf, show_progress: bool) -> Result<()> {
    let store = Arc::new(JsonFileStore::open(&store_path).await?);
    store
        .ensure_tables(config.tables.iter().map(|t| t.name.as_str()))
        .await;

    let extractor = Arc::new(ReplayExtractor::new(records, config.extraction.total_field.clone()));
    let coordinator = RunCoordinator::new(config, store.clone(), extractor)?;

    let keys = keys::generate(&config.keys);
    let total_batches = keys.len().div_ceil(config.scheduler.concurrency_limit);
    let pb = create_run_progress(keys.len() as u64, "Harvesting");
    if !show_progress {
        pb.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }

    let summary = coordinator
        .run_with(keys, |batch| {
            let failed = batch.outcomes.iter().filter(|o| !o.is_success()).count();
            pb.inc(batch.outcomes.len() as u64);
            pb.set_message(batch_message(batch.index, total_batches, failed));
        })
        .await;
    pb.finish_and_clear();

    // Persist whatever was written, even when the run aborted.
    store.save().await.context("saving store")?;
    let summary = summary?;

    for failed in &summary.failed_keys {
        info!(key = %failed.key, attempts = failed.attempts, reason = %failed.reason, "Key failed");
    }
    println!("{}", summary);
    Ok(())
}
