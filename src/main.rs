// src/main.rs
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};
use std::sync::Arc;
use std::time::Instant;

use dedupe_lib::error::ResolutionError;
use dedupe_lib::matching::FieldSimilarityScorer;
use dedupe_lib::orchestrator::{run_full_rebuild, run_incremental, RunContext};
use dedupe_lib::review::{run_review_session, ReviewGate, StdinPrompter};
use dedupe_lib::store::PgStore;
use dedupe_lib::utils::db_connect::{connect, get_pool_status};
use dedupe_lib::utils::env::load_env;
use dedupe_lib::utils::get_memory_usage;
use dedupe_lib::utils::pipeline_config::PipelineConfig;
use dedupe_lib::utils::progress_config::ProgressConfig;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the resolution tables and the employer_record link column
    InitSchema,

    /// Rebuild the blocking map and cluster memberships from every record
    Rebuild {
        /// Drop existing memberships (and their review verdicts) first
        #[arg(long)]
        refresh: bool,
    },

    /// Resolve approved clusters into canonical employers
    Canonicalize {
        /// Maximum clusters (and singleton records) handled this run
        #[arg(long)]
        batch_limit: Option<usize>,

        /// Also give unclustered records their own canonical employer
        #[arg(long)]
        singletons: bool,
    },

    /// Review low-confidence clusters interactively
    Review {
        /// Stop after this many answers
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    load_env();
    let cli = Cli::parse();

    let result = run(cli).await;
    if let Err(e) = &result {
        match e.downcast_ref::<ResolutionError>() {
            Some(resolution_error) if resolution_error.is_fatal() => {
                error!("Fatal data inconsistency, stopping: {}", resolution_error);
            }
            _ => error!("Run failed: {:?}", e),
        }
    }
    result
}

async fn run(cli: Cli) -> Result<()> {
    let start = Instant::now();
    let config = PipelineConfig::from_env();
    let progress = ProgressConfig::from_env();
    info!(
        "Progress tracking: enabled={}, detailed={}",
        progress.enabled, progress.detailed
    );

    let pool = connect().await.context("Failed to connect to database")?;
    let store = Arc::new(PgStore::new(pool));
    store
        .ensure_schema()
        .await
        .context("Failed to prepare resolution tables")?;

    match cli.command {
        Command::InitSchema => {
            info!("Resolution schema is ready");
        }
        Command::Rebuild { refresh } => {
            let ctx = RunContext::new(store.clone(), Arc::new(FieldSimilarityScorer::default()), config)?
                .with_progress(progress.clone());
            run_full_rebuild(&ctx, refresh).await?;
        }
        Command::Canonicalize {
            batch_limit,
            singletons,
        } => {
            let ctx = RunContext::new(store.clone(), Arc::new(FieldSimilarityScorer::default()), config)?
                .with_progress(progress.clone());
            run_incremental(&ctx, batch_limit, singletons).await?;
        }
        Command::Review { limit } => {
            config.validate()?;
            let gate = ReviewGate::open(store.clone(), &config).await?;
            let mut prompter = StdinPrompter::stdio();
            let (outcome, summary) = run_review_session(gate, &mut prompter, limit).await?;
            info!(
                "Review session ended ({:?}): {} presented, {} accepted, {} rejected, {} unsure, {} committed in {} checkpoints",
                outcome,
                summary.presented,
                summary.accepted,
                summary.rejected,
                summary.unsure,
                summary.committed,
                summary.checkpoints
            );
        }
    }

    if progress.should_show_db_connection_stats() {
        let (total, idle, in_use) = get_pool_status(store.pool());
        info!(
            "DB pool: {} connections ({} idle, {} in use)",
            total, idle, in_use
        );
    }
    if progress.should_show_memory() {
        info!("Memory in use: {} MB", get_memory_usage().await);
    }
    info!("Finished in {:.2?}", start.elapsed());
    Ok(())
}
