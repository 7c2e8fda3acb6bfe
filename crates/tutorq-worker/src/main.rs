//! tutorq-worker: dispatch trigger and operator CLI for the tutorq job queue.
//!
//! `dispatch` is what a cron entry or webhook calls; `dispatch --watch` runs
//! the long-lived loop instead.

mod logging;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value as JsonValue};
use tracing::info;
use uuid::Uuid;

use tutorq_db::{Database, PoolConfig};
use tutorq_jobs::{
    default_registry, BatchApi, Clock, Dispatcher, DispatcherConfig, EnqueueConfig,
    EnqueueOptions, Enqueuer, HttpBatchApi, JobStore, JobType, SystemClock,
};

/// Owner of jobs enqueued by the operator CLI itself.
const SYSTEM_ID: Uuid = Uuid::nil();

#[derive(Parser)]
#[command(name = "tutorq-worker")]
#[command(author, version, about = "Durable job queue worker for tutorq")]
#[command(propagate_version = true)]
struct Cli {
    /// PostgreSQL URL (default: DATABASE_URL or postgres://localhost/tutorq)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,

    /// Sweep expired leases, then claim and run eligible jobs
    Dispatch {
        /// Jobs claimed per pass (default: JOB_DISPATCH_LIMIT)
        #[arg(short, long)]
        limit: Option<usize>,

        /// Keep dispatching until interrupted
        #[arg(short, long)]
        watch: bool,
    },

    /// Return expired leases to the queue
    Sweep,

    /// Enqueue a batch reconciliation pass
    Reconcile {
        /// Reconcile only this batch job
        #[arg(long)]
        job_id: Option<Uuid>,

        /// Batches inspected in the pass
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Show a job
    Status {
        /// Job id
        id: Uuid,
    },

    /// Cancel a job that has not started
    Cancel {
        /// Job id
        id: Uuid,

        /// Recorded as the job's error
        #[arg(short, long, default_value = "cancelled by operator")]
        reason: String,
    },

    /// Show job counts per status
    Stats,
}

/// Everything the job commands need, wired from the environment.
struct Engine {
    enqueuer: Enqueuer,
    dispatcher: Dispatcher,
}

impl Engine {
    fn new(db: &Database) -> anyhow::Result<Self> {
        let store: Arc<dyn JobStore> = Arc::new(db.jobs.clone());
        let batch_api: Arc<dyn BatchApi> = Arc::new(HttpBatchApi::from_env()?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let registry = Arc::new(default_registry(
            store.clone(),
            batch_api.clone(),
            Arc::new(db.entities.clone()),
            clock.clone(),
        ));

        let enqueuer = Enqueuer::new(store.clone(), registry.clone(), batch_api, clock.clone())
            .with_config(EnqueueConfig::from_env());
        let dispatcher =
            Dispatcher::new(store, registry, clock).with_config(DispatcherConfig::from_env());

        Ok(Self {
            enqueuer,
            dispatcher,
        })
    }
}

fn reconcile_payload(job_id: Option<Uuid>, limit: Option<i64>) -> JsonValue {
    let mut payload = Map::new();
    if let Some(job_id) = job_id {
        payload.insert("job_id".to_string(), json!(job_id));
    }
    if let Some(limit) = limit {
        payload.insert("limit".to_string(), json!(limit));
    }
    JsonValue::Object(payload)
}

fn print_json(value: &JsonValue) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let log_settings = logging::LogSettings::from_env();
    let _log_guard = logging::init(&log_settings);
    info!(
        log_json = log_settings.json,
        log_file = log_settings.file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let database_url = cli
        .database_url
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .unwrap_or_else(|| "postgres://localhost/tutorq".to_string());
    let db = Database::connect_with_config(&database_url, PoolConfig::from_env()).await?;

    if let Commands::Migrate = cli.command {
        info!("Running database migrations...");
        db.migrate().await?;
        info!("Database migrations complete");
        return Ok(());
    }

    let engine = Engine::new(&db)?;

    match cli.command {
        Commands::Migrate => {}
        Commands::Dispatch { limit, watch } => {
            let mut config = engine.dispatcher.config().clone();
            if let Some(limit) = limit {
                config = config.with_limit(limit);
            }
            let limit = config.limit;
            let dispatcher = engine.dispatcher.with_config(config);

            if watch {
                let handle = dispatcher.start();
                tokio::signal::ctrl_c().await?;
                info!("Shutdown signal received");
                handle.shutdown().await?;
            } else {
                let processed = dispatcher.process_jobs(limit).await?;
                print_json(&json!({ "processed": processed }))?;
            }
        }
        Commands::Sweep => {
            let swept = engine.dispatcher.sweep_stale_leases().await?;
            print_json(&json!({ "swept": swept }))?;
        }
        Commands::Reconcile { job_id, limit } => {
            let job = engine
                .enqueuer
                .enqueue(
                    SYSTEM_ID,
                    SYSTEM_ID,
                    JobType::ProcessBatchResult,
                    reconcile_payload(job_id, limit),
                    EnqueueOptions::new(),
                )
                .await?;
            print_json(&serde_json::to_value(&job)?)?;
        }
        Commands::Status { id } => {
            let job = engine.enqueuer.get_job(id).await?;
            print_json(&serde_json::to_value(&job)?)?;
        }
        Commands::Cancel { id, reason } => {
            let job = engine.enqueuer.cancel(id, &reason).await?;
            print_json(&serde_json::to_value(&job)?)?;
        }
        Commands::Stats => {
            let stats = engine.enqueuer.queue_stats().await?;
            print_json(&serde_json::to_value(&stats)?)?;
        }
    }

    Ok(())
}
